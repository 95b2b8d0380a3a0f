//! Reader and Cache Coherence Tests
//!
//! Covers the cache-first read discipline, the advisory cache contract
//! (failures fall through to the store), tenant isolation on cached rows,
//! pagination capping, and the attribute query layer.

#[cfg(test)]
mod reader_cache_tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use objectkernel_core::db::{DatabaseService, ObjectStore, TursoStore};
    use objectkernel_core::models::{ActorContext, ObjectRecord, ObjectStatus, PageRequest};
    use objectkernel_core::services::cache::{CacheError, MemoryCache, ObjectCache};
    use objectkernel_core::services::{
        CreateObject, KernelError, ObjectReader, ObjectService, UpdateObject,
    };
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;
    use uuid::Uuid;

    /// Cache double whose every operation fails - proves the advisory contract
    struct BrokenCache;

    #[async_trait]
    impl ObjectCache for BrokenCache {
        async fn get_by_id(&self, _id: Uuid) -> Result<Option<ObjectRecord>, CacheError> {
            Err(CacheError::Unavailable("cache offline".to_string()))
        }

        async fn get_id_by_code(
            &self,
            _tenant_id: Uuid,
            _type_code: &str,
            _code: &str,
        ) -> Result<Option<Uuid>, CacheError> {
            Err(CacheError::Unavailable("cache offline".to_string()))
        }

        async fn put(&self, _record: &ObjectRecord) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("cache offline".to_string()))
        }

        async fn invalidate(&self, _id: Uuid) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("cache offline".to_string()))
        }

        async fn invalidate_by_code(
            &self,
            _tenant_id: Uuid,
            _type_code: &str,
            _code: &str,
        ) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("cache offline".to_string()))
        }

        async fn invalidate_by_type(&self, _type_code: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("cache offline".to_string()))
        }
    }

    async fn open_store(dir: &TempDir, file: &str) -> Result<Arc<dyn ObjectStore>> {
        let db = DatabaseService::new(dir.path().join(file), "kernel").await?;
        Ok(Arc::new(TursoStore::new(Arc::new(db))))
    }

    fn actor() -> ActorContext {
        ActorContext::user("reader-test")
    }

    fn cand(code: &str, name: &str, data: serde_json::Value) -> CreateObject {
        CreateObject {
            type_code: "CAND".to_string(),
            code: code.to_string(),
            name: name.to_string(),
            data,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn reads_are_served_from_cache_when_the_store_has_nothing() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir, "kernel.db").await?;
        let cache = Arc::new(MemoryCache::new());
        let mutator = ObjectService::new(Arc::clone(&store), cache.clone());
        let tenant = Uuid::new_v4();

        let created = mutator
            .create(tenant, &actor(), cand("C-1", "Cached", json!({"n": 1})))
            .await?;

        // A reader over an empty store but the populated cache: only a cache
        // hit can explain a successful read
        let empty_store = open_store(&dir, "empty.db").await?;
        let reader = ObjectReader::new(empty_store, cache);

        let fetched = reader.get(tenant, created.id).await?;
        assert_eq!(fetched.data, json!({"n": 1}));

        let by_code = reader.get_by_code(tenant, "CAND", "C-1").await?;
        assert_eq!(by_code.id, created.id);
        Ok(())
    }

    #[tokio::test]
    async fn cache_failures_fall_through_to_the_store() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir, "kernel.db").await?;
        let broken: Arc<dyn ObjectCache> = Arc::new(BrokenCache);
        let mutator = ObjectService::new(Arc::clone(&store), broken.clone());
        let reader = ObjectReader::new(Arc::clone(&store), broken);
        let tenant = Uuid::new_v4();

        // Mutations succeed even though every cache write fails
        let created = mutator
            .create(tenant, &actor(), cand("C-1", "Resilient", json!({"n": 1})))
            .await?;
        mutator
            .update(
                tenant,
                &actor(),
                created.id,
                UpdateObject {
                    data: Some(json!({"n": 2})),
                    ..Default::default()
                },
            )
            .await?;

        // Reads fall through to the store
        let fetched = reader.get(tenant, created.id).await?;
        assert_eq!(fetched.data, json!({"n": 2}));
        let by_code = reader.get_by_code(tenant, "CAND", "C-1").await?;
        assert_eq!(by_code.version, 2);
        Ok(())
    }

    #[tokio::test]
    async fn a_miss_repopulates_the_cache() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir, "kernel.db").await?;
        let write_cache = Arc::new(MemoryCache::new());
        let mutator = ObjectService::new(Arc::clone(&store), write_cache);
        let tenant = Uuid::new_v4();

        let created = mutator
            .create(tenant, &actor(), cand("C-1", "Warm", json!({"n": 1})))
            .await?;

        // Fresh cache: first read misses and loads from the store
        let cache = Arc::new(MemoryCache::new());
        let reader = ObjectReader::new(Arc::clone(&store), cache.clone());
        reader.get(tenant, created.id).await?;

        // Now the cache alone can answer
        let cached = cache.get_by_id(created.id).await?.unwrap();
        assert_eq!(cached.code, "C-1");
        Ok(())
    }

    #[tokio::test]
    async fn cached_rows_never_leak_across_tenants() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir, "kernel.db").await?;
        let cache = Arc::new(MemoryCache::new());
        let mutator = ObjectService::new(Arc::clone(&store), cache.clone());
        let reader = ObjectReader::new(Arc::clone(&store), cache);
        let tenant = Uuid::new_v4();

        let created = mutator
            .create(tenant, &actor(), cand("C-1", "Private", json!({})))
            .await?;

        // The row is cached under its owner; a foreign tenant gets NotFound
        let err = reader.get(Uuid::new_v4(), created.id).await.unwrap_err();
        assert!(matches!(err, KernelError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn bulk_get_with_no_ids_returns_without_a_store_call() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir, "kernel.db").await?;
        let cache = Arc::new(MemoryCache::new());
        let reader = ObjectReader::new(store, cache);

        let result = reader.bulk_get(Uuid::new_v4(), &[]).await?;
        assert!(result.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn bulk_get_skips_unknown_and_deleted_ids() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir, "kernel.db").await?;
        let cache = Arc::new(MemoryCache::new());
        let mutator = ObjectService::new(Arc::clone(&store), cache.clone());
        let reader = ObjectReader::new(store, cache);
        let tenant = Uuid::new_v4();

        let a = mutator
            .create(tenant, &actor(), cand("C-1", "A", json!({})))
            .await?;
        let b = mutator
            .create(tenant, &actor(), cand("C-2", "B", json!({})))
            .await?;
        mutator.soft_delete(tenant, &actor(), b.id, None).await?;

        let result = reader
            .bulk_get(tenant, &[a.id, b.id, Uuid::new_v4()])
            .await?;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, a.id);
        Ok(())
    }

    #[tokio::test]
    async fn page_size_is_capped_and_totals_are_exact() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir, "kernel.db").await?;
        let cache = Arc::new(MemoryCache::new());
        let mutator = ObjectService::new(Arc::clone(&store), cache.clone());
        let reader = ObjectReader::new(store, cache);
        let tenant = Uuid::new_v4();

        for i in 0..3 {
            mutator
                .create(
                    tenant,
                    &actor(),
                    cand(&format!("C-{}", i), &format!("Cand {}", i), json!({})),
                )
                .await?;
        }

        let capped = reader
            .list_by_type(tenant, "CAND", None, PageRequest::new(0, 5000))
            .await?;
        assert_eq!(capped.size, 1000);
        assert_eq!(capped.total, 3);

        let first = reader
            .list_by_type(tenant, "CAND", None, PageRequest::new(0, 2))
            .await?;
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.total, 3);
        let second = reader
            .list_by_type(tenant, "CAND", None, PageRequest::new(1, 2))
            .await?;
        assert_eq!(second.items.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn archived_rows_are_reachable_only_when_asked_for() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir, "kernel.db").await?;
        let cache = Arc::new(MemoryCache::new());
        let mutator = ObjectService::new(Arc::clone(&store), cache.clone());
        let reader = ObjectReader::new(store, cache);
        let tenant = Uuid::new_v4();

        let live = mutator
            .create(tenant, &actor(), cand("C-1", "Live", json!({})))
            .await?;
        let archived = mutator
            .create(tenant, &actor(), cand("C-2", "Old", json!({})))
            .await?;
        mutator
            .change_status(tenant, &actor(), archived.id, ObjectStatus::Archived, None)
            .await?;

        // No status filter: both live statuses appear
        let all = reader
            .list_by_type(tenant, "CAND", None, PageRequest::first())
            .await?;
        assert_eq!(all.total, 2);

        let only_active = reader
            .list_by_status(tenant, "CAND", ObjectStatus::Active, PageRequest::first())
            .await?;
        assert_eq!(only_active.total, 1);
        assert_eq!(only_active.items[0].id, live.id);

        let only_archived = reader
            .list_by_status(tenant, "CAND", ObjectStatus::Archived, PageRequest::first())
            .await?;
        assert_eq!(only_archived.total, 1);
        assert_eq!(only_archived.items[0].id, archived.id);

        assert_eq!(reader.count_by_type(tenant, "CAND").await?, 2);
        assert_eq!(
            reader
                .count_by_status(tenant, "CAND", ObjectStatus::Archived)
                .await?,
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn name_search_matches_substrings() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir, "kernel.db").await?;
        let cache = Arc::new(MemoryCache::new());
        let mutator = ObjectService::new(Arc::clone(&store), cache.clone());
        let reader = ObjectReader::new(store, cache);
        let tenant = Uuid::new_v4();

        mutator
            .create(tenant, &actor(), cand("C-1", "Ada Lovelace", json!({})))
            .await?;
        mutator
            .create(tenant, &actor(), cand("C-2", "Grace Hopper", json!({})))
            .await?;

        let hits = reader
            .search_by_name(tenant, "CAND", "love", PageRequest::first())
            .await?;
        assert_eq!(hits.total, 1);
        assert_eq!(hits.items[0].name, "Ada Lovelace");
        Ok(())
    }

    #[tokio::test]
    async fn attribute_queries_match_string_number_and_bool() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir, "kernel.db").await?;
        let cache = Arc::new(MemoryCache::new());
        let mutator = ObjectService::new(Arc::clone(&store), cache.clone());
        let reader = ObjectReader::new(store, cache);
        let tenant = Uuid::new_v4();

        mutator
            .create(
                tenant,
                &actor(),
                cand("C-1", "A", json!({"city": "Oslo", "score": 7, "hired": true})),
            )
            .await?;
        mutator
            .create(
                tenant,
                &actor(),
                cand("C-2", "B", json!({"city": "Bergen", "score": 9, "hired": false})),
            )
            .await?;

        let by_string = reader
            .find_by_attribute(tenant, "CAND", "city", &json!("Oslo"), PageRequest::first())
            .await?;
        assert_eq!(by_string.total, 1);
        assert_eq!(by_string.items[0].code, "C-1");

        let by_number = reader
            .find_by_attribute(tenant, "CAND", "score", &json!(9), PageRequest::first())
            .await?;
        assert_eq!(by_number.total, 1);
        assert_eq!(by_number.items[0].code, "C-2");

        let by_bool = reader
            .find_by_attribute(tenant, "CAND", "hired", &json!(true), PageRequest::first())
            .await?;
        assert_eq!(by_bool.total, 1);
        assert_eq!(by_bool.items[0].code, "C-1");

        // Exact match only
        let none = reader
            .find_by_attribute(tenant, "CAND", "city", &json!("Os"), PageRequest::first())
            .await?;
        assert_eq!(none.total, 0);
        Ok(())
    }

    #[tokio::test]
    async fn attribute_queries_reject_malformed_input() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir, "kernel.db").await?;
        let cache = Arc::new(MemoryCache::new());
        let reader = ObjectReader::new(store, cache);
        let tenant = Uuid::new_v4();

        let err = reader
            .find_by_attribute(tenant, "CAND", "a\"b", &json!(1), PageRequest::first())
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument(_)));

        let err = reader
            .find_by_attribute(tenant, "CAND", "city", &json!({"x": 1}), PageRequest::first())
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument(_)));
        Ok(())
    }

    #[tokio::test]
    async fn update_refreshes_what_readers_see_through_the_cache() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir, "kernel.db").await?;
        let cache = Arc::new(MemoryCache::new());
        let mutator = ObjectService::new(Arc::clone(&store), cache.clone());
        let reader = ObjectReader::new(Arc::clone(&store), cache);
        let tenant = Uuid::new_v4();

        let created = mutator
            .create(tenant, &actor(), cand("C-1", "Fresh", json!({"n": 1})))
            .await?;
        reader.get(tenant, created.id).await?;

        mutator
            .update(
                tenant,
                &actor(),
                created.id,
                UpdateObject {
                    data: Some(json!({"n": 2})),
                    ..Default::default()
                },
            )
            .await?;

        // Read-your-writes: the post-commit refresh means no stale value
        let fetched = reader.get(tenant, created.id).await?;
        assert_eq!(fetched.data, json!({"n": 2}));
        assert_eq!(fetched.version, 2);
        Ok(())
    }
}
