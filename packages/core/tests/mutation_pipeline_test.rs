//! Mutation Pipeline Tests
//!
//! Exercises the atomic write path end to end: live row, version append, and
//! outbox entry commit together, version numbers stay gap-free under races,
//! and the soft-delete namespace carve-out behaves.

#[cfg(test)]
mod mutation_pipeline_tests {
    use anyhow::Result;
    use objectkernel_core::db::{DatabaseService, ObjectStore, TursoStore};
    use objectkernel_core::models::{
        ActorContext, ChangeType, ObjectStatus, OutboxStatus, PageRequest,
    };
    use objectkernel_core::services::{
        CreateObject, KernelError, MemoryCache, ObjectReader, ObjectService, UpdateObject,
    };
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn open_store(dir: &TempDir) -> Result<Arc<dyn ObjectStore>> {
        let db = DatabaseService::new(dir.path().join("kernel.db"), "kernel").await?;
        Ok(Arc::new(TursoStore::new(Arc::new(db))))
    }

    fn services(store: &Arc<dyn ObjectStore>) -> (ObjectService, ObjectReader) {
        let cache = Arc::new(MemoryCache::new());
        (
            ObjectService::new(Arc::clone(store), cache.clone()),
            ObjectReader::new(Arc::clone(store), cache),
        )
    }

    fn actor() -> ActorContext {
        ActorContext::new("user-1", Some("10.0.0.1".to_string()), Some("tests".to_string()))
    }

    fn candidate(code: &str, data: serde_json::Value) -> CreateObject {
        CreateObject {
            type_code: "CAND".to_string(),
            code: code.to_string(),
            name: format!("Candidate {}", code),
            data,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn create_then_get_returns_identical_data() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir).await?;
        let (mutator, reader) = services(&store);
        let tenant = Uuid::new_v4();

        let data = json!({"n": 1, "nested": {"a": [1, 2, 3]}});
        let created = mutator
            .create(tenant, &actor(), candidate("C-1", data.clone()))
            .await?;
        assert_eq!(created.version, 1);
        assert_eq!(created.status, ObjectStatus::Active);

        let fetched = reader.get(tenant, created.id).await?;
        assert_eq!(fetched.data, data);
        assert_eq!(fetched.code, "C-1");
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_code_conflicts_but_deleted_code_is_reusable() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir).await?;
        let (mutator, _) = services(&store);
        let tenant = Uuid::new_v4();

        let first = mutator
            .create(tenant, &actor(), candidate("C-1", json!({"n": 1})))
            .await?;

        let err = mutator
            .create(tenant, &actor(), candidate("C-1", json!({"n": 2})))
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::Conflict(_)));

        // Deleted rows leave the uniqueness namespace
        mutator
            .soft_delete(tenant, &actor(), first.id, None)
            .await?;
        let second = mutator
            .create(tenant, &actor(), candidate("C-1", json!({"n": 3})))
            .await?;
        assert_ne!(second.id, first.id);
        Ok(())
    }

    #[tokio::test]
    async fn every_mutation_appends_exactly_one_version_and_one_outbox_row() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir).await?;
        let (mutator, _) = services(&store);
        let tenant = Uuid::new_v4();

        let created = mutator
            .create(tenant, &actor(), candidate("C-1", json!({"a": 1})))
            .await?;
        let updated = mutator
            .update(
                tenant,
                &actor(),
                created.id,
                UpdateObject {
                    data: Some(json!({"a": 2})),
                    ..Default::default()
                },
            )
            .await?;
        let inactive = mutator
            .change_status(tenant, &actor(), created.id, ObjectStatus::Inactive, None)
            .await?;
        assert_eq!(updated.version, 2);
        assert_eq!(inactive.version, 3);

        // Gap-free version numbers 1..=V, one row each
        let versions = store.list_versions(created.id, PageRequest::new(0, 100)).await?;
        assert_eq!(versions.total, 3);
        let mut numbers: Vec<i64> = versions.items.iter().map(|v| v.version_number).collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2, 3]);

        // One outbox row per mutation, payload carrying the matching version
        let outbox = store.list_outbox_for_aggregate(created.id).await?;
        assert_eq!(outbox.len(), 3);
        let event_types: Vec<&str> = outbox.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            event_types,
            vec!["object.created", "object.updated", "object.status_changed"]
        );
        for (entry, expected_version) in outbox.iter().zip(1i64..) {
            assert_eq!(entry.status, OutboxStatus::Pending);
            assert_eq!(entry.payload["data"]["version"], json!(expected_version));
            assert_eq!(entry.payload["tenantId"], json!(tenant));
        }
        Ok(())
    }

    #[tokio::test]
    async fn repeating_an_update_yields_a_null_diff_version() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir).await?;
        let (mutator, _) = services(&store);
        let tenant = Uuid::new_v4();

        let created = mutator
            .create(tenant, &actor(), candidate("C-1", json!({"a": 1})))
            .await?;
        let update = UpdateObject {
            data: Some(json!({"a": 2})),
            ..Default::default()
        };
        mutator
            .update(tenant, &actor(), created.id, update.clone())
            .await?;
        let second = mutator.update(tenant, &actor(), created.id, update).await?;
        assert_eq!(second.version, 3);

        let v3 = store.get_version(created.id, 3).await?.unwrap();
        assert!(v3.diff.is_none());
        assert_eq!(v3.previous_data, v3.current_data);
        Ok(())
    }

    #[tokio::test]
    async fn soft_delete_then_restore_round_trips_data() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir).await?;
        let (mutator, reader) = services(&store);
        let tenant = Uuid::new_v4();

        let data = json!({"a": 1, "b": {"c": true}});
        let created = mutator
            .create(tenant, &actor(), candidate("C-1", data.clone()))
            .await?;

        mutator
            .soft_delete(tenant, &actor(), created.id, Some("obsolete".to_string()))
            .await?;
        let restored = mutator.restore(tenant, &actor(), created.id).await?;

        assert_eq!(restored.version, created.version + 2);
        assert_eq!(restored.data, data);
        assert_eq!(restored.status, ObjectStatus::Active);
        assert!(restored.deleted_at.is_none());

        let fetched = reader.get(tenant, created.id).await?;
        assert_eq!(fetched.data, data);

        let v2 = store.get_version(created.id, 2).await?.unwrap();
        assert_eq!(v2.change_type, ChangeType::Delete);
        assert!(v2.current_data.is_none());
        let v3 = store.get_version(created.id, 3).await?.unwrap();
        assert_eq!(v3.change_type, ChangeType::Restore);
        Ok(())
    }

    #[tokio::test]
    async fn deleted_rows_vanish_from_reads_but_keep_their_history() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir).await?;
        let (mutator, reader) = services(&store);
        let tenant = Uuid::new_v4();

        let first = mutator
            .create(tenant, &actor(), candidate("C-1", json!({"n": 1})))
            .await?;
        mutator.soft_delete(tenant, &actor(), first.id, None).await?;
        let second = mutator
            .create(tenant, &actor(), candidate("C-1", json!({"n": 2})))
            .await?;

        let listed = reader
            .list_by_type(tenant, "CAND", None, PageRequest::first())
            .await?;
        assert_eq!(listed.total, 1);
        assert_eq!(listed.items[0].id, second.id);

        let err = reader.get(tenant, first.id).await.unwrap_err();
        assert!(matches!(err, KernelError::NotFound { .. }));

        // History survives deletion: CREATE + DELETE for the first id,
        // CREATE for the second
        assert_eq!(
            store
                .list_versions(first.id, PageRequest::first())
                .await?
                .total,
            2
        );
        assert_eq!(
            store
                .list_versions(second.id, PageRequest::first())
                .await?
                .total,
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_updates_serialize_to_distinct_versions() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir).await?;
        let (mutator, _) = services(&store);
        let tenant = Uuid::new_v4();

        let created = mutator
            .create(tenant, &actor(), candidate("C-1", json!({"n": 0})))
            .await?;

        let m1 = mutator.clone();
        let m2 = mutator.clone();
        let id = created.id;
        let actor1 = actor();
        let actor2 = actor();
        let (a, b) = tokio::join!(
            m1.update(
                tenant,
                &actor1,
                id,
                UpdateObject {
                    data: Some(json!({"a": 1})),
                    ..Default::default()
                },
            ),
            m2.update(
                tenant,
                &actor2,
                id,
                UpdateObject {
                    data: Some(json!({"b": 2})),
                    ..Default::default()
                },
            ),
        );
        let a = a?;
        let b = b?;

        // Both commits landed: final version is v0 + 2, never v0 + 1
        let final_versions = [a.version, b.version];
        assert!(final_versions.contains(&2) && final_versions.contains(&3));

        let v2 = store.get_version(id, 2).await?.unwrap();
        let v3 = store.get_version(id, 3).await?.unwrap();
        assert_ne!(v2.current_data, v3.current_data);
        Ok(())
    }

    #[tokio::test]
    async fn cross_tenant_access_is_not_found() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir).await?;
        let (mutator, reader) = services(&store);
        let tenant = Uuid::new_v4();
        let other_tenant = Uuid::new_v4();

        let created = mutator
            .create(tenant, &actor(), candidate("C-1", json!({"n": 1})))
            .await?;

        let err = mutator
            .update(
                other_tenant,
                &actor(),
                created.id,
                UpdateObject {
                    name: Some("hijack".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::NotFound { .. }));

        // The cache holds the row under the owning tenant; a foreign tenant
        // still sees nothing
        let err = reader.get(other_tenant, created.id).await.unwrap_err();
        assert!(matches!(err, KernelError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn status_transitions_follow_the_state_machine() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir).await?;
        let (mutator, _) = services(&store);
        let tenant = Uuid::new_v4();

        let created = mutator
            .create(tenant, &actor(), candidate("C-1", json!({})))
            .await?;

        let inactive = mutator
            .change_status(tenant, &actor(), created.id, ObjectStatus::Inactive, None)
            .await?;
        assert_eq!(inactive.status, ObjectStatus::Inactive);

        let active = mutator
            .change_status(tenant, &actor(), created.id, ObjectStatus::Active, None)
            .await?;
        let archived = mutator
            .change_status(
                tenant,
                &actor(),
                created.id,
                ObjectStatus::Archived,
                Some("quarter closed".to_string()),
            )
            .await?;
        assert_eq!(active.version, 3);
        assert_eq!(archived.version, 4);

        // ARCHIVED is terminal for change_status
        let err = mutator
            .change_status(tenant, &actor(), created.id, ObjectStatus::Active, None)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidState(_)));

        // DELETED is never reachable through change_status
        let err = mutator
            .change_status(tenant, &actor(), created.id, ObjectStatus::Deleted, None)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument(_)));

        let v4 = store.get_version(created.id, 4).await?.unwrap();
        assert_eq!(v4.change_type, ChangeType::StatusChange);
        assert_eq!(
            v4.change_reason.as_deref(),
            Some("ACTIVE -> ARCHIVED: quarter closed")
        );
        Ok(())
    }

    #[tokio::test]
    async fn restore_of_a_live_row_is_invalid_state() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir).await?;
        let (mutator, _) = services(&store);
        let tenant = Uuid::new_v4();

        let created = mutator
            .create(tenant, &actor(), candidate("C-1", json!({})))
            .await?;
        let err = mutator
            .restore(tenant, &actor(), created.id)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidState(_)));
        Ok(())
    }

    #[tokio::test]
    async fn create_rejects_presence_check_failures() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir).await?;
        let (mutator, _) = services(&store);
        let tenant = Uuid::new_v4();

        let err = mutator
            .create(
                tenant,
                &actor(),
                CreateObject {
                    type_code: "CAND".to_string(),
                    code: "".to_string(),
                    name: "x".to_string(),
                    data: json!({}),
                    metadata: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument(_)));

        let err = mutator
            .create(
                tenant,
                &actor(),
                CreateObject {
                    type_code: "CAND".to_string(),
                    code: "C-1".to_string(),
                    name: "x".to_string(),
                    data: json!([1, 2]),
                    metadata: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument(_)));
        Ok(())
    }

    #[tokio::test]
    async fn version_rows_carry_the_actor_audit_trail() -> Result<()> {
        let dir = TempDir::new()?;
        let store = open_store(&dir).await?;
        let (mutator, _) = services(&store);
        let tenant = Uuid::new_v4();

        let created = mutator
            .create(tenant, &actor(), candidate("C-1", json!({})))
            .await?;

        let v1 = store.get_version(created.id, 1).await?.unwrap();
        assert_eq!(v1.changed_by, "user-1");
        assert_eq!(v1.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(v1.user_agent.as_deref(), Some("tests"));
        Ok(())
    }
}
