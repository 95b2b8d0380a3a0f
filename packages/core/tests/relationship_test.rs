//! Relationship Tests
//!
//! Edges between objects: creation with endpoint checks, natural-key
//! uniqueness among active edges, retirement with events, and the
//! soft-delete cascade.

#[cfg(test)]
mod relationship_tests {
    use anyhow::Result;
    use objectkernel_core::db::{DatabaseService, ObjectStore, TursoStore};
    use objectkernel_core::models::{ActorContext, Cardinality, OutboxStatus};
    use objectkernel_core::services::{
        CreateObject, KernelError, MemoryCache, ObjectService, RelateObjects, RelationshipService,
    };
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Setup {
        store: Arc<dyn ObjectStore>,
        mutator: ObjectService,
        relationships: RelationshipService,
    }

    async fn setup(dir: &TempDir) -> Result<Setup> {
        let db = DatabaseService::new(dir.path().join("kernel.db"), "kernel").await?;
        let store: Arc<dyn ObjectStore> = Arc::new(TursoStore::new(Arc::new(db)));
        let cache = Arc::new(MemoryCache::new());
        let mutator = ObjectService::new(Arc::clone(&store), cache);
        let relationships = RelationshipService::new(Arc::clone(&store));
        Ok(Setup {
            store,
            mutator,
            relationships,
        })
    }

    fn actor() -> ActorContext {
        ActorContext::user("graph-test")
    }

    async fn create_object(s: &Setup, tenant: Uuid, code: &str) -> Result<Uuid> {
        let record = s
            .mutator
            .create(
                tenant,
                &actor(),
                CreateObject {
                    type_code: "CAND".to_string(),
                    code: code.to_string(),
                    name: format!("Object {}", code),
                    data: json!({}),
                    metadata: None,
                },
            )
            .await?;
        Ok(record.id)
    }

    #[tokio::test]
    async fn relate_creates_the_edge_and_its_event_atomically() -> Result<()> {
        let dir = TempDir::new()?;
        let s = setup(&dir).await?;
        let tenant = Uuid::new_v4();
        let source = create_object(&s, tenant, "C-1").await?;
        let target = create_object(&s, tenant, "C-2").await?;

        let edge = s
            .relationships
            .relate(
                tenant,
                &actor(),
                RelateObjects {
                    cardinality: Cardinality::OneToOne,
                    bidirectional: true,
                    strength: 0.5,
                    ..RelateObjects::new(source, target, "refers_to")
                },
            )
            .await?;
        assert!(edge.active);
        assert_eq!(edge.cardinality, Cardinality::OneToOne);

        let events = s.store.list_outbox_for_aggregate(source).await?;
        let rel_event = events
            .iter()
            .find(|e| e.event_type == "relationship.created")
            .expect("relationship event missing");
        assert_eq!(rel_event.status, OutboxStatus::Pending);
        assert_eq!(rel_event.topic, "platform.kernel.relationship.created");
        assert_eq!(rel_event.payload["data"]["sourceObjectId"], json!(source));
        assert_eq!(rel_event.payload["data"]["targetObjectId"], json!(target));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_active_edges_conflict() -> Result<()> {
        let dir = TempDir::new()?;
        let s = setup(&dir).await?;
        let tenant = Uuid::new_v4();
        let source = create_object(&s, tenant, "C-1").await?;
        let target = create_object(&s, tenant, "C-2").await?;

        s.relationships
            .relate(
                tenant,
                &actor(),
                RelateObjects::new(source, target, "refers_to"),
            )
            .await?;
        let err = s
            .relationships
            .relate(
                tenant,
                &actor(),
                RelateObjects::new(source, target, "refers_to"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::Conflict(_)));

        // A different type between the same endpoints is a different edge
        s.relationships
            .relate(
                tenant,
                &actor(),
                RelateObjects::new(source, target, "mentors"),
            )
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn unrelate_retires_the_edge_and_allows_recreation() -> Result<()> {
        let dir = TempDir::new()?;
        let s = setup(&dir).await?;
        let tenant = Uuid::new_v4();
        let source = create_object(&s, tenant, "C-1").await?;
        let target = create_object(&s, tenant, "C-2").await?;

        s.relationships
            .relate(
                tenant,
                &actor(),
                RelateObjects::new(source, target, "refers_to"),
            )
            .await?;
        s.relationships
            .unrelate(tenant, &actor(), source, target, "refers_to")
            .await?;

        assert!(s
            .relationships
            .related_of(tenant, source)
            .await?
            .is_empty());
        let deleted_event = s
            .store
            .list_outbox_for_aggregate(source)
            .await?
            .into_iter()
            .find(|e| e.event_type == "relationship.deleted");
        assert!(deleted_event.is_some());

        // Retired edges leave the natural-key namespace
        s.relationships
            .relate(
                tenant,
                &actor(),
                RelateObjects::new(source, target, "refers_to"),
            )
            .await?;

        // But a second unrelate of the retired edge is NotFound
        s.relationships
            .unrelate(tenant, &actor(), source, target, "refers_to")
            .await?;
        let err = s
            .relationships
            .unrelate(tenant, &actor(), source, target, "refers_to")
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn endpoints_must_exist_in_the_tenant() -> Result<()> {
        let dir = TempDir::new()?;
        let s = setup(&dir).await?;
        let tenant = Uuid::new_v4();
        let source = create_object(&s, tenant, "C-1").await?;

        let err = s
            .relationships
            .relate(
                tenant,
                &actor(),
                RelateObjects::new(source, Uuid::new_v4(), "refers_to"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::NotFound { .. }));

        // Same ids under a foreign tenant are invisible
        let target = create_object(&s, tenant, "C-2").await?;
        let err = s
            .relationships
            .relate(
                Uuid::new_v4(),
                &actor(),
                RelateObjects::new(source, target, "refers_to"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn strength_outside_the_unit_interval_is_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let s = setup(&dir).await?;
        let tenant = Uuid::new_v4();
        let source = create_object(&s, tenant, "C-1").await?;
        let target = create_object(&s, tenant, "C-2").await?;

        let err = s
            .relationships
            .relate(
                tenant,
                &actor(),
                RelateObjects {
                    strength: 1.5,
                    ..RelateObjects::new(source, target, "refers_to")
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument(_)));
        Ok(())
    }

    #[tokio::test]
    async fn soft_deleting_an_endpoint_retires_its_edges() -> Result<()> {
        let dir = TempDir::new()?;
        let s = setup(&dir).await?;
        let tenant = Uuid::new_v4();
        let a = create_object(&s, tenant, "C-1").await?;
        let b = create_object(&s, tenant, "C-2").await?;
        let c = create_object(&s, tenant, "C-3").await?;

        s.relationships
            .relate(tenant, &actor(), RelateObjects::new(a, b, "refers_to"))
            .await?;
        s.relationships
            .relate(tenant, &actor(), RelateObjects::new(c, a, "mentors"))
            .await?;

        // Deleting A retires both the outgoing and the incoming edge
        s.mutator.soft_delete(tenant, &actor(), a, None).await?;

        assert!(s.relationships.related_of(tenant, a).await?.is_empty());
        assert!(s.relationships.referencing(tenant, a).await?.is_empty());
        assert!(s.relationships.related_of(tenant, c).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn navigation_is_one_hop_in_both_directions() -> Result<()> {
        let dir = TempDir::new()?;
        let s = setup(&dir).await?;
        let tenant = Uuid::new_v4();
        let a = create_object(&s, tenant, "C-1").await?;
        let b = create_object(&s, tenant, "C-2").await?;
        let c = create_object(&s, tenant, "C-3").await?;

        s.relationships
            .relate(
                tenant,
                &actor(),
                RelateObjects {
                    display_order: 2,
                    ..RelateObjects::new(a, b, "refers_to")
                },
            )
            .await?;
        s.relationships
            .relate(
                tenant,
                &actor(),
                RelateObjects {
                    display_order: 1,
                    ..RelateObjects::new(a, c, "refers_to")
                },
            )
            .await?;

        let outgoing = s.relationships.related_of(tenant, a).await?;
        assert_eq!(outgoing.len(), 2);
        // display_order drives the listing
        assert_eq!(outgoing[0].target_id, c);
        assert_eq!(outgoing[1].target_id, b);

        let incoming = s.relationships.referencing(tenant, b).await?;
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source_id, a);
        Ok(())
    }
}
