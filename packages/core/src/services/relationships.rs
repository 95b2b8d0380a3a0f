//! Relationship Service - typed edges between objects
//!
//! Edges are created and retired through the same outbox discipline as
//! object mutations: the edge write and its `relationship.*` event commit in
//! one transaction. Navigation stays one hop - edges of an object, or edges
//! pointing at it.
//!
//! A `bidirectional` edge without an `inverse_type` never materializes a
//! second row; symmetry is a query-level concern (callers read
//! `referencing` for the reverse direction).

use crate::db::ObjectStore;
use crate::models::{
    event_types, topic_for, ActorContext, Cardinality, EventEnvelope, ObjectRelationship,
    OutboxEntry,
};
use crate::services::error::KernelError;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Aggregate type stamped on relationship outbox rows
const RELATIONSHIP_AGGREGATE: &str = "relationship";

/// Edge creation payload
#[derive(Debug, Clone)]
pub struct RelateObjects {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub rel_type: String,
    pub cardinality: Cardinality,
    pub bidirectional: bool,
    pub inverse_type: Option<String>,
    pub strength: f64,
    pub display_order: i64,
    pub metadata: Option<Value>,
}

impl RelateObjects {
    /// Minimal edge with defaults (strength 1.0, unidirectional)
    pub fn new(source_id: Uuid, target_id: Uuid, rel_type: impl Into<String>) -> Self {
        Self {
            source_id,
            target_id,
            rel_type: rel_type.into(),
            cardinality: Cardinality::OneToMany,
            bidirectional: false,
            inverse_type: None,
            strength: 1.0,
            display_order: 0,
            metadata: None,
        }
    }
}

#[derive(Clone)]
pub struct RelationshipService {
    store: Arc<dyn ObjectStore>,
}

impl RelationshipService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Create an edge between two live objects of the tenant.
    ///
    /// # Errors
    ///
    /// `NotFound` when either endpoint is absent, foreign, or deleted;
    /// `Conflict` when an active edge with the same natural key exists.
    pub async fn relate(
        &self,
        tenant_id: Uuid,
        actor: &ActorContext,
        input: RelateObjects,
    ) -> Result<ObjectRelationship, KernelError> {
        self.require_live(tenant_id, input.source_id).await?;
        self.require_live(tenant_id, input.target_id).await?;

        let mut relationship = ObjectRelationship::new(
            input.source_id,
            input.target_id,
            input.rel_type,
            input.cardinality,
            actor,
        );
        relationship.bidirectional = input.bidirectional;
        relationship.inverse_type = input.inverse_type;
        relationship.strength = input.strength;
        relationship.display_order = input.display_order;
        if let Some(metadata) = input.metadata {
            relationship.metadata = metadata;
        }
        relationship.validate()?;

        if self
            .store
            .get_relationship(
                relationship.source_id,
                relationship.target_id,
                &relationship.rel_type,
            )
            .await?
            .is_some()
        {
            return Err(KernelError::conflict(format!(
                "relationship {} -[{}]-> {} already exists",
                relationship.source_id, relationship.rel_type, relationship.target_id
            )));
        }

        let outbox = self.relationship_outbox(
            event_types::RELATIONSHIP_CREATED,
            tenant_id,
            &relationship,
        );
        self.store
            .apply_relationship(relationship.clone(), outbox)
            .await?;

        tracing::info!(
            source = %relationship.source_id,
            target = %relationship.target_id,
            rel_type = %relationship.rel_type,
            "Created relationship"
        );
        Ok(relationship)
    }

    /// Retire the active edge with this natural key.
    pub async fn unrelate(
        &self,
        tenant_id: Uuid,
        actor: &ActorContext,
        source_id: Uuid,
        target_id: Uuid,
        rel_type: &str,
    ) -> Result<(), KernelError> {
        // Edges carry no tenant of their own; ownership is checked through
        // the source endpoint (any state, so edges of a deleted object can
        // still be cleaned up explicitly)
        self.require_owned(tenant_id, source_id).await?;

        let relationship = self
            .store
            .get_relationship(source_id, target_id, rel_type)
            .await?
            .ok_or_else(|| {
                KernelError::not_found(
                    "relationship",
                    format!("{} -[{}]-> {}", source_id, rel_type, target_id),
                )
            })?;

        let outbox = self.relationship_outbox(
            event_types::RELATIONSHIP_DELETED,
            tenant_id,
            &relationship,
        );
        self.store
            .retire_relationship(source_id, target_id, rel_type, &actor.user, outbox)
            .await?;
        Ok(())
    }

    /// Active edges leaving an object (one hop)
    pub async fn related_of(
        &self,
        tenant_id: Uuid,
        source_id: Uuid,
    ) -> Result<Vec<ObjectRelationship>, KernelError> {
        self.require_owned(tenant_id, source_id).await?;
        Ok(self.store.list_relationships_from(source_id).await?)
    }

    /// Active edges pointing at an object (one hop, the symmetric view)
    pub async fn referencing(
        &self,
        tenant_id: Uuid,
        target_id: Uuid,
    ) -> Result<Vec<ObjectRelationship>, KernelError> {
        self.require_owned(tenant_id, target_id).await?;
        Ok(self.store.list_relationships_to(target_id).await?)
    }

    fn relationship_outbox(
        &self,
        event_type: &str,
        tenant_id: Uuid,
        relationship: &ObjectRelationship,
    ) -> OutboxEntry {
        let envelope = EventEnvelope::for_relationship(event_type, tenant_id, relationship);
        OutboxEntry::pending(
            relationship.source_id,
            RELATIONSHIP_AGGREGATE,
            event_type,
            topic_for(event_type),
            envelope.to_value(),
        )
    }

    async fn require_live(&self, tenant_id: Uuid, id: Uuid) -> Result<(), KernelError> {
        self.store
            .get_object(tenant_id, id)
            .await?
            .map(|_| ())
            .ok_or_else(|| KernelError::not_found("object", id))
    }

    async fn require_owned(&self, tenant_id: Uuid, id: Uuid) -> Result<(), KernelError> {
        self.store
            .get_object_any_state(tenant_id, id)
            .await?
            .map(|_| ())
            .ok_or_else(|| KernelError::not_found("object", id))
    }
}
