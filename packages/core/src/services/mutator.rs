//! Object Service - the mutation pipeline
//!
//! Every write goes through here: validate, build the post-image, build the
//! history row and the outbox event, then hand all three to the store as one
//! atomic unit. Only after the commit does the cache get touched, so a cached
//! value can be stale at most between commit and invalidate.
//!
//! # Concurrency
//!
//! Mutations are optimistic: the store's update is guarded by
//! `WHERE version = expected`, and a lost race surfaces as a version
//! conflict that this service retries (bounded) by re-reading the row and
//! rebuilding the unit. Committed version numbers on one object therefore
//! form `1, 2, 3, ...` with no gaps and no duplicates.
//!
//! # Cancellation
//!
//! Dropping a mutation future before the store commits rolls the transaction
//! back - commit is the final await of the unit. Dropping it after commit
//! can only skip the cache write, which the TTL bounds.

use crate::db::{DatabaseError, MutationUnit, ObjectStore, ObjectWrite};
use crate::models::{
    event_types, topic_for, ActorContext, EventEnvelope, ObjectRecord, ObjectStatus, OutboxEntry,
};
use crate::services::cache::ObjectCache;
use crate::services::error::KernelError;
use crate::services::metadata::MetadataService;
use crate::services::versioner::Versioner;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Attempts per mutation when the optimistic guard loses a race
const VERSION_CONFLICT_ATTEMPTS: u32 = 3;

/// Attempts per store call for transient transport failures
const TRANSIENT_ATTEMPTS: u32 = 3;

/// Aggregate type stamped on object outbox rows
const OBJECT_AGGREGATE: &str = "object";

/// Create payload
#[derive(Debug, Clone)]
pub struct CreateObject {
    pub type_code: String,
    pub code: String,
    pub name: String,
    pub data: Value,
    pub metadata: Option<Value>,
}

/// Sparse update payload; `None` fields keep their current value
#[derive(Debug, Clone, Default)]
pub struct UpdateObject {
    pub name: Option<String>,
    pub data: Option<Value>,
    pub reason: Option<String>,
}

/// The mutation pipeline
#[derive(Clone)]
pub struct ObjectService {
    store: Arc<dyn ObjectStore>,
    cache: Arc<dyn ObjectCache>,
    versioner: Versioner,
    metadata: Option<Arc<MetadataService>>,
}

impl ObjectService {
    pub fn new(store: Arc<dyn ObjectStore>, cache: Arc<dyn ObjectCache>) -> Self {
        Self {
            store,
            cache,
            versioner: Versioner::new(),
            metadata: None,
        }
    }

    /// Enrich create-time validation with descriptors from the metadata authority
    pub fn with_metadata(mut self, metadata: Arc<MetadataService>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Create an object at version 1.
    ///
    /// # Errors
    ///
    /// `Conflict` when a live row already holds `(tenant, type, code)`;
    /// `InvalidArgument` on presence-check failures.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        actor: &ActorContext,
        input: CreateObject,
    ) -> Result<ObjectRecord, KernelError> {
        let mut record = ObjectRecord::new(
            tenant_id,
            input.type_code,
            input.code,
            input.name,
            input.data,
            actor,
        );
        if let Some(metadata) = input.metadata {
            record.metadata = metadata;
        }
        record.validate()?;
        self.check_required_attributes(&record).await?;

        let version = self.versioner.for_create(&record, actor);
        let outbox = self.object_outbox(event_types::OBJECT_CREATED, &record);

        self.apply_unit(MutationUnit::new(
            ObjectWrite::Insert(record.clone()),
            version,
            outbox,
        ))
        .await
        .map_err(KernelError::from)?;

        tracing::info!(object_id = %record.id, type_code = %record.type_code, "Created object");
        self.cache_put(&record).await;
        Ok(record)
    }

    /// Update `name` and/or `data`, appending an UPDATE version with a diff.
    pub async fn update(
        &self,
        tenant_id: Uuid,
        actor: &ActorContext,
        id: Uuid,
        input: UpdateObject,
    ) -> Result<ObjectRecord, KernelError> {
        if input.name.is_none() && input.data.is_none() {
            return Err(KernelError::invalid_argument(
                "update requires at least one of name, data",
            ));
        }
        if let Some(data) = &input.data {
            if !data.is_object() {
                return Err(KernelError::invalid_argument(
                    "object data must be a JSON object",
                ));
            }
        }

        let mut attempt = 0;
        loop {
            let current = self
                .store
                .get_object(tenant_id, id)
                .await?
                .ok_or_else(|| KernelError::not_found("object", id))?;

            let mut updated = current.clone();
            if let Some(name) = input.name.clone() {
                updated.name = name;
            }
            if let Some(data) = input.data.clone() {
                updated.data = data;
            }
            updated.version = current.version + 1;
            updated.modified_at = Utc::now();
            updated.modified_by = actor.user.clone();

            let version = self.versioner.for_update(
                &current.data,
                &updated,
                actor,
                input.reason.clone(),
            );
            let outbox = self.object_outbox(event_types::OBJECT_UPDATED, &updated);
            let unit = MutationUnit::new(
                ObjectWrite::Update {
                    record: updated.clone(),
                    expected_version: current.version,
                },
                version,
                outbox,
            );

            match self.apply_unit(unit).await {
                Ok(()) => {
                    self.cache_refresh(&updated).await;
                    return Ok(updated);
                }
                Err(e) if Self::lost_race(&e) && attempt + 1 < VERSION_CONFLICT_ATTEMPTS => {
                    attempt += 1;
                    tracing::debug!(object_id = %id, attempt, "Version race, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Soft delete: the row stays, flagged deleted, its edges retired.
    pub async fn soft_delete(
        &self,
        tenant_id: Uuid,
        actor: &ActorContext,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<ObjectRecord, KernelError> {
        let mut attempt = 0;
        loop {
            let current = self
                .store
                .get_object(tenant_id, id)
                .await?
                .ok_or_else(|| KernelError::not_found("object", id))?;

            let now = Utc::now();
            let mut deleted = current.clone();
            deleted.deleted = true;
            deleted.deleted_at = Some(now);
            deleted.deleted_by = Some(actor.user.clone());
            deleted.status = ObjectStatus::Deleted;
            deleted.version = current.version + 1;
            deleted.modified_at = now;
            deleted.modified_by = actor.user.clone();

            let version =
                self.versioner
                    .for_delete(&current.data, &deleted, actor, reason.clone());
            let outbox = self.object_outbox(event_types::OBJECT_DELETED, &deleted);
            let unit = MutationUnit::new(
                ObjectWrite::Update {
                    record: deleted.clone(),
                    expected_version: current.version,
                },
                version,
                outbox,
            )
            .retiring_edges();

            match self.apply_unit(unit).await {
                Ok(()) => {
                    tracing::info!(object_id = %id, "Soft-deleted object");
                    self.cache_evict(&deleted).await;
                    return Ok(deleted);
                }
                Err(e) if Self::lost_race(&e) && attempt + 1 < VERSION_CONFLICT_ATTEMPTS => {
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Restore a soft-deleted object back to ACTIVE.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the row is not deleted; `Conflict` when another
    /// live row took the code in the meantime.
    pub async fn restore(
        &self,
        tenant_id: Uuid,
        actor: &ActorContext,
        id: Uuid,
    ) -> Result<ObjectRecord, KernelError> {
        let mut attempt = 0;
        loop {
            let current = self
                .store
                .get_object_any_state(tenant_id, id)
                .await?
                .ok_or_else(|| KernelError::not_found("object", id))?;

            if !current.deleted {
                return Err(KernelError::invalid_state(format!(
                    "object {} is not deleted",
                    id
                )));
            }

            let mut restored = current.clone();
            restored.deleted = false;
            restored.deleted_at = None;
            restored.deleted_by = None;
            restored.status = ObjectStatus::Active;
            restored.version = current.version + 1;
            restored.modified_at = Utc::now();
            restored.modified_by = actor.user.clone();

            let version = self.versioner.for_restore(&restored, actor);
            let outbox = self.object_outbox(event_types::OBJECT_RESTORED, &restored);
            let unit = MutationUnit::new(
                ObjectWrite::Update {
                    record: restored.clone(),
                    expected_version: current.version,
                },
                version,
                outbox,
            );

            match self.apply_unit(unit).await {
                Ok(()) => {
                    tracing::info!(object_id = %id, "Restored object");
                    self.cache_put(&restored).await;
                    return Ok(restored);
                }
                Err(e) if Self::lost_race(&e) && attempt + 1 < VERSION_CONFLICT_ATTEMPTS => {
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Move an object between ACTIVE, INACTIVE, and ARCHIVED.
    ///
    /// Deletion is not reachable here - that is `soft_delete`'s job.
    pub async fn change_status(
        &self,
        tenant_id: Uuid,
        actor: &ActorContext,
        id: Uuid,
        new_status: ObjectStatus,
        reason: Option<String>,
    ) -> Result<ObjectRecord, KernelError> {
        if new_status == ObjectStatus::Deleted {
            return Err(KernelError::invalid_argument(
                "use soft_delete to delete an object",
            ));
        }

        let mut attempt = 0;
        loop {
            let current = self
                .store
                .get_object(tenant_id, id)
                .await?
                .ok_or_else(|| KernelError::not_found("object", id))?;

            if current.status == new_status {
                return Err(KernelError::invalid_state(format!(
                    "object {} is already {}",
                    id, new_status
                )));
            }
            if !current.status.can_transition_to(new_status) {
                return Err(KernelError::invalid_state(format!(
                    "transition {} -> {} is not allowed",
                    current.status, new_status
                )));
            }

            let transition = match &reason {
                Some(reason) => format!("{} -> {}: {}", current.status, new_status, reason),
                None => format!("{} -> {}", current.status, new_status),
            };

            let mut updated = current.clone();
            updated.status = new_status;
            updated.version = current.version + 1;
            updated.modified_at = Utc::now();
            updated.modified_by = actor.user.clone();

            let version = self
                .versioner
                .for_status_change(&updated, transition, actor);
            let outbox = self.object_outbox(event_types::OBJECT_STATUS_CHANGED, &updated);
            let unit = MutationUnit::new(
                ObjectWrite::Update {
                    record: updated.clone(),
                    expected_version: current.version,
                },
                version,
                outbox,
            );

            match self.apply_unit(unit).await {
                Ok(()) => {
                    self.cache_refresh(&updated).await;
                    return Ok(updated);
                }
                Err(e) if Self::lost_race(&e) && attempt + 1 < VERSION_CONFLICT_ATTEMPTS => {
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn object_outbox(&self, event_type: &str, record: &ObjectRecord) -> OutboxEntry {
        let envelope = EventEnvelope::for_object(event_type, record);
        OutboxEntry::pending(
            record.id,
            OBJECT_AGGREGATE,
            event_type,
            topic_for(event_type),
            envelope.to_value(),
        )
    }

    /// Descriptor-backed presence checks, skipped when no valid descriptor
    /// is available (the cache row may be stale or the authority down)
    async fn check_required_attributes(
        &self,
        record: &ObjectRecord,
    ) -> Result<(), KernelError> {
        let Some(metadata) = &self.metadata else {
            return Ok(());
        };
        let Some(entry) = metadata.descriptor_for(&record.type_code).await else {
            return Ok(());
        };
        for attribute in entry.required_attributes() {
            if record.data.get(&attribute).is_none() {
                return Err(KernelError::invalid_argument(format!(
                    "data is missing required attribute '{}'",
                    attribute
                )));
            }
        }
        Ok(())
    }

    /// Store call with bounded retries for transient transport errors only;
    /// constraint violations and version conflicts pass straight through
    async fn apply_unit(&self, unit: MutationUnit) -> Result<(), DatabaseError> {
        let mut attempt = 0;
        loop {
            match self.store.apply_mutation(unit.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt + 1 < TRANSIENT_ATTEMPTS => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "Transient store failure, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn lost_race(e: &DatabaseError) -> bool {
        matches!(e, DatabaseError::VersionConflict { .. })
    }

    async fn cache_put(&self, record: &ObjectRecord) {
        if let Err(e) = self.cache.put(record).await {
            tracing::warn!(object_id = %record.id, error = %e, "Cache put failed, proceeding");
        }
    }

    /// Invalidate then repopulate, the post-commit discipline for updates
    async fn cache_refresh(&self, record: &ObjectRecord) {
        if let Err(e) = self.cache.invalidate(record.id).await {
            tracing::warn!(object_id = %record.id, error = %e, "Cache invalidate failed, proceeding");
        }
        self.cache_put(record).await;
    }

    /// Drop both keys without repopulating (soft delete)
    async fn cache_evict(&self, record: &ObjectRecord) {
        if let Err(e) = self.cache.invalidate(record.id).await {
            tracing::warn!(object_id = %record.id, error = %e, "Cache invalidate failed, proceeding");
        }
        if let Err(e) = self
            .cache
            .invalidate_by_code(record.tenant_id, &record.type_code, &record.code)
            .await
        {
            tracing::warn!(object_id = %record.id, error = %e, "Cache code invalidate failed, proceeding");
        }
    }
}
