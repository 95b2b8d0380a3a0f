//! ObjectStore Trait - Database Abstraction Layer
//!
//! This module defines the `ObjectStore` trait that abstracts persistence for
//! the kernel. The trait sits between the services (mutator, reader,
//! dispatcher) and the database implementation, so backends can be swapped
//! without touching business logic.
//!
//! # Architecture
//!
//! - **Async-first**: every method is async; implementations must be
//!   `Send + Sync` because futures move between runtime threads
//! - **Tenant scoping**: every object read takes the tenant id and filters on
//!   it; a cross-tenant id behaves exactly like an absent row
//! - **Atomic mutation unit**: [`ObjectStore::apply_mutation`] commits the
//!   live-row write, the version append, and the outbox insert in one
//!   transaction, or none of them
//! - **Typed outcomes**: duplicate codes and version conflicts surface as
//!   dedicated [`DatabaseError`] variants so the mutator can branch on them

use crate::db::error::DatabaseError;
use crate::models::{
    MetadataEntry, ObjectRecord, ObjectRelationship, ObjectStatus, ObjectVersion, OutboxEntry,
    Page, PageRequest,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// The live-row half of a mutation unit
#[derive(Debug, Clone)]
pub enum ObjectWrite {
    /// Insert a brand-new row at version 1
    Insert(ObjectRecord),

    /// Overwrite an existing row, guarded by `WHERE version = expected_version`.
    /// Zero rows affected aborts the unit with a version conflict.
    Update {
        record: ObjectRecord,
        expected_version: i64,
    },
}

/// Everything one committed mutation writes, applied atomically.
#[derive(Debug, Clone)]
pub struct MutationUnit {
    pub write: ObjectWrite,
    pub version: ObjectVersion,
    pub outbox: OutboxEntry,

    /// Deactivate the mutated object's relationships in the same transaction
    /// (set on soft delete so edges never outlive a live endpoint)
    pub retire_edges: bool,
}

impl MutationUnit {
    pub fn new(write: ObjectWrite, version: ObjectVersion, outbox: OutboxEntry) -> Self {
        Self {
            write,
            version,
            outbox,
            retire_edges: false,
        }
    }

    pub fn retiring_edges(mut self) -> Self {
        self.retire_edges = true;
        self
    }
}

/// Aggregate counts over the outbox table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub pending: u64,
    pub published: u64,
    pub failed: u64,
    /// FAILED rows that exhausted their retries
    pub dead_letter: u64,
}

/// Abstraction layer for kernel persistence.
///
/// Implementations must guarantee that `apply_mutation` and
/// `apply_relationship` are atomic, and that all object reads are
/// tenant-scoped. See [`crate::db::TursoStore`] for the libsql backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    //
    // OBJECT READS
    //

    /// Fetch a live (non-deleted) object by id within a tenant
    async fn get_object(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<ObjectRecord>, DatabaseError>;

    /// Fetch an object regardless of deletion state (history, restore)
    async fn get_object_any_state(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<ObjectRecord>, DatabaseError>;

    /// Fetch a live object by its `(type_code, code)` business key
    async fn get_object_by_code(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        code: &str,
    ) -> Result<Option<ObjectRecord>, DatabaseError>;

    /// Page live objects of a type, optionally narrowed to one status,
    /// ordered by `created_at` descending
    async fn list_by_type(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        status: Option<ObjectStatus>,
        page: PageRequest,
    ) -> Result<Page<ObjectRecord>, DatabaseError>;

    /// Case-insensitive substring search over `name`
    async fn search_by_name(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        term: &str,
        page: PageRequest,
    ) -> Result<Page<ObjectRecord>, DatabaseError>;

    /// Match objects whose document contains `{key: value}` at top level.
    /// Equality is exact for strings, numbers, and booleans.
    async fn query_by_attribute(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        key: &str,
        value: &Value,
        page: PageRequest,
    ) -> Result<Page<ObjectRecord>, DatabaseError>;

    /// Fetch live objects for a set of ids; unknown ids are skipped
    async fn bulk_get(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<ObjectRecord>, DatabaseError>;

    /// Count live objects of a type
    async fn count_by_type(&self, tenant_id: Uuid, type_code: &str)
        -> Result<u64, DatabaseError>;

    /// Count live objects of a type in one status
    async fn count_by_status(
        &self,
        tenant_id: Uuid,
        type_code: &str,
        status: ObjectStatus,
    ) -> Result<u64, DatabaseError>;

    //
    // MUTATION
    //

    /// Apply one mutation unit atomically.
    ///
    /// # Errors
    ///
    /// - `DuplicateCode` when an insert collides on the live business key
    /// - `VersionConflict` when the optimistic guard matches zero rows
    async fn apply_mutation(&self, unit: MutationUnit) -> Result<(), DatabaseError>;

    //
    // VERSION HISTORY
    //

    /// Page version rows, newest first
    async fn list_versions(
        &self,
        object_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<ObjectVersion>, DatabaseError>;

    /// Fetch one version row by number
    async fn get_version(
        &self,
        object_id: Uuid,
        version_number: i64,
    ) -> Result<Option<ObjectVersion>, DatabaseError>;

    /// Time-travel: the version row with the greatest `created_at <= at`
    async fn find_version_at(
        &self,
        object_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<ObjectVersion>, DatabaseError>;

    //
    // RELATIONSHIPS
    //

    /// Insert an edge and its outbox event in one transaction
    async fn apply_relationship(
        &self,
        relationship: ObjectRelationship,
        outbox: OutboxEntry,
    ) -> Result<(), DatabaseError>;

    /// Deactivate an edge and record its outbox event in one transaction.
    /// Returns `NotFound` when no active edge matches.
    async fn retire_relationship(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        rel_type: &str,
        modified_by: &str,
        outbox: OutboxEntry,
    ) -> Result<(), DatabaseError>;

    /// Fetch the active edge with this natural key
    async fn get_relationship(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        rel_type: &str,
    ) -> Result<Option<ObjectRelationship>, DatabaseError>;

    /// Active edges leaving `source_id`, ordered by `display_order`
    async fn list_relationships_from(
        &self,
        source_id: Uuid,
    ) -> Result<Vec<ObjectRelationship>, DatabaseError>;

    /// Active edges arriving at `target_id`, ordered by `display_order`
    async fn list_relationships_to(
        &self,
        target_id: Uuid,
    ) -> Result<Vec<ObjectRelationship>, DatabaseError>;

    //
    // OUTBOX
    //

    /// Oldest PENDING rows, at most one unresolved row per aggregate so the
    /// per-aggregate stream keeps creation order
    async fn fetch_pending_outbox(&self, limit: i64)
        -> Result<Vec<OutboxEntry>, DatabaseError>;

    /// FAILED rows due for retry (`retry_count < max_retries` and
    /// `next_retry_at <= now` or unset), same per-aggregate rule
    async fn fetch_retry_outbox(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, DatabaseError>;

    /// Mark a row PUBLISHED with its broker coordinates. Guarded on the row
    /// still being PENDING/FAILED; returns false when another worker already
    /// resolved it.
    async fn mark_outbox_published(
        &self,
        id: Uuid,
        partition: i64,
        offset: i64,
        published_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Mark a row FAILED, incrementing `retry_count` and recording the error
    /// and the next retry time. Same guard semantics as publishing.
    async fn mark_outbox_failed(
        &self,
        id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError>;

    /// Delete PUBLISHED rows older than `before`; returns rows removed
    async fn sweep_published_outbox(&self, before: DateTime<Utc>)
        -> Result<u64, DatabaseError>;

    /// Aggregate status counts for observability
    async fn outbox_stats(&self) -> Result<OutboxStats, DatabaseError>;

    /// Fetch one outbox row by id
    async fn get_outbox_entry(&self, id: Uuid) -> Result<Option<OutboxEntry>, DatabaseError>;

    /// All outbox rows of one aggregate in creation order
    async fn list_outbox_for_aggregate(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Vec<OutboxEntry>, DatabaseError>;

    //
    // METADATA CACHE
    //

    /// Fetch the cached descriptor row for a type
    async fn get_metadata(&self, type_code: &str)
        -> Result<Option<MetadataEntry>, DatabaseError>;

    /// Insert or replace the descriptor row for a type
    async fn upsert_metadata(&self, entry: MetadataEntry) -> Result<(), DatabaseError>;

    /// Record one descriptor use (`usage_count`, `last_accessed_at`)
    async fn touch_metadata(
        &self,
        type_code: &str,
        accessed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Flag a descriptor row as stale so the next read re-syncs
    async fn mark_metadata_stale(&self, type_code: &str) -> Result<(), DatabaseError>;
}
