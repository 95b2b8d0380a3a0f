//! Data Models
//!
//! This module contains the core data structures used throughout ObjectKernel:
//!
//! - `ObjectRecord` - the live row for every business entity
//! - `ObjectVersion` - append-only history snapshot per mutation
//! - `ObjectRelationship` - directed, typed edge between objects
//! - `OutboxEntry` - durable event row drained by the dispatcher
//! - `EventEnvelope` - the JSON document published to the bus
//! - `MetadataEntry` - cached type descriptor from the metadata authority
//!
//! All entities use the schema-flexible approach with entity data stored in
//! the `data` JSON field of the universal objects table.

mod context;
mod event;
mod metadata;
mod object;
mod outbox;
mod page;
mod relationship;
mod version;

pub use context::ActorContext;
pub use event::{
    event_types, topic_for, EventEnvelope, ObjectEventData, RelationshipEventData, EVENT_SOURCE,
    TOPIC_PREFIX,
};
pub use metadata::{MetadataEntry, DEFAULT_TTL_MINUTES};
pub use object::{ObjectRecord, ObjectStatus, ValidationError};
pub use outbox::{
    backoff_after, idempotency_key, OutboxEntry, OutboxStatus, DEFAULT_MAX_RETRIES,
};
pub use page::{Page, PageRequest, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use relationship::{Cardinality, ObjectRelationship, RelationshipError};
pub use version::{ChangeType, ObjectVersion};
