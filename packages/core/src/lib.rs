//! ObjectKernel Core
//!
//! This crate provides the core of a multi-tenant, schema-flexible object
//! store that records, versions, relates, and broadcasts changes to
//! arbitrary business entities keyed by `(tenant, type, code)`.
//!
//! # Architecture
//!
//! - **Schema-flexible documents**: all entity data lives in a JSON `data`
//!   field; the store enforces presence checks only
//! - **Linear history**: every mutation appends an immutable version row in
//!   the same transaction as the live-row write
//! - **Transactional outbox**: events are committed with the state change
//!   and drained to the message bus by background workers - nothing
//!   publishes directly
//! - **Look-aside cache**: advisory, invalidate-after-commit; the store is
//!   always the source of truth
//! - **libsql**: embedded SQLite-compatible persistence with JSON1 operators
//!
//! # Modules
//!
//! - [`models`] - data structures (ObjectRecord, ObjectVersion, OutboxEntry, ...)
//! - [`diff`] - structural JSON diff recorded on UPDATE versions
//! - [`db`] - persistence layer (migrations, ObjectStore trait, libsql backend)
//! - [`services`] - mutation pipeline, reader, dispatcher, and the [`services::Kernel`] composition
//! - [`config`] - runtime configuration struct

pub mod config;
pub mod db;
pub mod diff;
pub mod models;
pub mod services;

// Re-exports
pub use config::KernelConfig;
pub use db::{DatabaseError, DatabaseService, ObjectStore, TursoStore};
pub use models::{ActorContext, ObjectRecord, ObjectStatus, Page, PageRequest};
pub use services::{Kernel, KernelError, ObjectReader, ObjectService};

/// Install the process-wide tracing subscriber, honoring `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
