//! Database Layer
//!
//! This module handles all persistence for the kernel over libsql:
//!
//! - [`DatabaseService`] - connection management, table prefixing, and the
//!   numbered V1..V6 startup migrations
//! - [`ObjectStore`] - the persistence trait the services program against
//! - [`TursoStore`] - the libsql implementation, including the atomic
//!   mutation unit (object row + version row + outbox row in one transaction)

mod database;
mod error;
mod store;
mod turso_store;

pub use database::{DatabaseService, DEFAULT_TABLE_PREFIX};
pub use error::DatabaseError;
pub use store::{MutationUnit, ObjectStore, ObjectWrite, OutboxStats};
pub use turso_store::TursoStore;
