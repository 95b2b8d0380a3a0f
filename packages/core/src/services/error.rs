//! Service Layer Error Types
//!
//! The closed error variant set every public kernel operation returns.
//! Handlers map these onto HTTP codes; nothing else ever crosses the
//! service boundary.
//!
//! Mapping policy: store errors surface; cache errors are logged at warn and
//! swallowed inside the services; bus errors never appear here at all - the
//! outbox absorbs them and the dispatcher records them on the row.

use crate::db::DatabaseError;
use crate::models::{RelationshipError, ValidationError};
use thiserror::Error;

/// Kernel operation errors
#[derive(Error, Debug)]
pub enum KernelError {
    /// Row absent, cross-tenant, or deleted when a live row was expected
    #[error("Not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// Unique constraint collision (duplicate code, duplicate edge) or a
    /// concurrent modification that exhausted its retries
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing required field, malformed document, unknown status
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation inapplicable to the object's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Store dependency failure, surfaced to the caller
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Unexpected constraint violation or corrupt row - internal error
    #[error("Integrity violation: {0}")]
    Integrity(String),
}

impl KernelError {
    /// Create a not found error
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

impl From<DatabaseError> for KernelError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity, id } => KernelError::NotFound { entity, id },
            DatabaseError::DuplicateCode { type_code, code } => KernelError::Conflict(format!(
                "code '{}' already exists for type '{}'",
                code, type_code
            )),
            DatabaseError::DuplicateRelationship {
                source_id,
                target_id,
                rel_type,
            } => KernelError::Conflict(format!(
                "relationship {} -[{}]-> {} already exists",
                source_id, rel_type, target_id
            )),
            DatabaseError::VersionConflict { object_id, .. } => KernelError::Conflict(format!(
                "object {} was modified concurrently",
                object_id
            )),
            DatabaseError::ConnectionFailed { .. }
            | DatabaseError::LibsqlError(_)
            | DatabaseError::SqlExecutionError { .. }
            | DatabaseError::DirectoryCreationFailed(_) => {
                KernelError::StoreUnavailable(e.to_string())
            }
            DatabaseError::MigrationFailed { .. }
            | DatabaseError::RowDecode { .. }
            | DatabaseError::MalformedJson(_)
            | DatabaseError::Integrity(_) => KernelError::Integrity(e.to_string()),
        }
    }
}

impl From<ValidationError> for KernelError {
    fn from(e: ValidationError) -> Self {
        KernelError::InvalidArgument(e.to_string())
    }
}

impl From<RelationshipError> for KernelError {
    fn from(e: RelationshipError) -> Self {
        KernelError::InvalidArgument(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn database_errors_map_to_the_public_taxonomy() {
        let e: KernelError = DatabaseError::not_found("object", "x").into();
        assert!(matches!(e, KernelError::NotFound { .. }));

        let e: KernelError = DatabaseError::DuplicateCode {
            type_code: "CAND".to_string(),
            code: "C-1".to_string(),
        }
        .into();
        assert!(matches!(e, KernelError::Conflict(_)));

        let e: KernelError = DatabaseError::VersionConflict {
            object_id: Uuid::new_v4(),
            expected: 3,
        }
        .into();
        assert!(matches!(e, KernelError::Conflict(_)));

        let e: KernelError = DatabaseError::sql_execution("boom").into();
        assert!(matches!(e, KernelError::StoreUnavailable(_)));

        let e: KernelError = DatabaseError::Integrity("bad".to_string()).into();
        assert!(matches!(e, KernelError::Integrity(_)));
    }
}
