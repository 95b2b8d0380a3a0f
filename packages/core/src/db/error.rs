//! Database Error Types
//!
//! This module defines error types for database operations, providing
//! clear error handling for connection, migration, and query failures as
//! well as the typed outcomes the mutation pipeline branches on
//! (duplicate code, version conflict, missing row).

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Database operation errors
///
/// Covers connection and migration failures plus the typed store outcomes.
/// The service layer maps these onto the public `KernelError` taxonomy.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to apply a startup migration
    #[error("Migration V{version} failed: {context}")]
    MigrationFailed { version: i64, context: String },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },

    /// Failed to decode a row column into the expected model field
    #[error("Failed to decode row column {column}: {context}")]
    RowDecode { column: String, context: String },

    /// Stored JSON could not be parsed
    #[error("Stored JSON is malformed: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// Row absent, or present under a different tenant
    #[error("Row not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// Unique (tenant, type, code) violated among non-deleted rows
    #[error("Duplicate code {code} for type {type_code}")]
    DuplicateCode { type_code: String, code: String },

    /// Unique (source, target, rel_type) violated among active edges
    #[error("Duplicate relationship {source_id} -[{rel_type}]-> {target_id}")]
    DuplicateRelationship {
        source_id: Uuid,
        target_id: Uuid,
        rel_type: String,
    },

    /// Optimistic version guard matched zero rows
    #[error("Version conflict on object {object_id}: expected version {expected}")]
    VersionConflict { object_id: Uuid, expected: i64 },

    /// Constraint violation other than the duplicate-code case
    #[error("Integrity violation: {0}")]
    Integrity(String),
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create a migration failed error
    pub fn migration_failed(version: i64, context: impl Into<String>) -> Self {
        Self::MigrationFailed {
            version,
            context: context.into(),
        }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    /// Create a row decode error
    pub fn row_decode(column: impl Into<String>, context: impl Into<String>) -> Self {
        Self::RowDecode {
            column: column.into(),
            context: context.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the error is the transient transport kind worth a bounded retry
    pub fn is_transient(&self) -> bool {
        match self {
            DatabaseError::LibsqlError(e) | DatabaseError::ConnectionFailed { source: e, .. } => {
                let text = e.to_string();
                text.contains("database is locked") || text.contains("busy")
            }
            DatabaseError::SqlExecutionError { context } => {
                context.contains("database is locked") || context.contains("busy")
            }
            _ => false,
        }
    }
}
