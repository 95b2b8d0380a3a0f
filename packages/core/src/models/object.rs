//! Object Record - the live row of the store
//!
//! This module defines the core `ObjectRecord` struct for ObjectKernel's
//! schema-flexible object system.
//!
//! # Architecture
//!
//! - **Universal record**: a single struct represents every business entity type
//! - **Schema-flexible**: all entity-specific data lives in the `data` JSON field
//! - **Tenant-scoped**: every record carries its `tenant_id`; no query crosses tenants
//! - **Versioned**: the `version` counter increments by exactly 1 per mutation and
//!   is mirrored by an append-only history row (see [`crate::models::ObjectVersion`])
//!
//! # Examples
//!
//! ```rust
//! use objectkernel_core::models::{ActorContext, ObjectRecord};
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! let tenant = Uuid::new_v4();
//! let actor = ActorContext::user("u-1");
//! let record = ObjectRecord::new(
//!     tenant,
//!     "CAND".to_string(),
//!     "C-1".to_string(),
//!     "First candidate".to_string(),
//!     json!({"score": 7}),
//!     &actor,
//! );
//! assert_eq!(record.version, 1);
//! assert!(!record.deleted);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::ActorContext;

/// Validation errors for object payloads
///
/// Raised by presence checks only - the store is schema-flexible by design
/// and never enforces a document shape beyond these checks.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown object status: {0}")]
    UnknownStatus(String),

    #[error("Object data must be a JSON object, got {0}")]
    DataNotAnObject(String),

    #[error("Required attribute absent from data: {0}")]
    MissingAttribute(String),
}

/// Lifecycle status of an object
///
/// Transitions are enforced by the mutator:
/// ACTIVE <-> INACTIVE, ACTIVE -> ARCHIVED, any non-DELETED -> DELETED
/// (via soft delete), DELETED -> ACTIVE (via restore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectStatus {
    Active,
    Inactive,
    Archived,
    Deleted,
}

impl ObjectStatus {
    /// Canonical uppercase form stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectStatus::Active => "ACTIVE",
            ObjectStatus::Inactive => "INACTIVE",
            ObjectStatus::Archived => "ARCHIVED",
            ObjectStatus::Deleted => "DELETED",
        }
    }

    /// Parse the stored form back into a status
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "ACTIVE" => Ok(ObjectStatus::Active),
            "INACTIVE" => Ok(ObjectStatus::Inactive),
            "ARCHIVED" => Ok(ObjectStatus::Archived),
            "DELETED" => Ok(ObjectStatus::Deleted),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }

    /// Whether `change_status` may move an object from `self` to `next`
    ///
    /// Soft delete and restore have their own operations and are not
    /// reachable through `change_status`.
    pub fn can_transition_to(&self, next: ObjectStatus) -> bool {
        matches!(
            (self, next),
            (ObjectStatus::Active, ObjectStatus::Inactive)
                | (ObjectStatus::Inactive, ObjectStatus::Active)
                | (ObjectStatus::Active, ObjectStatus::Archived)
        )
    }
}

impl std::fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The live row for one business entity.
///
/// # Fields
///
/// - `id`: primary identifier (UUID v4)
/// - `tenant_id`: owning tenant; part of every lookup predicate
/// - `type_code`: short entity-type identifier (e.g. "CAND", "ORDER")
/// - `code`: human-readable identifier, unique per (tenant, type) among
///   non-deleted rows
/// - `data`: the JSON document; schema-flexible
/// - `status` / `version` / soft-delete triple / audit columns as recorded
///   by the mutation pipeline
/// - `metadata`: free-form JSON side channel (labels, source hints)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub type_code: String,

    pub code: String,

    pub name: String,

    /// Entity document (Pure JSON, top-level object)
    pub data: serde_json::Value,

    pub status: ObjectStatus,

    /// Monotonic mutation counter, starts at 1
    pub version: i64,

    pub deleted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,

    pub created_at: DateTime<Utc>,

    pub created_by: String,

    pub modified_at: DateTime<Utc>,

    pub modified_by: String,

    /// Free-form JSON side channel, defaults to `{}`
    pub metadata: serde_json::Value,
}

impl ObjectRecord {
    /// Create a fresh record at version 1 in status ACTIVE
    ///
    /// Timestamps and audit columns are stamped from `actor`; the caller is
    /// expected to validate the payload first (see [`ObjectRecord::validate`]).
    pub fn new(
        tenant_id: Uuid,
        type_code: String,
        code: String,
        name: String,
        data: serde_json::Value,
        actor: &ActorContext,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            type_code,
            code,
            name,
            data,
            status: ObjectStatus::Active,
            version: 1,
            deleted: false,
            deleted_at: None,
            deleted_by: None,
            created_at: now,
            created_by: actor.user.clone(),
            modified_at: now,
            modified_by: actor.user.clone(),
            metadata: serde_json::json!({}),
        }
    }

    /// Presence checks for a create payload
    ///
    /// # Errors
    ///
    /// - `MissingField` when `type_code`, `code`, or `name` is empty
    /// - `DataNotAnObject` when `data` is not a JSON object
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.type_code.trim().is_empty() {
            return Err(ValidationError::MissingField("type_code".to_string()));
        }
        if self.code.trim().is_empty() {
            return Err(ValidationError::MissingField("code".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }
        if !self.data.is_object() {
            return Err(ValidationError::DataNotAnObject(json_kind(&self.data)));
        }
        Ok(())
    }

    /// Whether the record is readable through the default read path
    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}

fn json_kind(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn actor() -> ActorContext {
        ActorContext::user("tester")
    }

    #[test]
    fn new_record_starts_at_version_one_active() {
        let record = ObjectRecord::new(
            Uuid::new_v4(),
            "CAND".to_string(),
            "C-1".to_string(),
            "Candidate".to_string(),
            json!({"n": 1}),
            &actor(),
        );

        assert_eq!(record.version, 1);
        assert_eq!(record.status, ObjectStatus::Active);
        assert!(!record.deleted);
        assert_eq!(record.created_by, "tester");
        assert_eq!(record.created_at, record.modified_at);
    }

    #[test]
    fn validate_rejects_blank_identifiers() {
        let mut record = ObjectRecord::new(
            Uuid::new_v4(),
            "CAND".to_string(),
            "C-1".to_string(),
            "Candidate".to_string(),
            json!({}),
            &actor(),
        );
        record.code = "  ".to_string();

        assert!(matches!(
            record.validate(),
            Err(ValidationError::MissingField(f)) if f == "code"
        ));
    }

    #[test]
    fn validate_rejects_non_object_data() {
        let mut record = ObjectRecord::new(
            Uuid::new_v4(),
            "CAND".to_string(),
            "C-1".to_string(),
            "Candidate".to_string(),
            json!({}),
            &actor(),
        );
        record.data = json!([1, 2, 3]);

        assert!(matches!(
            record.validate(),
            Err(ValidationError::DataNotAnObject(kind)) if kind == "array"
        ));
    }

    #[test]
    fn status_round_trips_and_guards_transitions() {
        for status in [
            ObjectStatus::Active,
            ObjectStatus::Inactive,
            ObjectStatus::Archived,
            ObjectStatus::Deleted,
        ] {
            assert_eq!(ObjectStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ObjectStatus::parse("PAUSED").is_err());

        assert!(ObjectStatus::Active.can_transition_to(ObjectStatus::Inactive));
        assert!(ObjectStatus::Inactive.can_transition_to(ObjectStatus::Active));
        assert!(ObjectStatus::Active.can_transition_to(ObjectStatus::Archived));
        assert!(!ObjectStatus::Archived.can_transition_to(ObjectStatus::Active));
        assert!(!ObjectStatus::Active.can_transition_to(ObjectStatus::Deleted));
    }
}
