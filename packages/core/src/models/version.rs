//! Object Version - immutable history row
//!
//! One `ObjectVersion` row is appended per mutation, inside the same
//! transaction as the live-row write. Rows are never updated or deleted, so
//! for an object at version V the history table holds exactly V rows with
//! version numbers 1..=V.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ActorContext;

/// Kind of mutation a version row records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
    Restore,
    StatusChange,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "CREATE",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
            ChangeType::Restore => "RESTORE",
            ChangeType::StatusChange => "STATUS_CHANGE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATE" => Some(ChangeType::Create),
            "UPDATE" => Some(ChangeType::Update),
            "DELETE" => Some(ChangeType::Delete),
            "RESTORE" => Some(ChangeType::Restore),
            "STATUS_CHANGE" => Some(ChangeType::StatusChange),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of one mutation.
///
/// Image conventions per change type:
///
/// | change type   | previous_data | current_data | diff |
/// |---------------|---------------|--------------|------|
/// | CREATE        | None          | Some         | None |
/// | UPDATE        | Some          | Some         | structural diff (None if identical) |
/// | DELETE        | Some          | None         | None |
/// | RESTORE       | Some          | Some         | None |
/// | STATUS_CHANGE | Some          | Some         | None (reason carries the transition) |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectVersion {
    pub id: Uuid,

    pub object_id: Uuid,

    /// Equals the object's `version` after the change
    pub version_number: i64,

    pub change_type: ChangeType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_data: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_data: Option<serde_json::Value>,

    /// Advisory top-level diff (see [`crate::diff`]); full images are also kept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<serde_json::Value>,

    pub changed_by: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_reason: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl ObjectVersion {
    /// Bare version row stamped from the actor; image fields are filled in by
    /// the versioner according to the change type.
    pub fn stamped(
        object_id: Uuid,
        version_number: i64,
        change_type: ChangeType,
        actor: &ActorContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            object_id,
            version_number,
            change_type,
            previous_data: None,
            current_data: None,
            diff: None,
            changed_by: actor.user.clone(),
            ip: actor.ip.clone(),
            user_agent: actor.user_agent.clone(),
            change_reason: None,
            created_at: Utc::now(),
        }
    }
}
