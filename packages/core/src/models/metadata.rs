//! Type-level metadata descriptor cache row
//!
//! Descriptors come from an external metadata authority and are cached in the
//! store to enrich create-time validation. A row is valid for use while it is
//! not marked stale and its TTL has not elapsed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default descriptor TTL
pub const DEFAULT_TTL_MINUTES: i64 = 60;

/// Cached descriptor for one object type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    pub id: Uuid,

    pub type_code: String,

    /// Opaque descriptor document from the authority; the kernel only reads
    /// `requiredAttributes` out of it
    pub descriptor: serde_json::Value,

    pub synced_at: DateTime<Utc>,

    pub stale: bool,

    pub ttl_minutes: i64,

    pub usage_count: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl MetadataEntry {
    /// Fresh entry as of now
    pub fn synced(type_code: impl Into<String>, descriptor: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            type_code: type_code.into(),
            descriptor,
            synced_at: Utc::now(),
            stale: false,
            ttl_minutes: DEFAULT_TTL_MINUTES,
            usage_count: 0,
            last_accessed_at: None,
        }
    }

    /// `!stale && now < synced_at + ttl_minutes`
    pub fn is_valid_for_use(&self, now: DateTime<Utc>) -> bool {
        !self.stale && now < self.synced_at + Duration::minutes(self.ttl_minutes)
    }

    /// Attribute names the descriptor requires to be present in object data
    pub fn required_attributes(&self) -> Vec<String> {
        self.descriptor
            .get("requiredAttributes")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validity_respects_stale_flag_and_ttl() {
        let mut entry = MetadataEntry::synced("CAND", json!({}));
        let now = Utc::now();
        assert!(entry.is_valid_for_use(now));

        entry.stale = true;
        assert!(!entry.is_valid_for_use(now));

        entry.stale = false;
        assert!(!entry.is_valid_for_use(now + Duration::minutes(entry.ttl_minutes + 1)));
    }

    #[test]
    fn required_attributes_reads_descriptor_list() {
        let entry = MetadataEntry::synced(
            "CAND",
            json!({"requiredAttributes": ["email", "score"], "other": 1}),
        );
        assert_eq!(entry.required_attributes(), vec!["email", "score"]);

        let bare = MetadataEntry::synced("CAND", json!({}));
        assert!(bare.required_attributes().is_empty());
    }
}
