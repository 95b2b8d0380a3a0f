//! Versioner - builds the history row for each mutation
//!
//! Records what it is given and performs no business checks. The version
//! number always equals the object's post-mutation `version`; the image and
//! diff conventions per change type are documented on
//! [`crate::models::ObjectVersion`].

use crate::diff;
use crate::models::{ActorContext, ChangeType, ObjectRecord, ObjectVersion};
use serde_json::Value;

/// Stateless history-row factory
#[derive(Debug, Clone, Copy, Default)]
pub struct Versioner;

impl Versioner {
    pub fn new() -> Self {
        Self
    }

    /// CREATE row: no pre-image, no diff
    pub fn for_create(&self, record: &ObjectRecord, actor: &ActorContext) -> ObjectVersion {
        let mut version = ObjectVersion::stamped(record.id, record.version, ChangeType::Create, actor);
        version.current_data = Some(record.data.clone());
        version
    }

    /// UPDATE row: diff computed against the pre-image
    pub fn for_update(
        &self,
        previous_data: &Value,
        record: &ObjectRecord,
        actor: &ActorContext,
        reason: Option<String>,
    ) -> ObjectVersion {
        let mut version = ObjectVersion::stamped(record.id, record.version, ChangeType::Update, actor);
        version.previous_data = Some(previous_data.clone());
        version.current_data = Some(record.data.clone());
        version.diff = diff::diff(previous_data, &record.data).map(|d| d.to_value());
        version.change_reason = reason;
        version
    }

    /// DELETE row: pre-image kept, current image null
    pub fn for_delete(
        &self,
        previous_data: &Value,
        record: &ObjectRecord,
        actor: &ActorContext,
        reason: Option<String>,
    ) -> ObjectVersion {
        let mut version = ObjectVersion::stamped(record.id, record.version, ChangeType::Delete, actor);
        version.previous_data = Some(previous_data.clone());
        version.change_reason = reason;
        version
    }

    /// RESTORE row: both images captured
    pub fn for_restore(&self, record: &ObjectRecord, actor: &ActorContext) -> ObjectVersion {
        let mut version = ObjectVersion::stamped(record.id, record.version, ChangeType::Restore, actor);
        version.previous_data = Some(record.data.clone());
        version.current_data = Some(record.data.clone());
        version
    }

    /// STATUS_CHANGE row: data unchanged, the reason carries the transition
    pub fn for_status_change(
        &self,
        record: &ObjectRecord,
        transition: String,
        actor: &ActorContext,
    ) -> ObjectVersion {
        let mut version =
            ObjectVersion::stamped(record.id, record.version, ChangeType::StatusChange, actor);
        version.previous_data = Some(record.data.clone());
        version.current_data = Some(record.data.clone());
        version.change_reason = Some(transition);
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn record(data: Value, version: i64) -> ObjectRecord {
        let mut r = ObjectRecord::new(
            Uuid::new_v4(),
            "CAND".to_string(),
            "C-1".to_string(),
            "Candidate".to_string(),
            data,
            &ActorContext::user("t"),
        );
        r.version = version;
        r
    }

    #[test]
    fn create_row_has_no_pre_image() {
        let r = record(json!({"a": 1}), 1);
        let v = Versioner::new().for_create(&r, &ActorContext::user("t"));

        assert_eq!(v.version_number, 1);
        assert_eq!(v.change_type, ChangeType::Create);
        assert!(v.previous_data.is_none());
        assert_eq!(v.current_data, Some(json!({"a": 1})));
        assert!(v.diff.is_none());
    }

    #[test]
    fn update_row_records_the_structural_diff() {
        let r = record(json!({"a": 1, "b": 3, "c": 4}), 2);
        let v = Versioner::new().for_update(
            &json!({"a": 1, "b": 2}),
            &r,
            &ActorContext::user("t"),
            None,
        );

        assert_eq!(v.version_number, 2);
        assert_eq!(
            v.diff,
            Some(json!({
                "modified": {"b": {"old": 2, "new": 3}},
                "added": {"c": 4}
            }))
        );
    }

    #[test]
    fn identical_update_has_null_diff() {
        let r = record(json!({"a": 1}), 3);
        let v = Versioner::new().for_update(&json!({"a": 1}), &r, &ActorContext::user("t"), None);

        assert!(v.diff.is_none());
        assert_eq!(v.previous_data, v.current_data);
    }

    #[test]
    fn delete_row_nulls_the_current_image() {
        let r = record(json!({"a": 1}), 2);
        let v = Versioner::new().for_delete(
            &json!({"a": 1}),
            &r,
            &ActorContext::user("t"),
            Some("cleanup".to_string()),
        );

        assert_eq!(v.change_type, ChangeType::Delete);
        assert_eq!(v.previous_data, Some(json!({"a": 1})));
        assert!(v.current_data.is_none());
        assert_eq!(v.change_reason.as_deref(), Some("cleanup"));
    }

    #[test]
    fn status_change_row_keeps_data_and_carries_the_transition() {
        let r = record(json!({"a": 1}), 4);
        let v = Versioner::new().for_status_change(
            &r,
            "ACTIVE -> INACTIVE".to_string(),
            &ActorContext::user("t"),
        );

        assert_eq!(v.change_type, ChangeType::StatusChange);
        assert_eq!(v.previous_data, v.current_data);
        assert_eq!(v.change_reason.as_deref(), Some("ACTIVE -> INACTIVE"));
    }
}
