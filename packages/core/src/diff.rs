//! Structural JSON diff
//!
//! Pure comparison of two JSON documents at top level, producing the
//! added / modified / removed sets recorded on UPDATE version rows.
//!
//! The diff is advisory: version rows also keep the full before and after
//! images, so the walk stays shallow on purpose - a changed nested document
//! shows up as one `modified` entry with deep-equal old/new values.
//!
//! Output maps are `BTreeMap`s so serialization order is deterministic
//! regardless of input field order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Old/new pair for one modified field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// Top-level structural difference between two documents
///
/// Empty sections are omitted from the serialized form, so a diff with only
/// a modified field serializes as `{"modified": {...}}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentDiff {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub added: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub modified: BTreeMap<String, FieldChange>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub removed: BTreeMap<String, Value>,
}

impl DocumentDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Serialize for storage in a version row
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Compare two documents at top level.
///
/// Returns `None` when nothing changed. Non-object inputs are treated as
/// empty documents, so diffing `null` against an object reports every field
/// as added.
///
/// Field values are compared with deep equality; ordering of object keys is
/// irrelevant to the comparison.
pub fn diff(old: &Value, new: &Value) -> Option<DocumentDiff> {
    let empty = serde_json::Map::new();
    let old_map = old.as_object().unwrap_or(&empty);
    let new_map = new.as_object().unwrap_or(&empty);

    let mut result = DocumentDiff::default();

    for (key, new_value) in new_map {
        match old_map.get(key) {
            None => {
                result.added.insert(key.clone(), new_value.clone());
            }
            Some(old_value) if old_value != new_value => {
                result.modified.insert(
                    key.clone(),
                    FieldChange {
                        old: old_value.clone(),
                        new: new_value.clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }

    for (key, old_value) in old_map {
        if !new_map.contains_key(key) {
            result.removed.insert(key.clone(), old_value.clone());
        }
    }

    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_documents_diff_to_none() {
        let doc = json!({"a": 1, "b": {"x": [1, 2]}});
        assert!(diff(&doc, &doc.clone()).is_none());
    }

    #[test]
    fn key_order_is_irrelevant_to_comparison() {
        let old = json!({"a": 1, "b": 2});
        let new = json!({"b": 2, "a": 1});
        assert!(diff(&old, &new).is_none());
    }

    #[test]
    fn reports_added_modified_removed() {
        let old = json!({"a": 1, "b": 2, "d": true});
        let new = json!({"a": 1, "b": 3, "c": 4});

        let d = diff(&old, &new).unwrap();
        assert_eq!(d.added.get("c"), Some(&json!(4)));
        assert_eq!(
            d.modified.get("b"),
            Some(&FieldChange {
                old: json!(2),
                new: json!(3)
            })
        );
        assert_eq!(d.removed.get("d"), Some(&json!(true)));
    }

    #[test]
    fn serialized_shape_omits_empty_sections() {
        let old = json!({"a": 1, "b": 2});
        let new = json!({"a": 1, "b": 3, "c": 4});

        let value = diff(&old, &new).unwrap().to_value();
        assert_eq!(
            value,
            json!({
                "modified": {"b": {"old": 2, "new": 3}},
                "added": {"c": 4}
            })
        );
        assert!(value.get("removed").is_none());
    }

    #[test]
    fn nested_change_is_one_modified_entry() {
        let old = json!({"profile": {"city": "Oslo"}});
        let new = json!({"profile": {"city": "Bergen"}});

        let d = diff(&old, &new).unwrap();
        assert_eq!(d.modified.len(), 1);
        assert_eq!(d.modified["profile"].old, json!({"city": "Oslo"}));
        assert_eq!(d.modified["profile"].new, json!({"city": "Bergen"}));
    }

    #[test]
    fn null_pre_image_reports_everything_added() {
        let new = json!({"a": 1});
        let d = diff(&Value::Null, &new).unwrap();
        assert_eq!(d.added.len(), 1);
        assert!(d.modified.is_empty() && d.removed.is_empty());
    }

    #[test]
    fn output_keys_are_sorted() {
        let old = json!({});
        let new = json!({"zebra": 1, "alpha": 2, "mid": 3});

        let d = diff(&old, &new).unwrap();
        let keys: Vec<&String> = d.added.keys().collect();
        assert_eq!(keys, ["alpha", "mid", "zebra"]);
    }
}
