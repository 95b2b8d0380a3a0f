//! Event envelope published to the message bus
//!
//! The envelope is built at mutation time, serialized into the outbox row's
//! payload, and shipped verbatim by the dispatcher. Consumers key dedupe on
//! `eventId` plus the outbox idempotency key.
//!
//! Wire shape (§ camelCase):
//!
//! ```json
//! {
//!   "eventId": "<uuid>",
//!   "eventType": "object.created",
//!   "timestamp": "<rfc3339>",
//!   "source": "kernel",
//!   "tenantId": "<uuid>",
//!   "data": { "objectId": "...", "objectTypeCode": "...", ... }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ObjectRecord, ObjectRelationship};

/// Source tag stamped on every envelope
pub const EVENT_SOURCE: &str = "kernel";

/// Topic prefix for all kernel events
pub const TOPIC_PREFIX: &str = "platform.kernel";

/// Object lifecycle event types
pub mod event_types {
    pub const OBJECT_CREATED: &str = "object.created";
    pub const OBJECT_UPDATED: &str = "object.updated";
    pub const OBJECT_DELETED: &str = "object.deleted";
    pub const OBJECT_RESTORED: &str = "object.restored";
    pub const OBJECT_STATUS_CHANGED: &str = "object.status_changed";
    pub const RELATIONSHIP_CREATED: &str = "relationship.created";
    pub const RELATIONSHIP_DELETED: &str = "relationship.deleted";
}

/// Resolve the bus topic for an event type
///
/// `object.created` -> `platform.kernel.object.created`
pub fn topic_for(event_type: &str) -> String {
    format!("{}.{}", TOPIC_PREFIX, event_type)
}

/// Object payload section of the envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEventData {
    pub object_id: Uuid,
    pub object_type_code: String,
    pub object_code: String,
    pub status: String,
    pub version: i64,
    /// Full object document at the time of the change
    pub payload: serde_json::Value,
}

/// Relationship payload section of the envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipEventData {
    pub relationship_id: Uuid,
    pub source_object_id: Uuid,
    pub target_object_id: Uuid,
    pub relationship_type: String,
}

/// The published value: a UTF-8 JSON document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub tenant_id: Uuid,
    pub data: serde_json::Value,
}

impl EventEnvelope {
    /// Envelope for an object lifecycle event, captured from the post-change record
    pub fn for_object(event_type: &str, record: &ObjectRecord) -> Self {
        let data = ObjectEventData {
            object_id: record.id,
            object_type_code: record.type_code.clone(),
            object_code: record.code.clone(),
            status: record.status.as_str().to_string(),
            version: record.version,
            payload: record.data.clone(),
        };
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            source: EVENT_SOURCE.to_string(),
            tenant_id: record.tenant_id,
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Envelope for a relationship event
    pub fn for_relationship(
        event_type: &str,
        tenant_id: Uuid,
        relationship: &ObjectRelationship,
    ) -> Self {
        let data = RelationshipEventData {
            relationship_id: relationship.id,
            source_object_id: relationship.source_id,
            target_object_id: relationship.target_id,
            relationship_type: relationship.rel_type.clone(),
        };
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            source: EVENT_SOURCE.to_string(),
            tenant_id,
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Serialize into the outbox payload column
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActorContext;
    use serde_json::json;

    #[test]
    fn topic_resolution_prefixes_event_type() {
        assert_eq!(
            topic_for(event_types::OBJECT_CREATED),
            "platform.kernel.object.created"
        );
        assert_eq!(
            topic_for(event_types::RELATIONSHIP_DELETED),
            "platform.kernel.relationship.deleted"
        );
    }

    #[test]
    fn object_envelope_carries_camel_case_wire_shape() {
        let actor = ActorContext::user("t");
        let record = ObjectRecord::new(
            Uuid::new_v4(),
            "CAND".to_string(),
            "C-1".to_string(),
            "Candidate".to_string(),
            json!({"n": 1}),
            &actor,
        );

        let envelope = EventEnvelope::for_object(event_types::OBJECT_CREATED, &record);
        let value = envelope.to_value();

        assert_eq!(value["eventType"], "object.created");
        assert_eq!(value["source"], "kernel");
        assert_eq!(value["tenantId"], json!(record.tenant_id));
        assert_eq!(value["data"]["objectId"], json!(record.id));
        assert_eq!(value["data"]["objectTypeCode"], "CAND");
        assert_eq!(value["data"]["objectCode"], "C-1");
        assert_eq!(value["data"]["status"], "ACTIVE");
        assert_eq!(value["data"]["version"], 1);
        assert_eq!(value["data"]["payload"], json!({"n": 1}));
    }
}
