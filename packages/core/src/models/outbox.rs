//! Transactional Outbox Entry
//!
//! Outbox rows are written inside the same transaction as the state change
//! they describe, then drained asynchronously by the dispatcher. This is the
//! only path to the message bus - nothing in the kernel publishes directly.
//!
//! Status transitions: PENDING -> PUBLISHED, PENDING -> FAILED,
//! FAILED -> PUBLISHED, FAILED -> FAILED (with incremented retry count).
//! A row that reaches `retry_count >= max_retries` is a dead letter: it stays
//! FAILED in the same table and is never re-attempted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default cap on publish attempts
pub const DEFAULT_MAX_RETRIES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OutboxStatus::Pending),
            "PUBLISHED" => Some(OutboxStatus::Published),
            "FAILED" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

/// One durable event awaiting (or done with) publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: Uuid,

    /// The object (or relationship source) this event belongs to; doubles as
    /// the bus partition key so one partition sees the aggregate's stream
    pub aggregate_id: Uuid,

    pub aggregate_type: String,

    /// e.g. `object.created`, `relationship.deleted`
    pub event_type: String,

    /// Full event envelope, serialized once at mutation time
    pub payload: serde_json::Value,

    pub status: OutboxStatus,

    pub retry_count: i64,

    pub max_retries: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,

    pub topic: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,

    /// `aggregate_type:aggregate_id:event_type:created_at_millis` - stable
    /// across republish, consumers dedupe on it
    pub idempotency_key: String,

    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Pending entry for a freshly committed change
    pub fn pending(
        aggregate_id: Uuid,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        topic: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let aggregate_type = aggregate_type.into();
        let event_type = event_type.into();
        let created_at = Utc::now();
        let idempotency_key = idempotency_key(
            &aggregate_type,
            aggregate_id,
            &event_type,
            created_at,
        );
        Self {
            id: Uuid::new_v4(),
            aggregate_id,
            aggregate_type,
            event_type,
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            error_message: None,
            published_at: None,
            topic: topic.into(),
            partition: None,
            offset: None,
            next_retry_at: None,
            idempotency_key,
            created_at,
        }
    }

    /// Terminal FAILED state that the retry worker must skip
    pub fn is_dead_letter(&self) -> bool {
        self.status == OutboxStatus::Failed && self.retry_count >= self.max_retries
    }

    /// Whether the dispatcher may attempt this row at all
    pub fn is_publishable(&self) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Failed => self.retry_count < self.max_retries,
            OutboxStatus::Published => false,
        }
    }
}

/// Stable idempotency key for an outbox row
pub fn idempotency_key(
    aggregate_type: &str,
    aggregate_id: Uuid,
    event_type: &str,
    created_at: DateTime<Utc>,
) -> String {
    format!(
        "{}:{}:{}:{}",
        aggregate_type,
        aggregate_id,
        event_type,
        created_at.timestamp_millis()
    )
}

/// Exponential backoff: `2^attempt` minutes after `now`
///
/// `attempt` is the retry count *after* the failed attempt was recorded, so
/// the first failure schedules +2 minutes, the second +4, then +8, +16, +32.
pub fn backoff_after(now: DateTime<Utc>, attempt: i64) -> DateTime<Utc> {
    let exp = attempt.clamp(0, 30) as u32;
    now + chrono::Duration::minutes(2i64.saturating_pow(exp))
}
