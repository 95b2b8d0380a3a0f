//! Message Bus Client
//!
//! The dispatcher is the only caller: it drains outbox rows and hands each
//! one to a [`BusClient`] as a `(topic, key, payload)` triple. The client
//! answers with the broker coordinates (partition, offset) or a failure the
//! dispatcher records on the row.
//!
//! The failure taxonomy at this layer is deliberately small - `Transient` vs
//! `Permanent` - because the broker handles most semantic failures itself,
//! and both kinds remain retryable up to the row's retry budget.
//!
//! [`LoopbackBus`] is an in-process broker stand-in with per-partition
//! offsets and failure injection, used by tests and local runs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Partition count for object topics
pub const OBJECT_TOPIC_PARTITIONS: i64 = 10;

/// Partition count for relationship topics
pub const RELATIONSHIP_TOPIC_PARTITIONS: i64 = 5;

/// Broker coordinates of a successfully published record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    pub partition: i64,
    pub offset: i64,
}

#[derive(Error, Debug)]
pub enum BusError {
    /// Broker temporarily unreachable; worth retrying soon
    #[error("Transient bus failure: {0}")]
    Transient(String),

    /// Broker rejected the record; still retryable up to the retry budget
    #[error("Permanent bus failure: {0}")]
    Permanent(String),
}

/// Publishes one record and reports where it landed.
///
/// Keying by aggregate id routes one aggregate's stream to one partition,
/// which is what preserves per-object event order on the broker side.
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &Value,
    ) -> Result<PublishAck, BusError>;
}

/// One record as the loopback broker stored it
#[derive(Debug, Clone)]
pub struct BusRecord {
    pub topic: String,
    pub partition: i64,
    pub offset: i64,
    pub key: String,
    pub payload: Value,
}

struct LoopbackState {
    records: Vec<BusRecord>,
    /// (topic, partition) -> next offset
    offsets: HashMap<(String, i64), i64>,
}

/// In-process bus with deterministic key -> partition routing and
/// monotonically increasing per-partition offsets.
///
/// Failure injection: `set_down` simulates a full outage, `fail_next`
/// injects a fixed number of transient errors.
pub struct LoopbackBus {
    state: Mutex<LoopbackState>,
    down: AtomicBool,
    fail_remaining: AtomicUsize,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoopbackState {
                records: Vec::new(),
                offsets: HashMap::new(),
            }),
            down: AtomicBool::new(false),
            fail_remaining: AtomicUsize::new(0),
        }
    }

    /// Simulate a broker outage (every publish fails Transient) or recovery
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail the next `n` publishes with a transient error
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Everything published so far, in publish order
    pub fn records(&self) -> Vec<BusRecord> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).records.clone()
    }

    /// Records of one topic, in publish order
    pub fn records_for_topic(&self, topic: &str) -> Vec<BusRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.topic == topic)
            .collect()
    }

    fn partitions_for(topic: &str) -> i64 {
        if topic.contains(".relationship.") {
            RELATIONSHIP_TOPIC_PARTITIONS
        } else {
            OBJECT_TOPIC_PARTITIONS
        }
    }

    fn partition_for(topic: &str, key: &str) -> i64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % Self::partitions_for(topic) as u64) as i64
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusClient for LoopbackBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &Value,
    ) -> Result<PublishAck, BusError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BusError::Transient("broker unreachable".to_string()));
        }
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BusError::Transient("injected failure".to_string()));
        }

        let partition = Self::partition_for(topic, key);
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let offset_slot = state
            .offsets
            .entry((topic.to_string(), partition))
            .or_insert(0);
        let offset = *offset_slot;
        *offset_slot += 1;

        state.records.push(BusRecord {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.to_string(),
            payload: payload.clone(),
        });

        Ok(PublishAck { partition, offset })
    }
}

enum BreakerPhase {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Trip-out around the bus client.
///
/// After `threshold` consecutive failures the breaker opens; while open the
/// dispatcher fails rows fast with reason `breaker_open` instead of hammering
/// a dead broker. After `cooldown` one probe publish is let through; success
/// closes the breaker, failure re-opens it.
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<(BreakerPhase, u32)>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            state: Mutex::new((BreakerPhase::Closed, 0)),
        }
    }

    /// Whether a publish may be attempted right now
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match state.0 {
            BreakerPhase::Closed | BreakerPhase::HalfOpen => true,
            BreakerPhase::Open { since } => {
                if since.elapsed() >= self.cooldown {
                    state.0 = BreakerPhase::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *state = (BreakerPhase::Closed, 0);
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match state.0 {
            BreakerPhase::HalfOpen => {
                state.0 = BreakerPhase::Open {
                    since: Instant::now(),
                };
            }
            _ => {
                state.1 += 1;
                if state.1 >= self.threshold {
                    state.0 = BreakerPhase::Open {
                        since: Instant::now(),
                    };
                }
            }
        }
    }
}
