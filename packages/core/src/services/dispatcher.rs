//! Outbox Dispatcher - background drain to the message bus
//!
//! Two scheduled workers plus a sweeper, all on a configurable interval:
//!
//! - **Pending worker**: oldest PENDING rows, one unresolved row per
//!   aggregate, published with `key = aggregate_id`
//! - **Retry worker**: FAILED rows whose backoff has elapsed and whose retry
//!   budget is not exhausted
//! - **Sweeper**: removes PUBLISHED rows older than the retention window
//!
//! Workers are safe to run concurrently across process replicas: result
//! marking is guarded on the row still being PENDING/FAILED, so a row
//! another replica already resolved is skipped, and re-running a worker
//! never re-applies a mutation - it only re-publishes the persisted row.
//!
//! A failed publish increments the row's retry count and schedules the next
//! attempt at `now + 2^retry_count` minutes. A row that exhausts
//! `max_retries` stays FAILED as a dead letter in the same table.
//!
//! The circuit breaker fails rows fast (reason `breaker_open`) while the
//! broker is down, instead of spending the whole batch against it.

use crate::db::ObjectStore;
use crate::models::{backoff_after, OutboxEntry};
use crate::services::bus::{BusClient, CircuitBreaker};
use crate::services::error::KernelError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Reason recorded on rows failed while the breaker is open
pub const BREAKER_OPEN_REASON: &str = "breaker_open";

/// Dispatcher tuning knobs
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Worker wake-up interval
    pub interval: Duration,

    /// Max rows per worker pass
    pub batch_size: i64,

    /// How long PUBLISHED rows are kept before the sweeper removes them
    pub retention: chrono::Duration,

    /// Sweeper wake-up interval
    pub sweep_interval: Duration,

    /// Consecutive failures before the breaker opens
    pub breaker_threshold: u32,

    /// How long the breaker stays open before probing again
    pub breaker_cooldown: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 100,
            retention: chrono::Duration::days(7),
            sweep_interval: Duration::from_secs(3600),
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(30),
        }
    }
}

/// Outcome of one worker pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub published: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// The background outbox drain
pub struct OutboxDispatcher {
    store: Arc<dyn ObjectStore>,
    bus: Arc<dyn BusClient>,
    breaker: CircuitBreaker,
    config: DispatcherConfig,
}

/// Running dispatcher tasks; dropping the handle without `shutdown` leaves
/// the workers running until the runtime stops
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Stop all workers and wait for them to finish their current pass
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bus: Arc<dyn BusClient>,
        config: DispatcherConfig,
    ) -> Self {
        let breaker = CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown);
        Self {
            store,
            bus,
            breaker,
            config,
        }
    }

    /// Spawn the pending worker, retry worker, and sweeper on their intervals
    pub fn spawn(self: Arc<Self>) -> DispatcherHandle {
        let (shutdown, _) = watch::channel(false);

        let pending = {
            let dispatcher = Arc::clone(&self);
            let mut rx = shutdown.subscribe();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(dispatcher.config.interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = dispatcher.run_pending_once().await {
                                tracing::warn!(error = %e, "Pending worker pass failed");
                            }
                        }
                        _ = rx.changed() => break,
                    }
                }
            })
        };

        let retry = {
            let dispatcher = Arc::clone(&self);
            let mut rx = shutdown.subscribe();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(dispatcher.config.interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = dispatcher.run_retry_once().await {
                                tracing::warn!(error = %e, "Retry worker pass failed");
                            }
                        }
                        _ = rx.changed() => break,
                    }
                }
            })
        };

        let sweeper = {
            let dispatcher = Arc::clone(&self);
            let mut rx = shutdown.subscribe();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(dispatcher.config.sweep_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = dispatcher.sweep_once().await {
                                tracing::warn!(error = %e, "Outbox sweep failed");
                            }
                        }
                        _ = rx.changed() => break,
                    }
                }
            })
        };

        DispatcherHandle {
            shutdown,
            tasks: vec![pending, retry, sweeper],
        }
    }

    /// One pending-worker pass
    pub async fn run_pending_once(&self) -> Result<DispatchStats, KernelError> {
        let batch = self
            .store
            .fetch_pending_outbox(self.config.batch_size)
            .await?;
        self.publish_batch(batch).await
    }

    /// One retry-worker pass against the current clock
    pub async fn run_retry_once(&self) -> Result<DispatchStats, KernelError> {
        self.run_retry_once_at(Utc::now()).await
    }

    /// One retry-worker pass against an explicit clock (deterministic tests)
    pub async fn run_retry_once_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<DispatchStats, KernelError> {
        let batch = self
            .store
            .fetch_retry_outbox(self.config.batch_size, now)
            .await?;
        self.publish_batch(batch).await
    }

    /// Remove PUBLISHED rows older than the retention window
    pub async fn sweep_once(&self) -> Result<u64, KernelError> {
        let before = Utc::now() - self.config.retention;
        let removed = self.store.sweep_published_outbox(before).await?;
        if removed > 0 {
            tracing::info!(removed, "Swept published outbox rows");
        }
        Ok(removed)
    }

    async fn publish_batch(
        &self,
        batch: Vec<OutboxEntry>,
    ) -> Result<DispatchStats, KernelError> {
        let mut stats = DispatchStats::default();

        for entry in batch {
            // Replay guard: rows not in PENDING/FAILED are never re-published
            if !entry.is_publishable() {
                stats.skipped += 1;
                continue;
            }

            if !self.breaker.allow_request() {
                self.record_failure(&entry, BREAKER_OPEN_REASON).await?;
                stats.failed += 1;
                tracing::warn!(entry_id = %entry.id, "Bus breaker open, exiting pass early");
                break;
            }

            let key = entry.aggregate_id.to_string();
            match self.bus.publish(&entry.topic, &key, &entry.payload).await {
                Ok(ack) => {
                    self.breaker.record_success();
                    let claimed = self
                        .store
                        .mark_outbox_published(entry.id, ack.partition, ack.offset, Utc::now())
                        .await?;
                    if claimed {
                        stats.published += 1;
                        tracing::debug!(
                            entry_id = %entry.id,
                            topic = %entry.topic,
                            partition = ack.partition,
                            offset = ack.offset,
                            "Published outbox entry"
                        );
                    } else {
                        // Another replica resolved the row first
                        stats.skipped += 1;
                    }
                }
                Err(e) => {
                    self.breaker.record_failure();
                    self.record_failure(&entry, &e.to_string()).await?;
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }

    async fn record_failure(
        &self,
        entry: &OutboxEntry,
        error: &str,
    ) -> Result<(), KernelError> {
        let now = Utc::now();
        let attempt = entry.retry_count + 1;
        let next_retry_at = Some(backoff_after(now, attempt));

        let claimed = self
            .store
            .mark_outbox_failed(entry.id, error, next_retry_at)
            .await?;
        if claimed {
            if attempt >= entry.max_retries {
                tracing::error!(
                    entry_id = %entry.id,
                    event_type = %entry.event_type,
                    error,
                    "Outbox entry exhausted retries, dead-lettered"
                );
            } else {
                tracing::warn!(
                    entry_id = %entry.id,
                    attempt,
                    error,
                    "Publish failed, retry scheduled"
                );
            }
        }
        Ok(())
    }
}
