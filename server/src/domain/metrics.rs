//! Cluster-wide counters
//!
//! Per-worker counters are buffered in process and flushed every ~500 ms to
//! shared counters in the queue store as atomic hash increments, so the
//! hot path never waits on the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::METRICS_FLUSH_INTERVAL_MS;
use crate::data::queue::QueueService;

/// Well-known counter keys
pub mod keys {
    pub const EVENTS_COMMIT: &str = "events:commit";
    pub const EVENTS_IDENTITY: &str = "events:identity";
    pub const EVENTS_ACCOUNT: &str = "events:account";
    pub const PUSH_ERRORS: &str = "events:push_error";
    pub const PROCESS_OK: &str = "process:ok";
    pub const PROCESS_ERRORS: &str = "process:error";
    pub const VALIDATION_INVALID: &str = "validation:invalid";
    pub const VALIDATION_UNKNOWN: &str = "validation:unknown";
    pub const PENDING_BUFFERED: &str = "pending:buffered";
    pub const PENDING_FLUSHED: &str = "pending:flushed";
    pub const PENDING_DROPPED: &str = "pending:dropped";
    pub const PENDING_EXPIRED: &str = "pending:expired";
    pub const NOTIFICATIONS: &str = "notifications:created";
    pub const DEAD_LETTERED: &str = "queue:dead_lettered";
    pub const GATE_VIOLATIONS: &str = "thread:gate_violations";
    pub const FIREHOSE_RECONNECTS: &str = "firehose:reconnects";
}

/// Buffered counter registry shared across tasks in one worker
pub struct Metrics {
    queue: Arc<QueueService>,
    buffer: DashMap<String, AtomicI64>,
}

impl Metrics {
    pub fn new(queue: Arc<QueueService>) -> Self {
        Self {
            queue,
            buffer: DashMap::new(),
        }
    }

    /// Increment a counter by one
    pub fn incr(&self, key: &str) {
        self.add(key, 1);
    }

    /// Add a delta to a counter
    pub fn add(&self, key: &str, delta: i64) {
        if delta == 0 {
            return;
        }
        self.buffer
            .entry(key.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Flush buffered deltas to the shared cluster counters
    pub async fn flush(&self) {
        let mut deltas: Vec<(String, i64)> = Vec::new();
        for entry in self.buffer.iter() {
            let value = entry.value().swap(0, Ordering::AcqRel);
            if value != 0 {
                deltas.push((entry.key().clone(), value));
            }
        }
        if deltas.is_empty() {
            return;
        }
        if let Err(e) = self.queue.incr_counters(&deltas).await {
            tracing::warn!(error = %e, "Metrics flush failed; re-buffering");
            for (key, delta) in deltas {
                self.add(&key, delta);
            }
        }
    }

    /// Read the shared cluster counters
    pub async fn cluster_counters(&self) -> HashMap<String, i64> {
        self.queue.read_counters().await.unwrap_or_default()
    }

    /// Start the periodic flush task
    pub fn start_flush_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let metrics = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(METRICS_FLUSH_INTERVAL_MS));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            // Final flush so shutdown loses nothing
                            metrics.flush().await;
                            tracing::debug!("Metrics flush task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        metrics.flush().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_incr_buffers_then_flushes() {
        let queue = Arc::new(QueueService::memory());
        let metrics = Metrics::new(Arc::clone(&queue));

        metrics.incr(keys::EVENTS_COMMIT);
        metrics.incr(keys::EVENTS_COMMIT);
        metrics.add(keys::PROCESS_OK, 5);

        // Nothing on the shared counters until a flush
        assert!(queue.read_counters().await.unwrap().is_empty());

        metrics.flush().await;
        let counters = queue.read_counters().await.unwrap();
        assert_eq!(counters.get(keys::EVENTS_COMMIT), Some(&2));
        assert_eq!(counters.get(keys::PROCESS_OK), Some(&5));
    }

    #[tokio::test]
    async fn test_flush_is_cumulative() {
        let queue = Arc::new(QueueService::memory());
        let metrics = Metrics::new(Arc::clone(&queue));

        metrics.incr(keys::NOTIFICATIONS);
        metrics.flush().await;
        metrics.incr(keys::NOTIFICATIONS);
        metrics.flush().await;

        let counters = queue.read_counters().await.unwrap();
        assert_eq!(counters.get(keys::NOTIFICATIONS), Some(&2));
    }

    #[tokio::test]
    async fn test_flush_task_flushes_on_shutdown() {
        let queue = Arc::new(QueueService::memory());
        let metrics = Arc::new(Metrics::new(Arc::clone(&queue)));
        let (tx, rx) = watch::channel(false);

        let handle = metrics.start_flush_task(rx);
        metrics.incr(keys::EVENTS_ACCOUNT);
        tx.send(true).unwrap();
        handle.await.unwrap();

        let counters = queue.read_counters().await.unwrap();
        assert_eq!(counters.get(keys::EVENTS_ACCOUNT), Some(&1));
    }
}
