//! Cursor tracking with coalesced persistence
//!
//! The firehose consumer advances the cursor on every push, but writes are
//! coalesced to at most one every ~5 s per cursor name. The SQL upsert is
//! monotone non-decreasing, so a racing flush cannot move the cursor back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::CURSOR_FLUSH_INTERVAL_SECS;
use crate::data::postgres::repositories::cursor as cursor_repo;
use crate::data::postgres::{PostgresError, PostgresService};

pub struct CursorTracker {
    postgres: Arc<PostgresService>,
    name: String,
    last: AtomicI64,
    dirty: AtomicBool,
}

impl CursorTracker {
    /// Load the stored cursor (if any) and build a tracker around it
    pub async fn load(
        postgres: Arc<PostgresService>,
        name: &str,
    ) -> Result<Self, PostgresError> {
        let stored = cursor_repo::get_cursor(postgres.pool(), name).await?;
        let last = stored.map(|(seq, _)| seq).unwrap_or(-1);
        if last >= 0 {
            tracing::info!(cursor = name, seq = last, "Resuming from stored cursor");
        } else {
            tracing::info!(cursor = name, "No stored cursor; starting at head");
        }
        Ok(Self {
            postgres,
            name: name.to_string(),
            last: AtomicI64::new(last),
            dirty: AtomicBool::new(false),
        })
    }

    /// Current cursor, if one has ever been seen
    pub fn current(&self) -> Option<i64> {
        let value = self.last.load(Ordering::Acquire);
        if value >= 0 { Some(value) } else { None }
    }

    /// Advance the in-memory cursor; monotone non-decreasing.
    pub fn advance(&self, seq: i64) {
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            if seq <= current {
                return;
            }
            match self.last.compare_exchange_weak(
                current,
                seq,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.dirty.store(true, Ordering::Release);
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Write through to the store if the cursor moved since the last flush
    pub async fn flush(&self) -> Result<(), PostgresError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let seq = self.last.load(Ordering::Acquire);
        if seq < 0 {
            return Ok(());
        }
        cursor_repo::set_cursor(self.postgres.pool(), &self.name, seq).await
    }

    /// Periodic flusher; performs a final flush on shutdown
    pub fn start_flush_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(CURSOR_FLUSH_INTERVAL_SECS));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            if let Err(e) = tracker.flush().await {
                                tracing::warn!(error = %e, "Final cursor flush failed");
                            }
                            tracing::debug!("Cursor flush task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = tracker.flush().await {
                            tracing::warn!(error = %e, "Cursor flush failed");
                        }
                    }
                }
            }
        })
    }
}
