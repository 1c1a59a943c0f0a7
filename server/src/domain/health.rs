//! Readiness reporting
//!
//! Healthy iff the queue store and index store are reachable, the firehose
//! consumer is connected (or still inside its first reconnect window), and
//! memory usage sits below the configured fraction of total.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use crate::core::constants::HEALTH_PROBE_TIMEOUT_SECS;
use crate::data::postgres::PostgresService;
use crate::data::queue::QueueService;

/// Grace window after startup during which a not-yet-connected firehose
/// does not fail readiness
const FIRST_CONNECT_WINDOW_SECS: i64 = 60;

/// Shared firehose connection state, updated by the consumer and read here
#[derive(Debug)]
pub struct FirehoseStatus {
    connected: AtomicBool,
    /// Unix millis of the last event of any kind
    last_event_ms: AtomicI64,
    /// Unix millis when the consumer task started
    started_at_ms: AtomicI64,
    consecutive_failures: AtomicU64,
    /// Set on fatal errors (auth); readiness stays unhealthy
    fatal: AtomicBool,
}

impl FirehoseStatus {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            last_event_ms: AtomicI64::new(0),
            started_at_ms: AtomicI64::new(now_ms()),
            consecutive_failures: AtomicU64::new(0),
            fatal: AtomicBool::new(false),
        }
    }

    pub fn mark_started(&self) {
        self.started_at_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
        if connected {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        }
    }

    pub fn record_event(&self) {
        self.last_event_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_fatal(&self) {
        self.fatal.store(true, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Relaxed)
    }

    pub fn last_event_ms(&self) -> i64 {
        self.last_event_ms.load(Ordering::Relaxed)
    }

    fn within_first_window(&self) -> bool {
        let started = self.started_at_ms.load(Ordering::Relaxed);
        now_ms() - started < FIRST_CONNECT_WINDOW_SECS * 1000
    }
}

impl Default for FirehoseStatus {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Readiness snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct Readiness {
    pub queue_ok: bool,
    pub index_ok: bool,
    pub firehose_ok: bool,
    pub memory_ok: bool,
    pub healthy: bool,
}

/// Readiness prober
pub struct HealthService {
    queue: Arc<QueueService>,
    postgres: Arc<PostgresService>,
    firehose: Arc<FirehoseStatus>,
    firehose_enabled: bool,
    memory_fraction: f64,
}

impl HealthService {
    pub fn new(
        queue: Arc<QueueService>,
        postgres: Arc<PostgresService>,
        firehose: Arc<FirehoseStatus>,
        firehose_enabled: bool,
        memory_fraction: f64,
    ) -> Self {
        Self {
            queue,
            postgres,
            firehose,
            firehose_enabled,
            memory_fraction,
        }
    }

    pub async fn check(&self) -> Readiness {
        let probe_timeout = Duration::from_secs(HEALTH_PROBE_TIMEOUT_SECS);

        let queue_ok = tokio::time::timeout(probe_timeout, self.queue.health_check())
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        let index_ok = tokio::time::timeout(probe_timeout, self.postgres.health_check())
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);

        let firehose_ok = if !self.firehose_enabled {
            true
        } else if self.firehose.is_fatal() {
            false
        } else {
            self.firehose.is_connected() || self.firehose.within_first_window()
        };

        let memory_ok = memory_usage_fraction()
            .map(|used| used < self.memory_fraction)
            .unwrap_or(true);

        Readiness {
            queue_ok,
            index_ok,
            firehose_ok,
            memory_ok,
            healthy: queue_ok && index_ok && firehose_ok && memory_ok,
        }
    }
}

/// Resident memory as a fraction of total system memory.
/// Only implemented for Linux; elsewhere memory never fails readiness.
#[cfg(target_os = "linux")]
fn memory_usage_fraction() -> Option<f64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let rss_kb: f64 = status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()?;

    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let total_kb: f64 = meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()?;

    if total_kb > 0.0 {
        Some(rss_kb / total_kb)
    } else {
        None
    }
}

#[cfg(not(target_os = "linux"))]
fn memory_usage_fraction() -> Option<f64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firehose_status_first_window() {
        let status = FirehoseStatus::new();
        assert!(!status.is_connected());
        assert!(status.within_first_window());

        status.set_connected(true);
        assert!(status.is_connected());
    }

    #[test]
    fn test_fatal_is_sticky() {
        let status = FirehoseStatus::new();
        status.mark_fatal();
        status.set_connected(true);
        assert!(status.is_fatal());
    }

    #[test]
    fn test_record_event_advances_clock() {
        let status = FirehoseStatus::new();
        assert_eq!(status.last_event_ms(), 0);
        status.record_event();
        assert!(status.last_event_ms() > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_memory_fraction_reads_proc() {
        let fraction = memory_usage_fraction().unwrap();
        assert!(fraction > 0.0 && fraction < 1.0);
    }
}
