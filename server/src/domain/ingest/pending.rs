//! Pending-op buffer
//!
//! In-memory deferral of child ops whose parent record has not arrived:
//! likes and reposts wait on their subject post, list items on their list.
//! This is not a retry queue; replaying the stream must reproduce the same
//! final index, and the final flush is an idempotent insert that the
//! arrival of the parent will also attempt.
//!
//! Bounds: a global cap and a per-parent cap drop the oldest entries on
//! overflow; a TTL expires stale entries on a periodic sweep. All mutations
//! run under one short critical section with no suspension points.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::PendingConfig;
use crate::core::constants::PENDING_SWEEP_INTERVAL_SECS;

/// A deferred child operation
#[derive(Debug, Clone, PartialEq)]
pub enum PendingRecord {
    Like {
        uri: String,
        actor_did: String,
        subject_uri: String,
        created_at: Option<DateTime<Utc>>,
    },
    Repost {
        uri: String,
        actor_did: String,
        subject_uri: String,
        created_at: Option<DateTime<Utc>>,
    },
    ListItem {
        uri: String,
        list_uri: String,
        subject_did: String,
        created_at: Option<DateTime<Utc>>,
    },
}

impl PendingRecord {
    pub fn uri(&self) -> &str {
        match self {
            PendingRecord::Like { uri, .. }
            | PendingRecord::Repost { uri, .. }
            | PendingRecord::ListItem { uri, .. } => uri,
        }
    }

    /// The record this op is waiting for
    pub fn parent_uri(&self) -> &str {
        match self {
            PendingRecord::Like { subject_uri, .. }
            | PendingRecord::Repost { subject_uri, .. } => subject_uri,
            PendingRecord::ListItem { list_uri, .. } => list_uri,
        }
    }

    pub fn is_list_item(&self) -> bool {
        matches!(self, PendingRecord::ListItem { .. })
    }
}

struct Entry {
    record: PendingRecord,
    generation: u64,
    enqueued_at: Instant,
}

#[derive(Default)]
struct Inner {
    by_parent: HashMap<String, VecDeque<Entry>>,
    /// op URI -> (parent URI, generation); the index for delete cancellation
    by_op: HashMap<String, (String, u64)>,
    /// Global FIFO of (generation, op URI); stale entries are skipped lazily
    order: VecDeque<(u64, String)>,
    total: usize,
    next_generation: u64,
}

impl Inner {
    /// Remove one specific buffered op; returns true if it was present
    fn remove_op(&mut self, op_uri: &str) -> bool {
        let Some((parent, generation)) = self.by_op.remove(op_uri) else {
            return false;
        };
        if let Some(queue) = self.by_parent.get_mut(&parent) {
            queue.retain(|entry| entry.generation != generation);
            if queue.is_empty() {
                self.by_parent.remove(&parent);
            }
        }
        self.total -= 1;
        true
    }

    /// Evict the globally oldest live entry; returns false if none remain
    fn evict_oldest(&mut self) -> bool {
        while let Some((generation, op_uri)) = self.order.pop_front() {
            let live = self
                .by_op
                .get(&op_uri)
                .is_some_and(|(_, current)| *current == generation);
            if live {
                self.remove_op(&op_uri);
                return true;
            }
        }
        false
    }
}

/// Counters exposed by the buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounters {
    pub dropped: u64,
    pub expired: u64,
}

pub struct PendingBuffer {
    inner: Mutex<Inner>,
    config: PendingConfig,
    dropped: AtomicU64,
    expired: AtomicU64,
}

impl PendingBuffer {
    pub fn new(config: PendingConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
            dropped: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    /// Buffer a child op under its parent URI.
    ///
    /// A duplicate of an already-buffered op URI is ignored (at-least-once
    /// delivery makes those routine). Overflow of either cap drops the
    /// oldest entries and counts them.
    pub fn enqueue(&self, record: PendingRecord) {
        let mut inner = self.inner.lock();

        if inner.by_op.contains_key(record.uri()) {
            return;
        }

        let parent = record.parent_uri().to_string();
        let op_uri = record.uri().to_string();

        // Per-parent cap: drop the oldest entry under this parent
        let parent_overflow = inner.by_parent.get(&parent).and_then(|queue| {
            (queue.len() >= self.config.max_per_parent)
                .then(|| queue.front().map(|e| e.record.uri().to_string()))
                .flatten()
        });
        if let Some(oldest) = parent_overflow {
            inner.remove_op(&oldest);
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }

        // Global cap
        while inner.total >= self.config.max_total {
            if !inner.evict_oldest() {
                break;
            }
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;

        inner
            .by_op
            .insert(op_uri.clone(), (parent.clone(), generation));
        inner.order.push_back((generation, op_uri));
        inner.by_parent.entry(parent).or_default().push_back(Entry {
            record,
            generation,
            enqueued_at: Instant::now(),
        });
        inner.total += 1;
    }

    /// Cancel a buffered op (its delete arrived before the parent did).
    /// Returns true if the op was buffered.
    pub fn cancel(&self, op_uri: &str) -> bool {
        self.inner.lock().remove_op(op_uri)
    }

    /// Atomically remove and return everything queued under a parent.
    /// Removal happens before processing so a concurrent enqueue under the
    /// same parent cannot be lost or double-flushed.
    pub fn take_parent(&self, parent_uri: &str) -> Vec<PendingRecord> {
        let mut inner = self.inner.lock();
        let Some(queue) = inner.by_parent.remove(parent_uri) else {
            return Vec::new();
        };
        inner.total -= queue.len();
        let mut records = Vec::with_capacity(queue.len());
        for entry in queue {
            inner.by_op.remove(entry.record.uri());
            records.push(entry.record);
        }
        records
    }

    /// Discard everything queued under a deleted parent, counting the
    /// entries as dropped.
    pub fn purge_parent(&self, parent_uri: &str) -> usize {
        let purged = self.take_parent(parent_uri).len();
        if purged > 0 {
            self.dropped.fetch_add(purged as u64, Ordering::Relaxed);
        }
        purged
    }

    /// Parent URIs with buffered children, split into (post parents,
    /// list parents) for the retry scan.
    pub fn parents_by_kind(&self) -> (Vec<String>, Vec<String>) {
        let inner = self.inner.lock();
        let mut posts = Vec::new();
        let mut lists = Vec::new();
        for (parent, queue) in &inner.by_parent {
            let is_list = queue
                .front()
                .map(|e| e.record.is_list_item())
                .unwrap_or(false);
            if is_list {
                lists.push(parent.clone());
            } else {
                posts.push(parent.clone());
            }
        }
        (posts, lists)
    }

    /// Total buffered entries
    pub fn len(&self) -> usize {
        self.inner.lock().total
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counters(&self) -> PendingCounters {
        PendingCounters {
            dropped: self.dropped.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }

    /// Remove entries older than the TTL; returns how many expired
    pub fn sweep(&self) -> usize {
        let ttl = Duration::from_secs(self.config.ttl_secs);
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let expired_ops: Vec<String> = inner
            .by_parent
            .values()
            .flatten()
            .filter(|entry| now.duration_since(entry.enqueued_at) >= ttl)
            .map(|entry| entry.record.uri().to_string())
            .collect();

        for op_uri in &expired_ops {
            inner.remove_op(op_uri);
        }

        let count = expired_ops.len();
        if count > 0 {
            self.expired.fetch_add(count as u64, Ordering::Relaxed);
            tracing::debug!(count, "Expired pending ops swept");
        }
        count
    }

    /// Periodic TTL sweeper
    pub fn start_sweep_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let buffer = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(PENDING_SWEEP_INTERVAL_SECS));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Pending sweep task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        buffer.sweep();
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_total: usize, max_per_parent: usize, ttl_secs: u64) -> PendingConfig {
        PendingConfig {
            max_total,
            max_per_parent,
            ttl_secs,
        }
    }

    fn like(n: u32, subject: &str) -> PendingRecord {
        PendingRecord::Like {
            uri: format!("at://did:plc:a/app.bsky.feed.like/{}", n),
            actor_did: "did:plc:a".into(),
            subject_uri: subject.into(),
            created_at: None,
        }
    }

    const POST: &str = "at://did:plc:b/app.bsky.feed.post/9";

    #[test]
    fn test_enqueue_and_take_parent() {
        let buffer = PendingBuffer::new(config(100, 10, 600));
        buffer.enqueue(like(1, POST));
        buffer.enqueue(like(2, POST));
        assert_eq!(buffer.len(), 2);

        let taken = buffer.take_parent(POST);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].uri(), "at://did:plc:a/app.bsky.feed.like/1");
        assert_eq!(buffer.len(), 0);

        // Second take is empty; the removal was atomic
        assert!(buffer.take_parent(POST).is_empty());
    }

    #[test]
    fn test_duplicate_enqueue_ignored() {
        let buffer = PendingBuffer::new(config(100, 10, 600));
        buffer.enqueue(like(1, POST));
        buffer.enqueue(like(1, POST));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_cancel_on_delete_before_parent() {
        let buffer = PendingBuffer::new(config(100, 10, 600));
        buffer.enqueue(like(1, POST));
        assert!(buffer.cancel("at://did:plc:a/app.bsky.feed.like/1"));
        assert_eq!(buffer.len(), 0);
        assert!(buffer.take_parent(POST).is_empty());
        assert!(!buffer.cancel("at://did:plc:a/app.bsky.feed.like/1"));
    }

    #[test]
    fn test_global_cap_drops_oldest() {
        let buffer = PendingBuffer::new(config(3, 10, 600));
        for n in 1..=4 {
            buffer.enqueue(like(n, POST));
        }
        assert_eq!(buffer.len(), 3, "size never exceeds the cap");
        assert_eq!(buffer.counters().dropped, 1);

        let taken = buffer.take_parent(POST);
        let uris: Vec<&str> = taken.iter().map(|r| r.uri()).collect();
        assert!(
            !uris.contains(&"at://did:plc:a/app.bsky.feed.like/1"),
            "the oldest entry was dropped"
        );
    }

    #[test]
    fn test_per_parent_cap_drops_oldest_for_that_parent() {
        let buffer = PendingBuffer::new(config(100, 2, 600));
        buffer.enqueue(like(1, POST));
        buffer.enqueue(like(2, POST));
        buffer.enqueue(like(3, POST));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.counters().dropped, 1);

        let uris: Vec<String> = buffer
            .take_parent(POST)
            .iter()
            .map(|r| r.uri().to_string())
            .collect();
        assert_eq!(
            uris,
            vec![
                "at://did:plc:a/app.bsky.feed.like/2",
                "at://did:plc:a/app.bsky.feed.like/3"
            ]
        );
    }

    #[test]
    fn test_sweep_expires_old_entries() {
        let buffer = PendingBuffer::new(config(100, 10, 0));
        buffer.enqueue(like(1, POST));
        std::thread::sleep(Duration::from_millis(5));
        let expired = buffer.sweep();
        assert_eq!(expired, 1);
        assert_eq!(buffer.counters().expired, 1);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_sweep_keeps_fresh_entries() {
        let buffer = PendingBuffer::new(config(100, 10, 600));
        buffer.enqueue(like(1, POST));
        assert_eq!(buffer.sweep(), 0);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_purge_parent_counts_dropped() {
        let buffer = PendingBuffer::new(config(100, 10, 600));
        buffer.enqueue(like(1, POST));
        buffer.enqueue(like(2, POST));
        assert_eq!(buffer.purge_parent(POST), 2);
        assert_eq!(buffer.counters().dropped, 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parents_by_kind_split() {
        let buffer = PendingBuffer::new(config(100, 10, 600));
        buffer.enqueue(like(1, POST));
        buffer.enqueue(PendingRecord::ListItem {
            uri: "at://did:plc:a/app.bsky.graph.listitem/1".into(),
            list_uri: "at://did:plc:b/app.bsky.graph.list/l1".into(),
            subject_did: "did:plc:c".into(),
            created_at: None,
        });

        let (posts, lists) = buffer.parents_by_kind();
        assert_eq!(posts, vec![POST.to_string()]);
        assert_eq!(lists, vec!["at://did:plc:b/app.bsky.graph.list/l1".to_string()]);
    }

    #[test]
    fn test_reenqueue_after_take_survives_stale_order_entries() {
        // Take then re-enqueue the same op URI (the foreign-key race), then
        // force a global eviction; the stale order entry must not evict the
        // live record
        let buffer = PendingBuffer::new(config(2, 10, 600));
        buffer.enqueue(like(1, POST));
        let taken = buffer.take_parent(POST);
        assert_eq!(taken.len(), 1);

        buffer.enqueue(like(1, POST)); // re-enqueued, new generation
        buffer.enqueue(like(2, POST));
        buffer.enqueue(like(3, POST)); // over cap: evicts the oldest LIVE entry

        let uris: Vec<String> = buffer
            .take_parent(POST)
            .iter()
            .map(|r| r.uri().to_string())
            .collect();
        assert_eq!(
            uris,
            vec![
                "at://did:plc:a/app.bsky.feed.like/2",
                "at://did:plc:a/app.bsky.feed.like/3"
            ]
        );
    }
}
