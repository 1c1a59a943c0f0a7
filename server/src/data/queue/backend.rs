//! Queue backend trait definition
//!
//! A bounded, log-structured stream with consumer groups, at-least-once
//! delivery, pending-message recovery, and a dead-letter path, plus a
//! fire-and-forget broadcast channel for in-process fan-out.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::error::QueueError;

/// Message received from a stream
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Unique message ID (Redis stream ID or memory sequence)
    pub id: String,
    /// Message payload
    pub payload: Vec<u8>,
    /// Delivery count as known at read time: 1 for a fresh delivery, and the
    /// pending-entry count (all completed deliveries) for a claimed message
    pub deliveries: u64,
}

/// An entry in the dead-letter stream
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    /// ID within the dead-letter stream
    pub id: String,
    /// ID of the original message on the main stream
    pub orig_id: String,
    /// Why the message was quarantined
    pub reason: String,
    /// Deliveries the message had accumulated when it was moved
    pub deliveries: u64,
    /// Original payload
    pub payload: Vec<u8>,
}

/// Stream statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    /// Total messages in the stream
    pub length: u64,
    /// Messages pending acknowledgment in the group
    pub pending: u64,
    /// Number of consumers in the group
    pub consumers: u64,
    /// Messages quarantined on the dead-letter stream
    pub dead_letter_length: u64,
    /// Oldest pending message age in milliseconds
    pub oldest_pending_ms: Option<u64>,
}

/// Subscription to a broadcast channel (fire-and-forget fan-out)
pub struct BroadcastSubscription {
    pub receiver: Pin<Box<dyn Stream<Item = Result<Vec<u8>, QueueError>> + Send>>,
}

/// Queue backend trait
///
/// Both the in-memory and Redis backends implement this. Delivery is
/// at-least-once per consumer group and in stream order per producer;
/// duplicates are possible and consumers must be idempotent.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Append one message; the stream is trimmed to an approximate MAXLEN,
    /// so eviction at the tail is acceptable loss.
    async fn push(&self, stream: &str, payload: &[u8]) -> Result<String, QueueError>;

    /// Read up to `count` messages not yet delivered to this group, blocking
    /// up to `block_ms` when the stream is empty. The group is auto-created
    /// on first use.
    async fn consume(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Mark a message processed; it will not be redelivered to this group.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), QueueError>;

    /// Claim messages pending in other consumers longer than `min_idle_ms`.
    /// Used to recover work from dead consumers.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Move a message to the bounded dead-letter stream and ack the original.
    async fn dead_letter(
        &self,
        stream: &str,
        group: &str,
        message: &QueueMessage,
        reason: &str,
    ) -> Result<(), QueueError>;

    /// Read the newest entries from the dead-letter stream.
    async fn read_dead_letters(
        &self,
        stream: &str,
        count: usize,
    ) -> Result<Vec<DeadLetterEntry>, QueueError>;

    /// Stream statistics for monitoring.
    async fn stats(&self, stream: &str, group: &str) -> Result<StreamStats, QueueError>;

    /// Atomically add deltas to the shared cluster counters.
    async fn incr_counters(&self, deltas: &[(String, i64)]) -> Result<(), QueueError>;

    /// Read the shared cluster counters.
    async fn read_counters(&self) -> Result<HashMap<String, i64>, QueueError>;

    /// Publish to a broadcast channel (fire-and-forget).
    async fn broadcast(&self, channel: &str, payload: &[u8]) -> Result<(), QueueError>;

    /// Subscribe to a broadcast channel.
    async fn subscribe(&self, channel: &str) -> Result<BroadcastSubscription, QueueError>;

    /// Health check (validates connection).
    async fn health_check(&self) -> Result<(), QueueError>;

    /// Backend name for debugging/logging.
    fn backend_name(&self) -> &'static str;
}
