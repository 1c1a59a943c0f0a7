//! Durable work queue
//!
//! A bounded, log-structured stream with consumer groups backs the
//! ingest pipeline; delivery is at-least-once and idempotence is the
//! consumer's job. Pluggable backends:
//! - In-memory (default) - local-only, for development and tests
//! - Redis Streams (optional) - durable, for production deployments
//!
//! The same backend carries a pub/sub channel used for lightweight
//! in-process fan-out (`events`) and operational control (`control`).

mod backend;
mod error;
mod memory;
mod redis;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use backend::{
    BroadcastSubscription, DeadLetterEntry, QueueBackend, QueueMessage, StreamStats,
};
pub use error::QueueError;
use memory::MemoryQueueBackend;

use crate::core::config::{QueueBackendType, QueueConfig};
use crate::core::constants::{CHANNEL_CONTROL, CHANNEL_EVENTS, STREAM_INGEST};
use crate::data::types::IngestEvent;

/// Operational control messages published on the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMessage {
    /// Force the firehose consumer to drop and re-open its connection
    ReconnectFirehose,
    /// Trigger an immediate retry pass over the pending buffer
    RetryPending,
}

/// Queue service providing typed access to the queue backend
pub struct QueueService {
    backend: Arc<dyn QueueBackend>,
}

impl std::fmt::Debug for QueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueService")
            .field("backend", &self.backend.backend_name())
            .finish()
    }
}

impl QueueService {
    /// Create a queue service from configuration
    pub async fn from_config(config: &QueueConfig) -> Result<Self, QueueError> {
        let backend: Arc<dyn QueueBackend> = match config.backend {
            QueueBackendType::Memory => Arc::new(MemoryQueueBackend::new(
                config.stream_maxlen,
                config.dead_letter_maxlen,
            )),
            QueueBackendType::Redis => {
                let url = config.redis_url.as_ref().ok_or_else(|| {
                    QueueError::Config("redis_url required for Redis backend".into())
                })?;
                Arc::new(
                    redis::RedisQueueBackend::new(
                        url,
                        config.stream_maxlen,
                        config.dead_letter_maxlen,
                    )
                    .await?,
                )
            }
        };

        Ok(Self { backend })
    }

    /// In-memory queue with default bounds (tests and development)
    pub fn memory() -> Self {
        Self {
            backend: Arc::new(MemoryQueueBackend::new(
                crate::core::constants::DEFAULT_STREAM_MAXLEN,
                crate::core::constants::DEFAULT_DEAD_LETTER_MAXLEN,
            )),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    // =========================================================================
    // Ingest stream
    // =========================================================================

    /// Append one event to the ingest stream, returning its message ID
    pub async fn push(&self, event: &IngestEvent) -> Result<String, QueueError> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        self.backend.push(STREAM_INGEST, &payload).await
    }

    /// Read up to `count` undelivered messages for the group
    pub async fn consume(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        self.backend
            .consume(STREAM_INGEST, group, consumer, count, block_ms)
            .await
    }

    /// Acknowledge one message
    pub async fn ack(&self, group: &str, id: &str) -> Result<(), QueueError> {
        self.backend.ack(STREAM_INGEST, group, id).await
    }

    /// Claim messages pending in other consumers longer than `min_idle_ms`
    pub async fn claim(
        &self,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        self.backend
            .claim(STREAM_INGEST, group, consumer, min_idle_ms, count)
            .await
    }

    /// Quarantine a message on the dead-letter stream and ack the original
    pub async fn dead_letter(
        &self,
        group: &str,
        message: &QueueMessage,
        reason: &str,
    ) -> Result<(), QueueError> {
        self.backend
            .dead_letter(STREAM_INGEST, group, message, reason)
            .await
    }

    /// Read the newest dead-letter entries
    pub async fn dead_letters(&self, count: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        self.backend.read_dead_letters(STREAM_INGEST, count).await
    }

    /// Stream statistics for the given group
    pub async fn stats(&self, group: &str) -> Result<StreamStats, QueueError> {
        self.backend.stats(STREAM_INGEST, group).await
    }

    /// Decode a stream payload back into an event
    pub fn decode_event(payload: &[u8]) -> Result<IngestEvent, QueueError> {
        serde_json::from_slice(payload).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    // =========================================================================
    // Shared cluster counters
    // =========================================================================

    /// Atomically add deltas to the shared cluster counters
    pub async fn incr_counters(&self, deltas: &[(String, i64)]) -> Result<(), QueueError> {
        self.backend.incr_counters(deltas).await
    }

    /// Read the shared cluster counters
    pub async fn read_counters(&self) -> Result<HashMap<String, i64>, QueueError> {
        self.backend.read_counters().await
    }

    // =========================================================================
    // Fan-out and control
    // =========================================================================

    /// Publish an event on the fan-out channel for in-process observers
    pub async fn publish_event(&self, event: &IngestEvent) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        self.backend.broadcast(CHANNEL_EVENTS, &payload).await
    }

    /// Subscribe to the fan-out channel
    pub async fn subscribe_events(&self) -> Result<BroadcastSubscription, QueueError> {
        self.backend.subscribe(CHANNEL_EVENTS).await
    }

    /// Publish an operational control message
    pub async fn publish_control(&self, message: ControlMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&message)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        self.backend.broadcast(CHANNEL_CONTROL, &payload).await
    }

    /// Subscribe to operational control messages
    pub async fn subscribe_control(&self) -> Result<BroadcastSubscription, QueueError> {
        self.backend.subscribe(CHANNEL_CONTROL).await
    }

    /// Decode a control channel payload
    pub fn decode_control(payload: &[u8]) -> Option<ControlMessage> {
        serde_json::from_slice(payload).ok()
    }

    /// Health check
    pub async fn health_check(&self) -> Result<(), QueueError> {
        self.backend.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::{CommitData, IngestEvent};
    use futures::StreamExt;

    fn commit_event(seq: u64) -> IngestEvent {
        IngestEvent::commit(
            CommitData {
                repo: "did:plc:alice".into(),
                ops: vec![],
            },
            Some(seq.to_string()),
        )
    }

    #[tokio::test]
    async fn test_push_consume_roundtrip() {
        let queue = QueueService::memory();
        queue.push(&commit_event(1)).await.unwrap();

        let batch = queue.consume("g", "c", 10, 0).await.unwrap();
        assert_eq!(batch.len(), 1);
        let event = QueueService::decode_event(&batch[0].payload).unwrap();
        assert_eq!(event.seq.as_deref(), Some("1"));
        assert_eq!(event.kind(), "commit");
    }

    #[tokio::test]
    async fn test_acked_message_not_redelivered() {
        let queue = QueueService::memory();
        queue.push(&commit_event(1)).await.unwrap();

        let batch = queue.consume("g", "c", 10, 0).await.unwrap();
        queue.ack("g", &batch[0].id).await.unwrap();

        assert!(queue.consume("g", "c", 10, 0).await.unwrap().is_empty());
        assert!(
            queue.claim("g", "c2", 0, 10).await.unwrap().is_empty(),
            "acked messages cannot be claimed"
        );
    }

    #[tokio::test]
    async fn test_control_channel_roundtrip() {
        let queue = QueueService::memory();
        let mut sub = queue.subscribe_control().await.unwrap();

        queue
            .publish_control(ControlMessage::ReconnectFirehose)
            .await
            .unwrap();

        let payload = sub.receiver.next().await.unwrap().unwrap();
        assert_eq!(
            QueueService::decode_control(&payload),
            Some(ControlMessage::ReconnectFirehose)
        );
    }

    #[tokio::test]
    async fn test_poison_message_reaches_dead_letter_after_budget() {
        let queue = QueueService::memory();
        queue.push(&commit_event(1)).await.unwrap();

        // First delivery fails (never acked)
        let batch = queue.consume("g", "worker", 10, 0).await.unwrap();
        assert_eq!(batch[0].deliveries, 1);
        let orig_id = batch[0].id.clone();

        // Nine more failing deliveries via the claim path
        let last = loop {
            let mut claimed = queue.claim("g", "rescuer", 0, 10).await.unwrap();
            assert_eq!(claimed.len(), 1);
            let message = claimed.remove(0);
            if message.deliveries >= 10 {
                break message;
            }
        };
        assert_eq!(last.deliveries, 10);

        queue
            .dead_letter("g", &last, "max deliveries exceeded")
            .await
            .unwrap();

        let stats = queue.stats("g").await.unwrap();
        assert_eq!(stats.pending, 0, "main stream pending no longer includes it");
        assert_eq!(stats.dead_letter_length, 1);

        let entries = queue.dead_letters(10).await.unwrap();
        assert_eq!(entries[0].orig_id, orig_id);
        assert_eq!(entries[0].deliveries, 10);
    }

    #[tokio::test]
    async fn test_event_fanout_roundtrip() {
        let queue = QueueService::memory();
        let mut sub = queue.subscribe_events().await.unwrap();

        queue.publish_event(&commit_event(9)).await.unwrap();

        let payload = sub.receiver.next().await.unwrap().unwrap();
        let event = QueueService::decode_event(&payload).unwrap();
        assert_eq!(event.seq.as_deref(), Some("9"));
    }
}
