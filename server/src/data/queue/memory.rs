//! In-memory queue backend
//!
//! Simulates bounded streams with consumer groups, pending tracking,
//! claims, and a dead-letter stream. Suitable for development and tests;
//! a process crash loses all state. Use the Redis backend for durability.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, broadcast};

use super::backend::{
    BroadcastSubscription, DeadLetterEntry, QueueBackend, QueueMessage, StreamStats,
};
use super::error::QueueError;

/// Broadcast channel capacity
const BROADCAST_CAPACITY: usize = 10_000;

/// Message stored in a memory stream
#[derive(Clone)]
struct StreamEntry {
    id: u64,
    payload: Vec<u8>,
}

/// Pending (delivered, unacked) message state
#[derive(Clone)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    deliveries: u64,
}

/// Consumer group state for a stream
#[derive(Default)]
struct ConsumerGroup {
    /// Last ID handed out to any consumer in the group
    last_delivered: u64,
    /// Consumers that have read from the group
    consumers: HashMap<String, ()>,
    /// message_id -> pending state
    pending: HashMap<u64, PendingEntry>,
}

/// Stream state
struct StreamState {
    messages: VecDeque<StreamEntry>,
    groups: HashMap<String, ConsumerGroup>,
    dead_letters: VecDeque<DeadLetterEntry>,
    next_id: u64,
    next_dead_letter_id: u64,
}

impl StreamState {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            groups: HashMap::new(),
            dead_letters: VecDeque::new(),
            next_id: 1,
            next_dead_letter_id: 1,
        }
    }
}

/// Shared state for the memory backend
struct SharedState {
    streams: Mutex<HashMap<String, StreamState>>,
    counters: Mutex<HashMap<String, i64>>,
    broadcast_channels: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    stream_notifiers: RwLock<HashMap<String, Arc<Notify>>>,
}

/// In-memory queue backend
pub struct MemoryQueueBackend {
    state: Arc<SharedState>,
    stream_maxlen: usize,
    dead_letter_maxlen: usize,
}

impl MemoryQueueBackend {
    pub fn new(stream_maxlen: u64, dead_letter_maxlen: u64) -> Self {
        Self {
            state: Arc::new(SharedState {
                streams: Mutex::new(HashMap::new()),
                counters: Mutex::new(HashMap::new()),
                broadcast_channels: RwLock::new(HashMap::new()),
                stream_notifiers: RwLock::new(HashMap::new()),
            }),
            stream_maxlen: stream_maxlen as usize,
            dead_letter_maxlen: dead_letter_maxlen as usize,
        }
    }

    fn trim_stream(stream: &mut StreamState, max_len: usize) {
        while stream.messages.len() > max_len {
            if let Some(entry) = stream.messages.pop_front() {
                for group in stream.groups.values_mut() {
                    group.pending.remove(&entry.id);
                }
            }
        }
    }

    fn get_or_create_notifier(&self, stream: &str) -> Arc<Notify> {
        {
            let notifiers = self.state.stream_notifiers.read();
            if let Some(n) = notifiers.get(stream) {
                return Arc::clone(n);
            }
        }
        let mut notifiers = self.state.stream_notifiers.write();
        if let Some(n) = notifiers.get(stream) {
            return Arc::clone(n);
        }
        let n = Arc::new(Notify::new());
        notifiers.insert(stream.to_string(), Arc::clone(&n));
        n
    }

    fn get_or_create_broadcast(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        {
            let channels = self.state.broadcast_channels.read();
            if let Some(sender) = channels.get(channel) {
                return sender.clone();
            }
        }
        let mut channels = self.state.broadcast_channels.write();
        if let Some(sender) = channels.get(channel) {
            return sender.clone();
        }
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        channels.insert(channel.to_string(), sender.clone());
        sender
    }

    /// Take up to `count` undelivered messages for the group; callers hold
    /// no lock across awaits.
    fn try_consume(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Vec<QueueMessage> {
        let mut streams = self.state.streams.lock();
        let state = streams
            .entry(stream.to_string())
            .or_insert_with(StreamState::new);
        let cg = state.groups.entry(group.to_string()).or_default();
        cg.consumers.insert(consumer.to_string(), ());

        let mut out = Vec::new();
        for entry in &state.messages {
            if out.len() >= count {
                break;
            }
            if entry.id > cg.last_delivered {
                cg.last_delivered = entry.id;
                cg.pending.insert(
                    entry.id,
                    PendingEntry {
                        consumer: consumer.to_string(),
                        delivered_at: Instant::now(),
                        deliveries: 1,
                    },
                );
                out.push(QueueMessage {
                    id: entry.id.to_string(),
                    payload: entry.payload.clone(),
                    deliveries: 1,
                });
            }
        }
        out
    }
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn push(&self, stream: &str, payload: &[u8]) -> Result<String, QueueError> {
        let id = {
            let mut streams = self.state.streams.lock();
            let state = streams
                .entry(stream.to_string())
                .or_insert_with(StreamState::new);

            let id = state.next_id;
            state.next_id += 1;
            state.messages.push_back(StreamEntry {
                id,
                payload: payload.to_vec(),
            });
            Self::trim_stream(state, self.stream_maxlen);
            id
        };

        self.get_or_create_notifier(stream).notify_waiters();
        Ok(id.to_string())
    }

    async fn consume(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let messages = self.try_consume(stream, group, consumer, count);
        if !messages.is_empty() || block_ms == 0 {
            return Ok(messages);
        }

        // Block up to block_ms for a publish, then try once more
        let notifier = self.get_or_create_notifier(stream);
        let _ = tokio::time::timeout(Duration::from_millis(block_ms), notifier.notified()).await;
        Ok(self.try_consume(stream, group, consumer, count))
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), QueueError> {
        let id: u64 = id
            .parse()
            .map_err(|_| QueueError::Stream(format!("invalid message id: {}", id)))?;

        let mut streams = self.state.streams.lock();
        if let Some(state) = streams.get_mut(stream)
            && let Some(cg) = state.groups.get_mut(group)
        {
            cg.pending.remove(&id);
        }
        Ok(())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut streams = self.state.streams.lock();
        let state = match streams.get_mut(stream) {
            Some(s) => s,
            None => return Ok(vec![]),
        };
        let cg = match state.groups.get_mut(group) {
            Some(g) => g,
            None => return Ok(vec![]),
        };

        let now = Instant::now();
        let min_idle = Duration::from_millis(min_idle_ms);
        let mut idle_ids: Vec<u64> = cg
            .pending
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.delivered_at) >= min_idle)
            .map(|(&id, _)| id)
            .collect();
        idle_ids.sort_unstable();
        idle_ids.truncate(count);

        let mut claimed = Vec::new();
        for id in idle_ids {
            let Some(payload) = state
                .messages
                .iter()
                .find(|e| e.id == id)
                .map(|e| e.payload.clone())
            else {
                // Message fell off the bounded stream; drop the pending entry
                cg.pending.remove(&id);
                continue;
            };
            let Some(entry) = cg.pending.get_mut(&id) else {
                continue;
            };
            let prior_deliveries = entry.deliveries;
            entry.consumer = consumer.to_string();
            entry.delivered_at = Instant::now();
            entry.deliveries += 1;
            claimed.push(QueueMessage {
                id: id.to_string(),
                payload,
                deliveries: prior_deliveries,
            });
        }

        Ok(claimed)
    }

    async fn dead_letter(
        &self,
        stream: &str,
        group: &str,
        message: &QueueMessage,
        reason: &str,
    ) -> Result<(), QueueError> {
        let mut streams = self.state.streams.lock();
        let state = streams
            .entry(stream.to_string())
            .or_insert_with(StreamState::new);

        let id = state.next_dead_letter_id;
        state.next_dead_letter_id += 1;
        state.dead_letters.push_back(DeadLetterEntry {
            id: id.to_string(),
            orig_id: message.id.clone(),
            reason: reason.to_string(),
            deliveries: message.deliveries,
            payload: message.payload.clone(),
        });
        while state.dead_letters.len() > self.dead_letter_maxlen {
            state.dead_letters.pop_front();
        }

        // Ack the original so the main stream's pending no longer includes it
        if let Ok(orig) = message.id.parse::<u64>()
            && let Some(cg) = state.groups.get_mut(group)
        {
            cg.pending.remove(&orig);
        }
        Ok(())
    }

    async fn read_dead_letters(
        &self,
        stream: &str,
        count: usize,
    ) -> Result<Vec<DeadLetterEntry>, QueueError> {
        let streams = self.state.streams.lock();
        Ok(streams
            .get(stream)
            .map(|state| state.dead_letters.iter().rev().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn stats(&self, stream: &str, group: &str) -> Result<StreamStats, QueueError> {
        let streams = self.state.streams.lock();
        let Some(state) = streams.get(stream) else {
            return Ok(StreamStats::default());
        };

        let (pending, consumers, oldest_pending_ms) = state
            .groups
            .get(group)
            .map(|cg| {
                let oldest = cg
                    .pending
                    .values()
                    .map(|e| e.delivered_at.elapsed().as_millis() as u64)
                    .max();
                (cg.pending.len() as u64, cg.consumers.len() as u64, oldest)
            })
            .unwrap_or((0, 0, None));

        Ok(StreamStats {
            length: state.messages.len() as u64,
            pending,
            consumers,
            dead_letter_length: state.dead_letters.len() as u64,
            oldest_pending_ms,
        })
    }

    async fn incr_counters(&self, deltas: &[(String, i64)]) -> Result<(), QueueError> {
        let mut counters = self.state.counters.lock();
        for (key, delta) in deltas {
            *counters.entry(key.clone()).or_insert(0) += delta;
        }
        Ok(())
    }

    async fn read_counters(&self) -> Result<HashMap<String, i64>, QueueError> {
        Ok(self.state.counters.lock().clone())
    }

    async fn broadcast(&self, channel: &str, payload: &[u8]) -> Result<(), QueueError> {
        let sender = self.get_or_create_broadcast(channel);
        // Send errors mean no active subscribers, which is fine
        let _ = sender.send(payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BroadcastSubscription, QueueError> {
        let sender = self.get_or_create_broadcast(channel);
        let mut receiver = sender.subscribe();

        let stream = stream! {
            loop {
                match receiver.recv().await {
                    Ok(payload) => yield Ok(payload),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        yield Err(QueueError::Lagged(n));
                    }
                }
            }
        };

        Ok(BroadcastSubscription {
            receiver: Box::pin(stream),
        })
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn backend() -> MemoryQueueBackend {
        MemoryQueueBackend::new(100_000, 100)
    }

    #[tokio::test]
    async fn test_push_consume_ack_no_redelivery() {
        let q = backend();
        q.push("s", b"one").await.unwrap();
        q.push("s", b"two").await.unwrap();

        let batch = q.consume("s", "g", "c1", 10, 0).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].payload, b"one");
        assert_eq!(batch[0].deliveries, 1);

        for msg in &batch {
            q.ack("s", "g", &msg.id).await.unwrap();
        }

        // Acked messages are not redelivered to the same group
        let again = q.consume("s", "g", "c1", 10, 0).await.unwrap();
        assert!(again.is_empty());

        let stats = q.stats("s", "g").await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.length, 2);
    }

    #[tokio::test]
    async fn test_consume_only_undelivered_within_group() {
        let q = backend();
        q.push("s", b"a").await.unwrap();
        q.push("s", b"b").await.unwrap();

        let first = q.consume("s", "g", "c1", 1, 0).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = q.consume("s", "g", "c2", 10, 0).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_ne!(first[0].id, second[0].id);
    }

    #[tokio::test]
    async fn test_blocking_consume_wakes_on_push() {
        let q = Arc::new(backend());
        let q2 = Arc::clone(&q);
        let reader = tokio::spawn(async move { q2.consume("s", "g", "c", 1, 2_000).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push("s", b"late").await.unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"late");
    }

    #[tokio::test]
    async fn test_claim_returns_only_idle_messages() {
        let q = backend();
        q.push("s", b"stuck").await.unwrap();
        let batch = q.consume("s", "g", "dead-worker", 10, 0).await.unwrap();
        assert_eq!(batch.len(), 1);

        // Not idle long enough yet
        let claimed = q.claim("s", "g", "rescuer", 50, 10).await.unwrap();
        assert!(claimed.is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let claimed = q.claim("s", "g", "rescuer", 50, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].payload, b"stuck");
        assert_eq!(claimed[0].deliveries, 1);

        // Second claim sees the incremented delivery count
        tokio::time::sleep(Duration::from_millis(60)).await;
        let claimed = q.claim("s", "g", "rescuer2", 50, 10).await.unwrap();
        assert_eq!(claimed[0].deliveries, 2);
    }

    #[tokio::test]
    async fn test_dead_letter_moves_and_acks() {
        let q = backend();
        q.push("s", b"poison").await.unwrap();
        let batch = q.consume("s", "g", "c", 10, 0).await.unwrap();
        let msg = QueueMessage {
            deliveries: 10,
            ..batch[0].clone()
        };

        q.dead_letter("s", "g", &msg, "max deliveries exceeded")
            .await
            .unwrap();

        let stats = q.stats("s", "g").await.unwrap();
        assert_eq!(stats.pending, 0, "original is acked");
        assert_eq!(stats.dead_letter_length, 1);

        let entries = q.read_dead_letters("s", 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].orig_id, msg.id);
        assert_eq!(entries[0].deliveries, 10);
        assert_eq!(entries[0].reason, "max deliveries exceeded");
    }

    #[tokio::test]
    async fn test_dead_letter_stream_is_bounded() {
        let q = MemoryQueueBackend::new(100_000, 3);
        q.push("s", b"x").await.unwrap();
        let batch = q.consume("s", "g", "c", 1, 0).await.unwrap();
        for i in 0..5 {
            q.dead_letter("s", "g", &batch[0], &format!("r{}", i))
                .await
                .unwrap();
        }
        let entries = q.read_dead_letters("s", 10).await.unwrap();
        assert_eq!(entries.len(), 3);
        // Oldest entries were evicted
        assert_eq!(entries.last().unwrap().reason, "r2");
    }

    #[tokio::test]
    async fn test_stream_trims_to_maxlen() {
        let q = MemoryQueueBackend::new(5, 100);
        for i in 0..10u8 {
            q.push("s", &[i]).await.unwrap();
        }
        let stats = q.stats("s", "g").await.unwrap();
        assert_eq!(stats.length, 5);
    }

    #[tokio::test]
    async fn test_counters_accumulate() {
        let q = backend();
        q.incr_counters(&[("events:commit".into(), 2), ("errors".into(), 1)])
            .await
            .unwrap();
        q.incr_counters(&[("events:commit".into(), 3)]).await.unwrap();
        let counters = q.read_counters().await.unwrap();
        assert_eq!(counters.get("events:commit"), Some(&5));
        assert_eq!(counters.get("errors"), Some(&1));
    }

    #[tokio::test]
    async fn test_broadcast_fanout() {
        let q = backend();
        let mut sub = q.subscribe("events").await.unwrap();
        q.broadcast("events", b"hello").await.unwrap();
        let got = sub.receiver.next().await.unwrap().unwrap();
        assert_eq!(got, b"hello");
    }
}
