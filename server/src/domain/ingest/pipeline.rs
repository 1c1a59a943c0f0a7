//! Indexer pipeline
//!
//! Consumes the ingest stream in large batches and processes events
//! concurrently inside each batch with bounded parallelism. Each message is
//! acked only after its handler returns success; failed messages stay
//! pending and are recovered by the periodic claim pass, which also moves
//! poison messages to the dead-letter stream once they exceed the
//! configured delivery budget.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::config::{IngestConfig, QueueConfig};
use crate::core::constants::{
    CLAIM_INTERVAL_SECS, CLAIM_MAX_COUNT, CLAIM_MIN_IDLE_MS, CONSUME_BATCH_SIZE,
    CONSUMER_GROUP_INDEXER, PENDING_RETRY_INTERVAL_SECS, QUEUE_BLOCK_MS,
};
use crate::data::queue::{ControlMessage, QueueMessage, QueueService};
use crate::domain::ingest::processor::CommitProcessor;
use crate::domain::metrics::{Metrics, keys};
use crate::utils::retry;

/// Throttle consuming when the pending buffer is this full
const PENDING_HIGH_WATER_NUM: usize = 9;
const PENDING_HIGH_WATER_DEN: usize = 10;

/// How long to back off when the pending buffer is over its high-water mark
const THROTTLE_DELAY_MS: u64 = 200;

pub struct IngestPipeline {
    queue: Arc<QueueService>,
    processor: Arc<CommitProcessor>,
    metrics: Arc<Metrics>,
    max_deliveries: u64,
    max_concurrent: usize,
    pending_high_water: usize,
}

impl IngestPipeline {
    pub fn new(
        queue: Arc<QueueService>,
        processor: Arc<CommitProcessor>,
        metrics: Arc<Metrics>,
        queue_config: &QueueConfig,
        ingest_config: &IngestConfig,
        pending_max_total: usize,
    ) -> Self {
        Self {
            queue,
            processor,
            metrics,
            max_deliveries: queue_config.max_deliveries,
            max_concurrent: ingest_config.max_concurrent_ops,
            pending_high_water: pending_max_total * PENDING_HIGH_WATER_NUM
                / PENDING_HIGH_WATER_DEN,
        }
    }

    /// Spawn one pipeline task. The task with index 0 additionally runs the
    /// periodic claim pass so a fleet of pipelines does not stampede
    /// XPENDING.
    pub fn start(
        self: Arc<Self>,
        index: usize,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        // Unique consumer name: {uuid}:{pid}:{index}
        let consumer = format!("{}:{}:{}", Uuid::new_v4(), std::process::id(), index);

        tokio::spawn(async move {
            tracing::debug!(
                consumer = %consumer,
                group = CONSUMER_GROUP_INDEXER,
                "Ingest pipeline started"
            );

            let mut claim_interval =
                tokio::time::interval(Duration::from_secs(CLAIM_INTERVAL_SECS));
            claim_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            claim_interval.reset(); // skip the immediate first tick

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!(consumer = %consumer, "Ingest pipeline draining");
                            break;
                        }
                    }

                    _ = claim_interval.tick(), if index == 0 => {
                        self.claim_stuck_messages(&consumer).await;
                    }

                    batch = self.queue.consume(
                        CONSUMER_GROUP_INDEXER,
                        &consumer,
                        CONSUME_BATCH_SIZE,
                        QUEUE_BLOCK_MS,
                    ) => {
                        match batch {
                            Ok(batch) if batch.is_empty() => {}
                            Ok(batch) => {
                                self.process_batch(batch).await;
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Queue consume failed; retrying");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                        }

                        // Back-pressure: let the retry pass drain the
                        // pending buffer before taking more work
                        if self.processor.pending_len() > self.pending_high_water {
                            tokio::time::sleep(Duration::from_millis(THROTTLE_DELAY_MS)).await;
                        }
                    }
                }
            }

            tracing::debug!(consumer = %consumer, "Ingest pipeline stopped");
        })
    }

    /// Process a batch concurrently with bounded parallelism, acking each
    /// message individually after its handler succeeds
    async fn process_batch(&self, batch: Vec<QueueMessage>) {
        let batch_size = batch.len();
        if batch_size > 1 {
            tracing::trace!(batch_size, "Processing batch");
        }
        futures::stream::iter(batch)
            .for_each_concurrent(self.max_concurrent, |message| async move {
                self.handle_message(message, false).await;
            })
            .await;
    }

    async fn handle_message(&self, message: QueueMessage, claimed: bool) {
        // Poison check happens on the claim path, where the delivery count
        // reflects every previous failed attempt
        if claimed && message.deliveries >= self.max_deliveries {
            tracing::warn!(
                msg_id = %message.id,
                deliveries = message.deliveries,
                "Message exceeded delivery budget; dead-lettering"
            );
            if let Err(e) = self
                .queue
                .dead_letter(CONSUMER_GROUP_INDEXER, &message, "max deliveries exceeded")
                .await
            {
                tracing::error!(error = %e, msg_id = %message.id, "Dead-letter move failed");
            } else {
                self.metrics.incr(keys::DEAD_LETTERED);
            }
            return;
        }

        let event = match QueueService::decode_event(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                // Undecodable payloads can never succeed; ack to discard
                tracing::error!(error = %e, msg_id = %message.id, "Undecodable message, acking to discard");
                self.ack_with_retry(&message.id).await;
                return;
            }
        };

        match self.processor.process_event(&event).await {
            Ok(()) => {
                self.metrics.incr(keys::PROCESS_OK);
                self.ack_with_retry(&message.id).await;
            }
            Err(e) if e.is_unique_violation() || e.is_foreign_key_violation() => {
                // Idempotence: violation codes count as success for ack
                self.metrics.incr(keys::PROCESS_OK);
                self.ack_with_retry(&message.id).await;
            }
            Err(e) => {
                // Not acked; the claim pass will redeliver it
                self.metrics.incr(keys::PROCESS_ERRORS);
                tracing::warn!(error = %e, msg_id = %message.id, "Event processing failed");
            }
        }
    }

    async fn ack_with_retry(&self, msg_id: &str) {
        let result = retry::retry_with_backoff(
            retry::DEFAULT_MAX_ATTEMPTS,
            retry::DEFAULT_BASE_DELAY_MS,
            || async { self.queue.ack(CONSUMER_GROUP_INDEXER, msg_id).await },
        )
        .await;
        if let Err((e, attempts)) = result {
            tracing::error!(error = %e, msg_id = %msg_id, attempts, "Failed to ack message");
        }
    }

    /// Claim and process messages stuck pending in other consumers
    async fn claim_stuck_messages(&self, consumer: &str) {
        match self
            .queue
            .claim(CONSUMER_GROUP_INDEXER, consumer, CLAIM_MIN_IDLE_MS, CLAIM_MAX_COUNT)
            .await
        {
            Ok(messages) if messages.is_empty() => {
                tracing::trace!("No stuck messages to claim");
            }
            Ok(messages) => {
                let count = messages.len();
                tracing::debug!(count, "Claimed stuck messages");
                for message in messages {
                    self.handle_message(message, true).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to claim stuck messages");
            }
        }
    }

    /// Periodic task retrying pending ops whose parent has since arrived.
    /// Also listens for `retry_pending` control messages for an immediate
    /// pass.
    pub fn start_retry_task(
        processor: Arc<CommitProcessor>,
        queue: Arc<QueueService>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut control = match queue.subscribe_control().await {
                Ok(sub) => sub,
                Err(e) => {
                    tracing::warn!(error = %e, "Control channel unavailable to retry task");
                    crate::data::queue::BroadcastSubscription {
                        receiver: Box::pin(futures::stream::pending()),
                    }
                }
            };

            let mut interval =
                tokio::time::interval(Duration::from_secs(PENDING_RETRY_INTERVAL_SECS));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Pending retry task shutting down");
                            break;
                        }
                    }
                    payload = control.receiver.next() => {
                        if let Some(Ok(payload)) = payload
                            && QueueService::decode_control(&payload)
                                == Some(ControlMessage::RetryPending)
                        {
                            tracing::info!("Pending retry requested via control channel");
                            if let Err(e) = processor.retry_pending().await {
                                tracing::warn!(error = %e, "Pending retry pass failed");
                            }
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = processor.retry_pending().await {
                            tracing::warn!(error = %e, "Pending retry pass failed");
                        }
                    }
                }
            }
        })
    }
}
