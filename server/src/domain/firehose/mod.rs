//! Firehose ingestion
//!
//! `consumer` maintains the relay WebSocket and feeds the queue;
//! `events` decodes relay wire frames into queue events.

pub mod consumer;
pub mod events;

pub use consumer::{FailureKind, FirehoseConsumer, FirehoseError};
