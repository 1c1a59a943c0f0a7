//! Queue error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue configuration error: {0}")]
    Config(String),

    #[error("Queue connection error: {0}")]
    Connection(String),

    #[error("Queue store is attached to a read-only replica")]
    ReadOnlyReplica,

    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Subscriber lagged, {0} messages dropped")]
    Lagged(u64),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_replica_display() {
        assert_eq!(
            QueueError::ReadOnlyReplica.to_string(),
            "Queue store is attached to a read-only replica"
        );
    }

    #[test]
    fn test_lagged_display() {
        assert_eq!(
            QueueError::Lagged(7).to_string(),
            "Subscriber lagged, 7 messages dropped"
        );
    }
}
