//! Data storage layer
//!
//! Infrastructure backends for the indexer:
//! - `queue` - durable work queue (Redis Streams or in-memory) with
//!   consumer groups, claims, dead-letter, counters, and pub/sub fan-out
//! - `postgres` - the relational index store and its repositories
//! - `cache` - TTL-bounded key/value cache (moka or Redis)
//! - `types` - event envelope and record shapes shared across layers

pub mod cache;
pub mod postgres;
pub mod queue;
pub mod types;

pub use cache::{CacheError, CacheService};
pub use postgres::{PostgresError, PostgresService};
pub use queue::{QueueError, QueueService};
