// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "skyline";

/// Config file name
pub const CONFIG_FILE_NAME: &str = "skyline.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "SKYLINE_CONFIG";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "SKYLINE_LOG";

// =============================================================================
// Environment Variables - Ingestion
// =============================================================================

/// Upstream relay WebSocket URL
pub const ENV_RELAY_URL: &str = "RELAY_URL";

/// Enable/disable the firehose consumer
pub const ENV_FIREHOSE_ENABLED: &str = "FIREHOSE_ENABLED";

/// Backfill window in days: 0 disabled, -1 total, >0 cutoff
pub const ENV_BACKFILL_DAYS: &str = "BACKFILL_DAYS";

/// Bounded parallelism inside a consume batch
pub const ENV_MAX_CONCURRENT_OPS: &str = "MAX_CONCURRENT_OPS";

/// Number of queue-consume pipeline tasks per worker
pub const ENV_PARALLEL_PIPELINES: &str = "PARALLEL_PIPELINES";

// =============================================================================
// Environment Variables - Queue Store
// =============================================================================

/// Queue backend (memory or redis)
pub const ENV_QUEUE_BACKEND: &str = "QUEUE_BACKEND";

/// Redis-compatible URL for the queue and cache stores
pub const ENV_REDIS_URL: &str = "REDIS_URL";

/// Deliveries after which a message is moved to the dead-letter stream
pub const ENV_REDIS_MAX_DELIVERIES: &str = "REDIS_MAX_DELIVERIES";

/// Approximate MAXLEN of the dead-letter stream
pub const ENV_REDIS_DEAD_LETTER_MAXLEN: &str = "REDIS_DEAD_LETTER_MAXLEN";

// =============================================================================
// Environment Variables - Index / Cache Stores
// =============================================================================

/// PostgreSQL connection URL
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Cache backend (memory or redis)
pub const ENV_CACHE_BACKEND: &str = "CACHE_BACKEND";

// =============================================================================
// Environment Variables - Pending Buffer
// =============================================================================

pub const ENV_PENDING_MAX_TOTAL: &str = "PENDING_MAX_TOTAL";
pub const ENV_PENDING_MAX_PER_PARENT: &str = "PENDING_MAX_PER_PARENT";
pub const ENV_PENDING_TTL_SECS: &str = "PENDING_TTL_SECS";

// =============================================================================
// Ingestion Defaults
// =============================================================================

/// Default relay endpoint
pub const DEFAULT_RELAY_URL: &str = "wss://bsky.network/xrpc/com.atproto.sync.subscribeRepos";

/// Keep-alive ping interval
pub const FIREHOSE_PING_INTERVAL_SECS: u64 = 30;

/// Reconnect if no pong arrives within this window
pub const FIREHOSE_PONG_TIMEOUT_SECS: u64 = 45;

/// Reconnect if no event of any kind arrives within this window
pub const FIREHOSE_STALL_TIMEOUT_SECS: u64 = 120;

/// Reconnect backoff bounds
pub const FIREHOSE_BACKOFF_BASE_SECS: u64 = 1;
pub const FIREHOSE_BACKOFF_MAX_SECS: u64 = 30;

/// WebSocket connect timeout
pub const FIREHOSE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Name of the ingestion cursor row
pub const FIREHOSE_CURSOR_NAME: &str = "firehose";

/// Cursor writes are coalesced to at most one per this interval
pub const CURSOR_FLUSH_INTERVAL_SECS: u64 = 5;

// =============================================================================
// Queue Defaults
// =============================================================================

/// Ingest stream name
pub const STREAM_INGEST: &str = "ingest";

/// Consumer group for the indexer pipelines
pub const CONSUMER_GROUP_INDEXER: &str = "indexer";

/// Approximate MAXLEN of the ingest stream
pub const DEFAULT_STREAM_MAXLEN: u64 = 500_000;

/// Default deliveries before dead-lettering
pub const DEFAULT_MAX_DELIVERIES: u64 = 10;

/// Default MAXLEN of the dead-letter stream
pub const DEFAULT_DEAD_LETTER_MAXLEN: u64 = 10_000;

/// Queue read block timeout
pub const QUEUE_BLOCK_MS: u64 = 100;

/// Consume batch size (order 300 per the throughput shape)
pub const CONSUME_BATCH_SIZE: usize = 300;

/// Default bounded parallelism inside a batch
pub const DEFAULT_MAX_CONCURRENT_OPS: usize = 5;

/// Default number of pipeline tasks
pub const DEFAULT_PARALLEL_PIPELINES: usize = 5;

/// Interval for claiming stuck messages (seconds)
pub const CLAIM_INTERVAL_SECS: u64 = 30;

/// Minimum idle time before claiming a message (milliseconds)
pub const CLAIM_MIN_IDLE_MS: u64 = 60_000;

/// Maximum number of messages to claim at once
pub const CLAIM_MAX_COUNT: usize = 100;

/// Broadcast channel for in-process event fan-out
pub const CHANNEL_EVENTS: &str = "events";

/// Broadcast channel for operational control messages
pub const CHANNEL_CONTROL: &str = "control";

// =============================================================================
// Pending Buffer Defaults
// =============================================================================

pub const DEFAULT_PENDING_MAX_TOTAL: usize = 10_000;
pub const DEFAULT_PENDING_MAX_PER_PARENT: usize = 100;
pub const DEFAULT_PENDING_TTL_SECS: u64 = 600;
pub const PENDING_SWEEP_INTERVAL_SECS: u64 = 60;
pub const PENDING_RETRY_INTERVAL_SECS: u64 = 30;

// =============================================================================
// Metrics / Health Defaults
// =============================================================================

/// Buffered counters are flushed to the queue store at this cadence
pub const METRICS_FLUSH_INTERVAL_MS: u64 = 500;

/// Readiness fails above this fraction of total memory
pub const DEFAULT_MEMORY_FRACTION: f64 = 0.9;

/// Health probe timeout
pub const HEALTH_PROBE_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// PostgreSQL Defaults
// =============================================================================

pub const POSTGRES_DEFAULT_MAX_CONNECTIONS: u32 = 20;
pub const POSTGRES_DEFAULT_MIN_CONNECTIONS: u32 = 2;
pub const POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const POSTGRES_DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;
pub const POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// Thread Assembly Defaults
// =============================================================================

/// Default ancestor walk depth
pub const THREAD_DEFAULT_PARENT_HEIGHT: usize = 80;

/// Default descendant BFS depth
pub const THREAD_DEFAULT_DEPTH: usize = 6;

// =============================================================================
// Shutdown
// =============================================================================

pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Schema Registry
// =============================================================================

/// Bounded ring of recent validation failures
pub const LEXICON_ERROR_RING_CAPACITY: usize = 1000;
