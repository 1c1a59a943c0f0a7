use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::{CacheBackendType, QueueBackendType};
use super::constants::{
    ENV_BACKFILL_DAYS, ENV_CACHE_BACKEND, ENV_CONFIG, ENV_DATABASE_URL, ENV_FIREHOSE_ENABLED,
    ENV_MAX_CONCURRENT_OPS, ENV_PARALLEL_PIPELINES, ENV_PENDING_MAX_PER_PARENT,
    ENV_PENDING_MAX_TOTAL, ENV_PENDING_TTL_SECS, ENV_QUEUE_BACKEND, ENV_REDIS_DEAD_LETTER_MAXLEN,
    ENV_REDIS_MAX_DELIVERIES, ENV_REDIS_URL, ENV_RELAY_URL,
};

#[derive(Parser)]
#[command(name = "skyline")]
#[command(version, about = "AT Protocol AppView indexer", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Upstream relay WebSocket URL
    #[arg(long, global = true, env = ENV_RELAY_URL)]
    pub relay_url: Option<String>,

    /// Enable or disable the firehose consumer
    #[arg(long, global = true, env = ENV_FIREHOSE_ENABLED)]
    pub firehose_enabled: Option<bool>,

    /// Backfill window in days (0 = disabled, -1 = total, >0 = cutoff)
    #[arg(long, global = true, env = ENV_BACKFILL_DAYS, allow_hyphen_values = true)]
    pub backfill_days: Option<i64>,

    /// Bounded parallelism inside a consume batch
    #[arg(long, global = true, env = ENV_MAX_CONCURRENT_OPS)]
    pub max_concurrent_ops: Option<usize>,

    /// Number of queue-consume pipeline tasks
    #[arg(long, global = true, env = ENV_PARALLEL_PIPELINES)]
    pub parallel_pipelines: Option<usize>,

    /// Queue backend (memory or redis)
    #[arg(long, global = true, env = ENV_QUEUE_BACKEND, value_parser = parse_queue_backend)]
    pub queue_backend: Option<QueueBackendType>,

    /// Redis-compatible URL (queue streams and cache)
    #[arg(long, global = true, env = ENV_REDIS_URL)]
    pub redis_url: Option<String>,

    /// Deliveries after which a message is dead-lettered
    #[arg(long, global = true, env = ENV_REDIS_MAX_DELIVERIES)]
    pub max_deliveries: Option<u64>,

    /// Approximate MAXLEN of the dead-letter stream
    #[arg(long, global = true, env = ENV_REDIS_DEAD_LETTER_MAXLEN)]
    pub dead_letter_maxlen: Option<u64>,

    /// PostgreSQL connection URL for the index store
    #[arg(long, global = true, env = ENV_DATABASE_URL)]
    pub database_url: Option<String>,

    /// Cache backend (memory or redis)
    #[arg(long, global = true, env = ENV_CACHE_BACKEND, value_parser = parse_cache_backend)]
    pub cache_backend: Option<CacheBackendType>,

    /// Pending buffer: global entry cap
    #[arg(long, global = true, env = ENV_PENDING_MAX_TOTAL)]
    pub pending_max_total: Option<usize>,

    /// Pending buffer: per-parent entry cap
    #[arg(long, global = true, env = ENV_PENDING_MAX_PER_PARENT)]
    pub pending_max_per_parent: Option<usize>,

    /// Pending buffer: entry TTL in seconds
    #[arg(long, global = true, env = ENV_PENDING_TTL_SECS)]
    pub pending_ttl_secs: Option<u64>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Run the indexer (default)
    Start,
    /// Firehose operations
    Firehose {
        #[command(subcommand)]
        command: FirehoseCommands,
    },
    /// Pending-buffer operations
    Pending {
        #[command(subcommand)]
        command: PendingCommands,
    },
    /// Queue operations
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Backfill a single repository into the index
    Backfill {
        /// DID of the repository to backfill
        did: String,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum FirehoseCommands {
    /// Force the running consumer to drop and re-open its connection
    Reconnect,
}

#[derive(Subcommand, Clone, Debug)]
pub enum PendingCommands {
    /// Trigger an immediate retry pass over the pending buffer
    Retry,
}

#[derive(Subcommand, Clone, Debug)]
pub enum QueueCommands {
    /// Print entries from the dead-letter stream
    DeadLetters {
        /// Maximum number of entries to print
        #[arg(long, default_value_t = 50)]
        count: usize,
    },
}

/// CLI configuration extracted from parsed arguments
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub relay_url: Option<String>,
    pub firehose_enabled: Option<bool>,
    pub backfill_days: Option<i64>,
    pub max_concurrent_ops: Option<usize>,
    pub parallel_pipelines: Option<usize>,
    pub queue_backend: Option<QueueBackendType>,
    pub redis_url: Option<String>,
    pub max_deliveries: Option<u64>,
    pub dead_letter_maxlen: Option<u64>,
    pub database_url: Option<String>,
    pub cache_backend: Option<CacheBackendType>,
    pub pending_max_total: Option<usize>,
    pub pending_max_per_parent: Option<usize>,
    pub pending_ttl_secs: Option<u64>,
    pub config: Option<PathBuf>,
}

/// Parse CLI arguments into config and optional command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();

    let config = CliConfig {
        relay_url: cli.relay_url,
        firehose_enabled: cli.firehose_enabled,
        backfill_days: cli.backfill_days,
        max_concurrent_ops: cli.max_concurrent_ops,
        parallel_pipelines: cli.parallel_pipelines,
        queue_backend: cli.queue_backend,
        redis_url: cli.redis_url,
        max_deliveries: cli.max_deliveries,
        dead_letter_maxlen: cli.dead_letter_maxlen,
        database_url: cli.database_url,
        cache_backend: cli.cache_backend,
        pending_max_total: cli.pending_max_total,
        pending_max_per_parent: cli.pending_max_per_parent,
        pending_ttl_secs: cli.pending_ttl_secs,
        config: cli.config,
    };

    (config, cli.command)
}

fn parse_queue_backend(s: &str) -> Result<QueueBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(QueueBackendType::Memory),
        "redis" => Ok(QueueBackendType::Redis),
        _ => Err(format!(
            "Invalid queue backend '{}'. Valid options: memory, redis",
            s
        )),
    }
}

fn parse_cache_backend(s: &str) -> Result<CacheBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(CacheBackendType::Memory),
        "redis" => Ok(CacheBackendType::Redis),
        _ => Err(format!(
            "Invalid cache backend '{}'. Valid options: memory, redis",
            s
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_queue_backend() {
        assert!(matches!(
            parse_queue_backend("redis"),
            Ok(QueueBackendType::Redis)
        ));
        assert!(matches!(
            parse_queue_backend("Memory"),
            Ok(QueueBackendType::Memory)
        ));
        assert!(parse_queue_backend("kafka").is_err());
    }

    #[test]
    fn test_parse_cache_backend() {
        assert!(matches!(
            parse_cache_backend("REDIS"),
            Ok(CacheBackendType::Redis)
        ));
        assert!(parse_cache_backend("memcached").is_err());
    }

    #[test]
    fn test_cli_verifies() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
