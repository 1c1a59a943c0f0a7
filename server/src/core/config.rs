use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use super::cli::CliConfig;
use super::constants::{
    CONFIG_FILE_NAME, DEFAULT_DEAD_LETTER_MAXLEN, DEFAULT_MAX_CONCURRENT_OPS,
    DEFAULT_MAX_DELIVERIES, DEFAULT_MEMORY_FRACTION, DEFAULT_PARALLEL_PIPELINES,
    DEFAULT_PENDING_MAX_PER_PARENT, DEFAULT_PENDING_MAX_TOTAL, DEFAULT_PENDING_TTL_SECS,
    DEFAULT_RELAY_URL, DEFAULT_STREAM_MAXLEN, POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS,
    POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS, POSTGRES_DEFAULT_MAX_CONNECTIONS,
    POSTGRES_DEFAULT_MAX_LIFETIME_SECS, POSTGRES_DEFAULT_MIN_CONNECTIONS,
    POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS,
};

// =============================================================================
// Backend Enums
// =============================================================================

/// Queue store backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for QueueBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueBackendType::Memory => write!(f, "memory"),
            QueueBackendType::Redis => write!(f, "redis"),
        }
    }
}

/// Cache backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for CacheBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackendType::Memory => write!(f, "memory"),
            CacheBackendType::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// File Config Structs (JSON deserialization)
// =============================================================================

/// Ingestion configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct IngestFileConfig {
    pub relay_url: Option<String>,
    pub firehose_enabled: Option<bool>,
    pub backfill_days: Option<i64>,
    pub max_concurrent_ops: Option<usize>,
    pub parallel_pipelines: Option<usize>,
}

/// Queue configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct QueueFileConfig {
    pub backend: Option<QueueBackendType>,
    pub redis_url: Option<String>,
    pub max_deliveries: Option<u64>,
    pub dead_letter_maxlen: Option<u64>,
    pub stream_maxlen: Option<u64>,
}

/// Index store configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct DatabaseFileConfig {
    pub url: Option<String>,
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
    pub statement_timeout_secs: Option<u64>,
}

/// Cache configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CacheFileConfig {
    pub backend: Option<CacheBackendType>,
    pub redis_url: Option<String>,
    pub max_entries: Option<u64>,
}

/// Pending-buffer configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PendingFileConfig {
    pub max_total: Option<usize>,
    pub max_per_parent: Option<usize>,
    pub ttl_secs: Option<u64>,
}

/// Health configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct HealthFileConfig {
    pub memory_fraction: Option<f64>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub ingest: Option<IngestFileConfig>,
    pub queue: Option<QueueFileConfig>,
    pub database: Option<DatabaseFileConfig>,
    pub cache: Option<CacheFileConfig>,
    pub pending: Option<PendingFileConfig>,
    pub health: Option<HealthFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }
}

// =============================================================================
// Runtime Config Structs (final merged configuration)
// =============================================================================

/// Firehose / ingestion configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub relay_url: String,
    pub firehose_enabled: bool,
    /// 0 = disabled, -1 = total, >0 = cutoff in days
    pub backfill_days: i64,
    pub max_concurrent_ops: usize,
    pub parallel_pipelines: usize,
}

/// Queue store configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub backend: QueueBackendType,
    pub redis_url: Option<String>,
    pub max_deliveries: u64,
    pub dead_letter_maxlen: u64,
    pub stream_maxlen: u64,
}

/// Index store configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub statement_timeout_secs: u64,
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendType,
    pub redis_url: Option<String>,
    pub max_entries: u64,
}

/// Pending-buffer configuration
#[derive(Debug, Clone)]
pub struct PendingConfig {
    pub max_total: usize,
    pub max_per_parent: usize,
    pub ttl_secs: u64,
}

/// Health / readiness configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub memory_fraction: f64,
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub queue: QueueConfig,
    pub database: PostgresConfig,
    pub cache: CacheConfig,
    pub pending: PendingConfig,
    pub health: HealthConfig,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Local directory config OR CLI-specified config path
    /// 3. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let mut file_config = FileConfig::default();

        let overlay_path = if let Some(ref path) = cli.config {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Some(path.clone())
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            file_config = FileConfig::load_from_file(&path)?;
            file_config.warn_unknown_fields();
        }

        let file_ingest = file_config.ingest.unwrap_or_default();
        let file_queue = file_config.queue.unwrap_or_default();
        let file_db = file_config.database.unwrap_or_default();
        let file_cache = file_config.cache.unwrap_or_default();
        let file_pending = file_config.pending.unwrap_or_default();
        let file_health = file_config.health.unwrap_or_default();

        let ingest = IngestConfig {
            relay_url: cli
                .relay_url
                .clone()
                .or(file_ingest.relay_url)
                .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string()),
            firehose_enabled: cli
                .firehose_enabled
                .or(file_ingest.firehose_enabled)
                .unwrap_or(true),
            backfill_days: cli.backfill_days.or(file_ingest.backfill_days).unwrap_or(0),
            max_concurrent_ops: cli
                .max_concurrent_ops
                .or(file_ingest.max_concurrent_ops)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_OPS),
            parallel_pipelines: cli
                .parallel_pipelines
                .or(file_ingest.parallel_pipelines)
                .unwrap_or(DEFAULT_PARALLEL_PIPELINES),
        };

        let queue_backend = cli.queue_backend.or(file_queue.backend).unwrap_or_default();
        let queue = QueueConfig {
            backend: queue_backend,
            redis_url: cli.redis_url.clone().or(file_queue.redis_url),
            max_deliveries: cli
                .max_deliveries
                .or(file_queue.max_deliveries)
                .unwrap_or(DEFAULT_MAX_DELIVERIES),
            dead_letter_maxlen: cli
                .dead_letter_maxlen
                .or(file_queue.dead_letter_maxlen)
                .unwrap_or(DEFAULT_DEAD_LETTER_MAXLEN),
            stream_maxlen: file_queue.stream_maxlen.unwrap_or(DEFAULT_STREAM_MAXLEN),
        };

        let database = PostgresConfig {
            url: cli.database_url.clone().or(file_db.url).unwrap_or_default(),
            max_connections: file_db
                .max_connections
                .unwrap_or(POSTGRES_DEFAULT_MAX_CONNECTIONS),
            min_connections: file_db
                .min_connections
                .unwrap_or(POSTGRES_DEFAULT_MIN_CONNECTIONS),
            acquire_timeout_secs: file_db
                .acquire_timeout_secs
                .unwrap_or(POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout_secs: file_db
                .idle_timeout_secs
                .unwrap_or(POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS),
            max_lifetime_secs: file_db
                .max_lifetime_secs
                .unwrap_or(POSTGRES_DEFAULT_MAX_LIFETIME_SECS),
            statement_timeout_secs: file_db
                .statement_timeout_secs
                .unwrap_or(POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS),
        };

        let cache = CacheConfig {
            backend: cli.cache_backend.or(file_cache.backend).unwrap_or_default(),
            redis_url: cli.redis_url.clone().or(file_cache.redis_url),
            max_entries: file_cache.max_entries.unwrap_or(100_000),
        };

        let pending = PendingConfig {
            max_total: cli
                .pending_max_total
                .or(file_pending.max_total)
                .unwrap_or(DEFAULT_PENDING_MAX_TOTAL),
            max_per_parent: cli
                .pending_max_per_parent
                .or(file_pending.max_per_parent)
                .unwrap_or(DEFAULT_PENDING_MAX_PER_PARENT),
            ttl_secs: cli
                .pending_ttl_secs
                .or(file_pending.ttl_secs)
                .unwrap_or(DEFAULT_PENDING_TTL_SECS),
        };

        let health = HealthConfig {
            memory_fraction: file_health
                .memory_fraction
                .unwrap_or(DEFAULT_MEMORY_FRACTION),
        };

        let config = Self {
            ingest,
            queue,
            database,
            cache,
            pending,
            health,
        };

        config.validate()?;

        tracing::debug!(
            relay_url = %config.ingest.relay_url,
            firehose_enabled = config.ingest.firehose_enabled,
            backfill_days = config.ingest.backfill_days,
            parallel_pipelines = config.ingest.parallel_pipelines,
            queue_backend = %config.queue.backend,
            cache_backend = %config.cache.backend,
            max_deliveries = config.queue.max_deliveries,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        if self.ingest.relay_url.is_empty() {
            anyhow::bail!("Configuration error: relay_url must not be empty");
        }
        if !self.ingest.relay_url.starts_with("ws://") && !self.ingest.relay_url.starts_with("wss://")
        {
            anyhow::bail!(
                "Configuration error: relay_url must be a ws:// or wss:// URL, got {}",
                self.ingest.relay_url
            );
        }
        if self.queue.backend == QueueBackendType::Redis && self.queue.redis_url.is_none() {
            anyhow::bail!("Configuration error: redis_url is required for the redis queue backend");
        }
        if self.cache.backend == CacheBackendType::Redis && self.cache.redis_url.is_none() {
            anyhow::bail!("Configuration error: redis_url is required for the redis cache backend");
        }
        if self.ingest.parallel_pipelines == 0 {
            anyhow::bail!("Configuration error: parallel_pipelines must be at least 1");
        }
        if self.ingest.max_concurrent_ops == 0 {
            anyhow::bail!("Configuration error: max_concurrent_ops must be at least 1");
        }
        if self.queue.max_deliveries == 0 {
            anyhow::bail!("Configuration error: max_deliveries must be at least 1");
        }
        if self.pending.max_per_parent > self.pending.max_total {
            anyhow::bail!(
                "Configuration error: pending.max_per_parent ({}) exceeds pending.max_total ({})",
                self.pending.max_per_parent,
                self.pending.max_total
            );
        }
        if !(0.0..=1.0).contains(&self.health.memory_fraction) {
            anyhow::bail!("Configuration error: health.memory_fraction must be within [0, 1]");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_cli() -> CliConfig {
        CliConfig {
            relay_url: None,
            firehose_enabled: None,
            backfill_days: None,
            max_concurrent_ops: None,
            parallel_pipelines: None,
            queue_backend: None,
            redis_url: None,
            max_deliveries: None,
            dead_letter_maxlen: None,
            database_url: None,
            cache_backend: None,
            pending_max_total: None,
            pending_max_per_parent: None,
            pending_ttl_secs: None,
            config: None,
        }
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::load(&empty_cli()).unwrap();
        assert!(config.ingest.firehose_enabled);
        assert_eq!(config.ingest.backfill_days, 0);
        assert_eq!(config.queue.max_deliveries, 10);
        assert_eq!(config.queue.stream_maxlen, 500_000);
        assert_eq!(config.pending.max_total, 10_000);
        assert_eq!(config.pending.max_per_parent, 100);
        assert_eq!(config.pending.ttl_secs, 600);
        assert_eq!(config.queue.backend, QueueBackendType::Memory);
    }

    #[test]
    fn test_cli_overrides_defaults() {
        let mut cli = empty_cli();
        cli.relay_url = Some("wss://relay.example/xrpc/stream".into());
        cli.backfill_days = Some(-1);
        cli.parallel_pipelines = Some(8);
        let config = AppConfig::load(&cli).unwrap();
        assert_eq!(config.ingest.relay_url, "wss://relay.example/xrpc/stream");
        assert_eq!(config.ingest.backfill_days, -1);
        assert_eq!(config.ingest.parallel_pipelines, 8);
    }

    #[test]
    fn test_redis_queue_requires_url() {
        let mut cli = empty_cli();
        cli.queue_backend = Some(QueueBackendType::Redis);
        assert!(AppConfig::load(&cli).is_err());

        cli.redis_url = Some("redis://localhost:6379".into());
        assert!(AppConfig::load(&cli).is_ok());
    }

    #[test]
    fn test_rejects_non_ws_relay_url() {
        let mut cli = empty_cli();
        cli.relay_url = Some("https://relay.example".into());
        assert!(AppConfig::load(&cli).is_err());
    }

    #[test]
    fn test_rejects_per_parent_cap_above_total() {
        let mut cli = empty_cli();
        cli.pending_max_total = Some(10);
        cli.pending_max_per_parent = Some(100);
        assert!(AppConfig::load(&cli).is_err());
    }

    #[test]
    fn test_file_config_parses_sections() {
        let json = r#"{
            "ingest": {"relay_url": "wss://r.example", "backfill_days": 7},
            "queue": {"backend": "memory", "max_deliveries": 5},
            "pending": {"max_total": 500}
        }"#;
        let parsed: FileConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.ingest.as_ref().unwrap().relay_url.as_deref(),
            Some("wss://r.example")
        );
        assert_eq!(parsed.queue.as_ref().unwrap().max_deliveries, Some(5));
        assert_eq!(parsed.pending.as_ref().unwrap().max_total, Some(500));
    }
}
