//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::cli::{
    self, CliConfig, Commands, FirehoseCommands, PendingCommands, QueueCommands,
};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG, FIREHOSE_CURSOR_NAME};
use crate::core::shutdown::ShutdownService;
use crate::data::cache::CacheService;
use crate::data::postgres::PostgresService;
use crate::data::queue::{ControlMessage, QueueService};
use crate::domain::backfill::Backfiller;
use crate::domain::cursor::CursorTracker;
use crate::domain::firehose::FirehoseConsumer;
use crate::domain::health::{FirehoseStatus, HealthService};
use crate::domain::ingest::{CommitProcessor, IngestPipeline, PendingBuffer};
use crate::domain::labels::LabelService;
use crate::domain::lexicon::Lexicon;
use crate::domain::metrics::Metrics;
use crate::domain::search::SearchService;
use crate::domain::thread::ThreadAssembler;

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub postgres: Arc<PostgresService>,
    pub cache: Arc<CacheService>,
    pub queue: Arc<QueueService>,
    pub metrics: Arc<Metrics>,
    pub pending: Arc<PendingBuffer>,
    pub processor: Arc<CommitProcessor>,
    pub cursor: Arc<CursorTracker>,
    pub firehose_status: Arc<FirehoseStatus>,
    pub health: Arc<HealthService>,
    /// Read path, consumed by the external XRPC surface
    pub threads: Arc<ThreadAssembler>,
    pub search: Arc<SearchService>,
    pub labels: Arc<LabelService>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();

        match command {
            Some(Commands::Queue {
                command: QueueCommands::DeadLetters { count },
            }) => {
                return Self::dump_dead_letters(&cli_config, count).await;
            }
            Some(Commands::Firehose {
                command: FirehoseCommands::Reconnect,
            }) => {
                return Self::send_control(&cli_config, ControlMessage::ReconnectFirehose).await;
            }
            Some(Commands::Pending {
                command: PendingCommands::Retry,
            }) => {
                return Self::send_control(&cli_config, ControlMessage::RetryPending).await;
            }
            Some(Commands::Backfill { did }) => {
                return Self::run_backfill(&cli_config, &did).await;
            }
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        Self::start_indexer(app).await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;

        let postgres = Arc::new(
            PostgresService::init(&config.database)
                .await
                .context("Failed to initialize the index store")?,
        );

        let cache = Arc::new(
            CacheService::new(&config.cache)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize cache service: {}", e))?,
        );
        tracing::debug!(backend = cache.backend_name(), "Cache initialized");

        let queue = Arc::new(
            QueueService::from_config(&config.queue)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize queue service: {}", e))?,
        );
        tracing::debug!(backend = queue.backend_name(), "Queue initialized");

        let metrics = Arc::new(Metrics::new(Arc::clone(&queue)));
        let pending = Arc::new(PendingBuffer::new(config.pending.clone()));
        let lexicon = Arc::new(Lexicon::new());

        let processor = Arc::new(CommitProcessor::new(
            Arc::clone(&postgres),
            Arc::clone(&cache),
            Arc::clone(&pending),
            lexicon,
            Arc::clone(&metrics),
        ));

        let cursor = Arc::new(
            CursorTracker::load(Arc::clone(&postgres), FIREHOSE_CURSOR_NAME)
                .await
                .context("Failed to load the ingestion cursor")?,
        );

        let firehose_status = Arc::new(FirehoseStatus::new());
        let health = Arc::new(HealthService::new(
            Arc::clone(&queue),
            Arc::clone(&postgres),
            Arc::clone(&firehose_status),
            config.ingest.firehose_enabled,
            config.health.memory_fraction,
        ));

        let threads = Arc::new(ThreadAssembler::new(
            Arc::clone(&postgres),
            Arc::clone(&cache),
            Arc::clone(&metrics),
        ));
        let search = Arc::new(SearchService::new(Arc::clone(&postgres)));
        let labels = Arc::new(LabelService::new(
            Arc::clone(&postgres),
            Arc::clone(&cache),
        ));

        Ok(Self {
            shutdown: ShutdownService::new(),
            config,
            postgres,
            cache,
            queue,
            metrics,
            pending,
            processor,
            cursor,
            firehose_status,
            health,
            threads,
            search,
            labels,
        })
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_indexer(app: Self) -> Result<()> {
        app.shutdown.install_signal_handlers();
        app.start_background_tasks().await?;

        tracing::info!(
            relay = %app.config.ingest.relay_url,
            firehose = app.config.ingest.firehose_enabled,
            pipelines = app.config.ingest.parallel_pipelines,
            queue = app.queue.backend_name(),
            cache = app.cache.backend_name(),
            "Indexer running"
        );

        // The process runs until a shutdown signal; the read path is a
        // library surface consumed by an external XRPC layer
        app.shutdown.wait().await;
        app.shutdown.shutdown().await;

        // External resources close after the tasks that use them drained
        if let Err(e) = app.cursor.flush().await {
            tracing::warn!(error = %e, "Final cursor flush failed");
        }
        app.metrics.flush().await;
        app.postgres.close().await;

        Ok(())
    }

    pub async fn start_background_tasks(&self) -> Result<()> {
        // Metrics flusher
        self.shutdown
            .register(self.metrics.start_flush_task(self.shutdown.subscribe()))
            .await;

        // Index store health probe
        self.shutdown
            .register(
                self.postgres
                    .start_health_check_task(self.shutdown.subscribe()),
            )
            .await;

        // Cursor write-through
        self.shutdown
            .register(self.cursor.start_flush_task(self.shutdown.subscribe()))
            .await;

        // Pending-buffer TTL sweeper and retry pass
        self.shutdown
            .register(self.pending.start_sweep_task(self.shutdown.subscribe()))
            .await;
        self.shutdown
            .register(IngestPipeline::start_retry_task(
                Arc::clone(&self.processor),
                Arc::clone(&self.queue),
                self.shutdown.subscribe(),
            ))
            .await;

        // Queue-consume pipelines
        let pipeline = Arc::new(IngestPipeline::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.processor),
            Arc::clone(&self.metrics),
            &self.config.queue,
            &self.config.ingest,
            self.config.pending.max_total,
        ));
        for index in 0..self.config.ingest.parallel_pipelines {
            self.shutdown
                .register(Arc::clone(&pipeline).start(index, self.shutdown.subscribe()))
                .await;
        }

        // Firehose consumer
        if self.config.ingest.firehose_enabled {
            let consumer = FirehoseConsumer::new(
                self.config.ingest.clone(),
                Arc::clone(&self.queue),
                Arc::clone(&self.cursor),
                Arc::clone(&self.metrics),
                Arc::clone(&self.firehose_status),
            );
            self.shutdown
                .register(consumer.start(self.shutdown.subscribe()))
                .await;
        } else {
            tracing::info!("Firehose consumer disabled by config");
        }

        tracing::debug!("Background tasks started");
        Ok(())
    }

    // =========================================================================
    // Operational commands
    // =========================================================================

    /// Print the newest dead-letter entries
    async fn dump_dead_letters(cli: &CliConfig, count: usize) -> Result<()> {
        let config = AppConfig::load(cli)?;
        let queue = QueueService::from_config(&config.queue)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to queue store: {}", e))?;

        let entries = queue
            .dead_letters(count)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read dead-letter stream: {}", e))?;

        if entries.is_empty() {
            println!("Dead-letter stream is empty.");
            return Ok(());
        }

        for entry in entries {
            let payload = String::from_utf8_lossy(&entry.payload);
            println!(
                "{}\torig={}\tdeliveries={}\treason={}\n\t{}",
                entry.id, entry.orig_id, entry.deliveries, entry.reason, payload
            );
        }
        Ok(())
    }

    /// Publish a control message for the running indexer
    async fn send_control(cli: &CliConfig, message: ControlMessage) -> Result<()> {
        let config = AppConfig::load(cli)?;
        let queue = QueueService::from_config(&config.queue)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to queue store: {}", e))?;

        queue
            .publish_control(message)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to publish control message: {}", e))?;

        println!("Sent {:?}.", message);
        Ok(())
    }

    /// One-shot per-user backfill
    async fn run_backfill(cli: &CliConfig, did: &str) -> Result<()> {
        let app = Self::init(cli).await?;
        let backfiller = Backfiller::new(
            Arc::clone(&app.processor),
            app.config.ingest.clone(),
        )
        .map_err(|e| anyhow::anyhow!("Failed to build backfiller: {}", e))?;

        let summary = backfiller
            .backfill_actor(did)
            .await
            .map_err(|e| anyhow::anyhow!("Backfill failed: {}", e))?;

        // Flush anything the replayed records buffered
        app.processor.retry_pending().await?;
        app.metrics.flush().await;
        app.postgres.close().await;

        println!(
            "Backfilled {}: {} records indexed, {} skipped.",
            did, summary.indexed, summary.skipped
        );
        Ok(())
    }
}
