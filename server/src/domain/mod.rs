//! Domain layer
//!
//! The indexer's semantics, composed from the data layer:
//! - `lexicon` - schema registry and validation counters
//! - `firehose` - relay WebSocket consumer
//! - `cursor` - resume-position tracking with coalesced writes
//! - `ingest` - queue pipeline, commit processor, pending buffer
//! - `labels` - effective-label replay
//! - `thread` - thread assembly with gate and viewer filtering
//! - `search` - full-text reads
//! - `backfill` - per-user repository replay
//! - `metrics` / `health` - cluster counters and readiness

pub mod backfill;
pub mod cursor;
pub mod firehose;
pub mod health;
pub mod ingest;
pub mod labels;
pub mod lexicon;
pub mod metrics;
pub mod search;
pub mod thread;

pub use cursor::CursorTracker;
pub use health::{FirehoseStatus, HealthService, Readiness};
pub use ingest::{CommitProcessor, IngestPipeline, PendingBuffer};
pub use labels::LabelService;
pub use lexicon::Lexicon;
pub use metrics::Metrics;
pub use search::SearchService;
pub use thread::ThreadAssembler;
