//! Entry-Level Job Ingestion Pipeline
//!
//! Reads recent posts from job channels, skips anything already processed,
//! classifies the rest into entry-level job records or uncategorized posts,
//! and appends both to a record store in rate-governed batches.
//!
//! # Pipeline
//!
//! ```text
//! ChannelReader -> dedup -> noise filter -> Classifier -> BatchedWriter
//!      |                                    |   (rules, then AI)     |
//!  platform-read                        ai-call                 sheet-write
//!      \___________________ RateGovernor ___________________________/
//! ```
//!
//! A message counts as processed only once the batch holding its record has
//! been written, so a crash mid-run loses nothing: unwritten messages are
//! simply read again next time.
//!
//! # Usage
//!
//! ```rust,ignore
//! use job_pipeline::{DisabledExtractor, MemoryStore, Pipeline, PipelineConfig};
//! use job_pipeline::transports::ExportTransport;
//! use tokio_util::sync::CancellationToken;
//!
//! let store = MemoryStore::new();
//! let pipeline = Pipeline::new(
//!     PipelineConfig::default(),
//!     ExportTransport::new("./exports"),
//!     DisabledExtractor,
//!     store.clone(),
//!     store.clone(),
//! )?;
//!
//! let stats = pipeline.run(&["OceanOfJobs".into()], &CancellationToken::new()).await?;
//! println!("{} relevant, {} uncategorized", stats.relevant, stats.uncategorized);
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Collaborator boundaries (transport, extractor, stores)
//! - [`types`] - Messages, decisions, configuration, stats and queries
//! - [`pipeline`] - Reader, rules, classifier, governor, writer, orchestrator
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore)
//! - [`transports`] - Channel transports (ExportTransport)
//! - [`ai`] - OpenAI-backed extractor
//! - [`testing`] - Mock implementations for testing

pub mod ai;
pub mod error;
pub mod pipeline;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod transports;
pub mod types;

// Re-export core types at crate root
pub use error::{
    GovernorError, PipelineError, ReadError, Result, StoreError, StoreResult, UpstreamError,
    UpstreamResult,
};
pub use traits::{
    extractor::{DisabledExtractor, ExtractedFields, JobExtractor},
    store::{DedupLedger, RecordQuery, RecordStore},
    transport::ChannelTransport,
};
pub use types::{
    config::{CallKind, CallPolicy, GovernorConfig, PipelineConfig, ReaderConfig, RuleConfig, WriterConfig},
    decision::{
        Decision, Destination, Enrichment, ExperienceBand, JobRecord, MessageMeta,
        RejectionReason, RuleRejection, UncategorizedRecord,
    },
    message::{ChannelId, ChannelSession, MessageId, ProcessedKey, RawEntry, RawMessage, ReadCursor},
    query::{CategoryFilter, DashboardStats, PageRequest, RecordFilter, RecordPage, SourceCount},
    stats::{ChannelFailure, FailedBatch, RunStats},
};

// Re-export pipeline components
pub use pipeline::{
    BatchedWriter, ChannelReader, Classifier, ExtractionOutcome, MessageStream, Pipeline,
    RateGovernor, RuleEngine, RuleOutcome,
};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

pub use ai::OpenAiExtractor;
pub use transports::ExportTransport;
