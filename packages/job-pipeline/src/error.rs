//! Typed errors for the job pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`). Upstream collaborators
//! (transport, AI extractor, record store) all report [`UpstreamError`], which
//! carries the throttle signal the [`RateGovernor`](crate::pipeline::RateGovernor)
//! acts on.

use std::time::Duration;

use thiserror::Error;

use crate::types::config::CallKind;
use crate::types::decision::Destination;
use crate::types::message::ChannelId;

/// Errors reported by external collaborators.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The upstream asked us to back off, optionally for a given duration.
    #[error("throttled by upstream (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    /// Credentials rejected or access to the resource denied.
    #[error("authentication or permission failure: {0}")]
    Auth(String),

    /// The requested channel or destination does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or protocol level failure.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The upstream answered with something we cannot interpret.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The service is switched off or otherwise unreachable.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl UpstreamError {
    /// Throttle signal with an explicit wait.
    pub fn throttled_for(retry_after: Duration) -> Self {
        Self::Throttled {
            retry_after: Some(retry_after),
        }
    }

    /// Whether the governor should retry this error.
    pub fn is_throttle(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    /// Auth and not-found failures will not go away by retrying.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::NotFound(_))
    }
}

/// Outcome of a guarded call that did not succeed.
#[derive(Debug, Error)]
pub enum GovernorError {
    /// The operation kept signalling throttle until the retry budget ran out.
    #[error("{kind} call still throttled after {attempts} attempts")]
    RetriesExhausted { kind: CallKind, attempts: u32 },

    /// The operation failed with a non-throttle error.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl GovernorError {
    /// Whether the failure is a permanent auth/not-found condition.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Upstream(e) => e.is_permanent(),
            Self::RetriesExhausted { .. } => false,
        }
    }
}

/// Errors from the ledger and query side of a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failure (database, file, ...).
    #[error("storage error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A stored row could not be decoded.
    #[error("corrupt row for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Errors that end the iteration of a single channel.
#[derive(Debug, Error)]
pub enum ReadError {
    /// Opening the channel failed.
    #[error("failed to open channel {channel}: {source}")]
    Open {
        channel: ChannelId,
        #[source]
        source: GovernorError,
    },

    /// Reading a page of history failed.
    #[error("failed to read history of {channel}: {source}")]
    History {
        channel: ChannelId,
        #[source]
        source: GovernorError,
    },
}

/// Errors that can occur at the pipeline level.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Guarded upstream call failed.
    #[error("upstream call failed: {0}")]
    Governor(#[from] GovernorError),

    /// Ledger or query store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Channel read failed.
    #[error(transparent)]
    Read(#[from] ReadError),

    /// Not a single configured channel could be read.
    #[error("no channel could be read ({failed} failed)")]
    NoChannelReadable { failed: usize },

    /// A destination was disabled after repeated flush failures.
    #[error("destination {0} disabled after repeated flush failures")]
    DestinationDisabled(Destination),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for upstream collaborator calls.
pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;
