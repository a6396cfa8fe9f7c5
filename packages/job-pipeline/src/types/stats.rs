//! Run statistics reported at the end of a pipeline execution.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::decision::Destination;
use crate::types::message::ChannelId;

/// A channel whose iteration was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFailure {
    pub channel: ChannelId,

    /// Messages read before the failure.
    pub messages_read: usize,

    pub error: String,
}

/// A batch that could not be written within the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBatch {
    pub destination: Destination,

    /// Records left unwritten (and unmarked).
    pub records: usize,

    pub attempts: u32,

    pub error: String,
}

/// Counters for one pipeline execution. Only the orchestrator mutates these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Messages delivered by the readers
    pub messages_seen: usize,

    pub relevant: usize,
    pub uncategorized: usize,

    /// Already in the ledger (or queued earlier in this run)
    pub skipped: usize,

    /// Too short to be a post; marked without classification
    pub discarded: usize,

    /// Relevant records built without AI enrichment
    pub ai_fallbacks: usize,

    pub errors: usize,

    /// Relevant records per channel title, in first-seen order
    pub relevant_by_source: IndexMap<String, usize>,

    pub failed_channels: Vec<ChannelFailure>,
    pub failed_batches: Vec<FailedBatch>,

    /// Stopped early by cancellation
    pub cancelled: bool,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
            finished_at: None,
            messages_seen: 0,
            relevant: 0,
            uncategorized: 0,
            skipped: 0,
            discarded: 0,
            ai_fallbacks: 0,
            errors: 0,
            relevant_by_source: IndexMap::new(),
            failed_channels: Vec::new(),
            failed_batches: Vec::new(),
            cancelled: false,
        }
    }

    /// Messages that went through classification.
    pub fn classified(&self) -> usize {
        self.relevant + self.uncategorized
    }

    /// Share of classified messages that were relevant, in percent.
    pub fn success_rate(&self) -> f64 {
        match self.classified() {
            0 => 0.0,
            n => self.relevant as f64 * 100.0 / n as f64,
        }
    }

    /// Sources with the most relevant records, highest first.
    pub fn top_sources(&self, limit: usize) -> Vec<(String, usize)> {
        let mut sources: Vec<_> = self
            .relevant_by_source
            .iter()
            .map(|(source, count)| (source.clone(), *count))
            .collect();
        sources.sort_by(|a, b| b.1.cmp(&a.1));
        sources.truncate(limit);
        sources
    }

    /// No failed channels or batches.
    pub fn is_success(&self) -> bool {
        self.failed_channels.is_empty() && self.failed_batches.is_empty()
    }

    pub(crate) fn record_relevant(&mut self, source: &str) {
        self.relevant += 1;
        *self.relevant_by_source.entry(source.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}
