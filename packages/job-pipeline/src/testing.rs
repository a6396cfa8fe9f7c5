//! Testing utilities including mock implementations.
//!
//! These let applications exercise the pipeline without a messaging
//! platform, an AI backend or a real spreadsheet.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{UpstreamError, UpstreamResult};
use crate::traits::{
    extractor::{ExtractedFields, JobExtractor},
    store::RecordStore,
    transport::ChannelTransport,
};
use crate::types::{
    decision::{
        Decision, Destination, Enrichment, ExperienceBand, JobRecord, MessageMeta,
        RejectionReason, RuleRejection, UncategorizedRecord,
    },
    message::{ChannelId, ChannelSession, ProcessedKey, RawEntry, RawMessage, ReadCursor},
};

type ErrorFactory = Arc<dyn Fn() -> UpstreamError + Send + Sync>;

/// History entry posted now.
pub fn entry(id: i64, text: &str) -> RawEntry {
    RawEntry::new(id, Utc::now(), text)
}

/// An AI-enriched relevant record from `channel`.
pub fn relevant_decision(channel: &str, id: i64) -> Decision {
    let message = RawMessage::new(
        ProcessedKey::new(channel, id),
        "Hiring freshers for SDE role, 0-1 yrs exp",
    );
    Decision::Relevant(JobRecord {
        meta: MessageMeta::from_message(&message),
        company: Some("Acme".to_string()),
        role: Some("SDE".to_string()),
        experience: ExperienceBand::range(0, 1),
        location: None,
        skills: vec!["Rust".to_string()],
        salary: None,
        links: vec!["https://acme.io/apply".to_string()],
        text: message.text,
        enrichment: Enrichment::AiExtracted,
    })
}

/// A rule-rejected record from `channel`.
pub fn uncategorized_decision(channel: &str, id: i64) -> Decision {
    let message = RawMessage::new(
        ProcessedKey::new(channel, id),
        "Senior Backend Engineer, 5+ years required",
    );
    Decision::Uncategorized(UncategorizedRecord {
        meta: MessageMeta::from_message(&message),
        text: message.text,
        links: Vec::new(),
        reason: RejectionReason::rule(RuleRejection::SeniorRoleExcluded),
    })
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Default)]
struct MockChannel {
    title: String,
    entries: Vec<RawEntry>,
}

#[derive(Default)]
struct TransportState {
    channels: HashMap<ChannelId, MockChannel>,
    denied: HashSet<ChannelId>,

    /// Successful pages allowed before history reads fail
    fail_after: HashMap<ChannelId, usize>,
    pages_served: HashMap<ChannelId, usize>,

    throttles_left: usize,
    throttle_for: Duration,
    read_delay: Duration,
    read_calls: usize,
    completed_reads: usize,
}

/// In-memory channel transport.
///
/// Clones share state, so a test can keep a handle for assertions after
/// moving one into a reader or pipeline.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<RwLock<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel with its history.
    pub fn with_channel(
        self,
        id: &str,
        title: &str,
        entries: impl IntoIterator<Item = RawEntry>,
    ) -> Self {
        let mut entries: Vec<RawEntry> = entries.into_iter().collect();
        entries.sort_by_key(|e| e.id);
        self.state.write().unwrap().channels.insert(
            ChannelId::new(id),
            MockChannel {
                title: title.to_string(),
                entries,
            },
        );
        self
    }

    /// The next `times` history reads answer with a throttle signal.
    pub fn throttle_reads(self, times: usize, retry_after: Duration) -> Self {
        {
            let mut state = self.state.write().unwrap();
            state.throttles_left = times;
            state.throttle_for = retry_after;
        }
        self
    }

    /// Opening this channel fails with an auth error.
    pub fn deny(self, id: &str) -> Self {
        self.state.write().unwrap().denied.insert(ChannelId::new(id));
        self
    }

    /// History reads on this channel fail after `pages` successful pages.
    pub fn fail_history_after(self, id: &str, pages: usize) -> Self {
        self.state
            .write()
            .unwrap()
            .fail_after
            .insert(ChannelId::new(id), pages);
        self
    }

    /// Every history read takes this long before answering.
    pub fn with_read_delay(self, delay: Duration) -> Self {
        self.state.write().unwrap().read_delay = delay;
        self
    }

    /// Number of `read_history` calls, throttled ones included.
    pub fn read_calls(&self) -> usize {
        self.state.read().unwrap().read_calls
    }

    /// History reads that ran to completion and returned a page.
    pub fn completed_reads(&self) -> usize {
        self.state.read().unwrap().completed_reads
    }
}

#[async_trait]
impl ChannelTransport for MockTransport {
    async fn open(&self, channel: &ChannelId) -> UpstreamResult<ChannelSession> {
        let state = self.state.read().unwrap();
        if state.denied.contains(channel) {
            return Err(UpstreamError::Auth(format!("access to {} denied", channel)));
        }
        state
            .channels
            .get(channel)
            .map(|c| ChannelSession::new(channel.clone(), c.title.clone()))
            .ok_or_else(|| UpstreamError::NotFound(format!("channel {}", channel)))
    }

    async fn read_history(
        &self,
        session: &ChannelSession,
        cursor: Option<ReadCursor>,
        limit: usize,
    ) -> UpstreamResult<Vec<RawEntry>> {
        let delay = self.state.read().unwrap().read_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().unwrap();
        state.read_calls += 1;

        if state.throttles_left > 0 {
            state.throttles_left -= 1;
            return Err(UpstreamError::throttled_for(state.throttle_for));
        }

        let served = state.pages_served.get(&session.channel).copied().unwrap_or(0);
        if state
            .fail_after
            .get(&session.channel)
            .is_some_and(|limit| served >= *limit)
        {
            return Err(UpstreamError::Auth(format!(
                "session on {} revoked",
                session.channel
            )));
        }
        *state.pages_served.entry(session.channel.clone()).or_insert(0) += 1;

        let page: Vec<RawEntry> = state
            .channels
            .get(&session.channel)
            .ok_or_else(|| UpstreamError::NotFound(format!("channel {}", session.channel)))?
            .entries
            .iter()
            .filter(|e| cursor.is_none_or(|c| c.admits(e.id, e.timestamp)))
            .take(limit)
            .cloned()
            .collect();

        state.completed_reads += 1;
        Ok(page)
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// Deterministic AI extractor.
///
/// Returns empty fields unless configured otherwise and counts every call.
#[derive(Clone, Default)]
pub struct MockExtractor {
    fields: Arc<RwLock<ExtractedFields>>,
    failure: Option<ErrorFactory>,
    calls: Arc<RwLock<usize>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call with these fields.
    pub fn with_fields(self, fields: ExtractedFields) -> Self {
        *self.fields.write().unwrap() = fields;
        self
    }

    /// Fail every call with the error built by `make`.
    pub fn failing_with(mut self, make: impl Fn() -> UpstreamError + Send + Sync + 'static) -> Self {
        self.failure = Some(Arc::new(make));
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.read().unwrap()
    }
}

#[async_trait]
impl JobExtractor for MockExtractor {
    async fn extract(&self, _text: &str) -> UpstreamResult<ExtractedFields> {
        *self.calls.write().unwrap() += 1;
        match &self.failure {
            Some(make) => Err(make()),
            None => Ok(self.fields.read().unwrap().clone()),
        }
    }
}

// ============================================================================
// Record stores
// ============================================================================

#[derive(Default)]
struct Appends {
    chunks: Vec<(Destination, Vec<Decision>)>,
    fail_next: usize,
}

/// Record store that keeps every append for inspection.
#[derive(Clone, Default)]
pub struct RecordingStore {
    appends: Arc<RwLock<Appends>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` appends fail with a non-throttle error.
    pub fn fail_next(self, times: usize) -> Self {
        self.appends.write().unwrap().fail_next = times;
        self
    }

    /// Size of each successful append to `destination`, in order.
    pub fn append_sizes(&self, destination: Destination) -> Vec<usize> {
        self.appends
            .read()
            .unwrap()
            .chunks
            .iter()
            .filter(|(d, _)| *d == destination)
            .map(|(_, rows)| rows.len())
            .collect()
    }

    /// All rows written to `destination`, in order.
    pub fn rows(&self, destination: Destination) -> Vec<Decision> {
        self.appends
            .read()
            .unwrap()
            .chunks
            .iter()
            .filter(|(d, _)| *d == destination)
            .flat_map(|(_, rows)| rows.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn append_rows(&self, destination: Destination, rows: &[Decision]) -> UpstreamResult<()> {
        let mut appends = self.appends.write().unwrap();
        if appends.fail_next > 0 {
            appends.fail_next -= 1;
            return Err(UpstreamError::Unavailable("sheet temporarily unavailable".into()));
        }
        appends.chunks.push((destination, rows.to_vec()));
        Ok(())
    }
}

/// Record store whose every append fails.
#[derive(Clone)]
pub struct FailingStore {
    make: ErrorFactory,
    calls: Arc<RwLock<usize>>,
}

impl FailingStore {
    pub fn new(make: impl Fn() -> UpstreamError + Send + Sync + 'static) -> Self {
        Self {
            make: Arc::new(make),
            calls: Arc::new(RwLock::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.read().unwrap()
    }
}

#[async_trait]
impl RecordStore for FailingStore {
    async fn append_rows(&self, _destination: Destination, _rows: &[Decision]) -> UpstreamResult<()> {
        *self.calls.write().unwrap() += 1;
        Err((self.make)())
    }
}
