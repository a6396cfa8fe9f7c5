//! Configuration types for reading, classification, rate governance and writing.
//!
//! Every field has a default so a partial JSON document can override just the
//! parts an operator wants to tune (keyword lists in particular).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Configuration for a whole pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub reader: ReaderConfig,
    pub rules: RuleConfig,
    pub governor: GovernorConfig,
    pub writer: WriterConfig,
}

impl PipelineConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from a JSON document.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn with_reader(mut self, reader: ReaderConfig) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_rules(mut self, rules: RuleConfig) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_governor(mut self, governor: GovernorConfig) -> Self {
        self.governor = governor;
        self
    }

    pub fn with_writer(mut self, writer: WriterConfig) -> Self {
        self.writer = writer;
        self
    }
}

/// How channel history is read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Entries requested per history call.
    ///
    /// Default: 100.
    pub page_size: usize,

    /// Hard cap on messages read from one channel per run.
    ///
    /// Default: 1000.
    pub max_messages_per_channel: usize,

    /// How far back a run looks when no cursor is given.
    ///
    /// Default: 7 days.
    pub lookback_days: i64,

    /// Messages shorter than this are discarded as noise.
    ///
    /// Default: 20 characters.
    pub min_text_len: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_messages_per_channel: 1000,
            lookback_days: 7,
            min_text_len: 20,
        }
    }
}

impl ReaderConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages_per_channel = max;
        self
    }

    pub fn with_min_text_len(mut self, len: usize) -> Self {
        self.min_text_len = len;
        self
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback_days = days;
        self
    }
}

/// Keyword and pattern lists for the rule stage.
///
/// These are domain data, not algorithm: operators are expected to tune them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Hiring/opening-type terms; a message must contain at least one
    /// (case-insensitive substring match).
    pub job_keywords: Vec<String>,

    /// Regexes for explicit senior/experienced-level terms.
    pub exclude_patterns: Vec<String>,

    /// Regexes for entry-level terms (fresher, intern, new grad, ...).
    pub entry_patterns: Vec<String>,

    /// Upper bound of the target experience band in years. Any stated
    /// figure above this, including the top of a range, rejects the message.
    ///
    /// Default: 2.
    pub max_experience_years: u8,
}

impl Default for RuleConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        Self {
            job_keywords: strings(&[
                "hiring",
                "vacancy",
                "opening",
                "position",
                "requirement",
                "job",
                "opportunity",
                "recruitment",
                "walk-in",
                "walkin",
                "apply",
                "career",
                "placement",
                "interview",
            ]),
            exclude_patterns: strings(&[
                r"\bsenior\b",
                r"\blead\b",
                r"\bmanager\b",
                r"\bexperienced\b",
                r"\bexpert\b",
                r"\bsr\.",
                r"\bprincipal\b",
                r"\barchitect\b",
            ]),
            entry_patterns: strings(&[
                r"\bfreshers?\b",
                r"\bfreshman\b",
                r"\b20\d{2}\s*batch(es)?\b",
                r"\bentry[\s-]*level\b",
                r"\bcampus\b",
                r"\bgraduates?\b",
                r"\bnew\s*grads?\b",
                r"\bintern(s|ship|ships)?\b",
                r"\btrainees?\b",
                r"\b0\s*years?\b",
            ]),
            max_experience_years: 2,
        }
    }
}

impl RuleConfig {
    pub fn with_job_keywords(mut self, words: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.job_keywords = words.into_iter().map(|w| w.into()).collect();
        self
    }

    pub fn with_exclude_patterns(
        mut self,
        patterns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.exclude_patterns = patterns.into_iter().map(|p| p.into()).collect();
        self
    }

    pub fn with_entry_patterns(
        mut self,
        patterns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.entry_patterns = patterns.into_iter().map(|p| p.into()).collect();
        self
    }

    pub fn with_max_experience_years(mut self, years: u8) -> Self {
        self.max_experience_years = years;
        self
    }
}

/// Kind of outbound call; each has its own quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallKind {
    PlatformRead,
    AiCall,
    SheetWrite,
}

impl CallKind {
    pub const ALL: [CallKind; 3] = [CallKind::PlatformRead, CallKind::AiCall, CallKind::SheetWrite];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlatformRead => "platform-read",
            Self::AiCall => "ai-call",
            Self::SheetWrite => "sheet-write",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate and retry policy for one call kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPolicy {
    /// Requests allowed per window.
    pub max_requests: u32,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Minimum gap between two calls in milliseconds.
    pub min_spacing_ms: u64,

    /// Retries after a throttle signal before giving up on the operation.
    pub max_retries: u32,

    /// Wait used when the upstream gives no hint, and the growth step.
    pub base_backoff_ms: u64,

    /// Ceiling for a single backoff sleep.
    pub max_backoff_ms: u64,

    /// Upper bound of random jitter added to each backoff.
    pub jitter_ms: u64,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_ms: 60_000,
            min_spacing_ms: 0,
            max_retries: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            jitter_ms: 500,
        }
    }
}

impl CallPolicy {
    /// Policy with no pacing and millisecond backoffs, for tests and local runs.
    pub fn unthrottled() -> Self {
        Self {
            max_requests: 10_000,
            window_ms: 1_000,
            min_spacing_ms: 0,
            max_retries: 3,
            base_backoff_ms: 1,
            max_backoff_ms: 5,
            jitter_ms: 0,
        }
    }

    pub fn with_rate(mut self, max_requests: u32, window: Duration) -> Self {
        self.max_requests = max_requests;
        self.window_ms = window.as_millis() as u64;
        self
    }

    pub fn with_min_spacing(mut self, spacing: Duration) -> Self {
        self.min_spacing_ms = spacing.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff_ms = base.as_millis() as u64;
        self.max_backoff_ms = max.as_millis() as u64;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter_ms = jitter.as_millis() as u64;
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

/// One policy per call kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub platform_read: CallPolicy,
    pub ai_call: CallPolicy,
    pub sheet_write: CallPolicy,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            // Flood waits on messaging platforms can run to minutes.
            platform_read: CallPolicy {
                max_requests: 30,
                window_ms: 30_000,
                min_spacing_ms: 1_000,
                max_retries: 5,
                base_backoff_ms: 1_000,
                max_backoff_ms: 300_000,
                jitter_ms: 500,
            },
            // Free-tier LLM quotas sit around 15 requests per minute.
            ai_call: CallPolicy {
                max_requests: 15,
                window_ms: 60_000,
                min_spacing_ms: 500,
                max_retries: 3,
                base_backoff_ms: 2_000,
                max_backoff_ms: 60_000,
                jitter_ms: 1_000,
            },
            // Spreadsheet-style stores allow about 60 writes per minute.
            sheet_write: CallPolicy {
                max_requests: 60,
                window_ms: 60_000,
                min_spacing_ms: 1_000,
                max_retries: 4,
                base_backoff_ms: 2_000,
                max_backoff_ms: 64_000,
                jitter_ms: 1_000,
            },
        }
    }
}

impl GovernorConfig {
    /// Same policy for every kind.
    pub fn uniform(policy: CallPolicy) -> Self {
        Self {
            platform_read: policy.clone(),
            ai_call: policy.clone(),
            sheet_write: policy,
        }
    }

    pub fn policy(&self, kind: CallKind) -> &CallPolicy {
        match kind {
            CallKind::PlatformRead => &self.platform_read,
            CallKind::AiCall => &self.ai_call,
            CallKind::SheetWrite => &self.sheet_write,
        }
    }

    pub fn with_policy(mut self, kind: CallKind, policy: CallPolicy) -> Self {
        match kind {
            CallKind::PlatformRead => self.platform_read = policy,
            CallKind::AiCall => self.ai_call = policy,
            CallKind::SheetWrite => self.sheet_write = policy,
        }
        self
    }
}

/// Batching behaviour of the writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Records per append call; a full batch flushes immediately.
    ///
    /// Default: 50.
    pub max_batch_size: usize,

    /// Oldest record may wait this long before a forced flush.
    ///
    /// Default: 30 seconds.
    pub max_batch_age_ms: u64,

    /// Failed flush attempts before a destination is given up for the run.
    ///
    /// Default: 3.
    pub max_flush_retries: u32,

    /// Stored message text is cut to this many characters.
    ///
    /// Default: 10 000.
    pub max_text_len: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_batch_age_ms: 30_000,
            max_flush_retries: 3,
            max_text_len: 10_000,
        }
    }
}

impl WriterConfig {
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_max_batch_age(mut self, age: Duration) -> Self {
        self.max_batch_age_ms = age.as_millis() as u64;
        self
    }

    pub fn with_max_flush_retries(mut self, retries: u32) -> Self {
        self.max_flush_retries = retries;
        self
    }

    pub fn max_batch_age(&self) -> Duration {
        Duration::from_millis(self.max_batch_age_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json(
            r#"{ "rules": { "max_experience_years": 1 }, "writer": { "max_batch_size": 3 } }"#,
        )
        .unwrap();

        assert_eq!(config.rules.max_experience_years, 1);
        assert!(config.rules.job_keywords.contains(&"hiring".to_string()));
        assert_eq!(config.writer.max_batch_size, 3);
        assert_eq!(config.writer.max_flush_retries, 3);
        assert_eq!(config.reader.lookback_days, 7);
    }

    #[test]
    fn test_policy_lookup_by_kind() {
        let config = GovernorConfig::default()
            .with_policy(CallKind::AiCall, CallPolicy::unthrottled().with_max_retries(7));

        assert_eq!(config.policy(CallKind::AiCall).max_retries, 7);
        assert_eq!(config.policy(CallKind::SheetWrite).max_retries, 4);
    }

    #[test]
    fn test_call_kind_serde_names() {
        let json = serde_json::to_string(&CallKind::SheetWrite).unwrap();
        assert_eq!(json, "\"sheet-write\"");
    }
}
