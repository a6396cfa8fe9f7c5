//! Classifier output - decisions, job records and rejection reasons.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::message::{ProcessedKey, RawMessage};

/// Logical store partition a decision is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Relevant,
    Uncategorized,
}

impl Destination {
    pub const ALL: [Destination; 2] = [Destination::Relevant, Destination::Uncategorized];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relevant => "relevant",
            Self::Uncategorized => "uncategorized",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized experience requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExperienceBand {
    /// Freshers, interns, new grads.
    Fresher,

    /// Inclusive range in whole years.
    Range { min: u8, max: u8 },
}

impl ExperienceBand {
    /// Build a range, swapping the bounds if they arrive reversed.
    pub fn range(a: u8, b: u8) -> Self {
        Self::Range {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Lower bound in years (freshers count as zero).
    pub fn min_years(&self) -> u8 {
        match self {
            Self::Fresher => 0,
            Self::Range { min, .. } => *min,
        }
    }

    /// Upper bound in years.
    pub fn max_years(&self) -> u8 {
        match self {
            Self::Fresher => 0,
            Self::Range { max, .. } => *max,
        }
    }

    /// Parse the rendered form back (`"fresher"`, `"0-1"`, `"2"`).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("fresher") {
            return Some(Self::Fresher);
        }
        match s.split_once('-') {
            Some((a, b)) => Some(Self::range(a.trim().parse().ok()?, b.trim().parse().ok()?)),
            None => {
                let n = s.parse().ok()?;
                Some(Self::range(n, n))
            }
        }
    }
}

impl fmt::Display for ExperienceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresher => f.write_str("fresher"),
            Self::Range { min, max } if min == max => write!(f, "{}", min),
            Self::Range { min, max } => write!(f, "{}-{}", min, max),
        }
    }
}

/// How the fields of a relevant record were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Enrichment {
    /// AI extractor answered and its fields were merged.
    AiExtracted,

    /// AI stage unavailable or unparsable; rule-derived fields only.
    AiUnavailableFallback,
}

impl Enrichment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiExtracted => "ai-extracted",
            Self::AiUnavailableFallback => "ai-unavailable-fallback",
        }
    }
}

impl fmt::Display for Enrichment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule caused a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleRejection {
    /// No hiring/opening-type term at all.
    NoJobKeywords,

    /// Matched an explicit senior/experienced-level term.
    SeniorRoleExcluded,

    /// Stated years of experience exceed the target band.
    ExperienceAboveBand,
}

impl RuleRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoJobKeywords => "no-job-keywords",
            Self::SeniorRoleExcluded => "senior-role-excluded",
            Self::ExperienceAboveBand => "experience-above-band",
        }
    }
}

/// Why a message ended up uncategorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "kebab-case")]
pub enum RejectionReason {
    /// Failed the positive keyword test or matched a negative one.
    RuleRejected { rule: RuleRejection },

    /// Looks like a job post but states no experience number or entry keyword.
    AmbiguousExperience,
}

impl RejectionReason {
    pub fn rule(rule: RuleRejection) -> Self {
        Self::RuleRejected { rule }
    }

    /// Top-level tag (`rule-rejected`, `ambiguous-experience`).
    pub fn tag(&self) -> &'static str {
        match self {
            Self::RuleRejected { .. } => "rule-rejected",
            Self::AmbiguousExperience => "ambiguous-experience",
        }
    }

    /// Most specific label available.
    pub fn detail(&self) -> &'static str {
        match self {
            Self::RuleRejected { rule } => rule.as_str(),
            Self::AmbiguousExperience => "ambiguous-experience",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RuleRejected { rule } => write!(f, "{} ({})", self.tag(), rule.as_str()),
            Self::AmbiguousExperience => f.write_str(self.tag()),
        }
    }
}

/// Message metadata carried into every persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub key: ProcessedKey,

    /// Channel title the message came from
    pub source: String,

    pub sender: String,

    /// When the message was posted
    pub posted_at: DateTime<Utc>,

    /// When the pipeline classified it
    pub classified_at: DateTime<Utc>,
}

impl MessageMeta {
    pub fn from_message(message: &RawMessage) -> Self {
        Self {
            key: message.key.clone(),
            source: message.channel_title.clone(),
            sender: message.sender.clone(),
            posted_at: message.timestamp,
            classified_at: Utc::now(),
        }
    }

    pub fn posted_on(&self) -> NaiveDate {
        self.posted_at.date_naive()
    }
}

/// Structured fields for a relevant entry-level job post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub meta: MessageMeta,
    pub company: Option<String>,
    pub role: Option<String>,
    pub experience: ExperienceBand,
    pub location: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub salary: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    pub text: String,
    pub enrichment: Enrichment,
}

/// A message kept for browsing but not classified as relevant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncategorizedRecord {
    pub meta: MessageMeta,
    pub text: String,
    #[serde(default)]
    pub links: Vec<String>,
    pub reason: RejectionReason,
}

/// Classifier output for one message; also the persisted row shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum Decision {
    Relevant(JobRecord),
    Uncategorized(UncategorizedRecord),
}

impl Decision {
    pub fn destination(&self) -> Destination {
        match self {
            Self::Relevant(_) => Destination::Relevant,
            Self::Uncategorized(_) => Destination::Uncategorized,
        }
    }

    pub fn meta(&self) -> &MessageMeta {
        match self {
            Self::Relevant(r) => &r.meta,
            Self::Uncategorized(r) => &r.meta,
        }
    }

    pub fn key(&self) -> &ProcessedKey {
        &self.meta().key
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Relevant(r) => &r.text,
            Self::Uncategorized(r) => &r.text,
        }
    }

    pub fn links(&self) -> &[String] {
        match self {
            Self::Relevant(r) => &r.links,
            Self::Uncategorized(r) => &r.links,
        }
    }

    pub fn as_relevant(&self) -> Option<&JobRecord> {
        match self {
            Self::Relevant(r) => Some(r),
            Self::Uncategorized(_) => None,
        }
    }

    pub fn as_uncategorized(&self) -> Option<&UncategorizedRecord> {
        match self {
            Self::Relevant(_) => None,
            Self::Uncategorized(r) => Some(r),
        }
    }

    /// Cap the stored text at `max_chars` characters.
    pub fn truncate_text(&mut self, max_chars: usize) {
        let text = match self {
            Self::Relevant(r) => &mut r.text,
            Self::Uncategorized(r) => &mut r.text,
        };
        if let Some((idx, _)) = text.char_indices().nth(max_chars) {
            text.truncate(idx);
        }
    }
}
