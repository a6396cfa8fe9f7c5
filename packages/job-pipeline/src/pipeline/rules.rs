//! Rule stage of the classifier.
//!
//! Cheap, deterministic checks that run on every message before any AI call:
//! exclusion terms, stated experience, job keywords and entry-level terms.
//! Link and experience extraction live here too, since the fallback path
//! builds its record from these alone.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::error::{PipelineError, Result};
use crate::types::config::RuleConfig;
use crate::types::decision::{ExperienceBand, RejectionReason, RuleRejection};
use crate::types::message::RawMessage;

static URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"https?://[^\s<>\x22{}|\\^`\[\]]+",
        r"(?i)\bwww\.[^\s<>\x22{}|\\^`\[\]]+",
        // Bare domain with a path, e.g. `jobs.co/x` or `forms.gle/abc`.
        r"(?i)\b[a-z0-9][a-z0-9-]*(?:\.[a-z0-9-]+)*\.[a-z]{2,}/[^\s<>\x22{}|\\^`\[\]]*",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static EXPERIENCE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2})\s*(?:(?:-|–|to)\s*(\d{1,2})|\+)?\s*(?:yrs?|years?)\b",
    )
    .ok()
});

/// Result of the rule stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// Goes straight to the uncategorized destination.
    Rejected {
        reason: RejectionReason,
        links: Vec<String>,
    },

    /// Passed every rule; eligible for AI extraction.
    Candidate(Candidate),
}

/// What the rules learned about a message that passed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub experience: ExperienceBand,
    pub links: Vec<String>,
}

/// Compiled [`RuleConfig`].
#[derive(Debug, Clone)]
pub struct RuleEngine {
    job_keywords: Vec<String>,
    exclude: Vec<Regex>,
    entry: Vec<Regex>,
    max_experience_years: u8,
}

impl RuleEngine {
    /// Compile the configured patterns (case-insensitive).
    pub fn new(config: &RuleConfig) -> Result<Self> {
        Ok(Self {
            job_keywords: config.job_keywords.iter().map(|k| k.to_lowercase()).collect(),
            exclude: compile_all(&config.exclude_patterns)?,
            entry: compile_all(&config.entry_patterns)?,
            max_experience_years: config.max_experience_years,
        })
    }

    pub fn evaluate(&self, message: &RawMessage) -> RuleOutcome {
        let text = message.text.as_str();
        let links = extract_links(text, &message.embedded_urls);
        let reject = |rule| RuleOutcome::Rejected {
            reason: RejectionReason::rule(rule),
            links: links.clone(),
        };

        if self.exclude.iter().any(|re| re.is_match(text)) {
            return reject(RuleRejection::SeniorRoleExcluded);
        }

        let stated = parse_experience(text);
        if stated.iter().any(|band| band.max_years() > self.max_experience_years) {
            return reject(RuleRejection::ExperienceAboveBand);
        }

        let lower = text.to_lowercase();
        if !self.job_keywords.iter().any(|k| lower.contains(k.as_str())) {
            return reject(RuleRejection::NoJobKeywords);
        }

        let experience = match stated.first() {
            Some(band) => *band,
            None if self.entry.iter().any(|re| re.is_match(text)) => ExperienceBand::Fresher,
            None => {
                return RuleOutcome::Rejected {
                    reason: RejectionReason::AmbiguousExperience,
                    links,
                }
            }
        };

        RuleOutcome::Candidate(Candidate { experience, links })
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| PipelineError::Config(format!("invalid rule pattern {:?}: {}", p, e)))
        })
        .collect()
}

/// Every experience requirement stated in the text, in order of appearance.
///
/// Understands `0-1 yrs`, `1 to 2 years`, `3+ years` and `2 years`.
pub fn parse_experience(text: &str) -> Vec<ExperienceBand> {
    let Some(re) = EXPERIENCE.as_ref() else {
        return Vec::new();
    };

    re.captures_iter(text)
        .filter_map(|caps| {
            let min: u8 = caps.get(1)?.as_str().parse().ok()?;
            match caps.get(2) {
                Some(max) => Some(ExperienceBand::range(min, max.as_str().parse().ok()?)),
                // `n+` has no upper bound; record the floor.
                None => Some(ExperienceBand::range(min, min)),
            }
        })
        .collect()
}

/// URLs found in the text followed by platform-supplied ones, trailing
/// punctuation trimmed, duplicates removed, first occurrence wins.
pub fn extract_links(text: &str, embedded: &[String]) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for re in URL_PATTERNS.iter() {
        for m in re.find_iter(text) {
            found.push((m.start(), m.as_str().to_string()));
        }
    }
    found.sort_by_key(|(start, _)| *start);

    let mut links: Vec<String> = Vec::new();
    let candidates = found
        .into_iter()
        .map(|(_, url)| url)
        .chain(embedded.iter().cloned());

    for url in candidates {
        let url = url.trim_end_matches(['.', ',', ';', ':', '!', '?', ')']).to_string();
        if url.is_empty() || links.iter().any(|l| covers(l, &url)) {
            continue;
        }
        links.push(url);
    }
    links
}

/// `https://acme.io/x` and `www.acme.io/x` already cover a bare `acme.io/x`.
fn covers(existing: &str, url: &str) -> bool {
    existing == url
        || existing
            .strip_suffix(url)
            .is_some_and(|prefix| prefix.ends_with('/') || prefix.ends_with('.'))
}

/// Merge two link lists, keeping the order of `first` and appending unseen
/// entries of `second`.
pub fn merge_links(first: &[String], second: &[String]) -> Vec<String> {
    let mut merged = first.to_vec();
    for link in second {
        let link = link.trim();
        if !link.is_empty() && !merged.iter().any(|l| l == link) {
            merged.push(link.to_string());
        }
    }
    merged
}
