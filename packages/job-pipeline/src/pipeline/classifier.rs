//! Two-stage classifier: rules first, AI extraction for the survivors.
//!
//! ```text
//! RawMessage -> RuleEngine --Rejected--> Uncategorized
//!                    |
//!                Candidate -> JobExtractor (ai-call) --ok--> Relevant(ai-extracted)
//!                                   |
//!                                  err ---------------> Relevant(ai-unavailable-fallback)
//! ```
//!
//! The extraction stage never drops a candidate: any AI failure lands on the
//! fallback branch with the rule-derived fields.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{GovernorError, Result};
use crate::pipeline::governor::RateGovernor;
use crate::pipeline::rules::{merge_links, parse_experience, Candidate, RuleEngine, RuleOutcome};
use crate::traits::extractor::{ExtractedFields, JobExtractor};
use crate::types::config::{CallKind, RuleConfig};
use crate::types::decision::{
    Decision, Enrichment, ExperienceBand, JobRecord, MessageMeta, UncategorizedRecord,
};
use crate::types::message::RawMessage;

/// Result of the extraction stage for one candidate.
#[derive(Debug)]
pub enum ExtractionOutcome {
    /// AI fields merged with the rule fields.
    Enriched(JobRecord),

    /// Rule fields only; `cause` says why the AI stage gave nothing.
    Fallback { record: JobRecord, cause: GovernorError },
}

impl ExtractionOutcome {
    pub fn into_record(self) -> JobRecord {
        match self {
            Self::Enriched(record) => record,
            Self::Fallback { record, .. } => record,
        }
    }
}

/// Classifies messages into relevant jobs and uncategorized posts.
pub struct Classifier<E: JobExtractor> {
    rules: RuleEngine,
    extractor: E,
    governor: Arc<RateGovernor>,
    max_experience_years: u8,
}

impl<E: JobExtractor> Classifier<E> {
    pub fn new(config: &RuleConfig, extractor: E, governor: Arc<RateGovernor>) -> Result<Self> {
        Ok(Self {
            rules: RuleEngine::new(config)?,
            extractor,
            governor,
            max_experience_years: config.max_experience_years,
        })
    }

    /// Run both stages. The AI is only consulted for rule candidates.
    pub async fn classify(&self, message: &RawMessage) -> Decision {
        match self.rules.evaluate(message) {
            RuleOutcome::Rejected { reason, links } => {
                debug!("{} uncategorized: {}", message.key, reason);
                Decision::Uncategorized(UncategorizedRecord {
                    meta: MessageMeta::from_message(message),
                    text: message.text.clone(),
                    links,
                    reason,
                })
            }
            RuleOutcome::Candidate(candidate) => {
                Decision::Relevant(self.extract(message, candidate).await.into_record())
            }
        }
    }

    /// Extraction stage for a rule candidate.
    pub async fn extract(&self, message: &RawMessage, candidate: Candidate) -> ExtractionOutcome {
        let result = self
            .governor
            .guard(CallKind::AiCall, || self.extractor.extract(&message.text))
            .await;

        match result {
            Ok(fields) => ExtractionOutcome::Enriched(self.merge(message, candidate, fields)),
            Err(cause) => {
                warn!("AI extraction failed for {}, using rule fields: {}", message.key, cause);
                ExtractionOutcome::Fallback {
                    record: fallback_record(message, candidate),
                    cause,
                }
            }
        }
    }

    fn merge(&self, message: &RawMessage, candidate: Candidate, fields: ExtractedFields) -> JobRecord {
        // The rules already vetted the band; an AI band outside it is ignored.
        let experience = fields
            .experience
            .as_deref()
            .and_then(parse_band)
            .filter(|band| band.max_years() <= self.max_experience_years)
            .unwrap_or(candidate.experience);

        let mut skills: Vec<String> = Vec::new();
        for skill in fields.skills.iter().filter_map(|s| specified(Some(s))) {
            if !skills.iter().any(|s| s.eq_ignore_ascii_case(&skill)) {
                skills.push(skill);
            }
        }

        JobRecord {
            meta: MessageMeta::from_message(message),
            company: specified(fields.company.as_ref()),
            role: specified(fields.role.as_ref()),
            experience,
            location: specified(fields.location.as_ref()),
            skills,
            salary: specified(fields.salary.as_ref()),
            links: merge_links(&candidate.links, &fields.links),
            text: message.text.clone(),
            enrichment: Enrichment::AiExtracted,
        }
    }
}

/// Record built from the rule stage alone.
pub fn fallback_record(message: &RawMessage, candidate: Candidate) -> JobRecord {
    JobRecord {
        meta: MessageMeta::from_message(message),
        company: None,
        role: None,
        experience: candidate.experience,
        location: None,
        skills: Vec::new(),
        salary: None,
        links: candidate.links,
        text: message.text.clone(),
        enrichment: Enrichment::AiUnavailableFallback,
    }
}

/// Models answer "Not specified" or "N/A" instead of null often enough.
fn specified(value: Option<&String>) -> Option<String> {
    let value = value?.trim();
    let placeholder = ["", "null", "none", "n/a", "na", "not specified", "not mentioned", "unknown"]
        .iter()
        .any(|p| value.eq_ignore_ascii_case(p));
    (!placeholder).then(|| value.to_string())
}

/// Parse an experience string as written by the model.
fn parse_band(raw: &str) -> Option<ExperienceBand> {
    if let Some(band) = ExperienceBand::parse(raw) {
        return Some(band);
    }
    if let Some(band) = parse_experience(raw).first() {
        return Some(*band);
    }

    let lower = raw.to_lowercase();
    ["fresher", "entry", "intern", "new grad", "trainee", "graduate"]
        .iter()
        .any(|term| lower.contains(term))
        .then_some(ExperienceBand::Fresher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::testing::MockExtractor;
    use crate::types::decision::RejectionReason;
    use crate::types::message::ProcessedKey;

    fn classifier(extractor: MockExtractor) -> Classifier<MockExtractor> {
        Classifier::new(&RuleConfig::default(), extractor, Arc::new(RateGovernor::unthrottled()))
            .unwrap()
    }

    fn message(text: &str) -> RawMessage {
        RawMessage::new(ProcessedKey::new("42", 777), text)
    }

    const FRESHER_POST: &str = "Hiring freshers for SDE role, 0-1 yrs exp, apply: jobs.co/x";

    #[tokio::test]
    async fn test_candidate_is_enriched_by_ai() {
        let extractor = MockExtractor::new().with_fields(ExtractedFields {
            company: Some("Acme".into()),
            role: Some("SDE".into()),
            experience: Some("0-1 years".into()),
            location: Some("Not specified".into()),
            skills: vec!["Rust".into(), "rust".into(), "SQL".into()],
            salary: None,
            links: vec!["jobs.co/x".into(), "https://acme.io/apply".into()],
        });
        let classifier = classifier(extractor.clone());

        let decision = classifier.classify(&message(FRESHER_POST)).await;
        let record = decision.as_relevant().expect("relevant");

        assert_eq!(record.enrichment, Enrichment::AiExtracted);
        assert_eq!(record.company.as_deref(), Some("Acme"));
        assert_eq!(record.location, None);
        assert_eq!(record.skills, vec!["Rust", "SQL"]);
        assert_eq!(record.links, vec!["jobs.co/x", "https://acme.io/apply"]);
        assert_eq!(record.experience.to_string(), "0-1");
        assert_eq!(extractor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_ai_failure_takes_fallback_branch() {
        let extractor = MockExtractor::new().failing_with(|| UpstreamError::Malformed("not json".into()));
        let classifier = classifier(extractor);

        let record = classifier.classify(&message(FRESHER_POST)).await;
        let record = record.as_relevant().expect("relevant");

        assert_eq!(record.enrichment, Enrichment::AiUnavailableFallback);
        assert_eq!(record.experience, ExperienceBand::range(0, 1));
        assert_eq!(record.links, vec!["jobs.co/x"]);
        assert_eq!(record.company, None);
    }

    #[tokio::test]
    async fn test_rejected_message_never_reaches_ai() {
        let extractor = MockExtractor::new();
        let classifier = classifier(extractor.clone());

        let decision = classifier
            .classify(&message("Senior Backend Engineer, 5+ years required"))
            .await;

        assert_eq!(decision.as_uncategorized().map(|r| r.reason.tag()), Some("rule-rejected"));
        assert_eq!(extractor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_ambiguous_message_is_uncategorized_without_ai() {
        let extractor = MockExtractor::new();
        let classifier = classifier(extractor.clone());

        let decision = classifier.classify(&message("Hiring Python developers, apply now")).await;

        assert_eq!(
            decision.as_uncategorized().map(|r| r.reason),
            Some(RejectionReason::AmbiguousExperience)
        );
        assert_eq!(extractor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_ai_band_keeps_rule_band() {
        let extractor = MockExtractor::new().with_fields(ExtractedFields {
            experience: Some("some".into()),
            ..Default::default()
        });
        let classifier = classifier(extractor);

        let decision = classifier.classify(&message(FRESHER_POST)).await;
        assert_eq!(decision.as_relevant().map(|r| r.experience), Some(ExperienceBand::range(0, 1)));
    }

    #[test]
    fn test_parse_band_forms() {
        assert_eq!(parse_band("0-1"), Some(ExperienceBand::range(0, 1)));
        assert_eq!(parse_band("1 to 2 years"), Some(ExperienceBand::range(1, 2)));
        assert_eq!(parse_band("Freshers welcome"), Some(ExperienceBand::Fresher));
        assert_eq!(parse_band("Not specified"), None);
    }
}
