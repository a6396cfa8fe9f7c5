//! Property tests for the rule stage.

use std::sync::Arc;

use job_pipeline::{
    testing::MockExtractor, Classifier, Decision, ExtractedFields, ProcessedKey, RateGovernor,
    RawMessage, RuleConfig, UpstreamError,
};
use proptest::prelude::*;

fn classify(extractor: &MockExtractor, text: &str) -> Decision {
    let classifier = Classifier::new(
        &RuleConfig::default(),
        extractor.clone(),
        Arc::new(RateGovernor::unthrottled()),
    )
    .unwrap();
    let message = RawMessage::new(ProcessedKey::new("42", 1), text);
    tokio_test::block_on(classifier.classify(&message))
}

proptest! {
    #[test]
    fn senior_posts_never_reach_the_extractor(
        before in "[a-z ]{0,40}",
        after in "[a-z0-9 ]{0,40}",
    ) {
        let extractor = MockExtractor::new();
        let text = format!("{} hiring senior {}", before, after);

        let decision = classify(&extractor, &text);

        prop_assert!(decision.as_uncategorized().is_some());
        prop_assert_eq!(extractor.call_count(), 0);
    }

    #[test]
    fn posts_without_job_terms_never_reach_the_extractor(text in "[qxz ]{20,80}") {
        let extractor = MockExtractor::new();

        let decision = classify(&extractor, &text);

        prop_assert_eq!(
            decision.as_uncategorized().map(|r| r.reason.detail()),
            Some("no-job-keywords")
        );
        prop_assert_eq!(extractor.call_count(), 0);
    }

    #[test]
    fn fresher_candidates_always_stay_relevant(
        company in "[A-Z][bcdfghkmnpqrstvwxz]{2,10}",
        fails in any::<bool>(),
    ) {
        let extractor = if fails {
            MockExtractor::new().failing_with(|| UpstreamError::Malformed("garbage".into()))
        } else {
            MockExtractor::new().with_fields(ExtractedFields {
                company: Some(company.clone()),
                ..Default::default()
            })
        };
        let text = format!("{} is hiring freshers for a trainee role, 0-1 years", company);

        let decision = classify(&extractor, &text);

        prop_assert!(decision.as_relevant().is_some());
        prop_assert_eq!(extractor.call_count(), 1);
    }
}
