//! AI extractor trait for structured job field extraction.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{UpstreamError, UpstreamResult};

/// Structured fields returned by an AI extractor.
///
/// Every field is optional: a model that cannot find a salary should say so
/// with `null` rather than invent one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedFields {
    /// Hiring company name
    #[serde(default)]
    pub company: Option<String>,

    /// Role or position title
    #[serde(default)]
    pub role: Option<String>,

    /// Experience requirement as written, e.g. "0-1 years" or "fresher"
    #[serde(default)]
    pub experience: Option<String>,

    /// Work location, "remote" included
    #[serde(default)]
    pub location: Option<String>,

    /// Required skills in the order they appear
    #[serde(default)]
    pub skills: Vec<String>,

    /// Salary or stipend text
    #[serde(default)]
    pub salary: Option<String>,

    /// Application or detail links
    #[serde(default)]
    pub links: Vec<String>,
}

/// AI-assisted field extraction.
///
/// Failures of any kind (rate limit, transport, malformed response) are
/// mapped by the classifier to its rule-only fallback.
#[async_trait]
pub trait JobExtractor: Send + Sync {
    /// Extract job fields from a message body.
    async fn extract(&self, text: &str) -> UpstreamResult<ExtractedFields>;
}

#[async_trait]
impl<E: JobExtractor + ?Sized> JobExtractor for &E {
    async fn extract(&self, text: &str) -> UpstreamResult<ExtractedFields> {
        (**self).extract(text).await
    }
}

#[async_trait]
impl<E: JobExtractor + ?Sized> JobExtractor for std::sync::Arc<E> {
    async fn extract(&self, text: &str) -> UpstreamResult<ExtractedFields> {
        (**self).extract(text).await
    }
}

/// Extractor used when no AI backend is configured.
///
/// Always unavailable, so every candidate takes the fallback path.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledExtractor;

#[async_trait]
impl JobExtractor for DisabledExtractor {
    async fn extract(&self, _text: &str) -> UpstreamResult<ExtractedFields> {
        Err(UpstreamError::Unavailable("AI extraction disabled".to_string()))
    }
}
