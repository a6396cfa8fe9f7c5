//! OpenAI implementation of the job extractor.
//!
//! Uses chat completions with a `json_schema` response format generated from
//! [`ExtractedFields`], so the model answers with exactly the fields we merge.
//!
//! # Example
//!
//! ```rust,ignore
//! use job_pipeline::ai::OpenAiExtractor;
//!
//! let extractor = OpenAiExtractor::new("sk-...").with_model("gpt-4o-mini");
//! let pipeline = Pipeline::new(config, transport, extractor, store.clone(), store)?;
//! ```

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{UpstreamError, UpstreamResult};
use crate::pipeline::prompts::{format_extract_prompt, EXTRACT_SYSTEM_PROMPT};
use crate::traits::extractor::{ExtractedFields, JobExtractor};

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct StructuredRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-based job field extractor.
#[derive(Clone)]
pub struct OpenAiExtractor {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl OpenAiExtractor {
    /// Create a new extractor with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: SecretString::from(api_key.into()),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Create from environment variable `OPENAI_API_KEY`.
    pub fn from_env() -> UpstreamResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| UpstreamError::Auth("OPENAI_API_KEY not set".into()))?;
        Ok(Self::new(api_key))
    }

    /// Set the chat model (default: gpt-4o-mini).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL (for Azure, proxies, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Get the current model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, text: &str) -> StructuredRequest {
        let schema = schemars::schema_for!(ExtractedFields);

        StructuredRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: EXTRACT_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format_extract_prompt(text),
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "job_fields",
                    strict: false,
                    schema: serde_json::to_value(schema).unwrap_or_default(),
                },
            },
        }
    }
}

/// Map a non-success status to the upstream error taxonomy.
fn status_error(status: StatusCode, retry_after: Option<Duration>, body: String) -> UpstreamError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => UpstreamError::Throttled { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            UpstreamError::Auth(format!("OpenAI returned {}: {}", status, body))
        }
        StatusCode::NOT_FOUND => UpstreamError::NotFound(format!("OpenAI returned 404: {}", body)),
        s if s.is_server_error() => {
            UpstreamError::Unavailable(format!("OpenAI returned {}: {}", status, body))
        }
        _ => UpstreamError::Malformed(format!("OpenAI returned {}: {}", status, body)),
    }
}

/// Parse the assistant content into fields.
///
/// Tolerates a ```json fence around the object, which some models add even
/// with a response format set.
pub fn parse_extraction_response(content: &str) -> UpstreamResult<ExtractedFields> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(body.trim())
        .map_err(|e| UpstreamError::Malformed(format!("invalid extraction JSON: {}", e)))
}

#[async_trait]
impl JobExtractor for OpenAiExtractor {
    async fn extract(&self, text: &str) -> UpstreamResult<ExtractedFields> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.request(text))
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(Box::new(e)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Malformed(e.to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| UpstreamError::Malformed("No response from OpenAI".into()))?;

        debug!("OpenAI extraction response: {} chars", content.len());
        parse_extraction_response(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let fields = parse_extraction_response(
            r#"{"company": "Acme", "role": "SDE", "experience": "0-1 years", "skills": ["Rust"]}"#,
        )
        .unwrap();

        assert_eq!(fields.company.as_deref(), Some("Acme"));
        assert_eq!(fields.skills, vec!["Rust"]);
        assert!(fields.links.is_empty());
    }

    #[test]
    fn test_parse_fenced_json() {
        let fields = parse_extraction_response("```json\n{\"role\": \"Intern\"}\n```").unwrap();
        assert_eq!(fields.role.as_deref(), Some("Intern"));
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        let err = parse_extraction_response("Sorry, I cannot help with that").unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }

    #[test]
    fn test_status_mapping() {
        let throttled = status_error(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(7)),
            String::new(),
        );
        assert!(matches!(
            throttled,
            UpstreamError::Throttled { retry_after: Some(d) } if d == Duration::from_secs(7)
        ));

        assert!(status_error(StatusCode::UNAUTHORIZED, None, String::new()).is_permanent());
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, None, String::new()),
            UpstreamError::Unavailable(_)
        ));
    }

    #[test]
    fn test_request_carries_schema() {
        let extractor = OpenAiExtractor::new("sk-test").with_model("gpt-test");
        let request = serde_json::to_value(extractor.request("Hiring freshers")).unwrap();

        assert_eq!(request["model"], "gpt-test");
        assert_eq!(request["response_format"]["type"], "json_schema");
        assert!(request["response_format"]["json_schema"]["schema"]["properties"]["company"].is_object());
        assert!(request["messages"][1]["content"]
            .as_str()
            .unwrap()
            .contains("Hiring freshers"));
    }
}
