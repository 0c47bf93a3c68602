//! The document-understanding service boundary.
//!
//! The orchestrator drives extraction through exactly one operation:
//! [`DocumentModel::generate`] — prompt in, generated text out, with
//! [`ServiceError::Throttled`] as the distinguished rate-limit condition.
//! Everything provider-specific stays behind this trait, so the pipeline is
//! testable with a scripted fake and portable to any provider honoring the
//! contract.
//!
//! The bundled implementation is [`GeminiClient`], a thin reqwest wrapper
//! around the `generateContent` REST endpoint.

use crate::error::ServiceError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// A text-generation capability.
///
/// Implementations must be cheap to share behind an `Arc` and safe to call
/// from many tasks at once; the caller (not the implementation) is
/// responsible for rate-limit admission.
#[async_trait]
pub trait DocumentModel: Send + Sync {
    /// Generate a completion for `prompt`.
    ///
    /// A throttling response from the provider must surface as
    /// [`ServiceError::Throttled`]; any other failure maps to the remaining
    /// variants and is treated as transient by the orchestrator.
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// Google Gemini client over the public REST API.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    const ENDPOINT: &'static str = "https://generativelanguage.googleapis.com/v1beta/models";

    /// Create a client with an explicit API key.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Create a client from the `GEMINI_API_KEY` environment variable.
    pub fn from_env(model: impl Into<String>, timeout_secs: u64) -> Result<Self, ServiceError> {
        let key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ServiceError::Transport("GEMINI_API_KEY is not set in the environment".into())
            })?;
        Self::new(key, model, timeout_secs)
    }

    fn url(&self) -> String {
        format!("{}/{}:generateContent", Self::ENDPOINT, self.model)
    }
}

/// Response subset we care about: first candidate, first text part.
#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl DocumentModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .http
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ServiceError::Throttled { retry_after });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            // Quota exhaustion sometimes arrives as a 5xx/403 with this
            // status string in the body rather than a clean 429.
            if detail.contains("RESOURCE_EXHAUSTED") || detail.contains("Resource has been exhausted")
            {
                return Err(ServiceError::Throttled { retry_after: None });
            }
            return Err(ServiceError::Status {
                status: status.as_u16(),
                detail: truncate(&detail, 200),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ServiceError::EmptyResponse);
        }

        debug!(chars = text.len(), model = %self.model, "generation complete");
        Ok(text)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}\u{2026}", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_includes_model() {
        let client = GeminiClient::new("key", "gemini-1.5-flash", 10).unwrap();
        assert!(client.url().ends_with("gemini-1.5-flash:generateContent"));
    }

    #[test]
    fn response_parsing_joins_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"{\"a\":"},{"text":"1}"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        let text: String = parsed.candidates[0]
            .content
            .parts
            .iter()
            .map(|p| p.text.clone())
            .collect();
        assert_eq!(text, "{\"a\":1}");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = truncate(s, 3);
        assert!(t.chars().count() <= 4);
    }

    #[test]
    fn from_env_fails_without_key() {
        // The variable is intentionally not set in unit tests.
        std::env::remove_var("GEMINI_API_KEY");
        assert!(GeminiClient::from_env("gemini-1.5-flash", 10).is_err());
    }
}
