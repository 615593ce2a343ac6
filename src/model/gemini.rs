// SPDX-License-Identifier: MIT
//! HTTP client for the Gemini JSON-mode generation API.
//!
//! One POST per attempt against
//! `{api_base}/v1beta/models/{model}:generateContent`, asking for
//! `application/json` responses. The candidate text is parsed as JSON when
//! possible and returned raw otherwise — shape fixing is the coercion
//! layer's job, not this client's.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::model::{ExpectedShape, ModelClient, ModelError, RetryPolicy};

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

pub struct GeminiClient {
    http: reqwest::Client,
    api_base: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    /// Build a client from config. The API key comes from `GEMINI_API_KEY`.
    pub fn from_env(api_base: &str, model: &str) -> Result<Self, ModelError> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ModelError::Misconfigured(format!("{API_KEY_ENV} is not set"))
            })?;
        Ok(Self {
            // Per-attempt deadlines are enforced by the caller-supplied
            // policy, not a client-wide reqwest timeout.
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, self.model
        )
    }

    async fn attempt(&self, instruction: &str) -> Result<Value, String> {
        let body = json!({
            "contents": [{ "parts": [{ "text": instruction }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
            },
        });

        let response = self
            .http
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(format!("model API returned {status}: {detail}"));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| format!("malformed model API response: {e}"))?;

        Ok(extract_candidate(&envelope))
    }
}

/// Pull the first candidate's text out of the API envelope and parse it.
///
/// The model is asked for JSON but may still return plain text, partial
/// JSON, or nothing. String-encoded JSON is unwrapped; anything else is
/// passed through for the coercion layer to default.
fn extract_candidate(envelope: &Value) -> Value {
    let text = envelope
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str);

    match text {
        Some(text) => serde_json::from_str(text)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        // No candidate text — hand the envelope itself downstream so the
        // diagnostics name what actually came back.
        None => envelope.clone(),
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn invoke(
        &self,
        instruction: &str,
        shape: ExpectedShape,
        retry: &RetryPolicy,
    ) -> Result<Value, ModelError> {
        let total = retry.total_attempts();
        let mut last_error = String::new();

        for attempt in 1..=total {
            debug!(shape = shape.as_str(), attempt, total, "model call");

            let outcome = tokio::time::timeout(retry.timeout, self.attempt(instruction)).await;
            match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => last_error = e,
                Err(_) => {
                    last_error = format!("attempt timed out after {:?}", retry.timeout);
                }
            }

            warn!(
                shape = shape.as_str(),
                attempt,
                error = %last_error,
                "model attempt failed"
            );
            if attempt < total {
                tokio::time::sleep(retry.backoff_for(attempt)).await;
            }
        }

        Err(ModelError::Exhausted {
            attempts: total,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_text_parsed_as_json() {
        let envelope = json!({
            "candidates": [{ "content": { "parts": [{
                "text": "{\"project_name\":\"demo\",\"files\":[]}"
            }]}}]
        });
        let value = extract_candidate(&envelope);
        assert_eq!(value["project_name"], "demo");
    }

    #[test]
    fn non_json_candidate_passes_through_as_string() {
        let envelope = json!({
            "candidates": [{ "content": { "parts": [{ "text": "not json" }]}}]
        });
        assert_eq!(extract_candidate(&envelope), Value::String("not json".into()));
    }

    #[test]
    fn missing_candidate_returns_envelope() {
        let envelope = json!({ "error": { "message": "quota" } });
        let value = extract_candidate(&envelope);
        assert_eq!(value["error"]["message"], "quota");
    }
}
