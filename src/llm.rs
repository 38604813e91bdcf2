use crate::config::LlmConfig;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Text completion capability. Implementations may fail on transport errors;
/// callers apply their own deadlines.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Client for OpenAI-compatible chat completion endpoints (OpenAI and Azure).
#[derive(Clone)]
pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match &self.config.api_version {
            Some(version) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                base, self.config.model, version
            ),
            None => format!("{}/chat/completions", base),
        }
    }

    /// Canned answers used when no API key is configured, keyed off the
    /// response shape each prompt asks for.
    fn offline_response(prompt: &str) -> String {
        if prompt.contains("\"is_complex\"") {
            r#"{"is_complex": false, "reasoning": "Offline mode: every question is answered with a single query.", "sub_queries": []}"#
                .to_string()
        } else if prompt.contains("\"unified_answer\"") {
            r#"{"unified_answer": "Offline mode: results are shown without a generated narrative.", "key_insights": ["Configure an API key to enable generated insights."]}"#
                .to_string()
        } else {
            "SELECT name AS table_name FROM sqlite_master WHERE type = 'table' ORDER BY name"
                .to_string()
        }
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if self.config.is_offline() {
            return Ok(Self::offline_response(prompt));
        }

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": "You are an expert data analyst working against a relational database. Follow the requested output format exactly."},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens
        });

        let request = self.http.post(self.endpoint()).json(&body);
        let request = if self.config.api_version.is_some() {
            request.header("api-key", &self.config.api_key)
        } else {
            request.header("Authorization", format!("Bearer {}", self.config.api_key))
        };

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "LLM API returned an error status");
            return Err(EngineError::Llm(format!("LLM API error {}: {}", status, text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| EngineError::Llm("No content in LLM response".to_string()))?;

        debug!(chars = content.len(), "LLM completion received");
        Ok(content.trim().to_string())
    }
}

/// Remove a surrounding Markdown code fence (```sql, ```json or bare ```).
///
/// Text before the first fence is dropped; text without a fence is returned
/// trimmed.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed.to_string();
    };
    let after_open = &trimmed[open + 3..];
    // Skip the info string (language tag) on the opening fence line.
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let first_line = &after_open[..body_start];
    let body = if first_line.trim().chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        &after_open[body_start..]
    } else {
        after_open
    };
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim().to_string()
}

/// Parse a JSON object out of a model response into `T`.
///
/// Fences are stripped first; if the remainder still does not parse, the
/// outermost `{...}` span is tried before giving up with a parse error.
pub fn parse_json_payload<T: DeserializeOwned>(text: &str) -> Result<T> {
    let stripped = strip_code_fences(text);
    match serde_json::from_str::<T>(&stripped) {
        Ok(value) => Ok(value),
        Err(first_error) => {
            let span = stripped
                .find('{')
                .zip(stripped.rfind('}'))
                .filter(|(start, end)| start < end)
                .map(|(start, end)| &stripped[start..=end]);
            match span {
                Some(inner) => serde_json::from_str::<T>(inner).map_err(|e| {
                    EngineError::Parse(format!("Model response is not the expected JSON: {}", e))
                }),
                None => Err(EngineError::Parse(format!(
                    "Model response is not the expected JSON: {}",
                    first_error
                ))),
            }
        }
    }
}
