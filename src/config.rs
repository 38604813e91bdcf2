//! Configuration
//!
//! Explicit configuration structures, loaded once at process start from the
//! environment (after `.env` has been read by the binary).

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// API key value that switches the LLM client into offline mode.
pub const DUMMY_API_KEY: &str = "dummy-api-key";

/// Knobs of the query-execution core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Rows per result shown to the synthesizer.
    pub synthesis_sample_rows: usize,
    pub tables_top_k: usize,
    pub examples_top_k: usize,
    /// Deadline for each external capability call.
    #[serde(with = "duration_secs")]
    pub call_timeout: Duration,
    /// Deadline for a whole request, fan-out included.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    pub datasource_filter: Option<String>,
    pub table_filter: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            synthesis_sample_rows: 5,
            tables_top_k: 5,
            examples_top_k: 5,
            call_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(300),
            datasource_filter: None,
            table_filter: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_retries: env_parse("NLQ_MAX_RETRIES", defaults.max_retries)?,
            synthesis_sample_rows: env_parse("NLQ_SAMPLE_ROWS", defaults.synthesis_sample_rows)?,
            tables_top_k: env_parse("NLQ_TABLES_TOP_K", defaults.tables_top_k)?,
            examples_top_k: env_parse("NLQ_EXAMPLES_TOP_K", defaults.examples_top_k)?,
            call_timeout: Duration::from_secs(env_parse(
                "NLQ_CALL_TIMEOUT_SECS",
                defaults.call_timeout.as_secs(),
            )?),
            request_timeout: Duration::from_secs(env_parse(
                "NLQ_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            datasource_filter: env_opt("NLQ_DATASOURCE_FILTER"),
            table_filter: env_opt("NLQ_TABLE_FILTER"),
        })
    }
}

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Set for Azure deployments; switches to the `api-key` header and
    /// deployment-scoped URLs.
    pub api_version: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Model (or Azure deployment) used for retrieval embeddings.
    pub embedding_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: DUMMY_API_KEY.to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_version: None,
            temperature: 0.1,
            max_tokens: 1000,
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let azure_endpoint = env_opt("AZURE_OPENAI_ENDPOINT");
        let api_version = if azure_endpoint.is_some() {
            Some(
                env_opt("AZURE_OPENAI_API_VERSION")
                    .unwrap_or_else(|| "2024-12-01-preview".to_string()),
            )
        } else {
            None
        };

        Ok(Self {
            api_key: env_opt("AZURE_OPENAI_API_KEY")
                .or_else(|| env_opt("OPENAI_API_KEY"))
                .unwrap_or(defaults.api_key),
            base_url: azure_endpoint
                .or_else(|| env_opt("LLM_BASE_URL"))
                .unwrap_or(defaults.base_url),
            model: env_opt("AZURE_OPENAI_DEPLOYMENT_NAME")
                .or_else(|| env_opt("LLM_MODEL"))
                .unwrap_or(defaults.model),
            api_version,
            temperature: env_parse("LLM_TEMPERATURE", defaults.temperature)?,
            max_tokens: env_parse("LLM_MAX_TOKENS", defaults.max_tokens)?,
            embedding_model: env_opt("AZURE_OPENAI_EMBEDDING_DEPLOYMENT")
                .or_else(|| env_opt("EMBEDDING_MODEL"))
                .unwrap_or(defaults.embedding_model),
        })
    }

    pub fn is_offline(&self) -> bool {
        self.api_key == DUMMY_API_KEY
    }
}

/// Process-wide configuration composed of the pieces above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub llm: LlmConfig,
    pub database_path: PathBuf,
    pub metadata_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            engine: EngineConfig::from_env()?,
            llm: LlmConfig::from_env()?,
            database_path: env_opt("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/churn.db")),
            metadata_dir: env_opt("METADATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("metadata")),
            host: env_opt("APP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parse("APP_PORT", 8000u16)?,
            log_level: env_opt("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self, allow_offline: bool) -> Result<()> {
        if self.llm.is_offline() && !allow_offline {
            return Err(EngineError::Config(
                "Missing API key: set OPENAI_API_KEY or AZURE_OPENAI_API_KEY (or pass --offline)"
                    .to_string(),
            ));
        }
        if self.engine.call_timeout.is_zero() {
            return Err(EngineError::Config(
                "NLQ_CALL_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if self.engine.request_timeout < self.engine.call_timeout {
            return Err(EngineError::Config(format!(
                "NLQ_REQUEST_TIMEOUT_SECS ({}s) must be at least NLQ_CALL_TIMEOUT_SECS ({}s)",
                self.engine.request_timeout.as_secs(),
                self.engine.call_timeout.as_secs()
            )));
        }
        Ok(())
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| EngineError::Config(format!("Invalid value for {}: {} ({})", key, raw, e))),
        None => Ok(default),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
