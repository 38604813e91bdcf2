use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timed out after {0:?}: {1}")]
    Timeout(std::time::Duration, String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Message suitable for a self-correction prompt: store errors are passed
    /// through verbatim, everything else keeps its category prefix.
    pub fn reason(&self) -> String {
        match self {
            EngineError::Store(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Run a capability call under a per-call deadline.
///
/// An elapsed deadline is reported as [`EngineError::Timeout`] so callers can
/// treat it exactly like any other failure of the same call.
pub async fn with_timeout<F, T>(
    timeout: std::time::Duration,
    what: &str,
    fut: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(timeout, what.to_string())),
    }
}
