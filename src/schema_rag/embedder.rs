//! Text Embedder
//!
//! Retrieval embeddings come from an OpenAI-compatible `/embeddings`
//! endpoint, or, without an API key, from a deterministic local hashed bag
//! of words plus word bigrams (L2-normalised). The local variant is good
//! enough to rank a few dozen table documents and example questions.

use crate::config::LlmConfig;
use crate::error::{EngineError, Result};
use crate::schema_rag::vector_store::Embedding;
use serde::Deserialize;
use tracing::{debug, warn};

/// Inputs sent per embeddings request.
const API_BATCH_SIZE: usize = 64;

pub const DEFAULT_DIMENSION: usize = 512;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "by", "do", "does", "for", "from", "how", "i", "in",
    "is", "it", "me", "my", "of", "on", "or", "show", "the", "to", "we", "what", "which", "with",
];

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn embed_text(&self, text: &str) -> Embedding {
        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dimension];

        for token in &tokens {
            vector[self.bucket(token)] += 1.0;
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            vector[self.bucket(&bigram)] += 0.5;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }
        vector
    }

    fn bucket(&self, token: &str) -> usize {
        (fnv1a(token.as_bytes()) % self.dimension as u64) as usize
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

/// Client for an OpenAI-compatible embeddings endpoint (OpenAI and Azure).
#[derive(Clone)]
pub struct ApiEmbedder {
    api_key: String,
    base_url: String,
    model: String,
    api_version: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Embedding,
}

impl ApiEmbedder {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.embedding_model.clone(),
            api_version: config.api_version.clone(),
            http: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        match &self.api_version {
            Some(version) => format!(
                "{}/openai/deployments/{}/embeddings?api-version={}",
                self.base_url, self.model, version
            ),
            None => format!("{}/embeddings", self.base_url),
        }
    }

    /// Embed `texts` in request batches; output order matches input order.
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(API_BATCH_SIZE) {
            embeddings.extend(self.embed_batch(batch).await?);
        }
        Ok(embeddings)
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Embedding>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": batch,
        });

        let request = self.http.post(self.endpoint()).json(&body);
        let request = if self.api_version.is_some() {
            request.header("api-key", &self.api_key)
        } else {
            request.header("Authorization", format!("Bearer {}", self.api_key))
        };

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Retrieval(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "Embedding API returned an error status");
            return Err(EngineError::Retrieval(format!("Embedding API error {}: {}", status, text)));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Retrieval(format!("Failed to parse embedding response: {}", e)))?;

        if parsed.data.len() != batch.len() {
            return Err(EngineError::Retrieval(format!(
                "Embedding API returned {} vectors for {} inputs",
                parsed.data.len(),
                batch.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        debug!(inputs = batch.len(), "Embeddings received");
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// The embedder a retriever indexes and searches with.
#[derive(Clone)]
pub enum Embedder {
    Local(HashingEmbedder),
    Api(ApiEmbedder),
}

impl Embedder {
    /// Remote embeddings when an API key is configured, local hashing in
    /// offline mode.
    pub fn from_config(config: &LlmConfig) -> Self {
        if config.is_offline() {
            Embedder::Local(HashingEmbedder::default())
        } else {
            Embedder::Api(ApiEmbedder::new(config))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Embedder::Local(_) => "local",
            Embedder::Api(_) => "api",
        }
    }

    pub async fn embed_text(&self, text: &str) -> Result<Embedding> {
        match self {
            Embedder::Local(local) => Ok(local.embed_text(text)),
            Embedder::Api(api) => api
                .embed_many(&[text.to_string()])
                .await?
                .pop()
                .ok_or_else(|| EngineError::Retrieval("No embedding in response".to_string())),
        }
    }

    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        match self {
            Embedder::Local(local) => Ok(texts.iter().map(|t| local.embed_text(t)).collect()),
            Embedder::Api(api) => api.embed_many(texts).await,
        }
    }
}

impl Default for Embedder {
    fn default() -> Self {
        Embedder::Local(HashingEmbedder::default())
    }
}

/// Lowercased alphanumeric words with stop words removed and a naive plural
/// strip, so "customers" and "customer" land in the same bucket.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .flat_map(|w| {
            // snake_case identifiers also contribute their parts
            let mut words = vec![singular(&w)];
            if w.contains('_') {
                words.extend(w.split('_').filter(|p| !p.is_empty()).map(singular));
            }
            words
        })
        .collect()
}

fn singular(word: &str) -> String {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
