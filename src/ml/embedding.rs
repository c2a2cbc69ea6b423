//! Embedding providers
//!
//! The index only depends on the [`EmbeddingProvider`] trait. Two providers
//! ship with the crate: [`OpenAiEmbedder`] talks to any OpenAI-compatible
//! embeddings endpoint, and [`HashEmbedder`] produces deterministic
//! feature-hashed vectors for offline use and tests.

use crate::config::EmbeddingConfig;
use crate::error::{Result, VedyutError};
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::CreateEmbeddingRequestArgs;
use async_openai::Client;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Embedding vector type
pub type Embedding = Vec<f32>;

/// Something that turns text into fixed-dimension vectors.
///
/// `embed` returns exactly one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    async fn embed_single(&self, text: &str) -> Result<Embedding> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(VedyutError::Embedding(format!(
                "Expected 1 embedding, got {}",
                vectors.len()
            )));
        }
        vectors
            .pop()
            .ok_or_else(|| VedyutError::Embedding("Empty embedding response".to_string()))
    }

    /// Model identifier, used in logs
    fn model_id(&self) -> &str;
}

/// OpenAI-compatible embeddings client with bounded retries
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    max_retries: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let mut openai_config = OpenAIConfig::new();
        if let Some(key) = &config.api_key {
            openai_config = openai_config.with_api_key(key);
        }
        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VedyutError::Config(format!("Failed to build HTTP client: {}", e)))?;

        log::info!("Using embedding model: {}", config.model);

        Ok(Self {
            client: Client::with_config(openai_config).with_http_client(http),
            model: config.model.clone(),
            max_retries: config.max_retries.max(1),
        })
    }

    async fn request(&self, texts: &[String]) -> std::result::Result<Vec<Embedding>, OpenAIError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(texts.to_vec())
            .build()?;

        let mut data = self.client.embeddings().create(request).await?.data;
        data.sort_by_key(|entry| entry.index);
        Ok(data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 0;
        loop {
            match self.request(texts).await {
                Ok(vectors) => {
                    if vectors.len() != texts.len() {
                        return Err(VedyutError::Embedding(format!(
                            "Embedding count mismatch: sent {}, received {}",
                            texts.len(),
                            vectors.len()
                        )));
                    }
                    return Ok(vectors);
                }
                Err(e) if is_transient(&e) && attempt + 1 < self.max_retries => {
                    attempt += 1;
                    let delay = retry_backoff(attempt);
                    log::warn!(
                        "Embedding request failed (attempt {}/{}): {}; retrying in {:?}",
                        attempt,
                        self.max_retries,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(VedyutError::Embedding(format!(
                        "Failed to embed {} text(s) with {}: {}",
                        texts.len(),
                        self.model,
                        e
                    )));
                }
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn is_transient(error: &OpenAIError) -> bool {
    match error {
        OpenAIError::Reqwest(e) => {
            e.is_timeout()
                || e.is_connect()
                || e
                    .status()
                    .map(|s| s.as_u16() == 429 || s.is_server_error())
                    .unwrap_or(false)
        }
        _ => false,
    }
}

fn retry_backoff(attempt: usize) -> Duration {
    let exp = attempt.min(5) as u32;
    Duration::from_millis(500 * (1u64 << exp))
}

/// Default dimension of [`HashEmbedder`] vectors
pub const HASH_EMBEDDING_DIM: usize = 384;

const HASH_SLOTS_PER_TOKEN: usize = 10;

/// Deterministic bag-of-words embedder that needs no network.
///
/// Each lowercased token is hashed and spread over a few dimensions, so texts
/// sharing vocabulary land close together. Vectors are unit length unless the
/// text has no tokens, in which case the zero vector is returned.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(HASH_EMBEDDING_DIM)
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut embedding = vec![0.0f32; self.dimension];

        for token in text
            .split(is_token_boundary)
            .map(|t| t.trim_matches('.'))
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let hash = hasher.finish();

            for j in 0..HASH_SLOTS_PER_TOKEN {
                let idx = (hash.rotate_left((j * 6) as u32) as usize) % self.dimension;
                embedding[idx] += ((hash >> (j * 6)) & 0x3F) as f32 / 64.0 - 0.5;
            }
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-12 {
            for val in &mut embedding {
                *val /= norm;
            }
        }
        embedding
    }
}

// Devanagari vowel signs and virama are marks, not alphanumerics, so
// boundaries are listed explicitly instead.
fn is_token_boundary(c: char) -> bool {
    c.is_whitespace() || (c.is_ascii_punctuation() && c != '.') || matches!(c, '।' | '॥')
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn model_id(&self) -> &str {
        "hash-embedder"
    }
}
