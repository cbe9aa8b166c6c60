//! Embedding provider implementations.

use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for services that turn text into fixed-dimension vectors.
///
/// Implementations must be deterministic enough that repeated calls on
/// identical text are cache-equivalent; the engine's content-addressed cache
/// relies on this.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts; output order matches input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Dimension of the vectors this provider produces.
    fn dimension(&self) -> usize;

    /// Name/identifier of this provider, for logs and statistics.
    fn provider_name(&self) -> &str;
}

/// Configuration for an OpenAI-compatible embeddings endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpProviderConfig {
    /// Base URL of the API, e.g. `https://api.openai.com/v1`.
    pub api_base: String,
    /// Bearer token for the API.
    pub api_key: String,
    /// Embedding model name, e.g. `text-embedding-3-small`.
    pub model: String,
    /// Expected embedding dimension; responses of any other length error.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_dimension() -> usize {
    1536
}

fn default_timeout_secs() -> u64 {
    30
}

/// Embedding provider backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbeddingProvider {
    config: HttpProviderConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(EmbedError::invalid_config("api_key must not be empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbedError::provider(e.to_string()))?;
        Ok(Self { config, client })
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.api_base.trim_end_matches('/'));
        tracing::debug!("requesting {} embeddings from {url}", input.len());

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&EmbeddingsRequest {
                model: &self.config.model,
                input,
            })
            .send()
            .await
            .map_err(|e| EmbedError::provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbedError::provider(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        let mut body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::provider(e.to_string()))?;

        if body.data.len() != input.len() {
            return Err(EmbedError::provider(format!(
                "expected {} embeddings, got {}",
                input.len(),
                body.data.len()
            )));
        }
        body.data.sort_by_key(|entry| entry.index);

        let mut vectors = Vec::with_capacity(body.data.len());
        for entry in body.data {
            if entry.embedding.len() != self.config.dimension {
                return Err(EmbedError::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: entry.embedding.len(),
                });
            }
            vectors.push(entry.embedding);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = [text.to_string()];
        self.request(&input)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::provider("no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn provider_name(&self) -> &str {
        "openai-compatible"
    }
}

/// Deterministic provider for tests and offline development.
///
/// Vectors derive from a hash of the input text, so identical text always
/// embeds identically. Every call is recorded, specific responses can be
/// preset, and the next N calls can be told to fail to exercise retry
/// handling.
pub struct MockEmbeddingProvider {
    dimension: usize,
    responses: Mutex<HashMap<String, Vec<f32>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
    failures_remaining: AtomicUsize,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            responses: Mutex::new(HashMap::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            failures_remaining: AtomicUsize::new(0),
        }
    }

    /// Preset the vector returned for `text`.
    ///
    /// # Panics
    ///
    /// Panics if `vector` does not match the provider dimension.
    pub fn with_response(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimension, "preset vector dimension");
        self.responses.lock().unwrap().insert(text.into(), vector);
        self
    }

    /// Make the next `n` calls fail with a provider error.
    pub fn fail_times(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of `embed` calls observed so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn hashed_vector(&self, text: &str) -> Vec<f32> {
        let hash = blake3::hash(text.as_bytes());
        let bytes = hash.as_bytes();
        (0..self.dimension)
            .map(|i| (bytes[i % 32] as f32 / 255.0) * 2.0 - 1.0)
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.lock().unwrap().push(text.to_string());

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(EmbedError::provider("simulated provider outage"));
        }

        if let Some(vector) = self.responses.lock().unwrap().get(text) {
            return Ok(vector.clone());
        }
        Ok(self.hashed_vector(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_is_deterministic() {
        let provider = MockEmbeddingProvider::new(8);

        let a = provider.embed("address update").await.unwrap();
        let b = provider.embed("address update").await.unwrap();
        let c = provider.embed("card dispute").await.unwrap();

        assert_eq!(a.len(), 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_provider_preset_and_failures() {
        let provider =
            MockEmbeddingProvider::new(3).with_response("pinned", vec![1.0, 0.0, 0.0]);

        provider.fail_times(1);
        assert!(provider.embed("pinned").await.is_err());
        assert_eq!(provider.embed("pinned").await.unwrap(), vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_batch_order_matches_input() {
        let provider = MockEmbeddingProvider::new(4);
        let texts = vec!["one".to_string(), "two".to_string(), "one".to_string()];

        let vectors = provider.embed_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[2]);
        assert_ne!(vectors[0], vectors[1]);
    }

    #[test]
    fn test_http_provider_rejects_empty_key() {
        let config = HttpProviderConfig {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            timeout_secs: 30,
        };
        assert!(HttpEmbeddingProvider::new(config).is_err());
    }
}
