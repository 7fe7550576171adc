//! Embedding provider trait and implementations.
//!
//! - `OpenAiEmbedding` calls the provider's `/embeddings` endpoint over
//!   HTTP. This is the production backend; the caller owns retry/backoff.
//! - `MockEmbedding` produces deterministic hash-based unit vectors and
//!   counts calls, so tests can assert that unchanged text triggers no
//!   new provider call.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use nadhir_core::config::EmbeddingConfig;
use nadhir_core::error::{NadhirError, Result};

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors. Used for
/// both ingestion (indexing entity text) and retrieval (embedding queries).
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl std::future::Future<Output = Result<Vec<f32>>> + Send;

    /// Return the dimensionality of vectors produced by this provider.
    fn dimensions(&self) -> usize;
}

// ---------------------------------------------------------------------------
// OpenAiEmbedding - remote HTTP provider
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: [&'a str; 1],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding provider backed by an OpenAI-compatible HTTP endpoint.
///
/// Transport, auth, and malformed-response failures map to `Provider`.
/// A response vector of the wrong length maps to `Dimension`; the vector
/// is never truncated or padded. Empty input embeds to a zero vector
/// without a network call.
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl std::fmt::Debug for OpenAiEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedding")
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl OpenAiEmbedding {
    /// Build a provider from config and an explicit API key.
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| NadhirError::Provider(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    /// Build a provider taking the API key from `OPENAI_API_KEY`.
    pub fn from_env(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| NadhirError::Config("OPENAI_API_KEY is not set".to_string()))?;
        Self::new(config, api_key)
    }
}

impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbeddingRequest {
            input: [text],
            model: &self.model,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| NadhirError::Provider(format!("Embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NadhirError::Provider(format!(
                "Embedding request returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| NadhirError::Provider(format!("Malformed embedding response: {e}")))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| NadhirError::Provider("Embedding response had no data".to_string()))?;

        if vector.len() != self.dimension {
            return Err(NadhirError::Dimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        debug!(model = %self.model, chars = text.len(), "Embedded text");
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock provider returning deterministic unit vectors of a chosen dimension.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs. Calls are counted, which lets tests
/// verify that re-ingesting unchanged text performs no provider call.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimension: usize,
    calls: Arc<AtomicUsize>,
}

impl MockEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `embed` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hash_to_vector(text: &str, dimension: usize) -> Vec<f32> {
        let mut result = Vec::with_capacity(dimension);
        for i in 0..dimension {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        // L2-normalize so cosine distances behave like the real provider's.
        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = text.trim();
        if text.is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }
        Ok(Self::hash_to_vector(text, self.dimension))
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedding_dimension() {
        let provider = MockEmbedding::new(16);
        let vec = provider.embed("hello world").await.unwrap();
        assert_eq!(vec.len(), 16);
        assert_eq!(provider.dimensions(), 16);
    }

    #[tokio::test]
    async fn test_mock_embedding_deterministic() {
        let provider = MockEmbedding::new(16);
        let v1 = provider.embed("same text").await.unwrap();
        let v2 = provider.embed("same text").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_different_inputs() {
        let provider = MockEmbedding::new(16);
        let v1 = provider.embed("text one").await.unwrap();
        let v2 = provider.embed("text two").await.unwrap();
        assert_ne!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_empty_is_zero_vector() {
        let provider = MockEmbedding::new(8);
        let vec = provider.embed("   ").await.unwrap();
        assert_eq!(vec, vec![0.0; 8]);
    }

    #[tokio::test]
    async fn test_mock_embedding_counts_calls() {
        let provider = MockEmbedding::new(8);
        assert_eq!(provider.call_count(), 0);
        provider.embed("one").await.unwrap();
        provider.embed("two").await.unwrap();
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_embedding_is_unit_vector() {
        let provider = MockEmbedding::new(32);
        let vec = provider.embed("normalize me").await.unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_openai_from_env_missing_key() {
        // Isolate from the ambient environment.
        std::env::remove_var("OPENAI_API_KEY");
        let result = OpenAiEmbedding::from_env(&EmbeddingConfig::default());
        assert!(matches!(result, Err(NadhirError::Config(_))));
    }
}
