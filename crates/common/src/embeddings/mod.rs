//! Embedding service abstraction
//!
//! Provides a unified interface for query embedding providers:
//! - OpenAI-compatible HTTP endpoints (text-embedding-3-small, self-hosted gte/bge servers)
//! - Feature hashing (deterministic, offline; used for tests and smoke runs)

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Wrap a query in the instruction format used when the index was built.
pub fn instructed_query(instruction: &str, query: &str) -> String {
    if instruction.trim().is_empty() {
        query.to_string()
    } else {
        format!("Instruct: {}\nQuery: {}", instruction.trim(), query)
    }
}

/// OpenAI-compatible embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    base_url: String,
    timeout: Duration,
    max_elapsed: Duration,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    /// Create a new embedder from configuration
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            timeout,
            // Roughly one initial attempt plus `max_retries` backed-off retries
            max_elapsed: Duration::from_millis(200 * (1 << config.max_retries.min(8)) as u64),
        })
    }

    /// Make request with retry
    async fn request_with_retry(&self, text: &str) -> Result<Vec<f32>> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build();

        retry(policy, || async move {
            self.make_request(text).await.map_err(|e| {
                if e.is_retryable() {
                    tracing::warn!(error = %e, model = %self.model, "Embedding request failed, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    fn transport_error(&self, error: reqwest::Error) -> AppError {
        if error.is_timeout() {
            AppError::EmbeddingTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AppError::HttpClient(error)
        }
    }

    async fn make_request(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));

        let request = OpenAIRequest {
            input: vec![text],
            model: &self.model,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::EmbeddingError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: OpenAIResponse = response.json().await.map_err(|e| {
            AppError::EmbeddingError {
                message: format!("Failed to parse response: {}", e),
            }
        })?;

        result
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| AppError::EmbeddingError {
                message: "Empty response".to_string(),
            })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let result = self.request_with_retry(text).await;
        metrics::record_embedding(start.elapsed().as_secs_f64(), &self.model, result.is_ok());
        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic feature-hashing embedder.
///
/// Every lowercase whitespace token is hashed into one of `dimension`
/// buckets with a signed weight; the vector is L2-normalized. Texts that
/// share tokens land close together, which is all tests and offline
/// runs need.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    /// Embed synchronously; used by snapshot builders in tests as well.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3],
                digest[4], digest[5], digest[6], digest[7],
            ]) as usize % self.dimension;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("Unknown embedding provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("letter of credit").await.unwrap();
        let b = embedder.embed("letter of credit").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_embeds_to_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        let vector = tokio_test::block_on(embedder.embed("   ")).unwrap();
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_instructed_query() {
        assert_eq!(instructed_query("", "bill of lading"), "bill of lading");
        assert_eq!(
            instructed_query("Find passages", "bill of lading"),
            "Instruct: Find passages\nQuery: bill of lading"
        );
    }

    #[tokio::test]
    async fn test_unresponsive_endpoint_times_out() {
        // Connections land in the backlog and never get an answer
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = EmbeddingConfig {
            provider: "openai".into(),
            api_base: Some(format!("http://{}", listener.local_addr().unwrap())),
            timeout_secs: 1,
            max_retries: 0,
            ..EmbeddingConfig::default()
        };
        let embedder = OpenAIEmbedder::new(&config).unwrap();

        match embedder.embed("bill of lading").await {
            Err(err @ AppError::EmbeddingTimeout { .. }) => {
                assert!(err.is_retryable());
                assert!(matches!(err, AppError::EmbeddingTimeout { timeout_ms: 1000 }));
            }
            other => panic!("expected EmbeddingTimeout, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "nope".into(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(create_embedder(&config), Err(AppError::Configuration { .. })));
    }
}
