//! Embedding provider seam.
//!
//! The coordinator treats embedding failure as a derived-store failure (the
//! write degrades, it does not fail), so providers map their errors to
//! `StoreUnavailable` on the `Embedding` store kind.
//!
//! Two implementations: an OpenAI-compatible HTTP driver for any provider
//! with a `/v1/embeddings` endpoint, and a deterministic local
//! hash-projection embedder used offline and in tests.

use async_trait::async_trait;
use memvault_types::config::EmbeddingConfig;
use memvault_types::{MemvaultError, MemvaultResult, StoreKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

fn embed_err(e: impl std::fmt::Display) -> MemvaultError {
    MemvaultError::StoreUnavailable {
        store: StoreKind::Embedding,
        reason: e.to_string(),
    }
}

/// Trait for turning text into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute the embedding for one text.
    async fn embed(&self, text: &str) -> MemvaultResult<Vec<f32>>;

    /// Dimensionality of produced embeddings.
    fn dimensions(&self) -> usize;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP driver
// ---------------------------------------------------------------------------

/// Driver for any `/v1/embeddings`-shaped endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    dims: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Build from config; the API key is read from the configured env var.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let api_key = if config.api_key_env.is_empty() {
            String::new()
        } else {
            std::env::var(&config.api_key_env).unwrap_or_default()
        };
        if api_key.is_empty() {
            warn!(
                env = %config.api_key_env,
                "no API key found; requests will be sent unauthenticated"
            );
        }
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            dims: config.dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> MemvaultResult<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = EmbedRequest {
            model: &self.model,
            input: text,
        };
        let mut req = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let resp = req.send().await.map_err(embed_err)?;
        let status = resp.status().as_u16();
        if status != 200 {
            let detail = resp.text().await.unwrap_or_default();
            return Err(embed_err(format!("status {status}: {detail}")));
        }
        let parsed: EmbedResponse = resp.json().await.map_err(embed_err)?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| embed_err("empty embedding response"))?;
        debug!(dims = embedding.len(), "text embedded");
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

// ---------------------------------------------------------------------------
// Deterministic local embedder
// ---------------------------------------------------------------------------

/// Hash-projection embedder: each whitespace token is hashed into a bucket
/// with an alternating sign, and the result is L2-normalized.
///
/// Deterministic and dependency-free. Similar texts (shared tokens) land
/// near each other, which is all the coordinator's tests and offline mode
/// need; it is not a substitute for a learned model.
pub struct LocalHashEmbedder {
    dims: usize,
}

impl LocalHashEmbedder {
    /// Create with the given dimensionality.
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

/// FNV-1a, the cheapest stable hash around.
fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for LocalHashEmbedder {
    async fn embed(&self, text: &str) -> MemvaultResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            let hash = fnv1a(&token);
            let bucket = (hash % self.dims as u64) as usize;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Build the provider named in config.
pub fn build_provider(config: &EmbeddingConfig) -> MemvaultResult<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(LocalHashEmbedder::new(config.dimensions))),
        "openai" => Ok(Arc::new(OpenAiEmbedder::from_config(config))),
        other => Err(MemvaultError::Config(format!(
            "unknown embedding provider '{other}' (expected 'local' or 'openai')"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_embedder_deterministic() {
        let embedder = LocalHashEmbedder::new(64);
        let a = embedder.embed("likes green tea").await.unwrap();
        let b = embedder.embed("likes green tea").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_local_embedder_normalized() {
        let embedder = LocalHashEmbedder::new(32);
        let v = embedder.embed("one two three four").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_local_embedder_shared_tokens_closer() {
        let embedder = LocalHashEmbedder::new(128);
        let base = embedder.embed("prefers window seats on flights").await.unwrap();
        let related = embedder.embed("prefers aisle seats on flights").await.unwrap();
        let unrelated = embedder.embed("quarterly revenue projections").await.unwrap();

        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        assert!(dot(&base, &related) > dot(&base, &unrelated));
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedder = LocalHashEmbedder::new(16);
        let v = embedder.embed("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_build_provider_rejects_unknown() {
        let mut config = EmbeddingConfig::default();
        config.provider = "mystery".to_string();
        assert!(build_provider(&config).is_err());

        config.provider = "local".to_string();
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.dimensions(), config.dimensions);
    }
}
