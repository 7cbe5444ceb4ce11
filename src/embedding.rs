//! Embedding provider abstraction, implementations and vector utilities.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]**: the null embedder; ingestion stores chunks
//!   without vectors and semantic search returns nothing.
//! - **[`HashEmbedder`]**: deterministic feature hashing of word tokens.
//!   Needs no network and no model; good for local catalogs and tests.
//! - **[`OpenAiEmbedder`]**: calls an OpenAI-compatible `/embeddings`
//!   endpoint with batching, retry, and backoff.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`] / [`cosine_distance`]
//! - [`VectorEncoding`]: the storage format for vectors, chosen once when
//!   the schema is created (`f32le` BLOB or JSON text)
//!
//! # Retry Strategy
//!
//! The OpenAI-compatible embedder uses exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbeddingConfig, VectorEncodingSetting};

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded next to every stored vector.
    fn model_id(&self) -> &str;
    fn dims(&self) -> usize;
    fn is_enabled(&self) -> bool {
        true
    }
    /// Embed a batch of texts. Returns one vector per input, in order.
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the embedder named by `embedding.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "hash" => {
            let dims = config
                .dims
                .ok_or_else(|| anyhow::anyhow!("embedding.dims required"))?;
            Ok(Arc::new(HashEmbedder::new(dims)))
        }
        "openai" => Ok(Arc::new(OpenAiEmbedder::from_config(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_id(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn encode(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ Feature hashing ============

/// Signed feature hashing over lowercase alphanumeric tokens, L2-normalized.
pub struct HashEmbedder {
    dims: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            model_id: format!("hash-{}", dims.max(1)),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }
        let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut vec {
                *x /= norm;
            }
        }
        vec
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ OpenAI-compatible HTTP ============

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    api_key_env: String,
    batch_size: usize,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required"))?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base.trim_end_matches('/')),
            model,
            dims,
            api_key_env: config.api_key_env.clone(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn embed_batch(&self, api_key: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json);
                    }

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        tracing::warn!(%status, attempt, "embedding request failed, retrying");
                        last_err = Some(anyhow::anyhow!(
                            "Embedding API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429), don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var(&self.api_key_env)
            .with_context(|| format!("{} not set", self.api_key_env))?;

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(&api_key, batch).await?);
        }
        if out.len() != texts.len() {
            bail!(
                "Embedding API returned {} vectors for {} inputs",
                out.len(),
                texts.len()
            );
        }
        Ok(out)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays and returns them in order.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data array"))?;

    data.iter()
        .map(|item| {
            let embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing embedding"))?;
            Ok(embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect())
        })
        .collect()
}

// ============ Vector utilities ============

/// Storage format of chunk vectors, fixed when the schema is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorEncoding {
    /// Little-endian `f32` bytes in a BLOB column.
    F32Le,
    /// JSON array of numbers in a TEXT column.
    Json,
}

/// A vector in its stored form, ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedVector {
    Blob(Vec<u8>),
    Text(String),
}

impl VectorEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorEncoding::F32Le => "f32le",
            VectorEncoding::Json => "json",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "f32le" => Ok(VectorEncoding::F32Le),
            "json" => Ok(VectorEncoding::Json),
            other => bail!("Unknown vector encoding recorded in schema: '{}'", other),
        }
    }

    pub fn encode(&self, vec: &[f32]) -> Result<EncodedVector> {
        Ok(match self {
            VectorEncoding::F32Le => EncodedVector::Blob(vec_to_blob(vec)),
            VectorEncoding::Json => EncodedVector::Text(serde_json::to_string(vec)?),
        })
    }
}

impl From<VectorEncodingSetting> for VectorEncoding {
    fn from(setting: VectorEncodingSetting) -> Self {
        match setting {
            VectorEncodingSetting::F32le => VectorEncoding::F32Le,
            VectorEncodingSetting::Json => VectorEncoding::Json,
        }
    }
}

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance in `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_json_encoding() {
        let encoded = VectorEncoding::Json.encode(&[0.5, -1.0]).unwrap();
        assert_eq!(encoded, EncodedVector::Text("[0.5,-1.0]".to_string()));
        assert_eq!(VectorEncoding::parse("json").unwrap(), VectorEncoding::Json);
        assert!(VectorEncoding::parse("pgvector").is_err());
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_hash_embedder_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let texts = vec![
            "filesystem tools for agents".to_string(),
            "Filesystem TOOLS for agents".to_string(),
            "weather forecast".to_string(),
        ];
        let vecs = embedder.encode(&texts).await.unwrap();
        assert_eq!(vecs.len(), 3);
        assert_eq!(vecs[0].len(), 64);
        assert_eq!(vecs[0], vecs[1]);
        let norm: f32 = vecs[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(cosine_similarity(&vecs[0], &vecs[1]) > cosine_similarity(&vecs[0], &vecs[2]));
        assert_eq!(embedder.model_id(), "hash-64");
    }

    #[tokio::test]
    async fn test_disabled_embedder_refuses() {
        let embedder = DisabledEmbedder;
        assert!(!embedder.is_enabled());
        assert!(embedder.encode(&["x".to_string()]).await.is_err());
    }

    #[test]
    fn test_parse_openai_response() {
        let json = serde_json::json!({
            "data": [{"embedding": [0.1, 0.2]}, {"embedding": [0.3, 0.4]}]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert!((vecs[1][0] - 0.3).abs() < 1e-6);
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }
}
