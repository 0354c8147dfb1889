use crate::error::{Result, VectorStoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_HASH_DIMENSION: usize = 384;
pub const HASH_MODEL_ID: &str = "hash-embedding-v1";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Source of fixed-dimension text embeddings.
///
/// `model_id` and `dimension` are part of every cache key, so two providers
/// must not share a model id unless they produce identical vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Outcome of embedding one text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Embedding {
    Vector(Vec<f32>),
    /// Provider failed; the placeholder is all zeros of `dimension`
    Degraded { dimension: usize, reason: String },
}

impl Embedding {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn vector(&self) -> Option<&[f32]> {
        match self {
            Self::Vector(vector) => Some(vector),
            Self::Degraded { .. } => None,
        }
    }

    /// Real vector, or the zero placeholder for a degraded outcome
    pub fn to_dense(&self) -> Vec<f32> {
        match self {
            Self::Vector(vector) => vector.clone(),
            Self::Degraded { dimension, .. } => vec![0.0; *dimension],
        }
    }
}

/// Deterministic offline embeddings derived from a text hash.
///
/// Identical text always maps to the same unit vector; unrelated texts are
/// near-orthogonal. Useful for tests and for runs without a provider.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    model_id: String,
    dimension: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            model_id: HASH_MODEL_ID.to_string(),
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(stub_embed(text, self.dimension))
    }
}

/// OpenAI-compatible `/embeddings` endpoint
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(VectorStoreError::InvalidConfig(
                "embedding API key is empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": [text],
        });
        let response: Value = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        extract_embedding(&response, &url)
    }
}

fn extract_embedding(response: &Value, url: &str) -> Result<Vec<f32>> {
    let items = response
        .get("data")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(|first| first.get("embedding"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            VectorStoreError::EmbeddingError(format!(
                "response from {url} did not contain data[0].embedding"
            ))
        })?;
    if items.is_empty() {
        return Err(VectorStoreError::EmbeddingError(format!(
            "response from {url} returned an empty embedding"
        )));
    }
    items
        .iter()
        .map(|item| {
            item.as_f64().map(|v| v as f32).ok_or_else(|| {
                VectorStoreError::EmbeddingError(format!(
                    "response from {url} contained a non-numeric embedding value"
                ))
            })
        })
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

fn stub_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut state =
        fnv1a_64(text.as_bytes()) ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let high = (bits >> 32) as u32;
        let mantissa = high >> 9;
        let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
        vec.push(unit.mul_add(2.0, -1.0));
    }
    normalize(&mut vec);
    vec
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embeddings_are_deterministic_unit_vectors() {
        let provider = HashEmbeddingProvider::new(64);
        let a = provider.embed("fn main() {}").await.unwrap();
        let b = provider.embed("fn main() {}").await.unwrap();
        let c = provider.embed("class Service: pass").await.unwrap();

        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
        assert!(cosine_similarity(&a, &c) < 0.5);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_handles_mismatch_and_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn degraded_embedding_is_zero_placeholder() {
        let degraded = Embedding::Degraded {
            dimension: 3,
            reason: "timeout".into(),
        };
        assert!(degraded.is_degraded());
        assert_eq!(degraded.vector(), None);
        assert_eq!(degraded.to_dense(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn openai_response_shape() {
        let response = json!({"data": [{"embedding": [0.5, -0.25]}]});
        assert_eq!(extract_embedding(&response, "u").unwrap(), vec![0.5, -0.25]);
        assert!(extract_embedding(&json!({"data": []}), "u").is_err());
        assert!(extract_embedding(&json!({"data": [{"embedding": []}]}), "u").is_err());
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let err = OpenAiEmbeddingProvider::new("http://x", " ", "m", 8, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::InvalidConfig(_)));
    }
}
