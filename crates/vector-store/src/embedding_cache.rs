use crate::blob_cache::BlobCache;
use crate::embeddings::{Embedding, EmbeddingProvider};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

const CACHE_MAGIC: &[u8; 4] = b"EC01";
pub const DEFAULT_EMBED_CONCURRENCY: usize = 8;

/// Counters since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedStats {
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub provider_calls: usize,
    pub degraded: usize,
    pub cache_errors: usize,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    provider_calls: AtomicUsize,
    degraded: AtomicUsize,
    cache_errors: AtomicUsize,
}

/// Embedding provider fronted by a content-addressed blob cache.
///
/// A hit never reaches the provider. Provider failures and wrong-dimension
/// vectors become [`Embedding::Degraded`] and are not cached.
pub struct CachedEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<dyn BlobCache>,
    limit: Arc<Semaphore>,
    counters: Counters,
}

impl CachedEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: Arc<dyn BlobCache>) -> Self {
        Self::with_limit(
            provider,
            cache,
            Arc::new(Semaphore::new(DEFAULT_EMBED_CONCURRENCY)),
        )
    }

    /// Shares `limit` with other users of the same provider
    pub fn with_limit(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<dyn BlobCache>,
        limit: Arc<Semaphore>,
    ) -> Self {
        Self {
            provider,
            cache,
            limit,
            counters: Counters::default(),
        }
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn stats(&self) -> EmbedStats {
        EmbedStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            provider_calls: self.counters.provider_calls.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
            cache_errors: self.counters.cache_errors.load(Ordering::Relaxed),
        }
    }

    /// Blob key for `text` under the current provider
    pub fn cache_key(&self, text: &str) -> String {
        let model = self.provider.model_id();
        let dimension = self.provider.dimension();
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(dimension.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        format!("embeddings/{model}/{}", to_lower_hex(&digest))
    }

    pub async fn embed(&self, text: &str) -> Embedding {
        let dimension = self.provider.dimension();
        let key = self.cache_key(text);

        match self.cache.get(&key).await {
            Ok(Some(bytes)) => {
                if let Some(vector) = decode_vector(&bytes, dimension) {
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Embedding::Vector(vector);
                }
                log::debug!("Discarding undecodable cache entry {key}");
            }
            Ok(None) => {}
            Err(err) => {
                self.counters.cache_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("Embedding cache read failed, treating as miss: {err}");
            }
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let result = {
            let _permit = self.limit.acquire().await;
            self.counters.provider_calls.fetch_add(1, Ordering::Relaxed);
            self.provider.embed(text).await
        };
        let vector = match result {
            Ok(vector) if vector.len() == dimension => vector,
            Ok(vector) => {
                return self.degraded(format!(
                    "provider returned dimension {}, expected {dimension}",
                    vector.len()
                ));
            }
            Err(err) => return self.degraded(err.to_string()),
        };

        if let Err(err) = self.cache.put(&key, &encode_vector(&vector)).await {
            self.counters.cache_errors.fetch_add(1, Ordering::Relaxed);
            log::warn!("Embedding cache write failed: {err}");
        }
        Embedding::Vector(vector)
    }

    /// Embeds every text; order of results matches `texts`
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Embedding> {
        join_all(texts.iter().map(|text| self.embed(text))).await
    }

    fn degraded(&self, reason: String) -> Embedding {
        self.counters.degraded.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "Embedding with {} degraded: {reason}",
            self.provider.model_id()
        );
        Embedding::Degraded {
            dimension: self.provider.dimension(),
            reason,
        }
    }
}

fn to_lower_hex(bytes: &[u8]) -> String {
    const LUT: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(LUT[(byte >> 4) as usize] as char);
        out.push(LUT[(byte & 0x0f) as usize] as char);
    }
    out
}

pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + vector.len() * 4);
    out.extend_from_slice(CACHE_MAGIC);
    #[allow(clippy::cast_possible_truncation)]
    let dim = vector.len() as u32;
    out.extend_from_slice(&dim.to_le_bytes());
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub(crate) fn decode_vector(bytes: &[u8], expected_dimension: usize) -> Option<Vec<f32>> {
    if bytes.len() < 8 || &bytes[0..4] != CACHE_MAGIC {
        return None;
    }
    let dim = u32::from_le_bytes(bytes[4..8].try_into().ok()?) as usize;
    if dim != expected_dimension {
        return None;
    }
    let expected_len = 8usize.saturating_add(dim.saturating_mul(4));
    if bytes.len() != expected_len {
        return None;
    }
    bytes[8..]
        .chunks_exact(4)
        .map(|chunk| chunk.try_into().ok().map(f32::from_le_bytes))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_cache::MemoryBlobCache;
    use crate::embeddings::HashEmbeddingProvider;
    use crate::error::{Result, VectorStoreError};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Counts calls and fails on texts containing "boom"
    struct CountingProvider {
        inner: HashEmbeddingProvider,
        calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                inner: HashEmbeddingProvider::new(16),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_id(&self) -> &str {
            "counting"
        }

        fn dimension(&self) -> usize {
            16
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("boom") {
                return Err(VectorStoreError::EmbeddingError("provider down".into()));
            }
            self.inner.embed(text).await
        }
    }

    /// Cache whose every operation fails
    struct BrokenCache;

    #[async_trait]
    impl BlobCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err(VectorStoreError::Cache("disk gone".into()))
        }

        async fn put(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
            Err(VectorStoreError::Cache("disk gone".into()))
        }
    }

    #[tokio::test]
    async fn second_embed_is_a_cache_hit() {
        let provider = Arc::new(CountingProvider::new());
        let embedder = CachedEmbedder::new(provider.clone(), Arc::new(MemoryBlobCache::default()));

        let first = embedder.embed("def f(): pass").await;
        let second = embedder.embed("def f(): pass").await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        let (Embedding::Vector(a), Embedding::Vector(b)) = (&first, &second) else {
            panic!("expected real vectors");
        };
        assert_eq!(encode_vector(a), encode_vector(b));
        assert_eq!(embedder.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn provider_failure_degrades_and_is_not_cached() {
        let provider = Arc::new(CountingProvider::new());
        let embedder = CachedEmbedder::new(provider.clone(), Arc::new(MemoryBlobCache::default()));

        let texts = vec!["ok".to_string(), "boom".to_string()];
        let results = embedder.embed_batch(&texts).await;
        assert!(!results[0].is_degraded());
        assert_eq!(
            results[1],
            Embedding::Degraded {
                dimension: 16,
                reason: "Embedding error: provider down".into()
            }
        );

        embedder.embed("boom").await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(embedder.stats().degraded, 2);
    }

    #[tokio::test]
    async fn cache_errors_are_misses() {
        let provider = Arc::new(CountingProvider::new());
        let embedder = CachedEmbedder::new(provider.clone(), Arc::new(BrokenCache));

        assert!(!embedder.embed("x").await.is_degraded());
        assert!(!embedder.embed("x").await.is_degraded());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(embedder.stats().cache_errors, 4);
    }

    #[test]
    fn cache_key_covers_model_and_dimension() {
        let a = CachedEmbedder::new(
            Arc::new(HashEmbeddingProvider::new(8)),
            Arc::new(MemoryBlobCache::default()),
        );
        let b = CachedEmbedder::new(
            Arc::new(HashEmbeddingProvider::new(16)),
            Arc::new(MemoryBlobCache::default()),
        );
        assert_ne!(a.cache_key("same"), b.cache_key("same"));
        assert!(a.cache_key("same").starts_with("embeddings/hash-embedding-v1/"));
        assert_eq!(a.cache_key("same").len(), "embeddings/hash-embedding-v1/".len() + 64);
    }

    #[test]
    fn codec_rejects_wrong_dimension_and_magic() {
        let bytes = encode_vector(&[1.0, 2.0]);
        assert_eq!(decode_vector(&bytes, 2), Some(vec![1.0, 2.0]));
        assert_eq!(decode_vector(&bytes, 3), None);
        assert_eq!(decode_vector(b"XX01\x02\0\0\0", 2), None);
    }
}
