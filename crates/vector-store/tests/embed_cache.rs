use async_trait::async_trait;
use insight_vector_store::{
    CachedEmbedder, ChunkInput, Chunker, Embedding, EmbeddingProvider, FsBlobCache,
    HashEmbeddingProvider, MemoryVectorStore, MetadataFilter, SemanticIndex,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

struct Counting {
    inner: HashEmbeddingProvider,
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for Counting {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> insight_vector_store::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }
}

#[tokio::test]
async fn filesystem_cache_survives_a_new_embedder() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(Counting {
        inner: HashEmbeddingProvider::new(24),
        calls: AtomicUsize::new(0),
    });

    let first = CachedEmbedder::new(provider.clone(), Arc::new(FsBlobCache::new(dir.path())));
    let Embedding::Vector(a) = first.embed("fn parse() {}").await else {
        panic!("expected a vector");
    };

    let second = CachedEmbedder::new(provider.clone(), Arc::new(FsBlobCache::new(dir.path())));
    let Embedding::Vector(b) = second.embed("fn parse() {}").await else {
        panic!("expected a vector");
    };

    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        a.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
        b.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn filters_scope_queries_to_one_analysis() {
    let dir = tempdir().unwrap();
    let embedder = Arc::new(CachedEmbedder::new(
        Arc::new(HashEmbeddingProvider::new(16)),
        Arc::new(FsBlobCache::new(dir.path())),
    ));
    let index = SemanticIndex::new(embedder, Arc::new(MemoryVectorStore::new()));
    let chunker = Chunker::new(6, 1).unwrap();

    for (commit, analysis) in [("commit-a", "run-a"), ("commit-b", "run-b")] {
        let inputs: Vec<ChunkInput> = chunker
            .chunk("file:lib.rs", "pub fn add(a: i32, b: i32) -> i32 { a + b }")
            .into_iter()
            .map(|chunk| ChunkInput {
                commit_hash: commit.to_string(),
                analysis_id: analysis.to_string(),
                file_path: "lib.rs".to_string(),
                chunk,
            })
            .collect();
        index.index_batch(&inputs).await.unwrap();
    }

    let filters = MetadataFilter::from([("analysis_id".to_string(), serde_json::json!("run-b"))]);
    let hits = index.query("pub fn add", 50, &filters).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|hit| hit.id.starts_with("commit-b:")));
}
