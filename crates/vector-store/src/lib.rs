//! # Insight Vector Store
//!
//! Chunking, embedding and similarity search for source files.
//!
//! ## Features
//!
//! - **Token windows** with configurable size and overlap
//! - **Content-addressed embedding cache** keyed by model, dimension and text
//! - **Best-effort embeddings**: provider failures surface as [`Embedding::Degraded`]
//! - **Exact k-NN search** with metadata-equality filters
//!
//! ## Architecture
//!
//! ```text
//! file content
//!     │
//!     ├──> Chunker (Tokenizer)
//!     │      └─> CodeChunk[]
//!     │
//!     ├──> CachedEmbedder
//!     │      ├─ BlobCache hit ──> vector
//!     │      └─ miss ──> EmbeddingProvider ──> write-through
//!     │
//!     └──> SemanticIndex
//!            └─> VectorStore (upsert / search / delete_by_metadata)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use insight_vector_store::{
//!     CachedEmbedder, ChunkInput, Chunker, HashEmbeddingProvider, MemoryBlobCache,
//!     MemoryVectorStore, MetadataFilter, SemanticIndex,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> insight_vector_store::Result<()> {
//!     let embedder = Arc::new(CachedEmbedder::new(
//!         Arc::new(HashEmbeddingProvider::default()),
//!         Arc::new(MemoryBlobCache::default()),
//!     ));
//!     let index = SemanticIndex::new(embedder, Arc::new(MemoryVectorStore::new()));
//!
//!     let inputs: Vec<ChunkInput> = Chunker::default()
//!         .chunk("file:src/app.py", "def main():\n    pass\n")
//!         .into_iter()
//!         .map(|chunk| ChunkInput {
//!             commit_hash: "4b825dc6".into(),
//!             analysis_id: "run-1".into(),
//!             file_path: "src/app.py".into(),
//!             chunk,
//!         })
//!         .collect();
//!     index.index_batch(&inputs).await?;
//!
//!     for hit in index.query("entry point", 5, &MetadataFilter::new()).await? {
//!         println!("{}: {:.3}", hit.id, hit.score);
//!     }
//!     Ok(())
//! }
//! ```

mod blob_cache;
mod chunker;
mod embedding_cache;
mod embeddings;
mod error;
mod semantic;
mod store;
mod tokenizer;

pub use blob_cache::{BlobCache, FsBlobCache, MemoryBlobCache, DEFAULT_MEMORY_CAPACITY};
pub use chunker::{
    expected_chunk_count, Chunker, CodeChunk, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
};
pub use embedding_cache::{CachedEmbedder, EmbedStats, DEFAULT_EMBED_CONCURRENCY};
pub use embeddings::{
    cosine_similarity, Embedding, EmbeddingProvider, HashEmbeddingProvider,
    OpenAiEmbeddingProvider, DEFAULT_HASH_DIMENSION, DEFAULT_OPENAI_BASE_URL,
    DEFAULT_OPENAI_EMBEDDING_MODEL, HASH_MODEL_ID,
};
pub use error::{Result, VectorStoreError};
pub use semantic::{ChunkInput, IndexOutcome, SearchHit, SemanticIndex, DEFAULT_INDEX_NAME};
pub use store::{
    IndexInfo, MemoryVectorStore, MetadataFilter, Metric, ScoredEntry, VectorEntry, VectorStore,
};
pub use tokenizer::{HfTokenizer, Tokenizer, WordBoundaryTokenizer};
