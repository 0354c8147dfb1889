use crate::chunker::CodeChunk;
use crate::embedding_cache::CachedEmbedder;
use crate::embeddings::Embedding;
use crate::error::Result;
use crate::store::{MetadataFilter, Metric, VectorEntry, VectorStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const DEFAULT_INDEX_NAME: &str = "code_embeddings";

/// One chunk to index, with the ids that address it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInput {
    /// Commit (or content fingerprint) the chunk was cut from
    pub commit_hash: String,
    /// Run that indexed it last
    pub analysis_id: String,
    pub file_path: String,
    pub chunk: CodeChunk,
}

impl ChunkInput {
    /// Stable across runs of one commit, so re-indexing overwrites
    pub fn entry_id(&self) -> String {
        format!(
            "{}:{}#{}",
            self.commit_hash, self.file_path, self.chunk.chunk_index
        )
    }

    fn metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("commit_hash".into(), json!(self.commit_hash));
        metadata.insert("analysis_id".into(), json!(self.analysis_id));
        metadata.insert("file_path".into(), json!(self.file_path));
        metadata.insert("file_id".into(), json!(self.chunk.file_id));
        metadata.insert("chunk_index".into(), json!(self.chunk.chunk_index));
        metadata.insert("token_count".into(), json!(self.chunk.token_count));
        metadata.insert("start_token".into(), json!(self.chunk.start_token));
        metadata.insert("end_token".into(), json!(self.chunk.end_token));
        metadata.insert("text".into(), json!(self.chunk.text));
        metadata
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOutcome {
    pub indexed: usize,
    /// Chunks left out because their embedding degraded
    pub degraded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub metadata: Map<String, Value>,
    pub text: String,
}

impl SearchHit {
    pub fn file_path(&self) -> Option<&str> {
        self.metadata.get("file_path").and_then(Value::as_str)
    }
}

/// Embed-and-index front end over a [`VectorStore`].
///
/// Indexing and querying share one [`CachedEmbedder`], so a query for text
/// that was indexed earlier is a cache hit.
pub struct SemanticIndex {
    embedder: Arc<CachedEmbedder>,
    store: Arc<dyn VectorStore>,
    index_name: String,
    metric: Metric,
}

impl SemanticIndex {
    pub fn new(embedder: Arc<CachedEmbedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            index_name: DEFAULT_INDEX_NAME.to_string(),
            metric: Metric::default(),
        }
    }

    pub fn with_index_name(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = index_name.into();
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn embedder(&self) -> &CachedEmbedder {
        &self.embedder
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Embeds and upserts `inputs`. Degraded embeddings are skipped.
    pub async fn index_batch(&self, inputs: &[ChunkInput]) -> Result<IndexOutcome> {
        let texts: Vec<String> = inputs.iter().map(|input| input.chunk.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await;

        let mut outcome = IndexOutcome::default();
        let mut entries = Vec::with_capacity(inputs.len());
        for (input, embedding) in inputs.iter().zip(embeddings) {
            match embedding {
                Embedding::Vector(vector) => entries.push(VectorEntry {
                    id: input.entry_id(),
                    vector,
                    metadata: input.metadata(),
                }),
                Embedding::Degraded { .. } => outcome.degraded += 1,
            }
        }
        outcome.indexed = self.index_vectors(entries).await?;
        Ok(outcome)
    }

    /// Upserts precomputed vectors, creating the index from the first
    /// vector's dimension when it does not exist yet
    pub async fn index_vectors(&self, entries: Vec<VectorEntry>) -> Result<usize> {
        let Some(first) = entries.first() else {
            return Ok(0);
        };
        self.store
            .create_index(&self.index_name, first.vector.len(), self.metric)
            .await?;
        self.store.upsert(&self.index_name, entries).await
    }

    pub async fn query(
        &self,
        text: &str,
        k: usize,
        filters: &MetadataFilter,
    ) -> Result<Vec<SearchHit>> {
        let vector = match self.embedder.embed(text).await {
            Embedding::Vector(vector) => vector,
            Embedding::Degraded { reason, .. } => {
                log::warn!("Query embedding degraded, returning no hits: {reason}");
                return Ok(Vec::new());
            }
        };
        if self.store.index_info(&self.index_name).await?.is_none() {
            return Ok(Vec::new());
        }
        let hits = self
            .store
            .search(&self.index_name, &vector, k, filters)
            .await?;
        Ok(hits
            .into_iter()
            .map(|hit| SearchHit {
                text: hit
                    .metadata
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                id: hit.id,
                score: hit.score,
                metadata: hit.metadata,
            })
            .collect())
    }
}
