use crate::config::{CacheBackend, EmbeddingBackend, LlmBackend, PipelineConfig};
use crate::error::{PipelineError, Result};
use insight_analyzers::{
    default_agents, Agent, LlmProvider, OpenAiChatProvider, ScriptedLlmProvider, Tool,
};
use insight_graph::{GraphStore, MemoryGraphStore};
use insight_metadata::{MetadataStore, SqliteMetadataStore};
use insight_vector_store::{
    BlobCache, EmbeddingProvider, FsBlobCache, HashEmbeddingProvider, MemoryBlobCache,
    MemoryVectorStore, OpenAiEmbeddingProvider, VectorStore,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const METADATA_DB_FILE: &str = "metadata.db";
pub const CACHE_DIR: &str = "cache";

/// Everything a run talks to outside its own process state.
///
/// Constructed once and passed in; tests swap any field for a fake.
#[derive(Clone)]
pub struct PipelineServices {
    pub graph: Arc<dyn GraphStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub blob_cache: Arc<dyn BlobCache>,
    pub llm: Arc<dyn LlmProvider>,
    /// `default_tools` for the repository being analyzed when unset
    pub tools: Option<Vec<Arc<Tool>>>,
    pub agents: Vec<Arc<Agent>>,
}

impl PipelineServices {
    /// Offline services with nothing persisted
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            graph: Arc::new(MemoryGraphStore::new()),
            vectors: Arc::new(MemoryVectorStore::new()),
            metadata: Arc::new(SqliteMetadataStore::in_memory()?),
            embeddings: Arc::new(HashEmbeddingProvider::default()),
            blob_cache: Arc::new(MemoryBlobCache::default()),
            llm: Arc::new(ScriptedLlmProvider::neutral()),
            tools: None,
            agents: default_agents(),
        })
    }

    /// Providers chosen by `config`; the metadata db and the embedding cache
    /// live under `data_dir`
    pub fn from_config(config: &PipelineConfig, data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(|err| {
            PipelineError::Config(format!("create data dir {}: {err}", data_dir.display()))
        })?;
        let metadata = SqliteMetadataStore::open(data_dir.join(METADATA_DB_FILE))?;

        let embedding = &config.embedding;
        let embeddings: Arc<dyn EmbeddingProvider> = match embedding.provider {
            EmbeddingBackend::Hash => Arc::new(HashEmbeddingProvider::new(embedding.dimension)),
            EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbeddingProvider::new(
                embedding.base_url.clone(),
                embedding.api_key.clone().unwrap_or_default(),
                embedding.model.clone(),
                embedding.dimension,
                Duration::from_secs(embedding.timeout_secs),
            )?),
        };
        let blob_cache: Arc<dyn BlobCache> = match embedding.cache {
            CacheBackend::Fs => Arc::new(FsBlobCache::new(data_dir.join(CACHE_DIR))),
            CacheBackend::Memory => Arc::new(MemoryBlobCache::default()),
        };

        let llm_config = &config.llm;
        let llm: Arc<dyn LlmProvider> = match llm_config.provider {
            LlmBackend::Scripted => Arc::new(ScriptedLlmProvider::neutral()),
            LlmBackend::OpenAi => Arc::new(
                OpenAiChatProvider::new(
                    llm_config.base_url.clone(),
                    llm_config.api_key.clone().unwrap_or_default(),
                    llm_config.model.clone(),
                    Duration::from_secs(llm_config.timeout_secs),
                )?
                .with_sampling(llm_config.max_tokens, llm_config.temperature),
            ),
        };

        Ok(Self {
            graph: Arc::new(MemoryGraphStore::new()),
            vectors: Arc::new(MemoryVectorStore::new()),
            metadata: Arc::new(metadata),
            embeddings,
            blob_cache,
            llm,
            tools: None,
            agents: default_agents(),
        })
    }

    pub fn with_tools(mut self, tools: Vec<Arc<Tool>>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_agents(mut self, agents: Vec<Arc<Agent>>) -> Self {
        self.agents = agents;
        self
    }
}
