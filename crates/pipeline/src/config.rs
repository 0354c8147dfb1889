//! Layered run configuration: defaults, then an optional TOML file, then
//! environment variables.

use crate::error::{PipelineError, Result};
use insight_analyzers::{
    FilterConfig, DEFAULT_LLM_MODEL, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
use insight_graph::DEFAULT_BATCH_SIZE;
use insight_parser::MAX_FILE_SIZE_BYTES;
use insight_vector_store::{
    Chunker, HfTokenizer, Metric, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_HASH_DIMENSION, DEFAULT_INDEX_NAME,
    DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_EMBEDDING_MODEL,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_DATA_DIR: &str = ".insight";
pub const MAX_STAGE_CONCURRENCY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParserConfig {
    pub max_file_size_bytes: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: MAX_FILE_SIZE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    pub batch_size: usize,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Snapshots never expire when unset
    pub snapshot_ttl_hours: Option<i64>,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            snapshot_ttl_hours: None,
            repo_url: None,
            branch: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VectorConfig {
    pub index_name: String,
    /// `cosine`, `dot_product` or `euclidean`
    pub metric: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// HuggingFace `tokenizer.json`; word boundaries when unset
    pub tokenizer_path: Option<PathBuf>,
    pub upsert_batch_size: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            index_name: DEFAULT_INDEX_NAME.to_string(),
            metric: "cosine".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            tokenizer_path: None,
            upsert_batch_size: 256,
        }
    }
}

impl VectorConfig {
    pub fn metric(&self) -> Result<Metric> {
        Metric::parse(&self.metric)
            .ok_or_else(|| PipelineError::Config(format!("unknown metric '{}'", self.metric)))
    }

    /// Chunker over the configured tokenizer
    pub fn chunker(&self) -> Result<Chunker> {
        let chunker = match &self.tokenizer_path {
            Some(path) => {
                let tokenizer = HfTokenizer::from_file(path).map_err(|err| {
                    PipelineError::Config(format!("tokenizer {}: {err}", path.display()))
                })?;
                Chunker::with_tokenizer(self.chunk_size, self.chunk_overlap, Arc::new(tokenizer))?
            }
            None => Chunker::new(self.chunk_size, self.chunk_overlap)?,
        };
        Ok(chunker)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Deterministic offline vectors
    Hash,
    OpenAi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Fs,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    pub model: String,
    pub dimension: usize,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub cache: CacheBackend,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Hash,
            model: DEFAULT_OPENAI_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_HASH_DIMENSION,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            api_key: None,
            timeout_secs: 30,
            cache: CacheBackend::Fs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmBackend {
    /// Fixed neutral replies, no network
    Scripted,
    OpenAi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    pub provider: LlmBackend,
    pub model: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmBackend::Scripted,
            model: DEFAULT_LLM_MODEL.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            api_key: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Files per reduced group
    pub group_size: usize,
    pub tool_timeout_secs: u64,
    pub agent_timeout_secs: u64,
    /// Commits inspected for churn
    pub churn_window: usize,
    pub run_agents: bool,
    /// Git author (name or email) whose contributions are measured
    pub author: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            group_size: 50,
            tool_timeout_secs: 30,
            agent_timeout_secs: 120,
            churn_window: 100,
            run_agents: true,
            author: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub parse: usize,
    pub embed: usize,
    pub tools: usize,
    pub agents: usize,
    pub groups: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            parse: cpus.clamp(1, 16),
            embed: 8,
            tools: cpus.clamp(1, 8),
            agents: 2,
            groups: 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Staging, caches, metadata db and summaries live here; relative paths
    /// resolve against the repository root
    pub data_dir: Option<PathBuf>,
    pub parser: ParserConfig,
    pub graph: GraphConfig,
    pub vector: VectorConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub analysis: AnalysisConfig,
    pub filter: FilterConfig,
    pub limits: LimitsConfig,
}

fn parse_or<T: std::str::FromStr>(raw: Option<&str>, default_value: T) -> T {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default_value)
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            PipelineError::Config(format!("read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// File when given, defaults otherwise, environment on top
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(base.with_env())
    }

    pub fn with_env(self) -> Self {
        self.with_lookup(|key| std::env::var(key).ok())
    }

    /// Applies `INSIGHT_*`, `OPENAI_*`, `LLM_*` and `L2_FILTER_*` overrides
    pub fn with_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| non_empty(lookup(key));

        if let Some(dir) = get("INSIGHT_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        self.graph.batch_size = parse_or(get("INSIGHT_BATCH_SIZE").as_deref(), self.graph.batch_size);
        self.vector.chunk_size =
            parse_or(get("INSIGHT_CHUNK_SIZE").as_deref(), self.vector.chunk_size);
        self.vector.chunk_overlap =
            parse_or(get("INSIGHT_CHUNK_OVERLAP").as_deref(), self.vector.chunk_overlap);
        if let Some(path) = get("INSIGHT_TOKENIZER_PATH") {
            self.vector.tokenizer_path = Some(PathBuf::from(path));
        }
        self.analysis.group_size =
            parse_or(get("INSIGHT_GROUP_SIZE").as_deref(), self.analysis.group_size);
        if let Some(author) = get("INSIGHT_AUTHOR") {
            self.analysis.author = Some(author);
        }

        match get("INSIGHT_EMBEDDING_PROVIDER").as_deref() {
            Some("hash") => self.embedding.provider = EmbeddingBackend::Hash,
            Some("openai") => self.embedding.provider = EmbeddingBackend::OpenAi,
            Some(other) => log::warn!("ignoring unknown INSIGHT_EMBEDDING_PROVIDER={other}"),
            None => {}
        }
        match get("INSIGHT_EMBEDDING_CACHE").as_deref() {
            Some("fs") => self.embedding.cache = CacheBackend::Fs,
            Some("memory") => self.embedding.cache = CacheBackend::Memory,
            Some(other) => log::warn!("ignoring unknown INSIGHT_EMBEDDING_CACHE={other}"),
            None => {}
        }
        match get("INSIGHT_LLM_PROVIDER").as_deref() {
            Some("scripted") => self.llm.provider = LlmBackend::Scripted,
            Some("openai") => self.llm.provider = LlmBackend::OpenAi,
            Some(other) => log::warn!("ignoring unknown INSIGHT_LLM_PROVIDER={other}"),
            None => {}
        }

        if let Some(key) = get("OPENAI_API_KEY") {
            self.embedding.api_key.get_or_insert_with(|| key.clone());
            self.llm.api_key.get_or_insert(key);
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.embedding.base_url = url.clone();
            self.llm.base_url = url;
        }
        if let Some(model) = get("OPENAI_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        self.embedding.dimension = parse_or(
            get("INSIGHT_EMBEDDING_DIMENSION").as_deref(),
            self.embedding.dimension,
        );
        if let Some(model) = get("OPENAI_LLM_MODEL") {
            self.llm.model = model;
        }
        self.llm.max_tokens = parse_or(get("LLM_MAX_TOKENS").as_deref(), self.llm.max_tokens);
        self.llm.temperature = parse_or(get("LLM_TEMPERATURE").as_deref(), self.llm.temperature);

        self.limits.parse = parse_or(get("INSIGHT_PARSE_CONCURRENCY").as_deref(), self.limits.parse);
        self.limits.embed = parse_or(get("INSIGHT_EMBED_CONCURRENCY").as_deref(), self.limits.embed);
        self.limits.tools = parse_or(get("INSIGHT_TOOLS_CONCURRENCY").as_deref(), self.limits.tools);
        self.limits.agents =
            parse_or(get("INSIGHT_AGENTS_CONCURRENCY").as_deref(), self.limits.agents);
        self.limits.groups =
            parse_or(get("INSIGHT_GROUPS_CONCURRENCY").as_deref(), self.limits.groups);

        self.filter = self.filter.with_lookup(&lookup);
        self
    }

    /// Checked before any file is touched
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.vector.chunk_size == 0 {
            return Err("vector.chunk_size must be greater than zero".to_string());
        }
        if self.vector.chunk_overlap >= self.vector.chunk_size {
            return Err(format!(
                "vector.chunk_overlap ({}) must be smaller than vector.chunk_size ({})",
                self.vector.chunk_overlap, self.vector.chunk_size
            ));
        }
        if self.vector.upsert_batch_size == 0 {
            return Err("vector.upsert_batch_size must be greater than zero".to_string());
        }
        if Metric::parse(&self.vector.metric).is_none() {
            return Err(format!("unknown vector.metric '{}'", self.vector.metric));
        }
        if self.graph.batch_size == 0 {
            return Err("graph.batch_size must be greater than zero".to_string());
        }
        if self.graph.retry_attempts == 0 {
            return Err("graph.retry_attempts must be at least 1".to_string());
        }
        if self.analysis.group_size == 0 {
            return Err("analysis.group_size must be greater than zero".to_string());
        }
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be greater than zero".to_string());
        }
        let limits = &self.limits;
        for (name, value) in [
            ("parse", limits.parse),
            ("embed", limits.embed),
            ("tools", limits.tools),
            ("agents", limits.agents),
            ("groups", limits.groups),
        ] {
            if value == 0 {
                return Err(format!("limits.{name} must be at least 1"));
            }
        }
        if self.embedding.provider == EmbeddingBackend::OpenAi
            && non_empty(self.embedding.api_key.clone()).is_none()
        {
            return Err("embedding.provider = openai requires OPENAI_API_KEY".to_string());
        }
        if self.llm.provider == LlmBackend::OpenAi
            && non_empty(self.llm.api_key.clone()).is_none()
        {
            return Err("llm.provider = openai requires OPENAI_API_KEY".to_string());
        }
        self.filter.validate()
    }

    pub fn data_dir(&self, repo_root: &Path) -> PathBuf {
        let dir = self
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        if dir.is_absolute() {
            dir
        } else {
            repo_root.join(dir)
        }
    }
}
