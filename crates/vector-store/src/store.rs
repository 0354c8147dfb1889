use crate::embeddings::cosine_similarity;
use crate::error::{Result, VectorStoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Distance metric an index is created with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    DotProduct,
    Euclidean,
}

impl Metric {
    /// Similarity score; higher is closer for every metric
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_similarity(a, b),
            Self::DotProduct => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            Self::Euclidean => {
                let distance = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f32>()
                    .sqrt();
                1.0 / (1.0 + distance)
            }
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cosine" => Some(Self::Cosine),
            "dot" | "dot_product" | "dotproduct" => Some(Self::DotProduct),
            "euclidean" | "l2" => Some(Self::Euclidean),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub id: String,
    pub score: f32,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub dimension: usize,
    pub metric: Metric,
    pub len: usize,
}

/// Exact-match metadata filters, all of which must hold
pub type MetadataFilter = BTreeMap<String, Value>;

/// Similarity index port
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Creates `name` unless it exists. An existing index with a different
    /// dimension is an error.
    async fn create_index(&self, name: &str, dimension: usize, metric: Metric) -> Result<()>;

    async fn index_info(&self, name: &str) -> Result<Option<IndexInfo>>;

    /// Inserts or replaces entries by id; returns how many were written
    async fn upsert(&self, name: &str, entries: Vec<VectorEntry>) -> Result<usize>;

    async fn search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        filters: &MetadataFilter,
    ) -> Result<Vec<ScoredEntry>>;

    /// Removes entries whose metadata `field` equals `value`; returns the count
    async fn delete_by_metadata(&self, name: &str, field: &str, value: &Value) -> Result<usize>;

    async fn health_check(&self) -> Result<()>;
}

struct Index {
    dimension: usize,
    metric: Metric,
    entries: HashMap<String, (Vec<f32>, Map<String, Value>)>,
}

/// Exact k-NN over in-process maps
#[derive(Default)]
pub struct MemoryVectorStore {
    indexes: RwLock<HashMap<String, Index>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn metadata_matches(metadata: &Map<String, Value>, filters: &MetadataFilter) -> bool {
    filters
        .iter()
        .all(|(field, expected)| metadata.get(field) == Some(expected))
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn create_index(&self, name: &str, dimension: usize, metric: Metric) -> Result<()> {
        if dimension == 0 {
            return Err(VectorStoreError::IndexError(format!(
                "index {name} needs a non-zero dimension"
            )));
        }
        let mut indexes = self.indexes.write().await;
        if let Some(existing) = indexes.get(name) {
            if existing.dimension != dimension {
                return Err(VectorStoreError::InvalidDimension {
                    expected: existing.dimension,
                    actual: dimension,
                });
            }
            return Ok(());
        }
        indexes.insert(
            name.to_string(),
            Index {
                dimension,
                metric,
                entries: HashMap::new(),
            },
        );
        log::debug!("Created vector index {name} (dimension {dimension}, {metric:?})");
        Ok(())
    }

    async fn index_info(&self, name: &str) -> Result<Option<IndexInfo>> {
        let indexes = self.indexes.read().await;
        Ok(indexes.get(name).map(|index| IndexInfo {
            dimension: index.dimension,
            metric: index.metric,
            len: index.entries.len(),
        }))
    }

    async fn upsert(&self, name: &str, entries: Vec<VectorEntry>) -> Result<usize> {
        let mut indexes = self.indexes.write().await;
        let index = indexes
            .get_mut(name)
            .ok_or_else(|| VectorStoreError::NotFound(format!("index {name}")))?;
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != index.dimension) {
            return Err(VectorStoreError::InvalidDimension {
                expected: index.dimension,
                actual: bad.vector.len(),
            });
        }
        let written = entries.len();
        for entry in entries {
            index.entries.insert(entry.id, (entry.vector, entry.metadata));
        }
        Ok(written)
    }

    async fn search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        filters: &MetadataFilter,
    ) -> Result<Vec<ScoredEntry>> {
        let indexes = self.indexes.read().await;
        let index = indexes
            .get(name)
            .ok_or_else(|| VectorStoreError::NotFound(format!("index {name}")))?;
        if query.len() != index.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: index.dimension,
                actual: query.len(),
            });
        }

        let mut scores: Vec<ScoredEntry> = index
            .entries
            .iter()
            .filter(|(_, (_, metadata))| metadata_matches(metadata, filters))
            .map(|(id, (vector, metadata))| ScoredEntry {
                id: id.clone(),
                score: index.metric.score(query, vector),
                metadata: metadata.clone(),
            })
            .collect();

        scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scores.truncate(k);
        Ok(scores)
    }

    async fn delete_by_metadata(&self, name: &str, field: &str, value: &Value) -> Result<usize> {
        let mut indexes = self.indexes.write().await;
        let Some(index) = indexes.get_mut(name) else {
            return Ok(0);
        };
        let before = index.entries.len();
        index
            .entries
            .retain(|_, (_, metadata)| metadata.get(field) != Some(value));
        Ok(before - index.entries.len())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
