use crate::error::Result;
use crate::model::{GraphSnapshot, VectorIndexRecord};
use async_trait::async_trait;

/// Relational store for snapshot and vector-index records.
///
/// At most one valid record exists per commit (per commit and index name for
/// vector indexes). Inserting a second one fails with
/// [`MetadataError::Conflict`](crate::MetadataError::Conflict), which is what
/// makes "look up, build, create" safe against concurrent builders.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Valid, unexpired snapshot for an exact commit hash
    async fn find_valid_snapshot(&self, commit_hash: &str) -> Result<Option<GraphSnapshot>>;

    async fn insert_snapshot(&self, snapshot: &GraphSnapshot) -> Result<()>;

    /// Mark every valid snapshot for the commit invalid; returns rows touched
    async fn invalidate_snapshot(&self, commit_hash: &str) -> Result<usize>;

    /// All snapshots, newest first
    async fn list_snapshots(&self) -> Result<Vec<GraphSnapshot>>;

    async fn find_valid_vector_index(
        &self,
        commit_hash: &str,
        index_name: &str,
    ) -> Result<Option<VectorIndexRecord>>;

    async fn insert_vector_index(&self, record: &VectorIndexRecord) -> Result<()>;

    async fn invalidate_vector_index(&self, commit_hash: &str, index_name: &str) -> Result<usize>;

    async fn health_check(&self) -> Result<()>;
}
