use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// One successful graph build for one commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub id: Uuid,
    pub analysis_id: String,
    pub commit_hash: String,
    pub repo_url: Option<String>,
    pub branch: String,
    pub node_count: usize,
    pub edge_count: usize,
    /// Node count per type, e.g. `{"File": 120, "Function": 840}`
    pub node_types: BTreeMap<String, usize>,
    pub build_duration_seconds: f64,
    pub is_valid: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GraphSnapshot {
    pub fn new(analysis_id: impl Into<String>, commit_hash: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            analysis_id: analysis_id.into(),
            commit_hash: commit_hash.into(),
            repo_url: None,
            branch: DEFAULT_BRANCH.to_string(),
            node_count: 0,
            edge_count: 0,
            node_types: BTreeMap::new(),
            build_duration_seconds: 0.0,
            is_valid: true,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.expires_at = ttl.map(|ttl| self.created_at + ttl);
        self
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_valid && self.expires_at.map_or(true, |expires| expires > now)
    }
}

/// Metadata for one built vector index, mirrors [`GraphSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndexRecord {
    pub id: Uuid,
    pub analysis_id: String,
    pub index_name: String,
    pub commit_hash: String,
    pub chunk_count: usize,
    pub embedding_dimension: usize,
    pub embedding_model: String,
    pub is_valid: bool,
    pub indexing_duration_seconds: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl VectorIndexRecord {
    pub fn new(
        analysis_id: impl Into<String>,
        index_name: impl Into<String>,
        commit_hash: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            analysis_id: analysis_id.into(),
            index_name: index_name.into(),
            commit_hash: commit_hash.into(),
            chunk_count: 0,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            embedding_model: embedding_model.into(),
            is_valid: true,
            indexing_duration_seconds: 0.0,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.expires_at = ttl.map(|ttl| self.created_at + ttl);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_controls_usability() {
        let snapshot = GraphSnapshot::new("a-1", "abc").with_ttl(Some(Duration::hours(1)));
        assert!(snapshot.is_usable_at(snapshot.created_at));
        assert!(!snapshot.is_usable_at(snapshot.created_at + Duration::hours(2)));

        let mut forever = GraphSnapshot::new("a-1", "abc");
        assert!(forever.is_usable_at(Utc::now() + Duration::days(365)));
        forever.is_valid = false;
        assert!(!forever.is_usable_at(Utc::now()));
    }
}
