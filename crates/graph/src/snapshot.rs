use crate::error::Result;
use chrono::{Duration, Utc};
use insight_metadata::{GraphSnapshot, MetadataStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Facts about a finished load, turned into a [`GraphSnapshot`] on create
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotDraft {
    pub analysis_id: String,
    pub commit_hash: String,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
    pub node_count: usize,
    pub edge_count: usize,
    pub node_types: BTreeMap<String, usize>,
    pub build_duration_seconds: f64,
}

/// Result of registering a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "snapshot", rename_all = "snake_case")]
pub enum SnapshotCreated {
    Created(GraphSnapshot),
    /// Another build registered this commit first; this is its record
    AlreadyExists(GraphSnapshot),
}

impl SnapshotCreated {
    pub fn snapshot(&self) -> &GraphSnapshot {
        match self {
            Self::Created(snapshot) | Self::AlreadyExists(snapshot) => snapshot,
        }
    }

    pub fn into_snapshot(self) -> GraphSnapshot {
        match self {
            Self::Created(snapshot) | Self::AlreadyExists(snapshot) => snapshot,
        }
    }
}

/// Commit-keyed snapshot bookkeeping over a [`MetadataStore`]
pub struct SnapshotManager {
    metadata: Arc<dyn MetadataStore>,
    ttl: Option<Duration>,
}

impl SnapshotManager {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            metadata,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Valid, unexpired snapshot for `commit_hash`.
    ///
    /// A failing metadata store is reported as a miss so the caller rebuilds.
    pub async fn reuse_snapshot(&self, commit_hash: &str) -> Option<GraphSnapshot> {
        match self.metadata.find_valid_snapshot(commit_hash).await {
            Ok(Some(snapshot)) if snapshot.is_usable_at(Utc::now()) => {
                log::info!(
                    "Reusing graph snapshot {} for commit {commit_hash}",
                    snapshot.id
                );
                Some(snapshot)
            }
            Ok(_) => None,
            Err(err) => {
                log::warn!("Snapshot lookup failed for {commit_hash}, rebuilding: {err}");
                None
            }
        }
    }

    pub async fn create_snapshot(&self, draft: SnapshotDraft) -> Result<SnapshotCreated> {
        let mut snapshot =
            GraphSnapshot::new(draft.analysis_id, draft.commit_hash.clone()).with_ttl(self.ttl);
        snapshot.repo_url = draft.repo_url;
        if let Some(branch) = draft.branch {
            snapshot.branch = branch;
        }
        snapshot.node_count = draft.node_count;
        snapshot.edge_count = draft.edge_count;
        snapshot.node_types = draft.node_types;
        snapshot.build_duration_seconds = draft.build_duration_seconds;

        match self.metadata.insert_snapshot(&snapshot).await {
            Ok(()) => {
                log::info!(
                    "Created graph snapshot {} for commit {} ({} nodes, {} edges)",
                    snapshot.id,
                    snapshot.commit_hash,
                    snapshot.node_count,
                    snapshot.edge_count
                );
                Ok(SnapshotCreated::Created(snapshot))
            }
            Err(err) if err.is_conflict() => {
                match self.metadata.find_valid_snapshot(&draft.commit_hash).await? {
                    Some(winner) => {
                        log::info!(
                            "Commit {} already has snapshot {}",
                            draft.commit_hash,
                            winner.id
                        );
                        Ok(SnapshotCreated::AlreadyExists(winner))
                    }
                    None => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Marks every valid snapshot of `commit_hash` invalid; returns how many
    pub async fn invalidate(&self, commit_hash: &str) -> Result<usize> {
        let count = self.metadata.invalidate_snapshot(commit_hash).await?;
        if count > 0 {
            log::info!("Invalidated {count} snapshot(s) for commit {commit_hash}");
        }
        Ok(count)
    }

    pub async fn list(&self) -> Result<Vec<GraphSnapshot>> {
        Ok(self.metadata.list_snapshots().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_metadata::SqliteMetadataStore;
    use pretty_assertions::assert_eq;

    fn draft(analysis_id: &str, commit: &str) -> SnapshotDraft {
        SnapshotDraft {
            analysis_id: analysis_id.to_string(),
            commit_hash: commit.to_string(),
            node_count: 3,
            edge_count: 2,
            node_types: BTreeMap::from([("File".to_string(), 1), ("Function".to_string(), 2)]),
            ..SnapshotDraft::default()
        }
    }

    fn manager() -> SnapshotManager {
        SnapshotManager::new(Arc::new(SqliteMetadataStore::in_memory().unwrap()))
    }

    #[tokio::test]
    async fn create_then_reuse() {
        let manager = manager();
        assert!(manager.reuse_snapshot("abc").await.is_none());

        let created = manager.create_snapshot(draft("a-1", "abc")).await.unwrap();
        assert!(matches!(created, SnapshotCreated::Created(_)));

        let reused = manager.reuse_snapshot("abc").await.unwrap();
        assert_eq!(reused.id, created.snapshot().id);
        assert_eq!(reused.node_types.get("Function"), Some(&2));
    }

    #[tokio::test]
    async fn second_create_returns_the_winner() {
        let manager = manager();
        let first = manager.create_snapshot(draft("a-1", "abc")).await.unwrap();
        let second = manager.create_snapshot(draft("a-2", "abc")).await.unwrap();

        match second {
            SnapshotCreated::AlreadyExists(winner) => {
                assert_eq!(winner.id, first.snapshot().id);
                assert_eq!(winner.analysis_id, "a-1");
            }
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalidate_allows_rebuild() {
        let manager = manager();
        manager.create_snapshot(draft("a-1", "abc")).await.unwrap();
        assert_eq!(manager.invalidate("abc").await.unwrap(), 1);
        assert!(manager.reuse_snapshot("abc").await.is_none());

        let rebuilt = manager.create_snapshot(draft("a-2", "abc")).await.unwrap();
        assert!(matches!(rebuilt, SnapshotCreated::Created(_)));
        assert_eq!(manager.list().await.unwrap().len(), 2);
    }
}
