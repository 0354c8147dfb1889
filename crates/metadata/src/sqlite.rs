use crate::error::{MetadataError, Result};
use crate::model::{GraphSnapshot, VectorIndexRecord};
use crate::store::MetadataStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS graph_snapshots (
    id TEXT PRIMARY KEY,
    analysis_id TEXT NOT NULL,
    commit_hash TEXT NOT NULL,
    repo_url TEXT,
    branch TEXT NOT NULL DEFAULT 'main',
    node_count INTEGER NOT NULL DEFAULT 0,
    edge_count INTEGER NOT NULL DEFAULT 0,
    node_types TEXT NOT NULL DEFAULT '{}',
    build_duration_seconds REAL NOT NULL DEFAULT 0,
    is_valid INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    expires_at TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_graph_snapshots_valid_commit
    ON graph_snapshots(commit_hash) WHERE is_valid = 1;

CREATE TABLE IF NOT EXISTS vector_indexes (
    id TEXT PRIMARY KEY,
    analysis_id TEXT NOT NULL,
    index_name TEXT NOT NULL,
    commit_hash TEXT NOT NULL,
    chunk_count INTEGER NOT NULL DEFAULT 0,
    embedding_dimension INTEGER NOT NULL DEFAULT 1536,
    embedding_model TEXT NOT NULL,
    is_valid INTEGER NOT NULL DEFAULT 1,
    indexing_duration_seconds REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    expires_at TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_vector_indexes_valid_commit
    ON vector_indexes(commit_hash, index_name) WHERE is_valid = 1;
";

const SNAPSHOT_COLUMNS: &str = "id, analysis_id, commit_hash, repo_url, branch, node_count, \
     edge_count, node_types, build_duration_seconds, is_valid, created_at, expires_at";

const VECTOR_INDEX_COLUMNS: &str = "id, analysis_id, index_name, commit_hash, chunk_count, \
     embedding_dimension, embedding_model, is_valid, indexing_duration_seconds, created_at, \
     expires_at";

/// SQLite-backed [`MetadataStore`].
///
/// The connection sits behind a mutex and every statement runs on the
/// blocking pool, so async callers never stall the runtime.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MetadataError::Unavailable(format!("{}: {e}", parent.display())))?;
            }
        }
        Self::from_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| MetadataError::Unavailable("connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| MetadataError::Unavailable(format!("join metadata task: {e}")))?
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn find_valid_snapshot(&self, commit_hash: &str) -> Result<Option<GraphSnapshot>> {
        let commit_hash = commit_hash.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM graph_snapshots \
                 WHERE commit_hash = ?1 AND is_valid = 1 \
                 AND (expires_at IS NULL OR expires_at > ?2)"
            );
            let snapshot = conn
                .query_row(&sql, params![commit_hash, Utc::now()], snapshot_from_row)
                .optional()?;
            Ok(snapshot)
        })
        .await
    }

    async fn insert_snapshot(&self, snapshot: &GraphSnapshot) -> Result<()> {
        if snapshot.commit_hash.trim().is_empty() {
            return Err(MetadataError::InvalidRecord("empty commit hash".into()));
        }
        let snapshot = snapshot.clone();
        let node_types = serde_json::to_string(&snapshot.node_types)?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            // an expired row still holds the unique slot for its commit
            tx.execute(
                "UPDATE graph_snapshots SET is_valid = 0 \
                 WHERE commit_hash = ?1 AND is_valid = 1 \
                 AND expires_at IS NOT NULL AND expires_at <= ?2",
                params![snapshot.commit_hash, Utc::now()],
            )?;
            let sql = format!(
                "INSERT INTO graph_snapshots ({SNAPSHOT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            );
            tx.execute(
                &sql,
                params![
                    snapshot.id.to_string(),
                    snapshot.analysis_id,
                    snapshot.commit_hash,
                    snapshot.repo_url,
                    snapshot.branch,
                    snapshot.node_count,
                    snapshot.edge_count,
                    node_types,
                    snapshot.build_duration_seconds,
                    snapshot.is_valid,
                    snapshot.created_at,
                    snapshot.expires_at,
                ],
            )
            .map_err(|e| MetadataError::from_insert(e, &snapshot.commit_hash))?;
            tx.commit()?;
            log::debug!(
                "Recorded graph snapshot {} for commit {}",
                snapshot.id,
                snapshot.commit_hash
            );
            Ok(())
        })
        .await
    }

    async fn invalidate_snapshot(&self, commit_hash: &str) -> Result<usize> {
        let commit_hash = commit_hash.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE graph_snapshots SET is_valid = 0 WHERE commit_hash = ?1 AND is_valid = 1",
                params![commit_hash],
            )?;
            Ok(changed)
        })
        .await
    }

    async fn list_snapshots(&self) -> Result<Vec<GraphSnapshot>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM graph_snapshots ORDER BY created_at DESC, id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], snapshot_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn find_valid_vector_index(
        &self,
        commit_hash: &str,
        index_name: &str,
    ) -> Result<Option<VectorIndexRecord>> {
        let commit_hash = commit_hash.to_string();
        let index_name = index_name.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {VECTOR_INDEX_COLUMNS} FROM vector_indexes \
                 WHERE commit_hash = ?1 AND index_name = ?2 AND is_valid = 1 \
                 AND (expires_at IS NULL OR expires_at > ?3)"
            );
            let record = conn
                .query_row(
                    &sql,
                    params![commit_hash, index_name, Utc::now()],
                    vector_index_from_row,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn insert_vector_index(&self, record: &VectorIndexRecord) -> Result<()> {
        if record.commit_hash.trim().is_empty() {
            return Err(MetadataError::InvalidRecord("empty commit hash".into()));
        }
        let record = record.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE vector_indexes SET is_valid = 0 \
                 WHERE commit_hash = ?1 AND index_name = ?2 AND is_valid = 1 \
                 AND expires_at IS NOT NULL AND expires_at <= ?3",
                params![record.commit_hash, record.index_name, Utc::now()],
            )?;
            let sql = format!(
                "INSERT INTO vector_indexes ({VECTOR_INDEX_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            );
            let key = format!("{}/{}", record.commit_hash, record.index_name);
            tx.execute(
                &sql,
                params![
                    record.id.to_string(),
                    record.analysis_id,
                    record.index_name,
                    record.commit_hash,
                    record.chunk_count,
                    record.embedding_dimension,
                    record.embedding_model,
                    record.is_valid,
                    record.indexing_duration_seconds,
                    record.created_at,
                    record.expires_at,
                ],
            )
            .map_err(|e| MetadataError::from_insert(e, &key))?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn invalidate_vector_index(&self, commit_hash: &str, index_name: &str) -> Result<usize> {
        let commit_hash = commit_hash.to_string();
        let index_name = index_name.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE vector_indexes SET is_valid = 0 \
                 WHERE commit_hash = ?1 AND index_name = ?2 AND is_valid = 1",
                params![commit_hash, index_name],
            )?;
            Ok(changed)
        })
        .await
    }

    async fn health_check(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

fn parse_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<GraphSnapshot> {
    let node_types: String = row.get(7)?;
    let node_types = serde_json::from_str(&node_types)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    Ok(GraphSnapshot {
        id: parse_uuid(row, 0)?,
        analysis_id: row.get(1)?,
        commit_hash: row.get(2)?,
        repo_url: row.get(3)?,
        branch: row.get(4)?,
        node_count: row.get(5)?,
        edge_count: row.get(6)?,
        node_types,
        build_duration_seconds: row.get(8)?,
        is_valid: row.get(9)?,
        created_at: row.get::<_, DateTime<Utc>>(10)?,
        expires_at: row.get(11)?,
    })
}

fn vector_index_from_row(row: &Row<'_>) -> rusqlite::Result<VectorIndexRecord> {
    Ok(VectorIndexRecord {
        id: parse_uuid(row, 0)?,
        analysis_id: row.get(1)?,
        index_name: row.get(2)?,
        commit_hash: row.get(3)?,
        chunk_count: row.get(4)?,
        embedding_dimension: row.get(5)?,
        embedding_model: row.get(6)?,
        is_valid: row.get(7)?,
        indexing_duration_seconds: row.get(8)?,
        created_at: row.get(9)?,
        expires_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn snapshot(commit: &str) -> GraphSnapshot {
        let mut snapshot = GraphSnapshot::new("analysis-1", commit);
        snapshot.node_count = 3;
        snapshot.edge_count = 2;
        snapshot.node_types.insert("File".into(), 1);
        snapshot.node_types.insert("Function".into(), 2);
        snapshot
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_sqlite() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let original = snapshot("abc123");
        store.insert_snapshot(&original).await.unwrap();

        let found = store.find_valid_snapshot("abc123").await.unwrap().unwrap();
        assert_eq!(found.id, original.id);
        assert_eq!(found.node_types, original.node_types);
        assert_eq!(found.branch, "main");
        assert!(store.find_valid_snapshot("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_valid_snapshot_for_commit_conflicts() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        store.insert_snapshot(&snapshot("abc123")).await.unwrap();
        let err = store.insert_snapshot(&snapshot("abc123")).await.unwrap_err();
        assert!(err.is_conflict(), "{err}");
    }

    #[tokio::test]
    async fn invalidated_snapshot_is_kept_but_not_reused() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        store.insert_snapshot(&snapshot("abc123")).await.unwrap();
        assert_eq!(store.invalidate_snapshot("abc123").await.unwrap(), 1);
        assert!(store.find_valid_snapshot("abc123").await.unwrap().is_none());

        let rebuilt = snapshot("abc123");
        store.insert_snapshot(&rebuilt).await.unwrap();
        let all = store.list_snapshots().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|s| s.is_valid).count(), 1);
        assert_eq!(
            store.find_valid_snapshot("abc123").await.unwrap().unwrap().id,
            rebuilt.id
        );
    }

    #[tokio::test]
    async fn expired_snapshot_frees_its_slot() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let mut expired = snapshot("abc123");
        expired.expires_at = Some(Utc::now() - Duration::minutes(5));
        store.insert_snapshot(&expired).await.unwrap();
        assert!(store.find_valid_snapshot("abc123").await.unwrap().is_none());

        store.insert_snapshot(&snapshot("abc123")).await.unwrap();
        assert!(store.find_valid_snapshot("abc123").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn vector_index_records_are_unique_per_commit_and_name() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let mut record = VectorIndexRecord::new("a-1", "code_embeddings", "abc123", "hash-256");
        record.chunk_count = 10;
        record.embedding_dimension = 256;
        store.insert_vector_index(&record).await.unwrap();

        let other_name = VectorIndexRecord::new("a-1", "docs", "abc123", "hash-256");
        store.insert_vector_index(&other_name).await.unwrap();

        let dup = VectorIndexRecord::new("a-2", "code_embeddings", "abc123", "hash-256");
        assert!(store.insert_vector_index(&dup).await.unwrap_err().is_conflict());

        let found = store
            .find_valid_vector_index("abc123", "code_embeddings")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.chunk_count, 10);
        assert_eq!(found.embedding_dimension, 256);

        assert_eq!(
            store
                .invalidate_vector_index("abc123", "code_embeddings")
                .await
                .unwrap(),
            1
        );
        assert!(store
            .find_valid_vector_index("abc123", "code_embeddings")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn rejects_empty_commit_hash() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let err = store.insert_snapshot(&snapshot("  ")).await.unwrap_err();
        assert!(matches!(err, MetadataError::InvalidRecord(_)));
        store.health_check().await.unwrap();
    }
}
