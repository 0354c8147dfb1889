use crate::error::{Result, VectorStoreError};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Content-addressed byte store.
///
/// Keys are `/`-separated; the last segment is expected to be a hex hash so
/// entries spread across shard directories.
#[async_trait]
pub trait BlobCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `bytes` under `key`. An existing entry is left untouched.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Blob cache on the local filesystem
#[derive(Clone, Debug)]
pub struct FsBlobCache {
    base_dir: PathBuf,
}

impl FsBlobCache {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn blob_path(&self, key: &str) -> PathBuf {
        let mut segments: Vec<String> = key
            .split('/')
            .filter(|s| !s.is_empty())
            .map(safe_component)
            .collect();
        let leaf = segments.pop().unwrap_or_else(|| "_".to_string());
        let (shard_a, shard_b) = shard_dirs(&leaf);

        let mut path = self.base_dir.clone();
        for segment in segments {
            path.push(segment);
        }
        path.push(shard_a);
        path.push(shard_b);
        path.push(format!("{leaf}.bin"));
        path
    }
}

#[async_trait]
impl BlobCache for FsBlobCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(VectorStoreError::Cache(format!(
                "read {}: {err}",
                path.display()
            ))),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(key);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("bin.{}.tmp", std::process::id()));
        tokio::fs::write(&tmp, bytes).await?;
        if tokio::fs::rename(&tmp, &path).await.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        Ok(())
    }
}

pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Bounded in-process blob cache with LRU eviction
pub struct MemoryBlobCache {
    entries: Mutex<LruCache<String, Vec<u8>>>,
}

impl MemoryBlobCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBlobCache {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

#[async_trait]
impl BlobCache for MemoryBlobCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| VectorStoreError::Cache("memory cache lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| VectorStoreError::Cache("memory cache lock poisoned".to_string()))?;
        if !entries.contains(key) {
            entries.put(key.to_string(), bytes.to_vec());
        }
        Ok(())
    }
}

fn safe_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    match out.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => out,
    }
}

fn shard_dirs(hex: &str) -> (String, String) {
    let a = hex.get(0..2).unwrap_or("00").to_string();
    let b = hex.get(2..4).unwrap_or("00").to_string();
    (a, b)
}
