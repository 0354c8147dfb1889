use insight_parser::RepoWalker;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::time::{timeout, Duration};

const GIT_TIMEOUT: Duration = Duration::from_millis(2_000);
const FINGERPRINT_HEX_LEN: usize = 40;
const DIRTY_SUFFIX_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitSource {
    Git,
    /// HEAD plus a content hash of the uncommitted tree
    GitDirty,
    /// Content hash of the supported source files
    Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIdentity {
    pub hash: String,
    pub source: CommitSource,
}

/// Cache key for the checkout at `root`.
///
/// A clean work tree is keyed by `git rev-parse HEAD`. Uncommitted changes
/// under `root` append a content fingerprint (`{head}+{16 hex}`), so edits
/// never reuse the graph of the commit they started from. Outside git the
/// fingerprint alone is the key. `data_dir`, when inside `root`, is left
/// out of the dirty check.
pub async fn resolve_commit(
    root: &Path,
    data_dir: Option<&Path>,
) -> std::io::Result<CommitIdentity> {
    if let Some(head) = git_head(root).await {
        match git_is_dirty(root, data_dir).await {
            Some(false) => {
                return Ok(CommitIdentity {
                    hash: head,
                    source: CommitSource::Git,
                })
            }
            Some(true) => {
                let content = fingerprint_blocking(root).await?;
                return Ok(CommitIdentity {
                    hash: format!("{head}+{}", &content[..DIRTY_SUFFIX_LEN]),
                    source: CommitSource::GitDirty,
                });
            }
            None => log::warn!("git status failed in {}, keying by content", root.display()),
        }
    }
    Ok(CommitIdentity {
        hash: fingerprint_blocking(root).await?,
        source: CommitSource::Fingerprint,
    })
}

async fn fingerprint_blocking(root: &Path) -> std::io::Result<String> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint(&root))
        .await
        .map_err(std::io::Error::other)?
}

async fn git(root: &Path, args: &[&str]) -> Option<String> {
    let output = timeout(
        GIT_TIMEOUT,
        tokio::process::Command::new("git")
            .arg("-C")
            .arg(root)
            .args(args)
            .kill_on_drop(true)
            .output(),
    )
    .await
    .ok()?
    .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn git_head(root: &Path) -> Option<String> {
    let head = git(root, &["rev-parse", "HEAD"]).await?.trim().to_string();
    (!head.is_empty()).then_some(head)
}

/// Tracked edits or untracked, non-ignored files below `root`
async fn git_is_dirty(root: &Path, data_dir: Option<&Path>) -> Option<bool> {
    let exclude = data_dir
        .and_then(|dir| dir.strip_prefix(root).ok())
        .filter(|rel| !rel.as_os_str().is_empty())
        .map(|rel| format!(":(exclude){}", rel.to_string_lossy().replace('\\', "/")));
    let mut args = vec!["status", "--porcelain", "--untracked-files=all", "--", "."];
    if let Some(exclude) = &exclude {
        args.push(exclude.as_str());
    }
    let status = git(root, &args).await?;
    Some(!status.trim().is_empty())
}

/// blake3 over sorted `(path, length, bytes)` records, 40 hex chars
pub fn fingerprint(root: &Path) -> std::io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    for file in RepoWalker::new(root).walk() {
        let bytes = std::fs::read(&file.path)?;
        hasher.update(file.relative.as_bytes());
        hasher.update(&[0]);
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    let hex = hasher.finalize().to_hex();
    Ok(hex.as_str()[..FINGERPRINT_HEX_LEN].to_string())
}
