//! Repository-wide contribution statistics of one author.

use crate::error::{AnalyzerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

pub const CONTRIBUTION_ANALYZER: &str = "CONTRIBUTION_ANALYZER";

const COMMIT_MARKER: &str = "@@insight-commit@@";

/// What one author did to the history and still owns in the checkout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionStats {
    pub author: String,
    pub commits: usize,
    pub added_lines: u64,
    pub deleted_lines: u64,
    pub files_changed: usize,
    /// Lines of tracked files whose blame points at the author
    pub owned_lines: u64,
    pub files_blamed: usize,
    /// Binary or unreadable files skipped by blame
    pub files_skipped: usize,
}

/// Counts `git log --numstat` output framed by [`COMMIT_MARKER`] lines.
/// Binary files (`-\t-\tpath`) count as changed without line totals.
fn parse_numstat(stdout: &str, stats: &mut ContributionStats) {
    let mut files = BTreeSet::new();
    for line in stdout.lines() {
        if line.trim() == COMMIT_MARKER {
            stats.commits += 1;
            continue;
        }
        let mut parts = line.splitn(3, '\t');
        let (Some(added), Some(deleted), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if let (Ok(added), Ok(deleted)) = (added.parse::<u64>(), deleted.parse::<u64>()) {
            stats.added_lines += added;
            stats.deleted_lines += deleted;
        }
        files.insert(path.to_string());
    }
    stats.files_changed = files.len();
}

/// Lines in `git blame --line-porcelain` output attributed to `author`,
/// matched by name or by bare email
fn count_owned_lines(porcelain: &str, author: &str) -> u64 {
    let mut owned = 0;
    let mut name_matched = false;
    for line in porcelain.lines() {
        if let Some(name) = line.strip_prefix("author ") {
            name_matched = name.trim() == author;
        } else if let Some(mail) = line.strip_prefix("author-mail ") {
            let mail = mail.trim().trim_start_matches('<').trim_end_matches('>');
            if name_matched || mail == author {
                owned += 1;
            }
        }
    }
    owned
}

/// Commits, line churn and current blame ownership of one author.
///
/// Only history and files under the analyzed root count, so a subdirectory
/// of a larger checkout reports its own share.
pub struct ContributionAnalyzer {
    repo_root: PathBuf,
    author: String,
}

impl ContributionAnalyzer {
    pub fn new(repo_root: impl AsRef<Path>, author: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.as_ref().to_path_buf(),
            author: author.into(),
        }
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    async fn git(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AnalyzerError::Execution(format!("git unavailable: {e}")))?;
        if !output.status.success() {
            return Err(AnalyzerError::Execution(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    pub async fn analyze(&self, cancel: &CancellationToken) -> Result<ContributionStats> {
        let mut stats = ContributionStats {
            author: self.author.clone(),
            ..ContributionStats::default()
        };

        let author_filter = format!("--author={}", self.author);
        let pretty = format!("--pretty=format:{COMMIT_MARKER}");
        let log = self
            .cancellable(
                cancel,
                self.git(&[
                    "log",
                    &author_filter,
                    "--fixed-strings",
                    "--numstat",
                    "--relative",
                    &pretty,
                    "--",
                    ".",
                ]),
            )
            .await?;
        parse_numstat(&String::from_utf8_lossy(&log), &mut stats);

        let listed = self
            .cancellable(cancel, self.git(&["ls-files", "-z", "--", "."]))
            .await?;
        let listed = String::from_utf8_lossy(&listed);
        for file in listed.split('\0').filter(|f| !f.is_empty()) {
            let blame = self
                .cancellable(cancel, self.git(&["blame", "--line-porcelain", "--", file]))
                .await;
            match blame {
                Ok(porcelain) => {
                    let porcelain = String::from_utf8_lossy(&porcelain);
                    stats.owned_lines += count_owned_lines(&porcelain, &self.author);
                    stats.files_blamed += 1;
                }
                Err(AnalyzerError::Cancelled) => return Err(AnalyzerError::Cancelled),
                Err(err) => {
                    log::debug!("Not blaming {file}: {err}");
                    stats.files_skipped += 1;
                }
            }
        }

        log::info!(
            "{}: {} commits, +{}/-{} lines over {} files, owns {} lines",
            self.author,
            stats.commits,
            stats.added_lines,
            stats.deleted_lines,
            stats.files_changed,
            stats.owned_lines
        );
        Ok(stats)
    }

    async fn cancellable<T>(
        &self,
        cancel: &CancellationToken,
        work: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AnalyzerError::Cancelled),
            result = work => result,
        }
    }
}
