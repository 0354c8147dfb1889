use crate::analyzer::{AnalysisTarget, Analyzer};
use crate::envelope::{Payload, ToolType};
use crate::error::{AnalyzerError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::OnceCell;

pub const DORA_CALCULATOR: &str = "DORA_CALCULATOR";

/// Commits inspected when no window is configured
pub const DEFAULT_CHURN_WINDOW: usize = 100;

const VERSION: &str = "1.0.0";
const COMMIT_MARKER: &str = "@@insight-commit@@";

#[derive(Debug, Default, PartialEq, Eq)]
struct ChurnTable {
    commits: usize,
    touches: HashMap<String, usize>,
}

fn parse_log(stdout: &str) -> ChurnTable {
    let mut table = ChurnTable::default();
    let mut seen: HashSet<&str> = HashSet::new();
    for line in stdout.lines().map(str::trim) {
        if line == COMMIT_MARKER {
            table.commits += 1;
            seen.clear();
        } else if !line.is_empty() && seen.insert(line) {
            *table.touches.entry(line.to_string()).or_default() += 1;
        }
    }
    table
}

/// Change frequency of each file over the most recent commits.
///
/// History is read once per repository and shared by every file. Only
/// commits touching the analyzed root count, and paths are reported
/// relative to it so a subdirectory of a checkout keys like its targets.
pub struct DoraCalculator {
    repo_root: PathBuf,
    window: usize,
    table: OnceCell<std::result::Result<ChurnTable, String>>,
}

impl DoraCalculator {
    pub fn new(repo_root: impl AsRef<Path>, window: usize) -> Self {
        Self {
            repo_root: repo_root.as_ref().to_path_buf(),
            window: window.max(1),
            table: OnceCell::new(),
        }
    }

    async fn load(&self) -> std::result::Result<ChurnTable, String> {
        let output = Command::new("git")
            .arg("log")
            .arg(format!("-n{}", self.window))
            .arg("--name-only")
            .arg("--relative")
            .arg(format!("--pretty=format:{COMMIT_MARKER}"))
            .args(["--", "."])
            .current_dir(&self.repo_root)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("git unavailable: {e}"))?;
        if !output.status.success() {
            return Err(format!(
                "git log failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let table = parse_log(&String::from_utf8_lossy(&output.stdout));
        log::debug!(
            "churn table: {} commits, {} files",
            table.commits,
            table.touches.len()
        );
        Ok(table)
    }
}

#[async_trait]
impl Analyzer for DoraCalculator {
    type Context = ();

    fn name(&self) -> &str {
        DORA_CALCULATOR
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn kind(&self) -> ToolType {
        ToolType::Tool
    }

    async fn analyze(&self, target: &AnalysisTarget, _ctx: &()) -> Result<Payload> {
        let table = self
            .table
            .get_or_init(|| self.load())
            .await
            .as_ref()
            .map_err(|e| AnalyzerError::Execution(e.clone()))?;

        let touching = table.touches.get(&target.file_path).copied().unwrap_or(0);
        let churn_rate = if table.commits == 0 {
            0.0
        } else {
            touching as f64 / table.commits as f64
        };

        let mut payload = Payload::new();
        payload.insert("window".into(), json!(self.window));
        payload.insert("commits_in_window".into(), json!(table.commits));
        payload.insert("commits_touching_file".into(), json!(touching));
        payload.insert("churn_rate".into(), json!(churn_rate));
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_git::{commit_all, init_repo};
    use pretty_assertions::assert_eq;

    #[test]
    fn log_output_is_counted_per_commit() {
        let stdout = format!(
            "{m}\nsrc/a.py\nsrc/b.py\n\n{m}\nsrc/a.py\n\n{m}\nsrc/a.py\nsrc/a.py\n\n{m}\n",
            m = COMMIT_MARKER
        );
        let table = parse_log(&stdout);
        assert_eq!(table.commits, 4);
        assert_eq!(table.touches.get("src/a.py"), Some(&3));
        assert_eq!(table.touches.get("src/b.py"), Some(&1));
    }

    #[tokio::test]
    async fn non_repository_fails_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let calculator = DoraCalculator::new(dir.path(), 10);
        let target = AnalysisTarget::new(dir.path(), "a.py");
        assert!(calculator.analyze(&target, &()).await.is_err());
        assert!(calculator.analyze(&target, &()).await.is_err());
    }

    #[tokio::test]
    async fn subdirectory_root_matches_relative_targets() {
        let dir = tempfile::tempdir().unwrap();
        let service = dir.path().join("svc");
        std::fs::create_dir_all(&service).unwrap();
        std::fs::write(service.join("a.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("top.py"), "y = 1\n").unwrap();
        if !init_repo(dir.path()) || !commit_all(dir.path(), "add files") {
            return;
        }
        std::fs::write(dir.path().join("top.py"), "y = 2\n").unwrap();
        assert!(commit_all(dir.path(), "outside the service"));
        std::fs::write(service.join("a.py"), "x = 2\n").unwrap();
        assert!(commit_all(dir.path(), "inside the service"));

        let calculator = DoraCalculator::new(&service, 10);
        let payload = calculator
            .analyze(&AnalysisTarget::new(&service, "a.py"), &())
            .await
            .unwrap();
        assert_eq!(payload["commits_in_window"], json!(2));
        assert_eq!(payload["commits_touching_file"], json!(2));
        assert_eq!(payload["churn_rate"], json!(1.0));
    }
}
