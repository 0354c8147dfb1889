//! Fresh checkouts of remote repositories.

use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Directory name of a clone: last path segment without `.git`
pub fn checkout_name(repo_url: &str) -> Result<String> {
    let last = repo_url
        .trim()
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default();
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() || name == "." || name == ".." {
        return Err(PipelineError::Config(format!(
            "cannot name a checkout of '{repo_url}'"
        )));
    }
    Ok(name.to_string())
}

/// Single-branch clone of `branch` into `{work_dir}/{name}`.
///
/// An existing checkout at that path is replaced.
pub async fn clone_repository(repo_url: &str, branch: &str, work_dir: &Path) -> Result<PathBuf> {
    let target = work_dir.join(checkout_name(repo_url)?);
    if tokio::fs::try_exists(&target).await.unwrap_or(false) {
        log::info!("Replacing existing checkout {}", target.display());
        tokio::fs::remove_dir_all(&target).await?;
    }
    tokio::fs::create_dir_all(work_dir).await?;

    log::info!("Cloning {repo_url} ({branch}) into {}", target.display());
    let output = Command::new("git")
        .args(["clone", "--quiet", "--branch", branch, "--single-branch", "--"])
        .arg(repo_url)
        .arg(&target)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| PipelineError::InvalidPath(format!("git unavailable: {err}")))?;
    if !output.status.success() {
        return Err(PipelineError::InvalidPath(format!(
            "failed to clone {repo_url}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn git(dir: &Path, args: &[&str]) -> bool {
        std::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.name=insight", "-c", "user.email=insight@example.com"])
            .args(args)
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn checkout_names_come_from_the_url() {
        assert_eq!(
            checkout_name("https://github.com/acme/widgets.git").unwrap(),
            "widgets"
        );
        assert_eq!(checkout_name("https://github.com/acme/widgets/").unwrap(), "widgets");
        assert_eq!(checkout_name("git@github.com:widgets.git").unwrap(), "widgets");
        assert!(checkout_name("https://github.com/..").is_err());
        assert!(checkout_name("").is_err());
    }

    #[tokio::test]
    async fn clones_the_requested_branch_and_replaces_old_checkouts() {
        let temp = tempfile::tempdir().unwrap();
        let origin = temp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        std::fs::write(origin.join("a.py"), "x = 1\n").unwrap();
        let ready = git(&origin, &["init", "-q", "-b", "trunk"])
            && git(&origin, &["add", "-A"])
            && git(&origin, &["commit", "-q", "-m", "init"]);
        if !ready {
            return;
        }

        let work = temp.path().join("work");
        let url = origin.to_string_lossy().into_owned();
        let first = clone_repository(&url, "trunk", &work).await.unwrap();
        assert_eq!(first, work.join("origin"));
        assert!(first.join("a.py").is_file());

        std::fs::write(first.join("scratch.txt"), "left over").unwrap();
        let second = clone_repository(&url, "trunk", &work).await.unwrap();
        assert_eq!(second, first);
        assert!(!second.join("scratch.txt").exists());
    }

    #[tokio::test]
    async fn missing_branch_is_an_invalid_path() {
        let temp = tempfile::tempdir().unwrap();
        let origin = temp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        std::fs::write(origin.join("a.py"), "x = 1\n").unwrap();
        let ready = git(&origin, &["init", "-q", "-b", "trunk"])
            && git(&origin, &["add", "-A"])
            && git(&origin, &["commit", "-q", "-m", "init"]);
        if !ready {
            return;
        }
        let url = origin.to_string_lossy().into_owned();
        let err = clone_repository(&url, "no-such-branch", &temp.path().join("work"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPath(_)), "{err}");
    }
}
