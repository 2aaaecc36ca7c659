//! Git provenance for the target project.

use std::path::Path;
use std::process::Command;

use crate::domain::{BenchError, Result};

fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .map_err(|e| BenchError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        return Err(BenchError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// HEAD commit of the repository containing `dir`.
pub fn capture_head_sha(dir: &Path) -> Result<String> {
    let sha = git(dir, &["rev-parse", "--verify", "HEAD"])?;
    if sha.is_empty() {
        return Err(BenchError::Git("rev-parse returned no commit".to_string()));
    }
    Ok(sha)
}

pub fn is_git_repo(dir: &Path) -> bool {
    git(dir, &["rev-parse", "--is-inside-work-tree"])
        .map(|out| out == "true")
        .unwrap_or(false)
}

/// Whether the work tree has uncommitted changes.
pub fn is_dirty(dir: &Path) -> Result<bool> {
    git(dir, &["status", "--porcelain"]).map(|out| !out.is_empty())
}

/// HEAD SHA for reports, `None` outside a repository.
pub fn provenance(dir: &Path) -> Option<String> {
    if !is_git_repo(dir) {
        return None;
    }
    match capture_head_sha(dir) {
        Ok(sha) => Some(sha),
        Err(e) => {
            tracing::debug!(error = %e, "no HEAD commit for target project");
            None
        }
    }
}
