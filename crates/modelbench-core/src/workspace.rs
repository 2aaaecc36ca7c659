//! Scratch workspaces and scoped artifact leases.
//!
//! The target project is read once into a [`TargetArtifact`] and shared
//! read-only between sessions. Each session copies the project into its own
//! [`SessionWorkspace`] (a temp dir deleted on drop). Each iteration takes an
//! [`ArtifactLease`] on the scratch artifact; the lease puts the baseline
//! bytes back when it is restored or dropped, so no iteration can observe a
//! previous one's patch. The original project is never written.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::domain::{ConfigError, WorkspaceError};

/// Directories never copied into a scratch workspace.
pub const DEFAULT_EXCLUDES: &[&str] = &[".git", ".pytest_cache", "__pycache__", "coverage"];

/// Read-only view of the pristine target project and artifact.
#[derive(Debug)]
pub struct TargetArtifact {
    project_root: PathBuf,
    relative_path: PathBuf,
    baseline: String,
    excludes: Vec<String>,
}

impl TargetArtifact {
    /// Load the artifact at `project_root/relative_path` and capture its baseline.
    pub fn load(
        project_root: impl Into<PathBuf>,
        relative_path: impl Into<PathBuf>,
        excludes: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let project_root = project_root.into();
        let relative_path = relative_path.into();

        if relative_path.is_absolute()
            || relative_path
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(ConfigError::InvalidTarget(format!(
                "artifact path {} must be relative to the project root",
                relative_path.display()
            )));
        }

        if let Some(first) = relative_path.components().next() {
            let first = first.as_os_str().to_string_lossy();
            if excludes.iter().any(|e| *e == first) {
                return Err(ConfigError::InvalidTarget(format!(
                    "artifact path {} lies in an excluded directory",
                    relative_path.display()
                )));
            }
        }

        let full = project_root.join(&relative_path);
        let bytes = fs::read(&full).map_err(|e| {
            ConfigError::InvalidTarget(format!("cannot read {}: {e}", full.display()))
        })?;
        let baseline = String::from_utf8(bytes).map_err(|_| {
            ConfigError::InvalidTarget(format!("{} is not valid UTF-8", full.display()))
        })?;

        Ok(Self {
            project_root,
            relative_path,
            baseline,
            excludes,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    /// Path of the pristine original.
    pub fn original_path(&self) -> PathBuf {
        self.project_root.join(&self.relative_path)
    }

    pub fn baseline(&self) -> &str {
        &self.baseline
    }
}

/// A session's private copy of the target project.
#[derive(Debug)]
pub struct SessionWorkspace {
    dir: TempDir,
    artifact_path: PathBuf,
    target: Arc<TargetArtifact>,
}

impl SessionWorkspace {
    /// Copy the target project into a fresh temp dir.
    ///
    /// Blocking; call it from `spawn_blocking` inside async code.
    pub fn create(target: Arc<TargetArtifact>) -> Result<Self, WorkspaceError> {
        let dir = tempfile::Builder::new()
            .prefix("modelbench-")
            .tempdir()
            .map_err(WorkspaceError::Copy)?;

        copy_tree(target.project_root(), dir.path(), &target.excludes)
            .map_err(WorkspaceError::Copy)?;

        let artifact_path = dir.path().join(target.relative_path());
        // The copy may carry local edits from a dirty checkout; the baseline wins.
        fs::write(&artifact_path, target.baseline().as_bytes()).map_err(|source| {
            WorkspaceError::Restore {
                path: artifact_path.display().to_string(),
                source,
            }
        })?;

        debug!(root = %dir.path().display(), "scratch workspace created");

        Ok(Self {
            dir,
            artifact_path,
            target,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Scratch copy of the artifact.
    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn baseline(&self) -> &str {
        self.target.baseline()
    }

    /// Take exclusive access to the scratch artifact for one iteration.
    ///
    /// Restores the baseline first if anything left the file modified.
    pub fn lease(&mut self) -> Result<ArtifactLease<'_>, WorkspaceError> {
        let mut lease = ArtifactLease {
            workspace: self,
            dirty: false,
        };
        if !lease.matches_baseline() {
            warn!(
                artifact = %lease.workspace.artifact_path.display(),
                "scratch artifact drifted from baseline, restoring before lease"
            );
            lease.restore()?;
        }
        Ok(lease)
    }

    fn write_baseline(&self) -> Result<(), WorkspaceError> {
        let path = self.artifact_path.display().to_string();
        fs::write(&self.artifact_path, self.baseline().as_bytes())
            .map_err(|source| WorkspaceError::Restore { path: path.clone(), source })?;

        let current = fs::read(&self.artifact_path)
            .map_err(|source| WorkspaceError::Restore { path: path.clone(), source })?;
        if current != self.baseline().as_bytes() {
            return Err(WorkspaceError::BaselineMismatch(path));
        }
        Ok(())
    }
}

/// Scoped, exclusive access to the scratch artifact.
///
/// Dropping the lease restores the baseline if it was modified, which covers
/// early returns, cancelled futures and panics.
#[derive(Debug)]
pub struct ArtifactLease<'a> {
    workspace: &'a SessionWorkspace,
    dirty: bool,
}

impl ArtifactLease<'_> {
    /// Baseline content of the artifact.
    pub fn baseline(&self) -> &str {
        self.workspace.baseline()
    }

    pub fn artifact_path(&self) -> &Path {
        self.workspace.artifact_path()
    }

    pub fn workspace_root(&self) -> &Path {
        self.workspace.root()
    }

    /// Replace the scratch artifact's content.
    pub fn write(&mut self, content: &str) -> io::Result<()> {
        self.dirty = true;
        fs::write(self.workspace.artifact_path(), content.as_bytes())
    }

    /// Put the baseline back and verify it landed byte-for-byte.
    pub fn restore(&mut self) -> Result<(), WorkspaceError> {
        self.workspace.write_baseline()?;
        self.dirty = false;
        Ok(())
    }

    pub fn matches_baseline(&self) -> bool {
        fs::read(self.workspace.artifact_path())
            .map(|bytes| bytes == self.baseline().as_bytes())
            .unwrap_or(false)
    }
}

impl Drop for ArtifactLease<'_> {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.workspace.write_baseline() {
                warn!(error = %e, "failed to restore artifact on lease drop");
            }
        }
    }
}

fn copy_tree(src: &Path, dst: &Path, excludes: &[String]) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if excludes.iter().any(|e| name.to_string_lossy() == e.as_str()) {
            continue;
        }

        let from = entry.path();
        let to = dst.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            copy_tree(&from, &to, excludes)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to).map(|_| ())
}
