//! Stage execution inside a scratch workspace.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

use modelbench_core::VerificationTarget;

use crate::stage::StageConfig;

/// Result of a stage that ran to completion.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage_name: String,

    /// Exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,
}

impl StageResult {
    /// Whether the process exited with status 0.
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Why a stage produced no result.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("stage {0} has an empty command")]
    EmptyCommand(String),

    #[error("failed to start stage {stage}: {source}")]
    Spawn {
        stage: String,
        source: std::io::Error,
    },

    #[error("stage {stage} timed out after {limit_ms}ms")]
    TimedOut { stage: String, limit_ms: u64 },

    #[error("stage {stage} failed while running: {source}")]
    Io {
        stage: String,
        source: std::io::Error,
    },
}

/// Runs verification stages as child processes.
pub struct StageRunner;

impl StageRunner {
    /// Run `config` from the workspace root of `target`.
    ///
    /// The child is killed if the timeout fires or the returned future is
    /// dropped, so a cancelled iteration leaves no stray tool behind.
    pub async fn execute_stage(
        config: &StageConfig,
        target: &VerificationTarget,
    ) -> Result<StageResult, StageError> {
        let start = Instant::now();

        let command = config.resolve(target);
        let Some((exe, args)) = command.split_first() else {
            return Err(StageError::EmptyCommand(config.name.clone()));
        };

        debug!(stage = %config.name, command = ?command, cwd = %target.workspace_root.display(), "starting stage");

        let child = Command::new(exe)
            .args(args)
            .current_dir(&target.workspace_root)
            // Keep the scratch tree free of bytecode caches.
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StageError::Spawn {
                stage: config.name.clone(),
                source,
            })?;

        let waited = if config.timeout_secs > 0 {
            let limit = Duration::from_secs(config.timeout_secs);
            tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| StageError::TimedOut {
                    stage: config.name.clone(),
                    limit_ms: limit.as_millis() as u64,
                })?
        } else {
            child.wait_with_output().await
        };
        let output = waited.map_err(|source| StageError::Io {
            stage: config.name.clone(),
            source,
        })?;

        let result = StageResult {
            stage_name: config.name.clone(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        debug!(stage = %result.stage_name, exit_code = ?result.exit_code, duration_ms = result.duration_ms, "stage finished");
        Ok(result)
    }
}
