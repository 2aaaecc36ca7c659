//! Verification stage definitions.

use serde::{Deserialize, Serialize};

use modelbench_core::{CheckCommand, VerificationTarget};

/// Replaced with the scratch artifact's absolute path.
pub const ARTIFACT_PLACEHOLDER: &str = "{artifact}";
/// Replaced with the scratch workspace root.
pub const ROOT_PLACEHOLDER: &str = "{root}";

/// The two checks every patched artifact goes through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Regression test suite (pytest-style summary on stdout).
    Functional,

    /// Static security scan (bandit-style JSON on stdout).
    Security,
}

impl CheckKind {
    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::Functional => "functional",
            CheckKind::Security => "security",
        }
    }
}

/// Configuration for one verification stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    pub kind: CheckKind,

    /// Command template; the first element is the executable.
    pub command: Vec<String>,

    /// Timeout in seconds. Zero means unbounded.
    pub timeout_secs: u64,
}

impl StageConfig {
    pub fn from_check(kind: CheckKind, check: &CheckCommand) -> Self {
        Self {
            name: kind.name().to_string(),
            kind,
            command: check.command.clone(),
            timeout_secs: check.timeout_secs,
        }
    }

    pub fn custom(name: impl Into<String>, kind: CheckKind, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            command,
            timeout_secs,
        }
    }

    /// The command with placeholders filled in for `target`.
    pub fn resolve(&self, target: &VerificationTarget) -> Vec<String> {
        let artifact = target.artifact_path.to_string_lossy();
        let root = target.workspace_root.to_string_lossy();
        self.command
            .iter()
            .map(|arg| {
                arg.replace(ARTIFACT_PLACEHOLDER, &artifact)
                    .replace(ROOT_PLACEHOLDER, &root)
            })
            .collect()
    }
}
