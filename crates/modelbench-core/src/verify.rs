//! Seam between the evaluator and the external verification tools.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::VerificationOutcome;

/// Location of a patched artifact inside a scratch workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationTarget {
    /// Root of the scratch copy of the project; checks run from here.
    pub workspace_root: PathBuf,
    /// Absolute path of the patched artifact.
    pub artifact_path: PathBuf,
}

/// Runs the functional and security checks against a patched artifact.
///
/// Never fails: tool problems and timeouts are folded into the outcome so one
/// bad iteration cannot abort a session.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, target: &VerificationTarget) -> VerificationOutcome;
}
