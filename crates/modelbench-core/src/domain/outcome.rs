//! Per-iteration outcomes: patch, verification and the bundled record.

use serde::{Deserialize, Serialize};

use crate::domain::completion::{CompletionResult, TokenUsage};
use crate::domain::error::EndpointError;

/// Why generated code could not be injected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchFailure {
    /// The insertion point is absent from the artifact.
    AnchorNotFound { anchor: String },
    /// The generated text cannot be embedded.
    MalformedInjection { reason: String },
}

/// Result of one patch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOutcome {
    pub applied: bool,
    pub failure: Option<PatchFailure>,
}

impl PatchOutcome {
    pub fn applied() -> Self {
        Self {
            applied: true,
            failure: None,
        }
    }

    pub fn rejected(failure: PatchFailure) -> Self {
        Self {
            applied: false,
            failure: Some(failure),
        }
    }
}

/// Outcome of one external check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckOutcome<T> {
    /// The tool ran to completion and its output was parsed.
    Completed(T),
    /// The tool exceeded its time budget and was killed.
    TimedOut { limit_ms: u64 },
    /// The tool could not be started or its output could not be read.
    ToolError { message: String },
}

impl<T> CheckOutcome<T> {
    pub fn completed(&self) -> Option<&T> {
        match self {
            CheckOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CheckOutcome::TimedOut { .. })
    }
}

/// Regression-test counts from the functional check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestTally {
    pub passed: u64,
    pub failed: u64,
    pub errors: u64,
    pub skipped: u64,
    /// Whether the test process exited successfully.
    pub exit_success: bool,
    /// Minimum number of passing tests for the suite to count as intact.
    pub required_passed: u64,
}

impl TestTally {
    pub fn is_passing(&self) -> bool {
        self.exit_success
            && self.failed == 0
            && self.errors == 0
            && self.passed >= self.required_passed
    }
}

/// Security findings by severity from the static scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityTally {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
}

impl SecurityTally {
    /// Findings at medium severity or above.
    pub fn blocking(&self) -> u64 {
        self.medium + self.high
    }

    pub fn is_passing(&self) -> bool {
        self.blocking() == 0
    }
}

/// Combined result of the functional and security checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub functional: CheckOutcome<TestTally>,
    pub security: CheckOutcome<SecurityTally>,
}

impl VerificationOutcome {
    /// Both checks completed and both passed.
    pub fn passed(&self) -> bool {
        self.functional.completed().is_some_and(TestTally::is_passing)
            && self.security.completed().is_some_and(SecurityTally::is_passing)
    }

    pub fn timed_out(&self) -> bool {
        self.functional.is_timeout() || self.security.is_timeout()
    }

    /// Medium+ findings, zero when the scan did not complete.
    pub fn blocking_findings(&self) -> u64 {
        self.security.completed().map(SecurityTally::blocking).unwrap_or(0)
    }

    /// Every rule this outcome breaks, one line each; empty when it passed.
    ///
    /// Unlike [`IterationFailure::from_verification`], which keeps only the
    /// highest-precedence cause, this lists all of them.
    pub fn violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        match &self.functional {
            CheckOutcome::Completed(tally) => {
                if !tally.exit_success {
                    violations.push("functional: test runner exited unsuccessfully".to_string());
                }
                if tally.failed > 0 || tally.errors > 0 {
                    violations.push(format!(
                        "functional: {} failed, {} errors",
                        tally.failed, tally.errors
                    ));
                }
                if tally.passed < tally.required_passed {
                    violations.push(format!(
                        "functional: {} passed, {} required",
                        tally.passed, tally.required_passed
                    ));
                }
            }
            CheckOutcome::TimedOut { limit_ms } => {
                violations.push(format!("functional: timed out after {limit_ms}ms"));
            }
            CheckOutcome::ToolError { message } => {
                violations.push(format!("functional: {message}"));
            }
        }

        match &self.security {
            CheckOutcome::Completed(tally) => {
                if tally.blocking() > 0 {
                    violations.push(format!(
                        "security: {} high, {} medium findings",
                        tally.high, tally.medium
                    ));
                }
            }
            CheckOutcome::TimedOut { limit_ms } => {
                violations.push(format!("security: timed out after {limit_ms}ms"));
            }
            CheckOutcome::ToolError { message } => {
                violations.push(format!("security: {message}"));
            }
        }

        violations
    }
}

/// Everything that can make an iteration fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IterationFailure {
    Endpoint { error: EndpointError },
    AnchorNotFound { anchor: String },
    MalformedInjection { reason: String },
    /// At least one check ran out of time. Kept apart from functional failures.
    VerificationTimeout { checks: Vec<String> },
    VerificationToolError { message: String },
    FunctionalFailure { passed: u64, failed: u64, errors: u64 },
    SecurityFindings { medium: u64, high: u64 },
    Workspace { message: String },
}

impl IterationFailure {
    pub fn from_patch(failure: &PatchFailure) -> Self {
        match failure {
            PatchFailure::AnchorNotFound { anchor } => IterationFailure::AnchorNotFound {
                anchor: anchor.clone(),
            },
            PatchFailure::MalformedInjection { reason } => IterationFailure::MalformedInjection {
                reason: reason.clone(),
            },
        }
    }

    /// Classify a verification outcome, `None` when it passed.
    ///
    /// Timeouts win over tool errors, which win over genuine check failures.
    pub fn from_verification(outcome: &VerificationOutcome) -> Option<Self> {
        let mut timed_out = Vec::new();
        if outcome.functional.is_timeout() {
            timed_out.push("functional".to_string());
        }
        if outcome.security.is_timeout() {
            timed_out.push("security".to_string());
        }
        if !timed_out.is_empty() {
            return Some(IterationFailure::VerificationTimeout { checks: timed_out });
        }

        if let CheckOutcome::ToolError { message } = &outcome.functional {
            return Some(IterationFailure::VerificationToolError {
                message: message.clone(),
            });
        }
        if let CheckOutcome::ToolError { message } = &outcome.security {
            return Some(IterationFailure::VerificationToolError {
                message: message.clone(),
            });
        }

        if let Some(tally) = outcome.functional.completed() {
            if !tally.is_passing() {
                return Some(IterationFailure::FunctionalFailure {
                    passed: tally.passed,
                    failed: tally.failed,
                    errors: tally.errors,
                });
            }
        }

        if let Some(tally) = outcome.security.completed() {
            if !tally.is_passing() {
                return Some(IterationFailure::SecurityFindings {
                    medium: tally.medium,
                    high: tally.high,
                });
            }
        }

        None
    }

    /// Short machine-readable name used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            IterationFailure::Endpoint { .. } => "endpoint_error",
            IterationFailure::AnchorNotFound { .. } => "anchor_not_found",
            IterationFailure::MalformedInjection { .. } => "malformed_injection",
            IterationFailure::VerificationTimeout { .. } => "verification_timeout",
            IterationFailure::VerificationToolError { .. } => "verification_tool_error",
            IterationFailure::FunctionalFailure { .. } => "functional_failure",
            IterationFailure::SecurityFindings { .. } => "security_findings",
            IterationFailure::Workspace { .. } => "workspace_error",
        }
    }
}

/// One pipeline run for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based position within the session.
    pub index: u32,
    /// Completion attempts made, including retries.
    pub attempts: u32,
    pub completion: Option<CompletionResult>,
    pub patch: Option<PatchOutcome>,
    pub verification: Option<VerificationOutcome>,
    pub failure: Option<IterationFailure>,
    /// SHA-256 of the extracted code, when extraction happened.
    pub code_digest: Option<String>,
    /// All verification rules broken, see [`VerificationOutcome::violations`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
    pub duration_ms: u64,
}

impl IterationRecord {
    /// Record for an iteration whose completion call failed.
    pub fn endpoint_failure(index: u32, attempts: u32, error: EndpointError, duration_ms: u64) -> Self {
        Self {
            index,
            attempts,
            completion: None,
            patch: None,
            verification: None,
            failure: Some(IterationFailure::Endpoint { error }),
            code_digest: None,
            violations: Vec::new(),
            duration_ms,
        }
    }

    /// Patch applied and both checks passed.
    pub fn is_passing(&self) -> bool {
        self.failure.is_none()
            && self.patch.as_ref().is_some_and(|p| p.applied)
            && self.verification.as_ref().is_some_and(VerificationOutcome::passed)
    }

    /// Tokens billed for this iteration, if any.
    pub fn billed_usage(&self) -> Option<TokenUsage> {
        if let Some(completion) = &self.completion {
            return Some(completion.usage);
        }
        match &self.failure {
            Some(IterationFailure::Endpoint { error }) => error.billed_usage(),
            _ => None,
        }
    }

    pub fn verification_timed_out(&self) -> bool {
        matches!(self.failure, Some(IterationFailure::VerificationTimeout { .. }))
    }
}
