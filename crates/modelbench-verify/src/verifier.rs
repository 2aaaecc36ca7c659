//! The production [`Verifier`]: external test and scan commands.

use async_trait::async_trait;
use tracing::warn;

use modelbench_core::{
    CheckOutcome, SecurityTally, TestTally, VerificationConfig, VerificationOutcome,
    VerificationTarget, Verifier,
};

use crate::parse::{functional_tally, parse_bandit_json};
use crate::runner::{StageError, StageRunner};
use crate::stage::{CheckKind, StageConfig};

/// Runs the regression suite and the security scan concurrently.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    functional: StageConfig,
    security: StageConfig,
    min_passed: u64,
}

impl CommandVerifier {
    pub fn new(functional: StageConfig, security: StageConfig, min_passed: u64) -> Self {
        Self {
            functional,
            security,
            min_passed,
        }
    }

    pub fn from_config(config: &VerificationConfig) -> Self {
        Self::new(
            StageConfig::from_check(CheckKind::Functional, &config.functional),
            StageConfig::from_check(CheckKind::Security, &config.security),
            config.min_passed,
        )
    }

    async fn run_functional(&self, target: &VerificationTarget) -> CheckOutcome<TestTally> {
        match StageRunner::execute_stage(&self.functional, target).await {
            Ok(result) => {
                match functional_tally(result.exit_code, &result.stdout, &result.stderr, self.min_passed) {
                    Ok(tally) => CheckOutcome::Completed(tally),
                    Err(message) => CheckOutcome::ToolError { message },
                }
            }
            Err(e) => stage_failure(e),
        }
    }

    async fn run_security(&self, target: &VerificationTarget) -> CheckOutcome<SecurityTally> {
        match StageRunner::execute_stage(&self.security, target).await {
            Ok(result) => match parse_bandit_json(&result.stdout) {
                Ok(tally) => CheckOutcome::Completed(tally),
                Err(message) => CheckOutcome::ToolError { message },
            },
            Err(e) => stage_failure(e),
        }
    }
}

fn stage_failure<T>(err: StageError) -> CheckOutcome<T> {
    match err {
        StageError::TimedOut { stage, limit_ms } => {
            warn!(stage = %stage, limit_ms, "verification stage timed out");
            CheckOutcome::TimedOut { limit_ms }
        }
        other => CheckOutcome::ToolError {
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl Verifier for CommandVerifier {
    async fn verify(&self, target: &VerificationTarget) -> VerificationOutcome {
        let (functional, security) =
            tokio::join!(self.run_functional(target), self.run_security(target));
        VerificationOutcome {
            functional,
            security,
        }
    }
}
