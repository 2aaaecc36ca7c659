//! Consistency evaluation for a single model.
//!
//! A session moves `Pending -> Running(1..=N) -> Aggregating -> Done`. Each
//! iteration chains completion, patch and verification against the
//! session's private workspace, and always produces exactly one
//! [`IterationRecord`]: a failing iteration is recorded and the session
//! moves on. Iterations run strictly one after another because each needs
//! the artifact at its baseline.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::completion::CompletionClient;
use crate::domain::{
    BenchError, CompletionResult, ConfigError, ConsistencyReport, EndpointError, IterationFailure,
    IterationRecord, ModelSpec, Result,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::patch::PatchApplier;
use crate::retry::RetryPolicy;
use crate::verify::{VerificationTarget, Verifier};
use crate::workspace::{SessionWorkspace, TargetArtifact};

/// Knobs for one evaluation session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatorSettings {
    /// Iterations per model (N).
    pub iterations: u32,
    /// Upper bound on one completion call; zero disables the bound.
    pub completion_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            iterations: 3,
            completion_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

/// Lifecycle of one model's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Running { iteration: u32 },
    Aggregating,
    Done,
}

impl SessionState {
    /// Whether `next` may follow `self` in a session of `total` iterations.
    pub fn can_transition_to(&self, next: &SessionState, total: u32) -> bool {
        match (self, next) {
            (SessionState::Pending, SessionState::Running { iteration }) => *iteration == 1,
            (SessionState::Running { iteration: i }, SessionState::Running { iteration: j }) => {
                *j == i + 1 && *j <= total
            }
            (SessionState::Running { iteration }, SessionState::Aggregating) => *iteration == total,
            (SessionState::Aggregating, SessionState::Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Pending => write!(f, "pending"),
            SessionState::Running { iteration } => write!(f, "running({iteration})"),
            SessionState::Aggregating => write!(f, "aggregating"),
            SessionState::Done => write!(f, "done"),
        }
    }
}

/// Mutable bookkeeping for one run; owned by that run alone.
struct Session {
    state: SessionState,
    total: u32,
    records: Vec<IterationRecord>,
}

impl Session {
    fn new(total: u32) -> Self {
        Self {
            state: SessionState::Pending,
            total,
            records: Vec::with_capacity(total as usize),
        }
    }

    fn advance(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(&next, self.total) {
            return Err(BenchError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(from = %self.state, to = %next, "session transition");
        self.state = next;
        Ok(())
    }
}

/// Drives N pipeline iterations for a model and aggregates them.
pub struct ConsistencyEvaluator {
    client: Arc<dyn CompletionClient>,
    verifier: Arc<dyn Verifier>,
    applier: PatchApplier,
    target: Arc<TargetArtifact>,
    prompt: Arc<str>,
    settings: EvaluatorSettings,
}

impl ConsistencyEvaluator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        verifier: Arc<dyn Verifier>,
        applier: PatchApplier,
        target: Arc<TargetArtifact>,
        prompt: Arc<str>,
        settings: EvaluatorSettings,
    ) -> Self {
        Self {
            client,
            verifier,
            applier,
            target,
            prompt,
            settings,
        }
    }

    pub fn settings(&self) -> &EvaluatorSettings {
        &self.settings
    }

    /// Run a full session for `model`.
    ///
    /// Flipping `cancel` to `true` abandons the in-flight iteration, restores
    /// the artifact and returns [`BenchError::Cancelled`].
    pub async fn run(
        &self,
        model: &ModelSpec,
        cancel: watch::Receiver<bool>,
    ) -> Result<ConsistencyReport> {
        let session_id = Uuid::new_v4().to_string();
        let span = obs::session_span(&model.id, &session_id);
        self.run_session(model, cancel).instrument(span).await
    }

    async fn run_session(
        &self,
        model: &ModelSpec,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ConsistencyReport> {
        let total = self.settings.iterations;
        if total == 0 {
            return Err(ConfigError::ZeroIterations.into());
        }

        let mut session = Session::new(total);
        obs::emit_session_started(&model.id, total);

        let cancelled_early = *cancel.borrow();
        if cancelled_early {
            obs::emit_session_cancelled(&model.id, 0);
            return Err(BenchError::Cancelled {
                model: model.id.clone(),
                completed: 0,
            });
        }

        let target = Arc::clone(&self.target);
        let mut workspace = tokio::task::spawn_blocking(move || SessionWorkspace::create(target))
            .await
            .map_err(|e| BenchError::SessionAborted {
                model: model.id.clone(),
                detail: format!("workspace setup panicked: {e}"),
            })??;

        for index in 1..=total {
            session.advance(SessionState::Running { iteration: index })?;

            let record = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    let completed = index - 1;
                    obs::emit_session_cancelled(&model.id, completed);
                    return Err(BenchError::Cancelled {
                        model: model.id.clone(),
                        completed,
                    });
                }
                record = self.run_iteration(model, index, &mut workspace) => record,
            };

            session.records.push(record);
        }

        session.advance(SessionState::Aggregating)?;
        let records = std::mem::take(&mut session.records);
        let report = ConsistencyReport::from_records(model.clone(), records);
        session.advance(SessionState::Done)?;

        obs::emit_session_finished(
            &model.id,
            report.consistency_score,
            report.autonomous_ready,
            report.token_cost.mean_total_tokens,
        );
        Ok(report)
    }

    async fn run_iteration(
        &self,
        model: &ModelSpec,
        index: u32,
        workspace: &mut SessionWorkspace,
    ) -> IterationRecord {
        let started = Instant::now();

        let (completion, attempts) = match self.complete_with_retry(model, index).await {
            (Ok(completion), attempts) => (completion, attempts),
            (Err(error), attempts) => {
                METRICS.inc_endpoint_failures();
                warn!(index, attempts, error = %error, "completion failed");
                let record = IterationRecord::endpoint_failure(
                    index,
                    attempts,
                    error,
                    elapsed_ms(started),
                );
                finish(model, &record);
                return record;
            }
        };

        let mut record = IterationRecord {
            index,
            attempts,
            completion: Some(completion),
            patch: None,
            verification: None,
            failure: None,
            code_digest: None,
            violations: Vec::new(),
            duration_ms: 0,
        };

        let mut lease = match workspace.lease() {
            Ok(lease) => lease,
            Err(e) => {
                record.failure = Some(IterationFailure::Workspace {
                    message: e.to_string(),
                });
                record.duration_ms = elapsed_ms(started);
                finish(model, &record);
                return record;
            }
        };

        let text = record
            .completion
            .as_ref()
            .map(|c| c.text.as_str())
            .unwrap_or_default();

        let attempt = match self.applier.apply(text, &mut lease) {
            Ok(attempt) => attempt,
            Err(e) => {
                record.failure = Some(IterationFailure::Workspace {
                    message: e.to_string(),
                });
                record.duration_ms = elapsed_ms(started);
                finish(model, &record);
                return record;
            }
        };

        record.code_digest = Some(attempt.code_digest);
        if let Some(failure) = &attempt.outcome.failure {
            METRICS.inc_patches_rejected();
            record.failure = Some(IterationFailure::from_patch(failure));
            record.patch = Some(attempt.outcome);
            record.duration_ms = elapsed_ms(started);
            finish(model, &record);
            return record;
        }
        record.patch = Some(attempt.outcome);

        let target = VerificationTarget {
            workspace_root: lease.workspace_root().to_path_buf(),
            artifact_path: lease.artifact_path().to_path_buf(),
        };
        let verification = self.verifier.verify(&target).await;

        let restored = lease.restore();
        drop(lease);

        record.failure = IterationFailure::from_verification(&verification);
        record.violations = verification.violations();
        if !record.violations.is_empty() {
            debug!(index, violations = ?record.violations, "verification failed");
        }
        if let Some(IterationFailure::VerificationTimeout { checks }) = &record.failure {
            METRICS.inc_verification_timeouts();
            obs::emit_verification_timeout(&model.id, index, checks);
        }
        if let Err(e) = restored {
            warn!(index, error = %e, "failed to restore artifact after verification");
            if record.failure.is_none() {
                record.failure = Some(IterationFailure::Workspace {
                    message: e.to_string(),
                });
            }
        }
        record.verification = Some(verification);
        record.duration_ms = elapsed_ms(started);

        if record.is_passing() {
            METRICS.inc_iterations_passed();
        }
        finish(model, &record);
        record
    }

    async fn complete_with_retry(
        &self,
        model: &ModelSpec,
        index: u32,
    ) -> (std::result::Result<CompletionResult, EndpointError>, u32) {
        let limit = self.settings.completion_timeout;
        let mut attempt = 1;

        loop {
            METRICS.inc_completions_requested();
            let call = self.client.complete(model, &self.prompt);
            let result = if limit.is_zero() {
                call.await
            } else {
                match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(EndpointError::Timeout {
                        limit_ms: limit.as_millis() as u64,
                    }),
                }
            };

            match result {
                Ok(completion) => return (Ok(completion), attempt),
                Err(error) => match self.settings.retry.next_delay(attempt, &error) {
                    Some(delay) => {
                        obs::emit_endpoint_retry(&model.id, index, attempt, &error);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return (Err(error), attempt),
                },
            }
        }
    }
}

fn finish(model: &ModelSpec, record: &IterationRecord) {
    obs::emit_iteration_finished(
        &model.id,
        record.index,
        record.is_passing(),
        record.failure.as_ref().map(IterationFailure::kind),
        record.billed_usage().map(|u| u.total_tokens).unwrap_or(0),
    );
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Resolves once the flag is `true`; never resolves if the sender goes away.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        let total = 3;
        assert!(SessionState::Pending.can_transition_to(&SessionState::Running { iteration: 1 }, total));
        assert!(SessionState::Running { iteration: 1 }
            .can_transition_to(&SessionState::Running { iteration: 2 }, total));
        assert!(SessionState::Running { iteration: 3 }
            .can_transition_to(&SessionState::Aggregating, total));
        assert!(SessionState::Aggregating.can_transition_to(&SessionState::Done, total));
    }

    #[test]
    fn illegal_transitions() {
        let total = 3;
        assert!(!SessionState::Pending.can_transition_to(&SessionState::Aggregating, total));
        assert!(!SessionState::Pending.can_transition_to(&SessionState::Running { iteration: 2 }, total));
        assert!(!SessionState::Running { iteration: 1 }
            .can_transition_to(&SessionState::Running { iteration: 3 }, total));
        assert!(!SessionState::Running { iteration: 3 }
            .can_transition_to(&SessionState::Running { iteration: 4 }, total));
        assert!(!SessionState::Running { iteration: 2 }
            .can_transition_to(&SessionState::Aggregating, total));
        assert!(!SessionState::Done.can_transition_to(&SessionState::Pending, total));
    }

    #[test]
    fn session_rejects_skipped_iteration() {
        let mut session = Session::new(2);
        session.advance(SessionState::Running { iteration: 1 }).unwrap();
        let err = session.advance(SessionState::Aggregating).unwrap_err();
        assert!(err.to_string().contains("running(1) -> aggregating"));
    }

    #[test]
    fn state_display() {
        assert_eq!(SessionState::Running { iteration: 2 }.to_string(), "running(2)");
        assert_eq!(SessionState::Done.to_string(), "done");
    }

    #[tokio::test]
    async fn cancelled_waits_for_true() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), cancelled(&mut rx))
            .await
            .expect("should resolve once cancelled");
    }

    #[tokio::test]
    async fn dropped_sender_never_cancels() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let res = tokio::time::timeout(Duration::from_millis(50), cancelled(&mut rx)).await;
        assert!(res.is_err());
    }
}
