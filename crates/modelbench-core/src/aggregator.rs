//! Runs every model's session and assembles the benchmark report.
//!
//! Sessions are independent tokio tasks bounded by a semaphore; each sends
//! its outcome back over an mpsc channel. Nothing is shared between
//! sessions except the evaluator's read-only inputs.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    rank_reports, right_sized_pick, BenchError, ConfigError, ConsistencyReport, ModelSpec, Result,
};
use crate::evaluator::ConsistencyEvaluator;

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub iterations_per_model: u32,
    /// HEAD of the target project, when it is a git checkout.
    pub target_git_sha: Option<String>,
    pub reports: BTreeMap<String, ConsistencyReport>,
    /// Model ids, best first.
    pub ranking: Vec<String>,
    /// Cheapest autonomous-ready model.
    pub right_sized: Option<String>,
    /// Models whose sessions were cancelled before finishing.
    pub cancelled: Vec<String>,
    /// Models whose sessions died for reasons other than cancellation.
    pub failed: BTreeMap<String, String>,
}

impl BenchmarkReport {
    fn assemble(
        iterations_per_model: u32,
        reports: BTreeMap<String, ConsistencyReport>,
        mut cancelled: Vec<String>,
        failed: BTreeMap<String, String>,
    ) -> Self {
        let ranking = rank_reports(reports.values())
            .into_iter()
            .map(|r| r.model.id.clone())
            .collect();
        let right_sized = right_sized_pick(reports.values()).map(|r| r.model.id.clone());
        cancelled.sort();

        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            iterations_per_model,
            target_git_sha: None,
            reports,
            ranking,
            right_sized,
            cancelled,
            failed,
        }
    }

    pub fn with_git_sha(mut self, sha: Option<String>) -> Self {
        self.target_git_sha = sha;
        self
    }

    /// Reports in ranking order.
    pub fn ranked(&self) -> impl Iterator<Item = &ConsistencyReport> {
        self.ranking.iter().filter_map(|id| self.reports.get(id))
    }

    pub fn is_complete(&self) -> bool {
        self.cancelled.is_empty() && self.failed.is_empty()
    }
}

/// Flips every running session's cancel flag.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Stored even when no session is listening yet.
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Fans sessions out over a bounded worker pool.
pub struct ReportAggregator {
    evaluator: Arc<ConsistencyEvaluator>,
    max_concurrent: usize,
    cancel: Arc<watch::Sender<bool>>,
}

impl ReportAggregator {
    pub fn new(evaluator: Arc<ConsistencyEvaluator>, max_concurrent: usize) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            evaluator,
            max_concurrent: max_concurrent.max(1),
            cancel: Arc::new(tx),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel),
        }
    }

    /// Run one session per model and collect the results.
    ///
    /// Fails before starting anything when the roster is empty, repeats a
    /// model id or the iteration count is zero. Session-level failures are
    /// recorded in the report instead.
    #[instrument(skip(self, models), fields(models = models.len()))]
    pub async fn run(&self, models: &[ModelSpec]) -> Result<BenchmarkReport> {
        if models.is_empty() {
            return Err(ConfigError::NoModels.into());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = models.iter().find(|m| !seen.insert(m.id.as_str())) {
            return Err(ConfigError::DuplicateModel(dup.id.clone()).into());
        }
        if self.evaluator.settings().iterations == 0 {
            return Err(ConfigError::ZeroIterations.into());
        }

        let sem = Arc::new(Semaphore::new(self.max_concurrent));
        let (tx, mut rx) = mpsc::channel(models.len());
        let mut tasks = Vec::with_capacity(models.len());

        for model in models.iter().cloned() {
            let evaluator = Arc::clone(&self.evaluator);
            let sem = Arc::clone(&sem);
            let tx = tx.clone();
            let cancel_rx = self.cancel.subscribe();

            tasks.push((
                model.id.clone(),
                tokio::spawn(async move {
                    let outcome = match sem.acquire_owned().await {
                        Ok(_permit) => evaluator.run(&model, cancel_rx).await,
                        Err(e) => Err(BenchError::SessionAborted {
                            model: model.id.clone(),
                            detail: format!("worker pool closed: {e}"),
                        }),
                    };
                    let _ = tx.send((model.id, outcome)).await;
                }),
            ));
        }
        drop(tx);

        let mut reports = BTreeMap::new();
        let mut cancelled = Vec::new();
        let mut failed = BTreeMap::new();

        while let Some((model_id, outcome)) = rx.recv().await {
            match outcome {
                Ok(report) => {
                    info!(
                        model = %model_id,
                        consistency_score = report.consistency_score,
                        "session complete"
                    );
                    reports.insert(model_id, report);
                }
                Err(BenchError::Cancelled { completed, .. }) => {
                    warn!(model = %model_id, completed, "session cancelled, omitted from report");
                    cancelled.push(model_id);
                }
                Err(BenchError::Config(e)) => {
                    for (_, task) in &tasks {
                        task.abort();
                    }
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(model = %model_id, error = %e, "session failed");
                    failed.insert(model_id, e.to_string());
                }
            }
        }

        // Tasks that panicked never sent anything.
        for (model_id, task) in tasks {
            if let Err(e) = task.await {
                if !reports.contains_key(&model_id)
                    && !cancelled.contains(&model_id)
                    && !failed.contains_key(&model_id)
                {
                    warn!(model = %model_id, error = %e, "session task panicked");
                    failed.insert(model_id, format!("session task panicked: {e}"));
                }
            }
        }

        Ok(BenchmarkReport::assemble(
            self.evaluator.settings().iterations,
            reports,
            cancelled,
            failed,
        ))
    }
}
