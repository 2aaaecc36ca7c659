//! Per-model consistency aggregation and right-sizing order.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::model::ModelSpec;
use crate::domain::outcome::IterationRecord;

/// Token spend across the billed iterations of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenCostProfile {
    /// Iterations that billed tokens (successful completions and billed failures).
    pub billed_iterations: u32,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    /// `total_tokens / billed_iterations`, zero when nothing was billed.
    pub mean_total_tokens: f64,
}

impl TokenCostProfile {
    pub fn from_records(records: &[IterationRecord]) -> Self {
        let mut profile = TokenCostProfile::default();
        for usage in records.iter().filter_map(IterationRecord::billed_usage) {
            profile.billed_iterations += 1;
            profile.total_input_tokens += usage.input_tokens;
            profile.total_output_tokens += usage.output_tokens;
            profile.total_tokens += usage.total_tokens;
        }
        if profile.billed_iterations > 0 {
            profile.mean_total_tokens =
                profile.total_tokens as f64 / f64::from(profile.billed_iterations);
        }
        profile
    }
}

/// Aggregate verdict for one model. Always recomputed from its records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub model: ModelSpec,
    pub iterations: Vec<IterationRecord>,
    /// Fraction of iterations that applied cleanly and passed every check.
    pub consistency_score: f64,
    /// Every iteration passed.
    pub autonomous_ready: bool,
    pub token_cost: TokenCostProfile,
    /// Medium+ security findings summed over all iterations.
    pub security_findings: u64,
    pub verification_timeouts: u32,
    /// Number of distinct generated code bodies (byte identity).
    pub distinct_generations: u32,
    pub mean_latency_ms: f64,
}

impl ConsistencyReport {
    pub fn from_records(model: ModelSpec, iterations: Vec<IterationRecord>) -> Self {
        let total = iterations.len();
        let passing = iterations.iter().filter(|r| r.is_passing()).count();
        let consistency_score = if total == 0 {
            0.0
        } else {
            passing as f64 / total as f64
        };

        let security_findings = iterations
            .iter()
            .filter_map(|r| r.verification.as_ref())
            .map(|v| v.blocking_findings())
            .sum();

        let verification_timeouts = iterations
            .iter()
            .filter(|r| r.verification_timed_out())
            .count() as u32;

        let distinct_generations = iterations
            .iter()
            .filter_map(|r| r.code_digest.as_deref())
            .collect::<HashSet<_>>()
            .len() as u32;

        let latencies: Vec<u64> = iterations
            .iter()
            .filter_map(|r| r.completion.as_ref().map(|c| c.latency_ms))
            .collect();
        let mean_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };

        Self {
            token_cost: TokenCostProfile::from_records(&iterations),
            model,
            consistency_score,
            autonomous_ready: total > 0 && passing == total,
            security_findings,
            verification_timeouts,
            distinct_generations,
            mean_latency_ms,
            iterations,
        }
    }

    pub fn passing_iterations(&self) -> usize {
        self.iterations.iter().filter(|r| r.is_passing()).count()
    }
}

/// Right-sizing order: higher consistency first, then lower mean token
/// cost, then model id so equal inputs always sort the same way.
pub fn compare_reports(a: &ConsistencyReport, b: &ConsistencyReport) -> Ordering {
    b.consistency_score
        .total_cmp(&a.consistency_score)
        .then_with(|| {
            a.token_cost
                .mean_total_tokens
                .total_cmp(&b.token_cost.mean_total_tokens)
        })
        .then_with(|| a.model.id.cmp(&b.model.id))
}

/// Sort reports best-first.
pub fn rank_reports<'a, I>(reports: I) -> Vec<&'a ConsistencyReport>
where
    I: IntoIterator<Item = &'a ConsistencyReport>,
{
    let mut ranked: Vec<&ConsistencyReport> = reports.into_iter().collect();
    ranked.sort_by(|a, b| compare_reports(a, b));
    ranked
}

/// Cheapest autonomous-ready model, if any model reached a perfect score.
pub fn right_sized_pick<'a, I>(reports: I) -> Option<&'a ConsistencyReport>
where
    I: IntoIterator<Item = &'a ConsistencyReport>,
{
    rank_reports(reports)
        .into_iter()
        .find(|r| r.autonomous_ready)
}
