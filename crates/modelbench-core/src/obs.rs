//! Structured lifecycle events for evaluation sessions.
//!
//! Every event carries an `event` field so log pipelines can filter on it.
//! Verification timeouts are emitted at `warn` under their own event name,
//! separate from ordinary check failures, so flaky infrastructure stands
//! out from genuine regressions.

use tracing::{info, warn, Span};

/// Span tagging everything a session logs with its model and session id.
///
/// Attach it with `tracing::Instrument` rather than entering it, since
/// sessions hold it across await points.
pub fn session_span(model_id: &str, session_id: &str) -> Span {
    tracing::info_span!("modelbench.session", model = %model_id, session_id = %session_id)
}

pub fn emit_session_started(model_id: &str, iterations: u32) {
    info!(event = "session.started", model = %model_id, iterations);
}

pub fn emit_iteration_finished(
    model_id: &str,
    index: u32,
    passed: bool,
    failure_kind: Option<&str>,
    total_tokens: u64,
) {
    info!(
        event = "iteration.finished",
        model = %model_id,
        index,
        passed,
        failure = failure_kind.unwrap_or("none"),
        total_tokens,
    );
}

pub fn emit_endpoint_retry(model_id: &str, index: u32, attempt: u32, error: &dyn std::fmt::Display) {
    warn!(event = "endpoint.retry", model = %model_id, index, attempt, error = %error);
}

pub fn emit_verification_timeout(model_id: &str, index: u32, checks: &[String]) {
    warn!(
        event = "verification.timeout",
        model = %model_id,
        index,
        checks = %checks.join(","),
    );
}

pub fn emit_session_finished(
    model_id: &str,
    consistency_score: f64,
    autonomous_ready: bool,
    mean_total_tokens: f64,
) {
    info!(
        event = "session.finished",
        model = %model_id,
        consistency_score,
        autonomous_ready,
        mean_total_tokens,
    );
}

pub fn emit_session_cancelled(model_id: &str, completed: u32) {
    warn!(event = "session.cancelled", model = %model_id, completed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_span_can_be_entered() {
        let span = session_span("llama-3.3-70b-versatile", "s-1");
        let _guard = span.enter();
        emit_session_started("llama-3.3-70b-versatile", 3);
    }
}
