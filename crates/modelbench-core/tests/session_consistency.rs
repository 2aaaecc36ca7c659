//! End-to-end sessions against fake endpoints and verifiers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use common::*;
use modelbench_core::{
    BenchError, EndpointError, IterationFailure, ModelSpec, RetryPolicy, SessionWorkspace,
};

fn model(id: &str) -> ModelSpec {
    ModelSpec::new(id, id.to_uppercase())
}

/// A flag nobody will ever raise.
fn no_cancel() -> watch::Receiver<bool> {
    watch::channel(false).1
}

#[tokio::test]
async fn every_iteration_produces_one_record() {
    let dir = project();
    let client = Arc::new(ScriptedClient::new(Reply::good(400)));
    let verifier = Arc::new(FakeVerifier::new(Verdict::Pass));
    let eval = evaluator(client.clone(), verifier.clone(), target(dir.path()), 4);

    let report = eval.run(&model("m"), no_cancel()).await.unwrap();

    assert_eq!(report.iterations.len(), 4);
    let indexes: Vec<u32> = report.iterations.iter().map(|r| r.index).collect();
    assert_eq!(indexes, vec![1, 2, 3, 4]);
    assert_eq!(client.calls(), 4);
    assert_eq!(verifier.calls(), 4);
}

#[tokio::test]
async fn all_passing_session_is_autonomous_ready() {
    let dir = project();
    let client = Arc::new(ScriptedClient::new(Reply::good(400)));
    let verifier = Arc::new(FakeVerifier::new(Verdict::Pass));
    let eval = evaluator(client, verifier, target(dir.path()), 3);

    let report = eval.run(&model("m"), no_cancel()).await.unwrap();

    assert_eq!(report.consistency_score, 1.0);
    assert!(report.autonomous_ready);
    assert_eq!(report.token_cost.mean_total_tokens, 400.0);
    assert_eq!(report.distinct_generations, 1);
    assert_eq!(report.security_findings, 0);
}

#[tokio::test]
async fn endpoint_failures_skip_patch_and_verification() {
    let dir = project();
    let client = Arc::new(ScriptedClient::new(Reply::Fail(EndpointError::Authentication {
        status: 401,
    })));
    let verifier = Arc::new(FakeVerifier::new(Verdict::Pass));
    let eval = evaluator(client, verifier.clone(), target(dir.path()), 3);

    let report = eval.run(&model("m"), no_cancel()).await.unwrap();

    assert_eq!(report.iterations.len(), 3);
    assert_eq!(report.consistency_score, 0.0);
    assert!(!report.autonomous_ready);
    assert_eq!(verifier.calls(), 0);
    for record in &report.iterations {
        assert!(record.patch.is_none());
        assert!(record.verification.is_none());
        assert!(matches!(record.failure, Some(IterationFailure::Endpoint { .. })));
    }
    assert_eq!(report.token_cost.billed_iterations, 0);
    assert_eq!(report.token_cost.mean_total_tokens, 0.0);
}

#[tokio::test]
async fn one_malformed_completion_out_of_three() {
    let dir = project();
    let client = Arc::new(ScriptedClient::new(Reply::good(300)).script(
        "m",
        vec![Reply::good(300), Reply::prose(300), Reply::good(300)],
    ));
    let verifier = Arc::new(FakeVerifier::new(Verdict::Pass));
    let eval = evaluator(client, verifier.clone(), target(dir.path()), 3);

    let report = eval.run(&model("m"), no_cancel()).await.unwrap();

    assert!((report.consistency_score - 2.0 / 3.0).abs() < 1e-9);
    assert!(!report.autonomous_ready);
    assert_eq!(verifier.calls(), 2);
    assert!(matches!(
        report.iterations[1].failure,
        Some(IterationFailure::MalformedInjection { .. })
    ));
    // Rejected completions still billed tokens.
    assert_eq!(report.token_cost.billed_iterations, 3);
}

#[tokio::test]
async fn missing_anchor_is_recorded_not_fatal() {
    let dir = project();
    std::fs::write(
        dir.path().join(ARTIFACT),
        "class Starlette:\n    def __init__(self):\n        pass\n",
    )
    .unwrap();
    let client = Arc::new(ScriptedClient::new(Reply::good(100)));
    let verifier = Arc::new(FakeVerifier::new(Verdict::Pass));
    let eval = evaluator(client, verifier.clone(), target(dir.path()), 2);

    let report = eval.run(&model("m"), no_cancel()).await.unwrap();

    assert_eq!(report.consistency_score, 0.0);
    assert_eq!(verifier.calls(), 0);
    assert!(report
        .iterations
        .iter()
        .all(|r| matches!(r.failure, Some(IterationFailure::AnchorNotFound { .. }))));
}

#[tokio::test]
async fn verification_timeout_is_its_own_failure() {
    let dir = project();
    let client = Arc::new(ScriptedClient::new(Reply::good(100)));
    let verifier = Arc::new(FakeVerifier::new(Verdict::TimeOut));
    let eval = evaluator(client, verifier, target(dir.path()), 2);

    let report = eval.run(&model("m"), no_cancel()).await.unwrap();

    assert_eq!(report.consistency_score, 0.0);
    assert_eq!(report.verification_timeouts, 2);
    match &report.iterations[0].failure {
        Some(IterationFailure::VerificationTimeout { checks }) => {
            assert_eq!(checks, &vec!["functional".to_string()]);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn medium_findings_fail_the_iteration() {
    let dir = project();
    let client = Arc::new(ScriptedClient::new(Reply::good(100)));
    let verifier = Arc::new(FakeVerifier::new(Verdict::Findings));
    let eval = evaluator(client, verifier, target(dir.path()), 2);

    let report = eval.run(&model("m"), no_cancel()).await.unwrap();

    assert_eq!(report.consistency_score, 0.0);
    assert_eq!(report.security_findings, 2);
    assert!(matches!(
        report.iterations[0].failure,
        Some(IterationFailure::SecurityFindings { medium: 1, high: 0 })
    ));
    assert_eq!(
        report.iterations[0].violations,
        vec!["security: 0 high, 1 medium findings"]
    );
}

#[tokio::test]
async fn each_verification_sees_exactly_one_injection() {
    let dir = project();
    let client = Arc::new(ScriptedClient::new(Reply::good(100)));
    let verifier = Arc::new(FakeVerifier::new(Verdict::FailTests));
    let eval = evaluator(client, verifier.clone(), target(dir.path()), 3);

    eval.run(&model("m"), no_cancel()).await.unwrap();

    let seen = verifier.seen();
    assert_eq!(seen.len(), 3);
    for (path, content) in &seen {
        assert_ne!(path, &dir.path().join(ARTIFACT), "verified the original");
        assert_eq!(content.matches(MARKER).count(), 1);
        assert!(content.starts_with("from typing import Any"));
    }
}

#[tokio::test]
async fn original_artifact_is_untouched_after_session() {
    let dir = project();
    let client = Arc::new(ScriptedClient::new(Reply::good(100)));
    let verifier = Arc::new(FakeVerifier::new(Verdict::Pass));
    let eval = evaluator(client, verifier, target(dir.path()), 3);

    eval.run(&model("m"), no_cancel()).await.unwrap();

    assert_eq!(original(dir.path()), BASELINE);
}

#[tokio::test]
async fn cancellation_mid_verification_restores_and_reports() {
    let dir = project();
    let client = Arc::new(ScriptedClient::new(Reply::good(100)));
    let verifier = Arc::new(FakeVerifier::new(Verdict::Hang));
    let eval = evaluator(client, verifier.clone(), target(dir.path()), 3);

    let (tx, rx) = watch::channel(false);
    let m = model("m");
    let session = eval.run(&m, rx);
    let cancel = async {
        while verifier.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
    };

    let (result, ()) = tokio::join!(session, cancel);

    match result {
        Err(BenchError::Cancelled { model, completed }) => {
            assert_eq!(model, "m");
            assert_eq!(completed, 0);
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(original(dir.path()), BASELINE);
    // The scratch workspace went away with the session.
    let (scratch_artifact, _) = verifier.seen().remove(0);
    assert!(!scratch_artifact.exists());
}

#[tokio::test]
async fn cancellation_before_start_runs_nothing() {
    let dir = project();
    let client = Arc::new(ScriptedClient::new(Reply::good(100)));
    let verifier = Arc::new(FakeVerifier::new(Verdict::Pass));
    let eval = evaluator(client.clone(), verifier, target(dir.path()), 3);

    let (tx, rx) = watch::channel(true);
    let result = eval.run(&model("m"), rx).await;
    drop(tx);

    assert!(matches!(result, Err(BenchError::Cancelled { completed: 0, .. })));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn zero_iterations_is_a_config_error() {
    let dir = project();
    let client = Arc::new(ScriptedClient::new(Reply::good(100)));
    let verifier = Arc::new(FakeVerifier::new(Verdict::Pass));
    let eval = evaluator(client.clone(), verifier, target(dir.path()), 0);

    let result = eval.run(&model("m"), no_cancel()).await;

    assert!(matches!(result, Err(BenchError::Config(_))));
    assert_eq!(client.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn hung_completion_times_out_and_is_recorded() {
    let dir = project();
    let client = Arc::new(ScriptedClient::new(Reply::Hang));
    let verifier = Arc::new(FakeVerifier::new(Verdict::Pass));
    let eval = evaluator(client, verifier.clone(), target(dir.path()), 1);

    let report = eval.run(&model("m"), no_cancel()).await.unwrap();

    assert!(matches!(
        &report.iterations[0].failure,
        Some(IterationFailure::Endpoint {
            error: EndpointError::Timeout { limit_ms: 5000 }
        })
    ));
    assert_eq!(verifier.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_when_enabled() {
    let dir = project();
    let client = Arc::new(ScriptedClient::new(Reply::good(100)).script(
        "m",
        vec![
            Reply::Fail(EndpointError::Server {
                status: 503,
                message: "overloaded".to_string(),
            }),
            Reply::good(100),
        ],
    ));
    let verifier = Arc::new(FakeVerifier::new(Verdict::Pass));
    let eval = modelbench_core::ConsistencyEvaluator::new(
        client.clone(),
        verifier,
        modelbench_core::PatchApplier::new(modelbench_core::Anchor::Class {
            name: "FastAPI".to_string(),
        }),
        target(dir.path()),
        Arc::from("prompt"),
        modelbench_core::EvaluatorSettings {
            iterations: 1,
            completion_timeout: Duration::from_secs(5),
            retry: RetryPolicy::retrying(2),
        },
    );

    let report = eval.run(&model("m"), no_cancel()).await.unwrap();

    assert_eq!(client.calls(), 2);
    assert_eq!(report.iterations[0].attempts, 2);
    assert!(report.autonomous_ready);
}

#[test]
fn workspace_leases_are_exclusive_per_session() {
    let dir = project();
    let mut ws = SessionWorkspace::create(target(dir.path())).unwrap();
    let mut lease = ws.lease().unwrap();
    lease.write("class FastAPI:\n    pass\n").unwrap();
    drop(lease);
    assert_eq!(std::fs::read_to_string(ws.artifact_path()).unwrap(), BASELINE);
}
