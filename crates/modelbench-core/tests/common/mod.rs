//! Fakes shared by the core integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use modelbench_core::{
    Anchor, CheckOutcome, CompletionClient, CompletionResult, ConsistencyEvaluator, EndpointError,
    EvaluatorSettings, ModelSpec, PatchApplier, SecurityTally, TargetArtifact, TestTally,
    TokenUsage, VerificationOutcome, VerificationTarget, Verifier,
};

pub const ARTIFACT: &str = "pkg/applications.py";

pub const BASELINE: &str = "\
from typing import Any


class FastAPI:
    \"\"\"Application object.\"\"\"

    def __init__(self) -> None:
        self.routes: list[Any] = []

    def add_route(self, path: str) -> None:
        self.routes.append(path)
";

pub const GOOD_COMPLETION: &str = "\
Here is the method:

```python
def secure_headers(self) -> dict:
    return {
        \"X-Frame-Options\": \"DENY\",
        \"X-Content-Type-Options\": \"nosniff\",
    }
```
";

pub const PROSE_COMPLETION: &str = "I'm sorry, I cannot help with that request.";

pub const MARKER: &str = "def secure_headers";

/// A scratch project containing the artifact and a git dir to exclude.
pub fn project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
    std::fs::create_dir_all(dir.path().join("tests")).unwrap();
    std::fs::create_dir_all(dir.path().join(".git")).unwrap();
    std::fs::write(dir.path().join(ARTIFACT), BASELINE).unwrap();
    std::fs::write(dir.path().join("tests/test_app.py"), "def test_ok():\n    pass\n").unwrap();
    dir
}

pub fn target(dir: &Path) -> Arc<TargetArtifact> {
    Arc::new(TargetArtifact::load(dir, ARTIFACT, vec![".git".to_string()]).unwrap())
}

pub fn original(dir: &Path) -> String {
    std::fs::read_to_string(dir.join(ARTIFACT)).unwrap()
}

#[derive(Debug, Clone)]
pub enum Reply {
    Text { text: String, tokens: u64 },
    Fail(EndpointError),
    Hang,
}

impl Reply {
    pub fn good(tokens: u64) -> Self {
        Reply::Text {
            text: GOOD_COMPLETION.to_string(),
            tokens,
        }
    }

    pub fn prose(tokens: u64) -> Self {
        Reply::Text {
            text: PROSE_COMPLETION.to_string(),
            tokens,
        }
    }
}

/// Replies from a per-model script, falling back to a default reply.
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallback: Reply,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(fallback: Reply) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn script(self, model: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(model.to_string(), replies.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(
        &self,
        model: &ModelSpec,
        _prompt: &str,
    ) -> Result<CompletionResult, EndpointError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&model.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            Reply::Text { text, tokens } => Ok(CompletionResult {
                text,
                usage: TokenUsage::new(tokens / 2, tokens - tokens / 2),
                latency_ms: 5,
            }),
            Reply::Fail(error) => Err(error),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(EndpointError::Timeout { limit_ms: 0 })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    FailTests,
    Findings,
    TimeOut,
    Hang,
}

/// Verifier returning a canned verdict while recording what it saw.
pub struct FakeVerifier {
    verdict: Verdict,
    calls: AtomicUsize,
    seen: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeVerifier {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Artifact contents observed at each verification.
    pub fn seen(&self) -> Vec<(PathBuf, String)> {
        self.seen.lock().unwrap().clone()
    }
}

fn tally(passed: u64, failed: u64) -> TestTally {
    TestTally {
        passed,
        failed,
        errors: 0,
        skipped: 0,
        exit_success: failed == 0,
        required_passed: 1,
    }
}

#[async_trait]
impl Verifier for FakeVerifier {
    async fn verify(&self, target: &VerificationTarget) -> VerificationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = std::fs::read_to_string(&target.artifact_path).unwrap_or_default();
        self.seen
            .lock()
            .unwrap()
            .push((target.artifact_path.clone(), content));

        match self.verdict {
            Verdict::Pass => VerificationOutcome {
                functional: CheckOutcome::Completed(tally(10, 0)),
                security: CheckOutcome::Completed(SecurityTally::default()),
            },
            Verdict::FailTests => VerificationOutcome {
                functional: CheckOutcome::Completed(tally(8, 2)),
                security: CheckOutcome::Completed(SecurityTally::default()),
            },
            Verdict::Findings => VerificationOutcome {
                functional: CheckOutcome::Completed(tally(10, 0)),
                security: CheckOutcome::Completed(SecurityTally {
                    low: 3,
                    medium: 1,
                    high: 0,
                }),
            },
            Verdict::TimeOut => VerificationOutcome {
                functional: CheckOutcome::TimedOut { limit_ms: 50 },
                security: CheckOutcome::Completed(SecurityTally::default()),
            },
            Verdict::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                VerificationOutcome {
                    functional: CheckOutcome::TimedOut { limit_ms: 0 },
                    security: CheckOutcome::TimedOut { limit_ms: 0 },
                }
            }
        }
    }
}

pub fn evaluator(
    client: Arc<ScriptedClient>,
    verifier: Arc<FakeVerifier>,
    target: Arc<TargetArtifact>,
    iterations: u32,
) -> ConsistencyEvaluator {
    ConsistencyEvaluator::new(
        client,
        verifier,
        PatchApplier::new(Anchor::Class {
            name: "FastAPI".to_string(),
        }),
        target,
        Arc::from("Add a secure_headers method."),
        EvaluatorSettings {
            iterations,
            completion_timeout: Duration::from_secs(5),
            ..EvaluatorSettings::default()
        },
    )
}
