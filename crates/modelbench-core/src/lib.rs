//! modelbench core library
//!
//! Measures how consistently LLM endpoints produce a working, secure patch
//! for a fixed coding task, and picks the cheapest model that never fails.

pub mod aggregator;
pub mod completion;
pub mod config;
pub mod domain;
pub mod evaluator;
pub mod git;
pub mod metrics;
pub mod obs;
pub mod patch;
pub mod reporting;
pub mod retry;
pub mod telemetry;
pub mod verify;
pub mod workspace;

pub use aggregator::{BenchmarkReport, CancelHandle, ReportAggregator};
pub use completion::{CompletionClient, OpenAiCompatClient, DEFAULT_TASK_PROMPT};
pub use config::{BenchConfig, CheckCommand, VerificationConfig};
pub use domain::{
    compare_reports, rank_reports, right_sized_pick, BenchError, CheckOutcome, CompletionResult,
    ConfigError, ConsistencyReport, EndpointError, IterationFailure, IterationRecord, ModelSpec,
    PatchFailure, PatchOutcome, Result, SecurityTally, TestTally, TokenCostProfile, TokenUsage,
    VerificationOutcome, WorkspaceError,
};
pub use evaluator::{ConsistencyEvaluator, EvaluatorSettings, SessionState};
pub use git::{capture_head_sha, is_git_repo};
pub use patch::{Anchor, PatchApplier};
pub use retry::RetryPolicy;
pub use telemetry::init_tracing;
pub use verify::{VerificationTarget, Verifier};
pub use workspace::{ArtifactLease, SessionWorkspace, TargetArtifact};

/// Crate version, embedded in reports and the CLI banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
