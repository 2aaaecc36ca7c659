//! Domain models for the benchmark harness.
//!
//! - `ModelSpec`: a roster entry
//! - `CompletionResult`: one generated completion with token usage
//! - `PatchOutcome` / `VerificationOutcome`: what happened to that completion
//! - `IterationRecord`: the bundle for one pipeline run
//! - `ConsistencyReport`: per-model aggregate derived from its records

pub mod completion;
pub mod error;
pub mod model;
pub mod outcome;
pub mod report;

pub use completion::{CompletionResult, TokenUsage};
pub use error::{BenchError, ConfigError, EndpointError, Result, WorkspaceError};
pub use model::ModelSpec;
pub use outcome::{
    CheckOutcome, IterationFailure, IterationRecord, PatchFailure, PatchOutcome, SecurityTally,
    TestTally, VerificationOutcome,
};
pub use report::{compare_reports, rank_reports, right_sized_pick, ConsistencyReport, TokenCostProfile};
