//! modelbench verify - checks a patched artifact with external tools
//!
//! - Runs the regression suite and the security scanner from the scratch
//!   workspace root, each under its own timeout
//! - Parses pytest summaries and bandit JSON into tallies
//! - Reports timeouts separately from tool failures

pub mod parse;
pub mod runner;
pub mod stage;
pub mod verifier;

pub use parse::{parse_bandit_json, parse_pytest_summary, PytestCounts};
pub use runner::{StageError, StageResult, StageRunner};
pub use stage::{CheckKind, StageConfig};
pub use verifier::CommandVerifier;
