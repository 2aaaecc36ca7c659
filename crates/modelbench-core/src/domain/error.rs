//! Error taxonomy for the benchmark harness.
//!
//! Only [`ConfigError`] and session-level [`BenchError`]s abort work. Everything
//! that can go wrong inside a single iteration is captured in the
//! iteration's record instead (see [`crate::domain::IterationFailure`]).

use serde::{Deserialize, Serialize};

use crate::domain::completion::TokenUsage;

/// Failure of a single completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("authentication rejected (HTTP {status})")]
    Authentication { status: u16 },

    #[error("rate limited (HTTP {status})")]
    RateLimited {
        status: u16,
        retry_after_ms: Option<u64>,
    },

    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("unexpected HTTP status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("malformed completion response: {reason}")]
    MalformedResponse {
        reason: String,
        /// Usage reported by the envelope, if any tokens were billed.
        usage: Option<TokenUsage>,
    },

    #[error("completion timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },
}

impl EndpointError {
    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EndpointError::Network { .. }
                | EndpointError::RateLimited { .. }
                | EndpointError::Server { .. }
                | EndpointError::Timeout { .. }
        )
    }

    /// Tokens billed despite the failure.
    pub fn billed_usage(&self) -> Option<TokenUsage> {
        match self {
            EndpointError::MalformedResponse { usage, .. } => usage.filter(|u| u.is_billed()),
            _ => None,
        }
    }

    /// Short machine-readable name used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            EndpointError::Network { .. } => "network",
            EndpointError::Authentication { .. } => "authentication",
            EndpointError::RateLimited { .. } => "rate_limited",
            EndpointError::Server { .. } => "server",
            EndpointError::Http { .. } => "http",
            EndpointError::MalformedResponse { .. } => "malformed_response",
            EndpointError::Timeout { .. } => "timeout",
        }
    }
}

/// Fatal configuration problems, detected before any session starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing API credential: environment variable {env_var} is not set")]
    MissingCredential { env_var: String },

    #[error("no models configured")]
    NoModels,

    #[error("iteration count must be at least 1")]
    ZeroIterations,

    #[error("duplicate model id in roster: {0}")]
    DuplicateModel(String),

    #[error("invalid target artifact: {0}")]
    InvalidTarget(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors from preparing or restoring a session's scratch workspace.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("failed to copy target project into scratch workspace: {0}")]
    Copy(std::io::Error),

    #[error("failed to write artifact {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to restore artifact {path}: {source}")]
    Restore {
        path: String,
        source: std::io::Error,
    },

    #[error("artifact {0} differs from baseline after restore")]
    BaselineMismatch(String),
}

/// Session- and run-level errors.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("session for {model} cancelled after {completed} iteration(s)")]
    Cancelled { model: String, completed: u32 },

    #[error("invalid session transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("session task for {model} aborted: {detail}")]
    SessionAborted { model: String, detail: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("git error: {0}")]
    Git(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, BenchError>;
