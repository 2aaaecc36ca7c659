//! Opt-in retry policy for completion calls.
//!
//! The default policy never retries: a failed completion simply scores zero
//! for its iteration. When enabled, only transient endpoint errors are
//! retried, with exponential backoff that respects `Retry-After` up to
//! `max_backoff_ms`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::EndpointError;

/// Retry settings for the completion stage of an iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay (milliseconds).
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Policy retrying transient failures up to `max_retries` times.
    pub fn retrying(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the next attempt, or `None` when the error must not be retried.
    ///
    /// `attempt` is the 1-based attempt that just failed.
    pub fn next_delay(&self, attempt: u32, error: &EndpointError) -> Option<Duration> {
        if attempt >= self.max_attempts() || !error.is_transient() {
            return None;
        }

        let exp = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let mut delay_ms = exp.min(self.max_backoff_ms);

        if let EndpointError::RateLimited {
            retry_after_ms: Some(after),
            ..
        } = error
        {
            delay_ms = delay_ms.max((*after).min(self.max_backoff_ms));
        }

        Some(Duration::from_millis(delay_ms))
    }
}
