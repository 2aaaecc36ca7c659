//! Completion results and token accounting.

use serde::{Deserialize, Serialize};

/// Token counters reported by the completion endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Usage where the total is the sum of input and output.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Whether any tokens were billed.
    pub fn is_billed(&self) -> bool {
        self.total_tokens > 0 || self.input_tokens > 0 || self.output_tokens > 0
    }
}

/// Output of one successful completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    /// Raw generated text, uninterpreted.
    pub text: String,
    pub usage: TokenUsage,
    /// Wall-clock latency of the request in milliseconds.
    pub latency_ms: u64,
}
