//! Completion clients.
//!
//! A [`CompletionClient`] sends the fixed task prompt to one model and hands
//! back the raw text plus token usage. It never inspects the text and never
//! retries; retry policy belongs to the evaluator.

pub mod openai_compat;
pub mod prompt;

use async_trait::async_trait;

use crate::domain::{CompletionResult, EndpointError, ModelSpec};

pub use openai_compat::{parse_chat_envelope, OpenAiCompatClient};
pub use prompt::DEFAULT_TASK_PROMPT;

/// Black-box completion endpoint.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        model: &ModelSpec,
        prompt: &str,
    ) -> Result<CompletionResult, EndpointError>;
}
