//! OpenAI-compatible chat-completions client.
//!
//! Works against any endpoint that speaks the `/chat/completions` format:
//! Groq, OpenAI, OpenRouter, vLLM, LM Studio and friends.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::CompletionClient;
use crate::domain::{CompletionResult, ConfigError, EndpointError, ModelSpec, TokenUsage};

/// Default API base (Groq's OpenAI-compatible surface).
pub const DEFAULT_API_BASE: &str = "https://api.groq.com/openai/v1";

const ERROR_BODY_LIMIT: usize = 500;

/// Chat-completions client shared by every session.
pub struct OpenAiCompatClient {
    api_key: String,
    api_base: String,
    temperature: f32,
    request_timeout: Duration,
    client: Client,
}

impl OpenAiCompatClient {
    /// Build a client. `request_timeout` bounds each HTTP exchange; zero
    /// leaves it unbounded.
    pub fn new(
        api_key: &str,
        api_base: &str,
        temperature: f32,
        request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let mut builder =
            Client::builder().user_agent(concat!("modelbench/", env!("CARGO_PKG_VERSION")));
        if !request_timeout.is_zero() {
            builder = builder.timeout(request_timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            temperature,
            request_timeout,
            client,
        })
    }

    fn chat_url(&self, model: &ModelSpec) -> String {
        let base = model
            .endpoint
            .as_deref()
            .map(|e| e.trim_end_matches('/'))
            .unwrap_or(&self.api_base);
        format!("{base}/chat/completions")
    }

    fn transport_error(&self, err: reqwest::Error) -> EndpointError {
        if err.is_timeout() {
            EndpointError::Timeout {
                limit_ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            EndpointError::Network {
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    async fn complete(
        &self,
        model: &ModelSpec,
        prompt: &str,
    ) -> Result<CompletionResult, EndpointError> {
        let started = Instant::now();
        let url = self.chat_url(model);
        let body = json!({
            "model": model.id,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
        });

        debug!(model = %model.id, url = %url, "sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .map(|secs| (secs * 1000.0) as u64);
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), retry_after_ms, &text));
        }

        let envelope: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(e)
            } else {
                EndpointError::MalformedResponse {
                    reason: format!("response body is not JSON: {e}"),
                    usage: None,
                }
            }
        })?;

        let (text, usage) = parse_chat_envelope(&envelope)?;
        let latency_ms = started.elapsed().as_millis() as u64;

        debug!(
            model = %model.id,
            latency_ms,
            total_tokens = usage.total_tokens,
            "completion received"
        );

        Ok(CompletionResult {
            text,
            usage,
            latency_ms,
        })
    }
}

/// Map a non-success HTTP status to an [`EndpointError`].
pub fn classify_status(status: u16, retry_after_ms: Option<u64>, body: &str) -> EndpointError {
    let message: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    match status {
        401 | 403 => EndpointError::Authentication { status },
        429 => EndpointError::RateLimited {
            status,
            retry_after_ms,
        },
        500..=599 => EndpointError::Server { status, message },
        _ => EndpointError::Http { status, message },
    }
}

/// Extract generated text and usage from a chat-completions envelope.
///
/// The text is returned as-is. A missing or empty message is a
/// `MalformedResponse` that still carries whatever usage was reported.
pub fn parse_chat_envelope(envelope: &Value) -> Result<(String, TokenUsage), EndpointError> {
    let usage = parse_usage(envelope);

    let message = envelope
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"));

    let Some(message) = message else {
        return Err(EndpointError::MalformedResponse {
            reason: "response has no choices[0].message".to_string(),
            usage,
        });
    };

    let text = match message.get("content") {
        Some(Value::String(s)) => s.clone(),
        // Some providers return content as a list of typed parts.
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };

    if text.trim().is_empty() {
        return Err(EndpointError::MalformedResponse {
            reason: "completion content is empty".to_string(),
            usage,
        });
    }

    Ok((text, usage.unwrap_or_default()))
}

fn parse_usage(envelope: &Value) -> Option<TokenUsage> {
    let usage = envelope.get("usage")?.as_object()?;
    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| usage.get(*n).and_then(Value::as_u64))
    };

    let input_tokens = field(&["prompt_tokens", "input_tokens"]).unwrap_or(0);
    let output_tokens = field(&["completion_tokens", "output_tokens"]).unwrap_or(0);
    let total_tokens = field(&["total_tokens"]).unwrap_or(input_tokens + output_tokens);

    Some(TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_envelope() {
        let envelope = json!({
            "choices": [{ "message": { "role": "assistant", "content": "def f(self):\n    pass" } }],
            "usage": { "prompt_tokens": 60, "completion_tokens": 40, "total_tokens": 100 }
        });
        let (text, usage) = parse_chat_envelope(&envelope).expect("parse");
        assert_eq!(text, "def f(self):\n    pass");
        assert_eq!(usage, TokenUsage::new(60, 40));
    }

    #[test]
    fn total_falls_back_to_sum() {
        let envelope = json!({
            "choices": [{ "message": { "content": "x" } }],
            "usage": { "input_tokens": 7, "output_tokens": 5 }
        });
        let (_, usage) = parse_chat_envelope(&envelope).expect("parse");
        assert_eq!(usage.total_tokens, 12);
    }

    #[test]
    fn text_is_not_interpreted() {
        let raw = "```python\n<think>hmm</think>\ndef f(self): ...\n```";
        let envelope = json!({ "choices": [{ "message": { "content": raw } }] });
        let (text, usage) = parse_chat_envelope(&envelope).expect("parse");
        assert_eq!(text, raw);
        assert_eq!(usage, TokenUsage::default());
    }

    #[test]
    fn joins_content_parts() {
        let envelope = json!({
            "choices": [{ "message": { "content": [
                { "type": "text", "text": "def a(self):" },
                { "type": "text", "text": " pass" }
            ] } }]
        });
        let (text, _) = parse_chat_envelope(&envelope).expect("parse");
        assert_eq!(text, "def a(self): pass");
    }

    #[test]
    fn empty_content_is_malformed_but_keeps_usage() {
        let envelope = json!({
            "choices": [{ "message": { "content": null } }],
            "usage": { "prompt_tokens": 60, "completion_tokens": 0, "total_tokens": 60 }
        });
        match parse_chat_envelope(&envelope) {
            Err(EndpointError::MalformedResponse { usage, .. }) => {
                assert_eq!(usage.map(|u| u.total_tokens), Some(60));
            }
            other => panic!("expected malformed response, got {other:?}"),
        }
    }

    #[test]
    fn missing_choices_is_malformed() {
        let err = parse_chat_envelope(&json!({ "error": "oops" })).unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(401, None, "bad key"),
            EndpointError::Authentication { status: 401 }
        );
        assert_eq!(
            classify_status(429, Some(2000), ""),
            EndpointError::RateLimited {
                status: 429,
                retry_after_ms: Some(2000)
            }
        );
        assert_eq!(classify_status(503, None, "overloaded").kind(), "server");
        assert_eq!(classify_status(404, None, "no such model").kind(), "http");
    }

    #[test]
    fn error_body_is_truncated() {
        let body = "x".repeat(2_000);
        match classify_status(500, None, &body) {
            EndpointError::Server { message, .. } => assert_eq!(message.len(), ERROR_BODY_LIMIT),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn model_endpoint_overrides_base() {
        let client = OpenAiCompatClient::new(
            "key",
            "https://api.groq.com/openai/v1/",
            0.7,
            Duration::from_secs(5),
        )
        .expect("client");
        let default = ModelSpec::new("llama-3.3-70b-versatile", "Llama");
        assert_eq!(
            client.chat_url(&default),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        let local = default.with_endpoint("http://localhost:1234/v1/");
        assert_eq!(
            client.chat_url(&local),
            "http://localhost:1234/v1/chat/completions"
        );
    }

    /// Serves one canned chat response on a loopback port.
    async fn serve_once(body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn zero_timeout_leaves_requests_unbounded() {
        let base = serve_once(
            r#"{"choices":[{"message":{"content":"def f(self):\n    pass"}}],"usage":{"prompt_tokens":3,"completion_tokens":2}}"#,
        )
        .await;
        let client = OpenAiCompatClient::new("key", &base, 0.7, Duration::ZERO).expect("client");

        let result = client
            .complete(&ModelSpec::new("stub", "Stub"), "hi")
            .await
            .expect("completion");

        assert_eq!(result.text, "def f(self):\n    pass");
        assert_eq!(result.usage, TokenUsage::new(3, 2));
    }
}

