//! Anthropic Messages client used for AI drafting.
//!
//! Only text completions are needed here: one system prompt, one user turn,
//! and the first text block of the reply.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 1024;
const MAX_ATTEMPTS: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Turn<'a>; 1],
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesReply {
    #[serde(default)]
    content: Vec<Block>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Overloaded (529), throttled, and other server-side failures are worth a retry.
fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    endpoint: String,
    retry_backoff: Duration,
}

impl LlmClient {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            api_key,
            endpoint: MESSAGES_URL.to_string(),
            retry_backoff: RETRY_BACKOFF,
        })
    }

    /// Points the client at another Messages-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>, retry_backoff: Duration) -> Self {
        self.endpoint = endpoint.into();
        self.retry_backoff = retry_backoff;
        self
    }

    /// One completion; returns the text of the first text block.
    pub async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError> {
        let body = MessagesRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages: [Turn {
                role: "user",
                content: prompt,
            }],
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.send(&body).await {
                Ok(reply) => {
                    debug!(attempt, "LLM completion received");
                    return reply
                        .content
                        .into_iter()
                        .find_map(|block| match block {
                            Block::Text { text } => Some(text),
                            Block::Other => None,
                        })
                        .ok_or(LlmError::EmptyContent);
                }
                Err(err) => err,
            };

            let retryable = match &err {
                LlmError::Http(_) => true,
                LlmError::Api { status, .. } => StatusCode::from_u16(*status).map_or(false, is_transient),
                _ => false,
            };
            if !retryable || attempt >= MAX_ATTEMPTS {
                return Err(err);
            }

            let delay = self.retry_backoff * (1 << (attempt - 1));
            warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "LLM call failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    async fn send(&self, body: &MessagesRequest<'_>) -> Result<MessagesReply, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let raw = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorReply>(&raw)
            .map(|e| e.error.message)
            .unwrap_or(raw);
        Err(LlmError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Completion whose text is parsed as JSON. The prompt must ask for JSON.
    pub async fn call_json<T: DeserializeOwned>(&self, prompt: &str, system: &str) -> Result<T, LlmError> {
        let text = self.complete(prompt, system).await?;
        Ok(serde_json::from_str(strip_json_fences(&text))?)
    }
}

/// Strips ```json ... ``` or ``` ... ``` fences from model output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
