//! Upstream LLM Client
//!
//! Information Hiding:
//! - Wire format of the chat-completion API hidden
//! - Retry strategy and backoff algorithm hidden
//! - Error classification (transient vs. fatal) hidden
//! - Proxy routing fixed at construction

use crate::config::UpstreamConfig;
use crate::core::conversation::ChatMessage;
use crate::error::GatewayError;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Proxy, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// The provider refused the request (authentication, malformed request).
    #[error("upstream rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Every attempt failed with a transient error.
    #[error("upstream unavailable after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("upstream returned an unusable response: {0}")]
    InvalidResponse(String),
}

/// Produces the next assistant message for a dialogue.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, history: &[ChatMessage]) -> Result<ChatMessage, UpstreamError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<&'a ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_elapsed: config.max_elapsed(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based). A server-provided
    /// `Retry-After` can lengthen it but never past `max_delay`.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let backoff = self.base_delay.saturating_mul(2_u32.pow(exponent));
        let delay = match retry_after {
            Some(hint) => backoff.max(hint),
            None => backoff,
        };
        delay.min(self.max_delay)
    }
}

enum AttemptError {
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },
    Fatal(UpstreamError),
}

pub struct LLMClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: Option<String>,
    policy: RetryPolicy,
}

impl LLMClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, GatewayError> {
        let mut builder = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout());

        if let Some(proxy_url) = &config.proxy_url {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| GatewayError::Config(format!("invalid proxy '{}': {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
            tracing::info!("[LLMClient] Routing upstream traffic through proxy {}", proxy_url);
        }

        let client = builder
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
            policy: RetryPolicy::from_config(config),
        })
    }

    async fn attempt(&self, request: &ChatRequest<'_>) -> Result<ChatMessage, AttemptError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| AttemptError::Transient {
                reason: describe_transport_error(&e),
                retry_after: None,
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(&response);
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if is_transient(status) {
                return Err(AttemptError::Transient {
                    reason: format!("HTTP {}: {}", status.as_u16(), truncate(&body)),
                    retry_after,
                });
            }
            return Err(AttemptError::Fatal(UpstreamError::Rejected {
                status: status.as_u16(),
                body: truncate(&body),
            }));
        }

        let chat_response = response.json::<ChatResponse>().await.map_err(|e| {
            if e.is_timeout() {
                AttemptError::Transient {
                    reason: "timed out reading response body".to_string(),
                    retry_after: None,
                }
            } else {
                AttemptError::Fatal(UpstreamError::InvalidResponse(e.to_string()))
            }
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .map(ChatMessage::assistant)
            .ok_or_else(|| {
                AttemptError::Fatal(UpstreamError::InvalidResponse(
                    "response contained no assistant content".to_string(),
                ))
            })
    }
}

#[async_trait]
impl CompletionProvider for LLMClient {
    async fn complete(&self, history: &[ChatMessage]) -> Result<ChatMessage, UpstreamError> {
        let system = self.system_prompt.as_ref().map(ChatMessage::system);
        let messages: Vec<&ChatMessage> = system.iter().chain(history.iter()).collect();

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let started = Instant::now();
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;
        let mut last_error = String::from("no attempt made");

        while attempt < max_attempts {
            attempt += 1;

            match self.attempt(&request).await {
                Ok(reply) => {
                    tracing::debug!(
                        "[LLMClient] Completion succeeded on attempt {}/{} in {:?}",
                        attempt,
                        max_attempts,
                        started.elapsed()
                    );
                    return Ok(reply);
                }
                Err(AttemptError::Fatal(e)) => {
                    tracing::warn!("[LLMClient] Non-retryable upstream failure: {}", e);
                    return Err(e);
                }
                Err(AttemptError::Transient {
                    reason,
                    retry_after,
                }) => {
                    tracing::warn!(
                        "[LLMClient] Attempt {}/{} failed: {}",
                        attempt,
                        max_attempts,
                        reason
                    );
                    last_error = reason;

                    if attempt >= max_attempts {
                        break;
                    }

                    let delay = self.policy.delay_for(attempt, retry_after);
                    if started.elapsed() + delay > self.policy.max_elapsed {
                        tracing::warn!(
                            "[LLMClient] Giving up: next retry would exceed the {:?} budget",
                            self.policy.max_elapsed
                        );
                        break;
                    }

                    tracing::warn!(
                        "[LLMClient] Retrying API call (attempt {}/{}) after {}ms delay",
                        attempt + 1,
                        max_attempts,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(UpstreamError::Exhausted {
            attempts: attempt,
            last: last_error,
        })
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::CONFLICT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {}", err)
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        format!("HTTP request failed: {}", err)
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 512;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
