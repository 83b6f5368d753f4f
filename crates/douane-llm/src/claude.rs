//! Claude Provider Implementation
//!
//! Sends a PDF document block and a text prompt to the Anthropic Messages
//! API. Every HTTP attempt is bounded by a request timeout; retries follow
//! [`RetryConfig::for_claude`], which adds the 529 "overloaded" status.
//!
//! # Examples
//!
//! ```no_run
//! use douane_llm::ClaudeProvider;
//!
//! let provider = ClaudeProvider::new("sk-ant-...", "claude-3-5-sonnet-latest").unwrap();
//! ```

use crate::retry::{call_with_retry, RetryConfig};
use crate::{error_for_status, LlmError};
use async_trait::async_trait;
use base64::Engine;
use douane_domain::traits::{LlmProvider, LlmRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Default Anthropic API endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";

/// API version header value
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default timeout for one request (2 minutes); dense pages are slow
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Claude Messages API provider
pub struct ClaudeProvider {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryConfig,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock {
    Document { source: DocumentSource },
    Text { text: String },
}

#[derive(Serialize)]
struct DocumentSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl ClaudeProvider {
    /// Create a new Claude provider
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryConfig::for_claude(),
        })
    }

    /// Point the provider at another endpoint (proxies, tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn build_body<'a>(&'a self, request: &LlmRequest) -> MessagesRequest<'a> {
        let mut content = Vec::with_capacity(2);
        if let Some(document) = &request.document {
            content.push(ContentBlock::Document {
                source: DocumentSource {
                    kind: "base64",
                    media_type: document.media_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(&document.data),
                },
            });
        }
        content.push(ContentBlock::Text {
            text: request.prompt.clone(),
        });

        MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            messages: vec![Message {
                role: "user",
                content,
            }],
        }
    }

    /// Generate text using the Messages API
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Every attempt timed out or failed at the transport level
    /// - The final response has a non-success status
    /// - The response body is not a Messages API response
    pub async fn generate(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let url = format!("{}/v1/messages", self.endpoint);
        let body = self.build_body(request);
        let timeout = self.timeout;

        let response = call_with_retry(&self.retry, "claude", |_| {
            let pending = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send();
            async move {
                match tokio::time::timeout(timeout, pending).await {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(e)) => Err(LlmError::Communication(format!("Request failed: {}", e))),
                    Err(_) => Err(LlmError::Timeout(timeout.as_secs())),
                }
            }
        })
        .await?;

        let response = error_for_status(response, &self.model).await?;
        let parsed: MessagesResponse = tokio::time::timeout(timeout, response.json())
            .await
            .map_err(|_| LlmError::Timeout(timeout.as_secs()))?
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        if parsed.stop_reason.as_deref() == Some("max_tokens") {
            warn!(
                model = %self.model,
                max_tokens = request.max_tokens,
                "response cut by the token limit"
            );
        }

        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(LlmError::InvalidResponse("no text block in response".to_string()));
        }
        debug!(model = %self.model, chars = text.len(), "claude response received");
        Ok(text)
    }
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    type Error = LlmError;

    async fn generate(&self, request: &LlmRequest) -> Result<String, Self::Error> {
        ClaudeProvider::generate(self, request).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
