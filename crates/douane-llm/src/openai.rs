//! OpenAI-compatible providers
//!
//! [`OpenAiProvider`] talks to the Chat Completions API, either OpenAI's own
//! or any OpenAI-compatible AI gateway ([`OpenAiProvider::gateway`]).
//! [`OpenAiEmbedder`] calls the embeddings endpoint of the same APIs.

use crate::retry::{call_with_retry, RetryConfig};
use crate::{error_for_status, LlmError};
use async_trait::async_trait;
use base64::Engine;
use douane_domain::traits::{EmbeddingProvider, LlmProvider, LlmRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Default OpenAI API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default timeout for one request
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Dimension of [`DEFAULT_EMBEDDING_MODEL`]
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

fn build_client() -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| LlmError::Configuration(format!("HTTP client: {}", e)))
}

/// Send one JSON POST with retries and a per-attempt timeout
#[allow(clippy::too_many_arguments)]
async fn post_json(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &Value,
    timeout: Duration,
    retry: &RetryConfig,
    label: &str,
    model: &str,
) -> Result<Value, LlmError> {
    let response = call_with_retry(retry, label, |_| {
        let pending = client.post(url).bearer_auth(api_key).json(body).send();
        async move {
            match tokio::time::timeout(timeout, pending).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(LlmError::Communication(format!("Request failed: {}", e))),
                Err(_) => Err(LlmError::Timeout(timeout.as_secs())),
            }
        }
    })
    .await?;

    let response = error_for_status(response, model).await?;
    tokio::time::timeout(timeout, response.json::<Value>())
        .await
        .map_err(|_| LlmError::Timeout(timeout.as_secs()))?
        .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))
}

/// Chat Completions provider
pub struct OpenAiProvider {
    label: &'static str,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryConfig,
}

impl OpenAiProvider {
    /// Create a provider for the OpenAI API
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        Ok(Self {
            label: "openai",
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client: build_client()?,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryConfig::default(),
        })
    }

    /// Create a provider for an OpenAI-compatible gateway
    ///
    /// `base_url` is the prefix under which `/chat/completions` is served.
    pub fn gateway(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let mut provider = Self::new(api_key, model)?;
        provider.label = "gateway";
        provider.base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(provider)
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

    fn build_body(&self, request: &LlmRequest) -> Value {
        let mut content = Vec::with_capacity(2);
        if let Some(document) = &request.document {
            let data = base64::engine::general_purpose::STANDARD.encode(&document.data);
            content.push(json!({
                "type": "file",
                "file": {
                    "filename": "document.pdf",
                    "file_data": format!("data:{};base64,{}", document.media_type, data),
                }
            }));
        }
        content.push(json!({ "type": "text", "text": request.prompt }));

        json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": [{ "role": "user", "content": content }],
        })
    }

    /// Generate text using the Chat Completions API
    pub async fn generate(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(request);
        let value = post_json(
            &self.client,
            &url,
            &self.api_key,
            &body,
            self.timeout,
            &self.retry,
            self.label,
            &self.model,
        )
        .await?;

        let choice = value
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        if choice.get("finish_reason").and_then(Value::as_str) == Some("length") {
            warn!(
                provider = self.label,
                model = %self.model,
                "response cut by the token limit"
            );
        }

        let text = choice
            .pointer("/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| LlmError::InvalidResponse("choice has no text content".to_string()))?;
        debug!(provider = self.label, model = %self.model, chars = text.len(), "completion received");
        Ok(text.to_string())
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    type Error = LlmError;

    async fn generate(&self, request: &LlmRequest) -> Result<String, Self::Error> {
        OpenAiProvider::generate(self, request).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// OpenAI-style embeddings client
pub struct OpenAiEmbedder {
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryConfig,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Create an embedder for the OpenAI API
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dimension,
            client: build_client()?,
            timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        })
    }

    /// Use another OpenAI-compatible base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Embed one text
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::to_value(EmbeddingRequest {
            model: &self.model,
            input: text,
        })
        .map_err(|e| LlmError::Other(e.to_string()))?;

        let value = post_json(
            &self.client,
            &url,
            &self.api_key,
            &body,
            self.timeout,
            &self.retry,
            "embeddings",
            &self.model,
        )
        .await?;

        let parsed: EmbeddingResponse = serde_json::from_value(value)
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse embeddings: {}", e)))?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::InvalidResponse("empty embeddings response".to_string()))?;

        if embedding.len() != self.dimension {
            return Err(LlmError::InvalidResponse(format!(
                "expected {} dimensions, got {}",
                self.dimension,
                embedding.len()
            )));
        }
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    type Error = LlmError;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, Self::Error> {
        OpenAiEmbedder::embed(self, text).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
