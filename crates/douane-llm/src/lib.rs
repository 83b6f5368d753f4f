//! Douane LLM Provider Layer
//!
//! The resilient HTTP caller and the provider clients behind the
//! `LlmProvider` and `EmbeddingProvider` traits of `douane-domain`.
//!
//! # Providers
//!
//! - `ClaudeProvider`: Anthropic Messages API, PDF document blocks
//! - `OpenAiProvider`: Chat Completions, OpenAI or any compatible gateway
//! - `OpenAiEmbedder`: embeddings endpoint
//! - `MockProvider` / `MockEmbedder`: deterministic doubles for tests
//!
//! # Examples
//!
//! ```
//! use douane_llm::MockProvider;
//! use douane_domain::traits::{LlmProvider, LlmRequest};
//!
//! let provider = MockProvider::new("{\"rows\": []}");
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let text = runtime
//!     .block_on(provider.generate(&LlmRequest::text("page 1", 100)))
//!     .unwrap();
//! assert_eq!(text, "{\"rows\": []}");
//! ```

#![warn(missing_docs)]

pub mod claude;
pub mod config;
pub mod openai;
pub mod retry;

use async_trait::async_trait;
use douane_domain::traits::{CollaboratorError, EmbeddingProvider, LlmProvider, LlmRequest};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

pub use claude::ClaudeProvider;
pub use config::{AnyEmbedder, AnyProvider, EmbeddingConfig, EmbeddingKind, LlmConfig, ProviderKind};
pub use openai::{OpenAiEmbedder, OpenAiProvider};
pub use retry::{call_with_retry, parse_retry_after, RetryConfig, RetryStatus};

/// Errors that can occur during LLM operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// Network or API communication error
    #[error("Communication error: {0}")]
    Communication(String),

    /// The request did not complete in time
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// Invalid response from LLM
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Model not available
    #[error("Model not available: {0}")]
    ModelNotAvailable(String),

    /// Credentials rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Provider misconfigured (missing key, bad URL)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic error
    #[error("LLM error: {0}")]
    Other(String),
}

impl LlmError {
    /// Map a final non-success status to an error
    ///
    /// # Examples
    ///
    /// ```
    /// use douane_llm::LlmError;
    ///
    /// assert!(matches!(LlmError::from_status(401, "bad key", "m"), LlmError::Authentication(_)));
    /// assert!(matches!(LlmError::from_status(404, "", "m"), LlmError::ModelNotAvailable(_)));
    /// assert_eq!(LlmError::from_status(429, "", "m"), LlmError::RateLimitExceeded);
    /// ```
    pub fn from_status(status: u16, body: &str, model: &str) -> Self {
        match status {
            401 | 403 => LlmError::Authentication(format!("HTTP {}: {}", status, body)),
            404 => LlmError::ModelNotAvailable(model.to_string()),
            429 => LlmError::RateLimitExceeded,
            _ => LlmError::Communication(format!("HTTP {}: {}", status, body)),
        }
    }

    /// Whether retrying later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Communication(_) | LlmError::Timeout(_) | LlmError::RateLimitExceeded
        )
    }
}

impl CollaboratorError for LlmError {
    fn is_transient(&self) -> bool {
        LlmError::is_transient(self)
    }

    fn is_fatal(&self) -> bool {
        matches!(self, LlmError::Authentication(_) | LlmError::Configuration(_))
    }

    fn is_authentication(&self) -> bool {
        matches!(self, LlmError::Authentication(_))
    }
}

/// Turn a non-success response into an error, keeping the body for context
pub(crate) async fn error_for_status(
    response: reqwest::Response,
    model: &str,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let excerpt: String = body.chars().take(500).collect();
    Err(LlmError::from_status(status.as_u16(), &excerpt, model))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Fail(LlmError),
}

/// Mock LLM provider for deterministic testing
///
/// Replies are chosen in this order: the next scripted reply queued with
/// [`push_response`](Self::push_response) / [`push_error`](Self::push_error),
/// then the first rule whose pattern occurs in the prompt, then the default.
///
/// # Examples
///
/// ```
/// use douane_llm::{LlmError, MockProvider};
/// use douane_domain::traits::{LlmProvider, LlmRequest};
///
/// let mut provider = MockProvider::default();
/// provider.add_response("page 2", "second");
/// provider.add_error("page 3", LlmError::RateLimitExceeded);
///
/// let runtime = tokio::runtime::Runtime::new().unwrap();
/// let reply = runtime.block_on(provider.generate(&LlmRequest::text("read page 2", 10)));
/// assert_eq!(reply.unwrap(), "second");
/// let reply = runtime.block_on(provider.generate(&LlmRequest::text("read page 3", 10)));
/// assert!(reply.is_err());
/// assert_eq!(provider.call_count(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct MockProvider {
    default_response: String,
    rules: Arc<Mutex<Vec<(String, MockReply)>>>,
    script: Arc<Mutex<VecDeque<MockReply>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockProvider {
    /// Create a new MockProvider with a fixed response for all prompts
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            default_response: response.into(),
            rules: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(VecDeque::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reply with `response` to prompts containing `pattern`
    pub fn add_response(&mut self, pattern: impl Into<String>, response: impl Into<String>) {
        lock(&self.rules).push((pattern.into(), MockReply::Text(response.into())));
    }

    /// Fail prompts containing `pattern`
    pub fn add_error(&mut self, pattern: impl Into<String>, error: LlmError) {
        lock(&self.rules).push((pattern.into(), MockReply::Fail(error)));
    }

    /// Queue a reply for the next call, ahead of rules
    pub fn push_response(&self, response: impl Into<String>) {
        lock(&self.script).push_back(MockReply::Text(response.into()));
    }

    /// Queue a failure for the next call, ahead of rules
    pub fn push_error(&self, error: LlmError) {
        lock(&self.script).push_back(MockReply::Fail(error));
    }

    /// Get the number of times generate was called
    pub fn call_count(&self) -> usize {
        lock(&self.prompts).len()
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    /// Forget recorded prompts
    pub fn reset_call_count(&self) {
        lock(&self.prompts).clear();
    }

    fn reply_for(&self, prompt: &str) -> MockReply {
        if let Some(reply) = lock(&self.script).pop_front() {
            return reply;
        }
        lock(&self.rules)
            .iter()
            .find(|(pattern, _)| prompt.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| MockReply::Text(self.default_response.clone()))
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new("Default mock response")
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    type Error = LlmError;

    async fn generate(&self, request: &LlmRequest) -> Result<String, Self::Error> {
        lock(&self.prompts).push(request.prompt.clone());
        match self.reply_for(&request.prompt) {
            MockReply::Text(text) => Ok(text),
            MockReply::Fail(error) => Err(error),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// Deterministic embedder: equal texts give equal vectors
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
    calls: Arc<Mutex<usize>>,
    fail_with: Option<LlmError>,
}

impl MockEmbedder {
    /// Create an embedder producing vectors of `dimension` components
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: Arc::new(Mutex::new(0)),
            fail_with: None,
        }
    }

    /// Make every call fail with `error`
    pub fn failing(mut self, error: LlmError) -> Self {
        self.fail_with = Some(error);
        self
    }

    /// Number of embed calls
    pub fn call_count(&self) -> usize {
        *lock(&self.calls)
    }

    /// Compute the vector for `text` without recording a call
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let seed = text
            .bytes()
            .fold(17u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        (0..self.dimension)
            .map(|i| {
                let mixed = seed.wrapping_add((i as u64).wrapping_mul(0x9E37_79B9));
                (mixed % 1000) as f32 / 1000.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    type Error = LlmError;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, Self::Error> {
        *lock(&self.calls) += 1;
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        Ok(self.vector_for(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
