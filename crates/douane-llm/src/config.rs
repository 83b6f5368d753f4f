//! Provider configuration and runtime selection

use crate::claude::ClaudeProvider;
use crate::openai::{OpenAiEmbedder, OpenAiProvider, DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_MODEL};
use crate::retry::RetryConfig;
use crate::{LlmError, MockEmbedder, MockProvider};
use async_trait::async_trait;
use douane_domain::traits::{EmbeddingProvider, LlmProvider, LlmRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Which generation backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Anthropic Messages API
    Claude,
    /// OpenAI Chat Completions
    OpenAi,
    /// OpenAI-compatible AI gateway at `base_url`
    Gateway,
    /// Deterministic mock replying with `mock_response`
    Mock,
}

/// Generation provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend
    pub provider: ProviderKind,

    /// Model identifier
    pub model: String,

    /// Endpoint override; required for `gateway`
    pub base_url: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Output token ceiling per page
    pub max_tokens: u32,

    /// Retry policy; the provider default applies when absent
    pub retry: Option<RetryConfig>,

    /// Reply of the mock provider
    pub mock_response: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Claude,
            model: "claude-3-5-sonnet-latest".to_string(),
            base_url: None,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            timeout_secs: crate::claude::DEFAULT_TIMEOUT_SECS,
            max_tokens: 8192,
            retry: None,
            mock_response: "{}".to_string(),
        }
    }
}

impl LlmConfig {
    /// Mock configuration for tests and offline runs
    pub fn mock(response: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::Mock,
            model: "mock".to_string(),
            mock_response: response.into(),
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("model must not be empty".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be positive".to_string());
        }
        if self.max_tokens == 0 {
            return Err("max_tokens must be positive".to_string());
        }
        if self.provider == ProviderKind::Gateway && self.base_url.is_none() {
            return Err("gateway provider requires base_url".to_string());
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }

    fn api_key(&self) -> Result<String, LlmError> {
        std::env::var(&self.api_key_env).map_err(|_| {
            LlmError::Configuration(format!("environment variable {} is not set", self.api_key_env))
        })
    }
}

/// Generation provider selected at runtime
pub enum AnyProvider {
    /// Claude
    Claude(ClaudeProvider),
    /// OpenAI or gateway
    OpenAi(OpenAiProvider),
    /// Mock
    Mock(MockProvider),
}

impl AnyProvider {
    /// Build the configured provider, reading its API key from the environment
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        config.validate().map_err(LlmError::Configuration)?;
        let timeout = Duration::from_secs(config.timeout_secs);

        let provider = match config.provider {
            ProviderKind::Claude => {
                let mut provider = ClaudeProvider::new(config.api_key()?, &config.model)?
                    .with_timeout(timeout)
                    .with_retry(config.retry.clone().unwrap_or_else(RetryConfig::for_claude));
                if let Some(url) = &config.base_url {
                    provider = provider.with_endpoint(url);
                }
                AnyProvider::Claude(provider)
            }
            ProviderKind::OpenAi | ProviderKind::Gateway => {
                let api_key = config.api_key()?;
                let provider = match &config.base_url {
                    Some(url) => OpenAiProvider::gateway(url, api_key, &config.model)?,
                    None => OpenAiProvider::new(api_key, &config.model)?,
                };
                AnyProvider::OpenAi(
                    provider
                        .with_timeout(timeout)
                        .with_retry(config.retry.clone().unwrap_or_default()),
                )
            }
            ProviderKind::Mock => AnyProvider::Mock(MockProvider::new(&config.mock_response)),
        };

        info!(provider = ?config.provider, model = %config.model, "LLM provider configured");
        Ok(provider)
    }
}

#[async_trait]
impl LlmProvider for AnyProvider {
    type Error = LlmError;

    async fn generate(&self, request: &LlmRequest) -> Result<String, Self::Error> {
        match self {
            AnyProvider::Claude(p) => p.generate(request).await,
            AnyProvider::OpenAi(p) => p.generate(request).await,
            AnyProvider::Mock(p) => LlmProvider::generate(p, request).await,
        }
    }

    fn model_name(&self) -> &str {
        match self {
            AnyProvider::Claude(p) => LlmProvider::model_name(p),
            AnyProvider::OpenAi(p) => LlmProvider::model_name(p),
            AnyProvider::Mock(p) => p.model_name(),
        }
    }
}

/// Which embedding backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    /// OpenAI-style embeddings endpoint
    OpenAi,
    /// Deterministic mock vectors
    Mock,
}

/// Embedding provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Backend
    pub provider: EmbeddingKind,

    /// Model identifier
    pub model: String,

    /// Endpoint override (OpenAI-compatible prefix)
    pub base_url: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Vector dimension
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingKind::OpenAi,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

impl EmbeddingConfig {
    /// Mock configuration
    pub fn mock(dimension: usize) -> Self {
        Self {
            provider: EmbeddingKind::Mock,
            model: "mock".to_string(),
            dimension,
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.dimension == 0 || self.dimension > 8192 {
            return Err(format!("dimension {} out of range [1, 8192]", self.dimension));
        }
        Ok(())
    }
}

/// Embedding provider selected at runtime
pub enum AnyEmbedder {
    /// OpenAI-style endpoint
    OpenAi(OpenAiEmbedder),
    /// Mock
    Mock(MockEmbedder),
}

impl AnyEmbedder {
    /// Build the configured embedder
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, LlmError> {
        config.validate().map_err(LlmError::Configuration)?;
        let embedder = match config.provider {
            EmbeddingKind::OpenAi => {
                let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                    LlmError::Configuration(format!(
                        "environment variable {} is not set",
                        config.api_key_env
                    ))
                })?;
                let mut embedder = OpenAiEmbedder::new(api_key, &config.model, config.dimension)?;
                if let Some(url) = &config.base_url {
                    embedder = embedder.with_base_url(url);
                }
                AnyEmbedder::OpenAi(embedder)
            }
            EmbeddingKind::Mock => AnyEmbedder::Mock(MockEmbedder::new(config.dimension)),
        };
        info!(provider = ?config.provider, dimension = config.dimension, "embedding provider configured");
        Ok(embedder)
    }
}

#[async_trait]
impl EmbeddingProvider for AnyEmbedder {
    type Error = LlmError;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, Self::Error> {
        match self {
            AnyEmbedder::OpenAi(e) => e.embed(text).await,
            AnyEmbedder::Mock(e) => EmbeddingProvider::embed(e, text).await,
        }
    }

    fn dimension(&self) -> usize {
        match self {
            AnyEmbedder::OpenAi(e) => EmbeddingProvider::dimension(e),
            AnyEmbedder::Mock(e) => e.dimension(),
        }
    }
}
