//! Configuration for the extraction loops

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Text chunking strategy for legal pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChunkStrategy {
    /// Split by paragraphs (blank lines)
    #[default]
    ByParagraph,
    /// Split by articles, chapters and numbered sections
    BySection,
    /// Split by approximate token count
    ByTokenCount,
}

/// Configuration for the batch extractor and the legal ingestor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Pages per tariff batch when the request does not say
    pub default_batch_pages: u32,

    /// Hard ceiling on pages per tariff batch
    pub max_batch_pages: u32,

    /// Time budget of one page call, retries included (seconds)
    pub page_timeout_secs: u64,

    /// Output token ceiling of one tariff page
    pub max_tokens: u32,

    /// Output token ceiling of one legal page
    pub legal_max_tokens: u32,

    /// Documents whose page count is remembered
    pub page_cache_capacity: usize,

    /// How long a page count is trusted (seconds)
    pub page_cache_ttl_secs: u64,

    /// Chunking strategy for legal text
    pub chunk_strategy: ChunkStrategy,

    /// Maximum chunk size (characters)
    pub max_chunk_size: usize,
}

impl ExtractorConfig {
    /// Get the page timeout as a Duration
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    /// Get the page-count TTL as a Duration
    pub fn page_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.page_cache_ttl_secs)
    }

    /// Window size for a request asking for `requested` pages
    pub fn batch_pages(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_batch_pages)
            .clamp(1, self.max_batch_pages)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.default_batch_pages == 0 {
            return Err("default_batch_pages must be greater than 0".to_string());
        }
        if self.default_batch_pages > self.max_batch_pages {
            return Err("default_batch_pages cannot exceed max_batch_pages".to_string());
        }
        if self.page_timeout_secs == 0 {
            return Err("page_timeout_secs must be greater than 0".to_string());
        }
        if self.max_tokens == 0 || self.legal_max_tokens == 0 {
            return Err("token ceilings must be greater than 0".to_string());
        }
        if self.page_cache_capacity == 0 {
            return Err("page_cache_capacity must be greater than 0".to_string());
        }
        if self.max_chunk_size < 100 {
            return Err("max_chunk_size must be at least 100".to_string());
        }
        Ok(())
    }
}

impl Default for ExtractorConfig {
    /// Default configuration with balanced settings
    fn default() -> Self {
        Self {
            default_batch_pages: 4,
            max_batch_pages: 20,
            page_timeout_secs: 240,
            max_tokens: 16_000,
            legal_max_tokens: 8_000,
            page_cache_capacity: 256,
            page_cache_ttl_secs: 3_600,
            chunk_strategy: ChunkStrategy::ByParagraph,
            max_chunk_size: 1_500,
        }
    }
}

impl ExtractorConfig {
    /// Aggressive preset: small batches and short timeouts
    pub fn aggressive() -> Self {
        Self {
            default_batch_pages: 2,
            max_batch_pages: 5,
            page_timeout_secs: 90,
            max_tokens: 8_000,
            legal_max_tokens: 4_000,
            page_cache_capacity: 64,
            page_cache_ttl_secs: 600,
            chunk_strategy: ChunkStrategy::ByParagraph,
            max_chunk_size: 1_000,
        }
    }

    /// Lenient preset: larger batches and long timeouts
    pub fn lenient() -> Self {
        Self {
            default_batch_pages: 8,
            max_batch_pages: 40,
            page_timeout_secs: 600,
            max_tokens: 32_000,
            legal_max_tokens: 16_000,
            page_cache_capacity: 1_024,
            page_cache_ttl_secs: 86_400,
            chunk_strategy: ChunkStrategy::BySection,
            max_chunk_size: 3_000,
        }
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| format!("Failed to parse TOML: {}", e))
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize to TOML: {}", e))
    }
}
