//! Configuration file parsing for the server.
//!
//! Settings come from a TOML file; a few deployment values can be overridden
//! from the environment (`DOUANE_BIND_ADDRESS`, `DOUANE_PORT`,
//! `DOUANE_DATABASE`, `DOUANE_STORAGE_ROOT`). API keys are never stored in
//! the file: each provider section names the variable that holds its key.

use douane_extractor::ExtractorConfig;
use douane_llm::{EmbeddingConfig, LlmConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Server configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A value is out of range or inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1")
    pub bind_address: String,

    /// Bind port (e.g., 8080)
    pub bind_port: u16,

    /// SQLite database file, or `:memory:`
    pub database_path: String,

    /// Root directory of the document store
    pub storage_root: String,

    /// Generation provider
    pub llm: LlmConfig,

    /// Embedding provider for legal chunks
    pub embedding: EmbeddingConfig,

    /// Extraction loop settings
    pub extractor: ExtractorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            bind_port: 8080,
            database_path: "douane.db".to_string(),
            storage_root: "documents".to_string(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            extractor: ExtractorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize configuration to a TOML string
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Load the effective configuration
    ///
    /// Reads `.env` if present, then the file (defaults when `None`), then
    /// the environment overrides, and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply deployment overrides looked up by variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("DOUANE_BIND_ADDRESS") {
            self.bind_address = address;
        }
        if let Some(port) = lookup("DOUANE_PORT") {
            self.bind_port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("DOUANE_PORT '{}' is not a port", port)))?;
        }
        if let Some(database) = lookup("DOUANE_DATABASE") {
            self.database_path = database;
        }
        if let Some(root) = lookup("DOUANE_STORAGE_ROOT") {
            self.storage_root = root;
        }
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.trim().is_empty() {
            return Err(ConfigError::Invalid("bind_address must not be empty".to_string()));
        }
        if self.database_path.trim().is_empty() {
            return Err(ConfigError::Invalid("database_path must not be empty".to_string()));
        }
        if self.storage_root.trim().is_empty() {
            return Err(ConfigError::Invalid("storage_root must not be empty".to_string()));
        }
        self.llm
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("llm: {}", e)))?;
        self.embedding
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("embedding: {}", e)))?;
        self.extractor
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("extractor: {}", e)))?;
        Ok(())
    }

    /// Offline configuration: mock providers and an in-memory database
    pub fn default_test_config() -> Self {
        Self {
            database_path: ":memory:".to_string(),
            llm: LlmConfig::mock(r#"{"tariff_lines": [], "hs_codes": [], "notes": []}"#),
            embedding: EmbeddingConfig::mock(16),
            ..Self::default()
        }
    }

    /// Get the full bind address (address:port)
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.bind_port)
    }
}
