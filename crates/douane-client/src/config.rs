//! Configuration for the client-side loops

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of [`BatchOrchestrator`](crate::BatchOrchestrator) and
/// [`LegalIngestionRunner`](crate::LegalIngestionRunner)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Pages requested per tariff batch
    pub pages_per_batch: u32,

    /// Hard ceiling of one batch call (seconds); longer than provider latency
    pub batch_timeout_secs: u64,

    /// Ceiling of run-state and status calls (seconds)
    pub status_timeout_secs: u64,

    /// Pause between successful batches (milliseconds)
    pub inter_batch_delay_ms: u64,

    /// Consecutive failures after which the run is abandoned
    pub max_consecutive_failures: u32,

    /// Backoff after the first failure, doubled per further failure (ms)
    pub backoff_base_ms: u64,

    /// Ceiling of any backoff wait (ms)
    pub backoff_max_ms: u64,
}

impl Default for OrchestratorConfig {
    /// Default configuration with balanced settings
    fn default() -> Self {
        Self {
            pages_per_batch: 4,
            batch_timeout_secs: 300,
            status_timeout_secs: 30,
            inter_batch_delay_ms: 1_000,
            max_consecutive_failures: 5,
            backoff_base_ms: 2_000,
            backoff_max_ms: 60_000,
        }
    }
}

impl OrchestratorConfig {
    /// Aggressive preset: small batches, give up early
    pub fn aggressive() -> Self {
        Self {
            pages_per_batch: 2,
            batch_timeout_secs: 120,
            status_timeout_secs: 15,
            inter_batch_delay_ms: 250,
            max_consecutive_failures: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 10_000,
        }
    }

    /// Patient preset: ride out long provider outages
    pub fn patient() -> Self {
        Self {
            pages_per_batch: 4,
            batch_timeout_secs: 600,
            status_timeout_secs: 60,
            inter_batch_delay_ms: 3_000,
            max_consecutive_failures: 10,
            backoff_base_ms: 5_000,
            backoff_max_ms: 300_000,
        }
    }

    /// Get the batch timeout as a Duration
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    /// Get the status-call timeout as a Duration
    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    /// Get the inter-batch delay as a Duration
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    /// Wait after the `failures`-th consecutive failure
    ///
    /// # Examples
    ///
    /// ```
    /// use douane_client::OrchestratorConfig;
    /// use std::time::Duration;
    ///
    /// let config = OrchestratorConfig::default();
    /// assert_eq!(config.backoff_delay(1), Duration::from_millis(2_000));
    /// assert_eq!(config.backoff_delay(3), Duration::from_millis(8_000));
    /// assert_eq!(config.backoff_delay(30), Duration::from_millis(60_000));
    /// ```
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(32);
        let delay_ms = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        Duration::from_millis(delay_ms.min(self.backoff_max_ms))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.pages_per_batch == 0 {
            return Err("pages_per_batch must be greater than 0".to_string());
        }
        if self.batch_timeout_secs == 0 || self.status_timeout_secs == 0 {
            return Err("timeouts must be greater than 0".to_string());
        }
        if self.max_consecutive_failures == 0 {
            return Err("max_consecutive_failures must be greater than 0".to_string());
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err("backoff_base_ms cannot exceed backoff_max_ms".to_string());
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(OrchestratorConfig::default().validate().is_ok());
        assert!(OrchestratorConfig::aggressive().validate().is_ok());
        assert!(OrchestratorConfig::patient().validate().is_ok());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = OrchestratorConfig::aggressive();
        assert_eq!(config.backoff_delay(0), Duration::from_millis(1_000));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(2_000));
        assert_eq!(config.backoff_delay(5), Duration::from_millis(10_000));
    }

    #[test]
    fn test_invalid_zero_failures() {
        let mut config = OrchestratorConfig::default();
        config.max_consecutive_failures = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = OrchestratorConfig::from_toml("pages_per_batch = 8").unwrap();
        assert_eq!(config.pages_per_batch, 8);
        assert_eq!(config.max_consecutive_failures, 5);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = OrchestratorConfig::patient();
        let toml_str = config.to_toml().unwrap();
        assert_eq!(OrchestratorConfig::from_toml(&toml_str).unwrap(), config);
    }
}
