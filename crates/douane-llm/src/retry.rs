//! Resilient HTTP caller
//!
//! Wraps one HTTP attempt in a bounded retry loop. A response whose status is
//! retryable is retried after the `Retry-After` delay (when the server sends
//! one) or an exponential backoff, both capped at `max_delay_ms`. Transport
//! failures get the same backoff. After `max_retries` additional attempts the
//! last response is returned as is, or the last transport error is raised.
//!
//! The loop is generic over [`RetryStatus`] so it can be driven by fake
//! responses in tests.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Anthropic's "overloaded" status
pub const STATUS_OVERLOADED: u16 = 529;

/// Retry policy of the HTTP caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    pub max_retries: u32,

    /// Backoff before the first retry, doubled on each further retry
    pub initial_delay_ms: u64,

    /// Ceiling of any single wait, including `Retry-After`
    pub max_delay_ms: u64,

    /// Statuses that trigger a retry
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            retryable_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// Defaults plus the provider-specific "overloaded" status
    pub fn for_claude() -> Self {
        let mut config = Self::default();
        config.retryable_statuses.push(STATUS_OVERLOADED);
        config
    }

    /// Fail fast: a single retry with short waits
    pub fn aggressive() -> Self {
        Self {
            max_retries: 1,
            initial_delay_ms: 250,
            max_delay_ms: 2_000,
            ..Self::default()
        }
    }

    /// Ride out long provider outages
    pub fn patient() -> Self {
        Self {
            max_retries: 6,
            initial_delay_ms: 2_000,
            max_delay_ms: 60_000,
            ..Self::default()
        }
    }

    /// Never retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries > 20 {
            return Err(format!("max_retries {} exceeds 20", self.max_retries));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(format!(
                "initial_delay_ms {} exceeds max_delay_ms {}",
                self.initial_delay_ms, self.max_delay_ms
            ));
        }
        if let Some(status) = self
            .retryable_statuses
            .iter()
            .find(|s| !(100..=599).contains(*s))
        {
            return Err(format!("{} is not an HTTP status", status));
        }
        Ok(())
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| format!("Failed to parse retry config: {}", e))
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize retry config: {}", e))
    }

    /// Whether a status is retried
    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Exponential backoff before retry number `attempt + 1`, capped
    ///
    /// # Examples
    ///
    /// ```
    /// use douane_llm::RetryConfig;
    /// use std::time::Duration;
    ///
    /// let config = RetryConfig::default();
    /// assert_eq!(config.backoff_delay(0), Duration::from_millis(1_000));
    /// assert_eq!(config.backoff_delay(2), Duration::from_millis(4_000));
    /// assert_eq!(config.backoff_delay(10), Duration::from_millis(30_000));
    /// ```
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(32));
        let delay_ms = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// Cap a server-requested delay
    pub fn cap(&self, delay: Duration) -> Duration {
        delay.min(Duration::from_millis(self.max_delay_ms))
    }
}

/// Parse a `Retry-After` header given in seconds
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    header_value?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// What the retry loop needs to know about a response
pub trait RetryStatus {
    /// HTTP status code
    fn status_code(&self) -> u16;

    /// Delay requested by the server, if any
    fn retry_after(&self) -> Option<Duration>;
}

impl RetryStatus for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }

    fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(
            self.headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        )
    }
}

/// Perform `attempt_fn` with bounded retries
///
/// `attempt_fn` receives the zero-based attempt number. `label` names the
/// call in log lines.
pub async fn call_with_retry<R, E, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut attempt_fn: F,
) -> Result<R, E>
where
    R: RetryStatus,
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        let is_last = attempt >= config.max_retries;

        let wait = match attempt_fn(attempt).await {
            Ok(response) => {
                let status = response.status_code();
                if !config.is_retryable(status) {
                    debug!(call = label, attempt = attempt + 1, status, "call completed");
                    return Ok(response);
                }
                if is_last {
                    warn!(
                        call = label,
                        attempt = attempt + 1,
                        status,
                        "retries exhausted, returning last response"
                    );
                    return Ok(response);
                }
                let wait = match response.retry_after() {
                    Some(requested) => config.cap(requested),
                    None => config.backoff_delay(attempt),
                };
                warn!(
                    call = label,
                    attempt = attempt + 1,
                    status,
                    wait_ms = wait.as_millis() as u64,
                    "retryable status, backing off"
                );
                wait
            }
            Err(e) => {
                if is_last {
                    warn!(call = label, attempt = attempt + 1, error = %e, "retries exhausted");
                    return Err(e);
                }
                let wait = config.backoff_delay(attempt);
                warn!(
                    call = label,
                    attempt = attempt + 1,
                    error = %e,
                    wait_ms = wait.as_millis() as u64,
                    "transport failure, backing off"
                );
                wait
            }
        };

        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}
