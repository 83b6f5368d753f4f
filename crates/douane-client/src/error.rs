//! Error types for the Douane client.

use douane_domain::RunId;
use thiserror::Error;

/// Failure of a single call to the server
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// No response within the client-side timeout
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// Connection refused, reset, DNS failure
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code
        status: u16,
        /// Error message or body excerpt
        body: String,
    },

    /// The response body was not the expected JSON
    #[error("Decode error: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether retrying the same call may succeed
    ///
    /// Timeouts, network failures, 429 and 5xx are transient; other 4xx and
    /// undecodable bodies are not.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout(_) | TransportError::Network(_) => true,
            TransportError::Http { status, .. } => *status == 429 || *status >= 500,
            TransportError::Decode(_) => false,
        }
    }

    /// HTTP status, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

/// Client operation errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// A call failed in a way retrying cannot fix
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Consecutive failures reached the configured ceiling
    #[error("Gave up on page {page} after {attempts} consecutive failures: {last_error}")]
    RetriesExhausted {
        /// Page that could not be processed
        page: u32,
        /// Consecutive failed attempts
        attempts: u32,
        /// Last failure seen
        last_error: String,
    },

    /// The run was cancelled server side
    #[error("Run cancelled: {0}")]
    RunCancelled(RunId),

    /// The server marked the run `error`
    #[error("Run {run_id} failed on the server: {message}")]
    RunFailed {
        /// Failed run
        run_id: RunId,
        /// Last error returned by the server
        message: String,
    },

    /// The job or configuration is unusable
    #[error("Invalid job: {0}")]
    InvalidJob(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Timeout(300).is_transient());
        assert!(TransportError::Network("reset".into()).is_transient());
        for status in [429, 500, 502, 503, 504] {
            let error = TransportError::Http {
                status,
                body: String::new(),
            };
            assert!(error.is_transient(), "{} should be transient", status);
        }
        for status in [400, 401, 404, 409, 422] {
            let error = TransportError::Http {
                status,
                body: String::new(),
            };
            assert!(!error.is_transient(), "{} should be fatal", status);
        }
        assert!(!TransportError::Decode("eof".into()).is_transient());
    }

    #[test]
    fn test_status_accessor() {
        let error = TransportError::Http {
            status: 409,
            body: "Page gap".into(),
        };
        assert_eq!(error.status(), Some(409));
        assert_eq!(TransportError::Timeout(1).status(), None);
    }
}
