//! Error types for the extraction loops

use douane_domain::traits::CollaboratorError;
use thiserror::Error;

/// Errors that can occur while processing a batch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractorError {
    /// Missing or malformed request fields
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The requested run does not exist
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// The run was cancelled and never accepts batches again
    #[error("Run cancelled: {0}")]
    RunCancelled(String),

    /// The request skips pages the run has not processed
    #[error("Page gap: run is at page {expected}, request starts at {requested}")]
    PageGap {
        /// Next page of the run
        expected: u32,
        /// First page of the request
        requested: u32,
    },

    /// Document could not be fetched
    #[error("Document error: {0}")]
    Document(String),

    /// Document is not a readable PDF
    #[error("PDF error: {0}")]
    Pdf(String),

    /// The provider rejected our credentials; every page would fail
    #[error("Provider authentication failed: {0}")]
    Authentication(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(String),

    /// A provider is not configured; every page would fail
    #[error("Provider configuration error: {0}")]
    Config(String),
}

impl ExtractorError {
    /// Classify a provider error that stops the run
    pub(crate) fn from_fatal<E: CollaboratorError>(error: &E) -> Self {
        if error.is_authentication() {
            ExtractorError::Authentication(error.to_string())
        } else {
            ExtractorError::Config(error.to_string())
        }
    }
}
