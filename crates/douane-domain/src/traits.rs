//! Trait definitions for external collaborators
//!
//! These traits define the boundaries between extraction logic and
//! infrastructure. Implementations live in other crates: providers in
//! `douane-llm`, persistence in `douane-store`.

use crate::legal::LegalChunk;
use crate::run::{BatchStats, ExtractionRun, RunId, RunKind, RunStatus};
use crate::tariff::{ExtractedNote, HsCodeEntry, TariffLine};
use async_trait::async_trait;
use std::fmt::Display;

/// Classification shared by collaborator errors
pub trait CollaboratorError: Display + Send + Sync + 'static {
    /// Whether a later attempt may succeed (rate limits, 5xx, network)
    fn is_transient(&self) -> bool;

    /// Whether every further call will fail the same way (bad credentials,
    /// missing configuration)
    fn is_fatal(&self) -> bool {
        false
    }

    /// Whether the collaborator rejected our credentials
    fn is_authentication(&self) -> bool {
        false
    }
}

/// A document attached to an LLM request
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPart {
    /// Raw bytes of the document
    pub data: Vec<u8>,

    /// MIME type, e.g. `application/pdf`
    pub media_type: String,
}

impl DocumentPart {
    /// Wrap PDF bytes
    pub fn pdf(data: Vec<u8>) -> Self {
        Self {
            data,
            media_type: "application/pdf".to_string(),
        }
    }
}

/// One generation request: a prompt and optionally the document it is about
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    /// Instructions for the model
    pub prompt: String,

    /// Document the prompt refers to
    pub document: Option<DocumentPart>,

    /// Output token ceiling
    pub max_tokens: u32,
}

impl LlmRequest {
    /// Create a text-only request
    pub fn text(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            document: None,
            max_tokens,
        }
    }

    /// Attach a document to the request
    pub fn with_document(mut self, document: DocumentPart) -> Self {
        self.document = Some(document);
        self
    }
}

/// Trait for LLM provider operations
///
/// Implemented by the infrastructure layer (douane-llm)
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Error type for LLM operations
    type Error: CollaboratorError;

    /// Generate free text for a prompt and optional document
    async fn generate(&self, request: &LlmRequest) -> Result<String, Self::Error>;

    /// Model identifier, for logs
    fn model_name(&self) -> &str;
}

/// Trait for text embedding operations
///
/// Implemented by the infrastructure layer (douane-llm)
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Error type for embedding operations
    type Error: CollaboratorError;

    /// Embed one text into a fixed-dimension vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>, Self::Error>;

    /// Dimension of the produced vectors
    fn dimension(&self) -> usize;
}

/// Trait for the blob store holding uploaded documents
///
/// Implemented by the infrastructure layer (douane-store)
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Error type for document store operations
    type Error: Display + Send + Sync + 'static;

    /// Download a document by path
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, Self::Error>;

    /// Upload a document under a path
    async fn put(&self, path: &str, data: &[u8]) -> Result<(), Self::Error>;
}

/// Outcome of one window, written together with the run update
#[derive(Debug, Clone, Default)]
pub struct BatchCommit<'a> {
    /// Last page of the window
    pub last_page: u32,

    /// Number of pages in the window, starting at the run's current page
    pub pages_attempted: u32,

    /// Window tally; insert counters are added to what the store writes
    pub stats: BatchStats,

    /// Tariff rows to persist
    pub tariff_lines: &'a [TariffLine],

    /// HS code mentions to persist
    pub hs_codes: &'a [HsCodeEntry],

    /// Notes to persist
    pub notes: &'a [ExtractedNote],

    /// Embedded legal chunks to persist
    pub legal_chunks: &'a [LegalChunk],
}

impl<'a> BatchCommit<'a> {
    /// Window of `pages_attempted` pages ending at `last_page`, nothing to persist yet
    pub fn new(last_page: u32, pages_attempted: u32, stats: BatchStats) -> Self {
        Self {
            last_page,
            pages_attempted,
            stats,
            ..Self::default()
        }
    }
}

/// Trait for the relational persistence service
///
/// Implemented by the infrastructure layer (douane-store)
pub trait RunStore {
    /// Error type for store operations
    type Error: Display;

    /// Persist a new run
    fn create_run(&mut self, run: &ExtractionRun) -> Result<(), Self::Error>;

    /// Get a run by ID
    fn get_run(&self, id: RunId) -> Result<Option<ExtractionRun>, Self::Error>;

    /// Overwrite the stored state of an existing run
    fn save_run(&mut self, run: &ExtractionRun) -> Result<(), Self::Error>;

    /// Change only the status of a run; returns false if the run is unknown
    fn set_run_status(&mut self, id: RunId, status: RunStatus) -> Result<bool, Self::Error>;

    /// Most recently created run of a given kind for a document
    fn latest_run_for_document(
        &self,
        pdf_id: &str,
        kind: RunKind,
    ) -> Result<Option<ExtractionRun>, Self::Error>;

    /// Persist a window's rows and advance the run in one transaction
    ///
    /// The insert counters of `batch.stats` are increased by what was
    /// actually written (HS codes already stored for the document are
    /// ignored), then the window is recorded on the run. On success `run`
    /// holds the saved state and the window tally is returned; on failure
    /// nothing is written and `run` is left untouched.
    fn commit_batch(
        &mut self,
        run: &mut ExtractionRun,
        batch: BatchCommit<'_>,
    ) -> Result<BatchStats, Self::Error>;
}
