//! Douane Extractor
//!
//! Server-side extraction loops: tariff schedules are read a window of pages
//! at a time, legal texts a page at a time, and both advance a persisted
//! [`ExtractionRun`](douane_domain::ExtractionRun) so an interrupted document
//! can be resumed where it stopped.
//!
//! # Architecture
//!
//! ```text
//! BatchRequest → BatchExtractor → LLM (one call per page)
//!                     │                 │
//!                     │           parse_llm_json → RowNormalizer
//!                     ▼                 ▼
//!                 RunStore ◄──── rows, codes, notes
//! ```
//!
//! # Key Features
//!
//! - **Resilient parsing**: truncated or chatty model replies are repaired
//!   before they are given up on ([`json`])
//! - **Reconciliation**: rate/unit column swaps and national-code columns are
//!   corrected deterministically ([`reconcile`])
//! - **Continuation rows**: rows without a printed code inherit from the row
//!   above, across page boundaries ([`rows`])
//! - **Idempotent batches**: a repeated window replays the run state instead
//!   of inserting twice ([`batch`])
//!
//! # Example Usage
//!
//! ```no_run
//! use douane_domain::BatchRequest;
//! use douane_extractor::{BatchExtractor, ExtractorConfig, PageCountCache};
//! use douane_llm::MockProvider;
//! use douane_store::{FsDocumentStore, SqliteStore};
//! use std::sync::{Arc, Mutex};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let extractor = BatchExtractor::new(
//!     Arc::new(MockProvider::new(r#"{"tariff_lines": []}"#)),
//!     Arc::new(FsDocumentStore::new("./documents")),
//!     Arc::new(Mutex::new(SqliteStore::new(":memory:")?)),
//!     Arc::new(PageCountCache::default()),
//!     ExtractorConfig::default(),
//! );
//!
//! let request: BatchRequest =
//!     serde_json::from_str(r#"{"pdfId": "tariff-2024", "filePath": "tariff-2024.pdf"}"#)?;
//! let response = extractor.process_batch(request).await?;
//! println!("next page: {:?}", response.next_page);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod batch;
pub mod cache;
pub mod chunking;
pub mod config;
pub mod error;
pub mod json;
pub mod legal;
pub mod pdf;
pub mod prompt;
pub mod reconcile;
pub mod rows;
pub mod runs;

#[cfg(test)]
mod tests;

pub use batch::{BatchExtractor, TARIFF_FIELDS};
pub use cache::PageCountCache;
pub use chunking::TextChunker;
pub use config::{ChunkStrategy, ExtractorConfig};
pub use error::ExtractorError;
pub use json::{parse_llm_json, ParseFailure, ParseQuality, ParseStrategy, ParsedJson};
pub use legal::{detect_codes, LegalIngestor, LEGAL_FIELDS};
pub use pdf::{blank_pdf, count_pages};
pub use prompt::{legal_page_prompt, PromptBuilder};
pub use reconcile::{fix_rate_unit_swap, resolve_col2_col3, Col2Col3, RateUnitFix, SwapDiagnostics};
pub use rows::{PageExtraction, RowNormalizer};
pub use runs::{load_run, set_run_status};
