//! Wire types for the batch endpoints
//!
//! Field names follow the HTTP contract exactly (`pdfId`, `filePath`,
//! `previewOnly`, `start_page`, ...), so server and client share a single
//! definition.

use crate::run::{BatchStats, ExtractionRun, RunId, RunStatus};
use crate::tariff::{ExtractedNote, HsCodeEntry, TariffLine};
use serde::{Deserialize, Serialize};

fn default_start_page() -> u32 {
    1
}

/// Request for one tariff extraction batch (`POST /analyze-pdf`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Document identity
    #[serde(rename = "pdfId")]
    pub pdf_id: String,

    /// Path of the document in the document store
    #[serde(rename = "filePath")]
    pub file_path: String,

    /// Return rows instead of persisting them
    #[serde(rename = "previewOnly", default)]
    pub preview_only: bool,

    /// First page of the window (1-based)
    #[serde(default = "default_start_page")]
    pub start_page: u32,

    /// Window size; the server default applies when absent
    #[serde(default)]
    pub max_pages: Option<u32>,

    /// Run to continue; a new run is created when absent
    #[serde(default)]
    pub extraction_run_id: Option<RunId>,
}

impl BatchRequest {
    /// Check required fields
    pub fn validate(&self) -> Result<(), String> {
        if self.pdf_id.trim().is_empty() {
            return Err("pdfId is required".to_string());
        }
        if self.file_path.trim().is_empty() {
            return Err("filePath is required".to_string());
        }
        if self.start_page == 0 {
            return Err("start_page is 1-based".to_string());
        }
        if self.max_pages == Some(0) {
            return Err("max_pages must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Response of one tariff extraction batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Run the batch was applied to
    pub extraction_run_id: RunId,

    /// Whether every page has been attempted
    pub done: bool,

    /// Next page to request, `None` when done
    pub next_page: Option<u32>,

    /// Pages attempted so far in the run
    pub processed_pages: u32,

    /// Page count of the document
    pub total_pages: u32,

    /// Cumulative run stats
    pub stats: BatchStats,

    /// Stats of this batch alone (empty on replay)
    #[serde(default)]
    pub batch_stats: BatchStats,

    /// Run status after the batch
    pub status: RunStatus,

    /// True when the request repeated an already applied window
    #[serde(default)]
    pub replayed: bool,

    /// Rows of this batch (preview mode)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tariff_lines: Vec<TariffLine>,

    /// HS code mentions of this batch (preview mode)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hs_codes: Vec<HsCodeEntry>,

    /// Notes of this batch (preview mode)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<ExtractedNote>,

    /// One-line human summary of the batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl BatchResponse {
    /// Build a response from the run state after a batch
    pub fn for_run(run: &ExtractionRun, batch_stats: BatchStats, replayed: bool) -> Self {
        Self {
            extraction_run_id: run.id,
            done: run.status == RunStatus::Done,
            next_page: run.next_page(),
            processed_pages: run.processed_pages,
            total_pages: run.total_pages.unwrap_or(0),
            stats: run.stats.clone(),
            batch_stats,
            status: run.status,
            replayed,
            tariff_lines: Vec::new(),
            hs_codes: Vec::new(),
            notes: Vec::new(),
            summary: None,
        }
    }
}

/// Request for one legal ingestion page (`POST /ingest-legal`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalBatchRequest {
    /// Document identity
    #[serde(rename = "pdfId")]
    pub pdf_id: String,

    /// Path of the document in the document store
    #[serde(rename = "filePath")]
    pub file_path: String,

    /// Page to ingest (1-based)
    #[serde(default = "default_start_page")]
    pub start_page: u32,

    /// Last page of the requested range; the whole document when absent
    #[serde(default)]
    pub end_page: Option<u32>,

    /// Run to continue; the latest legal run is consulted when absent
    #[serde(default)]
    pub extraction_run_id: Option<RunId>,
}

impl LegalBatchRequest {
    /// Check required fields
    pub fn validate(&self) -> Result<(), String> {
        if self.pdf_id.trim().is_empty() {
            return Err("pdfId is required".to_string());
        }
        if self.file_path.trim().is_empty() {
            return Err("filePath is required".to_string());
        }
        if self.start_page == 0 {
            return Err("start_page is 1-based".to_string());
        }
        if let Some(end) = self.end_page {
            if end < self.start_page {
                return Err(format!(
                    "end_page {} is before start_page {}",
                    end, self.start_page
                ));
            }
        }
        Ok(())
    }
}

/// Response of one legal ingestion page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalBatchResponse {
    /// Run the page was applied to
    pub extraction_run_id: RunId,

    /// Whether every page has been attempted
    pub done: bool,

    /// Next page to request, `None` when done
    pub next_page: Option<u32>,

    /// Pages attempted so far in the run
    pub processed_pages: u32,

    /// Last page of the run: the page count, or `end_page` when a range was
    /// requested
    pub total_pages: u32,

    /// Cumulative run stats
    pub stats: BatchStats,

    /// Run status after the page
    pub status: RunStatus,

    /// Chunks stored for this page
    #[serde(default)]
    pub chunks_inserted: u32,

    /// HS codes detected on this page
    #[serde(default)]
    pub codes_detected: u32,

    /// The requested range was already fully ingested; nothing was done
    #[serde(default)]
    pub already_complete: bool,

    /// True when the request repeated an already applied page
    #[serde(default)]
    pub replayed: bool,
}

impl LegalBatchResponse {
    /// Build a response from the run state after a page
    pub fn for_run(run: &ExtractionRun) -> Self {
        Self {
            extraction_run_id: run.id,
            done: run.status == RunStatus::Done,
            next_page: run.next_page(),
            processed_pages: run.processed_pages,
            total_pages: run.total_pages.unwrap_or(0),
            stats: run.stats.clone(),
            status: run.status,
            chunks_inserted: 0,
            codes_detected: 0,
            already_complete: false,
            replayed: false,
        }
    }
}

/// Client-requested status change (`POST /runs/:id/status`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatusUpdate {
    /// Either `paused` or `cancelled`
    pub status: RunStatus,
}
