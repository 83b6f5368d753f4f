//! Extraction run state - the unit of resumability
//!
//! A run tracks one extraction attempt over one document. The server is the
//! only writer of progress fields; clients may only move a run to `paused`
//! or `cancelled`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of error messages kept in a run's stats
pub const MAX_STATS_ERRORS: usize = 50;

/// Unique identifier for an extraction run based on UUIDv7
///
/// UUIDv7 keeps runs chronologically sortable, which is what "latest run for
/// a document" lookups rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(uuid::Uuid);

impl RunId {
    /// Generate a new UUIDv7-based RunId
    ///
    /// # Examples
    ///
    /// ```
    /// use douane_domain::RunId;
    ///
    /// let a = RunId::new();
    /// let b = RunId::new();
    /// assert_ne!(a, b);
    /// ```
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Parse a RunId from its string form
    ///
    /// # Examples
    ///
    /// ```
    /// use douane_domain::RunId;
    ///
    /// let id = RunId::new();
    /// let parsed = RunId::from_string(&id.to_string()).unwrap();
    /// assert_eq!(id, parsed);
    /// ```
    pub fn from_string(s: &str) -> Result<Self, String> {
        uuid::Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| format!("Invalid run id: {}", e))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a run extracts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// Tariff schedule rows, HS codes and notes
    Tariff,

    /// Embedded text chunks of a regulatory document
    Legal,
}

impl RunKind {
    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Tariff => "tariff",
            RunKind::Legal => "legal",
        }
    }

    /// Parse a kind from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tariff" => Some(RunKind::Tariff),
            "legal" => Some(RunKind::Legal),
            _ => None,
        }
    }
}

/// Lifecycle status of a run
///
/// ```text
/// processing → processing (more pages) | done | error
///      └────→ paused | cancelled   (client request)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Batches are being processed
    Processing,

    /// Every page has been attempted
    Done,

    /// Unrecoverable failure
    Error,

    /// Stopped by the client; resumable with the run id
    Paused,

    /// Deleted by explicit request; never resumed
    Cancelled,
}

impl RunStatus {
    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Processing => "processing",
            RunStatus::Done => "done",
            RunStatus::Error => "error",
            RunStatus::Paused => "paused",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a status from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "processing" => Some(RunStatus::Processing),
            "done" => Some(RunStatus::Done),
            "error" => Some(RunStatus::Error),
            "paused" => Some(RunStatus::Paused),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether the run can never process another page
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Cancelled)
    }

    /// Whether a batch request may advance a run in this status
    ///
    /// Paused and errored runs resume; done runs only replay.
    pub fn accepts_batches(&self) -> bool {
        matches!(self, RunStatus::Processing | RunStatus::Paused | RunStatus::Error)
    }

    /// Whether a client is allowed to request this transition
    pub fn is_client_settable(&self) -> bool {
        matches!(self, RunStatus::Paused | RunStatus::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running tally attached to a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Tariff rows inserted (or extracted, in preview mode)
    #[serde(default)]
    pub tariff_lines_inserted: u32,

    /// HS code mentions inserted
    #[serde(default)]
    pub hs_codes_inserted: u32,

    /// Notes inserted
    #[serde(default)]
    pub notes_inserted: u32,

    /// Pages whose extraction failed and were skipped
    #[serde(default)]
    pub pages_skipped: u32,

    /// Legal text chunks inserted
    #[serde(default)]
    pub chunks_inserted: u32,

    /// HS codes detected in legal text
    #[serde(default)]
    pub codes_detected: u32,

    /// Error messages, bounded by [`MAX_STATS_ERRORS`]
    #[serde(default)]
    pub errors: Vec<String>,
}

impl BatchStats {
    /// Create an empty tally
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an error message unless the list is full
    pub fn push_error(&mut self, message: impl Into<String>) {
        if self.errors.len() < MAX_STATS_ERRORS {
            self.errors.push(message.into());
        }
    }

    /// Add another tally into this one
    pub fn merge(&mut self, other: &BatchStats) {
        self.tariff_lines_inserted += other.tariff_lines_inserted;
        self.hs_codes_inserted += other.hs_codes_inserted;
        self.notes_inserted += other.notes_inserted;
        self.pages_skipped += other.pages_skipped;
        self.chunks_inserted += other.chunks_inserted;
        self.codes_detected += other.codes_detected;
        for error in &other.errors {
            self.push_error(error.clone());
        }
    }

    /// Total number of rows, codes, notes and chunks recorded
    pub fn total_items(&self) -> u32 {
        self.tariff_lines_inserted
            + self.hs_codes_inserted
            + self.notes_inserted
            + self.chunks_inserted
    }
}

/// Inheritance context carried from one tariff row to the next
///
/// Continuation rows in tariff tables omit the code and description of their
/// parent. The context survives batch boundaries by being stored on the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowContext {
    /// Last HS position seen
    pub hs_code_6: Option<String>,

    /// Last full national code seen
    pub national_code: Option<String>,

    /// Last stated description
    pub description: Option<String>,
}

/// One resumable extraction attempt over one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRun {
    /// Unique identifier
    pub id: RunId,

    /// Owning document
    pub pdf_id: String,

    /// Tariff or legal extraction
    pub kind: RunKind,

    /// Lifecycle status
    pub status: RunStatus,

    /// Next page to process (1-based)
    pub current_page: u32,

    /// Page count, once resolved
    pub total_pages: Option<u32>,

    /// Number of pages attempted so far
    pub processed_pages: u32,

    /// Accumulated counters
    pub stats: BatchStats,

    /// Inheritance context at `current_page - 1`
    #[serde(default)]
    pub carry: Option<RowContext>,

    /// Creation time (Unix seconds)
    pub created_at: u64,

    /// Last mutation time (Unix seconds)
    pub updated_at: u64,

    /// Time the run reached `done` (Unix seconds)
    pub completed_at: Option<u64>,
}

impl ExtractionRun {
    /// Create a run positioned on page 1
    ///
    /// Runs always begin at the first page so that `done` implies every page
    /// in `[1, total_pages]` was attempted. Later pages are reached by
    /// resuming the run.
    pub fn new(pdf_id: impl Into<String>, kind: RunKind) -> Self {
        let now = crate::unix_now();
        Self {
            id: RunId::new(),
            pdf_id: pdf_id.into(),
            kind,
            status: RunStatus::Processing,
            current_page: 1,
            total_pages: None,
            processed_pages: 0,
            stats: BatchStats::new(),
            carry: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Record the page count of the document
    ///
    /// Fails if pages already processed exceed the count, which would break
    /// `processed_pages <= total_pages`.
    pub fn set_total_pages(&mut self, total: u32) -> Result<(), String> {
        if self.processed_pages > total {
            return Err(format!(
                "run {} already processed {} pages, cannot set total to {}",
                self.id, self.processed_pages, total
            ));
        }
        self.total_pages = Some(total);
        self.updated_at = crate::unix_now();
        Ok(())
    }

    /// Apply the outcome of one batch
    ///
    /// `last_page` is the last page of the window that was attempted and
    /// `pages_attempted` the number of pages in that window, which must start
    /// at `current_page`. This is the only mutator of progress fields; it
    /// keeps `current_page` non-decreasing, caps `processed_pages` at
    /// `total_pages` and moves the run to `done` once every page has been
    /// attempted.
    pub fn record_batch(
        &mut self,
        last_page: u32,
        pages_attempted: u32,
        stats: &BatchStats,
    ) -> Result<(), String> {
        let first_page = (last_page + 1).checked_sub(pages_attempted);
        if pages_attempted == 0 || first_page != Some(self.current_page) {
            return Err(format!(
                "run {} is at page {}, refusing a window of {} page(s) ending at {}",
                self.id, self.current_page, pages_attempted, last_page
            ));
        }

        self.current_page = last_page + 1;
        self.processed_pages += pages_attempted;
        if let Some(total) = self.total_pages {
            self.processed_pages = self.processed_pages.min(total);
        }
        self.stats.merge(stats);
        self.updated_at = crate::unix_now();

        if self.is_complete() {
            self.status = RunStatus::Done;
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Change the status without touching progress
    pub fn mark(&mut self, status: RunStatus) {
        self.status = status;
        self.updated_at = crate::unix_now();
        if status == RunStatus::Done && self.completed_at.is_none() {
            self.completed_at = Some(self.updated_at);
        }
    }

    /// Whether every page has been attempted
    pub fn is_complete(&self) -> bool {
        matches!(self.total_pages, Some(total) if self.current_page > total)
    }

    /// Next page to request, or `None` when the run is complete
    pub fn next_page(&self) -> Option<u32> {
        if self.is_complete() || self.status == RunStatus::Done {
            None
        } else {
            Some(self.current_page)
        }
    }

    /// Pages left to process, once the page count is known
    pub fn remaining_pages(&self) -> Option<u32> {
        self.total_pages
            .map(|total| (total + 1).saturating_sub(self.current_page))
    }

    /// Whether the pages `[start, end]` have all been attempted already
    ///
    /// Every run starts at page 1, so all pages below `current_page` were
    /// attempted.
    pub fn covers(&self, start: u32, end: u32) -> bool {
        start >= 1 && start <= end && end < self.current_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with_total(total: u32) -> ExtractionRun {
        let mut run = ExtractionRun::new("pdf-1", RunKind::Tariff);
        run.set_total_pages(total).unwrap();
        run
    }

    #[test]
    fn test_new_run_defaults() {
        let run = ExtractionRun::new("pdf-1", RunKind::Tariff);
        assert_eq!(run.current_page, 1);
        assert_eq!(run.status, RunStatus::Processing);
        assert_eq!(run.processed_pages, 0);
        assert!(run.total_pages.is_none());
        assert_eq!(run.next_page(), Some(1));
    }

    #[test]
    fn test_record_batch_advances() {
        let mut run = run_with_total(10);
        let mut stats = BatchStats::new();
        stats.tariff_lines_inserted = 12;

        run.record_batch(4, 4, &stats).unwrap();
        assert_eq!(run.current_page, 5);
        assert_eq!(run.processed_pages, 4);
        assert_eq!(run.stats.tariff_lines_inserted, 12);
        assert_eq!(run.status, RunStatus::Processing);
        assert_eq!(run.remaining_pages(), Some(6));
    }

    #[test]
    fn test_record_batch_completes_run() {
        let mut run = run_with_total(6);
        run.record_batch(4, 4, &BatchStats::new()).unwrap();
        run.record_batch(6, 2, &BatchStats::new()).unwrap();

        assert_eq!(run.status, RunStatus::Done);
        assert!(run.completed_at.is_some());
        assert_eq!(run.next_page(), None);
        assert_eq!(run.processed_pages, 6);
    }

    #[test]
    fn test_record_batch_refuses_to_move_back() {
        let mut run = run_with_total(10);
        run.record_batch(4, 4, &BatchStats::new()).unwrap();
        assert!(run.record_batch(2, 2, &BatchStats::new()).is_err());
        assert_eq!(run.current_page, 5);
    }

    #[test]
    fn test_window_must_start_at_current_page() {
        let mut run = run_with_total(3);
        assert!(run.record_batch(3, 1, &BatchStats::new()).is_err());
        assert!(run.record_batch(3, 5, &BatchStats::new()).is_err());
        assert!(run.record_batch(2, 0, &BatchStats::new()).is_err());
        assert_eq!(run.current_page, 1);
        assert_eq!(run.status, RunStatus::Processing);
    }

    #[test]
    fn test_last_page_alone_never_completes_run() {
        let mut run = run_with_total(3);
        run.record_batch(1, 1, &BatchStats::new()).unwrap();
        run.record_batch(2, 1, &BatchStats::new()).unwrap();
        assert_eq!(run.status, RunStatus::Processing);

        run.record_batch(3, 1, &BatchStats::new()).unwrap();
        assert_eq!(run.status, RunStatus::Done);
        assert_eq!(run.processed_pages, 3);
    }

    #[test]
    fn test_set_total_below_processed_fails() {
        let mut run = ExtractionRun::new("pdf-1", RunKind::Legal);
        run.record_batch(5, 5, &BatchStats::new()).unwrap();
        assert!(run.set_total_pages(3).is_err());
        assert!(run.set_total_pages(5).is_ok());
    }

    #[test]
    fn test_covers() {
        let mut run = run_with_total(10);
        run.record_batch(4, 4, &BatchStats::new()).unwrap();
        assert!(run.covers(1, 4));
        assert!(run.covers(2, 3));
        assert!(!run.covers(1, 5));
        assert!(!run.covers(4, 2));
        assert!(!run.covers(0, 2));
    }

    #[test]
    fn test_stats_error_cap() {
        let mut stats = BatchStats::new();
        for i in 0..(MAX_STATS_ERRORS + 10) {
            stats.push_error(format!("error {}", i));
        }
        assert_eq!(stats.errors.len(), MAX_STATS_ERRORS);

        let mut total = BatchStats::new();
        total.merge(&stats);
        total.merge(&stats);
        assert_eq!(total.errors.len(), MAX_STATS_ERRORS);
    }

    #[test]
    fn test_stats_merge_counts() {
        let mut a = BatchStats::new();
        a.tariff_lines_inserted = 3;
        a.pages_skipped = 1;
        let mut b = BatchStats::new();
        b.tariff_lines_inserted = 2;
        b.notes_inserted = 4;

        a.merge(&b);
        assert_eq!(a.tariff_lines_inserted, 5);
        assert_eq!(a.notes_inserted, 4);
        assert_eq!(a.pages_skipped, 1);
        assert_eq!(a.total_items(), 9);
    }

    #[test]
    fn test_status_parse_and_flags() {
        assert_eq!(RunStatus::parse("PAUSED"), Some(RunStatus::Paused));
        assert_eq!(RunStatus::parse("unknown"), None);
        assert!(RunStatus::Done.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
        assert!(RunStatus::Paused.is_client_settable());
        assert!(!RunStatus::Done.is_client_settable());
        assert!(RunStatus::Error.accepts_batches());
        assert!(!RunStatus::Cancelled.accepts_batches());
        assert!(!RunStatus::Done.accepts_batches());
    }

    #[test]
    fn test_run_id_serializes_as_string() {
        let id = RunId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
