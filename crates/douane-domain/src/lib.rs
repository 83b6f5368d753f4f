//! Douane Domain Layer
//!
//! Core data model and trait seams for the customs-intelligence extraction
//! pipeline. Infrastructure (HTTP providers, SQLite, axum) lives in other
//! crates; this crate only depends on `uuid`, `serde` and `async-trait`.
//!
//! ## Key Concepts
//!
//! - **Run**: one resumable extraction attempt over one document
//!   ([`ExtractionRun`]), the unit of resumability
//! - **Batch**: one bounded window of pages processed in a single round trip
//! - **Tariff line**: one row of a national tariff schedule ([`TariffLine`])
//! - **HS code**: a harmonized-system code mention ([`HsCodeEntry`])
//! - **CAF**: customs value (cost, insurance, freight) on which duties are
//!   computed ([`duty`])
//!
//! ## Architecture
//!
//! - Pure data and arithmetic, no I/O
//! - Wire types for the batch endpoints live in [`api`] so server and client
//!   share one definition
//! - Trait definitions for every external collaborator live in [`traits`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod duty;
pub mod legal;
pub mod normalize;
pub mod run;
pub mod tariff;
pub mod traits;

// Re-exports for convenience
pub use api::{
    BatchRequest, BatchResponse, LegalBatchRequest, LegalBatchResponse, RunStatusUpdate,
};
pub use duty::{calculate_caf, calculate_taxes, CafBreakdown, CafInput, Incoterm, TaxBreakdown, TaxInput};
pub use legal::LegalChunk;
pub use normalize::{code_clean, normalize10_strict, normalize2_strict, normalize6_strict};
pub use traits::BatchCommit;
pub use run::{BatchStats, ExtractionRun, RowContext, RunId, RunKind, RunStatus, MAX_STATS_ERRORS};
pub use tariff::{ExtractedNote, HsCodeEntry, HsLevel, NoteType, TariffLine};

/// Current Unix time in seconds
///
/// Falls back to 0 if the system clock is set before the epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
