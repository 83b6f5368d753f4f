//! Client-side collection of batch results

use douane_domain::{BatchResponse, ExtractedNote, HsCodeEntry, TariffLine};
use serde::Serialize;
use std::collections::HashSet;

/// Pages whose results were adopted from server progress without the
/// client ever receiving the batch response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdoptedRange {
    /// First page of the range
    pub first_page: u32,
    /// Last page of the range
    pub last_page: u32,
}

/// Rows, codes and notes gathered over a run
///
/// HS codes are deduplicated by `code_clean` across batches; the first
/// mention wins.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionAccumulator {
    tariff_lines: Vec<TariffLine>,
    hs_codes: Vec<HsCodeEntry>,
    notes: Vec<ExtractedNote>,
    summaries: Vec<String>,
    adopted: Vec<AdoptedRange>,
    batches: u32,
    #[serde(skip)]
    seen_codes: HashSet<String>,
}

impl ExtractionAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the rows of one batch response
    pub fn merge(&mut self, response: &BatchResponse) {
        self.batches += 1;
        self.tariff_lines.extend(response.tariff_lines.iter().cloned());
        self.notes.extend(response.notes.iter().cloned());
        for entry in &response.hs_codes {
            self.add_hs_code(entry.clone());
        }
        if let Some(summary) = &response.summary {
            self.summaries.push(summary.clone());
        }
    }

    /// Add one HS code unless its `code_clean` was already seen
    ///
    /// Returns whether the code was new.
    pub fn add_hs_code(&mut self, entry: HsCodeEntry) -> bool {
        if self.seen_codes.insert(entry.code_clean.clone()) {
            self.hs_codes.push(entry);
            true
        } else {
            false
        }
    }

    /// Record pages processed server side whose rows were never received
    pub fn record_adopted(&mut self, first_page: u32, last_page: u32) {
        if first_page <= last_page {
            self.adopted.push(AdoptedRange {
                first_page,
                last_page,
            });
        }
    }

    /// Tariff rows received so far
    pub fn tariff_lines(&self) -> &[TariffLine] {
        &self.tariff_lines
    }

    /// Distinct HS codes received so far
    pub fn hs_codes(&self) -> &[HsCodeEntry] {
        &self.hs_codes
    }

    /// Notes received so far
    pub fn notes(&self) -> &[ExtractedNote] {
        &self.notes
    }

    /// Batch summaries, in page order
    pub fn summaries(&self) -> &[String] {
        &self.summaries
    }

    /// Ranges adopted from server progress
    pub fn adopted_ranges(&self) -> &[AdoptedRange] {
        &self.adopted
    }

    /// Batch responses merged
    pub fn batch_count(&self) -> u32 {
        self.batches
    }

    /// Whether nothing was received
    pub fn is_empty(&self) -> bool {
        self.tariff_lines.is_empty() && self.hs_codes.is_empty() && self.notes.is_empty()
    }
}
