//! Output formatting for the CLI.

use crate::config::OutputFormat;
use crate::error::Result;
use colored::*;
use douane_client::{ClientError, LegalOutcome, Progress, ProgressObserver, RunOutcome};
use douane_domain::{CafBreakdown, ExtractionRun, RunStatus, TariffLine, TaxBreakdown};
use std::time::Duration;
use tabled::{
    builder::Builder,
    settings::{object::Rows, Alignment, Modify, Style},
};

/// Output formatter.
pub struct Formatter {
    format: OutputFormat,
    color_enabled: bool,
}

impl Formatter {
    /// Create a new formatter.
    pub fn new(format: OutputFormat, color_enabled: bool) -> Self {
        Self {
            format,
            color_enabled,
        }
    }

    /// Selected output format.
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Whether messages are colored.
    pub fn color_enabled(&self) -> bool {
        self.color_enabled
    }

    /// Format the server's view of a run.
    pub fn format_run(&self, run: &ExtractionRun) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(run)?),
            OutputFormat::Quiet => Ok(run.id.to_string()),
            OutputFormat::Table => {
                let total = run
                    .total_pages
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "?".to_string());
                let mut rows = vec![
                    ("Run", run.id.to_string()),
                    ("Document", run.pdf_id.clone()),
                    ("Kind", run.kind.as_str().to_string()),
                    ("Status", self.status(run.status)),
                    ("Pages", format!("{}/{}", run.processed_pages, total)),
                    ("Next page", run.next_page().map(|p| p.to_string()).unwrap_or_else(|| "-".into())),
                ];
                rows.extend(stats_rows(&run.stats));
                Ok(key_value_table(&rows))
            }
        }
    }

    /// Format the result of a tariff extraction.
    pub fn format_extraction(&self, outcome: &RunOutcome) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(&serde_json::json!({
                "run_id": outcome.run_id(),
                "status": outcome.status,
                "progress": outcome.progress,
                "results": outcome.accumulator,
            }))?),
            OutputFormat::Quiet => Ok(outcome
                .run_id()
                .map(|id| id.to_string())
                .unwrap_or_default()),
            OutputFormat::Table => {
                let mut output = self.progress_summary(&outcome.progress, outcome.status);
                let accumulator = &outcome.accumulator;
                if !accumulator.tariff_lines().is_empty() {
                    output.push('\n');
                    output.push_str(&tariff_table(accumulator.tariff_lines()));
                }
                if !accumulator.hs_codes().is_empty() {
                    output.push('\n');
                    output.push_str(&format!("{} distinct HS codes", accumulator.hs_codes().len()));
                }
                for range in accumulator.adopted_ranges() {
                    output.push('\n');
                    output.push_str(&self.warning(&format!(
                        "Pages {}-{} were processed by the server but their rows were not received",
                        range.first_page, range.last_page
                    )));
                }
                Ok(output)
            }
        }
    }

    /// Format the result of a legal ingestion.
    pub fn format_legal(&self, outcome: &LegalOutcome) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(&serde_json::json!({
                "run_id": outcome.progress.run_id,
                "status": outcome.status,
                "already_complete": outcome.already_complete,
                "progress": outcome.progress,
            }))?),
            OutputFormat::Quiet => Ok(outcome
                .progress
                .run_id
                .map(|id| id.to_string())
                .unwrap_or_default()),
            OutputFormat::Table => {
                if outcome.already_complete {
                    return Ok(self.info("Range already ingested, nothing to do"));
                }
                Ok(self.progress_summary(&outcome.progress, outcome.status))
            }
        }
    }

    /// Format a duty computation.
    pub fn format_taxes(&self, taxes: &TaxBreakdown) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(taxes)?),
            OutputFormat::Quiet => Ok(format!("{:.2}", taxes.total)),
            OutputFormat::Table => Ok(key_value_table(&[
                ("Duty", format_mad(taxes.duty)),
                ("TPF", format_mad(taxes.tpf)),
                ("VAT base", format_mad(taxes.vat_base)),
                ("VAT", format_mad(taxes.vat)),
                ("Total", format_mad(taxes.total)),
            ])),
        }
    }

    /// Format a customs value computation.
    pub fn format_caf(&self, caf: &CafBreakdown) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(caf)?),
            OutputFormat::Quiet => Ok(format!("{:.0}", caf.caf_mad)),
            OutputFormat::Table => Ok(key_value_table(&[
                ("Freight added", format!("{:.2}", caf.freight_added)),
                ("Insurance added", format!("{:.2}", caf.insurance_added)),
                ("CAF (invoice currency)", format!("{:.2}", caf.caf_foreign)),
                ("CAF", format_mad(caf.caf_mad)),
            ])),
        }
    }

    fn progress_summary(&self, progress: &Progress, status: RunStatus) -> String {
        let mut rows = vec![
            (
                "Run",
                progress
                    .run_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".into()),
            ),
            ("Status", self.status(status)),
            (
                "Pages",
                format!("{}/{}", progress.processed_pages, progress.total_pages),
            ),
            ("Elapsed", format_duration(progress.elapsed)),
        ];
        rows.extend(stats_rows(&progress.stats));
        key_value_table(&rows)
    }

    fn status(&self, status: RunStatus) -> String {
        let color = match status {
            RunStatus::Done => "green",
            RunStatus::Processing => "blue",
            RunStatus::Paused => "yellow",
            RunStatus::Error | RunStatus::Cancelled => "red",
        };
        self.colorize(status.as_str(), color)
    }

    /// Format a success message.
    pub fn success(&self, message: &str) -> String {
        self.colorize(&format!("✓ {}", message), "green")
    }

    /// Format an error message.
    pub fn error(&self, message: &str) -> String {
        self.colorize(&format!("✗ {}", message), "red")
    }

    /// Format an info message.
    pub fn info(&self, message: &str) -> String {
        self.colorize(&format!("ℹ {}", message), "blue")
    }

    /// Format a warning message.
    pub fn warning(&self, message: &str) -> String {
        self.colorize(&format!("⚠ {}", message), "yellow")
    }

    /// Colorize text if color is enabled.
    fn colorize(&self, text: &str, color: &str) -> String {
        if !self.color_enabled {
            return text.to_string();
        }

        match color {
            "red" => text.red().to_string(),
            "green" => text.green().to_string(),
            "blue" => text.blue().to_string(),
            "yellow" => text.yellow().to_string(),
            _ => text.to_string(),
        }
    }
}

/// Prints one progress line per batch on stderr
pub struct ProgressPrinter {
    enabled: bool,
    color_enabled: bool,
}

impl ProgressPrinter {
    /// Printer for the given output format; quiet and JSON output stay silent
    pub fn new(format: OutputFormat, color_enabled: bool) -> Self {
        Self {
            enabled: format == OutputFormat::Table,
            color_enabled,
        }
    }

    /// One-line rendering of a snapshot
    pub fn line(progress: &Progress) -> String {
        let eta = progress
            .estimated_remaining
            .map(format_duration)
            .unwrap_or_else(|| "?".to_string());
        format!(
            "pages {}/{} ({:.0}%) | lines {} | codes {} | skipped {} | eta {}",
            progress.processed_pages,
            progress.total_pages,
            progress.percent(),
            progress.stats.tariff_lines_inserted,
            progress.stats.hs_codes_inserted + progress.stats.codes_detected,
            progress.stats.pages_skipped,
            eta
        )
    }
}

impl ProgressObserver for ProgressPrinter {
    fn on_progress(&self, progress: &Progress) {
        if self.enabled {
            eprintln!("{}", Self::line(progress));
        }
    }

    fn on_error(&self, progress: &Progress, error: &ClientError) {
        if !self.enabled {
            return;
        }
        let message = format!("stopped at page {:?}: {}", progress.next_page, error);
        if self.color_enabled {
            eprintln!("{}", message.red());
        } else {
            eprintln!("{}", message);
        }
    }
}

fn stats_rows(stats: &douane_domain::BatchStats) -> Vec<(&'static str, String)> {
    let mut rows = Vec::new();
    if stats.tariff_lines_inserted > 0 || stats.hs_codes_inserted > 0 {
        rows.push(("Tariff lines", stats.tariff_lines_inserted.to_string()));
        rows.push(("HS codes", stats.hs_codes_inserted.to_string()));
        rows.push(("Notes", stats.notes_inserted.to_string()));
    }
    if stats.chunks_inserted > 0 {
        rows.push(("Chunks", stats.chunks_inserted.to_string()));
        rows.push(("Codes detected", stats.codes_detected.to_string()));
    }
    rows.push(("Pages skipped", stats.pages_skipped.to_string()));
    if !stats.errors.is_empty() {
        rows.push(("Errors", stats.errors.len().to_string()));
    }
    rows
}

fn key_value_table(rows: &[(&str, String)]) -> String {
    let mut builder = Builder::default();
    for (key, value) in rows {
        builder.push_record([key.to_string(), value.clone()]);
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

fn tariff_table(lines: &[TariffLine]) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Code", "Description", "Rate", "Unit", "Page"]);
    for line in lines {
        let rate = line
            .duty_rate
            .map(|r| format!("{}%", r))
            .or_else(|| line.duty_note.clone())
            .unwrap_or_default();
        builder.push_record([
            line.national_code.clone(),
            truncate(&line.description, 60),
            rate,
            line.unit_norm.clone().unwrap_or_default(),
            line.page_number.to_string(),
        ]);
    }

    let mut table = builder.build();
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    table.to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars - 1).collect();
    cut.push('…');
    cut
}

/// Format an amount in dirhams
fn format_mad(amount: f64) -> String {
    format!("{:.2} MAD", amount)
}

/// Render a duration as `1h 02m`, `3m 05s` or `42s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
