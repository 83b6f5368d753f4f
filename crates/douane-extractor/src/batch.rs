//! Server-side tariff batch loop
//!
//! One call processes one window of pages against one run: every page is sent
//! to the model on its own, the reply is parsed and normalised, and the run
//! is advanced once for the whole window. Pages that fail are counted and
//! skipped; only an authentication failure stops the run.

use crate::cache::PageCountCache;
use crate::config::ExtractorConfig;
use crate::error::ExtractorError;
use crate::json::parse_llm_json;
use crate::pdf::count_pages;
use crate::prompt::PromptBuilder;
use crate::rows::RowNormalizer;
use crate::runs::{lock_store, store_error};
use douane_domain::traits::{
    BatchCommit, CollaboratorError, DocumentPart, DocumentStore, LlmProvider, LlmRequest,
    RunStore,
};
use douane_domain::{
    BatchRequest, BatchResponse, BatchStats, ExtractedNote, ExtractionRun, HsCodeEntry, RunKind,
    RunStatus, TariffLine,
};
use std::sync::{Arc, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Top-level keys of a tariff page reply
pub const TARIFF_FIELDS: &[&str] = &["tariff_lines", "hs_codes", "notes"];

/// Fetch a document and resolve its page count through the cache
pub(crate) async fn fetch_document<D: DocumentStore>(
    documents: &D,
    cache: &PageCountCache,
    pdf_id: &str,
    file_path: &str,
) -> Result<(Vec<u8>, u32), ExtractorError> {
    let bytes = documents
        .fetch(file_path)
        .await
        .map_err(|e| ExtractorError::Document(format!("{}: {}", file_path, e)))?;

    let pages = match cache.get(pdf_id, file_path) {
        Some(pages) => pages,
        None => {
            let pages = count_pages(&bytes)?;
            cache.insert(pdf_id, file_path, pages);
            debug!(pdf_id, pages, "page count resolved");
            pages
        }
    };
    Ok((bytes, pages))
}

/// New runs always begin at page 1; later pages are reached by resuming
pub(crate) fn require_first_page(start_page: u32) -> Result<(), ExtractorError> {
    if start_page != 1 {
        return Err(ExtractorError::InvalidInput(format!(
            "a new run starts at page 1, got start_page {}; pass extraction_run_id to resume",
            start_page
        )));
    }
    Ok(())
}

/// Outcome of checking a request against an existing run
pub(crate) enum RunAdmission {
    /// Process the window starting at the run's current page
    Proceed(ExtractionRun),
    /// The pages were already attempted; answer with the current state
    Replay(ExtractionRun),
}

/// Decide what a request naming an existing run may do
///
/// Requests behind the run (or against a finished run) replay; requests
/// ahead of it are a page gap; cancelled runs never accept batches; paused
/// and errored runs resume.
pub(crate) fn admit(
    mut run: ExtractionRun,
    pdf_id: &str,
    kind: RunKind,
    start_page: u32,
) -> Result<RunAdmission, ExtractorError> {
    if run.kind != kind {
        return Err(ExtractorError::InvalidInput(format!(
            "run {} is a {} run",
            run.id,
            run.kind.as_str()
        )));
    }
    if run.pdf_id != pdf_id {
        return Err(ExtractorError::InvalidInput(format!(
            "run {} belongs to document {}",
            run.id, run.pdf_id
        )));
    }
    if run.status == RunStatus::Cancelled {
        return Err(ExtractorError::RunCancelled(run.id.to_string()));
    }
    if run.status == RunStatus::Done || run.is_complete() || start_page < run.current_page {
        return Ok(RunAdmission::Replay(run));
    }
    if start_page > run.current_page {
        return Err(ExtractorError::PageGap {
            expected: run.current_page,
            requested: start_page,
        });
    }
    if run.status.accepts_batches() && run.status != RunStatus::Processing {
        info!(run_id = %run.id, from = %run.status, "resuming run");
        run.mark(RunStatus::Processing);
    }
    Ok(RunAdmission::Proceed(run))
}

/// Rows, codes and notes gathered over one window
#[derive(Default)]
struct WindowOutput {
    lines: Vec<TariffLine>,
    hs_codes: Vec<HsCodeEntry>,
    notes: Vec<ExtractedNote>,
    summaries: Vec<String>,
}

/// Tariff extraction over page windows
pub struct BatchExtractor<L, D, S>
where
    L: LlmProvider,
    D: DocumentStore,
    S: RunStore,
{
    llm: Arc<L>,
    documents: Arc<D>,
    store: Arc<Mutex<S>>,
    page_cache: Arc<PageCountCache>,
    config: ExtractorConfig,
}

impl<L, D, S> BatchExtractor<L, D, S>
where
    L: LlmProvider,
    D: DocumentStore,
    S: RunStore,
{
    /// Create a new extractor over shared collaborators
    pub fn new(
        llm: Arc<L>,
        documents: Arc<D>,
        store: Arc<Mutex<S>>,
        page_cache: Arc<PageCountCache>,
        config: ExtractorConfig,
    ) -> Self {
        Self {
            llm,
            documents,
            store,
            page_cache,
            config,
        }
    }

    /// Shared run store
    pub fn store(&self) -> &Arc<Mutex<S>> {
        &self.store
    }

    /// Process one window of pages
    pub async fn process_batch(
        &self,
        request: BatchRequest,
    ) -> Result<BatchResponse, ExtractorError> {
        request.validate().map_err(ExtractorError::InvalidInput)?;

        let existing = match request.extraction_run_id {
            Some(id) => {
                let run = crate::runs::load_run(&self.store, id)?;
                match admit(run, &request.pdf_id, RunKind::Tariff, request.start_page)? {
                    RunAdmission::Replay(run) => {
                        info!(
                            run_id = %run.id,
                            start_page = request.start_page,
                            current_page = run.current_page,
                            "batch already processed, replaying run state"
                        );
                        return Ok(BatchResponse::for_run(&run, BatchStats::new(), true));
                    }
                    RunAdmission::Proceed(run) => Some(run),
                }
            }
            None => {
                require_first_page(request.start_page)?;
                None
            }
        };

        let (bytes, total_pages) = fetch_document(
            self.documents.as_ref(),
            &self.page_cache,
            &request.pdf_id,
            &request.file_path,
        )
        .await?;

        let mut run = match existing {
            Some(mut run) => {
                if run.total_pages.is_none() {
                    run.set_total_pages(total_pages)
                        .map_err(ExtractorError::InvalidInput)?;
                }
                run
            }
            None => {
                let mut run = ExtractionRun::new(&request.pdf_id, RunKind::Tariff);
                run.set_total_pages(total_pages)
                    .map_err(ExtractorError::InvalidInput)?;
                lock_store(&self.store)?
                    .create_run(&run)
                    .map_err(store_error)?;
                info!(run_id = %run.id, pdf_id = %run.pdf_id, total_pages, "extraction run created");
                run
            }
        };

        let total = run.total_pages.unwrap_or(total_pages);
        let first = run.current_page;
        let last = (first + self.config.batch_pages(request.max_pages) - 1).min(total);

        info!(
            run_id = %run.id,
            first_page = first,
            last_page = last,
            total_pages = total,
            preview = request.preview_only,
            "processing batch"
        );

        let mut stats = BatchStats::new();
        let mut output = WindowOutput::default();
        let mut normalizer = RowNormalizer::new(run.carry.clone());
        let mut llm_request =
            LlmRequest::text(String::new(), self.config.max_tokens).with_document(DocumentPart::pdf(bytes));

        for page in first..=last {
            llm_request.prompt = PromptBuilder::new(page, total)
                .with_context(Some(normalizer.context()))
                .build();

            let reply = match timeout(self.config.page_timeout(), self.llm.generate(&llm_request)).await {
                Err(_) => {
                    warn!(run_id = %run.id, page, "page timed out");
                    stats.pages_skipped += 1;
                    stats.push_error(format!(
                        "page {}: timed out after {}s",
                        page, self.config.page_timeout_secs
                    ));
                    continue;
                }
                Ok(Err(e)) if e.is_fatal() => {
                    warn!(run_id = %run.id, page, error = %e, "fatal provider error, stopping run");
                    // The window is attempted again on resume, so only the cause is kept
                    run.stats.push_error(format!("page {}: {}", page, e));
                    run.mark(RunStatus::Error);
                    lock_store(&self.store)?
                        .save_run(&run)
                        .map_err(store_error)?;
                    return Err(ExtractorError::from_fatal(&e));
                }
                Ok(Err(e)) => {
                    warn!(run_id = %run.id, page, error = %e, "page extraction failed");
                    stats.pages_skipped += 1;
                    stats.push_error(format!("page {}: {}", page, e));
                    continue;
                }
                Ok(Ok(reply)) => reply,
            };

            let parsed = match parse_llm_json(&reply, TARIFF_FIELDS) {
                Ok(parsed) => parsed,
                Err(failure) => {
                    warn!(run_id = %run.id, page, excerpt = %failure.excerpt, "unparseable page reply");
                    stats.pages_skipped += 1;
                    stats.push_error(format!(
                        "page {}: unparseable response, lost {:?}",
                        page, failure.lost_fields
                    ));
                    continue;
                }
            };
            if parsed.is_partial() {
                warn!(
                    run_id = %run.id,
                    page,
                    strategy = parsed.strategy.as_str(),
                    missing = ?parsed.missing_fields,
                    "page reply was truncated and repaired"
                );
            }

            let extraction = normalizer.normalize_page(page, &parsed.value);
            debug!(
                page,
                lines = extraction.lines.len(),
                hs_codes = extraction.hs_codes.len(),
                notes = extraction.notes.len(),
                rejected = extraction.errors.len(),
                "page normalised"
            );
            for error in extraction.errors {
                stats.push_error(error);
            }
            output.lines.extend(extraction.lines);
            output.hs_codes.extend(extraction.hs_codes);
            output.notes.extend(extraction.notes);
            output.summaries.extend(extraction.summary);
        }

        let swaps = normalizer.swaps().clone();
        if swaps.swap_count > 0 {
            info!(run_id = %run.id, swaps = swaps.swap_count, samples = ?swaps.samples, "rate/unit swaps corrected");
        }
        run.carry = Some(normalizer.into_context());

        let mut batch = BatchCommit::new(last, last + 1 - first, stats);
        if request.preview_only {
            batch.stats.tariff_lines_inserted = output.lines.len() as u32;
            batch.stats.hs_codes_inserted = output.hs_codes.len() as u32;
            batch.stats.notes_inserted = output.notes.len() as u32;
        } else {
            batch.tariff_lines = &output.lines;
            batch.hs_codes = &output.hs_codes;
            batch.notes = &output.notes;
        }
        let stats = lock_store(&self.store)?
            .commit_batch(&mut run, batch)
            .map_err(store_error)?;

        info!(
            run_id = %run.id,
            next_page = ?run.next_page(),
            status = %run.status,
            lines = stats.tariff_lines_inserted,
            hs_codes = stats.hs_codes_inserted,
            notes = stats.notes_inserted,
            pages_skipped = stats.pages_skipped,
            "batch complete"
        );

        let mut response = BatchResponse::for_run(&run, stats, false);
        if request.preview_only {
            response.tariff_lines = output.lines;
            response.hs_codes = output.hs_codes;
            response.notes = output.notes;
        }
        if !output.summaries.is_empty() {
            response.summary = Some(output.summaries.join("\n"));
        }
        Ok(response)
    }
}
