//! Client-side batch extraction loop
//!
//! Drives `/analyze-pdf` until the server reports the run done. A failed call
//! is never blindly retried: when the run id is known the server state is
//! read first, because the server may have applied the batch even though the
//! response was lost. Only when the server is still behind is the same page
//! retried, after a backoff that grows with the number of consecutive
//! failures.

use crate::accumulator::ExtractionAccumulator;
use crate::config::OrchestratorConfig;
use crate::error::{ClientError, TransportError};
use crate::progress::{estimate_remaining, Progress, ProgressObserver};
use crate::transport::ExtractionTransport;
use douane_domain::{BatchRequest, BatchStats, ExtractionRun, RunId, RunStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Cooperative cancellation flag shared with the caller
///
/// Setting it never aborts a call in flight; the loop notices it before the
/// next batch and pauses the run.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    flag: Arc<AtomicBool>,
}

impl CancellationHandle {
    /// Create an unset handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag before reusing the handle
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// One document to extract
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionJob {
    /// Document identity
    pub pdf_id: String,
    /// Path of the document in the server's document store
    pub file_path: String,
    /// Ask the server for rows instead of persisting them
    pub preview_only: bool,
    /// Run to resume
    pub existing_run_id: Option<RunId>,
}

impl ExtractionJob {
    /// New job; runs always begin at page 1
    pub fn new(pdf_id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            pdf_id: pdf_id.into(),
            file_path: file_path.into(),
            preview_only: false,
            existing_run_id: None,
        }
    }

    /// Request preview rows instead of persistence
    pub fn preview(mut self, preview_only: bool) -> Self {
        self.preview_only = preview_only;
        self
    }

    /// Resume an existing run
    pub fn resume(mut self, run_id: RunId) -> Self {
        self.existing_run_id = Some(run_id);
        self
    }

    /// Check required fields
    pub fn validate(&self) -> Result<(), String> {
        if self.pdf_id.trim().is_empty() {
            return Err("pdf_id is required".to_string());
        }
        if self.file_path.trim().is_empty() {
            return Err("file_path is required".to_string());
        }
        Ok(())
    }
}

/// Result of a run that ended `done` or `paused`
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// `Done` or `Paused`
    pub status: RunStatus,
    /// Final snapshot
    pub progress: Progress,
    /// Everything received
    pub accumulator: ExtractionAccumulator,
}

impl RunOutcome {
    /// Run id, unless the job was paused before the first batch
    pub fn run_id(&self) -> Option<RunId> {
        self.progress.run_id
    }
}

/// A run abandoned with an error, with what was received before it
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    /// Cause
    #[source]
    pub error: ClientError,
    /// Last snapshot
    pub progress: Progress,
    /// Partial results
    pub accumulator: ExtractionAccumulator,
}

/// Progress bookkeeping shared by the client loops
pub(crate) struct RunTracker {
    pub(crate) progress: Progress,
    started: Instant,
    pages_at_start: Option<u32>,
}

impl RunTracker {
    pub(crate) fn new(run_id: Option<RunId>, next_page: u32) -> Self {
        Self {
            progress: Progress::start(run_id, next_page),
            started: Instant::now(),
            pages_at_start: None,
        }
    }

    /// Record the server's view of the run after a batch or a state check
    pub(crate) fn update(
        &mut self,
        run_id: RunId,
        processed_pages: u32,
        total_pages: u32,
        next_page: Option<u32>,
        stats: &BatchStats,
    ) {
        let baseline = *self.pages_at_start.get_or_insert(processed_pages);
        let progress = &mut self.progress;
        progress.run_id = Some(run_id);
        progress.processed_pages = processed_pages;
        progress.total_pages = total_pages;
        progress.next_page = next_page;
        progress.stats = stats.clone();
        progress.elapsed = self.started.elapsed();
        progress.estimated_remaining = estimate_remaining(
            progress.elapsed,
            processed_pages.saturating_sub(baseline),
            progress.remaining_pages(),
        );
    }

    /// Record a run loaded from the server
    pub(crate) fn update_from_run(&mut self, run: &ExtractionRun) {
        self.update(
            run.id,
            run.processed_pages,
            run.total_pages.unwrap_or(0),
            run.next_page(),
            &run.stats,
        );
    }
}

/// What to do after a transient failure, given the server's view of the run
///
/// Returns the run when the server is already past `requested_page` (its
/// progress must be adopted), `None` when the page should be retried, and an
/// error when the server has given up on the run.
pub(crate) fn recovery_decision(
    server_run: Option<ExtractionRun>,
    requested_page: u32,
    failure: &TransportError,
) -> Result<Option<ExtractionRun>, ClientError> {
    let Some(run) = server_run else {
        return Ok(None);
    };
    match run.status {
        RunStatus::Cancelled => Err(ClientError::RunCancelled(run.id)),
        // Only trust an error status the server reported in this exchange;
        // a resumed run may still carry the status of an older session
        RunStatus::Error if failure.status().is_some() => Err(ClientError::RunFailed {
            run_id: run.id,
            message: failure.to_string(),
        }),
        RunStatus::Done => Ok(Some(run)),
        _ if run.current_page > requested_page => Ok(Some(run)),
        _ => Ok(None),
    }
}

/// Read the server's view of a run, or `None` if that fails too
pub(crate) async fn server_state<T: ExtractionTransport + ?Sized>(
    transport: &T,
    run_id: Option<RunId>,
) -> Option<ExtractionRun> {
    let run_id = run_id?;
    match transport.get_run(run_id).await {
        Ok(run) => Some(run),
        Err(e) => {
            debug!(run_id = %run_id, error = %e, "run state check failed");
            None
        }
    }
}

/// Load a run to resume, retrying transient failures
pub(crate) async fn load_run_with_retry<T: ExtractionTransport + ?Sized>(
    transport: &T,
    config: &OrchestratorConfig,
    run_id: RunId,
) -> Result<ExtractionRun, ClientError> {
    let mut failures = 0;
    loop {
        match transport.get_run(run_id).await {
            Ok(run) => return Ok(run),
            Err(e) if !e.is_transient() => return Err(e.into()),
            Err(e) => {
                failures += 1;
                if failures >= config.max_consecutive_failures {
                    return Err(ClientError::RetriesExhausted {
                        page: 0,
                        attempts: failures,
                        last_error: e.to_string(),
                    });
                }
                warn!(run_id = %run_id, error = %e, failures, "loading run failed, retrying");
                tokio::time::sleep(config.backoff_delay(failures)).await;
            }
        }
    }
}

/// Persist `paused` so the run can be resumed later
pub(crate) async fn pause_run<T: ExtractionTransport + ?Sized>(transport: &T, run_id: Option<RunId>) {
    let Some(run_id) = run_id else {
        info!("cancelled before the first batch, nothing to pause");
        return;
    };
    match transport.set_status(run_id, RunStatus::Paused).await {
        Ok(run) => info!(run_id = %run_id, status = %run.status, "run paused"),
        Err(e) => warn!(run_id = %run_id, error = %e, "could not persist paused status"),
    }
}

/// Client-side driver of the tariff batch loop
pub struct BatchOrchestrator<T: ExtractionTransport> {
    transport: Arc<T>,
    config: OrchestratorConfig,
    cancellation: CancellationHandle,
}

impl<T: ExtractionTransport> BatchOrchestrator<T> {
    /// Create an orchestrator over a transport
    pub fn new(transport: Arc<T>, config: OrchestratorConfig) -> Self {
        Self {
            transport,
            config,
            cancellation: CancellationHandle::new(),
        }
    }

    /// Handle that pauses the run before its next batch
    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    /// Get the current configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Drive one document to `done`, `paused` or a fatal error
    pub async fn run(
        &self,
        job: ExtractionJob,
        observer: &dyn ProgressObserver,
    ) -> Result<RunOutcome, RunFailure> {
        let mut tracker = RunTracker::new(job.existing_run_id, 1);
        let mut accumulator = ExtractionAccumulator::new();

        match self.drive(&job, &mut tracker, &mut accumulator, observer).await {
            Ok(status) => {
                info!(
                    run_id = ?tracker.progress.run_id,
                    status = %status,
                    processed_pages = tracker.progress.processed_pages,
                    total_pages = tracker.progress.total_pages,
                    "extraction finished"
                );
                observer.on_complete(&tracker.progress, status);
                Ok(RunOutcome {
                    status,
                    progress: tracker.progress,
                    accumulator,
                })
            }
            Err(error) => {
                warn!(run_id = ?tracker.progress.run_id, error = %error, "extraction abandoned");
                observer.on_error(&tracker.progress, &error);
                Err(RunFailure {
                    error,
                    progress: tracker.progress,
                    accumulator,
                })
            }
        }
    }

    async fn drive(
        &self,
        job: &ExtractionJob,
        tracker: &mut RunTracker,
        accumulator: &mut ExtractionAccumulator,
        observer: &dyn ProgressObserver,
    ) -> Result<RunStatus, ClientError> {
        self.config.validate().map_err(ClientError::InvalidJob)?;
        job.validate().map_err(ClientError::InvalidJob)?;

        let mut next_page = 1;
        if let Some(run_id) = job.existing_run_id {
            let run = load_run_with_retry(self.transport.as_ref(), &self.config, run_id).await?;
            if run.pdf_id != job.pdf_id {
                return Err(ClientError::InvalidJob(format!(
                    "run {} belongs to document {}",
                    run_id, run.pdf_id
                )));
            }
            if run.status == RunStatus::Cancelled {
                return Err(ClientError::RunCancelled(run_id));
            }
            tracker.update_from_run(&run);
            if run.status == RunStatus::Done || run.is_complete() {
                info!(run_id = %run_id, "run already done");
                return Ok(RunStatus::Done);
            }
            next_page = run.current_page;
            info!(run_id = %run_id, next_page, status = %run.status, "resuming run");
        }

        let mut failures = 0u32;
        loop {
            if self.cancellation.is_cancelled() {
                info!(next_page, "cancellation requested");
                pause_run(self.transport.as_ref(), tracker.progress.run_id).await;
                return Ok(RunStatus::Paused);
            }

            let request = BatchRequest {
                pdf_id: job.pdf_id.clone(),
                file_path: job.file_path.clone(),
                preview_only: job.preview_only,
                start_page: next_page,
                max_pages: Some(self.config.pages_per_batch),
                extraction_run_id: tracker.progress.run_id,
            };
            debug!(start_page = next_page, run_id = ?request.extraction_run_id, "requesting batch");

            match self.transport.analyze(&request).await {
                Ok(response) => {
                    failures = 0;
                    accumulator.merge(&response);
                    tracker.update(
                        response.extraction_run_id,
                        response.processed_pages,
                        response.total_pages,
                        response.next_page,
                        &response.stats,
                    );
                    observer.on_progress(&tracker.progress);
                    info!(
                        run_id = %response.extraction_run_id,
                        start_page = next_page,
                        processed_pages = response.processed_pages,
                        total_pages = response.total_pages,
                        lines = response.batch_stats.tariff_lines_inserted,
                        replayed = response.replayed,
                        "batch applied"
                    );

                    match response.next_page {
                        Some(page) if !response.done => next_page = page,
                        _ => return Ok(RunStatus::Done),
                    }
                    tokio::time::sleep(self.config.inter_batch_delay()).await;
                }
                Err(error) if !error.is_transient() => return Err(error.into()),
                Err(error) => {
                    warn!(page = next_page, error = %error, failures, "batch call failed");

                    let server_run =
                        server_state(self.transport.as_ref(), tracker.progress.run_id).await;
                    if let Some(run) = recovery_decision(server_run, next_page, &error)? {
                        info!(
                            run_id = %run.id,
                            requested_page = next_page,
                            server_page = run.current_page,
                            "server already applied the batch, adopting its progress"
                        );
                        accumulator.record_adopted(next_page, run.current_page.saturating_sub(1));
                        tracker.update_from_run(&run);
                        observer.on_progress(&tracker.progress);
                        failures = 0;
                        if run.status == RunStatus::Done || run.is_complete() {
                            return Ok(RunStatus::Done);
                        }
                        next_page = run.current_page;
                        continue;
                    }

                    failures += 1;
                    if failures >= self.config.max_consecutive_failures {
                        return Err(ClientError::RetriesExhausted {
                            page: next_page,
                            attempts: failures,
                            last_error: error.to_string(),
                        });
                    }
                    let wait = self.config.backoff_delay(failures);
                    info!(page = next_page, wait_ms = wait.as_millis() as u64, failures, "retrying batch");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
