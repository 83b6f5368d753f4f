//! Client-side legal ingestion loop
//!
//! Same discipline as the tariff loop, one page per call.

use crate::config::OrchestratorConfig;
use crate::error::ClientError;
use crate::orchestrator::{
    load_run_with_retry, pause_run, recovery_decision, server_state, CancellationHandle,
    RunTracker,
};
use crate::progress::{Progress, ProgressObserver};
use crate::transport::ExtractionTransport;
use douane_domain::{LegalBatchRequest, RunId, RunKind, RunStatus};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One legal document (or its first pages) to ingest
#[derive(Debug, Clone, PartialEq)]
pub struct LegalJob {
    /// Document identity
    pub pdf_id: String,
    /// Path of the document in the server's document store
    pub file_path: String,
    /// Last page to ingest; the whole document when absent
    pub end_page: Option<u32>,
    /// Run to resume
    pub existing_run_id: Option<RunId>,
}

impl LegalJob {
    /// Whole-document job
    pub fn new(pdf_id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            pdf_id: pdf_id.into(),
            file_path: file_path.into(),
            end_page: None,
            existing_run_id: None,
        }
    }

    /// Stop after `end_page`; runs always begin at page 1
    pub fn up_to(mut self, end_page: Option<u32>) -> Self {
        self.end_page = end_page;
        self
    }

    /// Resume an existing run
    pub fn resume(mut self, run_id: RunId) -> Self {
        self.existing_run_id = Some(run_id);
        self
    }

    fn request(&self, page: u32, run_id: Option<RunId>) -> LegalBatchRequest {
        LegalBatchRequest {
            pdf_id: self.pdf_id.clone(),
            file_path: self.file_path.clone(),
            start_page: page,
            end_page: self.end_page,
            extraction_run_id: run_id,
        }
    }
}

/// Result of a legal ingestion that ended `done` or `paused`
#[derive(Debug, Clone)]
pub struct LegalOutcome {
    /// `Done` or `Paused`
    pub status: RunStatus,
    /// Final snapshot; chunk and code totals are in `progress.stats`
    pub progress: Progress,
    /// The server reported the range as already ingested
    pub already_complete: bool,
}

/// Client-side driver of legal ingestion
pub struct LegalIngestionRunner<T: ExtractionTransport> {
    transport: Arc<T>,
    config: OrchestratorConfig,
    cancellation: CancellationHandle,
}

impl<T: ExtractionTransport> LegalIngestionRunner<T> {
    /// Create a runner over a transport
    pub fn new(transport: Arc<T>, config: OrchestratorConfig) -> Self {
        Self {
            transport,
            config,
            cancellation: CancellationHandle::new(),
        }
    }

    /// Handle that pauses the run before its next page
    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    /// Ingest pages until the range is done, paused or abandoned
    pub async fn run(
        &self,
        job: LegalJob,
        observer: &dyn ProgressObserver,
    ) -> Result<LegalOutcome, ClientError> {
        let mut tracker = RunTracker::new(job.existing_run_id, 1);
        match self.drive(&job, &mut tracker, observer).await {
            Ok((status, already_complete)) => {
                info!(
                    pdf_id = %job.pdf_id,
                    status = %status,
                    chunks = tracker.progress.stats.chunks_inserted,
                    already_complete,
                    "legal ingestion finished"
                );
                observer.on_complete(&tracker.progress, status);
                Ok(LegalOutcome {
                    status,
                    progress: tracker.progress,
                    already_complete,
                })
            }
            Err(error) => {
                warn!(pdf_id = %job.pdf_id, error = %error, "legal ingestion abandoned");
                observer.on_error(&tracker.progress, &error);
                Err(error)
            }
        }
    }

    async fn drive(
        &self,
        job: &LegalJob,
        tracker: &mut RunTracker,
        observer: &dyn ProgressObserver,
    ) -> Result<(RunStatus, bool), ClientError> {
        self.config.validate().map_err(ClientError::InvalidJob)?;
        job.request(1, None)
            .validate()
            .map_err(ClientError::InvalidJob)?;

        let mut next_page = 1;
        if let Some(run_id) = job.existing_run_id {
            let run = load_run_with_retry(self.transport.as_ref(), &self.config, run_id).await?;
            if run.kind != RunKind::Legal || run.pdf_id != job.pdf_id {
                return Err(ClientError::InvalidJob(format!(
                    "run {} is not a legal run of document {}",
                    run_id, job.pdf_id
                )));
            }
            if run.status == RunStatus::Cancelled {
                return Err(ClientError::RunCancelled(run_id));
            }
            tracker.update_from_run(&run);
            if run.status == RunStatus::Done || run.is_complete() {
                return Ok((RunStatus::Done, false));
            }
            next_page = run.current_page;
            info!(run_id = %run_id, next_page, "resuming legal run");
        }

        let mut failures = 0u32;
        loop {
            if self.cancellation.is_cancelled() {
                pause_run(self.transport.as_ref(), tracker.progress.run_id).await;
                return Ok((RunStatus::Paused, false));
            }

            let request = job.request(next_page, tracker.progress.run_id);
            debug!(page = next_page, "requesting legal page");

            match self.transport.ingest_legal(&request).await {
                Ok(response) => {
                    failures = 0;
                    tracker.update(
                        response.extraction_run_id,
                        response.processed_pages,
                        response.total_pages,
                        response.next_page,
                        &response.stats,
                    );
                    if response.already_complete {
                        info!(run_id = %response.extraction_run_id, "range already ingested");
                        return Ok((RunStatus::Done, true));
                    }
                    observer.on_progress(&tracker.progress);
                    debug!(
                        page = next_page,
                        chunks = response.chunks_inserted,
                        codes = response.codes_detected,
                        "legal page applied"
                    );

                    match response.next_page {
                        Some(page) if !response.done => next_page = page,
                        _ => return Ok((RunStatus::Done, false)),
                    }
                    tokio::time::sleep(self.config.inter_batch_delay()).await;
                }
                Err(error) if !error.is_transient() => return Err(error.into()),
                Err(error) => {
                    warn!(page = next_page, error = %error, failures, "legal page call failed");

                    let server_run =
                        server_state(self.transport.as_ref(), tracker.progress.run_id).await;
                    if let Some(run) = recovery_decision(server_run, next_page, &error)? {
                        info!(
                            run_id = %run.id,
                            requested_page = next_page,
                            server_page = run.current_page,
                            "server already ingested the page, adopting its progress"
                        );
                        tracker.update_from_run(&run);
                        observer.on_progress(&tracker.progress);
                        failures = 0;
                        if run.status == RunStatus::Done || run.is_complete() {
                            return Ok((RunStatus::Done, false));
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
                    tokio::time::sleep(self.config.backoff_delay(failures)).await;
                }
            }
        }
    }
}
