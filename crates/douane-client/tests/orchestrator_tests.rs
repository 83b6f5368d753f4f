//! Client loops against a simulated server
//!
//! The simulated server keeps real `ExtractionRun` state and applies the same
//! admission rules as the HTTP server, so lost responses, gaps and replays
//! behave as they would in production.

use async_trait::async_trait;
use douane_client::{
    BatchOrchestrator, CancellationHandle, ChannelObserver, ClientError, ExtractionJob,
    ExtractionTransport, LegalIngestionRunner, LegalJob, NoopObserver, OrchestratorConfig,
    Progress, ProgressEvent, ProgressObserver, TransportError,
};
use douane_domain::{
    BatchRequest, BatchResponse, BatchStats, ExtractionRun, HsCodeEntry, LegalBatchRequest,
    LegalBatchResponse, RunId, RunKind, RunStatus,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// What happens to one batch call
#[derive(Debug, Clone)]
enum Fault {
    /// The call fails before reaching the run
    Before(TransportError),
    /// The batch is applied, then the response is lost
    AfterApply(TransportError),
    /// The server gives up on the run and answers with the error
    MarkError(TransportError),
}

#[derive(Default)]
struct SimState {
    total_pages: u32,
    runs: HashMap<RunId, ExtractionRun>,
    faults: VecDeque<Option<Fault>>,
    batch_starts: Vec<u32>,
    status_updates: Vec<RunStatus>,
}

struct SimulatedServer {
    state: Mutex<SimState>,
}

fn http(status: u16, body: &str) -> TransportError {
    TransportError::Http {
        status,
        body: body.to_string(),
    }
}

impl SimulatedServer {
    fn new(total_pages: u32) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SimState {
                total_pages,
                ..SimState::default()
            }),
        })
    }

    /// Faults for the next calls, in order; `None` lets a call through
    fn script(&self, faults: Vec<Option<Fault>>) {
        self.state.lock().unwrap().faults.extend(faults);
    }

    fn batch_starts(&self) -> Vec<u32> {
        self.state.lock().unwrap().batch_starts.clone()
    }

    fn status_updates(&self) -> Vec<RunStatus> {
        self.state.lock().unwrap().status_updates.clone()
    }

    fn run(&self, id: RunId) -> ExtractionRun {
        self.state.lock().unwrap().runs[&id].clone()
    }

    fn admit(state: &mut SimState, id: RunId) -> Result<&mut ExtractionRun, TransportError> {
        let run = state
            .runs
            .get_mut(&id)
            .ok_or_else(|| http(404, "Run not found"))?;
        match run.status {
            RunStatus::Cancelled => return Err(http(409, "Run cancelled")),
            RunStatus::Paused | RunStatus::Error => run.mark(RunStatus::Processing),
            _ => {}
        }
        Ok(run)
    }

    /// Returns the fault to apply after the batch, if any
    fn before_call(state: &mut SimState, run_id: Option<RunId>) -> Result<Option<Fault>, TransportError> {
        match state.faults.pop_front().flatten() {
            Some(Fault::Before(error)) => Err(error),
            Some(Fault::MarkError(error)) => {
                if let Some(run) = run_id.and_then(|id| state.runs.get_mut(&id)) {
                    run.mark(RunStatus::Error);
                }
                Err(error)
            }
            other => Ok(other),
        }
    }

    fn apply_batch(state: &mut SimState, request: &BatchRequest) -> Result<BatchResponse, TransportError> {
        let total = state.total_pages;
        let run_id = match request.extraction_run_id {
            Some(id) => id,
            None => {
                if request.start_page != 1 {
                    return Err(http(400, "a new run starts at page 1"));
                }
                let mut run = ExtractionRun::new(&request.pdf_id, RunKind::Tariff);
                run.set_total_pages(total).map_err(|e| http(400, &e))?;
                let id = run.id;
                state.runs.insert(id, run);
                id
            }
        };

        let run = Self::admit(state, run_id)?;
        if run.status == RunStatus::Done || request.start_page < run.current_page {
            return Ok(BatchResponse::for_run(run, BatchStats::new(), true));
        }
        if request.start_page > run.current_page {
            return Err(http(409, "Page gap"));
        }

        let start = request.start_page;
        let last = (start + request.max_pages.unwrap_or(4) - 1).min(total);
        let pages = last - start + 1;
        let mut stats = BatchStats::new();
        stats.tariff_lines_inserted = pages;
        stats.hs_codes_inserted = pages;
        run.record_batch(last, pages, &stats).map_err(|e| http(409, &e))?;

        let mut response = BatchResponse::for_run(run, stats, false);
        response.hs_codes = std::iter::once(HsCodeEntry::from_printed("84", "Chapter 84", start))
            .chain((start..=last).map(|p| HsCodeEntry::from_printed(&format!("84.{:02}", p), "Heading", p)))
            .flatten()
            .collect();
        Ok(response)
    }

    fn apply_legal(
        state: &mut SimState,
        request: &LegalBatchRequest,
    ) -> Result<LegalBatchResponse, TransportError> {
        let end = request.end_page.unwrap_or(state.total_pages).min(state.total_pages);
        let run_id = match request.extraction_run_id {
            Some(id) => id,
            None => {
                let latest = state
                    .runs
                    .values()
                    .filter(|r| r.kind == RunKind::Legal && r.pdf_id == request.pdf_id)
                    .max_by_key(|r| r.id);
                if let Some(latest) = latest {
                    if latest.covers(request.start_page, end) {
                        let mut response = LegalBatchResponse::for_run(latest);
                        response.already_complete = true;
                        return Ok(response);
                    }
                }
                if request.start_page != 1 {
                    return Err(http(400, "a new run starts at page 1"));
                }
                let mut run = ExtractionRun::new(&request.pdf_id, RunKind::Legal);
                run.set_total_pages(end).map_err(|e| http(400, &e))?;
                let id = run.id;
                state.runs.insert(id, run);
                id
            }
        };

        let run = Self::admit(state, run_id)?;
        if run.status == RunStatus::Done || request.start_page < run.current_page {
            let mut response = LegalBatchResponse::for_run(run);
            response.replayed = true;
            return Ok(response);
        }
        if request.start_page > run.current_page {
            return Err(http(409, "Page gap"));
        }

        let mut stats = BatchStats::new();
        stats.chunks_inserted = 2;
        stats.codes_detected = 1;
        run.record_batch(request.start_page, 1, &stats)
            .map_err(|e| http(409, &e))?;

        let mut response = LegalBatchResponse::for_run(run);
        response.chunks_inserted = 2;
        response.codes_detected = 1;
        Ok(response)
    }
}

#[async_trait]
impl ExtractionTransport for SimulatedServer {
    async fn analyze(&self, request: &BatchRequest) -> Result<BatchResponse, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.batch_starts.push(request.start_page);
        let fault = Self::before_call(&mut state, request.extraction_run_id)?;
        let response = Self::apply_batch(&mut state, request)?;
        match fault {
            Some(Fault::AfterApply(error)) => Err(error),
            _ => Ok(response),
        }
    }

    async fn ingest_legal(
        &self,
        request: &LegalBatchRequest,
    ) -> Result<LegalBatchResponse, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.batch_starts.push(request.start_page);
        let fault = Self::before_call(&mut state, request.extraction_run_id)?;
        let response = Self::apply_legal(&mut state, request)?;
        match fault {
            Some(Fault::AfterApply(error)) => Err(error),
            _ => Ok(response),
        }
    }

    async fn get_run(&self, id: RunId) -> Result<ExtractionRun, TransportError> {
        let state = self.state.lock().unwrap();
        state
            .runs
            .get(&id)
            .cloned()
            .ok_or_else(|| http(404, "Run not found"))
    }

    async fn set_status(
        &self,
        id: RunId,
        status: RunStatus,
    ) -> Result<ExtractionRun, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.status_updates.push(status);
        let run = state
            .runs
            .get_mut(&id)
            .ok_or_else(|| http(404, "Run not found"))?;
        match (run.status, status) {
            (RunStatus::Done, RunStatus::Paused) => {}
            (RunStatus::Cancelled, RunStatus::Paused) => return Err(http(409, "Run cancelled")),
            _ => run.mark(status),
        }
        Ok(run.clone())
    }

    async fn cancel_run(&self, id: RunId) -> Result<ExtractionRun, TransportError> {
        self.set_status(id, RunStatus::Cancelled).await
    }
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        pages_per_batch: 4,
        inter_batch_delay_ms: 0,
        max_consecutive_failures: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 2,
        ..OrchestratorConfig::default()
    }
}

fn job() -> ExtractionJob {
    ExtractionJob::new("tariff-2024", "tariff-2024.pdf")
}

/// Requests a pause as soon as the first batch is reported
struct PauseAfterFirstBatch {
    handle: CancellationHandle,
}

impl ProgressObserver for PauseAfterFirstBatch {
    fn on_progress(&self, _progress: &Progress) {
        self.handle.cancel();
    }
}

#[tokio::test]
async fn test_document_runs_to_done() {
    let server = SimulatedServer::new(10);
    let orchestrator = BatchOrchestrator::new(server.clone(), fast_config());

    let outcome = orchestrator.run(job(), &NoopObserver).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(server.batch_starts(), vec![1, 5, 9]);
    assert_eq!(outcome.progress.processed_pages, 10);
    assert_eq!(outcome.progress.total_pages, 10);
    assert_eq!(outcome.progress.next_page, None);
    assert_eq!(outcome.progress.stats.tariff_lines_inserted, 10);
    assert_eq!(outcome.accumulator.batch_count(), 3);

    let run = server.run(outcome.run_id().unwrap());
    assert_eq!(run.status, RunStatus::Done);
    assert_eq!(run.processed_pages, 10);
}

#[tokio::test]
async fn test_hs_codes_deduplicated_across_batches() {
    let server = SimulatedServer::new(10);
    let orchestrator = BatchOrchestrator::new(server.clone(), fast_config());

    let outcome = orchestrator.run(job(), &NoopObserver).await.unwrap();

    // "84" arrives with every batch; headings 84.01..84.10 once each
    let codes = outcome.accumulator.hs_codes();
    assert_eq!(codes.len(), 11);
    assert_eq!(codes.iter().filter(|c| c.code_clean == "84").count(), 1);
    assert_eq!(codes[0].page_number, 1);
}

#[tokio::test]
async fn test_lost_response_is_adopted_not_retried() {
    let server = SimulatedServer::new(10);
    server.script(vec![None, Some(Fault::AfterApply(TransportError::Timeout(300)))]);
    let orchestrator = BatchOrchestrator::new(server.clone(), fast_config());

    let outcome = orchestrator.run(job(), &NoopObserver).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Done);
    // Pages 5..8 were applied once and never requested again
    assert_eq!(server.batch_starts(), vec![1, 5, 9]);
    assert_eq!(outcome.progress.stats.tariff_lines_inserted, 10);
    assert_eq!(outcome.accumulator.batch_count(), 2);
    let adopted = outcome.accumulator.adopted_ranges();
    assert_eq!(adopted.len(), 1);
    assert_eq!((adopted[0].first_page, adopted[0].last_page), (5, 8));

    let run = server.run(outcome.run_id().unwrap());
    assert_eq!(run.stats.tariff_lines_inserted, 10);
}

#[tokio::test]
async fn test_lost_final_response_completes_run() {
    let server = SimulatedServer::new(8);
    server.script(vec![None, Some(Fault::AfterApply(http(502, "Bad gateway")))]);
    let orchestrator = BatchOrchestrator::new(server.clone(), fast_config());

    let outcome = orchestrator.run(job(), &NoopObserver).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(server.batch_starts(), vec![1, 5]);
    assert_eq!(outcome.progress.processed_pages, 8);
}

#[tokio::test]
async fn test_failure_before_apply_retries_same_page() {
    let server = SimulatedServer::new(10);
    server.script(vec![
        None,
        Some(Fault::Before(http(503, "Service unavailable"))),
        Some(Fault::Before(TransportError::Network("connection reset".into()))),
    ]);
    let orchestrator = BatchOrchestrator::new(server.clone(), fast_config());

    let outcome = orchestrator.run(job(), &NoopObserver).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(server.batch_starts(), vec![1, 5, 5, 5, 9]);
    assert_eq!(outcome.progress.stats.tariff_lines_inserted, 10);
    assert!(outcome.accumulator.adopted_ranges().is_empty());
}

#[tokio::test]
async fn test_retries_exhausted_after_consecutive_failures() {
    let server = SimulatedServer::new(10);
    server.script(vec![
        None,
        Some(Fault::Before(TransportError::Timeout(300))),
        Some(Fault::Before(TransportError::Timeout(300))),
        Some(Fault::Before(TransportError::Timeout(300))),
    ]);
    let orchestrator = BatchOrchestrator::new(server.clone(), fast_config());

    let failure = orchestrator.run(job(), &NoopObserver).await.unwrap_err();

    match failure.error {
        ClientError::RetriesExhausted { page, attempts, .. } => {
            assert_eq!(page, 5);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(server.batch_starts(), vec![1, 5, 5, 5]);
    // Rows of the first batch are kept
    assert_eq!(failure.accumulator.batch_count(), 1);
    assert_eq!(failure.progress.processed_pages, 4);
}

#[tokio::test]
async fn test_first_batch_failures_retry_without_run_id() {
    let server = SimulatedServer::new(4);
    server.script(vec![Some(Fault::Before(TransportError::Timeout(300)))]);
    let orchestrator = BatchOrchestrator::new(server.clone(), fast_config());

    let outcome = orchestrator.run(job(), &NoopObserver).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(server.batch_starts(), vec![1, 1]);
}

#[tokio::test]
async fn test_client_error_is_fatal() {
    let server = SimulatedServer::new(10);
    server.script(vec![Some(Fault::Before(http(400, "filePath is required")))]);
    let orchestrator = BatchOrchestrator::new(server.clone(), fast_config());

    let failure = orchestrator.run(job(), &NoopObserver).await.unwrap_err();

    assert!(matches!(
        failure.error,
        ClientError::Transport(TransportError::Http { status: 400, .. })
    ));
    assert_eq!(server.batch_starts(), vec![1]);
}

#[tokio::test]
async fn test_server_error_status_stops_run() {
    let server = SimulatedServer::new(10);
    server.script(vec![
        None,
        Some(Fault::MarkError(http(502, "Provider authentication failed"))),
    ]);
    let orchestrator = BatchOrchestrator::new(server.clone(), fast_config());
    let (observer, mut events) = ChannelObserver::new();

    let failure = orchestrator.run(job(), &observer).await.unwrap_err();

    assert!(matches!(failure.error, ClientError::RunFailed { .. }));
    assert_eq!(server.batch_starts(), vec![1, 5]);
    assert!(matches!(events.recv().await, Some(ProgressEvent::Progress(_))));
    assert!(matches!(events.recv().await, Some(ProgressEvent::Failed { .. })));
}

#[tokio::test]
async fn test_cancellation_pauses_run() {
    let server = SimulatedServer::new(10);
    let orchestrator = BatchOrchestrator::new(server.clone(), fast_config());
    let observer = PauseAfterFirstBatch {
        handle: orchestrator.cancellation_handle(),
    };

    let outcome = orchestrator.run(job(), &observer).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Paused);
    assert_eq!(server.batch_starts(), vec![1]);
    assert_eq!(server.status_updates(), vec![RunStatus::Paused]);
    let run = server.run(outcome.run_id().unwrap());
    assert_eq!(run.status, RunStatus::Paused);
    assert_eq!(run.current_page, 5);
}

#[tokio::test]
async fn test_cancellation_before_first_batch() {
    let server = SimulatedServer::new(10);
    let orchestrator = BatchOrchestrator::new(server.clone(), fast_config());
    orchestrator.cancellation_handle().cancel();

    let outcome = orchestrator.run(job(), &NoopObserver).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Paused);
    assert!(outcome.run_id().is_none());
    assert!(server.batch_starts().is_empty());
    assert!(server.status_updates().is_empty());
}

#[tokio::test]
async fn test_paused_run_resumes_where_it_stopped() {
    let server = SimulatedServer::new(10);
    let first = BatchOrchestrator::new(server.clone(), fast_config());
    let observer = PauseAfterFirstBatch {
        handle: first.cancellation_handle(),
    };
    let paused = first.run(job(), &observer).await.unwrap();
    let run_id = paused.run_id().unwrap();

    let second = BatchOrchestrator::new(server.clone(), fast_config());
    let outcome = second.run(job().resume(run_id), &NoopObserver).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(outcome.run_id(), Some(run_id));
    assert_eq!(server.batch_starts(), vec![1, 5, 9]);
    assert_eq!(server.run(run_id).stats.tariff_lines_inserted, 10);
    // Only this session's batches were received
    assert_eq!(outcome.accumulator.batch_count(), 2);
}

#[tokio::test]
async fn test_resuming_done_run_is_immediate() {
    let server = SimulatedServer::new(4);
    let orchestrator = BatchOrchestrator::new(server.clone(), fast_config());
    let run_id = orchestrator
        .run(job(), &NoopObserver)
        .await
        .unwrap()
        .run_id()
        .unwrap();

    let outcome = orchestrator.run(job().resume(run_id), &NoopObserver).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(outcome.progress.processed_pages, 4);
    assert_eq!(server.batch_starts(), vec![1]);
}

#[tokio::test]
async fn test_cancelled_run_is_not_resumed() {
    let server = SimulatedServer::new(10);
    let first = BatchOrchestrator::new(server.clone(), fast_config());
    let observer = PauseAfterFirstBatch {
        handle: first.cancellation_handle(),
    };
    let run_id = first.run(job(), &observer).await.unwrap().run_id().unwrap();
    server.cancel_run(run_id).await.unwrap();

    let second = BatchOrchestrator::new(server.clone(), fast_config());
    let failure = second.run(job().resume(run_id), &NoopObserver).await.unwrap_err();

    assert!(matches!(failure.error, ClientError::RunCancelled(id) if id == run_id));
    assert_eq!(server.batch_starts(), vec![1]);
}

#[tokio::test]
async fn test_resume_rejects_run_of_other_document() {
    let server = SimulatedServer::new(4);
    let orchestrator = BatchOrchestrator::new(server.clone(), fast_config());
    let run_id = orchestrator
        .run(job(), &NoopObserver)
        .await
        .unwrap()
        .run_id()
        .unwrap();

    let other = ExtractionJob::new("other", "other.pdf").resume(run_id);
    let failure = orchestrator.run(other, &NoopObserver).await.unwrap_err();

    assert!(matches!(failure.error, ClientError::InvalidJob(_)));
}

#[tokio::test]
async fn test_observer_sees_progress_then_completion() {
    let server = SimulatedServer::new(10);
    let orchestrator = BatchOrchestrator::new(server.clone(), fast_config());
    let (observer, mut events) = ChannelObserver::new();

    orchestrator.run(job(), &observer).await.unwrap();
    drop(observer);

    let mut processed = Vec::new();
    let mut completed = None;
    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::Progress(progress) => {
                assert!(completed.is_none(), "progress after completion");
                processed.push(progress.processed_pages);
            }
            ProgressEvent::Completed { status, .. } => completed = Some(status),
            ProgressEvent::Failed { message, .. } => panic!("unexpected failure: {}", message),
        }
    }
    assert_eq!(processed, vec![4, 8, 10]);
    assert_eq!(completed, Some(RunStatus::Done));
}

#[tokio::test]
async fn test_legal_ingestion_page_by_page() {
    let server = SimulatedServer::new(3);
    let runner = LegalIngestionRunner::new(server.clone(), fast_config());

    let outcome = runner
        .run(LegalJob::new("code-douanes", "code.pdf"), &NoopObserver)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Done);
    assert!(!outcome.already_complete);
    assert_eq!(server.batch_starts(), vec![1, 2, 3]);
    assert_eq!(outcome.progress.stats.chunks_inserted, 6);
    assert_eq!(outcome.progress.stats.codes_detected, 3);
}

#[tokio::test]
async fn test_legal_range_already_ingested() {
    let server = SimulatedServer::new(5);
    let runner = LegalIngestionRunner::new(server.clone(), fast_config());
    runner
        .run(LegalJob::new("code-douanes", "code.pdf"), &NoopObserver)
        .await
        .unwrap();

    let again = runner
        .run(
            LegalJob::new("code-douanes", "code.pdf").up_to(Some(4)),
            &NoopObserver,
        )
        .await
        .unwrap();

    assert!(again.already_complete);
    assert_eq!(again.status, RunStatus::Done);
    assert_eq!(server.batch_starts(), vec![1, 2, 3, 4, 5, 1]);
}

#[tokio::test]
async fn test_legal_partial_ingestion_is_not_complete() {
    let server = SimulatedServer::new(4);
    let runner = LegalIngestionRunner::new(server.clone(), fast_config());
    runner
        .run(
            LegalJob::new("code-douanes", "code.pdf").up_to(Some(2)),
            &NoopObserver,
        )
        .await
        .unwrap();

    let whole = runner
        .run(LegalJob::new("code-douanes", "code.pdf"), &NoopObserver)
        .await
        .unwrap();

    assert!(!whole.already_complete);
    assert_eq!(whole.status, RunStatus::Done);
    assert_eq!(whole.progress.total_pages, 4);
    assert_eq!(server.batch_starts(), vec![1, 2, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_legal_lost_response_is_adopted() {
    let server = SimulatedServer::new(3);
    server.script(vec![None, Some(Fault::AfterApply(TransportError::Timeout(300)))]);
    let runner = LegalIngestionRunner::new(server.clone(), fast_config());

    let outcome = runner
        .run(LegalJob::new("code-douanes", "code.pdf"), &NoopObserver)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(server.batch_starts(), vec![1, 2, 3]);
    assert_eq!(outcome.progress.stats.chunks_inserted, 6);
}

#[tokio::test]
async fn test_legal_range_limits_pages() {
    let server = SimulatedServer::new(10);
    let runner = LegalIngestionRunner::new(server.clone(), fast_config());

    let outcome = runner
        .run(
            LegalJob::new("code-douanes", "code.pdf").up_to(Some(3)),
            &NoopObserver,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Done);
    assert_eq!(server.batch_starts(), vec![1, 2, 3]);
    assert_eq!(outcome.progress.total_pages, 3);
}
