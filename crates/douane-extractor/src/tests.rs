//! Integration tests for the extraction loops

use crate::{
    blank_pdf, set_run_status, BatchExtractor, ExtractorConfig, ExtractorError, LegalIngestor,
    PageCountCache,
};
use async_trait::async_trait;
use douane_domain::traits::{BatchCommit, DocumentStore, RunStore};
use douane_domain::{
    BatchRequest, BatchStats, ExtractionRun, LegalBatchRequest, RunId, RunKind, RunStatus,
};
use douane_llm::{LlmError, MockEmbedder, MockProvider};
use douane_store::SqliteStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Documents held in memory, keyed by path
#[derive(Default)]
struct MemoryDocuments {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryDocuments {
    fn with_pdf(path: &str, pages: u32) -> Self {
        let documents = Self::default();
        documents
            .files
            .lock()
            .unwrap()
            .insert(path.to_string(), blank_pdf(pages).unwrap());
        documents
    }
}

#[async_trait]
impl DocumentStore for MemoryDocuments {
    type Error = String;

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, Self::Error> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| format!("{} not found", path))
    }

    async fn put(&self, path: &str, data: &[u8]) -> Result<(), Self::Error> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }
}

type Extractor = BatchExtractor<MockProvider, MemoryDocuments, SqliteStore>;

fn page_reply(national_code: &str) -> String {
    format!(
        r#"{{
            "tariff_lines": [{{
                "national_code": "{code}",
                "description": "Live animals",
                "duty_rate": "2,5",
                "unit_norm": "u"
            }}],
            "hs_codes": [{{"code": "{heading}", "description": "Live animals"}}],
            "notes": [],
            "summary": "page with {code}"
        }}"#,
        code = national_code,
        heading = &national_code[..4],
    )
}

fn extractor(llm: MockProvider, pages: u32) -> (Extractor, Arc<MockProvider>) {
    let llm = Arc::new(llm);
    let extractor = BatchExtractor::new(
        llm.clone(),
        Arc::new(MemoryDocuments::with_pdf("tariff.pdf", pages)),
        Arc::new(Mutex::new(SqliteStore::new(":memory:").unwrap())),
        Arc::new(PageCountCache::default()),
        ExtractorConfig::default(),
    );
    (extractor, llm)
}

fn request(start_page: u32, max_pages: u32, run: Option<RunId>) -> BatchRequest {
    BatchRequest {
        pdf_id: "tariff".to_string(),
        file_path: "tariff.pdf".to_string(),
        preview_only: false,
        start_page,
        max_pages: Some(max_pages),
        extraction_run_id: run,
    }
}

fn three_page_provider() -> MockProvider {
    let mut llm = MockProvider::default();
    llm.add_response("page 1 of 3", page_reply("0101210010"));
    llm.add_response("page 2 of 3", page_reply("0102290000"));
    llm.add_response("page 3 of 3", page_reply("0103100000"));
    llm
}

#[tokio::test]
async fn test_windows_advance_run_to_done() {
    let (extractor, llm) = extractor(three_page_provider(), 3);

    let first = extractor.process_batch(request(1, 2, None)).await.unwrap();
    assert!(!first.done);
    assert!(!first.replayed);
    assert_eq!(first.next_page, Some(3));
    assert_eq!(first.processed_pages, 2);
    assert_eq!(first.total_pages, 3);
    assert_eq!(first.status, RunStatus::Processing);
    assert_eq!(first.batch_stats.tariff_lines_inserted, 2);
    assert_eq!(first.batch_stats.hs_codes_inserted, 2);
    assert_eq!(llm.call_count(), 2);

    let second = extractor
        .process_batch(request(3, 2, Some(first.extraction_run_id)))
        .await
        .unwrap();
    assert!(second.done);
    assert_eq!(second.next_page, None);
    assert_eq!(second.processed_pages, 3);
    assert_eq!(second.status, RunStatus::Done);
    assert_eq!(second.stats.tariff_lines_inserted, 3);
    assert_eq!(second.summary.as_deref(), Some("page with 0103100000"));

    let store = extractor.store().lock().unwrap();
    let lines = store.tariff_lines_for_document("tariff").unwrap();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[2].page_number, 3);
    assert_eq!(lines[0].duty_rate, Some(2.5));
}

#[tokio::test]
async fn test_repeated_window_replays_without_inserting() {
    let (extractor, llm) = extractor(three_page_provider(), 3);

    let first = extractor.process_batch(request(1, 2, None)).await.unwrap();
    let run_id = first.extraction_run_id;
    let calls = llm.call_count();

    let replay = extractor
        .process_batch(request(1, 2, Some(run_id)))
        .await
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.next_page, Some(3));
    assert_eq!(replay.stats, first.stats);
    assert_eq!(replay.batch_stats.tariff_lines_inserted, 0);
    assert_eq!(llm.call_count(), calls);

    let store = extractor.store().lock().unwrap();
    assert_eq!(store.tariff_lines_for_document("tariff").unwrap().len(), 2);
}

#[tokio::test]
async fn test_finished_run_replays() {
    let (extractor, llm) = extractor(three_page_provider(), 3);
    let done = extractor.process_batch(request(1, 5, None)).await.unwrap();
    assert!(done.done);
    let calls = llm.call_count();

    let again = extractor
        .process_batch(request(4, 5, Some(done.extraction_run_id)))
        .await
        .unwrap();
    assert!(again.done);
    assert!(again.replayed);
    assert_eq!(llm.call_count(), calls);
}

#[tokio::test]
async fn test_page_gap_is_rejected() {
    let (extractor, _) = extractor(three_page_provider(), 3);
    let first = extractor.process_batch(request(1, 1, None)).await.unwrap();

    let result = extractor
        .process_batch(request(3, 1, Some(first.extraction_run_id)))
        .await;
    assert_eq!(
        result.unwrap_err(),
        ExtractorError::PageGap {
            expected: 2,
            requested: 3
        }
    );
}

#[tokio::test]
async fn test_preview_returns_rows_without_persisting() {
    let (extractor, _) = extractor(three_page_provider(), 3);
    let mut preview = request(1, 2, None);
    preview.preview_only = true;

    let response = extractor.process_batch(preview).await.unwrap();
    assert_eq!(response.tariff_lines.len(), 2);
    assert_eq!(response.hs_codes.len(), 2);
    assert_eq!(response.batch_stats.tariff_lines_inserted, 2);
    assert_eq!(response.next_page, Some(3));

    let store = extractor.store().lock().unwrap();
    assert!(store.tariff_lines_for_document("tariff").unwrap().is_empty());
    assert!(store.hs_codes_for_document("tariff").unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_pages_are_skipped() {
    // Scripted replies are consumed in page order
    let llm = three_page_provider();
    llm.push_error(LlmError::RateLimitExceeded);
    llm.push_response("I cannot read this page");

    let (extractor, _) = extractor(llm, 3);
    let response = extractor.process_batch(request(1, 3, None)).await.unwrap();

    assert!(response.done);
    assert_eq!(response.batch_stats.pages_skipped, 2);
    assert_eq!(response.batch_stats.tariff_lines_inserted, 1);
    assert!(response.stats.errors.iter().any(|e| e.starts_with("page 1:")));
    assert!(response.stats.errors.iter().any(|e| e.starts_with("page 2:")));
}

#[tokio::test]
async fn test_authentication_failure_marks_run_error_and_resumes() {
    let llm = three_page_provider();
    llm.push_error(LlmError::Authentication("bad key".to_string()));
    let (extractor, _) = extractor(llm, 3);

    let result = extractor.process_batch(request(1, 2, None)).await;
    assert!(matches!(result, Err(ExtractorError::Authentication(_))));

    let run = extractor
        .store()
        .lock()
        .unwrap()
        .latest_run_for_document("tariff", RunKind::Tariff)
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(run.current_page, 1);

    let resumed = extractor
        .process_batch(request(1, 3, Some(run.id)))
        .await
        .unwrap();
    assert_eq!(resumed.extraction_run_id, run.id);
    assert!(resumed.done);
    assert_eq!(resumed.stats.tariff_lines_inserted, 3);
}

#[tokio::test]
async fn test_continuation_rows_inherit_across_batches() {
    let mut llm = MockProvider::default();
    llm.add_response(
        "page 1 of 2",
        r#"{"tariff_lines": [{"hs_code_6": "3502.11", "description": "Egg albumin, dried"}]}"#,
    );
    llm.add_response(
        "page 2 of 2",
        r#"{"tariff_lines": [{"col2": "00", "col3": "10", "duty_rate": "10", "unit_norm": "kg"}]}"#,
    );
    let (extractor, llm) = extractor(llm, 2);

    let first = extractor.process_batch(request(1, 1, None)).await.unwrap();
    assert_eq!(first.batch_stats.tariff_lines_inserted, 0);

    extractor
        .process_batch(request(2, 1, Some(first.extraction_run_id)))
        .await
        .unwrap();

    assert!(llm.prompts()[1].contains("HS position: 350211"));
    let store = extractor.store().lock().unwrap();
    let lines = store.tariff_lines_for_document("tariff").unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].national_code, "3502110010");
    assert_eq!(lines[0].description, "Egg albumin, dried");
    assert!(lines[0].is_inherited);
}

#[tokio::test]
async fn test_cancelled_run_rejects_batches() {
    let (extractor, _) = extractor(three_page_provider(), 3);
    let first = extractor.process_batch(request(1, 1, None)).await.unwrap();
    let run_id = first.extraction_run_id;

    let run = set_run_status(extractor.store(), run_id, RunStatus::Cancelled).unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);

    let result = extractor.process_batch(request(2, 1, Some(run_id))).await;
    assert!(matches!(result, Err(ExtractorError::RunCancelled(_))));
    assert!(matches!(
        set_run_status(extractor.store(), run_id, RunStatus::Paused),
        Err(ExtractorError::RunCancelled(_))
    ));
}

#[tokio::test]
async fn test_paused_run_resumes() {
    let (extractor, _) = extractor(three_page_provider(), 3);
    let first = extractor.process_batch(request(1, 1, None)).await.unwrap();
    let run_id = first.extraction_run_id;

    set_run_status(extractor.store(), run_id, RunStatus::Paused).unwrap();
    let resumed = extractor
        .process_batch(request(2, 1, Some(run_id)))
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Processing);
    assert_eq!(resumed.next_page, Some(3));
}

#[test]
fn test_set_run_status_rules() {
    let store = Mutex::new(SqliteStore::new(":memory:").unwrap());
    assert!(matches!(
        set_run_status(&store, RunId::new(), RunStatus::Paused),
        Err(ExtractorError::RunNotFound(_))
    ));

    let mut run = ExtractionRun::new("tariff", RunKind::Tariff);
    run.set_total_pages(1).unwrap();
    run.record_batch(1, 1, &Default::default()).unwrap();
    store.lock().unwrap().create_run(&run).unwrap();

    assert!(matches!(
        set_run_status(&store, run.id, RunStatus::Processing),
        Err(ExtractorError::InvalidInput(_))
    ));
    let unchanged = set_run_status(&store, run.id, RunStatus::Paused).unwrap();
    assert_eq!(unchanged.status, RunStatus::Done);
}

#[tokio::test]
async fn test_new_run_must_start_at_first_page() {
    let (extractor, llm) = extractor(three_page_provider(), 3);
    assert!(matches!(
        extractor.process_batch(request(3, 1, None)).await,
        Err(ExtractorError::InvalidInput(_))
    ));
    assert_eq!(llm.call_count(), 0);
    assert!(extractor
        .store()
        .lock()
        .unwrap()
        .latest_run_for_document("tariff", RunKind::Tariff)
        .unwrap()
        .is_none());

    // The last page alone never finishes a run
    let first = extractor.process_batch(request(1, 1, None)).await.unwrap();
    assert_eq!(first.status, RunStatus::Processing);
    assert_eq!(first.processed_pages, 1);
    assert_eq!(first.next_page, Some(2));
}

#[tokio::test]
async fn test_fatal_error_mid_window_keeps_only_its_cause() {
    let llm = three_page_provider();
    llm.push_error(LlmError::RateLimitExceeded);
    llm.push_error(LlmError::Authentication("bad key".to_string()));
    let (extractor, _) = extractor(llm, 3);

    let result = extractor.process_batch(request(1, 3, None)).await;
    assert!(matches!(result, Err(ExtractorError::Authentication(_))));

    let run = extractor
        .store()
        .lock()
        .unwrap()
        .latest_run_for_document("tariff", RunKind::Tariff)
        .unwrap()
        .unwrap();
    assert_eq!(run.stats.pages_skipped, 0);
    assert_eq!(run.stats.errors.len(), 1);
    assert!(run.stats.errors[0].starts_with("page 2:"));

    let resumed = extractor
        .process_batch(request(1, 3, Some(run.id)))
        .await
        .unwrap();
    assert!(resumed.done);
    assert_eq!(resumed.stats.pages_skipped, 0);
    assert_eq!(resumed.stats.tariff_lines_inserted, 3);
}

#[tokio::test]
async fn test_provider_configuration_error_is_not_authentication() {
    let llm = three_page_provider();
    llm.push_error(LlmError::Configuration("model is not set".to_string()));
    let (extractor, _) = extractor(llm, 3);

    let result = extractor.process_batch(request(1, 2, None)).await;
    assert!(matches!(result, Err(ExtractorError::Config(msg)) if msg.contains("model is not set")));
}

/// SQLite store whose batch commits can be made to fail
struct FailingCommits {
    inner: SqliteStore,
    fail: bool,
}

impl RunStore for FailingCommits {
    type Error = String;

    fn create_run(&mut self, run: &ExtractionRun) -> Result<(), Self::Error> {
        self.inner.create_run(run).map_err(|e| e.to_string())
    }

    fn get_run(&self, id: RunId) -> Result<Option<ExtractionRun>, Self::Error> {
        self.inner.get_run(id).map_err(|e| e.to_string())
    }

    fn save_run(&mut self, run: &ExtractionRun) -> Result<(), Self::Error> {
        self.inner.save_run(run).map_err(|e| e.to_string())
    }

    fn set_run_status(&mut self, id: RunId, status: RunStatus) -> Result<bool, Self::Error> {
        self.inner.set_run_status(id, status).map_err(|e| e.to_string())
    }

    fn latest_run_for_document(
        &self,
        pdf_id: &str,
        kind: RunKind,
    ) -> Result<Option<ExtractionRun>, Self::Error> {
        self.inner
            .latest_run_for_document(pdf_id, kind)
            .map_err(|e| e.to_string())
    }

    fn commit_batch(
        &mut self,
        run: &mut ExtractionRun,
        batch: BatchCommit<'_>,
    ) -> Result<BatchStats, Self::Error> {
        if self.fail {
            return Err("disk I/O error".to_string());
        }
        self.inner.commit_batch(run, batch).map_err(|e| e.to_string())
    }
}

#[tokio::test]
async fn test_failed_commit_leaves_run_in_place_for_retry() {
    let store = FailingCommits {
        inner: SqliteStore::new(":memory:").unwrap(),
        fail: true,
    };
    let extractor = BatchExtractor::new(
        Arc::new(three_page_provider()),
        Arc::new(MemoryDocuments::with_pdf("tariff.pdf", 3)),
        Arc::new(Mutex::new(store)),
        Arc::new(PageCountCache::default()),
        ExtractorConfig::default(),
    );

    let result = extractor.process_batch(request(1, 2, None)).await;
    assert!(matches!(result, Err(ExtractorError::Store(msg)) if msg.contains("disk I/O")));

    let run = {
        let mut store = extractor.store().lock().unwrap();
        store.fail = false;
        store
            .latest_run_for_document("tariff", RunKind::Tariff)
            .unwrap()
            .unwrap()
    };
    assert_eq!(run.current_page, 1);
    assert_eq!(run.processed_pages, 0);

    let retried = extractor
        .process_batch(request(1, 2, Some(run.id)))
        .await
        .unwrap();
    assert!(!retried.replayed);
    assert_eq!(retried.stats.tariff_lines_inserted, 2);

    let store = extractor.store().lock().unwrap();
    assert_eq!(store.inner.tariff_lines_for_document("tariff").unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_document() {
    let (extractor, _) = extractor(three_page_provider(), 3);
    let mut missing = request(1, 1, None);
    missing.file_path = "other.pdf".to_string();
    assert!(matches!(
        extractor.process_batch(missing).await,
        Err(ExtractorError::Document(_))
    ));
}

#[tokio::test]
async fn test_page_count_is_cached() {
    let cache = Arc::new(PageCountCache::default());
    let extractor = BatchExtractor::new(
        Arc::new(three_page_provider()),
        Arc::new(MemoryDocuments::with_pdf("tariff.pdf", 3)),
        Arc::new(Mutex::new(SqliteStore::new(":memory:").unwrap())),
        cache.clone(),
        ExtractorConfig::default(),
    );
    extractor.process_batch(request(1, 1, None)).await.unwrap();
    assert_eq!(cache.get("tariff", "tariff.pdf"), Some(3));
}

const LEGAL_REPLY: &str = r#"{
    "text": "Article 1\n\nLes chevaux reproducteurs du 0101.21 sont exonérés.",
    "hs_codes": ["0101.21"]
}"#;

type Ingestor = LegalIngestor<MockProvider, MockEmbedder, MemoryDocuments, SqliteStore>;

fn ingestor(embedder: MockEmbedder) -> (Ingestor, Arc<MockProvider>) {
    let llm = Arc::new(MockProvider::new(LEGAL_REPLY));
    let ingestor = LegalIngestor::new(
        llm.clone(),
        Arc::new(embedder),
        Arc::new(MemoryDocuments::with_pdf("law.pdf", 2)),
        Arc::new(Mutex::new(SqliteStore::new(":memory:").unwrap())),
        Arc::new(PageCountCache::default()),
        ExtractorConfig::default(),
    );
    (ingestor, llm)
}

fn legal_request(start_page: u32, run: Option<RunId>) -> LegalBatchRequest {
    LegalBatchRequest {
        pdf_id: "law".to_string(),
        file_path: "law.pdf".to_string(),
        start_page,
        end_page: None,
        extraction_run_id: run,
    }
}

#[tokio::test]
async fn test_legal_ingestion_page_by_page() {
    let (ingestor, llm) = ingestor(MockEmbedder::new(8));

    let first = ingestor.ingest_batch(legal_request(1, None)).await.unwrap();
    assert!(!first.done);
    assert_eq!(first.next_page, Some(2));
    assert_eq!(first.total_pages, 2);
    assert!(first.chunks_inserted > 0);
    assert_eq!(first.codes_detected, 1);

    let second = ingestor
        .ingest_batch(legal_request(2, Some(first.extraction_run_id)))
        .await
        .unwrap();
    assert!(second.done);
    assert_eq!(llm.call_count(), 2);

    let again = ingestor.ingest_batch(legal_request(1, None)).await.unwrap();
    assert!(again.already_complete);
    assert_eq!(again.extraction_run_id, first.extraction_run_id);
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn test_legal_resubmission_from_first_page_is_not_skipped() {
    let (ingestor, llm) = ingestor(MockEmbedder::new(8));

    let late_start = ingestor.ingest_batch(legal_request(2, None)).await;
    assert!(matches!(late_start, Err(ExtractorError::InvalidInput(_))));
    assert_eq!(llm.call_count(), 0);

    let first = ingestor.ingest_batch(legal_request(1, None)).await.unwrap();
    assert!(!first.already_complete);
    assert!(first.chunks_inserted > 0);
    assert_eq!(llm.call_count(), 1);
    assert!(llm.prompts()[0].contains("page 1 of 2"));

    let store = ingestor.store().lock().unwrap();
    let chunks = store.legal_chunks_for_document("law").unwrap();
    assert!(chunks.iter().all(|chunk| chunk.page_number == 1));
}

#[tokio::test]
async fn test_legal_range_limits_run() {
    let (ingestor, _) = ingestor(MockEmbedder::new(8));
    let mut request = legal_request(1, None);
    request.end_page = Some(1);

    let response = ingestor.ingest_batch(request).await.unwrap();
    assert!(response.done);
    assert_eq!(response.total_pages, 1);
}

#[tokio::test]
async fn test_legal_embedding_failure_skips_page() {
    let (ingestor, _) = ingestor(MockEmbedder::new(8).failing(LlmError::RateLimitExceeded));

    let response = ingestor.ingest_batch(legal_request(1, None)).await.unwrap();
    assert_eq!(response.chunks_inserted, 0);
    assert_eq!(response.stats.pages_skipped, 1);
    assert_eq!(response.next_page, Some(2));
}

#[tokio::test]
async fn test_legal_authentication_failure_stops_run() {
    let (ingestor, _) = ingestor(
        MockEmbedder::new(8).failing(LlmError::Authentication("bad key".to_string())),
    );

    let result = ingestor.ingest_batch(legal_request(1, None)).await;
    assert!(matches!(result, Err(ExtractorError::Authentication(_))));
}
