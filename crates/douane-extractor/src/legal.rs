//! Server-side legal ingestion
//!
//! Regulatory text is dense, so a request covers exactly one page. The page
//! is transcribed by the model, split into chunks, embedded and stored. The
//! run record gives the same resumability as tariff extraction, and a
//! re-submitted document whose range was already ingested is answered with
//! `already_complete` without touching the model.

use crate::batch::{admit, fetch_document, require_first_page, RunAdmission};
use crate::cache::PageCountCache;
use crate::chunking::TextChunker;
use crate::config::ExtractorConfig;
use crate::error::ExtractorError;
use crate::json::parse_llm_json;
use crate::prompt::legal_page_prompt;
use crate::runs::{load_run, lock_store, store_error};
use douane_domain::traits::{
    BatchCommit, CollaboratorError, DocumentPart, DocumentStore, EmbeddingProvider, LlmProvider,
    LlmRequest, RunStore,
};
use douane_domain::{
    code_clean, BatchStats, ExtractionRun, LegalBatchRequest, LegalBatchResponse, LegalChunk,
    RunKind, RunStatus,
};
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Top-level keys of a legal page reply
pub const LEGAL_FIELDS: &[&str] = &["text", "hs_codes"];

static CITED_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{4}(?:[.\s]\d{2}){1,3}\b").expect("cited code pattern should compile")
});

/// HS codes cited on a page: those the model listed plus those found in the
/// text, as digits, without duplicates
pub fn detect_codes(listed: Option<&Value>, text: &str) -> Vec<String> {
    let from_model = listed
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Object(o) => o.get("code").and_then(Value::as_str).map(str::to_string),
            _ => None,
        });
    let from_text = CITED_CODE
        .find_iter(text)
        .map(|m| m.as_str().to_string());

    let mut codes: Vec<String> = Vec::new();
    for code in from_model.chain(from_text).map(|c| code_clean(&c)) {
        if matches!(code.len(), 4 | 6 | 8 | 10) && !codes.contains(&code) {
            codes.push(code);
        }
    }
    codes
}

enum PageOutcome {
    Chunks(Vec<LegalChunk>, u32),
    Skipped(String),
}

/// Page-at-a-time ingestion of legal documents
pub struct LegalIngestor<L, E, D, S>
where
    L: LlmProvider,
    E: EmbeddingProvider,
    D: DocumentStore,
    S: RunStore,
{
    llm: Arc<L>,
    embedder: Arc<E>,
    documents: Arc<D>,
    store: Arc<Mutex<S>>,
    page_cache: Arc<PageCountCache>,
    config: ExtractorConfig,
    chunker: TextChunker,
}

impl<L, E, D, S> LegalIngestor<L, E, D, S>
where
    L: LlmProvider,
    E: EmbeddingProvider,
    D: DocumentStore,
    S: RunStore,
{
    /// Create a new ingestor over shared collaborators
    pub fn new(
        llm: Arc<L>,
        embedder: Arc<E>,
        documents: Arc<D>,
        store: Arc<Mutex<S>>,
        page_cache: Arc<PageCountCache>,
        config: ExtractorConfig,
    ) -> Self {
        let chunker = TextChunker::new(config.chunk_strategy, config.max_chunk_size);
        Self {
            llm,
            embedder,
            documents,
            store,
            page_cache,
            config,
            chunker,
        }
    }

    /// Shared run store
    pub fn store(&self) -> &Arc<Mutex<S>> {
        &self.store
    }

    /// Ingest the next page of a legal document
    pub async fn ingest_batch(
        &self,
        request: LegalBatchRequest,
    ) -> Result<LegalBatchResponse, ExtractorError> {
        request.validate().map_err(ExtractorError::InvalidInput)?;

        let existing = match request.extraction_run_id {
            Some(id) => {
                let run = load_run(&self.store, id)?;
                match admit(run, &request.pdf_id, RunKind::Legal, request.start_page)? {
                    RunAdmission::Replay(run) => {
                        debug!(run_id = %run.id, start_page = request.start_page, "legal page already ingested");
                        let mut response = LegalBatchResponse::for_run(&run);
                        response.replayed = true;
                        response.already_complete = run.is_complete();
                        return Ok(response);
                    }
                    RunAdmission::Proceed(run) => Some(run),
                }
            }
            None => {
                let latest = lock_store(&self.store)?
                    .latest_run_for_document(&request.pdf_id, RunKind::Legal)
                    .map_err(store_error)?;
                if let Some(latest) = latest {
                    let end = request.end_page.or(latest.total_pages);
                    if end.is_some_and(|end| latest.covers(request.start_page, end)) {
                        info!(
                            run_id = %latest.id,
                            pdf_id = %latest.pdf_id,
                            "legal document already ingested"
                        );
                        let mut response = LegalBatchResponse::for_run(&latest);
                        response.already_complete = true;
                        return Ok(response);
                    }
                }
                require_first_page(request.start_page)?;
                None
            }
        };

        let (bytes, document_pages) = fetch_document(
            self.documents.as_ref(),
            &self.page_cache,
            &request.pdf_id,
            &request.file_path,
        )
        .await?;
        let last_page = request
            .end_page
            .map_or(document_pages, |end| end.min(document_pages));

        let mut run = match existing {
            Some(mut run) => {
                if run.total_pages.is_none() {
                    run.set_total_pages(last_page)
                        .map_err(ExtractorError::InvalidInput)?;
                }
                run
            }
            None => {
                let mut run = ExtractionRun::new(&request.pdf_id, RunKind::Legal);
                run.set_total_pages(last_page)
                    .map_err(ExtractorError::InvalidInput)?;
                lock_store(&self.store)?
                    .create_run(&run)
                    .map_err(store_error)?;
                info!(run_id = %run.id, pdf_id = %run.pdf_id, last_page, "legal ingestion run created");
                run
            }
        };

        let page = run.current_page;
        let mut stats = BatchStats::new();
        let mut chunks = Vec::new();

        match self.ingest_page(&run.pdf_id, page, document_pages, bytes).await {
            Ok(PageOutcome::Chunks(page_chunks, codes_detected)) => {
                chunks = page_chunks;
                stats.codes_detected = codes_detected;
            }
            Ok(PageOutcome::Skipped(reason)) => {
                warn!(run_id = %run.id, page, %reason, "legal page skipped");
                stats.pages_skipped += 1;
                stats.push_error(format!("page {}: {}", page, reason));
            }
            Err(e) => {
                warn!(run_id = %run.id, page, error = %e, "fatal provider error, stopping run");
                run.stats.push_error(format!("page {}: {}", page, e));
                run.mark(RunStatus::Error);
                lock_store(&self.store)?
                    .save_run(&run)
                    .map_err(store_error)?;
                return Err(e);
            }
        }

        let mut batch = BatchCommit::new(page, 1, stats);
        batch.legal_chunks = &chunks;
        let stats = lock_store(&self.store)?
            .commit_batch(&mut run, batch)
            .map_err(store_error)?;

        info!(
            run_id = %run.id,
            page,
            chunks = stats.chunks_inserted,
            codes = stats.codes_detected,
            status = %run.status,
            "legal page ingested"
        );

        let mut response = LegalBatchResponse::for_run(&run);
        response.chunks_inserted = stats.chunks_inserted;
        response.codes_detected = stats.codes_detected;
        Ok(response)
    }

    /// Transcribe, chunk and embed one page
    ///
    /// Returns `Err` only for fatal provider errors; everything else skips
    /// the page.
    async fn ingest_page(
        &self,
        pdf_id: &str,
        page: u32,
        document_pages: u32,
        bytes: Vec<u8>,
    ) -> Result<PageOutcome, ExtractorError> {
        let request = LlmRequest::text(
            legal_page_prompt(page, document_pages),
            self.config.legal_max_tokens,
        )
        .with_document(DocumentPart::pdf(bytes));

        let reply = match timeout(self.config.page_timeout(), self.llm.generate(&request)).await {
            Err(_) => {
                return Ok(PageOutcome::Skipped(format!(
                    "timed out after {}s",
                    self.config.page_timeout_secs
                )))
            }
            Ok(Err(e)) if e.is_fatal() => return Err(ExtractorError::from_fatal(&e)),
            Ok(Err(e)) => return Ok(PageOutcome::Skipped(e.to_string())),
            Ok(Ok(reply)) => reply,
        };

        let parsed = match parse_llm_json(&reply, LEGAL_FIELDS) {
            Ok(parsed) => parsed,
            Err(failure) => {
                debug!(excerpt = %failure.excerpt, "unparseable legal page reply");
                return Ok(PageOutcome::Skipped(format!(
                    "unparseable response, lost {:?}",
                    failure.lost_fields
                )));
            }
        };

        let text = parsed
            .value
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let codes = detect_codes(parsed.value.get("hs_codes"), text);

        let mut chunks = Vec::new();
        for (index, content) in self.chunker.chunk(text).into_iter().enumerate() {
            let embedding = match self.embedder.embed(&content).await {
                Ok(embedding) => embedding,
                Err(e) if e.is_fatal() => return Err(ExtractorError::from_fatal(&e)),
                Err(e) => return Ok(PageOutcome::Skipped(format!("embedding failed: {}", e))),
            };
            if embedding.len() != self.embedder.dimension() {
                return Ok(PageOutcome::Skipped(format!(
                    "embedding has {} dimensions, expected {}",
                    embedding.len(),
                    self.embedder.dimension()
                )));
            }
            chunks.push(LegalChunk {
                pdf_id: pdf_id.to_string(),
                page_number: page,
                chunk_index: index as u32,
                content,
                embedding,
                detected_codes: codes.clone(),
            });
        }

        Ok(PageOutcome::Chunks(chunks, codes.len() as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detect_codes_merges_model_and_text() {
        let listed = json!(["0101.21", {"code": "8471.30.00.10"}, 12, "bad"]);
        let codes = detect_codes(
            Some(&listed),
            "Les produits du 0101.21 et du 2204.21.10 sont exclus. Voir 8471 30.",
        );
        assert_eq!(codes, vec!["010121", "8471300010", "22042110", "847130"]);
    }

    #[test]
    fn test_detect_codes_ignores_plain_numbers() {
        assert!(detect_codes(None, "Article 12 du décret 2-19-123 de 2019").is_empty());
    }
}
