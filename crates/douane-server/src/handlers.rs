//! HTTP request handlers for the extraction service.
//!
//! Each batch endpoint performs exactly one round trip of the extraction
//! loop; the client drives the loop by calling again with the returned
//! `next_page` and `extraction_run_id`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router as AxumRouter,
};
use douane_domain::{
    BatchRequest, BatchResponse, ExtractionRun, LegalBatchRequest, LegalBatchResponse, RunId,
    RunStatus, RunStatusUpdate,
};
use douane_extractor::{load_run, set_run_status, BatchExtractor, ExtractorError, LegalIngestor};
use douane_llm::{AnyEmbedder, AnyProvider};
use douane_store::{FsDocumentStore, SqliteStore};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Tariff extractor as wired by the server
pub type Extractor = BatchExtractor<AnyProvider, FsDocumentStore, SqliteStore>;

/// Legal ingestor as wired by the server
pub type Ingestor = LegalIngestor<AnyProvider, AnyEmbedder, FsDocumentStore, SqliteStore>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Tariff batch loop
    pub extractor: Arc<Extractor>,
    /// Legal page loop
    pub ingestor: Arc<Ingestor>,
    /// Run store shared by both loops
    pub store: Arc<Mutex<SqliteStore>>,
    /// Model name reported by the health check
    pub model: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    /// Overall health status
    pub status: String,
    /// Generation model in use
    pub model: String,
    /// Server version
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    /// Extraction or run error
    Extractor(ExtractorError),
    /// Malformed path parameter
    BadRequest(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Extractor(e) => match e {
                ExtractorError::InvalidInput(_) | ExtractorError::Document(_) => {
                    StatusCode::BAD_REQUEST
                }
                ExtractorError::Pdf(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ExtractorError::RunNotFound(_) => StatusCode::NOT_FOUND,
                ExtractorError::RunCancelled(_) | ExtractorError::PageGap { .. } => {
                    StatusCode::CONFLICT
                }
                ExtractorError::Authentication(_) => StatusCode::BAD_GATEWAY,
                ExtractorError::Store(_) | ExtractorError::Config(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::Extractor(e) => e.to_string(),
            AppError::BadRequest(msg) => msg,
        };
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %message, "request failed");
        }

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

impl From<ExtractorError> for AppError {
    fn from(e: ExtractorError) -> Self {
        AppError::Extractor(e)
    }
}

fn parse_run_id(raw: &str) -> Result<RunId, AppError> {
    RunId::from_string(raw).map_err(AppError::BadRequest)
}

/// POST /analyze-pdf - Process one window of tariff pages
async fn analyze_pdf(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError> {
    let response = state.extractor.process_batch(request).await?;
    Ok(Json(response))
}

/// POST /ingest-legal - Ingest one page of a legal document
async fn ingest_legal(
    State(state): State<AppState>,
    Json(request): Json<LegalBatchRequest>,
) -> Result<Json<LegalBatchResponse>, AppError> {
    let response = state.ingestor.ingest_batch(request).await?;
    Ok(Json(response))
}

/// GET /runs/:id - Current state of a run
async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExtractionRun>, AppError> {
    let run = load_run(&state.store, parse_run_id(&id)?)?;
    Ok(Json(run))
}

/// POST /runs/:id/status - Pause or cancel a run
async fn update_run_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<RunStatusUpdate>,
) -> Result<Json<ExtractionRun>, AppError> {
    let run = set_run_status(&state.store, parse_run_id(&id)?, update.status)?;
    Ok(Json(run))
}

/// DELETE /runs/:id - Cancel a run for good
async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExtractionRun>, AppError> {
    let run = set_run_status(&state.store, parse_run_id(&id)?, RunStatus::Cancelled)?;
    info!(run_id = %run.id, "run cancelled");
    Ok(Json(run))
}

/// GET /health - Liveness and store check
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthCheckResponse>) {
    let (code, status) = match state.store.lock() {
        Ok(_) => (StatusCode::OK, "healthy"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    (
        code,
        Json(HealthCheckResponse {
            status: status.to_string(),
            model: state.model.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Create the axum router with all routes
pub fn create_router(state: AppState) -> AxumRouter {
    AxumRouter::new()
        .route("/analyze-pdf", post(analyze_pdf))
        .route("/ingest-legal", post(ingest_legal))
        .route("/runs/:id", get(get_run).delete(cancel_run))
        .route("/runs/:id/status", post(update_run_status))
        .route("/health", get(health_check))
        .with_state(state)
}
