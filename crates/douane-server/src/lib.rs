//! Douane Server
//!
//! HTTP front of the extraction loops. Every request performs one bounded
//! round trip (one tariff window or one legal page) so no request outlives
//! its timeout, however long the document.

#![warn(missing_docs)]

pub mod config;
pub mod handlers;

use config::ServerConfig;
use douane_extractor::{BatchExtractor, LegalIngestor, PageCountCache};
use douane_llm::{AnyEmbedder, AnyProvider, LlmError};
use douane_store::{FsDocumentStore, SqliteStore, StoreError};
use handlers::{create_router, AppState};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::info;

/// Server error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Provider could not be built
    #[error("Provider error: {0}")]
    Provider(#[from] LlmError),

    /// Database could not be opened
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Server binding error
    #[error("Failed to bind server: {0}")]
    Bind(#[from] std::io::Error),

    /// Server error
    #[error("Server error: {0}")]
    Server(String),
}

/// Build the shared state from configuration
///
/// Both loops share one run store and one page-count cache.
pub fn build_state(config: &ServerConfig) -> Result<AppState, ServerError> {
    let llm = Arc::new(AnyProvider::from_config(&config.llm)?);
    let embedder = Arc::new(AnyEmbedder::from_config(&config.embedding)?);
    let documents = Arc::new(FsDocumentStore::new(&config.storage_root));
    let store = Arc::new(Mutex::new(SqliteStore::new(&config.database_path)?));
    let page_cache = Arc::new(PageCountCache::new(
        config.extractor.page_cache_capacity,
        config.extractor.page_cache_ttl(),
    ));

    let extractor = BatchExtractor::new(
        llm.clone(),
        documents.clone(),
        store.clone(),
        page_cache.clone(),
        config.extractor.clone(),
    );
    let ingestor = LegalIngestor::new(
        llm,
        embedder,
        documents,
        store.clone(),
        page_cache,
        config.extractor.clone(),
    );

    Ok(AppState {
        extractor: Arc::new(extractor),
        ingestor: Arc::new(ingestor),
        store,
        model: config.llm.model.clone(),
    })
}

/// Start the HTTP server
///
/// Serves until Ctrl+C; in-flight batches finish before the process exits.
pub async fn start_server(config: ServerConfig) -> Result<(), ServerError> {
    config.validate()?;

    info!("Starting Douane server");
    info!("Bind address: {}", config.bind_addr());
    info!("Database: {}", config.database_path);
    info!("Document root: {}", config.storage_root);
    info!(
        "Batch size: {} pages (max {})",
        config.extractor.default_batch_pages, config.extractor.max_batch_pages
    );

    let state = build_state(&config)?;
    let app = create_router(state);

    let listener = TcpListener::bind(&config.bind_addr()).await?;
    info!("Server listening on {}", config.bind_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::Server(e.to_string()))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}
