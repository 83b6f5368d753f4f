//! Transport to the extraction server

use crate::error::TransportError;
use async_trait::async_trait;
use douane_domain::{
    BatchRequest, BatchResponse, ExtractionRun, LegalBatchRequest, LegalBatchResponse, RunId,
    RunStatus, RunStatusUpdate,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Calls the client loops make against the server
#[async_trait]
pub trait ExtractionTransport: Send + Sync {
    /// `POST /analyze-pdf`
    async fn analyze(&self, request: &BatchRequest) -> Result<BatchResponse, TransportError>;

    /// `POST /ingest-legal`
    async fn ingest_legal(
        &self,
        request: &LegalBatchRequest,
    ) -> Result<LegalBatchResponse, TransportError>;

    /// `GET /runs/:id`
    async fn get_run(&self, id: RunId) -> Result<ExtractionRun, TransportError>;

    /// `POST /runs/:id/status`
    async fn set_status(&self, id: RunId, status: RunStatus)
        -> Result<ExtractionRun, TransportError>;

    /// `DELETE /runs/:id`
    async fn cancel_run(&self, id: RunId) -> Result<ExtractionRun, TransportError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP transport over reqwest
///
/// Every call is bounded by a client-side timeout independent of the
/// server's own provider timeouts.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    batch_timeout: Duration,
    status_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for the server at `base_url`
    pub fn new(
        base_url: impl Into<String>,
        batch_timeout: Duration,
        status_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            batch_timeout,
            status_timeout,
        })
    }

    /// Server base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T, F>(&self, limit: Duration, request: F) -> Result<T, TransportError>
    where
        T: DeserializeOwned,
        F: Future<Output = Result<reqwest::Response, reqwest::Error>> + Send,
    {
        let response = tokio::time::timeout(limit, request)
            .await
            .map_err(|_| TransportError::Timeout(limit.as_secs()))??;

        let status = response.status();
        let body = tokio::time::timeout(limit, response.text())
            .await
            .map_err(|_| TransportError::Timeout(limit.as_secs()))??;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| body.chars().take(500).collect());
            debug!(status = status.as_u16(), %message, "server returned an error");
            return Err(TransportError::Http {
                status: status.as_u16(),
                body: message,
            });
        }

        serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ExtractionTransport for HttpTransport {
    async fn analyze(&self, request: &BatchRequest) -> Result<BatchResponse, TransportError> {
        let call = self.client.post(self.url("/analyze-pdf")).json(request).send();
        self.send(self.batch_timeout, call).await
    }

    async fn ingest_legal(
        &self,
        request: &LegalBatchRequest,
    ) -> Result<LegalBatchResponse, TransportError> {
        let call = self.client.post(self.url("/ingest-legal")).json(request).send();
        self.send(self.batch_timeout, call).await
    }

    async fn get_run(&self, id: RunId) -> Result<ExtractionRun, TransportError> {
        let call = self.client.get(self.url(&format!("/runs/{}", id))).send();
        self.send(self.status_timeout, call).await
    }

    async fn set_status(
        &self,
        id: RunId,
        status: RunStatus,
    ) -> Result<ExtractionRun, TransportError> {
        let call = self
            .client
            .post(self.url(&format!("/runs/{}/status", id)))
            .json(&RunStatusUpdate { status })
            .send();
        self.send(self.status_timeout, call).await
    }

    async fn cancel_run(&self, id: RunId) -> Result<ExtractionRun, TransportError> {
        let call = self.client.delete(self.url(&format!("/runs/{}", id))).send();
        self.send(self.status_timeout, call).await
    }
}
