//! Douane Client
//!
//! Drives a document through the server one bounded batch at a time. The
//! loops survive lost responses and server restarts: after a failed call the
//! server's run state is consulted before anything is retried, so a batch the
//! server already applied is adopted instead of being requested twice.
//!
//! # Example Usage
//!
//! ```no_run
//! use douane_client::{BatchOrchestrator, ExtractionJob, HttpTransport, NoopObserver, OrchestratorConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OrchestratorConfig::default();
//! let transport = HttpTransport::new(
//!     "http://localhost:8080",
//!     config.batch_timeout(),
//!     config.status_timeout(),
//! )?;
//! let orchestrator = BatchOrchestrator::new(Arc::new(transport), config);
//!
//! let outcome = orchestrator
//!     .run(ExtractionJob::new("tariff-2024", "tariff-2024.pdf"), &NoopObserver)
//!     .await?;
//! println!("{} lines", outcome.progress.stats.tariff_lines_inserted);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod accumulator;
pub mod config;
pub mod error;
pub mod legal;
pub mod orchestrator;
pub mod progress;
pub mod transport;

pub use accumulator::{AdoptedRange, ExtractionAccumulator};
pub use config::OrchestratorConfig;
pub use error::{ClientError, TransportError};
pub use legal::{LegalIngestionRunner, LegalJob, LegalOutcome};
pub use orchestrator::{BatchOrchestrator, CancellationHandle, ExtractionJob, RunFailure, RunOutcome};
pub use progress::{ChannelObserver, NoopObserver, Progress, ProgressEvent, ProgressObserver};
pub use transport::{ExtractionTransport, HttpTransport};
