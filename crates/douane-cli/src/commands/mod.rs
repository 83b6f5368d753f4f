//! Command implementations.

pub mod duty;
pub mod extract;
pub mod legal;
pub mod profile;
pub mod run;

pub use self::duty::{execute_caf, execute_taxes};
pub use self::extract::execute_extract;
pub use self::legal::execute_ingest_legal;
pub use self::profile::execute_profile;
pub use self::run::execute_run;

use crate::error::{CliError, Result};
use douane_client::{CancellationHandle, HttpTransport, OrchestratorConfig};
use douane_domain::RunId;

/// Parse a run id argument
pub(crate) fn parse_run_id(raw: &str) -> Result<RunId> {
    RunId::from_string(raw).map_err(|e| CliError::InvalidInput(format!("'{}': {}", raw, e)))
}

/// HTTP transport to `server_url` with the configured timeouts
pub(crate) fn connect(server_url: &str, config: &OrchestratorConfig) -> Result<HttpTransport> {
    Ok(HttpTransport::new(
        server_url,
        config.batch_timeout(),
        config.status_timeout(),
    )?)
}

/// Turn the first Ctrl+C into a pause request
pub(crate) fn pause_on_ctrl_c(handle: CancellationHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Pausing after the current batch...");
            handle.cancel();
        }
    });
}
