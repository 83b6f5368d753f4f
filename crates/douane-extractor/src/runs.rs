//! Run lookups and client-requested status changes

use crate::error::ExtractorError;
use douane_domain::traits::RunStore;
use douane_domain::{ExtractionRun, RunId, RunStatus};
use std::sync::Mutex;
use tracing::info;

/// Lock the shared store, reporting a poisoned lock as a store error
pub(crate) fn lock_store<S>(store: &Mutex<S>) -> Result<std::sync::MutexGuard<'_, S>, ExtractorError> {
    store
        .lock()
        .map_err(|e| ExtractorError::Store(format!("store lock poisoned: {}", e)))
}

pub(crate) fn store_error(e: impl std::fmt::Display) -> ExtractorError {
    ExtractorError::Store(e.to_string())
}

/// Load a run or fail with [`ExtractorError::RunNotFound`]
pub fn load_run<S: RunStore>(store: &Mutex<S>, id: RunId) -> Result<ExtractionRun, ExtractorError> {
    lock_store(store)?
        .get_run(id)
        .map_err(store_error)?
        .ok_or_else(|| ExtractorError::RunNotFound(id.to_string()))
}

/// Apply a status change requested by a client
///
/// Only `paused` and `cancelled` may be requested. Pausing a finished run
/// leaves it finished; a cancelled run cannot be paused again.
pub fn set_run_status<S: RunStore>(
    store: &Mutex<S>,
    id: RunId,
    status: RunStatus,
) -> Result<ExtractionRun, ExtractorError> {
    if !status.is_client_settable() {
        return Err(ExtractorError::InvalidInput(format!(
            "status '{}' cannot be requested by a client",
            status
        )));
    }

    let mut guard = lock_store(store)?;
    let mut run = guard
        .get_run(id)
        .map_err(store_error)?
        .ok_or_else(|| ExtractorError::RunNotFound(id.to_string()))?;

    match (run.status, status) {
        (RunStatus::Cancelled, RunStatus::Paused) => {
            return Err(ExtractorError::RunCancelled(id.to_string()));
        }
        (RunStatus::Done, RunStatus::Paused) => return Ok(run),
        (current, requested) if current == requested => return Ok(run),
        _ => {}
    }

    run.mark(status);
    guard.save_run(&run).map_err(store_error)?;
    info!(run_id = %id, status = %status, "run status changed by client");
    Ok(run)
}
