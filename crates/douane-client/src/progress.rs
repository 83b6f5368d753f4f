//! Progress reporting for the client loops
//!
//! An observer sees `on_progress` after every batch and exactly one of
//! `on_complete` / `on_error` when the run reaches a terminal state.

use crate::error::ClientError;
use douane_domain::{BatchStats, RunId, RunStatus};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

/// Snapshot of a run as seen by the client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    /// Run being driven, once the server has assigned it
    pub run_id: Option<RunId>,
    /// Pages attempted so far, all sessions included
    pub processed_pages: u32,
    /// Page count (0 until the first response)
    pub total_pages: u32,
    /// Next page to request, `None` when done
    pub next_page: Option<u32>,
    /// Time spent in this session
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Projection from this session's pace
    #[serde(with = "option_duration_secs")]
    pub estimated_remaining: Option<Duration>,
    /// Cumulative server-side stats
    pub stats: BatchStats,
}

impl Progress {
    /// Starting snapshot
    pub fn start(run_id: Option<RunId>, next_page: u32) -> Self {
        Self {
            run_id,
            processed_pages: 0,
            total_pages: 0,
            next_page: Some(next_page),
            elapsed: Duration::ZERO,
            estimated_remaining: None,
            stats: BatchStats::new(),
        }
    }

    /// Completion ratio in percent
    pub fn percent(&self) -> f64 {
        if self.total_pages == 0 {
            0.0
        } else {
            f64::from(self.processed_pages) * 100.0 / f64::from(self.total_pages)
        }
    }

    /// Pages left to process
    pub fn remaining_pages(&self) -> u32 {
        self.total_pages.saturating_sub(self.processed_pages)
    }
}

/// `elapsed / pages_done * remaining_pages`, or `None` before the first page
///
/// # Examples
///
/// ```
/// use douane_client::progress::estimate_remaining;
/// use std::time::Duration;
///
/// let eta = estimate_remaining(Duration::from_secs(60), 4, 8);
/// assert_eq!(eta, Some(Duration::from_secs(120)));
/// assert_eq!(estimate_remaining(Duration::from_secs(60), 0, 8), None);
/// ```
pub fn estimate_remaining(
    elapsed: Duration,
    pages_done: u32,
    remaining_pages: u32,
) -> Option<Duration> {
    if pages_done == 0 {
        return None;
    }
    Some(elapsed.div_f64(f64::from(pages_done)).mul_f64(f64::from(remaining_pages)))
}

/// Receives progress of a client loop
pub trait ProgressObserver: Send + Sync {
    /// Called after every batch
    fn on_progress(&self, progress: &Progress);

    /// Called once when the run ends `done` or `paused`
    fn on_complete(&self, _progress: &Progress, _status: RunStatus) {}

    /// Called once when the run is abandoned
    fn on_error(&self, _progress: &Progress, _error: &ClientError) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _progress: &Progress) {}
}

/// Event forwarded by [`ChannelObserver`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A batch was applied
    Progress(Progress),
    /// The run ended `done` or `paused`
    Completed {
        /// Final snapshot
        progress: Progress,
        /// Terminal status
        status: RunStatus,
    },
    /// The run was abandoned
    Failed {
        /// Last snapshot
        progress: Progress,
        /// Error message
        message: String,
    },
}

/// Observer that forwards events over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is watching
        let _ = self.sender.send(event);
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, progress: &Progress) {
        self.send(ProgressEvent::Progress(progress.clone()));
    }

    fn on_complete(&self, progress: &Progress, status: RunStatus) {
        self.send(ProgressEvent::Completed {
            progress: progress.clone(),
            status,
        });
    }

    fn on_error(&self, progress: &Progress, error: &ClientError) {
        self.send(ProgressEvent::Failed {
            progress: progress.clone(),
            message: error.to_string(),
        });
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

mod option_duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_and_remaining() {
        let mut progress = Progress::start(None, 1);
        assert_eq!(progress.percent(), 0.0);
        progress.total_pages = 8;
        progress.processed_pages = 2;
        assert_eq!(progress.percent(), 25.0);
        assert_eq!(progress.remaining_pages(), 6);
    }

    #[test]
    fn test_progress_serializes_seconds() {
        let mut progress = Progress::start(None, 1);
        progress.elapsed = Duration::from_millis(1_500);
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["elapsed"], 1.5);
        assert!(json["estimated_remaining"].is_null());
    }

    #[tokio::test]
    async fn test_channel_observer_forwards_events() {
        let (observer, mut receiver) = ChannelObserver::new();
        let progress = Progress::start(None, 1);

        observer.on_progress(&progress);
        observer.on_complete(&progress, RunStatus::Done);
        drop(observer);

        assert!(matches!(receiver.recv().await, Some(ProgressEvent::Progress(_))));
        assert!(matches!(
            receiver.recv().await,
            Some(ProgressEvent::Completed {
                status: RunStatus::Done,
                ..
            })
        ));
        assert!(receiver.recv().await.is_none());
    }
}
