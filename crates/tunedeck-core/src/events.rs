//! Lifecycle event fan-out.
//!
//! The engine publishes events through a broadcast hub so transport layers
//! (WebSocket, SSE, CLI) can subscribe without the core depending on any of
//! them. Sends are lossy: events published while no subscriber is connected
//! are dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ErrorCode;
use crate::job::JobId;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 128;

/// A failed job referenced by a playlist summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJobNote {
    /// The failed job's id.
    pub job_id: JobId,
    /// Last known error message for the job.
    pub error: String,
    /// Machine-readable failure code, when recorded.
    pub code: Option<ErrorCode>,
}

/// Lifecycle events emitted by the download orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// A job acquired a concurrency slot and started executing.
    Started {
        /// The job id.
        job_id: JobId,
        /// Source URL being fetched.
        url: String,
    },
    /// A job reported transfer progress.
    Progress {
        /// The job id.
        job_id: JobId,
        /// Progress percentage in [0, 100].
        percent: f64,
        /// Resolved track title, once known.
        title: Option<String>,
    },
    /// A job finished successfully and its track was persisted.
    Completed {
        /// The job id.
        job_id: JobId,
        /// Id of the persisted track.
        track_id: String,
        /// Path of the downloaded media file.
        output_path: std::path::PathBuf,
    },
    /// A job reached the failed state.
    Failed {
        /// The job id.
        job_id: JobId,
        /// Human-readable error message.
        message: String,
        /// Machine-readable failure code.
        code: ErrorCode,
    },
    /// A downloading job stopped reporting progress.
    StallDetected {
        /// The job id.
        job_id: JobId,
        /// Seconds left until the job is force-failed.
        seconds_remaining: u64,
    },
    /// A stalled job reported progress again.
    StallCleared {
        /// The job id.
        job_id: JobId,
    },
    /// A stalled job ran out its timeout window and was force-failed.
    StallTimeout {
        /// The job id.
        job_id: JobId,
    },
    /// A failed job was re-submitted as a new job.
    RetryStarted {
        /// The new job's id.
        job_id: JobId,
        /// The original job this retry clones.
        previous_job: JobId,
    },
    /// Every expected track of a tracked album finished successfully.
    AlbumCompleted {
        /// Canonical album name.
        album: String,
        /// Expected track count.
        total: usize,
        /// Ids of all successfully persisted tracks.
        track_ids: Vec<String>,
    },
    /// Summary for a tracked album, including jobs that ended in failure.
    PlaylistSummary {
        /// Canonical album name.
        album: String,
        /// Expected track count.
        total: usize,
        /// Ids of all successfully persisted tracks.
        track_ids: Vec<String>,
        /// Jobs tagged with this album that ended in the failed state.
        failed: Vec<FailedJobNote>,
    },
}

/// Broadcast hub distributing events to any number of subscribers.
#[derive(Debug)]
pub struct EventHub<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventHub<T> {
    /// Create a new hub buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event, ignoring the case where no subscriber is connected.
    pub fn broadcast_lossy(&self, event: T) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Number of currently connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T> Clone for EventHub<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for EventHub<T> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
