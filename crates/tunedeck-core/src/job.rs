//! Download job records and their lifecycle state.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorCode;
use crate::extractor::TrackMetadata;

/// Unique identifier for a download job.
pub type JobId = u64;

/// Lifecycle status of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a concurrency slot.
    Pending,
    /// Currently executing.
    Downloading,
    /// Finished successfully; the track is persisted.
    Completed,
    /// Finished with an error, a cancellation, or a stall timeout.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Downloading => write!(f, "Downloading"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl JobStatus {
    /// Sort key for queue listings: running first, then waiting, then done.
    #[must_use]
    pub(crate) const fn priority(self) -> u8 {
        match self {
            Self::Downloading => 1,
            Self::Pending => 2,
            Self::Completed => 3,
            Self::Failed => 4,
        }
    }
}

/// Caller-supplied options for a download request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Audio quality setting (e.g., "192", "320").
    pub quality: Option<String>,
    /// Output container/codec (e.g., "mp3", "m4a"). Defaults to mp3.
    pub format: Option<String>,
    /// Explicit output path, bypassing the naming collaborator.
    pub output_path: Option<PathBuf>,
    /// Forced album name, overriding whatever metadata resolution finds.
    pub album_override: Option<String>,
}

impl JobOptions {
    /// Set the audio quality.
    #[must_use]
    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Set an explicit output path.
    #[must_use]
    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Force the album name.
    #[must_use]
    pub fn with_album_override(mut self, album: impl Into<String>) -> Self {
        self.album_override = Some(album.into());
        self
    }
}

/// Stall bookkeeping for a downloading job.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StallState {
    /// Instant at which the job will be force-failed.
    pub deadline: Instant,
}

impl StallState {
    /// Whole seconds left until the deadline.
    pub(crate) fn seconds_remaining(&self, now: Instant) -> u64 {
        self.deadline.saturating_duration_since(now).as_secs()
    }
}

/// Outcome of applying one progress update to a job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ProgressApplied {
    /// Progress value after the monotonic merge.
    pub percent: f64,
    /// Whether the update cleared a flagged stall.
    pub stall_cleared: bool,
}

/// One request to fetch and transcode a single media item.
///
/// Owned exclusively by the orchestrator's job table. External views are
/// [`JobSnapshot`] clones.
#[derive(Debug)]
pub struct DownloadJob {
    /// Job id.
    pub id: JobId,
    /// Source URL.
    pub url: String,
    /// Caller options.
    pub options: JobOptions,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Progress percentage in [0, 100].
    pub progress: f64,
    /// Metadata, once resolved.
    pub metadata: Option<TrackMetadata>,
    /// Persisted track id, on success.
    pub track_id: Option<String>,
    /// Output file path, on success.
    pub output_path: Option<PathBuf>,
    /// Last error message.
    pub error: Option<String>,
    /// Machine-readable failure code.
    pub error_code: Option<ErrorCode>,
    /// Job this one retries, if any.
    pub previous_job: Option<JobId>,
    /// Album key linking the job to a playlist tracking entry.
    pub album_key: Option<String>,
    /// Cancellation token shared with the extraction adapter and watchdog.
    pub cancel: CancellationToken,
    /// Instant of the last progress event.
    pub last_progress: Instant,
    /// Stall state, when the watchdog has flagged one.
    pub(crate) stall: Option<StallState>,
    /// Instant the job reached a terminal state, for the cleanup sweep.
    pub(crate) finished: Option<Instant>,
    /// Submission timestamp (Unix millis).
    pub created_at: u64,
    /// Execution start timestamp (Unix millis).
    pub started_at: Option<u64>,
    /// Terminal-state timestamp (Unix millis).
    pub finished_at: Option<u64>,
}

/// Current wall clock as Unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl DownloadJob {
    /// Create a new pending job.
    #[must_use]
    pub fn new(id: JobId, url: impl Into<String>, options: JobOptions) -> Self {
        Self {
            id,
            url: url.into(),
            options,
            status: JobStatus::Pending,
            progress: 0.0,
            metadata: None,
            track_id: None,
            output_path: None,
            error: None,
            error_code: None,
            previous_job: None,
            album_key: None,
            cancel: CancellationToken::new(),
            last_progress: Instant::now(),
            stall: None,
            finished: None,
            created_at: now_millis(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Check if the job is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }

    /// Merge one progress update.
    ///
    /// Progress is monotonic: a lower reported value never rewinds the stored
    /// one. Every update refreshes the last-progress instant and clears any
    /// flagged stall, whatever the percentage says.
    pub(crate) fn apply_progress(&mut self, percent: f64) -> ProgressApplied {
        let percent = percent.clamp(0.0, 100.0);
        if percent > self.progress {
            self.progress = percent;
        }
        self.last_progress = Instant::now();
        let stall_cleared = self.stall.take().is_some();
        ProgressApplied {
            percent: self.progress,
            stall_cleared,
        }
    }

    /// Immutable snapshot for external consumers.
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        let now = Instant::now();
        JobSnapshot {
            id: self.id,
            url: self.url.clone(),
            status: self.status,
            progress: self.progress,
            title: self.metadata.as_ref().map(|m| m.title.clone()),
            artist: self
                .metadata
                .as_ref()
                .map(|m| m.resolved_artist().to_string()),
            album: self.effective_album(),
            external_id: self.metadata.as_ref().map(|m| m.external_id.clone()),
            track_id: self.track_id.clone(),
            stall_detected: self.stall.is_some(),
            stall_seconds_remaining: self.stall.map(|s| s.seconds_remaining(now)),
            error: self.error.clone(),
            error_code: self.error_code,
            previous_job: self.previous_job,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    /// Album name after applying the caller override and metadata fallbacks.
    #[must_use]
    pub fn effective_album(&self) -> Option<String> {
        self.options
            .album_override
            .clone()
            .or_else(|| self.metadata.as_ref().map(|m| m.resolved_album().to_string()))
    }
}

/// Point-in-time external view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Job id.
    pub id: JobId,
    /// Source URL.
    pub url: String,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Progress percentage in [0, 100].
    pub progress: f64,
    /// Resolved title, once known.
    pub title: Option<String>,
    /// Resolved artist, once known.
    pub artist: Option<String>,
    /// Effective album name, once known.
    pub album: Option<String>,
    /// External media id, once known.
    pub external_id: Option<String>,
    /// Persisted track id, on success.
    pub track_id: Option<String>,
    /// Whether a stall is currently flagged.
    pub stall_detected: bool,
    /// Seconds left until forced failure, while a stall is flagged.
    pub stall_seconds_remaining: Option<u64>,
    /// Last error message.
    pub error: Option<String>,
    /// Machine-readable failure code.
    pub error_code: Option<ErrorCode>,
    /// Job this one retries, if any.
    pub previous_job: Option<JobId>,
    /// Submission timestamp (Unix millis).
    pub created_at: u64,
    /// Execution start timestamp (Unix millis).
    pub started_at: Option<u64>,
    /// Terminal-state timestamp (Unix millis).
    pub finished_at: Option<u64>,
}

/// Point-in-time counts over the job table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueueStatus {
    /// Jobs waiting for a slot.
    pub pending: usize,
    /// Jobs currently executing.
    pub active: usize,
    /// All jobs currently retained, terminal ones included.
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_job_is_pending() {
        let job = DownloadJob::new(1, "https://example.com/v/abc", JobOptions::default());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
        assert!(!job.is_terminal());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let mut job = DownloadJob::new(1, "url", JobOptions::default());
        assert_eq!(job.apply_progress(40.0).percent, 40.0);
        assert_eq!(job.apply_progress(25.0).percent, 40.0);
        assert_eq!(job.apply_progress(90.0).percent, 90.0);
    }

    #[tokio::test]
    async fn test_progress_clamps_out_of_range() {
        let mut job = DownloadJob::new(1, "url", JobOptions::default());
        assert_eq!(job.apply_progress(250.0).percent, 100.0);
        let mut job = DownloadJob::new(2, "url", JobOptions::default());
        assert_eq!(job.apply_progress(-5.0).percent, 0.0);
    }

    #[tokio::test]
    async fn test_progress_clears_stall() {
        let mut job = DownloadJob::new(1, "url", JobOptions::default());
        job.stall = Some(StallState {
            deadline: Instant::now() + std::time::Duration::from_secs(60),
        });
        let applied = job.apply_progress(10.0);
        assert!(applied.stall_cleared);
        assert!(job.stall.is_none());
        // A second update has no stall left to clear.
        assert!(!job.apply_progress(11.0).stall_cleared);
    }

    #[tokio::test]
    async fn test_effective_album_prefers_override() {
        let mut job = DownloadJob::new(
            1,
            "url",
            JobOptions::default().with_album_override("Forced Album"),
        );
        job.metadata = Some(TrackMetadata {
            external_id: "x".to_string(),
            title: "t".to_string(),
            artist: None,
            uploader: None,
            album: Some("Resolved Album".to_string()),
            duration_secs: None,
        });
        assert_eq!(job.effective_album().as_deref(), Some("Forced Album"));
    }

    #[tokio::test]
    async fn test_snapshot_carries_stall_countdown() {
        let mut job = DownloadJob::new(1, "url", JobOptions::default());
        job.stall = Some(StallState {
            deadline: Instant::now() + std::time::Duration::from_secs(90),
        });
        let snap = job.snapshot();
        assert!(snap.stall_detected);
        let remaining = snap.stall_seconds_remaining.unwrap();
        assert!(remaining <= 90 && remaining >= 89);
    }
}
