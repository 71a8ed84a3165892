//! Download orchestration engine.
//!
//! The orchestrator owns the in-memory job table, enforces the global
//! concurrency ceiling, drives jobs through the extraction adapter, and
//! publishes lifecycle events. Completed results are persisted through the
//! [`Library`] collaborator and aggregated per album by the
//! [`PlaylistTracker`].
//!
//! Concurrency model: the job table is the single shared mutable structure,
//! guarded by a mutex that is never held across an await point. Admission into
//! the active state goes through one counter checked under that lock, so no
//! more than the configured ceiling of jobs ever executes simultaneously, and
//! a freed slot is always offered to the oldest pending job first.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::events::{DownloadEvent, EventHub, FailedJobNote};
use crate::extractor::{Extractor, ProgressFn};
use crate::job::{now_millis, DownloadJob, JobId, JobOptions, JobSnapshot, JobStatus, QueueStatus};
use crate::library::Library;
use crate::naming::OutputNamer;
use crate::tracker::PlaylistTracker;
use crate::watchdog;

/// Default output container when the caller requests none.
const DEFAULT_FORMAT: &str = "mp3";

/// Internal job table, exclusively owned by the orchestrator.
pub(crate) struct JobTable {
    /// All retained jobs by id.
    pub(crate) jobs: HashMap<JobId, DownloadJob>,
    /// Counter for generating job ids.
    next_id: JobId,
    /// Number of jobs currently holding a concurrency slot.
    pub(crate) active: usize,
    /// Running watchdog tasks by job id.
    watchdogs: HashMap<JobId, JoinHandle<()>>,
}

impl JobTable {
    fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            next_id: 1,
            active: 0,
            watchdogs: HashMap::new(),
        }
    }

    const fn next_job_id(&mut self) -> JobId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Oldest pending job, FIFO by submission order.
    fn next_pending(&self) -> Option<JobId> {
        self.jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .map(|job| job.id)
            .min()
    }

    /// Mark a job as holding a slot and executing.
    fn claim(&mut self, job_id: JobId) {
        self.active += 1;
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.status = JobStatus::Downloading;
            job.started_at = Some(now_millis());
            job.last_progress = Instant::now();
        }
    }
}

/// A job failure about to be recorded.
struct JobFailure {
    message: String,
    code: ErrorCode,
}

/// Accepts download requests and runs them with bounded concurrency.
///
/// Cheap to clone; all clones share the same job table, tracker, and event
/// hub. Background tasks (cleanup sweep, per-job watchdogs) stop when
/// [`DownloadOrchestrator::shutdown`] is called.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    state: Arc<Mutex<JobTable>>,
    tracker: Arc<Mutex<PlaylistTracker>>,
    config: OrchestratorConfig,
    events: EventHub<DownloadEvent>,
    extractor: Arc<dyn Extractor>,
    library: Arc<dyn Library>,
    namer: Arc<dyn OutputNamer>,
    base_dir: PathBuf,
    shutdown: CancellationToken,
}

impl DownloadOrchestrator {
    /// Create a new orchestrator and start its cleanup sweep.
    #[must_use]
    pub fn new(
        mut config: OrchestratorConfig,
        extractor: Arc<dyn Extractor>,
        library: Arc<dyn Library>,
        namer: Arc<dyn OutputNamer>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        config.validate();
        let state = Arc::new(Mutex::new(JobTable::new()));
        let shutdown = CancellationToken::new();
        spawn_sweep(Arc::clone(&state), config.clone(), shutdown.clone());

        info!(
            "Download orchestrator started (ceiling {})",
            config.max_concurrent_downloads
        );
        Self {
            state,
            tracker: Arc::new(Mutex::new(PlaylistTracker::new())),
            config,
            events: EventHub::default(),
            extractor,
            library,
            namer,
            base_dir: base_dir.into(),
            shutdown,
        }
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// Stop the cleanup sweep and all running watchdogs.
    ///
    /// In-flight transfers are not aborted; use [`Self::cancel`] per job.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Submit a URL for download.
    ///
    /// When a concurrency slot is free the job runs to its terminal state as
    /// part of this call; otherwise it is enqueued pending and picked up as
    /// soon as a slot frees, FIFO by submission order.
    pub async fn submit(&self, url: impl Into<String>, options: JobOptions) -> JobId {
        let url = url.into();
        let (job_id, start_now) = {
            let mut table = self.lock_state();
            let id = table.next_job_id();
            let mut job = DownloadJob::new(id, url.clone(), options);
            job.album_key = job.options.album_override.clone();
            table.jobs.insert(id, job);
            let start_now = table.active < self.config.max_concurrent_downloads;
            if start_now {
                table.claim(id);
            }
            (id, start_now)
        };

        if start_now {
            info!("Submitted job {job_id} for {url}, starting immediately");
            self.run_job(job_id).await;
        } else {
            info!("Submitted job {job_id} for {url}, queued (ceiling reached)");
        }
        job_id
    }

    /// Point-in-time snapshot of one job.
    #[must_use]
    pub fn get_progress(&self, job_id: JobId) -> Option<JobSnapshot> {
        let table = self.lock_state();
        table.jobs.get(&job_id).map(DownloadJob::snapshot)
    }

    /// Snapshots of all retained jobs, running first, then pending, then done,
    /// each group ordered by submission time.
    #[must_use]
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        let table = self.lock_state();
        let mut list: Vec<JobSnapshot> = table.jobs.values().map(DownloadJob::snapshot).collect();
        list.sort_by_key(|snap| (snap.status.priority(), snap.created_at, snap.id));
        list
    }

    /// Point-in-time counts over the job table.
    #[must_use]
    pub fn queue_status(&self) -> QueueStatus {
        let table = self.lock_state();
        QueueStatus {
            pending: table
                .jobs
                .values()
                .filter(|job| job.status == JobStatus::Pending)
                .count(),
            active: table.active,
            total: table.jobs.len(),
        }
    }

    /// Cancel a job.
    ///
    /// Signals the cancellation token shared with the extraction adapter and
    /// marks the job failed with the `CANCELLED` code. Returns false if the
    /// job is unknown or already finished.
    pub async fn cancel(&self, job_id: JobId) -> bool {
        let cancelled = {
            let mut table = self.lock_state();
            let Some(job) = table.jobs.get_mut(&job_id) else {
                warn!("Cannot cancel job {job_id} - not found");
                return false;
            };
            if job.is_terminal() {
                warn!("Cannot cancel job {job_id} - already finished");
                return false;
            }
            job.cancel.cancel();
            (job.url.clone(), job.metadata.as_ref().map(|m| m.title.clone()))
        };

        let (url, title) = cancelled;
        self.fail_job(
            job_id,
            JobFailure {
                message: "Cancelled by caller".to_string(),
                code: ErrorCode::Cancelled,
            },
            &url,
            title.as_deref(),
        )
        .await;
        info!("Cancelled job {job_id}");
        true
    }

    /// Re-submit a failed (or any known) job as a new, distinct job.
    ///
    /// The new job clones the original URL and options, carrying the resolved
    /// album name forward as an override so playlist grouping survives the
    /// retry, and links back to the original via its previous-job reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the original job is unknown.
    pub async fn retry(&self, job_id: JobId) -> Result<JobId> {
        let (new_id, start_now) = {
            let mut table = self.lock_state();
            let Some(original) = table.jobs.get(&job_id) else {
                return Err(Error::JobNotFound(job_id));
            };

            let url = original.url.clone();
            let mut options = original.options.clone();
            if options.album_override.is_none() {
                options.album_override =
                    original.metadata.as_ref().and_then(|m| m.album.clone());
            }
            let album_key = original
                .album_key
                .clone()
                .or_else(|| original.effective_album());

            let id = table.next_job_id();
            let mut job = DownloadJob::new(id, url, options);
            job.previous_job = Some(job_id);
            job.album_key = album_key;
            table.jobs.insert(id, job);

            let start_now = table.active < self.config.max_concurrent_downloads;
            if start_now {
                table.claim(id);
            }
            (id, start_now)
        };

        info!("Retrying job {job_id} as new job {new_id}");
        self.events.broadcast_lossy(DownloadEvent::RetryStarted {
            job_id: new_id,
            previous_job: job_id,
        });
        if start_now {
            self.run_job(new_id).await;
        }
        Ok(new_id)
    }

    /// Begin aggregating completions for an album expecting `expected` tracks.
    ///
    /// Jobs whose effective album name matches `key` feed the entry as they
    /// complete; once all expected tracks are persisted an `album_completed`
    /// event fires, followed by a `playlist_summary`.
    pub fn start_album_tracking(
        &self,
        key: impl Into<String>,
        display_name: impl Into<String>,
        expected: usize,
    ) {
        self.lock_tracker()
            .start_tracking(key, display_name, expected);
    }

    fn lock_state(&self) -> MutexGuard<'_, JobTable> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tracker(&self) -> MutexGuard<'_, PlaylistTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute one claimed job to its terminal state, then release the slot
    /// and offer it to the oldest pending job.
    async fn run_job(&self, job_id: JobId) {
        let claimed = {
            let table = self.lock_state();
            table.jobs.get(&job_id).and_then(|job| {
                // Cancelled between claim and start.
                (job.status == JobStatus::Downloading).then(|| {
                    (job.url.clone(), job.options.clone(), job.cancel.clone())
                })
            })
        };

        if let Some((url, options, cancel)) = claimed {
            self.events.broadcast_lossy(DownloadEvent::Started {
                job_id,
                url: url.clone(),
            });
            let handle = watchdog::spawn(
                job_id,
                Arc::clone(&self.state),
                self.events.clone(),
                self.config.clone(),
                self.shutdown.clone(),
            );
            self.lock_state().watchdogs.insert(job_id, handle);

            if let Err(failure) = self.execute(job_id, &url, &options, cancel).await {
                self.fail_job(job_id, failure, &url, None).await;
            }
        }

        {
            let mut table = self.lock_state();
            if let Some(handle) = table.watchdogs.remove(&job_id) {
                handle.abort();
            }
            table.active = table.active.saturating_sub(1);
        }
        self.start_next_pending();
    }

    /// Resolve, transfer, and persist one job.
    async fn execute(
        &self,
        job_id: JobId,
        url: &str,
        options: &JobOptions,
        cancel: CancellationToken,
    ) -> std::result::Result<(), JobFailure> {
        // Metadata resolution. A failure here aborts the job with no partial
        // state: nothing has been written yet.
        let metadata = tokio::select! {
            () = cancel.cancelled() => return Err(self.cancellation_failure(job_id)),
            res = self.extractor.resolve_metadata(url) => res.map_err(|e| JobFailure {
                message: e.to_string(),
                code: ErrorCode::MetadataFailed,
            })?,
        };

        let artist = metadata.resolved_artist().to_string();
        let album = options
            .album_override
            .clone()
            .unwrap_or_else(|| metadata.resolved_album().to_string());
        let title = metadata.title.clone();
        {
            let mut table = self.lock_state();
            if let Some(job) = table.jobs.get_mut(&job_id) {
                job.metadata = Some(metadata);
            }
        }

        let destination = match &options.output_path {
            Some(path) => path.clone(),
            None => self
                .namer
                .build_output_path(&self.base_dir, &artist, &album, &title)
                .with_extension(options.format.as_deref().unwrap_or(DEFAULT_FORMAT)),
        };
        debug!("Job {job_id} downloading to {}", destination.display());

        let on_progress = self.progress_relay(job_id);
        let outcome = tokio::select! {
            () = cancel.cancelled() => return Err(self.cancellation_failure(job_id)),
            res = self.extractor.transfer(url, &destination, options, on_progress, cancel.clone()) => {
                res.map_err(|e| JobFailure {
                    message: e.to_string(),
                    code: ErrorCode::TransferFailed,
                })?
            }
        };

        // The adapter may refine metadata during the transfer; the caller's
        // album override still wins.
        let mut final_meta = outcome.metadata;
        if options.album_override.is_some() {
            final_meta.album = options.album_override.clone();
        }
        {
            let mut table = self.lock_state();
            if let Some(job) = table.jobs.get_mut(&job_id) {
                // Final forced jump to 100 on a successful transfer.
                job.progress = 100.0;
                job.metadata = Some(final_meta.clone());
                job.output_path = Some(outcome.output_path.clone());
            }
        }

        let track_id = self
            .library
            .create_or_update_track(&final_meta, &outcome.output_path)
            .await
            .map_err(|e| JobFailure {
                message: format!("Persisting track failed: {e}"),
                code: ErrorCode::PersistenceFailed,
            })?;

        self.complete_job(job_id, track_id, outcome.output_path);
        Ok(())
    }

    /// Callback relaying adapter progress into the job table and event hub.
    fn progress_relay(&self, job_id: JobId) -> ProgressFn {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        Arc::new(move |percent: f64| {
            let applied = {
                let mut table = state.lock().unwrap_or_else(PoisonError::into_inner);
                let Some(job) = table.jobs.get_mut(&job_id) else {
                    return;
                };
                if job.status != JobStatus::Downloading {
                    return;
                }
                let applied = job.apply_progress(percent);
                let title = job.metadata.as_ref().map(|m| m.title.clone());
                (applied, title)
            };
            let (applied, title) = applied;
            events.broadcast_lossy(DownloadEvent::Progress {
                job_id,
                percent: applied.percent,
                title,
            });
            if applied.stall_cleared {
                info!("Job {job_id} resumed reporting progress, stall cleared");
                events.broadcast_lossy(DownloadEvent::StallCleared { job_id });
            }
        })
    }

    /// Failure recorded when the cancellation token fired: either the watchdog
    /// timed the job out or the caller cancelled it.
    fn cancellation_failure(&self, job_id: JobId) -> JobFailure {
        let stalled = {
            let table = self.lock_state();
            table
                .jobs
                .get(&job_id)
                .is_some_and(|job| job.error_code == Some(ErrorCode::StallTimeout))
        };
        if stalled {
            JobFailure {
                message: "No progress before the stall timeout elapsed".to_string(),
                code: ErrorCode::StallTimeout,
            }
        } else {
            JobFailure {
                message: "Cancelled by caller".to_string(),
                code: ErrorCode::Cancelled,
            }
        }
    }

    /// Mark a job completed and feed the playlist tracker.
    fn complete_job(&self, job_id: JobId, track_id: String, output_path: PathBuf) {
        let album_key = {
            let mut table = self.lock_state();
            let Some(job) = table.jobs.get_mut(&job_id) else {
                return;
            };
            if job.is_terminal() {
                return;
            }
            job.status = JobStatus::Completed;
            job.progress = 100.0;
            job.track_id = Some(track_id.clone());
            job.output_path = Some(output_path.clone());
            job.stall = None;
            job.finished = Some(Instant::now());
            job.finished_at = Some(now_millis());
            job.album_key.clone().or_else(|| job.effective_album())
        };

        info!("Job {job_id} completed, track {track_id}");
        self.events.broadcast_lossy(DownloadEvent::Completed {
            job_id,
            track_id: track_id.clone(),
            output_path,
        });

        let Some(key) = album_key else { return };
        let completed = self.lock_tracker().record_completion(&key, track_id);
        if let Some(done) = completed {
            self.events.broadcast_lossy(DownloadEvent::AlbumCompleted {
                album: done.name.clone(),
                total: done.total,
                track_ids: done.track_ids.clone(),
            });
            let failed = self.failed_notes_for_album(&key);
            self.events.broadcast_lossy(DownloadEvent::PlaylistSummary {
                album: done.name,
                total: done.total,
                track_ids: done.track_ids,
                failed,
            });
        }
    }

    /// Failed jobs tagged with the given album, with their last known errors.
    fn failed_notes_for_album(&self, key: &str) -> Vec<FailedJobNote> {
        let table = self.lock_state();
        let mut notes: Vec<FailedJobNote> = table
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Failed)
            .filter(|job| {
                job.album_key
                    .clone()
                    .or_else(|| job.effective_album())
                    .as_deref()
                    == Some(key)
            })
            .map(|job| FailedJobNote {
                job_id: job.id,
                error: job.error.clone().unwrap_or_else(|| "unknown".to_string()),
                code: job.error_code,
            })
            .collect();
        notes.sort_by_key(|note| note.job_id);
        notes
    }

    /// Mark a job failed, emit the event, and leave a missing-track note.
    async fn fail_job(&self, job_id: JobId, failure: JobFailure, url: &str, title: Option<&str>) {
        let recorded = {
            let mut table = self.lock_state();
            let Some(job) = table.jobs.get_mut(&job_id) else {
                return;
            };
            if job.is_terminal() {
                // Already failed through another path (e.g. explicit cancel
                // racing the execution task); keep the first record.
                return;
            }
            job.status = JobStatus::Failed;
            job.error = Some(failure.message.clone());
            job.error_code = Some(failure.code);
            job.stall = None;
            job.finished = Some(Instant::now());
            job.finished_at = Some(now_millis());
            job.metadata.as_ref().map(|m| m.title.clone())
        };

        error!("Job {job_id} failed ({}): {}", failure.code, failure.message);
        self.events.broadcast_lossy(DownloadEvent::Failed {
            job_id,
            message: failure.message.clone(),
            code: failure.code,
        });

        // Best effort: a note so the track can be retried later.
        let title = recorded.as_deref().or(title);
        self.library
            .record_missing_track(&failure.message, url, title)
            .await;
    }

    /// Offer free slots to pending jobs, oldest first.
    fn start_next_pending(&self) {
        loop {
            let job_id = {
                let mut table = self.lock_state();
                if table.active >= self.config.max_concurrent_downloads {
                    return;
                }
                let Some(id) = table.next_pending() else {
                    return;
                };
                table.claim(id);
                id
            };
            debug!("Slot freed, starting pending job {job_id}");
            let this = self.clone();
            tokio::spawn(async move {
                this.run_job(job_id).await;
            });
        }
    }
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Periodic sweep purging terminal jobs after their retention window.
fn spawn_sweep(
    state: Arc<Mutex<JobTable>>,
    config: OrchestratorConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.sweep_interval());
        interval.tick().await;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            let now = Instant::now();
            let mut table = state.lock().unwrap_or_else(PoisonError::into_inner);
            let before = table.jobs.len();
            table.jobs.retain(|_, job| match job.status {
                JobStatus::Completed => job
                    .finished
                    .is_none_or(|f| now.duration_since(f) < config.completed_retention()),
                JobStatus::Failed => job
                    .finished
                    .is_none_or(|f| now.duration_since(f) < config.failed_retention()),
                JobStatus::Pending | JobStatus::Downloading => true,
            });
            let removed = before - table.jobs.len();
            if removed > 0 {
                debug!("Sweep purged {removed} finished jobs");
            }
        }
    })
}
