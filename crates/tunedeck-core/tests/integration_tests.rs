//! Integration tests for `Tunedeck` core download workflows.
//!
//! These tests verify end-to-end orchestrator behavior:
//! - The concurrency ceiling and FIFO promotion of pending jobs
//! - Stall detection and forced timeout under paused time
//! - Cancellation of in-flight transfers
//! - Retention sweeping of finished jobs
//!
//! The extraction adapter and library are hand-rolled fakes so the tests can
//! gate, stall, and observe transfers deterministically.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use tunedeck_core::{
    DownloadEvent, DownloadOrchestrator, Error, ErrorCode, Extractor, JobOptions, JobStatus,
    Library, OrchestratorConfig, ProgressFn, Result, Track, TrackMetadata, TransferOutcome,
};

// =============================================================================
// Test Fakes
// =============================================================================

/// Route engine logs into the test harness output.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn metadata_for(url: &str) -> TrackMetadata {
    TrackMetadata {
        external_id: url.rsplit('/').next().unwrap_or("x").to_string(),
        title: format!("Track for {url}"),
        artist: Some("Integration Artist".to_string()),
        uploader: None,
        album: Some("Integration Album".to_string()),
        duration_secs: Some(180),
    }
}

/// Library fake that persists track ids in memory and records missing-track
/// notes.
#[derive(Default)]
struct FakeLibrary {
    persisted: Mutex<Vec<String>>,
    missing_notes: Mutex<Vec<String>>,
}

#[async_trait]
impl Library for FakeLibrary {
    async fn create_or_update_track(
        &self,
        metadata: &TrackMetadata,
        _file_path: &Path,
    ) -> Result<String> {
        let track_id = format!("track-{}", metadata.external_id);
        self.persisted.lock().unwrap().push(track_id.clone());
        Ok(track_id)
    }

    async fn track(&self, _track_id: &str) -> Result<Option<Track>> {
        Ok(None)
    }

    async fn playlist_tracks(&self, _playlist_id: &str) -> Result<Vec<Track>> {
        Ok(Vec::new())
    }

    async fn record_missing_track<'a>(&self, reason: &str, url: &str, _title: Option<&'a str>) {
        self.missing_notes
            .lock()
            .unwrap()
            .push(format!("{url}: {reason}"));
    }
}

/// Extractor fake whose transfers block on a semaphore until the test opens
/// the gate. Cancellation aborts a blocked transfer.
struct GatedExtractor {
    gate: Arc<Semaphore>,
    transfers_started: AtomicUsize,
}

impl GatedExtractor {
    fn new(gate: Arc<Semaphore>) -> Self {
        Self {
            gate,
            transfers_started: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Extractor for GatedExtractor {
    async fn resolve_metadata(&self, url: &str) -> Result<TrackMetadata> {
        Ok(metadata_for(url))
    }

    async fn transfer(
        &self,
        url: &str,
        destination: &Path,
        _options: &JobOptions,
        on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<TransferOutcome> {
        self.transfers_started.fetch_add(1, Ordering::SeqCst);
        on_progress(10.0);
        tokio::select! {
            () = cancel.cancelled() => {
                return Err(Error::Transfer("aborted".to_string()));
            }
            permit = self.gate.acquire() => match permit {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(Error::Transfer("gate closed".to_string())),
            },
        }
        on_progress(100.0);
        Ok(TransferOutcome {
            output_path: destination.to_path_buf(),
            metadata: metadata_for(url),
        })
    }
}

/// Extractor fake that resolves metadata but then never reports progress,
/// hanging until cancelled. Drives the stall watchdog path.
struct StallingExtractor;

#[async_trait]
impl Extractor for StallingExtractor {
    async fn resolve_metadata(&self, url: &str) -> Result<TrackMetadata> {
        Ok(metadata_for(url))
    }

    async fn transfer(
        &self,
        _url: &str,
        _destination: &Path,
        _options: &JobOptions,
        _on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<TransferOutcome> {
        cancel.cancelled().await;
        Err(Error::Transfer("aborted".to_string()))
    }
}

/// Extractor fake that completes instantly.
struct InstantExtractor;

#[async_trait]
impl Extractor for InstantExtractor {
    async fn resolve_metadata(&self, url: &str) -> Result<TrackMetadata> {
        if url.contains("bad") {
            return Err(Error::MetadataResolution {
                url: url.to_string(),
                message: "unresolvable".to_string(),
            });
        }
        Ok(metadata_for(url))
    }

    async fn transfer(
        &self,
        url: &str,
        destination: &Path,
        _options: &JobOptions,
        on_progress: ProgressFn,
        _cancel: CancellationToken,
    ) -> Result<TransferOutcome> {
        on_progress(100.0);
        Ok(TransferOutcome {
            output_path: destination.to_path_buf(),
            metadata: metadata_for(url),
        })
    }
}

fn orchestrator_with(
    config: OrchestratorConfig,
    extractor: Arc<dyn Extractor>,
    library: Arc<FakeLibrary>,
) -> DownloadOrchestrator {
    DownloadOrchestrator::new(
        config,
        extractor,
        library,
        Arc::new(tunedeck_core::DefaultNamer),
        "/music",
    )
}

/// Poll until the job reaches the expected status or the deadline passes.
async fn wait_for_status(orch: &DownloadOrchestrator, job_id: u64, status: JobStatus) {
    for _ in 0..100 {
        if orch.get_progress(job_id).map(|s| s.status) == Some(status) {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "job {job_id} never reached {status}, currently {:?}",
        orch.get_progress(job_id).map(|s| s.status)
    );
}

// =============================================================================
// Concurrency ceiling
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrency_ceiling_holds_and_pending_drain_fifo() {
    init_tracing();
    let gate = Arc::new(Semaphore::new(0));
    let extractor = Arc::new(GatedExtractor::new(Arc::clone(&gate)));
    let library = Arc::new(FakeLibrary::default());
    let config = OrchestratorConfig {
        max_concurrent_downloads: 2,
        ..Default::default()
    };
    let cloned: Arc<dyn Extractor> = extractor.clone();
    let orch = orchestrator_with(config, cloned, Arc::clone(&library));

    // Two submissions grab both slots and block at the gate.
    let a = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.submit("https://example.com/v/a", JobOptions::default()).await })
    };
    let b = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.submit("https://example.com/v/b", JobOptions::default()).await })
    };
    sleep(Duration::from_millis(100)).await;

    let status = orch.queue_status();
    assert_eq!(status.active, 2);
    assert_eq!(extractor.transfers_started.load(Ordering::SeqCst), 2);

    // A third submission must queue, not start.
    let c = orch.submit("https://example.com/v/c", JobOptions::default()).await;
    let status = orch.queue_status();
    assert_eq!(status.active, 2);
    assert_eq!(status.pending, 1);
    assert_eq!(orch.get_progress(c).unwrap().status, JobStatus::Pending);
    assert_eq!(extractor.transfers_started.load(Ordering::SeqCst), 2);

    // Opening the gate drains everything; the pending job is promoted.
    gate.add_permits(10);
    let a = a.await.unwrap();
    let b = b.await.unwrap();
    wait_for_status(&orch, c, JobStatus::Completed).await;

    for id in [a, b, c] {
        assert_eq!(orch.get_progress(id).unwrap().status, JobStatus::Completed);
    }
    assert_eq!(orch.queue_status().active, 0);
    assert_eq!(library.persisted.lock().unwrap().len(), 3);
    orch.shutdown();
}

// =============================================================================
// Stall watchdog
// =============================================================================

#[tokio::test(start_paused = true)]
async fn stalled_job_is_detected_then_force_failed() {
    init_tracing();
    let library = Arc::new(FakeLibrary::default());
    let orch = orchestrator_with(
        OrchestratorConfig::default(),
        Arc::new(StallingExtractor),
        Arc::clone(&library),
    );
    let mut rx = orch.subscribe();

    // The submission runs inline and only returns once the watchdog has
    // force-failed the job; paused time fast-forwards through the window.
    let handle = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.submit("https://example.com/v/hung", JobOptions::default()).await })
    };
    let id = handle.await.unwrap();

    let snap = orch.get_progress(id).unwrap();
    assert_eq!(snap.status, JobStatus::Failed);
    assert_eq!(snap.error_code, Some(ErrorCode::StallTimeout));

    let mut saw_detected = false;
    let mut saw_timeout = false;
    let mut saw_failed = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            DownloadEvent::StallDetected {
                job_id,
                seconds_remaining,
            } => {
                assert_eq!(job_id, id);
                // Countdown stays within the detect-to-timeout window.
                assert!(seconds_remaining <= 90);
                // Detection must precede the forced failure.
                assert!(!saw_timeout);
                saw_detected = true;
            }
            DownloadEvent::StallTimeout { job_id } => {
                assert_eq!(job_id, id);
                saw_timeout = true;
            }
            DownloadEvent::Failed { code, .. } => {
                assert_eq!(code, ErrorCode::StallTimeout);
                saw_failed = true;
            }
            _ => {}
        }
    }
    assert!(saw_detected && saw_timeout && saw_failed);
    assert!(!library.missing_notes.lock().unwrap().is_empty());
    orch.shutdown();
}

#[tokio::test(start_paused = true)]
async fn progress_before_detect_threshold_avoids_stall() {
    init_tracing();
    let library = Arc::new(FakeLibrary::default());
    let orch = orchestrator_with(
        OrchestratorConfig::default(),
        Arc::new(InstantExtractor),
        Arc::clone(&library),
    );
    let mut rx = orch.subscribe();
    let id = orch.submit("https://example.com/v/fast", JobOptions::default()).await;

    assert_eq!(orch.get_progress(id).unwrap().status, JobStatus::Completed);
    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, DownloadEvent::StallDetected { .. }));
    }
    orch.shutdown();
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_aborts_in_flight_transfer() {
    init_tracing();
    let gate = Arc::new(Semaphore::new(0));
    let extractor = Arc::new(GatedExtractor::new(Arc::clone(&gate)));
    let library = Arc::new(FakeLibrary::default());
    let orch = orchestrator_with(
        OrchestratorConfig::default(),
        extractor,
        Arc::clone(&library),
    );

    let handle = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.submit("https://example.com/v/slow", JobOptions::default()).await })
    };
    sleep(Duration::from_millis(100)).await;

    let id = orch.jobs()[0].id;
    assert!(orch.cancel(id).await);
    let returned = handle.await.unwrap();
    assert_eq!(returned, id);

    let snap = orch.get_progress(id).unwrap();
    assert_eq!(snap.status, JobStatus::Failed);
    assert_eq!(snap.error_code, Some(ErrorCode::Cancelled));
    assert_eq!(orch.queue_status().active, 0);
    // The failure left a missing-track note for a later retry.
    assert!(!library.missing_notes.lock().unwrap().is_empty());

    // Cancelling again is rejected.
    assert!(!orch.cancel(id).await);
    orch.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_after_cancel_runs_as_new_job() {
    init_tracing();
    let gate = Arc::new(Semaphore::new(0));
    let extractor = Arc::new(GatedExtractor::new(Arc::clone(&gate)));
    let library = Arc::new(FakeLibrary::default());
    let orch = orchestrator_with(
        OrchestratorConfig::default(),
        extractor,
        Arc::clone(&library),
    );

    let handle = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.submit("https://example.com/v/again", JobOptions::default()).await })
    };
    sleep(Duration::from_millis(100)).await;
    let original = orch.jobs()[0].id;
    assert!(orch.cancel(original).await);
    handle.await.unwrap();

    // With the gate open the retry runs straight through.
    gate.add_permits(10);
    let new_id = orch.retry(original).await.unwrap();
    assert_ne!(new_id, original);

    let snap = orch.get_progress(new_id).unwrap();
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.previous_job, Some(original));
    assert_eq!(library.persisted.lock().unwrap().len(), 1);
    orch.shutdown();
}

// =============================================================================
// Retention sweep
// =============================================================================

#[tokio::test(start_paused = true)]
async fn sweep_purges_completed_jobs_after_retention() {
    init_tracing();
    let library = Arc::new(FakeLibrary::default());
    let config = OrchestratorConfig {
        sweep_interval_secs: 1,
        completed_retention_secs: 2,
        failed_retention_secs: 3600,
        ..Default::default()
    };
    let orch = orchestrator_with(config, Arc::new(InstantExtractor), library);

    let done = orch.submit("https://example.com/v/ok", JobOptions::default()).await;
    let failed = orch.submit("https://example.com/v/bad", JobOptions::default()).await;
    assert_eq!(orch.get_progress(done).unwrap().status, JobStatus::Completed);
    assert_eq!(orch.get_progress(failed).unwrap().status, JobStatus::Failed);
    assert_eq!(orch.queue_status().total, 2);

    // Past the completed retention window: the completed job is purged, the
    // failed one is kept for its longer window.
    sleep(Duration::from_secs(5)).await;
    assert!(orch.get_progress(done).is_none());
    let snap = orch.get_progress(failed).unwrap();
    assert_eq!(snap.error_code, Some(ErrorCode::MetadataFailed));
    assert_eq!(orch.queue_status().total, 1);
    orch.shutdown();
}
