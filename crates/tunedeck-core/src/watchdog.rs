//! Per-job stall watchdog.
//!
//! One watchdog task runs per active job. On a fixed interval it checks the
//! time since the job's last progress event and escalates in two stages:
//! first flagging the stall (with a countdown re-emitted every tick so
//! observers can render it), then force-cancelling the job's extraction
//! operation once the timeout window elapses with no further progress.
//!
//! This is the only automatic-failure mechanism for jobs that neither error
//! out nor report progress; without it a hung transfer would hold a
//! concurrency slot forever.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::error::ErrorCode;
use crate::events::{DownloadEvent, EventHub};
use crate::job::{JobId, JobStatus, StallState};
use crate::orchestrator::JobTable;

/// Spawn the watchdog task for one downloading job.
///
/// The task exits on its own when the job leaves the downloading state, when
/// it force-fails the job, or when `shutdown` fires. The orchestrator also
/// aborts the handle on job teardown.
pub(crate) fn spawn(
    job_id: JobId,
    state: Arc<Mutex<JobTable>>,
    events: EventHub<DownloadEvent>,
    config: OrchestratorConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.watchdog_interval());
        // The first tick completes immediately; skip it so the first real
        // check happens one interval after the job started.
        interval.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match check(job_id, &state, &config) {
                Verdict::KeepWatching => {}
                Verdict::Emit(event) => events.broadcast_lossy(event),
                Verdict::TimedOut { cancel } => {
                    warn!("Job {job_id} stalled past its timeout window, force-cancelling");
                    events.broadcast_lossy(DownloadEvent::StallTimeout { job_id });
                    cancel.cancel();
                    break;
                }
                Verdict::Done => break,
            }
        }
        debug!("Watchdog for job {job_id} stopped");
    })
}

/// Outcome of one watchdog tick.
enum Verdict {
    /// Job is healthy or still inside the detect threshold.
    KeepWatching,
    /// Stall detected or still stalled; notify observers.
    Emit(DownloadEvent),
    /// Deadline passed; the job's extraction must be aborted.
    TimedOut { cancel: CancellationToken },
    /// Job left the downloading state; the watchdog is no longer needed.
    Done,
}

fn check(job_id: JobId, state: &Arc<Mutex<JobTable>>, config: &OrchestratorConfig) -> Verdict {
    let mut table = state.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(job) = table.jobs.get_mut(&job_id) else {
        return Verdict::Done;
    };
    if job.status != JobStatus::Downloading {
        return Verdict::Done;
    }

    let now = Instant::now();

    if let Some(stall) = job.stall {
        if now >= stall.deadline {
            // Record the code before cancelling so the execution path can
            // distinguish a stall timeout from a user cancellation.
            job.error_code = Some(ErrorCode::StallTimeout);
            return Verdict::TimedOut {
                cancel: job.cancel.clone(),
            };
        }
        return Verdict::Emit(DownloadEvent::StallDetected {
            job_id,
            seconds_remaining: stall.seconds_remaining(now),
        });
    }

    let elapsed = now.duration_since(job.last_progress);
    if elapsed >= config.stall_detect() {
        let deadline = now + (config.stall_timeout() - config.stall_detect());
        let stall = StallState { deadline };
        job.stall = Some(stall);
        warn!(
            "Job {job_id} has reported no progress for {}s, stall detected",
            elapsed.as_secs()
        );
        return Verdict::Emit(DownloadEvent::StallDetected {
            job_id,
            seconds_remaining: stall.seconds_remaining(now),
        });
    }

    Verdict::KeepWatching
}
