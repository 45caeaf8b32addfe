//! Follow one generation job from the terminal until it finishes.
//!
//! [`run`] drives a [`JobMonitor`] for a single [`WatchTarget`], logs
//! every accepted snapshot and resolves to an [`Outcome`] once the job
//! completes, fails, or the caller's shutdown future fires.

use std::future::Future;

use jobsync_core::job_status::{JobState, JobStatus};
use jobsync_core::types::JobId;
use jobsync_monitor::config::ConfigError;
use jobsync_monitor::{JobMonitor, MonitorError, MonitorEvent};
use tokio::sync::broadcast::error::RecvError;

/// Which job to follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    /// Submit a new job for this project, then follow it.
    Submit { project_id: String },
    /// Follow a job that already exists.
    Existing { job_id: JobId },
}

impl WatchTarget {
    /// Read `JOBSYNC_PROJECT_ID` / `JOBSYNC_JOB_ID`. Exactly one must be set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_values(env_value("JOBSYNC_PROJECT_ID"), env_value("JOBSYNC_JOB_ID"))
    }

    pub fn from_values(
        project_id: Option<String>,
        job_id: Option<String>,
    ) -> Result<Self, ConfigError> {
        match (project_id, job_id) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid {
                name: "JOBSYNC_JOB_ID",
                reason: "set either JOBSYNC_PROJECT_ID or JOBSYNC_JOB_ID, not both".to_string(),
            }),
            (Some(project_id), None) => Ok(WatchTarget::Submit { project_id }),
            (None, Some(job_id)) => Ok(WatchTarget::Existing {
                job_id: JobId::new(job_id),
            }),
            (None, None) => Err(ConfigError::Missing("JOBSYNC_PROJECT_ID")),
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// How a watch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(JobStatus),
    Failed(JobStatus),
    /// Shutdown was requested before the job finished.
    Interrupted,
}

impl Outcome {
    /// Terminal outcome for a snapshot, if it is terminal.
    pub fn from_status(status: &JobStatus) -> Option<Self> {
        match status.state {
            JobState::Completed => Some(Outcome::Completed(status.clone())),
            JobState::Failed => Some(Outcome::Failed(status.clone())),
            _ => None,
        }
    }

    /// Process exit code: 0 completed, 1 failed, 130 interrupted.
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Completed(_) => 0,
            Outcome::Failed(_) => 1,
            Outcome::Interrupted => 130,
        }
    }
}

/// Start monitoring `target` and wait for a terminal snapshot.
///
/// Returns `Err` only when the job could not be submitted.
pub async fn run<S>(
    monitor: &JobMonitor,
    target: WatchTarget,
    shutdown: S,
) -> Result<Outcome, MonitorError>
where
    S: Future<Output = ()>,
{
    let mut events = monitor.events();

    let job_id = match target {
        WatchTarget::Submit { project_id } => monitor.submit_job(&project_id).await?,
        WatchTarget::Existing { job_id } => {
            monitor.watch(job_id.clone());
            job_id
        }
    };
    tracing::info!(job_id = %job_id, "Watching job");

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!(job_id = %job_id, "Shutdown requested, stopping monitor");
                monitor.stop();
                return Ok(Outcome::Interrupted);
            }
            event = events.recv() => match event {
                Ok(MonitorEvent::StatusChanged { status }) => {
                    log_status(&status);
                    if let Some(outcome) = Outcome::from_status(&status) {
                        return Ok(outcome);
                    }
                }
                Ok(MonitorEvent::PushExhausted { job_id }) => {
                    tracing::warn!(job_id = %job_id, "Push channel unavailable, continuing with polling");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Monitor event stream lagged");
                    if let Some(outcome) = monitor.current().as_ref().and_then(Outcome::from_status) {
                        return Ok(outcome);
                    }
                }
                Err(RecvError::Closed) => return Ok(Outcome::Interrupted),
            }
        }
    }
}

fn log_status(status: &JobStatus) {
    match status.state {
        JobState::Completed => {
            let video_url = status
                .result
                .as_ref()
                .and_then(|r| r.video_url.as_deref())
                .unwrap_or("-");
            tracing::info!(job_id = %status.job_id, video_url, "Job completed");
        }
        JobState::Failed => {
            tracing::warn!(
                job_id = %status.job_id,
                error = status.error_message.as_deref().unwrap_or("unknown error"),
                "Job failed",
            );
        }
        _ => {
            tracing::info!(
                job_id = %status.job_id,
                state = %status.state,
                progress = status.progress,
                "Job progress",
            );
        }
    }
}
