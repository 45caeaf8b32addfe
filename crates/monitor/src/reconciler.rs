//! Snapshot reconciliation state machine.
//!
//! [`Reconciler`] decides, for every candidate snapshot coming from
//! either transport, whether it becomes the current status. It is plain
//! synchronous data: the monitor serializes calls to
//! [`Reconciler::apply`] and acts on the returned [`Decision`].
//!
//! Acceptance rules, in order:
//! 1. Terminal phases are absorbing; everything is discarded.
//! 2. With no monitored job, or for a different job, discard.
//! 3. A snapshot not strictly newer than the held one is stale. Local
//!    `updated_at` stamps are compared with each other, and server
//!    `reported_at` times only with the latest server time seen.
//! 4. Otherwise adopt it.

use jobsync_core::job_status::{JobState, JobStatus};
use jobsync_core::types::{JobId, Timestamp};
use serde::Serialize;

/// Lifecycle of the monitor for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    /// No job is being monitored.
    Idle,
    /// A job is known but no snapshot has been accepted yet.
    Connecting,
    /// Holding a non-terminal snapshot.
    Monitoring,
    Completed,
    Failed,
}

impl MonitorPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, MonitorPhase::Completed | MonitorPhase::Failed)
    }
}

/// Why a candidate snapshot was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The job already reached a terminal state.
    Terminal,
    /// No job is being monitored.
    Idle,
    /// The snapshot belongs to another job.
    ForeignJob,
    /// `updated_at` is older than or equal to the held snapshot's, or the
    /// server time is not past the latest one already accepted.
    Stale,
}

/// Outcome of [`Reconciler::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The snapshot is now current. `terminal` is set when it moved the
    /// monitor into a terminal phase; transports must be torn down.
    Accepted { terminal: bool },
    Rejected(Rejection),
}

impl Decision {
    pub fn is_accepted(self) -> bool {
        matches!(self, Decision::Accepted { .. })
    }
}

/// Holds the authoritative snapshot of the monitored job.
#[derive(Debug, Clone)]
pub struct Reconciler {
    phase: MonitorPhase,
    job_id: Option<JobId>,
    current: Option<JobStatus>,
    /// Latest server time among accepted snapshots.
    last_reported: Option<Timestamp>,
    history: Vec<JobStatus>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            phase: MonitorPhase::Idle,
            job_id: None,
            current: None,
            last_reported: None,
            history: Vec::new(),
        }
    }

    /// Start tracking `job_id`, dropping anything held for a previous job.
    pub fn begin(&mut self, job_id: JobId) {
        self.phase = MonitorPhase::Connecting;
        self.job_id = Some(job_id);
        self.current = None;
        self.last_reported = None;
        self.history.clear();
    }

    /// Forget the monitored job and return to [`MonitorPhase::Idle`].
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Offer a candidate snapshot.
    pub fn apply(&mut self, candidate: JobStatus) -> Decision {
        if self.phase.is_terminal() {
            return Decision::Rejected(Rejection::Terminal);
        }

        match &self.job_id {
            None => return Decision::Rejected(Rejection::Idle),
            Some(job_id) if *job_id != candidate.job_id => {
                return Decision::Rejected(Rejection::ForeignJob)
            }
            Some(_) => {}
        }

        if let Some(held) = &self.current {
            if !candidate.is_newer_than(held) {
                return Decision::Rejected(Rejection::Stale);
            }
        }
        if let (Some(reported), Some(last)) = (candidate.reported_at, self.last_reported) {
            if reported <= last {
                return Decision::Rejected(Rejection::Stale);
            }
        }

        self.phase = match candidate.state {
            JobState::Completed => MonitorPhase::Completed,
            JobState::Failed => MonitorPhase::Failed,
            _ => MonitorPhase::Monitoring,
        };
        if candidate.reported_at.is_some() {
            self.last_reported = candidate.reported_at;
        }
        self.history.push(candidate.clone());
        self.current = Some(candidate);

        Decision::Accepted {
            terminal: self.phase.is_terminal(),
        }
    }

    pub fn phase(&self) -> MonitorPhase {
        self.phase
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    pub fn current(&self) -> Option<&JobStatus> {
        self.current.as_ref()
    }

    /// Every accepted snapshot for the current job, oldest first.
    pub fn history(&self) -> &[JobStatus] {
        &self.history
    }
}
