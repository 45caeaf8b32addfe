//! Events flowing into and out of the monitor.
//!
//! [`TransportEvent`]s are what the adapters report to the monitor's
//! session task. [`MonitorEvent`]s are what the monitor publishes on its
//! broadcast channel for consumers that prefer a stream over callbacks.

use jobsync_core::job_status::{JobStatus, StatusPayload};
use jobsync_core::types::JobId;
use serde::Serialize;

/// Which adapter delivered a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Push,
    Poll,
}

/// Connection-state change reported by the push adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkReport {
    Connected,
    /// A connect attempt failed or the socket dropped; a retry may follow.
    Disconnected,
    /// The retry budget is spent; the adapter has stopped for good.
    Exhausted,
}

/// Message from an adapter to the monitor.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Link(LinkReport),
    Update {
        source: Source,
        payload: StatusPayload,
    },
}

/// A monitor-level event.
#[derive(Debug, Clone, Serialize)]
pub enum MonitorEvent {
    /// A snapshot was accepted and is now current.
    StatusChanged { status: JobStatus },

    /// The push socket for a job is open.
    PushConnected { job_id: JobId },

    /// The push socket for a job closed or failed to open.
    PushDisconnected { job_id: JobId },

    /// The push adapter spent its retry budget.
    PushExhausted { job_id: JobId },

    /// Polling took over as the active channel.
    PollingStarted { job_id: JobId },

    /// Polling was stopped (hand-off to push or teardown).
    PollingStopped { job_id: JobId },

    /// Monitoring of a job ended; both channels are closed.
    MonitoringStopped { job_id: JobId },
}
