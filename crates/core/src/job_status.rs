//! Job status snapshots and the wire payload they are built from.
//!
//! Both transports (push frames and REST polling) deliver the same
//! [`StatusPayload`] body. [`StatusPayload::into_snapshot`] normalizes it
//! into an immutable [`JobStatus`] so the reconciler never sees raw
//! backend data.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job_events::CANCELLED_BY_USER;
use crate::types::{JobId, Timestamp};

/// Upper bound of [`JobStatus::progress`].
pub const MAX_PROGRESS: u8 = 100;

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Lifecycle state of a job as reported by the backend.
///
/// The backend reports fine-grained sub-states of processing (e.g.
/// `generating_images`, `composing`). Those land in [`JobState::Other`]
/// and are always treated as non-terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobState {
    Submitted,
    Queued,
    Processing,
    Completed,
    Failed,
    /// Backend-defined sub-state, kept verbatim.
    Other(String),
}

impl JobState {
    /// Wire name of the state.
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Submitted => "submitted",
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Other(name) => name,
        }
    }

    /// `completed` and `failed` are the only states with no way out.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl From<String> for JobState {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "submitted" => JobState::Submitted,
            "queued" => JobState::Queued,
            "processing" => JobState::Processing,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            _ => JobState::Other(raw),
        }
    }
}

impl From<&str> for JobState {
    fn from(raw: &str) -> Self {
        JobState::from(raw.to_string())
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// JobResult
// ---------------------------------------------------------------------------

/// Output of a completed job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Any other output fields the backend attaches.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobResult {
    /// Build a result from an arbitrary JSON value.
    ///
    /// Objects map field by field; a bare string is taken as the video
    /// URL; anything else is kept under `extra["value"]`.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(url) => JobResult {
                video_url: Some(url),
                ..Default::default()
            },
            serde_json::Value::Object(_) => {
                serde_json::from_value(value.clone()).unwrap_or_else(|_| JobResult {
                    extra: value.as_object().cloned().unwrap_or_default(),
                    ..Default::default()
                })
            }
            other => {
                let mut extra = serde_json::Map::new();
                extra.insert("value".to_string(), other);
                JobResult {
                    extra,
                    ..Default::default()
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Immutable snapshot of one job at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    /// Completion percentage (0-100). Not guaranteed monotonic.
    pub progress: u8,
    /// Present only when `state` is [`JobState::Failed`].
    pub error_message: Option<String>,
    /// Present only when `state` is [`JobState::Completed`].
    pub result: Option<JobResult>,
    /// Local receipt stamp. Orders snapshots from both transports on one
    /// clock and is used to discard stale out-of-order snapshots.
    pub updated_at: Timestamp,
    /// Server-side snapshot time, when the backend sent one. Only ever
    /// compared with other server times.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<Timestamp>,
}

impl JobStatus {
    /// Create a snapshot with no error and no result.
    pub fn new(job_id: JobId, state: JobState, progress: u8, updated_at: Timestamp) -> Self {
        Self {
            job_id,
            state,
            progress: progress.min(MAX_PROGRESS),
            error_message: None,
            result: None,
            updated_at,
            reported_at: None,
        }
    }

    /// Failed snapshot with the given message.
    pub fn failed(
        job_id: JobId,
        progress: u8,
        message: impl Into<String>,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::new(job_id, JobState::Failed, progress, updated_at)
        }
    }

    /// The local snapshot emitted when the user cancels a job.
    pub fn cancelled(job_id: JobId, progress: u8, updated_at: Timestamp) -> Self {
        Self::failed(job_id, progress, CANCELLED_BY_USER, updated_at)
    }

    /// Attach a result. Ignored unless the snapshot is completed.
    pub fn with_result(mut self, result: JobResult) -> Self {
        if self.state == JobState::Completed {
            self.result = Some(result);
        }
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// `true` if `self` should replace `held` under the ordering rule.
    pub fn is_newer_than(&self, held: &JobStatus) -> bool {
        self.updated_at > held.updated_at
    }
}

// ---------------------------------------------------------------------------
// Wire payload
// ---------------------------------------------------------------------------

/// Status body shared by `GET /jobs/{id}` and `job_update` push frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub job_id: String,
    pub status: String,
    /// Percentage; the backend sometimes sends fractional values.
    #[serde(default)]
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Server-side snapshot time, when the backend provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl StatusPayload {
    /// Normalize into a [`JobStatus`].
    ///
    /// `received_at` becomes the snapshot's `updated_at`; the payload's own
    /// `updated_at` is kept as `reported_at`. Progress is rounded and
    /// clamped to 0-100; the error message is kept only for failed jobs
    /// and the result only for completed ones.
    pub fn into_snapshot(self, received_at: Timestamp) -> Result<JobStatus, CoreError> {
        let job_id = JobId::new(self.job_id);
        if job_id.is_empty() {
            return Err(CoreError::Validation(
                "status payload has an empty job_id".to_string(),
            ));
        }

        let state = JobState::from(self.status);
        let progress = clamp_progress(self.progress);

        let error_message = match state {
            JobState::Failed => self.error_message,
            _ => None,
        };
        let result = match state {
            JobState::Completed => self.result.map(JobResult::from_value),
            _ => None,
        };

        Ok(JobStatus {
            job_id,
            state,
            progress,
            error_message,
            result,
            updated_at: received_at,
            reported_at: self.updated_at,
        })
    }
}

fn clamp_progress(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, f64::from(MAX_PROGRESS)) as u8
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
