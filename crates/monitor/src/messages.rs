//! Push channel frame types and parser.
//!
//! The status gateway sends JSON text frames with the shape
//! `{"type": "<kind>", "data": {...}}`. Only `job_update` frames carry
//! a [`StatusPayload`]; every other kind is returned as
//! [`PushFrame::Ignored`] so that new gateway message kinds never break
//! the client.

use jobsync_core::job_events::MSG_TYPE_JOB_UPDATE;
use jobsync_core::job_status::StatusPayload;
use serde::Deserialize;

/// A parsed push frame.
#[derive(Debug, Clone)]
pub enum PushFrame {
    /// A job status snapshot.
    JobUpdate(StatusPayload),
    /// Any other frame type, kept by name for logging.
    Ignored { kind: String },
}

/// Untyped envelope; `data` is decoded once the kind is known.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Errors raised by [`parse_frame`]. Callers log and drop the frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Not JSON, or no string `type` field.
    #[error("Malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// A `job_update` whose `data` is not a status payload.
    #[error("Malformed job_update data: {0}")]
    BadJobUpdate(#[source] serde_json::Error),
}

/// Parse a push channel text frame.
pub fn parse_frame(text: &str) -> Result<PushFrame, FrameError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(FrameError::Malformed)?;

    if envelope.kind != MSG_TYPE_JOB_UPDATE {
        return Ok(PushFrame::Ignored {
            kind: envelope.kind,
        });
    }

    serde_json::from_value(envelope.data)
        .map(PushFrame::JobUpdate)
        .map_err(FrameError::BadJobUpdate)
}
