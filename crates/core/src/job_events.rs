//! WebSocket message type constants for job status push frames.
//!
//! The status gateway wraps every frame as `{"type": ..., "data": ...}`.
//! Only [`MSG_TYPE_JOB_UPDATE`] carries a status payload; every other
//! type is ignored by the client.

/// A job status snapshot, `data` has the same shape as the REST status body.
pub const MSG_TYPE_JOB_UPDATE: &str = "job_update";

/// Error message attached to the local snapshot synthesized on cancel.
pub const CANCELLED_BY_USER: &str = "Cancelled by user";
