//! Shared job status model for the jobsync workspace.
//!
//! - [`job_status`]: the [`JobStatus`](job_status::JobStatus) snapshot,
//!   its [`JobState`](job_status::JobState) tagged union and the wire
//!   payload it is normalized from.
//! - [`job_events`]: push frame type constants.

pub mod error;
pub mod job_events;
pub mod job_status;
pub mod types;
