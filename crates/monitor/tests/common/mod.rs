//! Shared test infrastructure for monitor integration tests.
//!
//! [`FakeBackend`] and [`FakePush`] stand in for the REST API and the
//! WebSocket gateway so the monitor can be driven deterministically
//! under paused tokio time.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use jobsync_core::job_status::{JobStatus, StatusPayload};
use jobsync_core::types::JobId;
use jobsync_monitor::api::{ApiError, JobBackend};
use jobsync_monitor::events::MonitorEvent;
use jobsync_monitor::transport::{PushChannel, PushTransport, TransportError};
use jobsync_monitor::{JobMonitor, MonitorConfig, Subscription};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{broadcast, Notify};

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// RFC 3339 timestamp `secs` seconds into the test epoch.
pub fn ts(secs: u32) -> String {
    format!("2026-01-01T00:00:{secs:02}Z")
}

/// A status body as the backend sends it.
pub fn payload(job_id: &str, status: &str, progress: f64, secs: u32) -> StatusPayload {
    serde_json::from_value(json!({
        "job_id": job_id,
        "status": status,
        "progress": progress,
        "updated_at": ts(secs),
    }))
    .expect("test payload should deserialize")
}

/// A `job_update` push frame.
pub fn update_frame(job_id: &str, status: &str, progress: f64, secs: u32) -> String {
    json!({
        "type": "job_update",
        "data": payload(job_id, status, progress, secs),
    })
    .to_string()
}

/// A completed `job_update` frame carrying a video URL.
pub fn completed_frame(job_id: &str, video_url: &str, secs: u32) -> String {
    json!({
        "type": "job_update",
        "data": {
            "job_id": job_id,
            "status": "completed",
            "progress": 100,
            "result": { "video_url": video_url },
            "updated_at": ts(secs),
        },
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// FakeBackend
// ---------------------------------------------------------------------------

/// In-memory [`JobBackend`] with call counters and switchable failures.
pub struct FakeBackend {
    next_job_id: String,
    status: Mutex<Option<StatusPayload>>,
    pub submits: Mutex<Vec<String>>,
    pub polls: AtomicUsize,
    pub cancels: AtomicUsize,
    pub fail_submit: AtomicBool,
    pub fail_cancel: AtomicBool,
    /// When set, `cancel_job` blocks until the gate is notified.
    cancel_gate: Option<Arc<Notify>>,
}

impl FakeBackend {
    pub fn new(next_job_id: &str) -> Self {
        Self {
            next_job_id: next_job_id.to_string(),
            status: Mutex::new(None),
            submits: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            fail_submit: AtomicBool::new(false),
            fail_cancel: AtomicBool::new(false),
            cancel_gate: None,
        }
    }

    pub fn with_cancel_gate(mut self, gate: Arc<Notify>) -> Self {
        self.cancel_gate = Some(gate);
        self
    }

    /// Status returned by every subsequent poll.
    pub fn set_status(&self, payload: StatusPayload) {
        *self.status.lock() = Some(payload);
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    fn server_error() -> ApiError {
        ApiError::Status {
            status: 500,
            body: "internal error".to_string(),
        }
    }
}

#[async_trait]
impl JobBackend for FakeBackend {
    async fn submit_job(&self, project_id: &str) -> Result<JobId, ApiError> {
        self.submits.lock().push(project_id.to_string());
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(Self::server_error());
        }
        Ok(JobId::new(self.next_job_id.clone()))
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusPayload, ApiError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match self.status.lock().clone() {
            Some(payload) => Ok(payload),
            None => Err(ApiError::Status {
                status: 404,
                body: format!("job {job_id} not found"),
            }),
        }
    }

    async fn cancel_job(&self, _job_id: &JobId) -> Result<(), ApiError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.cancel_gate {
            gate.notified().await;
        }
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(Self::server_error());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakePush
// ---------------------------------------------------------------------------

/// Server side of one fake push connection.
struct Connection {
    job_id: JobId,
    frames: mpsc::UnboundedSender<Result<String, TransportError>>,
    sent: mpsc::UnboundedReceiver<String>,
}

/// Channel-backed [`PushTransport`].
///
/// The first `failures` connect attempts fail; with `hang` set every
/// attempt stays pending forever.
pub struct FakePush {
    failures: AtomicUsize,
    hang: bool,
    attempts: AtomicUsize,
    connections: Mutex<Vec<Connection>>,
}

impl FakePush {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            hang: false,
            attempts: AtomicUsize::new(0),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.connections.lock().len()
    }

    /// Deliver a text frame on the most recent connection.
    pub fn send(&self, text: impl Into<String>) {
        let connections = self.connections.lock();
        let connection = connections.last().expect("no push connection open");
        connection
            .frames
            .unbounded_send(Ok(text.into()))
            .expect("push connection already closed");
    }

    /// Close the most recent connection from the server side.
    pub fn drop_latest(&self) {
        if let Some(connection) = self.connections.lock().last() {
            connection.frames.close_channel();
        }
    }

    /// `true` once the client side of connection `index` is gone.
    pub fn is_closed(&self, index: usize) -> bool {
        self.connections.lock()[index].frames.is_closed()
    }

    /// Frames the client wrote on connection `index` so far.
    pub fn sent(&self, index: usize) -> Vec<String> {
        let mut connections = self.connections.lock();
        let mut frames = Vec::new();
        while let Ok(Some(text)) = connections[index].sent.try_next() {
            frames.push(text);
        }
        frames
    }

    pub fn job_of(&self, index: usize) -> JobId {
        self.connections.lock()[index].job_id.clone()
    }
}

#[async_trait]
impl PushTransport for FakePush {
    async fn connect(&self, job_id: &JobId) -> Result<PushChannel, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.hang {
            std::future::pending::<()>().await;
        }

        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (frames_tx, frames_rx) = mpsc::unbounded();
        let (outbound_tx, outbound_rx) = mpsc::unbounded::<String>();
        self.connections.lock().push(Connection {
            job_id: job_id.clone(),
            frames: frames_tx,
            sent: outbound_rx,
        });

        Ok(PushChannel {
            outbound: Box::pin(outbound_tx.sink_map_err(|_| TransportError::Closed)),
            inbound: frames_rx.boxed(),
        })
    }
}

// ---------------------------------------------------------------------------
// Monitor helpers
// ---------------------------------------------------------------------------

pub struct Harness {
    pub monitor: JobMonitor,
    pub backend: Arc<FakeBackend>,
    pub push: Arc<FakePush>,
}

impl Harness {
    pub fn new(backend: FakeBackend, push: FakePush, config: MonitorConfig) -> Self {
        let backend = Arc::new(backend);
        let push = Arc::new(push);
        let monitor = JobMonitor::new(backend.clone(), push.clone(), config);
        Self {
            monitor,
            backend,
            push,
        }
    }
}

/// Collects every snapshot delivered to a subscriber.
pub fn record(monitor: &JobMonitor) -> (Subscription, Arc<Mutex<Vec<JobStatus>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = monitor.subscribe(move |status| sink.lock().push(status.clone()));
    (subscription, seen)
}

/// Drain every event currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Poll `condition` every 10ms of (paused) time until it holds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
