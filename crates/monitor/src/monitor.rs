//! Dual-channel job monitor.
//!
//! [`JobMonitor`] owns the [`Reconciler`] for one job at a time and runs
//! a session task per monitored job. The session starts the push
//! adapter, falls back to polling while the socket is down, feeds every
//! payload through the reconciler and tears both channels down once the
//! job reaches a terminal state.
//!
//! Accepted snapshots are delivered two ways: to callbacks registered
//! with [`JobMonitor::subscribe`], and on the broadcast channel returned
//! by [`JobMonitor::events`].
//!
//! All reconciler writes go through one reentrant apply gate, so a
//! snapshot is fully applied and delivered before the next one is
//! looked at, whichever task or thread it came from.

use std::sync::Arc;

use jobsync_core::job_status::JobStatus;
use jobsync_core::types::JobId;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{ApiError, JobApi, JobBackend};
use crate::clock::{Clock, Stamper, SystemClock};
use crate::config::{CancelMode, ClientConfig, MonitorConfig};
use crate::events::{LinkReport, MonitorEvent, TransportEvent};
use crate::polling::PollingAdapter;
use crate::push::PushAdapter;
use crate::reconciler::{Decision, MonitorPhase, Reconciler, Rejection};
use crate::subscription::{Listeners, Subscription};
use crate::transport::{PushTransport, WsConnector};

/// Broadcast channel capacity for monitor events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors returned by caller-initiated monitor actions.
///
/// Transport failures never show up here; they only delay updates.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// `submit_job` was called without a project id.
    #[error("A project id is required to submit a job")]
    InvalidProject,

    /// The backend accepted the submission but returned no job id.
    #[error("Backend returned an empty job id")]
    EmptyJobId,

    /// The job is not the one being monitored.
    #[error("Job {0} is not being monitored")]
    UnknownJob(JobId),

    /// The job already reached a terminal state.
    #[error("Job {0} already finished")]
    AlreadyFinished(JobId),

    /// The submission HTTP call failed.
    #[error("Failed to submit job: {0}")]
    SubmitFailed(#[source] ApiError),

    /// The cancellation HTTP call failed.
    #[error("Failed to cancel job: {0}")]
    CancelFailed(#[source] ApiError),
}

/// Tracks the status of one remote job over push and polling channels.
///
/// Must be used from within a tokio runtime. Dropping the monitor stops
/// monitoring.
pub struct JobMonitor {
    backend: Arc<dyn JobBackend>,
    push: Arc<dyn PushTransport>,
    config: MonitorConfig,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

/// State reachable from both the public handle and the session task.
struct Shared {
    /// Serializes "reconcile + notify" and job switches.
    apply_gate: ReentrantMutex<()>,
    reconciler: Mutex<Reconciler>,
    listeners: Arc<Listeners>,
    event_tx: broadcast::Sender<MonitorEvent>,
    stamper: Stamper,
}

/// Bookkeeping for the job currently being monitored.
struct Session {
    job_id: JobId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl JobMonitor {
    /// Create an idle monitor using the system clock.
    pub fn new(
        backend: Arc<dyn JobBackend>,
        push: Arc<dyn PushTransport>,
        config: MonitorConfig,
    ) -> Self {
        Self::with_clock(backend, push, config, Arc::new(SystemClock))
    }

    /// Create an idle monitor stamping snapshots from `clock`.
    pub fn with_clock(
        backend: Arc<dyn JobBackend>,
        push: Arc<dyn PushTransport>,
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            apply_gate: ReentrantMutex::new(()),
            reconciler: Mutex::new(Reconciler::new()),
            listeners: Arc::new(Listeners::new()),
            event_tx,
            stamper: Stamper::new(clock),
        });

        Self {
            backend,
            push,
            config,
            shared,
            session: Mutex::new(None),
        }
    }

    /// Wire the production REST client and WebSocket connector.
    pub fn from_config(client: &ClientConfig, config: MonitorConfig) -> Self {
        let backend = Arc::new(JobApi::new(client.api_url.clone(), client.token.clone()));
        let push = Arc::new(WsConnector::new(client.ws_url.clone(), client.token.clone()));
        Self::new(backend, push, config)
    }

    /// Register a callback invoked on every accepted snapshot.
    ///
    /// The callback runs on the task that applied the snapshot and must
    /// not block.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&JobStatus) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(Arc::new(callback))
    }

    /// Subscribe to monitor-level events.
    pub fn events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Create a job for `project_id` and start monitoring it.
    ///
    /// Submission failures are returned as-is and never retried.
    pub async fn submit_job(&self, project_id: &str) -> Result<JobId, MonitorError> {
        let project_id = project_id.trim();
        if project_id.is_empty() {
            return Err(MonitorError::InvalidProject);
        }

        let job_id = self
            .backend
            .submit_job(project_id)
            .await
            .map_err(MonitorError::SubmitFailed)?;
        if job_id.is_empty() {
            return Err(MonitorError::EmptyJobId);
        }

        self.watch(job_id.clone());
        Ok(job_id)
    }

    /// Start monitoring an existing job.
    ///
    /// Any previously monitored job is torn down first.
    pub fn watch(&self, job_id: JobId) {
        let _gate = self.shared.apply_gate.lock();
        let mut session = self.session.lock();

        if let Some(previous) = session.take() {
            tracing::info!(
                previous_job_id = %previous.job_id,
                job_id = %job_id,
                "Switching monitored job",
            );
            previous.cancel.cancel();
        }

        self.shared.reconciler.lock().begin(job_id.clone());

        let cancel = CancellationToken::new();
        let ctx = SessionContext {
            session_id: Uuid::new_v4(),
            job_id: job_id.clone(),
            shared: Arc::clone(&self.shared),
            backend: Arc::clone(&self.backend),
            push: Arc::clone(&self.push),
            config: self.config.clone(),
            cancel: cancel.clone(),
        };
        tracing::info!(session_id = %ctx.session_id, job_id = %job_id, "Monitoring job");

        let task = tokio::spawn(ctx.run());
        *session = Some(Session {
            job_id,
            cancel,
            task,
        });
    }

    /// Cancel the monitored job.
    ///
    /// Emits a failed "Cancelled by user" snapshot without waiting for
    /// either transport to report it. Under [`CancelMode::Confirmed`] the
    /// backend must accept the request first; under
    /// [`CancelMode::Optimistic`] the snapshot is emitted before the
    /// request is sent.
    ///
    /// Returns the current snapshot after cancellation.
    pub async fn cancel_job(&self, job_id: &JobId) -> Result<JobStatus, MonitorError> {
        self.check_cancellable(job_id)?;

        match self.config.cancel_mode {
            CancelMode::Confirmed => {
                self.backend
                    .cancel_job(job_id)
                    .await
                    .map_err(MonitorError::CancelFailed)?;
                self.apply_cancellation(job_id)
            }
            CancelMode::Optimistic => {
                let status = self.apply_cancellation(job_id)?;
                if let Err(e) = self.backend.cancel_job(job_id).await {
                    tracing::warn!(
                        job_id = %job_id,
                        error = %e,
                        "Cancel request failed after local cancellation",
                    );
                    return Err(MonitorError::CancelFailed(e));
                }
                Ok(status)
            }
        }
    }

    /// Stop monitoring: close the socket, stop polling, forget the job.
    ///
    /// Safe to call repeatedly.
    pub fn stop(&self) {
        let _gate = self.shared.apply_gate.lock();
        if let Some(session) = self.session.lock().take() {
            tracing::info!(job_id = %session.job_id, "Stopping job monitor");
            session.cancel.cancel();
        }
        self.shared.reconciler.lock().reset();
    }

    /// The current snapshot, if any was accepted yet.
    pub fn current(&self) -> Option<JobStatus> {
        self.shared.reconciler.lock().current().cloned()
    }

    pub fn phase(&self) -> MonitorPhase {
        self.shared.reconciler.lock().phase()
    }

    /// The monitored job, if any.
    pub fn job_id(&self) -> Option<JobId> {
        self.shared.reconciler.lock().job_id().cloned()
    }

    /// Every accepted snapshot for the monitored job, oldest first.
    pub fn history(&self) -> Vec<JobStatus> {
        self.shared.reconciler.lock().history().to_vec()
    }

    /// `true` while a session task is still running (channels may be open).
    pub fn is_active(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|session| !session.task.is_finished())
    }

    // ---- private helpers ----

    fn check_cancellable(&self, job_id: &JobId) -> Result<(), MonitorError> {
        let reconciler = self.shared.reconciler.lock();
        if reconciler.job_id() != Some(job_id) {
            return Err(MonitorError::UnknownJob(job_id.clone()));
        }
        if reconciler.phase().is_terminal() {
            return Err(MonitorError::AlreadyFinished(job_id.clone()));
        }
        Ok(())
    }

    /// Apply the local cancellation snapshot and end the session if it
    /// was accepted.
    ///
    /// Fails with [`MonitorError::UnknownJob`] when the monitor moved to
    /// another job, or stopped, while the cancel request was in flight.
    fn apply_cancellation(&self, job_id: &JobId) -> Result<JobStatus, MonitorError> {
        let (snapshot, decision) = self.shared.apply_cancellation(job_id);

        match decision {
            Decision::Rejected(Rejection::ForeignJob | Rejection::Idle) => {
                return Err(MonitorError::UnknownJob(job_id.clone()));
            }
            Decision::Accepted { terminal: true } => {
                if let Some(session) = self.session.lock().as_ref() {
                    if session.job_id == *job_id {
                        session.cancel.cancel();
                    }
                }
            }
            _ => {}
        }

        Ok(self
            .current()
            .filter(|current| current.job_id == *job_id)
            .unwrap_or(snapshot))
    }
}

impl Drop for JobMonitor {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

impl Shared {
    /// Offer a snapshot to the reconciler and deliver it if accepted.
    fn apply(&self, candidate: JobStatus) -> Decision {
        let _gate = self.apply_gate.lock();
        let decision = self.reconciler.lock().apply(candidate.clone());

        match decision {
            Decision::Accepted { terminal } => {
                tracing::info!(
                    job_id = %candidate.job_id,
                    state = %candidate.state,
                    progress = candidate.progress,
                    terminal,
                    "Job status updated",
                );
                self.listeners.notify(&candidate);
                let _ = self
                    .event_tx
                    .send(MonitorEvent::StatusChanged { status: candidate });
            }
            Decision::Rejected(reason) => {
                tracing::debug!(
                    job_id = %candidate.job_id,
                    state = %candidate.state,
                    ?reason,
                    "Discarded job status",
                );
            }
        }

        decision
    }

    /// Build and apply the "Cancelled by user" snapshot, stamped after
    /// whatever is currently held.
    fn apply_cancellation(&self, job_id: &JobId) -> (JobStatus, Decision) {
        let _gate = self.apply_gate.lock();

        let (progress, floor) = {
            let reconciler = self.reconciler.lock();
            match reconciler.current() {
                Some(held) => (held.progress, Some(held.updated_at)),
                None => (0, None),
            }
        };
        let updated_at = match floor {
            Some(floor) => self.stamper.stamp_after(floor),
            None => self.stamper.stamp(),
        };

        let snapshot = JobStatus::cancelled(job_id.clone(), progress, updated_at);
        let decision = self.apply(snapshot.clone());
        (snapshot, decision)
    }

    fn publish(&self, event: MonitorEvent) {
        let _ = self.event_tx.send(event);
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

/// Everything a session task needs; moved into the task.
struct SessionContext {
    session_id: Uuid,
    job_id: JobId,
    shared: Arc<Shared>,
    backend: Arc<dyn JobBackend>,
    push: Arc<dyn PushTransport>,
    config: MonitorConfig,
    cancel: CancellationToken,
}

impl SessionContext {
    /// Drive both channels until the job is terminal or the session is
    /// cancelled, then tear everything down.
    async fn run(self) {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let push = PushAdapter::spawn(
            self.job_id.clone(),
            Arc::clone(&self.push),
            self.config.retry,
            tx.clone(),
            self.cancel.child_token(),
        );
        let mut polling: Option<PollingAdapter> = None;
        let mut push_connected = false;

        let fallback = tokio::time::sleep(self.config.fallback_after);
        tokio::pin!(fallback);
        let mut fallback_armed = true;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(event) = rx.recv() => match event {
                    TransportEvent::Link(LinkReport::Connected) => {
                        push_connected = true;
                        self.shared.publish(MonitorEvent::PushConnected { job_id: self.job_id.clone() });
                        self.stop_polling(&mut polling);
                    }
                    TransportEvent::Link(report) => {
                        push_connected = false;
                        let event = match report {
                            LinkReport::Exhausted => MonitorEvent::PushExhausted { job_id: self.job_id.clone() },
                            _ => MonitorEvent::PushDisconnected { job_id: self.job_id.clone() },
                        };
                        self.shared.publish(event);
                        self.start_polling(&mut polling, &tx);
                    }
                    TransportEvent::Update { source, payload } => {
                        let received_at = self.shared.stamper.stamp();
                        match payload.into_snapshot(received_at) {
                            Ok(snapshot) => {
                                tracing::trace!(session_id = %self.session_id, ?source, "Status payload received");
                                if let Decision::Accepted { terminal: true } = self.shared.apply(snapshot) {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(
                                    session_id = %self.session_id,
                                    job_id = %self.job_id,
                                    ?source,
                                    error = %e,
                                    "Dropping invalid status payload",
                                );
                            }
                        }
                    }
                },
                _ = &mut fallback, if fallback_armed => {
                    fallback_armed = false;
                    if !push_connected && polling.is_none() {
                        tracing::info!(
                            session_id = %self.session_id,
                            job_id = %self.job_id,
                            fallback_after_ms = self.config.fallback_after.as_millis() as u64,
                            "Push channel not connected in time, falling back to polling",
                        );
                        self.start_polling(&mut polling, &tx);
                    }
                }
            }
        }

        // Teardown: synchronous cancellation of every timer and socket.
        push.disconnect();
        self.stop_polling(&mut polling);
        self.cancel.cancel();

        tracing::info!(session_id = %self.session_id, job_id = %self.job_id, "Job monitoring stopped");
        self.shared.publish(MonitorEvent::MonitoringStopped {
            job_id: self.job_id.clone(),
        });
    }

    fn start_polling(
        &self,
        polling: &mut Option<PollingAdapter>,
        tx: &mpsc::UnboundedSender<TransportEvent>,
    ) {
        if polling.is_some() {
            return;
        }
        *polling = Some(PollingAdapter::spawn(
            self.job_id.clone(),
            Arc::clone(&self.backend),
            self.config.poll_interval,
            tx.clone(),
            self.cancel.child_token(),
        ));
        self.shared.publish(MonitorEvent::PollingStarted {
            job_id: self.job_id.clone(),
        });
    }

    fn stop_polling(&self, polling: &mut Option<PollingAdapter>) {
        if let Some(adapter) = polling.take() {
            adapter.stop();
            self.shared.publish(MonitorEvent::PollingStopped {
                job_id: self.job_id.clone(),
            });
        }
    }
}
