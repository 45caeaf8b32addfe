//! Push adapter: one reconnecting WebSocket per monitored job.
//!
//! [`PushAdapter::spawn`] starts a task that drives the
//! [`LinkState`](crate::reconnect::LinkState) machine: dial, pump frames,
//! wait, retry, give up. Parsed payloads and link changes are forwarded
//! to the monitor as [`TransportEvent`]s. Nothing in here returns an
//! error to the monitor; failures only show up as link reports.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use jobsync_core::types::JobId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{LinkReport, Source, TransportEvent};
use crate::messages::{parse_frame, PushFrame};
use crate::reconnect::{LinkAction, LinkEvent, LinkState, RetryPolicy};
use crate::transport::{PushChannel, PushTransport, TransportError};

/// Upper bound on the close handshake when the adapter is shut down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle to a running push adapter.
///
/// Dropping the handle disconnects the adapter.
pub struct PushAdapter {
    job_id: JobId,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PushAdapter {
    /// Start connecting to the push endpoint of `job_id`.
    ///
    /// Must be called from within a tokio runtime. `cancel` is usually a
    /// child of the monitoring session's token.
    pub fn spawn(
        job_id: JobId,
        transport: Arc<dyn PushTransport>,
        policy: RetryPolicy,
        events: mpsc::UnboundedSender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let link = Link {
            job_id: job_id.clone(),
            transport,
            policy,
            events,
            outbound_rx,
            cancel: cancel.clone(),
        };

        let task = tokio::spawn(link.run());

        Self {
            job_id,
            outbound,
            cancel,
            task,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Queue a text frame for the server.
    ///
    /// Frames are written once a socket is open. Fails with
    /// [`TransportError::Closed`] after [`disconnect`](Self::disconnect).
    pub fn send(&self, text: impl Into<String>) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(text.into())
            .map_err(|_| TransportError::Closed)
    }

    /// Close the socket and stop retrying. Safe to call repeatedly.
    pub fn disconnect(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(job_id = %self.job_id, "Disconnecting push adapter");
        }
        self.cancel.cancel();
    }

    /// `true` once the adapter task has exited.
    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PushAdapter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the adapter task.
struct Link {
    job_id: JobId,
    transport: Arc<dyn PushTransport>,
    policy: RetryPolicy,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
}

impl Link {
    async fn run(mut self) {
        let mut state = LinkState::Disconnected;
        let mut event = LinkEvent::Start;
        let mut pending: Option<PushChannel> = None;

        loop {
            if self.cancel.is_cancelled() {
                event = LinkEvent::Shutdown;
            }

            let (next, action) = state.on(event, &self.policy);
            tracing::trace!(job_id = %self.job_id, ?state, ?event, ?next, ?action, "Push link transition");
            state = next;

            event = match action {
                LinkAction::Dial => self.dial(&state, &mut pending).await,
                LinkAction::Serve => match pending.take() {
                    Some(channel) => {
                        self.report(LinkReport::Connected);
                        self.serve(channel).await;
                        self.report(LinkReport::Disconnected);
                        LinkEvent::Lost
                    }
                    None => LinkEvent::Lost,
                },
                LinkAction::Wait(delay) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => LinkEvent::Shutdown,
                        _ = tokio::time::sleep(delay) => LinkEvent::BackoffElapsed,
                    }
                }
                LinkAction::GiveUp => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        max_retries = self.policy.max_retries,
                        "Push channel retry budget exhausted",
                    );
                    self.report(LinkReport::Exhausted);
                    break;
                }
                LinkAction::Stop => break,
                LinkAction::Ignore => {
                    tracing::error!(job_id = %self.job_id, ?state, "Push link stalled");
                    break;
                }
            };
        }

        tracing::debug!(job_id = %self.job_id, "Push adapter exited");
    }

    /// Attempt one connection. Failures are reported, never returned.
    async fn dial(&self, state: &LinkState, pending: &mut Option<PushChannel>) -> LinkEvent {
        let retry = match state {
            LinkState::Connecting { retry } => *retry,
            _ => 0,
        };
        tracing::info!(job_id = %self.job_id, retry, "Connecting push channel");

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return LinkEvent::Shutdown,
            result = self.transport.connect(&self.job_id) => result,
        };

        match result {
            Ok(channel) => {
                *pending = Some(channel);
                LinkEvent::Opened
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, retry, error = %e, "Push connect failed");
                self.report(LinkReport::Disconnected);
                LinkEvent::Lost
            }
        }
    }

    /// Pump frames until the socket closes or the adapter is cancelled.
    async fn serve(&mut self, channel: PushChannel) {
        let PushChannel {
            mut outbound,
            mut inbound,
        } = channel;

        tracing::info!(job_id = %self.job_id, "Push channel connected");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    if tokio::time::timeout(CLOSE_TIMEOUT, outbound.close()).await.is_err() {
                        tracing::debug!(job_id = %self.job_id, "Push close handshake timed out");
                    }
                    break;
                }
                frame = inbound.next() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(e)) => {
                        tracing::warn!(job_id = %self.job_id, error = %e, "Push receive error");
                        break;
                    }
                    None => {
                        tracing::info!(job_id = %self.job_id, "Push channel closed");
                        break;
                    }
                },
                Some(text) = self.outbound_rx.recv() => {
                    if let Err(e) = outbound.send(text).await {
                        tracing::warn!(job_id = %self.job_id, error = %e, "Push send failed");
                        break;
                    }
                }
            }
        }
    }

    /// Parse one text frame and forward job updates. Bad frames are
    /// logged and dropped.
    fn handle_frame(&self, text: &str) {
        match parse_frame(text) {
            Ok(PushFrame::JobUpdate(payload)) => {
                let _ = self.events.send(TransportEvent::Update {
                    source: Source::Push,
                    payload,
                });
            }
            Ok(PushFrame::Ignored { kind }) => {
                tracing::debug!(job_id = %self.job_id, kind = %kind, "Ignoring push frame");
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    error = %e,
                    raw_message = %text,
                    "Failed to parse push frame",
                );
            }
        }
    }

    fn report(&self, report: LinkReport) {
        // The monitor may already be gone; nothing to do then.
        let _ = self.events.send(TransportEvent::Link(report));
    }
}
