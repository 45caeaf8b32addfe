//! Polling adapter: the fallback channel.
//!
//! Fetches `GET /jobs/{id}` on a fixed interval while the push channel
//! is down. The first request goes out as soon as the adapter starts.
//! A failed request is logged and the loop carries on with the next
//! tick; polling only ends when the adapter is stopped.

use std::sync::Arc;
use std::time::Duration;

use jobsync_core::types::JobId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::JobBackend;
use crate::events::{Source, TransportEvent};

/// Handle to a running polling loop. Dropping it stops the loop.
pub struct PollingAdapter {
    job_id: JobId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollingAdapter {
    /// Start polling the status of `job_id`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        job_id: JobId,
        backend: Arc<dyn JobBackend>,
        interval: Duration,
        events: mpsc::UnboundedSender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Self {
        tracing::info!(job_id = %job_id, interval_ms = interval.as_millis() as u64, "Starting status polling");

        let task = tokio::spawn(run(
            job_id.clone(),
            backend,
            interval,
            events,
            cancel.clone(),
        ));

        Self {
            job_id,
            cancel,
            task,
        }
    }

    /// Stop polling. No further request is issued once this returns.
    /// Safe to call repeatedly.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(job_id = %self.job_id, "Stopping status polling");
        }
        self.cancel.cancel();
    }

    /// `true` once the polling task has exited.
    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollingAdapter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    job_id: JobId,
    backend: Arc<dyn JobBackend>,
    interval: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = backend.fetch_status(&job_id) => result,
        };

        match result {
            Ok(payload) => {
                let event = TransportEvent::Update {
                    source: Source::Poll,
                    payload,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Status poll failed, retrying next tick");
            }
        }
    }

    tracing::debug!(job_id = %job_id, "Polling adapter exited");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use jobsync_core::job_status::StatusPayload;
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::api::ApiError;

    /// Backend whose every second status request fails.
    #[derive(Default)]
    struct Flaky {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl JobBackend for Flaky {
        async fn submit_job(&self, _project_id: &str) -> Result<JobId, ApiError> {
            unreachable!("polling never submits")
        }

        async fn fetch_status(&self, job_id: &JobId) -> Result<StatusPayload, ApiError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 1 {
                return Err(ApiError::Status {
                    status: 503,
                    body: "busy".to_string(),
                });
            }
            Ok(serde_json::from_value(serde_json::json!({
                "job_id": job_id,
                "status": "processing",
                "progress": n * 10,
            }))
            .unwrap())
        }

        async fn cancel_job(&self, _job_id: &JobId) -> Result<(), ApiError> {
            unreachable!("polling never cancels")
        }
    }

    fn start(backend: &Arc<Flaky>) -> (PollingAdapter, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = PollingAdapter::spawn(
            JobId::new("job_abc123"),
            backend.clone(),
            Duration::from_secs(2),
            tx,
            CancellationToken::new(),
        );
        (adapter, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn failed_polls_are_skipped_until_the_next_tick() {
        let backend = Arc::new(Flaky::default());
        let (_adapter, mut rx) = start(&backend);

        assert_matches!(
            rx.recv().await,
            Some(TransportEvent::Update { source: Source::Poll, payload }) if payload.progress == 0.0
        );
        assert_matches!(
            rx.recv().await,
            Some(TransportEvent::Update { payload, .. }) if payload.progress == 20.0
        );
        assert_eq!(backend.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_ends_the_loop() {
        let backend = Arc::new(Flaky::default());
        let (adapter, mut rx) = start(&backend);
        assert_matches!(rx.recv().await, Some(TransportEvent::Update { .. }));

        adapter.stop();
        adapter.stop();
        for _ in 0..10 {
            if adapter.is_stopped() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(adapter.is_stopped());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.polls.load(Ordering::SeqCst), 1);
        assert_matches!(rx.try_recv(), Err(TryRecvError::Disconnected));
    }
}
