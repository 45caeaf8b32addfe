//! WebSocket connector for the job status push endpoint.
//!
//! [`PushTransport`] is the seam between the push adapter and the
//! network: it opens one [`PushChannel`] per job. [`WsConnector`] is the
//! `tokio-tungstenite` implementation; tests plug in channel-backed
//! fakes.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Sink, SinkExt, StreamExt};
use jobsync_core::types::JobId;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

/// Outbound half of a push channel: accepts text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a push channel: yields text frames until the
/// connection closes. Control and binary frames are filtered out.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// A live connection to the push endpoint of one job.
pub struct PushChannel {
    pub outbound: FrameSink,
    pub inbound: FrameStream,
}

/// Opens push channels.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, job_id: &JobId) -> Result<PushChannel, TransportError>;
}

/// Errors that can occur on the push channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to establish the connection.
    #[error("Connection error: {0}")]
    Connect(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The channel has been shut down.
    #[error("Channel closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

/// Connection settings for the status push endpoint.
///
/// Each job gets its own socket at `{ws_url}/ws/jobs/{job_id}`.
pub struct WsConnector {
    ws_url: String,
    token: Option<String>,
}

impl WsConnector {
    /// * `ws_url` - WebSocket base URL, e.g. `wss://host`.
    /// * `token`  - Bearer token sent with the upgrade request, if any.
    pub fn new(ws_url: String, token: Option<String>) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Endpoint URL for one job.
    pub fn job_url(&self, job_id: &JobId) -> String {
        format!("{}/ws/jobs/{}", self.ws_url, job_id)
    }
}

#[async_trait]
impl PushTransport for WsConnector {
    async fn connect(&self, job_id: &JobId) -> Result<PushChannel, TransportError> {
        let url = self.job_url(job_id);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("Invalid push URL {url}: {e}")))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::Connect(format!("Invalid bearer token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(format!("Failed to connect to {url}: {e}")))?;

        tracing::debug!(job_id = %job_id, url = %url, "Push socket open");

        let (sink, stream) = ws_stream.split();

        let outbound: FrameSink = Box::pin(
            sink.sink_map_err(TransportError::from)
                .with(|text: String| futures::future::ready(Ok::<_, TransportError>(Message::Text(text)))),
        );

        let inbound: FrameStream = stream
            .filter_map(|msg| {
                futures::future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "Push socket closed by server");
                        None
                    }
                    // Ping/pong are answered by tungstenite; binary frames carry nothing for us.
                    Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                        None
                    }
                    Err(e) => Some(Err(TransportError::from(e))),
                })
            })
            .boxed();

        Ok(PushChannel { outbound, inbound })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_url_is_scoped_per_job() {
        let connector = WsConnector::new("wss://studio.example.com/".into(), None);
        assert_eq!(
            connector.job_url(&JobId::new("job_abc123")),
            "wss://studio.example.com/ws/jobs/job_abc123"
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_connect_error() {
        // Port 9 (discard) is not serving WebSocket on loopback.
        let connector = WsConnector::new("ws://127.0.0.1:9".into(), None);
        let result = connector.connect(&JobId::new("j1")).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
