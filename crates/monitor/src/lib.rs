//! Job status synchronization client.
//!
//! Tracks one remote generation job over two transports: a WebSocket
//! push channel (primary) and REST polling (fallback). Updates from both
//! are normalized into [`JobStatus`](jobsync_core::job_status::JobStatus)
//! snapshots and merged by the [`reconciler`] into one authoritative
//! current status, published by [`JobMonitor`](monitor::JobMonitor).

pub mod api;
pub mod clock;
pub mod config;
pub mod events;
pub mod messages;
pub mod monitor;
pub mod polling;
pub mod push;
pub mod reconciler;
pub mod reconnect;
pub mod subscription;
pub mod transport;

pub use api::{ApiError, JobApi, JobBackend};
pub use config::{CancelMode, ClientConfig, MonitorConfig};
pub use events::MonitorEvent;
pub use monitor::{JobMonitor, MonitorError};
pub use reconciler::MonitorPhase;
pub use subscription::Subscription;
pub use transport::{PushTransport, TransportError, WsConnector};
