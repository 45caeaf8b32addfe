//! Client and monitor configuration.
//!
//! Both structs can be built in code or loaded from environment
//! variables. Connection details ([`ClientConfig`]) are kept apart from
//! timing policy ([`MonitorConfig`]) so tests can shrink intervals
//! without touching URLs.

use std::time::Duration;

use crate::reconnect::RetryPolicy;

/// Default interval between two status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Default bound on waiting for the socket before polling kicks in.
pub const DEFAULT_FALLBACK_AFTER: Duration = Duration::from_secs(5);

/// How `cancel_job` orders the cancel request and the local snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelMode {
    /// Emit the "Cancelled by user" snapshot only after the backend
    /// accepted the cancel request.
    #[default]
    Confirmed,
    /// Emit the snapshot first, then send the request. A failed request
    /// is reported to the caller but local state is not reverted.
    Optimistic,
}

impl CancelMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "confirmed" => Some(CancelMode::Confirmed),
            "optimistic" => Some(CancelMode::Optimistic),
            _ => None,
        }
    }
}

/// Timing and behaviour knobs of a [`JobMonitor`](crate::JobMonitor).
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between status polls while the socket is down.
    pub poll_interval: Duration,
    /// Reconnect budget of the push channel.
    pub retry: RetryPolicy,
    /// Start polling if the socket has not connected within this bound.
    pub fallback_after: Duration,
    pub cancel_mode: CancelMode,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry: RetryPolicy::default(),
            fallback_after: DEFAULT_FALLBACK_AFTER,
            cancel_mode: CancelMode::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default     |
    /// |--------------------------------|-------------|
    /// | `JOBSYNC_POLL_INTERVAL_MS`     | `2000`      |
    /// | `JOBSYNC_WS_MAX_RETRIES`       | `5`         |
    /// | `JOBSYNC_WS_RETRY_INTERVAL_MS` | `3000`      |
    /// | `JOBSYNC_FALLBACK_AFTER_MS`    | `5000`      |
    /// | `JOBSYNC_CANCEL_MODE`          | `confirmed` |
    ///
    /// Unparsable values fall back to the default with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let poll_interval = env_millis("JOBSYNC_POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval);
        let max_retries = env_parsed("JOBSYNC_WS_MAX_RETRIES").unwrap_or(defaults.retry.max_retries);
        let retry_interval =
            env_millis("JOBSYNC_WS_RETRY_INTERVAL_MS").unwrap_or(defaults.retry.interval);
        let fallback_after =
            env_millis("JOBSYNC_FALLBACK_AFTER_MS").unwrap_or(defaults.fallback_after);

        let cancel_mode = match std::env::var("JOBSYNC_CANCEL_MODE") {
            Ok(raw) => CancelMode::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Unknown JOBSYNC_CANCEL_MODE, using default");
                defaults.cancel_mode
            }),
            Err(_) => defaults.cancel_mode,
        };

        Self {
            poll_interval,
            retry: RetryPolicy {
                max_retries,
                interval: retry_interval,
            },
            fallback_after,
            cancel_mode,
        }
    }
}

/// Where the backend lives and how to authenticate against it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base HTTP API URL, e.g. `https://host/api`.
    pub api_url: String,
    /// Base WebSocket URL, e.g. `wss://host`.
    pub ws_url: String,
    /// Bearer token for every REST call and the socket upgrade.
    pub token: Option<String>,
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var           | Required | Default                          |
    /// |-------------------|----------|----------------------------------|
    /// | `JOBSYNC_API_URL` | yes      | --                               |
    /// | `JOBSYNC_WS_URL`  | no       | derived from `JOBSYNC_API_URL`   |
    /// | `JOBSYNC_TOKEN`   | no       | --                               |
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = std::env::var("JOBSYNC_API_URL")
            .map_err(|_| ConfigError::Missing("JOBSYNC_API_URL"))?;

        let ws_url = match std::env::var("JOBSYNC_WS_URL") {
            Ok(url) => url,
            Err(_) => derive_ws_url(&api_url).ok_or_else(|| ConfigError::Invalid {
                name: "JOBSYNC_API_URL",
                reason: format!("cannot derive a WebSocket URL from '{api_url}'"),
            })?,
        };

        let token = std::env::var("JOBSYNC_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        Ok(Self {
            api_url,
            ws_url,
            token,
        })
    }
}

/// Map `http(s)://host[:port]/path` to `ws(s)://host[:port]`.
pub fn derive_ws_url(api_url: &str) -> Option<String> {
    let (scheme, rest) = api_url.split_once("://")?;
    let ws_scheme = match scheme {
        "http" => "ws",
        "https" => "wss",
        _ => return None,
    };
    let authority = rest.split('/').next().filter(|a| !a.is_empty())?;
    Some(format!("{ws_scheme}://{authority}"))
}

fn env_parsed<T: std::str::FromStr>(name: &'static str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(name, value = %raw, "Ignoring unparsable setting");
            None
        }
    }
}

fn env_millis(name: &'static str) -> Option<Duration> {
    env_parsed::<u64>(name).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.interval, Duration::from_secs(3));
        assert_eq!(config.fallback_after, Duration::from_secs(5));
        assert_eq!(config.cancel_mode, CancelMode::Confirmed);
    }

    #[test]
    fn ws_url_is_derived_from_api_url() {
        assert_eq!(
            derive_ws_url("http://localhost:8000/api").as_deref(),
            Some("ws://localhost:8000")
        );
        assert_eq!(
            derive_ws_url("https://studio.example.com/api/v1").as_deref(),
            Some("wss://studio.example.com")
        );
        assert_eq!(derive_ws_url("ftp://host"), None);
        assert_eq!(derive_ws_url("http://"), None);
        assert_eq!(derive_ws_url("no-scheme"), None);
    }

    #[test]
    fn cancel_mode_parses_known_values() {
        assert_eq!(CancelMode::parse("Optimistic"), Some(CancelMode::Optimistic));
        assert_eq!(CancelMode::parse(" confirmed "), Some(CancelMode::Confirmed));
        assert_eq!(CancelMode::parse("eager"), None);
    }
}
