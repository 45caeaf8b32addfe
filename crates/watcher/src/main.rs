//! `jobsync-watcher` -- follow one generation job until it finishes.
//!
//! Submits a new job (or attaches to an existing one), logs every status
//! update received over the push channel or the polling fallback, and
//! exits with the job's outcome.
//!
//! # Environment variables
//!
//! | Variable             | Required | Default | Description                                  |
//! |----------------------|----------|---------|----------------------------------------------|
//! | `JOBSYNC_API_URL`    | yes      | --      | REST base URL, e.g. `https://host/api`       |
//! | `JOBSYNC_WS_URL`     | no       | derived | WebSocket base URL, e.g. `wss://host`        |
//! | `JOBSYNC_TOKEN`      | no       | --      | Bearer token for REST and the socket upgrade |
//! | `JOBSYNC_PROJECT_ID` | one of   | --      | Submit a new job for this project            |
//! | `JOBSYNC_JOB_ID`     | one of   | --      | Watch an existing job                        |
//! | `JOBSYNC_LOG_FORMAT` | no       | `text`  | `json` for machine-readable logs             |
//!
//! Timing knobs are read by [`MonitorConfig::from_env`].
//!
//! Exit codes: `0` completed, `1` failed or could not start, `2` invalid
//! configuration, `130` interrupted.

use jobsync_monitor::{ClientConfig, JobMonitor, MonitorConfig};
use jobsync_watcher::{run, WatchTarget};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code for configuration errors.
const EXIT_CONFIG: i32 = 2;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let json_logs = std::env::var("JOBSYNC_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobsync_watcher=info,jobsync_monitor=info".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    let client = ClientConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid client configuration");
        std::process::exit(EXIT_CONFIG);
    });

    let target = WatchTarget::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Nothing to watch");
        std::process::exit(EXIT_CONFIG);
    });

    let config = MonitorConfig::from_env();

    tracing::info!(
        api_url = %client.api_url,
        ws_url = %client.ws_url,
        authenticated = client.token.is_some(),
        ?target,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Starting jobsync-watcher",
    );

    let monitor = JobMonitor::from_config(&client, config);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let code = match run(&monitor, target, shutdown).await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to start monitoring");
            1
        }
    };

    monitor.stop();
    std::process::exit(code);
}
