//! `JobApi` against an in-process HTTP server.

use std::sync::Arc;

use assert_matches::assert_matches;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use jobsync_core::job_status::JobState;
use jobsync_core::types::JobId;
use jobsync_monitor::api::{ApiError, JobApi, JobBackend};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Requests seen by the test server.
#[derive(Default)]
struct Recorded {
    auth: Mutex<Vec<Option<String>>>,
    bodies: Mutex<Vec<Value>>,
    cancelled: Mutex<Vec<String>>,
}

impl Recorded {
    fn note(&self, headers: &HeaderMap) {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.auth.lock().push(auth);
    }
}

async fn submit(
    State(rec): State<Arc<Recorded>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    rec.note(&headers);
    rec.bodies.lock().push(body);
    Json(json!({ "job_id": "job_abc123" }))
}

async fn status(
    State(rec): State<Arc<Recorded>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Json<Value> {
    rec.note(&headers);
    Json(json!({
        "job_id": id,
        "status": "generating_images",
        "progress": 42.6,
        "updated_at": "2026-01-01T00:00:05Z",
    }))
}

async fn cancel(
    State(rec): State<Arc<Recorded>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> StatusCode {
    rec.note(&headers);
    rec.cancelled.lock().push(id);
    StatusCode::NO_CONTENT
}

/// Serve `app` under `/api` on an ephemeral port and return the base URL.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().nest("/api", app);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api")
}

async fn backend() -> (Arc<Recorded>, String) {
    let rec = Arc::new(Recorded::default());
    let app = Router::new()
        .route("/jobs", post(submit))
        .route("/jobs/{id}", get(status))
        .route("/jobs/{id}/cancel", post(cancel))
        .with_state(rec.clone());
    (rec, serve(app).await)
}

#[tokio::test]
async fn submit_posts_project_id_with_bearer_token() {
    let (rec, base) = backend().await;
    let api = JobApi::new(format!("{base}/"), Some("secret".into()));

    let job_id = api.submit_job("proj_1").await.unwrap();

    assert_eq!(job_id, JobId::new("job_abc123"));
    assert_eq!(rec.bodies.lock().as_slice(), [json!({ "project_id": "proj_1" })]);
    assert_eq!(rec.auth.lock().as_slice(), [Some("Bearer secret".to_string())]);
}

#[tokio::test]
async fn fetch_status_returns_the_payload() {
    let (rec, base) = backend().await;
    let api = JobApi::new(base, None);

    let payload = api.fetch_status(&JobId::new("job_abc123")).await.unwrap();
    assert_eq!(payload.job_id, "job_abc123");
    assert_eq!(payload.status, "generating_images");
    assert!(payload.updated_at.is_some());

    let snapshot = payload.into_snapshot(chrono::Utc::now()).unwrap();
    assert_eq!(snapshot.state, JobState::Other("generating_images".into()));
    assert_eq!(snapshot.progress, 43);
    assert_eq!(rec.auth.lock().as_slice(), [None]);
}

#[tokio::test]
async fn cancel_accepts_an_empty_success_response() {
    let (rec, base) = backend().await;
    let api = JobApi::new(base, Some("secret".into()));

    api.cancel_job(&JobId::new("job_abc123")).await.unwrap();
    assert_eq!(rec.cancelled.lock().as_slice(), ["job_abc123"]);
}

#[tokio::test]
async fn unauthorized_is_reported_separately() {
    let app = Router::new().route(
        "/jobs/{id}",
        get(|| async { (StatusCode::UNAUTHORIZED, "token expired") }),
    );
    let api = JobApi::new(serve(app).await, Some("stale".into()));

    let err = api.fetch_status(&JobId::new("job_abc123")).await.unwrap_err();
    assert_matches!(err, ApiError::Unauthorized { body } if body == "token expired");
}

#[tokio::test]
async fn other_failures_carry_status_and_body() {
    let app = Router::new().route(
        "/jobs",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
    );
    let api = JobApi::new(serve(app).await, None);

    let err = api.submit_job("proj_1").await.unwrap_err();
    assert_matches!(err, ApiError::Status { status: 503, body } if body == "maintenance");
}

#[tokio::test]
async fn unknown_job_is_a_404_status_error() {
    let (_rec, base) = backend().await;
    let api = JobApi::new(base, None);

    let err = api.cancel_job(&JobId::new("job_abc123/extra")).await.unwrap_err();
    assert_matches!(err, ApiError::Status { status: 404, .. });
}

#[tokio::test]
async fn unreachable_backend_is_a_request_error() {
    let api = JobApi::new("http://127.0.0.1:9/api".into(), None);
    let err = api.fetch_status(&JobId::new("job_abc123")).await.unwrap_err();
    assert_matches!(err, ApiError::Request(_));
}
