//! HTTP API client for the job backend.
//!
//! Wraps the three REST endpoints the monitor needs (`POST /jobs`,
//! `GET /jobs/{id}`, `POST /jobs/{id}/cancel`) using [`reqwest`]. The
//! bearer token is handed in at construction time; nothing here reads
//! ambient credentials.

use async_trait::async_trait;
use jobsync_core::job_status::StatusPayload;
use jobsync_core::types::JobId;
use serde::{Deserialize, Serialize};

/// The backend operations the monitor depends on.
///
/// [`JobApi`] is the production implementation; tests substitute
/// in-memory fakes.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Create a job for a project and return its identifier.
    async fn submit_job(&self, project_id: &str) -> Result<JobId, ApiError>;

    /// Fetch the current status body of a job.
    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusPayload, ApiError>;

    /// Ask the backend to cancel a job.
    async fn cancel_job(&self, job_id: &JobId) -> Result<(), ApiError>;
}

/// HTTP client for one backend base URL.
pub struct JobApi {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

/// Request body of `POST /jobs`.
#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    project_id: &'a str,
}

/// Response returned by `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the new job.
    pub job_id: String,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend rejected the bearer token (HTTP 401).
    #[error("Unauthorized: {body}")]
    Unauthorized { body: String },

    /// The backend returned any other non-2xx status code.
    #[error("Job API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl JobApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `https://host/api`.
    /// * `token`   - Bearer token sent on every request, if any.
    pub fn new(api_url: String, token: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, token)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, token: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Base HTTP API URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError`] carrying the
    /// status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized { body });
        }
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl JobBackend for JobApi {
    /// Sends `POST /jobs` with the project identifier.
    async fn submit_job(&self, project_id: &str) -> Result<JobId, ApiError> {
        let response = self
            .authorize(self.client.post(format!("{}/jobs", self.api_url)))
            .json(&SubmitRequest { project_id })
            .send()
            .await?;

        let body: SubmitResponse = Self::parse_response(response).await?;
        tracing::info!(project_id, job_id = %body.job_id, "Job submitted");
        Ok(JobId::new(body.job_id))
    }

    /// Sends `GET /jobs/{job_id}`.
    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusPayload, ApiError> {
        let response = self
            .authorize(self.client.get(format!("{}/jobs/{}", self.api_url, job_id)))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Sends `POST /jobs/{job_id}/cancel`, discarding the body.
    async fn cancel_job(&self, job_id: &JobId) -> Result<(), ApiError> {
        let response = self
            .authorize(
                self.client
                    .post(format!("{}/jobs/{}/cancel", self.api_url, job_id)),
            )
            .send()
            .await?;

        Self::ensure_success(response).await?;
        tracing::info!(job_id = %job_id, "Job cancellation accepted");
        Ok(())
    }
}
