//! REST binding for the generation service's HTTP gateway.
//!
//! Wraps the gateway routes (`POST /generate`, `GET /task/{id}`,
//! `GET /image/{id}`) using [`reqwest`]. JSON answers arrive in an
//! envelope of the shape `{"success", "data", "error", "timestamp"}`;
//! the image route answers with the raw payload bytes.

use std::time::Duration;

use async_trait::async_trait;
use sdgen_core::job::{JobHandle, JobRequest};
use serde::Deserialize;

use crate::service::{RemoteService, RemoteStatus, ServiceError};

/// HTTP client for one generation gateway.
pub struct GatewayApi {
    client: reqwest::Client,
    base_url: String,
}

/// Envelope wrapping every JSON answer from the gateway.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

/// Task record returned by `GET /task/{id}`. Only the fields the client
/// reads are declared.
#[derive(Debug, Deserialize)]
struct TaskRecord {
    status: TaskStatus,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl GatewayApi {
    /// Create a gateway client with default `reqwest` settings.
    ///
    /// * `base_url` - Gateway root, e.g. `http://127.0.0.1:4943`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a gateway client whose requests time out after `timeout`.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Unreachable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a gateway client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ---- private helpers ----

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Send a prepared request, mapping network failures and non-2xx
    /// statuses to [`ServiceError`].
    async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response, ServiceError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                message: rejection_message(&body),
            });
        }
        Ok(response)
    }

    /// Parse a JSON envelope and unwrap its `data` field.
    async fn parse_envelope<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ServiceError> {
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport_error)?;
        unwrap_envelope(status, &body)
    }
}

#[async_trait]
impl RemoteService for GatewayApi {
    async fn submit_job(&self, request: &JobRequest) -> Result<JobHandle, ServiceError> {
        let response =
            Self::send(self.client.post(self.endpoint("generate")).json(request)).await?;
        let task_id: String = Self::parse_envelope(response).await?;
        Ok(JobHandle::new(task_id))
    }

    async fn get_status(&self, handle: &JobHandle) -> Result<RemoteStatus, ServiceError> {
        let url = self.endpoint(&format!("task/{handle}"));
        let response = Self::send(self.client.get(url)).await?;
        let record: TaskRecord = Self::parse_envelope(response).await?;
        Ok(record.into_status())
    }

    async fn get_result(&self, handle: &JobHandle) -> Result<Vec<u8>, ServiceError> {
        let url = self.endpoint(&format!("image/{handle}"));
        let response = Self::send(self.client.get(url)).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

impl TaskRecord {
    fn into_status(self) -> RemoteStatus {
        match self.status {
            TaskStatus::Pending => RemoteStatus::Pending,
            TaskStatus::Processing => RemoteStatus::Processing,
            TaskStatus::Completed => RemoteStatus::Completed,
            TaskStatus::Failed => RemoteStatus::Failed(self.error),
        }
    }
}

fn transport_error(e: reqwest::Error) -> ServiceError {
    if e.is_decode() {
        ServiceError::InvalidResponse(e.to_string())
    } else {
        ServiceError::Unreachable(e.to_string())
    }
}

/// Decode an envelope body, turning `success: false` into a rejection.
fn unwrap_envelope<T: serde::de::DeserializeOwned>(
    status: u16,
    body: &[u8],
) -> Result<T, ServiceError> {
    let envelope: Envelope<T> = serde_json::from_slice(body)
        .map_err(|e| ServiceError::InvalidResponse(format!("malformed envelope: {e}")))?;

    match (envelope.success, envelope.data) {
        (true, Some(data)) => Ok(data),
        (true, None) => Err(ServiceError::InvalidResponse(
            "envelope reported success without data".to_string(),
        )),
        (false, _) => Err(ServiceError::Rejected {
            status,
            message: envelope
                .error
                .unwrap_or_else(|| "request was not successful".to_string()),
        }),
    }
}

/// Prefer the envelope's `error` text when a failure body carries one.
fn rejection_message(body: &str) -> String {
    serde_json::from_str::<Envelope<serde_json::Value>>(body)
        .ok()
        .and_then(|env| env.error)
        .unwrap_or_else(|| body.to_string())
}
