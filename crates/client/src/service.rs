//! The capability surface the job client talks through.
//!
//! Anything that can submit a job, report its status and hand back the
//! result bytes is a [`RemoteService`]. Transport and encoding are the
//! implementor's business.

use std::sync::Arc;

use async_trait::async_trait;
use sdgen_core::job::{JobHandle, JobRequest};

/// Status as reported by the service, before the client interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Pending,
    Processing,
    Completed,
    /// Failed, with the service's reason if it gave one.
    Failed(Option<String>),
}

/// Failures a [`RemoteService`] call can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The service could not be reached (connect, DNS, TLS, timeout).
    #[error("Service unreachable: {0}")]
    Unreachable(String),

    /// The service answered with a non-success status.
    #[error("Service rejected the request ({status}): {message}")]
    Rejected {
        /// HTTP-style status code.
        status: u16,
        /// Service-provided reason or raw body.
        message: String,
    },

    /// The service does not know the job handle.
    #[error("Job not found")]
    NotFound,

    /// The service answered, but the body could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// A remote job runner with the three-operation contract.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Queue a job and return the handle the service assigned to it.
    async fn submit_job(&self, request: &JobRequest) -> Result<JobHandle, ServiceError>;

    /// Report the job's current status.
    async fn get_status(&self, handle: &JobHandle) -> Result<RemoteStatus, ServiceError>;

    /// Download the job's result payload.
    async fn get_result(&self, handle: &JobHandle) -> Result<Vec<u8>, ServiceError>;
}

#[async_trait]
impl<T: RemoteService + ?Sized> RemoteService for Arc<T> {
    async fn submit_job(&self, request: &JobRequest) -> Result<JobHandle, ServiceError> {
        (**self).submit_job(request).await
    }

    async fn get_status(&self, handle: &JobHandle) -> Result<RemoteStatus, ServiceError> {
        (**self).get_status(handle).await
    }

    async fn get_result(&self, handle: &JobHandle) -> Result<Vec<u8>, ServiceError> {
        (**self).get_result(handle).await
    }
}
