//! Submit / poll / fetch lifecycle for remote generation jobs.
//!
//! [`JobClient`] owns a [`RemoteService`] and tracks the lifecycle state
//! of every handle it has issued. The only retry anywhere in the client
//! is the bounded poll loop in [`JobClient::await_completion_with_cancel`];
//! every other operation makes exactly one service call (or none, when the
//! local state already rules the call out).

use std::collections::HashMap;

use sdgen_core::job::{JobHandle, JobRequest, JobState, JobStatus, RetryPolicy};
use tokio_util::sync::CancellationToken;

use crate::retry::{pause, Sleeper, TokioSleeper};
use crate::service::{RemoteService, RemoteStatus, ServiceError};

/// Largest result payload accepted by default (10 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Reason used when the service marks a job failed without saying why.
const UNSPECIFIED_FAILURE: &str = "job failed without a reason";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from [`JobClient::submit`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The service could not be reached or its answer was unreadable.
    #[error("Transport failure while submitting: {0}")]
    TransportFailure(String),

    /// The service refused the request.
    #[error("Request rejected by service ({code}): {message}")]
    RejectedByService { code: u16, message: String },
}

/// Errors from [`JobClient::poll`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("Transport failure while polling: {0}")]
    TransportFailure(String),

    /// Neither this client nor the service knows the handle.
    #[error("Unknown job handle {0}")]
    UnknownHandle(JobHandle),

    /// The handle timed out or was cancelled; polling it again is refused.
    #[error("Job handle {0} is closed and may not be polled again")]
    HandleClosed(JobHandle),
}

/// Errors from [`JobClient::await_completion`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AwaitError {
    /// The service reported the job as failed. Terminal.
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// The retry budget ran out while the job was still pending. Terminal
    /// for this handle; resubmit to try again.
    #[error("Job did not complete within {attempts} status checks")]
    Timeout { attempts: u32 },

    /// The cancellation token fired between attempts.
    #[error("Waiting for the job was cancelled")]
    Cancelled,

    #[error("Unknown job handle {0}")]
    UnknownHandle(JobHandle),
}

/// Errors from [`JobClient::fetch`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Transport failure while fetching: {0}")]
    TransportFailure(String),

    /// The service answered with zero bytes.
    #[error("Service returned an empty payload")]
    EmptyPayload,

    /// `fetch` was called before a successful `await_completion` for this
    /// handle (or for a handle this client never issued).
    #[error("Job {0} has not completed")]
    HandleNotCompleted(JobHandle),

    #[error("Result rejected by service ({code}): {message}")]
    RejectedByService { code: u16, message: String },

    #[error("Payload of {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Any failure along the full [`JobClient::generate`] run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Await(#[from] AwaitError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Drives jobs through their lifecycle against one [`RemoteService`].
///
/// Single-caller: operations that change lifecycle state take `&mut self`
/// and no locking happens internally.
pub struct JobClient<S, Z = TokioSleeper> {
    service: S,
    sleeper: Z,
    jobs: HashMap<JobHandle, JobState>,
    max_payload_bytes: usize,
}

impl<S: RemoteService> JobClient<S, TokioSleeper> {
    /// Create a client that waits with real tokio timers.
    pub fn new(service: S) -> Self {
        Self::with_sleeper(service, TokioSleeper)
    }
}

impl<S: RemoteService, Z: Sleeper> JobClient<S, Z> {
    /// Create a client with a custom delay source.
    pub fn with_sleeper(service: S, sleeper: Z) -> Self {
        Self {
            service,
            sleeper,
            jobs: HashMap::new(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    /// Override the payload size cap enforced by [`fetch`](Self::fetch).
    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn sleeper(&self) -> &Z {
        &self.sleeper
    }

    /// Lifecycle state of a handle; `None` if this client never issued it.
    pub fn state(&self, handle: &JobHandle) -> Option<&JobState> {
        self.jobs.get(handle)
    }

    /// Submit a job. Exactly one service call.
    pub async fn submit(&mut self, request: JobRequest) -> Result<JobHandle, SubmitError> {
        let handle = self
            .service
            .submit_job(&request)
            .await
            .map_err(|e| match e {
                ServiceError::Unreachable(msg) | ServiceError::InvalidResponse(msg) => {
                    SubmitError::TransportFailure(msg)
                }
                ServiceError::Rejected { status, message } => SubmitError::RejectedByService {
                    code: status,
                    message,
                },
                ServiceError::NotFound => SubmitError::RejectedByService {
                    code: 404,
                    message: "submission endpoint not found".to_string(),
                },
            })?;

        tracing::info!(
            handle = %handle,
            width = request.width(),
            height = request.height(),
            steps = request.steps(),
            "Job submitted",
        );

        self.jobs.insert(handle.clone(), JobState::Submitted);
        Ok(handle)
    }

    /// One status check. Never retries and never changes lifecycle state.
    ///
    /// A handle already known to be `Completed` or `Failed` reports that
    /// outcome without asking the service, so a status never moves back.
    pub async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, PollError> {
        match self.jobs.get(handle) {
            None => return Err(PollError::UnknownHandle(handle.clone())),
            Some(JobState::TimedOut { .. } | JobState::Cancelled) => {
                return Err(PollError::HandleClosed(handle.clone()))
            }
            Some(JobState::Completed) => return Ok(JobStatus::Completed),
            Some(JobState::Failed(reason)) => return Ok(JobStatus::Failed(reason.clone())),
            Some(JobState::Submitted) => {}
        }

        let status = self
            .service
            .get_status(handle)
            .await
            .map_err(|e| match e {
                ServiceError::NotFound => PollError::UnknownHandle(handle.clone()),
                other => PollError::TransportFailure(other.to_string()),
            })?;

        Ok(match status {
            RemoteStatus::Pending | RemoteStatus::Processing => JobStatus::Pending,
            RemoteStatus::Completed => JobStatus::Completed,
            RemoteStatus::Failed(reason) => {
                JobStatus::Failed(reason.unwrap_or_else(|| UNSPECIFIED_FAILURE.to_string()))
            }
        })
    }

    /// Poll until the job completes, fails, or `policy` runs out.
    pub async fn await_completion(
        &mut self,
        handle: &JobHandle,
        policy: RetryPolicy,
    ) -> Result<(), AwaitError> {
        self.await_completion_with_cancel(handle, policy, &CancellationToken::new())
            .await
    }

    /// Poll until the job completes, fails, `policy` runs out, or `cancel`
    /// fires.
    ///
    /// Makes at most `policy.max_attempts()` status checks, sleeping
    /// `policy.delay()` between consecutive ones (never after the last).
    /// Transport failures consume an attempt but do not end the loop.
    pub async fn await_completion_with_cancel(
        &mut self,
        handle: &JobHandle,
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<(), AwaitError> {
        match self.jobs.get(handle) {
            None => return Err(AwaitError::UnknownHandle(handle.clone())),
            Some(JobState::Submitted) => {}
            Some(JobState::Completed) => return Ok(()),
            Some(JobState::Failed(reason)) => return Err(AwaitError::JobFailed(reason.clone())),
            Some(JobState::TimedOut { attempts }) => {
                return Err(AwaitError::Timeout {
                    attempts: *attempts,
                })
            }
            Some(JobState::Cancelled) => return Err(AwaitError::Cancelled),
        }

        let max_attempts = policy.max_attempts();

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(self.cancelled(handle, attempt));
            }

            match self.poll(handle).await {
                Ok(JobStatus::Completed) => {
                    tracing::info!(handle = %handle, attempt, "Job completed");
                    self.transition(handle, JobState::Completed);
                    return Ok(());
                }
                Ok(JobStatus::Failed(reason)) => {
                    tracing::warn!(handle = %handle, attempt, reason = %reason, "Job failed");
                    self.transition(handle, JobState::Failed(reason.clone()));
                    return Err(AwaitError::JobFailed(reason));
                }
                Ok(JobStatus::Pending) => {
                    tracing::debug!(handle = %handle, attempt, max_attempts, "Job still pending");
                }
                Err(PollError::TransportFailure(e)) => {
                    tracing::warn!(
                        handle = %handle,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Status check failed",
                    );
                }
                Err(PollError::UnknownHandle(h)) => return Err(AwaitError::UnknownHandle(h)),
                Err(PollError::HandleClosed(_)) => return Err(AwaitError::Cancelled),
            }

            if attempt < max_attempts && !pause(&self.sleeper, policy.delay(), cancel).await {
                return Err(self.cancelled(handle, attempt));
            }
        }

        tracing::warn!(handle = %handle, max_attempts, "Job timed out");
        self.transition(
            handle,
            JobState::TimedOut {
                attempts: max_attempts,
            },
        );
        Err(AwaitError::Timeout {
            attempts: max_attempts,
        })
    }

    /// Download the result of a completed job. Exactly one service call,
    /// or none if the handle is not in the `Completed` state.
    pub async fn fetch(&self, handle: &JobHandle) -> Result<Vec<u8>, FetchError> {
        if self.jobs.get(handle) != Some(&JobState::Completed) {
            return Err(FetchError::HandleNotCompleted(handle.clone()));
        }

        let bytes = self
            .service
            .get_result(handle)
            .await
            .map_err(|e| match e {
                ServiceError::Rejected { status, message } => {
                    FetchError::RejectedByService { code: status, message }
                }
                ServiceError::NotFound => FetchError::RejectedByService {
                    code: 404,
                    message: "result not found".to_string(),
                },
                other => FetchError::TransportFailure(other.to_string()),
            })?;

        if bytes.is_empty() {
            return Err(FetchError::EmptyPayload);
        }
        if bytes.len() > self.max_payload_bytes {
            return Err(FetchError::PayloadTooLarge {
                len: bytes.len(),
                max: self.max_payload_bytes,
            });
        }

        tracing::info!(handle = %handle, bytes = bytes.len(), "Fetched job result");
        Ok(bytes)
    }

    /// Submit, wait and fetch in one go.
    pub async fn generate(
        &mut self,
        request: JobRequest,
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<(JobHandle, Vec<u8>), JobError> {
        let handle = self.submit(request).await?;
        self.await_completion_with_cancel(&handle, policy, cancel)
            .await?;
        let bytes = self.fetch(&handle).await?;
        Ok((handle, bytes))
    }

    // ---- private helpers ----

    /// Move `handle` forward; terminal states are never left.
    fn transition(&mut self, handle: &JobHandle, next: JobState) {
        if let Some(state) = self.jobs.get_mut(handle) {
            if state.can_transition_to(&next) {
                *state = next;
            }
        }
    }

    fn cancelled(&mut self, handle: &JobHandle, attempt: u32) -> AwaitError {
        tracing::info!(handle = %handle, attempt, "Waiting for job cancelled");
        self.transition(handle, JobState::Cancelled);
        AwaitError::Cancelled
    }
}
