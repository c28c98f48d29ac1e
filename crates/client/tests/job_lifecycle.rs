//! Integration tests for the job lifecycle against the in-memory service.
//!
//! Every test uses [`InstantSleeper`], so the retry budget is exercised
//! without real delays.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use sdgen_client::client::{AwaitError, FetchError, JobClient, JobError, PollError, SubmitError};
use sdgen_client::memory::InMemoryService;
use sdgen_client::retry::InstantSleeper;
use sdgen_client::service::{RemoteStatus, ServiceError};
use sdgen_core::job::{GenerationParams, JobHandle, JobRequest, JobState, JobStatus, RetryPolicy};
use tokio_util::sync::CancellationToken;

fn request() -> JobRequest {
    JobRequest::new(GenerationParams::with_prompt("x")).expect("valid request")
}

fn no_delay(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::ZERO).expect("valid policy")
}

fn client_for(service: &Arc<InMemoryService>) -> JobClient<Arc<InMemoryService>, InstantSleeper> {
    JobClient::with_sleeper(Arc::clone(service), InstantSleeper::new())
}

// ---------------------------------------------------------------------------
// Test: retry budget
// ---------------------------------------------------------------------------

/// An always-pending job times out after exactly `max_attempts` polls.
#[tokio::test]
async fn always_pending_times_out_after_exactly_three_polls() {
    let service = Arc::new(InMemoryService::new().with_status_script([Ok(RemoteStatus::Pending)]));
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();

    let result = client.await_completion(&handle, no_delay(3)).await;

    assert_matches!(result, Err(AwaitError::Timeout { attempts: 3 }));
    assert_eq!(service.status_calls(), 3);
    assert_eq!(client.state(&handle), Some(&JobState::TimedOut { attempts: 3 }));
}

/// A `Completed` answer ends the loop without using the rest of the budget.
#[tokio::test]
async fn completion_stops_polling_immediately() {
    let service = Arc::new(InMemoryService::new().with_status_script([
        Ok(RemoteStatus::Pending),
        Ok(RemoteStatus::Completed),
    ]));
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();

    client.await_completion(&handle, no_delay(10)).await.unwrap();

    assert_eq!(service.status_calls(), 2);
    assert_eq!(client.state(&handle), Some(&JobState::Completed));
}

/// A `Failed` answer is terminal and not retried.
#[tokio::test]
async fn failure_stops_polling_immediately() {
    let service = Arc::new(InMemoryService::new().with_status_script([Ok(
        RemoteStatus::Failed(Some("Model not initialized".into())),
    )]));
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();

    let result = client.await_completion(&handle, no_delay(10)).await;

    assert_matches!(result, Err(AwaitError::JobFailed(reason)) if reason == "Model not initialized");
    assert_eq!(service.status_calls(), 1);
}

/// Transport failures consume attempts but do not end the loop early.
#[tokio::test]
async fn transport_errors_consume_budget_without_aborting() {
    let service = Arc::new(InMemoryService::new().with_status_script([
        Err(ServiceError::Unreachable("connection refused".into())),
        Err(ServiceError::Unreachable("connection refused".into())),
        Ok(RemoteStatus::Completed),
    ]));
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();

    client.await_completion(&handle, no_delay(3)).await.unwrap();
    assert_eq!(service.status_calls(), 3);
}

/// When transport errors use up the whole budget the result is a timeout.
#[tokio::test]
async fn transport_errors_can_exhaust_budget() {
    let service = Arc::new(
        InMemoryService::new()
            .with_status_script([Err(ServiceError::Unreachable("no route".into()))]),
    );
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();

    let result = client.await_completion(&handle, no_delay(4)).await;
    assert_matches!(result, Err(AwaitError::Timeout { attempts: 4 }));
    assert_eq!(service.status_calls(), 4);
}

/// A single-attempt policy polls once and never sleeps.
#[tokio::test]
async fn single_attempt_never_sleeps() {
    let service = Arc::new(InMemoryService::new().with_status_script([Ok(RemoteStatus::Pending)]));
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();

    let policy = RetryPolicy::new(1, Duration::from_secs(5)).unwrap();
    assert_matches!(
        client.await_completion(&handle, policy).await,
        Err(AwaitError::Timeout { attempts: 1 })
    );

    assert_eq!(service.status_calls(), 1);
    assert!(client.sleeper().requested().is_empty());
}

// ---------------------------------------------------------------------------
// Test: terminal handles
// ---------------------------------------------------------------------------

/// A timed-out handle refuses further polling and awaiting, and reports
/// the attempts it actually used rather than the new policy's budget.
#[tokio::test]
async fn timed_out_handle_is_closed() {
    let service = Arc::new(InMemoryService::new().with_status_script([Ok(RemoteStatus::Pending)]));
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();
    assert_matches!(
        client.await_completion(&handle, no_delay(2)).await,
        Err(AwaitError::Timeout { attempts: 2 })
    );

    assert_matches!(client.poll(&handle).await, Err(PollError::HandleClosed(_)));
    assert_matches!(
        client.await_completion(&handle, no_delay(9)).await,
        Err(AwaitError::Timeout { attempts: 2 })
    );
    assert_eq!(service.status_calls(), 2);
}

/// Once completed, a handle keeps reporting `Completed` even if the
/// service later answers differently.
#[tokio::test]
async fn poll_after_completion_never_regresses() {
    let service = Arc::new(InMemoryService::new().with_status_script([
        Ok(RemoteStatus::Completed),
        Ok(RemoteStatus::Pending),
    ]));
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();
    client.await_completion(&handle, no_delay(3)).await.unwrap();

    assert_eq!(client.poll(&handle).await.unwrap(), JobStatus::Completed);
    assert_eq!(service.status_calls(), 1);
}

/// A failed handle keeps its stored reason on later polls.
#[tokio::test]
async fn poll_after_failure_returns_stored_reason() {
    let service = Arc::new(InMemoryService::new().with_status_script([
        Ok(RemoteStatus::Failed(Some("Model not initialized".to_string()))),
        Ok(RemoteStatus::Pending),
    ]));
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();
    assert_matches!(
        client.await_completion(&handle, no_delay(3)).await,
        Err(AwaitError::JobFailed(_))
    );

    assert_eq!(
        client.poll(&handle).await.unwrap(),
        JobStatus::Failed("Model not initialized".to_string())
    );
    assert_eq!(service.status_calls(), 1);
}

/// Re-awaiting a failed handle returns the stored failure without a poll.
#[tokio::test]
async fn failed_handle_awaits_without_polling() {
    let service = Arc::new(InMemoryService::new().with_status_script([
        Ok(RemoteStatus::Failed(Some("out of memory".to_string()))),
        Ok(RemoteStatus::Completed),
    ]));
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();
    assert_matches!(
        client.await_completion(&handle, no_delay(3)).await,
        Err(AwaitError::JobFailed(_))
    );

    assert_matches!(
        client.await_completion(&handle, no_delay(3)).await,
        Err(AwaitError::JobFailed(reason)) if reason == "out of memory"
    );
    assert_eq!(service.status_calls(), 1);
}

/// Re-awaiting a cancelled handle stays cancelled without a poll.
#[tokio::test]
async fn cancelled_handle_awaits_without_polling() {
    let service = Arc::new(InMemoryService::new().with_status_script([Ok(RemoteStatus::Pending)]));
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_matches!(
        client
            .await_completion_with_cancel(&handle, no_delay(3), &cancel)
            .await,
        Err(AwaitError::Cancelled)
    );

    assert_matches!(
        client.await_completion(&handle, no_delay(3)).await,
        Err(AwaitError::Cancelled)
    );
    assert_matches!(client.poll(&handle).await, Err(PollError::HandleClosed(_)));
    assert_eq!(service.status_calls(), 0);
}

/// Awaiting an already-completed handle succeeds without another poll.
#[tokio::test]
async fn completed_handle_awaits_without_polling() {
    let service = Arc::new(InMemoryService::new());
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();
    client.await_completion(&handle, no_delay(1)).await.unwrap();

    client.await_completion(&handle, no_delay(1)).await.unwrap();
    assert_eq!(service.status_calls(), 1);
}

/// A handle the service forgot aborts the wait at once.
#[tokio::test]
async fn service_not_found_aborts_wait() {
    let service = Arc::new(InMemoryService::new().with_status_script([Err(ServiceError::NotFound)]));
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();

    let result = client.await_completion(&handle, no_delay(5)).await;
    assert_matches!(result, Err(AwaitError::UnknownHandle(h)) if h == handle);
    assert_eq!(service.status_calls(), 1);
}

/// Awaiting a handle this client never issued is rejected locally.
#[tokio::test]
async fn foreign_handle_is_unknown() {
    let service = Arc::new(InMemoryService::new());
    let mut client = client_for(&service);

    let result = client
        .await_completion(&JobHandle::new("task_1"), no_delay(3))
        .await;
    assert_matches!(result, Err(AwaitError::UnknownHandle(_)));
    assert_eq!(service.status_calls(), 0);
}

// ---------------------------------------------------------------------------
// Test: cancellation
// ---------------------------------------------------------------------------

/// A token cancelled before the wait starts yields `Cancelled`, not `Timeout`.
#[tokio::test]
async fn cancelled_token_stops_before_polling() {
    let service = Arc::new(InMemoryService::new().with_status_script([Ok(RemoteStatus::Pending)]));
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = client
        .await_completion_with_cancel(&handle, no_delay(5), &cancel)
        .await;

    assert_matches!(result, Err(AwaitError::Cancelled));
    assert_eq!(service.status_calls(), 0);
    assert_eq!(client.state(&handle), Some(&JobState::Cancelled));
}

/// Cancellation during a real delay interrupts the wait.
#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_delay() {
    let service = Arc::new(InMemoryService::new().with_status_script([Ok(RemoteStatus::Pending)]));
    let mut client = JobClient::new(Arc::clone(&service));
    let handle = client.submit(request()).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        trigger.cancel();
    });

    let policy = RetryPolicy::new(30, Duration::from_secs(2)).unwrap();
    let result = client
        .await_completion_with_cancel(&handle, policy, &cancel)
        .await;

    assert_matches!(result, Err(AwaitError::Cancelled));
    assert_eq!(service.status_calls(), 2);
}

// ---------------------------------------------------------------------------
// Test: submit and fetch
// ---------------------------------------------------------------------------

/// Unreachable and rejecting services map to distinct submit errors.
#[tokio::test]
async fn submit_errors_are_classified() {
    let down = Arc::new(
        InMemoryService::new().with_submit_failure(ServiceError::Unreachable("dns".into())),
    );
    assert_matches!(
        client_for(&down).submit(request()).await,
        Err(SubmitError::TransportFailure(_))
    );

    let refusing = Arc::new(InMemoryService::new().with_submit_failure(ServiceError::Rejected {
        status: 400,
        message: "Invalid JSON request".into(),
    }));
    assert_matches!(
        client_for(&refusing).submit(request()).await,
        Err(SubmitError::RejectedByService { code: 400, .. })
    );
}

/// `fetch` before a successful wait fails locally, whatever the remote says.
#[tokio::test]
async fn fetch_before_completion_is_rejected() {
    let service = Arc::new(InMemoryService::new());
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();

    // The service would already report Completed.
    assert_eq!(client.poll(&handle).await.unwrap(), JobStatus::Completed);

    assert_matches!(
        client.fetch(&handle).await,
        Err(FetchError::HandleNotCompleted(h)) if h == handle
    );
    assert_eq!(service.result_calls(), 0);
}

/// `fetch` after a timeout is also out of order.
#[tokio::test]
async fn fetch_after_timeout_is_rejected() {
    let service = Arc::new(InMemoryService::new().with_status_script([Ok(RemoteStatus::Pending)]));
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();
    assert_matches!(
        client.await_completion(&handle, no_delay(1)).await,
        Err(AwaitError::Timeout { attempts: 1 })
    );

    assert_matches!(client.fetch(&handle).await, Err(FetchError::HandleNotCompleted(_)));
}

/// A zero-length payload is an error, not an empty image.
#[tokio::test]
async fn empty_payload_is_an_error() {
    let service = Arc::new(InMemoryService::new().with_result(Vec::new()));
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();
    client.await_completion(&handle, no_delay(1)).await.unwrap();

    assert_matches!(client.fetch(&handle).await, Err(FetchError::EmptyPayload));
}

/// A transport failure while downloading surfaces as such.
#[tokio::test]
async fn fetch_transport_failure() {
    let service = Arc::new(
        InMemoryService::new().with_result_failure(ServiceError::Unreachable("reset".into())),
    );
    let mut client = client_for(&service);
    let handle = client.submit(request()).await.unwrap();
    client.await_completion(&handle, no_delay(1)).await.unwrap();

    assert_matches!(client.fetch(&handle).await, Err(FetchError::TransportFailure(_)));
}

// ---------------------------------------------------------------------------
// Test: end-to-end
// ---------------------------------------------------------------------------

/// Pending once, then Completed; the raw 64x64 RGB payload comes back intact.
#[tokio::test]
async fn end_to_end_raw_payload() {
    let params = GenerationParams {
        prompt: "x".into(),
        negative_prompt: None,
        width: 64,
        height: 64,
        num_inference_steps: 10,
        guidance_scale: 7.5,
        seed: 12345,
    };
    let service = Arc::new(
        InMemoryService::new()
            .with_status_script([Ok(RemoteStatus::Pending), Ok(RemoteStatus::Completed)])
            .with_result(vec![128u8; 64 * 64 * 3]),
    );
    let mut client = client_for(&service);

    let (handle, bytes) = client
        .generate(
            JobRequest::new(params).unwrap(),
            no_delay(3),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(handle.as_str(), "task_1");
    assert_eq!(bytes.len(), 64 * 64 * 3);
    assert_eq!(service.status_calls(), 2);
    assert_eq!(service.result_calls(), 1);

    let file = sdgen_core::raster::encode_rgb_bytes(64, 64, &bytes).unwrap();
    assert_eq!(file.len(), 12342);
}

/// `generate` surfaces the failing stage.
#[tokio::test]
async fn generate_reports_failing_stage() {
    let service = Arc::new(InMemoryService::new().with_status_script([Ok(RemoteStatus::Pending)]));
    let mut client = client_for(&service);

    let result = client
        .generate(request(), no_delay(2), &CancellationToken::new())
        .await;
    assert_matches!(result, Err(JobError::Await(AwaitError::Timeout { attempts: 2 })));
}
