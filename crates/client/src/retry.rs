//! Delay source for the status-polling loop.
//!
//! The poll loop never calls `tokio::time::sleep` directly; it goes
//! through a [`Sleeper`] so tests can substitute [`InstantSleeper`] and
//! run the whole retry budget without waiting. [`pause`] races the delay
//! against a [`CancellationToken`].

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Something that can wait for a given duration without blocking the
/// runtime.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Real delays via [`tokio::time::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Returns immediately and records every requested delay.
#[derive(Debug, Default)]
pub struct InstantSleeper {
    requested: Mutex<Vec<Duration>>,
}

impl InstantSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in call order.
    pub fn requested(&self) -> Vec<Duration> {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, delay: Duration) {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delay);
        tokio::task::yield_now().await;
    }
}

/// Wait `delay` on `sleeper`, giving up early if `cancel` fires.
///
/// Returns `true` if the full delay elapsed, `false` if cancelled.
pub async fn pause<Z: Sleeper + ?Sized>(
    sleeper: &Z,
    delay: Duration,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleeper.sleep(delay) => true,
    }
}
