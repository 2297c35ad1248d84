//! Token bucket guarding outbound calls to rate-limited HTTP sources.
//!
//! The bucket starts full, so `capacity` calls may go through back to back;
//! afterwards one token becomes available every `window / capacity`. The
//! replenishment schedule is kept by governor's GCRA state, so no refill task
//! exists and `stop` has nothing to join.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("wait for rate limit token was cancelled")]
    Cancelled,

    #[error("rate limiter has been stopped")]
    Stopped,

    #[error("invalid rate limit: {capacity} tokens per {window:?}")]
    InvalidQuota { capacity: u32, window: Duration },
}

pub struct RateLimiter {
    limiter: DefaultDirectRateLimiter,
    capacity: u32,
    window: Duration,
    stopped: AtomicBool,
    shutdown: CancellationToken,
}

impl RateLimiter {
    /// `capacity` tokens per `window`, with a burst of `capacity`.
    pub fn new(capacity: u32, window: Duration) -> Result<Self, RateLimitError> {
        let invalid = RateLimitError::InvalidQuota { capacity, window };
        let burst = NonZeroU32::new(capacity).ok_or(invalid)?;
        let period = window / capacity;
        let quota = Quota::with_period(period).ok_or(invalid)?.allow_burst(burst);

        debug!(
            "Rate limiter configured: {} tokens per {:?} (one every {:?})",
            capacity, window, period
        );

        Ok(Self {
            limiter: governor::RateLimiter::direct(quota),
            capacity,
            window,
            stopped: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Take a token without waiting. Returns `false` when the bucket is empty
    /// or the limiter has been stopped.
    pub fn try_acquire(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.limiter.check().is_ok()
    }

    /// Wait until a token is available, `cancel` fires, or the limiter stops.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        if self.is_stopped() {
            return Err(RateLimitError::Stopped);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RateLimitError::Cancelled),
            _ = self.shutdown.cancelled() => Err(RateLimitError::Stopped),
            _ = self.limiter.until_ready() => {
                if self.is_stopped() {
                    Err(RateLimitError::Stopped)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Move to the terminal state. Pending and future waits fail with
    /// [`RateLimitError::Stopped`]. Calling this more than once is harmless.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.shutdown.cancel();
            debug!("Rate limiter stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop();
    }
}
