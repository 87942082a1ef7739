//! Windowed rate limiting over an atomic counter store.
//!
//! Every delivery attempt increments the counter for the current window and
//! is admitted while the count stays at or below the task's quota. Counters
//! live in a shared store, so the ceiling is global across worker processes
//! rather than per process. A denied attempt consumes one unit of quota too:
//! the limiter throttles delivery attempts, not successful completions.

use std::sync::Arc;
use std::time::Duration;

use crate::config::DispatchLimits;
use crate::error::{ConfigError, RateLimitError};
use crate::store::CounterStore;
use crate::window;

/// Result of one admission check. Consumed immediately, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitOutcome {
    /// Whether this call may proceed to the handler
    pub admitted: bool,

    /// Counter value after this call's increment
    pub current: i64,

    /// Maximum admitted calls per window
    pub quota: i64,

    /// Window size used for the check, in seconds
    pub window_size_seconds: u32,
}

impl RateLimitOutcome {
    /// How many calls over quota this call represents. Zero when admitted.
    pub fn calls_over_limit(&self) -> i64 {
        (self.current - self.quota).max(0)
    }
}

/// Delay to apply before redelivering a denied call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlan {
    pub delay: Duration,
}

impl RetryPlan {
    /// Compute the redelivery delay for a denied call.
    ///
    /// The further over quota the window is, the more whole windows the retry
    /// skips, capped at the retry horizon so rescheduled work never outlives
    /// what the queue will hold in worker memory.
    pub fn for_denial(outcome: &RateLimitOutcome, max_retry: Duration) -> Self {
        let windows_to_skip = 1 + outcome.calls_over_limit() / outcome.quota;
        let delay =
            Duration::from_secs(u64::from(outcome.window_size_seconds) * windows_to_skip as u64);
        Self {
            delay: delay.min(max_retry),
        }
    }
}

/// Windowed quota enforcement shared across workers.
///
/// The store is an explicit constructor dependency, never a process-wide
/// singleton, so tests substitute an in-memory implementation of the same
/// atomic-increment contract.
pub struct RateLimiter<S> {
    store: Arc<S>,
    limits: DispatchLimits,
}

impl<S: CounterStore> RateLimiter<S> {
    pub fn new(store: Arc<S>, limits: DispatchLimits) -> Self {
        Self { store, limits }
    }

    /// Check window bounds and quota against the configured limits.
    pub fn validate(&self, window_size_seconds: u32, quota: i64) -> Result<(), ConfigError> {
        if window_size_seconds == 0 || window_size_seconds >= self.limits.max_window_size_seconds {
            return Err(ConfigError::WindowSizeOutOfBounds {
                got: window_size_seconds,
                max: self.limits.max_window_size_seconds,
            });
        }
        if quota <= 0 {
            return Err(ConfigError::NonPositiveQuota { got: quota });
        }
        Ok(())
    }

    /// Count this call against the current window and decide admission.
    ///
    /// The increment that opens a window (count becomes 1) arms a
    /// `2 * window` expiry with only-if-unset semantics: racing first calls
    /// cannot keep pushing the deadline back, and a straggler landing on the
    /// previous window's key still counts against a live counter.
    pub async fn check_and_increment(
        &self,
        name: &str,
        window_size_seconds: u32,
        quota: i64,
    ) -> Result<RateLimitOutcome, RateLimitError> {
        self.validate(window_size_seconds, quota)?;

        let key = window::window_key(name, window_size_seconds);
        let current = self.store.increment(&key).await?;
        if current == 1 {
            let ttl = Duration::from_secs(2 * u64::from(window_size_seconds));
            self.store.expire_if_unset(&key, ttl).await?;
        }

        Ok(RateLimitOutcome {
            admitted: current <= quota,
            current,
            quota,
            window_size_seconds,
        })
    }
}
