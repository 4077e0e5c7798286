//! Bounded, fixed-delay retry.
//!
//! A [`RetryPolicy`] names the attempt budget, the pause between attempts,
//! and which errors are worth another attempt. The search path retries only
//! not-found errors: a freshly created sketch or timeline can take a moment
//! to become visible in the remote index, while query errors never heal on
//! their own.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use timesketch_mcp_core::TimesketchError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    pub delay: Duration,
    pub retryable: fn(&TimesketchError) -> bool,
}

impl RetryPolicy {
    /// Retry only [`ErrorKind::NotFound`](timesketch_mcp_core::ErrorKind::NotFound).
    pub fn not_found(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            retryable: TimesketchError::is_not_found,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::not_found(1, Duration::ZERO)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. `op` receives the 1-based attempt number.
///
/// On exhaustion the last error is returned.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, TimesketchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TimesketchError>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && (policy.retryable)(&e) => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_secs = policy.delay.as_secs_f64(),
                    error = %e,
                    "retrying"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
