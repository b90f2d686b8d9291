//! Exponential backoff with jitter for calls into upstream collaborators.
//!
//! Tool implementations that talk to flaky upstreams can wrap their calls
//! in [`retry_with_backoff`]. Only errors whose mapped HTTP status is
//! retryable (see [`crate::error::is_retryable_status`]) are retried.

use std::time::Duration;

use rand::Rng;

use crate::error::GatewayError;

/// Retry policy: bounded attempts, exponential delay with a cap.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry. Doubles on each subsequent retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay, before jitter.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Returns the jittered delay for the given zero-based retry index.
    ///
    /// The exponential delay is capped at `max_delay`, then up to 50%
    /// random jitter is added so synchronized clients spread out.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);
        let jitter_cap = exp.as_millis() as u64 / 2;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_cap)
        };
        exp + Duration::from_millis(jitter)
    }
}

/// Runs `op` with bounded retries and exponential backoff.
///
/// The closure receives the one-based attempt number. Non-retryable
/// errors and the final attempt's error are returned as-is.
///
/// # Errors
///
/// Returns the last [`GatewayError`] produced by `op` once attempts are
/// exhausted, or immediately for non-retryable errors.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    mut op: F,
) -> Result<T, GatewayError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut retry = 0;
    loop {
        match op(retry + 1).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retry + 1 < attempts => {
                let delay = policy.delay_for(retry);
                tracing::debug!(
                    attempt = retry + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast_policy(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, GatewayError>(42) }
        })
        .await;
        assert!(matches!(result, Ok(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast_policy(), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(GatewayError::UpstreamFailure("503".to_string()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert!(matches!(result, Ok("done")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast_policy(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::UpstreamFailure("still down".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast_policy(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::ValidationFailed("bad input".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        // Jitter adds at most 50%, so bounds are deterministic.
        let d0 = policy.delay_for(0);
        assert!(d0 >= Duration::from_millis(100) && d0 <= Duration::from_millis(150));
        let d3 = policy.delay_for(3);
        assert!(d3 >= Duration::from_millis(300) && d3 <= Duration::from_millis(450));
    }
}
