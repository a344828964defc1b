//! Retry logic.
//!
//! # Responsibilities
//! - Re-invoke a failing operation up to a fixed attempt budget
//! - Sleep an exponentially growing, jittered delay between attempts
//! - Hand back the last error once the budget is exhausted
//!
//! # Design Decisions
//! - Every error is treated as transient; callers wrap only idempotent calls
//! - No per-attempt timeout: the enclosing circuit breaker owns the single
//!   deadline for the whole loop
//! - No sleep after the final attempt

use std::fmt;
use std::future::Future;
use std::time::Duration;

use super::backoff::BackoffPolicy;

/// Retry budget and backoff schedule.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// Last error of an exhausted retry loop.
#[derive(Debug)]
pub struct RetriesExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl<E> RetriesExhausted<E> {
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

impl<E: fmt::Display> fmt::Display for RetriesExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {} attempts)", self.last_error, self.attempts)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetriesExhausted<E> {}

/// Run `op` until it succeeds or `policy.max_attempts` attempts have failed.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    component: &str,
    mut op: F,
) -> Result<T, RetriesExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(component = %component, attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt >= policy.max_attempts => {
                tracing::warn!(
                    component = %component,
                    attempts = attempt,
                    error = %e,
                    "Retries exhausted"
                );
                return Err(RetriesExhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                let delay: Duration = policy.backoff.delay_for(attempt);
                tracing::debug!(
                    component = %component,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            attempts,
            BackoffPolicy::new(Duration::from_millis(1000), Duration::from_secs(60)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_between_attempts() {
        let start = Instant::now();
        let starts = Mutex::new(Vec::new());

        let result: Result<(), _> = retry_with_backoff(&policy(3), "flaky", || {
            starts.lock().unwrap().push(start.elapsed());
            async { Err::<(), _>("boom") }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.into_inner(), "boom");

        let starts = starts.into_inner().unwrap();
        assert_eq!(starts.len(), 3);
        let first_gap = starts[1] - starts[0];
        let second_gap = starts[2] - starts[1];
        assert!(first_gap >= Duration::from_millis(1000) && first_gap < Duration::from_millis(1100));
        assert!(second_gap >= Duration::from_millis(2000) && second_gap < Duration::from_millis(2200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_first_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&policy(5), "flaky", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_does_not_sleep() {
        let start = Instant::now();
        let result: Result<(), _> =
            retry_with_backoff(&policy(1), "once", || async { Err::<(), _>("nope") }).await;
        assert!(result.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
