//! Deadline enforcement.
//!
//! # Responsibilities
//! - Bound any future by a single deadline
//!
//! # Design Decisions
//! - The deadline covers the whole future, including retries and backoff
//!   sleeps running inside it
//! - On expiry the inner future is dropped, which cancels pending work

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Deadline of {0:?} exceeded")]
pub struct DeadlineExceeded(pub Duration);

/// Run `fut` to completion or fail once `deadline` elapses.
pub async fn with_deadline<F>(deadline: Duration, fut: F) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| DeadlineExceeded(deadline))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let result = with_deadline(Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            42
        })
        .await;
        assert_eq!(result, Err(DeadlineExceeded(Duration::from_millis(100))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_within_deadline() {
        let result = with_deadline(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }
}
