//! Exponential backoff with jitter.
//!
//! Attempt `i` (1-indexed) waits `base * 2^(i-1)`, capped at `max`, plus up
//! to 10% upward jitter so that callers sharing a dependency do not retry in
//! lockstep.

use rand::Rng;
use std::time::Duration;

/// Backoff schedule for one integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: true,
        }
    }

    /// Same schedule without jitter.
    pub fn exact(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: false,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        if self.jitter {
            calculate_backoff(attempt, base_ms, max_ms)
        } else {
            Duration::from_millis(exponential_ms(attempt, base_ms, max_ms))
        }
    }
}

fn exponential_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    if attempt == 0 {
        return 0;
    }
    let factor = 2u64.saturating_pow(attempt - 1);
    base_ms.saturating_mul(factor).min(max_ms)
}

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let capped_delay = exponential_ms(attempt, base_ms, max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}
