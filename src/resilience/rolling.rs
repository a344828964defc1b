//! Bucketed rolling window of call outcomes.
//!
//! # Responsibilities
//! - Count successes, failures, timeouts and rejections over a sliding window
//! - Compute the error percentage used to trip a circuit
//!
//! # Design Decisions
//! - Fixed number of buckets; memory never grows with call volume
//! - Buckets are rotated lazily on access, no background timer
//! - Rejections are counted but never contribute to the error percentage

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of one guarded invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    Reject,
}

/// Aggregated counters for a window or a bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WindowTotals {
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub rejects: u64,
}

impl WindowTotals {
    /// Calls that actually reached the protected function.
    pub fn executed(&self) -> u64 {
        self.successes + self.failures + self.timeouts
    }

    /// Failure percentage (0-100) over executed calls.
    pub fn error_percentage(&self) -> f64 {
        let executed = self.executed();
        if executed == 0 {
            return 0.0;
        }
        (self.failures + self.timeouts) as f64 * 100.0 / executed as f64
    }

    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.successes += 1,
            Outcome::Failure => self.failures += 1,
            Outcome::Timeout => self.timeouts += 1,
            Outcome::Reject => self.rejects += 1,
        }
    }

    fn merge(&mut self, other: &WindowTotals) {
        self.successes += other.successes;
        self.failures += other.failures;
        self.timeouts += other.timeouts;
        self.rejects += other.rejects;
    }
}

#[derive(Debug)]
struct Bucket {
    start: Instant,
    totals: WindowTotals,
}

/// Sliding window split into `bucket_count` equal buckets.
#[derive(Debug)]
pub struct RollingWindow {
    window: Duration,
    bucket_width: Duration,
    bucket_count: usize,
    buckets: VecDeque<Bucket>,
}

impl RollingWindow {
    /// Create a window of `window` length split into `buckets` buckets.
    pub fn new(window: Duration, buckets: u32) -> Self {
        let bucket_count = buckets.max(1) as usize;
        let bucket_width = (window / bucket_count as u32).max(Duration::from_millis(1));
        Self {
            window,
            bucket_width,
            bucket_count,
            buckets: VecDeque::with_capacity(bucket_count),
        }
    }

    /// Record an outcome at the current time.
    pub fn record(&mut self, outcome: Outcome) {
        self.record_at(outcome, Instant::now());
    }

    fn record_at(&mut self, outcome: Outcome, now: Instant) {
        self.rotate(now);

        let needs_bucket = match self.buckets.back() {
            Some(bucket) => now.duration_since(bucket.start) >= self.bucket_width,
            None => true,
        };
        if needs_bucket {
            self.buckets.push_back(Bucket {
                start: now,
                totals: WindowTotals::default(),
            });
            while self.buckets.len() > self.bucket_count {
                self.buckets.pop_front();
            }
        }

        if let Some(bucket) = self.buckets.back_mut() {
            bucket.totals.add(outcome);
        }
    }

    /// Totals over buckets still inside the window.
    pub fn totals(&mut self) -> WindowTotals {
        self.rotate(Instant::now());
        let mut totals = WindowTotals::default();
        for bucket in &self.buckets {
            totals.merge(&bucket.totals);
        }
        totals
    }

    /// Drop every bucket.
    pub fn reset(&mut self) {
        self.buckets.clear();
    }

    fn rotate(&mut self, now: Instant) {
        while let Some(front) = self.buckets.front() {
            if now.duration_since(front.start) >= self.window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }
}
