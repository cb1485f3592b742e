//! Bucketed rolling window of call outcomes.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Success/failure totals over the live part of the window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowCounts {
    pub successes: u64,
    pub failures: u64,
}

impl WindowCounts {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.successes + self.failures
    }

    /// Failure share in percent; zero when nothing was recorded
    #[must_use]
    pub fn failure_percentage(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.failures as f64 * 100.0 / total as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    epoch: u64,
    successes: u64,
    failures: u64,
}

/// Fixed time span split into equal buckets; a bucket older than the span
/// is recycled on its next use.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    origin: Instant,
    bucket_len: Duration,
    buckets: Vec<Bucket>,
}

impl RollingWindow {
    pub fn new(span: Duration, bucket_count: usize, origin: Instant) -> Self {
        let count = bucket_count.max(1);
        let divisor = u32::try_from(count).unwrap_or(u32::MAX);
        let bucket_len = (span / divisor).max(Duration::from_millis(1));

        Self {
            origin,
            bucket_len,
            buckets: vec![Bucket::default(); count],
        }
    }

    pub fn bucket_len(&self) -> Duration {
        self.bucket_len
    }

    fn epoch_at(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin).as_nanos();
        u64::try_from(elapsed / self.bucket_len.as_nanos()).unwrap_or(u64::MAX)
    }

    fn current(&mut self, now: Instant) -> &mut Bucket {
        let epoch = self.epoch_at(now);
        let len = self.buckets.len() as u64;
        let bucket = &mut self.buckets[(epoch % len) as usize];
        if bucket.epoch != epoch {
            *bucket = Bucket {
                epoch,
                ..Bucket::default()
            };
        }
        bucket
    }

    pub fn record_success(&mut self, now: Instant) {
        self.current(now).successes += 1;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.current(now).failures += 1;
    }

    #[must_use]
    pub fn counts(&self, now: Instant) -> WindowCounts {
        let epoch = self.epoch_at(now);
        let len = self.buckets.len() as u64;

        self.buckets
            .iter()
            .filter(|b| b.epoch <= epoch && epoch - b.epoch < len)
            .fold(WindowCounts::default(), |acc, b| WindowCounts {
                successes: acc.successes + b.successes,
                failures: acc.failures + b.failures,
            })
    }

    pub fn reset(&mut self) {
        self.buckets.fill(Bucket::default());
    }
}
