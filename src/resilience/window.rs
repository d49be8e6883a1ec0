//! Request counting for the stateful breaker.
//!
//! # Strategies
//! - Fixed: one set of counts, cleared on state transitions and on the
//!   closed-window interval
//! - Rolling: the interval is split into buckets of `bucket_period`; buckets
//!   older than the lookback window stop contributing, including to the
//!   consecutive-failure streak used to trip the breaker

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Counts for the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

/// Counting strategy, chosen once when the breaker is built.
#[derive(Debug)]
pub enum WindowCounter {
    Fixed(FixedWindowCounter),
    Rolling(RollingWindowCounter),
}

impl WindowCounter {
    /// Rolling when both a window and a bucket period are configured.
    pub fn new(window: Option<Duration>, bucket_period: Option<Duration>, now: Instant) -> Self {
        match (window, bucket_period) {
            (Some(window), Some(period)) => {
                WindowCounter::Rolling(RollingWindowCounter::new(window, period, now))
            }
            _ => WindowCounter::Fixed(FixedWindowCounter::default()),
        }
    }

    pub fn is_rolling(&self) -> bool {
        matches!(self, WindowCounter::Rolling(_))
    }

    pub fn on_request(&mut self, now: Instant) {
        match self {
            WindowCounter::Fixed(c) => c.counts.on_request(),
            WindowCounter::Rolling(c) => c.bucket(now).requests += 1,
        }
    }

    pub fn on_success(&mut self, now: Instant) {
        match self {
            WindowCounter::Fixed(c) => c.counts.on_success(),
            WindowCounter::Rolling(c) => c.bucket(now).on_success(),
        }
    }

    pub fn on_failure(&mut self, now: Instant) {
        match self {
            WindowCounter::Fixed(c) => c.counts.on_failure(),
            WindowCounter::Rolling(c) => c.bucket(now).on_failure(),
        }
    }

    pub fn counts(&mut self, now: Instant) -> Counts {
        match self {
            WindowCounter::Fixed(c) => c.counts,
            WindowCounter::Rolling(c) => c.counts(now),
        }
    }

    pub fn clear(&mut self) {
        match self {
            WindowCounter::Fixed(c) => c.counts = Counts::default(),
            WindowCounter::Rolling(c) => c.buckets.clear(),
        }
    }
}

/// A single, non-rolling window.
#[derive(Debug, Default)]
pub struct FixedWindowCounter {
    counts: Counts,
}

/// One slice of a rolling window.
#[derive(Debug, Default, Clone)]
struct Bucket {
    index: u64,
    requests: u32,
    successes: u32,
    failures: u32,
    /// Failures after the last success in this bucket.
    trailing_failures: u32,
    /// Successes after the last failure in this bucket.
    trailing_successes: u32,
}

impl Bucket {
    fn on_success(&mut self) {
        self.successes += 1;
        self.trailing_successes += 1;
        self.trailing_failures = 0;
    }

    fn on_failure(&mut self) {
        self.failures += 1;
        self.trailing_failures += 1;
        self.trailing_successes = 0;
    }
}

/// Time-bucketed window covering the last `window` of activity.
#[derive(Debug)]
pub struct RollingWindowCounter {
    origin: Instant,
    bucket_period: Duration,
    capacity: u64,
    /// Oldest first.
    buckets: VecDeque<Bucket>,
}

impl RollingWindowCounter {
    pub fn new(window: Duration, bucket_period: Duration, now: Instant) -> Self {
        let period = bucket_period.max(Duration::from_nanos(1));
        let capacity = window.as_nanos().div_ceil(period.as_nanos()).max(1);
        Self {
            origin: now,
            bucket_period: period,
            capacity: capacity.min(u64::MAX as u128) as u64,
            buckets: VecDeque::new(),
        }
    }

    fn index_at(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin).as_nanos();
        (elapsed / self.bucket_period.as_nanos()).min(u64::MAX as u128) as u64
    }

    fn expire(&mut self, current: u64) {
        while let Some(oldest) = self.buckets.front() {
            if oldest.index.saturating_add(self.capacity) <= current {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn bucket(&mut self, now: Instant) -> &mut Bucket {
        let current = self.index_at(now);
        self.expire(current);
        let needs_new = self.buckets.back().map_or(true, |b| b.index != current);
        if needs_new {
            self.buckets.push_back(Bucket {
                index: current,
                ..Bucket::default()
            });
        }
        let newest = self.buckets.len() - 1;
        &mut self.buckets[newest]
    }

    fn counts(&mut self, now: Instant) -> Counts {
        let current = self.index_at(now);
        self.expire(current);

        let mut counts = Counts::default();
        for b in &self.buckets {
            counts.requests += b.requests;
            counts.total_successes += b.successes;
            counts.total_failures += b.failures;
        }

        for b in self.buckets.iter().rev() {
            counts.consecutive_failures += b.trailing_failures;
            if b.successes > 0 {
                break;
            }
        }
        for b in self.buckets.iter().rev() {
            counts.consecutive_successes += b.trailing_successes;
            if b.failures > 0 {
                break;
            }
        }

        counts
    }
}
