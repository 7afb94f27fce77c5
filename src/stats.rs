/// Outcome counters and latency histogram
///
/// [`Counters`] is shared by every worker of a test step and updated with relaxed
/// atomic increments. [`Histogram`] is owned by the single task draining the
/// results channel, so it needs no synchronization.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::debug;
use serde::Serialize;

use crate::engine::Outcome;

/// Number of power-of-two latency buckets (1ns .. 2^63ns)
pub const BUCKET_COUNT: usize = 64;

/// Request and outcome totals for one test step
#[derive(Debug, Default)]
pub struct Counters {
    requests: AtomicU64,
    ok: AtomicU64,
    exceptions: AtomicU64,
    other_errors: AtomicU64,
}

/// Point-in-time copy of [`Counters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub requests: u64,
    pub ok: u64,
    pub exceptions: u64,
    pub other_errors: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request about to be executed
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count the outcome of a finished request
    pub fn record_outcome(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Success(_) => &self.ok,
            Outcome::Exception(_) => &self.exceptions,
            Outcome::Failed(_) => &self.other_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            ok: self.ok.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
            other_errors: self.other_errors.load(Ordering::Relaxed),
        }
    }
}

/// Streaming latency histogram with log2 buckets
///
/// Memory use is fixed regardless of how many samples are recorded. Quantiles are
/// approximate: their resolution is the width of the bucket they fall in.
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: [u64; BUCKET_COUNT],
    min_ns: u64,
    max_ns: u64,
    sum_ns: u64,
    count: u64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            buckets: [0; BUCKET_COUNT],
            min_ns: 0,
            max_ns: 0,
            sum_ns: 0,
            count: 0,
        }
    }
}

/// Bucket holding `ns`: floor(log2(ns)), `ns` must be non-zero
fn bucket_index(ns: u64) -> usize {
    (63 - ns.leading_zeros()) as usize
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one latency sample
    ///
    /// Zero durations are counted as 1ns.
    pub fn record(&mut self, latency: Duration) {
        let ns = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX).max(1);

        if self.count == 0 {
            self.min_ns = ns;
            self.max_ns = ns;
        } else {
            self.min_ns = self.min_ns.min(ns);
            self.max_ns = self.max_ns.max(ns);
        }

        self.count += 1;
        self.sum_ns = self.sum_ns.saturating_add(ns);
        self.buckets[bucket_index(ns)] += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        debug!(
            "Histogram snapshot: {} samples, min={}ns max={}ns",
            self.count, self.min_ns, self.max_ns
        );
        HistogramSnapshot {
            buckets: self.buckets,
            min_ns: self.min_ns,
            max_ns: self.max_ns,
            sum_ns: self.sum_ns,
            count: self.count,
        }
    }
}

/// Immutable copy of a [`Histogram`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub buckets: [u64; BUCKET_COUNT],
    pub min_ns: u64,
    pub max_ns: u64,
    pub sum_ns: u64,
    pub count: u64,
}

impl Default for HistogramSnapshot {
    fn default() -> Self {
        Histogram::default().snapshot()
    }
}

impl HistogramSnapshot {
    pub fn avg_ns(&self) -> u64 {
        if self.count == 0 {
            return 0;
        }
        self.sum_ns / self.count
    }

    /// Approximate quantile in nanoseconds
    ///
    /// `q <= 0` gives the minimum and `q >= 1` the maximum. In between, the lower
    /// bound `2^i` of the first bucket whose cumulative count reaches
    /// `ceil(count * q)` is returned, clamped to `[min, max]`. An empty snapshot
    /// yields 0.
    pub fn quantile_ns(&self, q: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }
        if q <= 0.0 {
            return self.min_ns;
        }
        if q >= 1.0 {
            return self.max_ns;
        }

        let target = ((self.count as f64 * q).ceil() as u64).max(1);
        let mut seen = 0u64;
        for (index, &bucket) in self.buckets.iter().enumerate() {
            seen += bucket;
            if seen >= target {
                return (1u64 << index).clamp(self.min_ns, self.max_ns);
            }
        }
        self.max_ns
    }

    pub fn min(&self) -> Duration {
        Duration::from_nanos(self.min_ns)
    }

    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_ns)
    }

    pub fn avg(&self) -> Duration {
        Duration::from_nanos(self.avg_ns())
    }

    pub fn quantile(&self, q: f64) -> Duration {
        Duration::from_nanos(self.quantile_ns(q))
    }
}
