/// Final report of a test step
///
/// Built once from the elapsed time, the outcome counters and a histogram
/// snapshot. Everything in it is derived; nothing is updated afterwards.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Serialize, Serializer};

use crate::stats::{Counters, HistogramSnapshot};
use crate::utils::format::{format_duration, ns_to_ms};

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Aggregated results of one test step
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: Duration,

    pub requests: u64,
    pub ok: u64,
    pub exceptions: u64,
    pub other_errors: u64,

    pub min_ns: u64,
    pub avg_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub max_ns: u64,

    /// Requests per second over `duration`
    pub throughput: f64,
}

impl Report {
    pub fn build(duration: Duration, counters: &Counters, histogram: &HistogramSnapshot) -> Self {
        let totals = counters.snapshot();

        let throughput = if duration.is_zero() {
            0.0
        } else {
            totals.requests as f64 / duration.as_secs_f64()
        };

        debug!(
            "Building report: {} requests in {:?} ({} latency samples)",
            totals.requests, duration, histogram.count
        );

        Self {
            generated_at: Utc::now(),
            duration,
            requests: totals.requests,
            ok: totals.ok,
            exceptions: totals.exceptions,
            other_errors: totals.other_errors,
            min_ns: histogram.min_ns,
            avg_ns: histogram.avg_ns(),
            p95_ns: histogram.quantile_ns(0.95),
            p99_ns: histogram.quantile_ns(0.99),
            max_ns: histogram.max_ns,
            throughput,
        }
    }

    /// Successful responses as a percentage of issued requests
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        (self.ok as f64 / self.requests as f64) * 100.0
    }

    /// Human-readable multi-line summary
    pub fn render(&self) -> String {
        format!(
            "Duration:   {}\n\
             Requests:   {}\n\
             OK:         {}\n\
             Exceptions: {}\n\
             OtherErrs:  {}\n\
             \n\
             Latency (ms):\n  \
               min  {:.3}\n  \
               avg  {:.3}\n  \
               p95  {:.3}\n  \
               p99  {:.3}\n  \
               max  {:.3}\n\
             \n\
             Throughput:\n  \
               {:.1} req/s\n",
            format_duration(self.duration),
            self.requests,
            self.ok,
            self.exceptions,
            self.other_errors,
            ns_to_ms(self.min_ns),
            ns_to_ms(self.avg_ns),
            ns_to_ms(self.p95_ns),
            ns_to_ms(self.p99_ns),
            ns_to_ms(self.max_ns),
            self.throughput,
        )
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
