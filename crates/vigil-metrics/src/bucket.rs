//! Per-bucket metric accumulator.

use serde::Serialize;

/// Capacity of the per-bucket duration sample reservoir. Once full, new
/// samples overwrite the oldest in ring order, keeping the most recent
/// window of samples.
pub const RESERVOIR_CAP: usize = 512;

/// Accumulator for one (metric, time-bucket) cell.
///
/// Counters are monotonic within a bucket; duration samples feed a bounded
/// ring used for approximate percentiles.
#[derive(Debug, Clone, Default)]
pub struct MetricBucket {
    /// Number of matching entries observed in this bucket.
    pub count: u64,
    samples: Vec<f64>,
    next: usize,
}

impl MetricBucket {
    pub fn increment(&mut self) {
        self.count += 1;
    }

    /// Record a duration sample, overwriting the oldest once the
    /// reservoir is full.
    pub fn record_sample(&mut self, value: f64) {
        if self.samples.len() < RESERVOIR_CAP {
            self.samples.push(value);
        } else {
            self.samples[self.next] = value;
            self.next = (self.next + 1) % RESERVOIR_CAP;
        }
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Fold another bucket into this one: counts add, reservoirs
    /// concatenate (truncated at capacity).
    pub fn merge(&mut self, other: &MetricBucket) {
        self.count += other.count;
        for &sample in other.samples() {
            self.record_sample(sample);
        }
    }

    /// Nearest-rank percentile over the reservoir, `p` in 0..=100.
    /// `None` when no samples were recorded.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.clamp(1, sorted.len()) - 1])
    }
}

/// Summary of a metric over a time range.
///
/// Counts and rates are exact; percentiles come from merged bounded
/// reservoirs and are approximate.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub metric: String,
    pub count: u64,
    /// Events per second over the queried range.
    pub rate_per_sec: f64,
    pub p50: Option<f64>,
    pub p95: Option<f64>,
}
