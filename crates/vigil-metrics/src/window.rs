//! Bucketed metric windows.
//!
//! Metrics are partitioned per (metric name, bucket start) rather than held
//! in one shared mutable map, so updates touch exactly one cell and range
//! reads merge cells with an explicit fold.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

use vigil_types::VigilError;

use crate::bucket::{MetricBucket, MetricSummary};

/// Rolling store of metric buckets with fixed granularity and a bounded
/// horizon.
#[derive(Debug)]
pub struct WindowStore {
    bucket_secs: i64,
    horizon_buckets: usize,
    /// Cells keyed by (metric name, bucket start epoch second).
    buckets: BTreeMap<(String, i64), MetricBucket>,
}

impl WindowStore {
    pub fn new(bucket_secs: u64, horizon_buckets: usize) -> Self {
        WindowStore {
            bucket_secs: bucket_secs as i64,
            horizon_buckets,
            buckets: BTreeMap::new(),
        }
    }

    pub fn bucket_secs(&self) -> i64 {
        self.bucket_secs
    }

    /// The bucket start the given instant falls into.
    pub fn bucket_start(&self, at: DateTime<Utc>) -> i64 {
        let ts = at.timestamp();
        ts - ts.rem_euclid(self.bucket_secs)
    }

    /// Increment a counter metric at the given instant.
    pub fn record_count(&mut self, metric: &str, at: DateTime<Utc>) {
        let start = self.bucket_start(at);
        self.buckets
            .entry((metric.to_string(), start))
            .or_default()
            .increment();
    }

    /// Record a duration sample for a metric at the given instant.
    pub fn record_sample(&mut self, metric: &str, at: DateTime<Utc>, value: f64) {
        let start = self.bucket_start(at);
        self.buckets
            .entry((metric.to_string(), start))
            .or_default()
            .record_sample(value);
    }

    /// Drop buckets older than the horizon.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = self.bucket_start(now) - self.bucket_secs * self.horizon_buckets as i64;
        self.buckets.retain(|(_, start), _| *start >= cutoff);
    }

    /// Fold every bucket of `metric` overlapping `[from, to]` into one.
    /// A reversed range reads as empty.
    pub fn merged(&self, metric: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> MetricBucket {
        if to < from {
            return MetricBucket::default();
        }
        let lo = self.bucket_start(from);
        let hi = to.timestamp();
        let mut merged = MetricBucket::default();
        let range = (metric.to_string(), lo)..=(metric.to_string(), hi);
        for bucket in self.buckets.range(range).map(|(_, b)| b) {
            merged.merge(bucket);
        }
        merged
    }

    /// Summarize a metric over a range. Counters merge additively; the
    /// percentiles come from concatenated per-bucket reservoirs and are
    /// approximate.
    pub fn summarize(
        &self,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MetricSummary {
        let counts = self.merged(&format!("{metric}.count"), from, to);
        let durations = self.merged(&format!("{metric}.duration"), from, to);
        let span_secs = (to - from).num_seconds().max(1) as f64;
        MetricSummary {
            metric: metric.to_string(),
            count: counts.count,
            rate_per_sec: counts.count as f64 / span_secs,
            p50: durations.percentile(50.0),
            p95: durations.percentile(95.0),
        }
    }

    /// Resolve a rule selector to a scalar over `[from, to]`.
    ///
    /// Selector grammar, by suffix:
    /// - `<base>.count`: merged count of `<base>.count`
    /// - `<base>.rate`: merged count of `<base>.count` per second
    /// - `<base>.p50` / `<base>.p95`: percentile of `<base>` samples
    /// - anything else: merged count of the selector as a metric name
    ///
    /// `Ok(None)` means a percentile selector had no samples (no data, not
    /// a zero); count selectors always produce a value.
    pub fn resolve(
        &self,
        selector: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>, VigilError> {
        let selector = selector.trim();
        if selector.is_empty() {
            return Err(VigilError::Validation("empty metric selector".into()));
        }

        if let Some(base) = selector.strip_suffix(".rate") {
            let count = self.merged(&format!("{base}.count"), from, to).count;
            let span_secs = (to - from).num_seconds().max(1) as f64;
            return Ok(Some(count as f64 / span_secs));
        }
        if let Some(base) = selector.strip_suffix(".p50") {
            return Ok(self.merged(base, from, to).percentile(50.0));
        }
        if let Some(base) = selector.strip_suffix(".p95") {
            return Ok(self.merged(base, from, to).percentile(95.0));
        }
        Ok(Some(self.merged(selector, from, to).count as f64))
    }

    /// Bucket starts strictly older than the one containing `now`, used to
    /// flush closed buckets. Consumed newest-last so rollup rows land in
    /// chronological order.
    pub fn closed_before(&self, now: DateTime<Utc>) -> Vec<(String, i64)> {
        let current = self.bucket_start(now);
        self.buckets
            .keys()
            .filter(|(_, start)| *start < current)
            .cloned()
            .collect()
    }

    pub fn get(&self, metric: &str, bucket_start: i64) -> Option<&MetricBucket> {
        self.buckets.get(&(metric.to_string(), bucket_start))
    }

    /// Epoch second to a UTC timestamp.
    pub fn to_datetime(epoch: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(epoch, 0).single().unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(epoch: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(epoch, 0).single().unwrap()
    }

    #[test]
    fn bucket_start_aligns_to_granularity() {
        let store = WindowStore::new(60, 60);
        assert_eq!(store.bucket_start(at(1_000_000_030)), 1_000_000_020);
        assert_eq!(store.bucket_start(at(1_000_000_020)), 1_000_000_020);
    }

    #[test]
    fn counts_partition_per_bucket_and_merge_additively() {
        let mut store = WindowStore::new(60, 60);
        store.record_count("payment.failed.count", at(1_000_000_000));
        store.record_count("payment.failed.count", at(1_000_000_010));
        store.record_count("payment.failed.count", at(1_000_000_070));

        let merged = store.merged("payment.failed.count", at(999_999_990), at(1_000_000_080));
        assert_eq!(merged.count, 3);
        let single = store.merged("payment.failed.count", at(1_000_000_060), at(1_000_000_080));
        assert_eq!(single.count, 1);
    }

    #[test]
    fn prune_respects_horizon() {
        let mut store = WindowStore::new(60, 2);
        store.record_count("m.count", at(1_000_000_000));
        store.record_count("m.count", at(1_000_000_300));
        store.prune(at(1_000_000_300));

        let merged = store.merged("m.count", at(999_999_900), at(1_000_000_360));
        assert_eq!(merged.count, 1);
    }

    #[test]
    fn resolve_rate_and_percentiles() {
        let mut store = WindowStore::new(60, 60);
        let now = at(1_000_000_000);
        for _ in 0..30 {
            store.record_count("payment.failed.count", now);
        }
        for v in 1..=100 {
            store.record_sample("api.request.duration", now, v as f64);
        }

        let from = now - Duration::seconds(60);
        let rate = store
            .resolve("payment.failed.rate", from, now)
            .unwrap()
            .unwrap();
        assert!((rate - 0.5).abs() < 1e-9);

        let p95 = store
            .resolve("api.request.duration.p95", from, now)
            .unwrap()
            .unwrap();
        assert_eq!(p95, 95.0);

        // Percentile of a metric with no samples is "no data".
        assert_eq!(store.resolve("missing.duration.p95", from, now).unwrap(), None);
        // Count of an unseen metric is a legitimate zero.
        assert_eq!(
            store.resolve("missing.count", from, now).unwrap(),
            Some(0.0)
        );
    }

    #[test]
    fn reversed_range_reads_as_empty() {
        let mut store = WindowStore::new(60, 60);
        store.record_count("m.count", at(1_000_000_000));

        let summary = store.summarize("m", at(1_000_000_100), at(1_000_000_000));
        assert_eq!(summary.count, 0);
        assert_eq!(summary.p50, None);
        assert_eq!(
            store
                .resolve("m.count", at(1_000_000_100), at(1_000_000_000))
                .unwrap(),
            Some(0.0)
        );
    }

    #[test]
    fn closed_before_excludes_current_bucket() {
        let mut store = WindowStore::new(60, 60);
        store.record_count("m.count", at(1_000_000_000));
        store.record_count("m.count", at(1_000_000_070));

        let closed = store.closed_before(at(1_000_000_070));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].1, 999_999_960);
    }
}
