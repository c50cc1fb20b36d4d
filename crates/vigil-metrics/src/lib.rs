//! Rolling bucketed metric aggregation over the Vigil audit stream.
//!
//! The [`Aggregator`] folds every admitted [`vigil_ledger::AuditEntry`] into
//! fixed-size time buckets: a count per action tag, duration samples where
//! the payload carries one, and any configured derived metrics. Crossing a
//! bucket boundary emits an [`EvalSignal`] to the alert engine and flushes
//! the closed buckets as durable rollup rows.
//!
//! Percentiles are approximate: each bucket keeps a bounded sample
//! reservoir, and merging a range of buckets concatenates reservoirs before
//! taking the nearest-rank value.

pub mod aggregator;
pub mod bucket;
pub mod health;
pub mod window;

pub use aggregator::{Aggregator, EvalSignal};
pub use bucket::{MetricBucket, MetricSummary};
pub use window::WindowStore;
