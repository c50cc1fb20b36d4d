//! The metrics aggregator: folds audit entries into metric windows.
//!
//! Every admitted entry increments `<action>.count`, feeds
//! `<action>.duration` when the payload carries a latency, and updates any
//! configured derived metrics whose glob selector matches the action. The
//! event stream is also the aggregator's clock: the first entry past a
//! bucket boundary closes the previous buckets, flushes them as durable
//! rollup rows, and emits an [`EvalSignal`] to the alert engine.

use std::path::Path;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use glob::Pattern;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use vigil_ledger::AuditEntry;
use vigil_types::{MetricDef, VigilError};

use crate::bucket::MetricSummary;
use crate::window::WindowStore;

/// Signal sent from the aggregator to the alert dispatcher.
#[derive(Debug, Clone)]
pub enum EvalSignal {
    /// A bucket boundary was crossed; closed buckets are final.
    BucketClosed { bucket_start: DateTime<Utc> },
    /// The pipeline is shutting down.
    Shutdown,
}

/// A metric definition with its selector compiled.
struct CompiledDef {
    name: String,
    selector: Pattern,
    target_type: Option<String>,
}

/// Folds the audit stream into rolling metric windows.
pub struct Aggregator {
    windows: WindowStore,
    defs: Vec<CompiledDef>,
    /// Behind a mutex: `Connection` is not `Sync`, and the aggregator is
    /// shared across the fold and dispatcher threads.
    rollups: Option<Mutex<Connection>>,
    signal_tx: Option<SyncSender<EvalSignal>>,
    /// Start of the newest bucket seen so far.
    current_bucket: Option<i64>,
    /// Buckets before this start have already been flushed.
    flushed_before: i64,
}

impl Aggregator {
    pub fn new(
        bucket_secs: u64,
        horizon_buckets: usize,
        defs: &[MetricDef],
    ) -> Result<Self, VigilError> {
        let compiled = defs
            .iter()
            .map(|def| {
                Pattern::new(&def.selector)
                    .map(|selector| CompiledDef {
                        name: def.name.clone(),
                        selector,
                        target_type: def.target_type.clone(),
                    })
                    .map_err(|e| {
                        VigilError::Config(format!("bad selector {:?}: {e}", def.selector))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Aggregator {
            windows: WindowStore::new(bucket_secs, horizon_buckets),
            defs: compiled,
            rollups: None,
            signal_tx: None,
            current_bucket: None,
            flushed_before: i64::MIN,
        })
    }

    /// Persist closed buckets as rollup rows in the given database.
    pub fn with_rollups(mut self, path: &Path) -> Result<Self, VigilError> {
        let conn = Connection::open(path)
            .map_err(|e| VigilError::Storage(format!("failed to open rollup database: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metric_rollups (
                metric TEXT NOT NULL,
                bucket_start INTEGER NOT NULL,
                count INTEGER NOT NULL,
                p50 REAL,
                p95 REAL,
                PRIMARY KEY (metric, bucket_start)
            );",
        )
        .map_err(|e| VigilError::Storage(format!("failed to create rollup table: {e}")))?;
        info!("metric rollups enabled at {}", path.display());
        self.rollups = Some(Mutex::new(conn));
        Ok(self)
    }

    /// Emit bucket-close signals on the given channel.
    pub fn with_signals(mut self, tx: SyncSender<EvalSignal>) -> Self {
        self.signal_tx = Some(tx);
        self
    }

    /// Fold one entry into the windows. Detects bucket-boundary crossings
    /// first so the closed buckets are final before the new entry lands.
    pub fn on_entry(&mut self, entry: &AuditEntry) {
        let at = entry.occurred_at;
        let bucket = self.windows.bucket_start(at);
        match self.current_bucket {
            Some(current) if bucket > current => {
                self.close_buckets(at);
                self.current_bucket = Some(bucket);
            }
            Some(_) => {}
            None => self.current_bucket = Some(bucket),
        }

        self.windows.record_count(&format!("{}.count", entry.action), at);
        if let Some(duration) = entry.duration_ms {
            self.windows
                .record_sample(&format!("{}.duration", entry.action), at, duration);
        }

        for def in &self.defs {
            if let Some(ref want) = def.target_type {
                if *want != entry.target_type {
                    continue;
                }
            }
            if def.selector.matches(&entry.action) {
                self.windows.record_count(&format!("{}.count", def.name), at);
                if let Some(duration) = entry.duration_ms {
                    self.windows
                        .record_sample(&format!("{}.duration", def.name), at, duration);
                }
            }
        }
    }

    /// Flush every closed bucket, signal the dispatcher, and prune beyond
    /// the horizon.
    fn close_buckets(&mut self, now: DateTime<Utc>) {
        let current = self.windows.bucket_start(now);
        let closed = self.windows.closed_before(now);

        if let Some(Ok(conn)) = self.rollups.as_ref().map(|m| m.lock()) {
            for (metric, start) in &closed {
                if *start < self.flushed_before {
                    continue;
                }
                let Some(bucket) = self.windows.get(metric, *start) else {
                    continue;
                };
                let result = conn.execute(
                    "INSERT OR REPLACE INTO metric_rollups
                     (metric, bucket_start, count, p50, p95)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        metric,
                        start,
                        bucket.count as i64,
                        bucket.percentile(50.0),
                        bucket.percentile(95.0),
                    ],
                );
                if let Err(e) = result {
                    warn!("failed to flush rollup for {metric}: {e}");
                }
            }
        }
        self.flushed_before = current;
        self.windows.prune(now);

        if let Some(tx) = &self.signal_tx {
            let signal = EvalSignal::BucketClosed {
                bucket_start: WindowStore::to_datetime(current),
            };
            match tx.try_send(signal) {
                Ok(()) => debug!("bucket close signaled at {current}"),
                Err(TrySendError::Full(_)) => {
                    warn!("evaluation signal channel full, dropping bucket-close signal")
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    /// Summarize a metric over a range. Percentiles are approximate (merged
    /// bounded reservoirs).
    pub fn summarize(
        &self,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MetricSummary {
        self.windows.summarize(metric, from, to)
    }

    /// Resolve a rule selector over the window ending at `now`.
    pub fn window_value(
        &self,
        selector: &str,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>, VigilError> {
        let from = now - chrono::Duration::seconds(window_secs as i64);
        self.windows.resolve(selector, from, now)
    }

    /// Resolve a rule selector over the window immediately preceding the
    /// one ending at `now` (for rate-of-change comparisons).
    pub fn previous_window_value(
        &self,
        selector: &str,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>, VigilError> {
        let window = chrono::Duration::seconds(window_secs as i64);
        self.windows.resolve(selector, now - window - window, now - window)
    }

    /// Value of a selector within the bucket containing `now`, for health
    /// checks over the current window.
    pub fn current_window_value(
        &self,
        selector: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>, VigilError> {
        let from = WindowStore::to_datetime(self.windows.bucket_start(now));
        self.windows.resolve(selector, from, now)
    }

    /// Remove rollup rows for buckets older than the horizon.
    pub fn sweep_rollups(&self, older_than: DateTime<Utc>) -> Result<usize, VigilError> {
        let Some(rollups) = &self.rollups else {
            return Ok(0);
        };
        let conn = rollups
            .lock()
            .map_err(|_| VigilError::Storage("rollup connection lock poisoned".into()))?;
        let removed = conn
            .execute(
                "DELETE FROM metric_rollups WHERE bucket_start < ?1",
                params![older_than.timestamp()],
            )
            .map_err(|e| VigilError::Storage(format!("rollup sweep failed: {e}")))?;
        Ok(removed)
    }

    /// Count of persisted rollup rows (inspection and tests).
    pub fn rollup_rows(&self) -> Result<usize, VigilError> {
        let Some(rollups) = &self.rollups else {
            return Ok(0);
        };
        let conn = rollups
            .lock()
            .map_err(|_| VigilError::Storage("rollup connection lock poisoned".into()))?;
        conn.query_row("SELECT COUNT(*) FROM metric_rollups", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|c| c as usize)
        .map_err(|e| VigilError::Storage(format!("rollup count failed: {e}")))
    }
}
