//! The monitor facade: wires the pipeline stages together.
//!
//! Stage layout (explicit message passing between stages, each on its own
//! thread):
//!
//! ```text
//! producers -> admit/append (caller thread, store mutex)
//!           -> bounded channel -> metrics fold thread
//!           -> bucket-close signals -> alert dispatcher thread -> notifier
//! ```
//!
//! Admission is synchronous so the producer gets the entry reference (or
//! the duplicate resolution) back; everything downstream is decoupled
//! through bounded channels so a slow consumer never blocks ingestion.

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use vigil_alert::{
    dispatcher, notify, ActiveFilter, Alert, AlertEngine, AlertHistory, AlertTransition,
    EvalTrigger, Notifier, NotifyPayload, RetryPolicy,
};
use vigil_ledger::{
    Admission, AuditEntry, AuditFilter, EventStore, NewEntry, Origin, RetentionSweeper,
};
use vigil_metrics::{Aggregator, EvalSignal, MetricSummary};
use vigil_types::{HealthCheck, HealthStatus, MonitorConfig, RuleHandle, RuleSet, VigilError};

/// An event handed to the ingestion API by a producer.
///
/// With an `external_id`, delivery is deduplicated: repeated admissions of
/// the same identifier collapse to one stored entry. Without one, every
/// call creates a new entry.
#[derive(Debug, Clone, Default)]
pub struct RecordEvent {
    pub external_id: Option<String>,
    pub action: String,
    pub target_type: String,
    pub target_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub actor_id: Option<String>,
    pub origin: Option<Origin>,
    /// When the action occurred; `None` means "now".
    pub occurred_at: Option<DateTime<Utc>>,
    /// Latency carried by the payload, feeding duration summaries.
    pub duration_ms: Option<f64>,
}

impl RecordEvent {
    pub fn new(action: impl Into<String>, target_type: impl Into<String>) -> Self {
        RecordEvent {
            action: action.into(),
            target_type: target_type.into(),
            ..Default::default()
        }
    }
}

/// The running monitor pipeline.
///
/// Clone-free: share it behind an `Arc` for concurrent producers. All
/// methods take `&self`.
pub struct Monitor {
    store: Mutex<EventStore>,
    metrics: Arc<RwLock<Aggregator>>,
    engine: Arc<Mutex<AlertEngine>>,
    rules: Arc<RuleHandle>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    health_checks: Vec<HealthCheck>,
    db_path: PathBuf,
    entry_tx: Option<SyncSender<AuditEntry>>,
    signal_tx: SyncSender<EvalSignal>,
    fold_handle: Option<JoinHandle<()>>,
    dispatch_handle: Option<JoinHandle<()>>,
    sweep_tx: Option<SyncSender<()>>,
    sweep_handle: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Start the pipeline: open the stores, spawn the metrics fold thread
    /// and the alert dispatcher thread.
    pub fn start(
        config: MonitorConfig,
        rules: RuleSet,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, VigilError> {
        config.validate()?;

        let store = EventStore::open(&config.db_path)?;
        let (signal_tx, signal_rx) = mpsc::sync_channel::<EvalSignal>(config.channel_capacity);
        let (entry_tx, entry_rx) = mpsc::sync_channel::<AuditEntry>(config.channel_capacity);

        let aggregator = Aggregator::new(config.bucket_secs, config.horizon_buckets, &config.metrics)?
            .with_rollups(&config.db_path)?
            .with_signals(signal_tx.clone());
        let metrics = Arc::new(RwLock::new(aggregator));

        let rules = Arc::new(RuleHandle::new(rules));
        let history = AlertHistory::open(&config.db_path)?;
        let engine = Arc::new(Mutex::new(
            AlertEngine::new(rules.clone()).with_history(history),
        ));

        let retry = RetryPolicy {
            attempts: config.notify_attempts,
            base_backoff: Duration::from_millis(config.notify_backoff_ms),
        };

        // Metrics fold thread: drains admitted entries until the ingestion
        // side drops its sender.
        let fold_handle = {
            let metrics = metrics.clone();
            std::thread::spawn(move || {
                while let Ok(entry) = entry_rx.recv() {
                    match metrics.write() {
                        Ok(mut aggregator) => aggregator.on_entry(&entry),
                        Err(_) => {
                            warn!("metrics lock poisoned, stopping fold thread");
                            break;
                        }
                    }
                }
            })
        };

        let dispatch_handle = {
            let engine = engine.clone();
            let metrics = metrics.clone();
            let notifier = notifier.clone();
            let dispatcher_config = dispatcher::DispatcherConfig {
                tick: Duration::from_secs(config.tick_secs),
                retry,
            };
            std::thread::spawn(move || {
                dispatcher::run(engine, metrics, notifier, dispatcher_config, signal_rx)
            })
        };

        // Retention runs off to the side on its own connection, so a long
        // purge never sits on the admission mutex.
        let (sweep_tx, sweep_handle) = match config.retention_days {
            Some(days) => {
                let sweeper = RetentionSweeper::open(&config.db_path)?;
                let metrics = metrics.clone();
                let interval = Duration::from_secs(config.sweep_interval_secs);
                let (sweep_tx, sweep_rx) = mpsc::sync_channel::<()>(1);
                let handle = std::thread::spawn(move || loop {
                    match sweep_rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
                    if let Err(err) = sweeper.sweep(cutoff) {
                        warn!("retention sweep failed: {err}");
                    }
                    match metrics.read() {
                        Ok(metrics) => {
                            if let Err(err) = metrics.sweep_rollups(cutoff) {
                                warn!("rollup sweep failed: {err}");
                            }
                        }
                        Err(_) => warn!("metrics lock poisoned, skipping rollup sweep"),
                    }
                });
                (Some(sweep_tx), Some(handle))
            }
            None => (None, None),
        };

        info!("monitor pipeline started at {}", config.db_path.display());

        Ok(Monitor {
            store: Mutex::new(store),
            metrics,
            engine,
            rules,
            notifier,
            retry,
            health_checks: config.health,
            db_path: config.db_path,
            entry_tx: Some(entry_tx),
            signal_tx,
            fold_handle: Some(fold_handle),
            dispatch_handle: Some(dispatch_handle),
            sweep_tx,
            sweep_handle,
        })
    }

    /// Record one event. Deduplicates when `external_id` is present;
    /// forwards admitted entries to the aggregator.
    pub fn record_event(&self, event: RecordEvent) -> Result<Admission, VigilError> {
        let candidate = NewEntry {
            actor_id: event.actor_id,
            action: event.action,
            target_id: event.target_id,
            target_type: event.target_type,
            details: event.details,
            origin: event.origin,
            occurred_at: event.occurred_at,
            duration_ms: event.duration_ms,
        };

        let admission = {
            let mut store = self
                .store
                .lock()
                .map_err(|_| VigilError::Storage("audit store lock poisoned".into()))?;
            match event.external_id {
                Some(ref external_id) => store.admit(external_id, candidate)?,
                None => Admission::Admitted(store.append(candidate)?),
            }
        };

        // Only first admissions feed the metrics, so N deliveries of one
        // external id increment a counter once.
        if let Admission::Admitted(entry) = &admission {
            if let Some(tx) = &self.entry_tx {
                match tx.try_send(entry.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("metrics channel full, entry {} not aggregated", entry.id)
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        warn!("metrics fold thread gone, entry {} not aggregated", entry.id)
                    }
                }
            }
        }
        Ok(admission)
    }

    /// Query audit history: newest first, insertion order within ties.
    pub fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, VigilError> {
        self.store
            .lock()
            .map_err(|_| VigilError::Storage("audit store lock poisoned".into()))?
            .query(filter)
    }

    /// Summarize a metric over a time range. Percentiles are approximate.
    pub fn summarize(
        &self,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<MetricSummary, VigilError> {
        Ok(self
            .metrics
            .read()
            .map_err(|_| VigilError::Storage("metrics lock poisoned".into()))?
            .summarize(metric, from, to))
    }

    /// Current health, derived from the critical-metric checks and the
    /// last evaluation pass. Never fails: an unavailable dependency reads
    /// as degraded rather than an error.
    pub fn health_status(&self) -> HealthStatus {
        let evaluation_degraded = self
            .engine
            .lock()
            .map(|engine| engine.degraded())
            .unwrap_or(true);
        match self.metrics.read() {
            Ok(metrics) => {
                metrics.health_status(&self.health_checks, Utc::now(), evaluation_degraded)
            }
            Err(_) => HealthStatus::Degraded,
        }
    }

    /// List non-resolved alerts: severity descending, then oldest first.
    pub fn list_active_alerts(&self, filter: &ActiveFilter) -> Result<Vec<Alert>, VigilError> {
        Ok(self
            .engine
            .lock()
            .map_err(|_| VigilError::Storage("alert engine lock poisoned".into()))?
            .list_active(filter))
    }

    /// Acknowledge an active alert and notify the sink (best-effort).
    pub fn acknowledge(&self, alert_id: Uuid, by: &str) -> Result<Alert, VigilError> {
        let alert = self
            .engine
            .lock()
            .map_err(|_| VigilError::Storage("alert engine lock poisoned".into()))?
            .acknowledge(alert_id, by)?;
        self.notify_change(&alert, Some(vigil_types::AlertStatus::Active));
        Ok(alert)
    }

    /// Manually resolve an alert and notify the sink (best-effort).
    pub fn resolve_alert(&self, alert_id: Uuid) -> Result<Alert, VigilError> {
        let (alert, previous) = {
            let mut engine = self
                .engine
                .lock()
                .map_err(|_| VigilError::Storage("alert engine lock poisoned".into()))?;
            let previous = engine
                .list_active(&ActiveFilter::default())
                .iter()
                .find(|a| a.id == alert_id)
                .map(|a| a.status);
            (engine.resolve(alert_id)?, previous)
        };
        self.notify_change(&alert, previous);
        Ok(alert)
    }

    /// Swap in a new rule set. Atomic: an in-flight evaluation pass keeps
    /// the snapshot it started with.
    pub fn reload_rules(&self, rules: RuleSet) {
        self.rules.reload(rules);
        info!("rule set reloaded");
    }

    /// Run one evaluation pass synchronously and dispatch notifications.
    /// The background dispatcher covers steady-state; this is for callers
    /// that need the transitions right now (tests, admin endpoints).
    pub fn evaluate_now(&self) -> Result<Vec<AlertTransition>, VigilError> {
        let transitions = {
            let metrics = self
                .metrics
                .read()
                .map_err(|_| VigilError::Storage("metrics lock poisoned".into()))?;
            let mut engine = self
                .engine
                .lock()
                .map_err(|_| VigilError::Storage("alert engine lock poisoned".into()))?;
            engine.evaluate(Utc::now(), EvalTrigger::Tick, &metrics)
        };
        for transition in &transitions {
            notify::dispatch_with_retry(
                self.notifier.as_ref(),
                &NotifyPayload::from(transition),
                &self.retry,
            );
        }
        Ok(transitions)
    }

    /// Remove audit entries, idempotency records, and metric rollups older
    /// than the horizon. Returns the number of audit entries removed.
    pub fn retention_sweep(&self, older_than: DateTime<Utc>) -> Result<usize, VigilError> {
        // Own connection: the purge runs concurrently with admissions
        // instead of under the store mutex.
        let removed = RetentionSweeper::open(&self.db_path)?.sweep(older_than)?;
        self.metrics
            .read()
            .map_err(|_| VigilError::Storage("metrics lock poisoned".into()))?
            .sweep_rollups(older_than)?;
        Ok(removed)
    }

    /// Drain the pipeline and join the background threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Dropping the entry sender ends the fold thread once it drains.
        self.entry_tx.take();
        if let Some(handle) = self.fold_handle.take() {
            if handle.join().is_err() {
                warn!("metrics fold thread panicked");
            }
        }
        // Blocking send: the dispatcher drains one message per loop turn,
        // so a full channel only delays the shutdown marker, never drops
        // it. Errors mean the dispatcher is already gone.
        let _ = self.signal_tx.send(EvalSignal::Shutdown);
        if let Some(handle) = self.dispatch_handle.take() {
            if handle.join().is_err() {
                warn!("alert dispatcher thread panicked");
            }
        }
        if let Some(tx) = self.sweep_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.sweep_handle.take() {
            if handle.join().is_err() {
                warn!("retention sweeper thread panicked");
            }
        }
    }

    fn notify_change(&self, alert: &Alert, previous: Option<vigil_types::AlertStatus>) {
        let payload = NotifyPayload {
            alert_id: alert.id,
            rule_id: alert.rule_id.clone(),
            dedup_key: alert.dedup_key.clone(),
            previous_status: previous,
            new_status: alert.status,
            severity: alert.severity,
            context: alert.context.clone(),
        };
        notify::dispatch_with_retry(self.notifier.as_ref(), &payload, &self.retry);
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}
