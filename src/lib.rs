//! Vigil: an embeddable audit ingestion, metrics aggregation, and alerting
//! core.
//!
//! Producers hand well-formed events to [`Monitor::record_event`]; the
//! pipeline deduplicates externally-identified events, persists them in an
//! append-only SQLite audit log, folds them into rolling metric windows,
//! and evaluates alert rules against those windows, dispatching
//! notifications on every alert state change.
//!
//! ```no_run
//! use vigil::{Monitor, RecordEvent};
//! use vigil_types::{MonitorConfig, RuleSet};
//! use vigil_alert::LogNotifier;
//! use std::sync::Arc;
//!
//! let config = MonitorConfig::at("/var/lib/vigil/vigil.db");
//! let rules = RuleSet::from_toml(r#"
//!     [[rules]]
//!     id = "payment-failures"
//!     metric = "payment.failed.rate"
//!     comparator = "gt"
//!     threshold = 0.5
//!     severity = "high"
//! "#).unwrap();
//!
//! let monitor = Monitor::start(config, rules, Arc::new(LogNotifier)).unwrap();
//! monitor.record_event(RecordEvent {
//!     external_id: Some("evt-1".into()),
//!     ..RecordEvent::new("payment.failed", "payment")
//! }).unwrap();
//! ```

pub mod monitor;

pub use monitor::{Monitor, RecordEvent};

pub use vigil_alert::{ActiveFilter, Alert, AlertTransition, LogNotifier, Notifier, NotifyPayload};
pub use vigil_ledger::{Admission, AuditEntry, AuditFilter, NewEntry, Origin};
pub use vigil_metrics::MetricSummary;
pub use vigil_types::{
    AlertRule, AlertStatus, HealthStatus, MonitorConfig, RuleSet, Severity, VigilError,
};
