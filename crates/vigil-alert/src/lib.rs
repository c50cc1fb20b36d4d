//! Alert rule evaluation and lifecycle management for Vigil.
//!
//! The [`AlertEngine`] evaluates metric windows against the current rule
//! set snapshot and drives each alert through its lifecycle
//! (active -> acknowledged -> resolved). It provides:
//!
//! - [`Alert`], [`AlertTransition`]: the alert model and its state changes
//! - [`engine`]: the per-(rule, dedup-key) state machine
//! - [`notify`]: the pluggable notification sink with bounded-backoff retry
//! - [`history`]: the SQLite transition log
//! - [`dispatcher`]: the background evaluation loop

pub mod alert;
pub mod dispatcher;
pub mod engine;
pub mod history;
pub mod notify;

pub use alert::{ActiveFilter, Alert, AlertTransition};
pub use dispatcher::{run, DispatcherConfig};
pub use engine::{AlertEngine, EvalTrigger};
pub use history::AlertHistory;
pub use notify::{LogNotifier, Notifier, NotifyPayload, RetryPolicy};
