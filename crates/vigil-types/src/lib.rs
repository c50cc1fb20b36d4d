//! Shared types for the Vigil audit and alerting core.
//!
//! This crate holds the pieces every other Vigil crate depends on:
//!
//! - [`VigilError`]: the error taxonomy shared across the pipeline
//! - [`Severity`], [`AlertStatus`], [`HealthStatus`]: core enumerations
//! - [`AlertRule`], [`RuleSet`], [`RuleHandle`]: alert rule configuration
//!   with load-time validation and atomic hot reload
//! - [`MonitorConfig`]: tunables for the whole monitor pipeline

pub mod config;
pub mod error;
pub mod rules;
pub mod status;

pub use config::{HealthCheck, MetricDef, MonitorConfig};
pub use error::VigilError;
pub use rules::{AlertRule, Cadence, Comparator, RuleHandle, RuleSet};
pub use status::{AlertStatus, HealthStatus, Severity};
