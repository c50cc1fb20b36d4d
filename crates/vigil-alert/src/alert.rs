//! The alert model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use vigil_types::{AlertStatus, Severity};

/// An ongoing or past anomaly opened by a rule breach.
///
/// At most one alert per (rule id, dedup key) is active at a time; repeated
/// breaches refresh `last_seen_at` and `context` on the existing alert
/// instead of opening a duplicate.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub rule_id: String,
    pub dedup_key: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub opened_at: DateTime<Utc>,
    /// Last time the triggering condition was observed.
    pub last_seen_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who acknowledged the alert, for manually-resolved rules.
    pub acknowledged_by: Option<String>,
    /// Metric snapshot that caused the most recent trigger.
    pub context: serde_json::Value,
}

/// A single applied state change, reported by an evaluation pass.
#[derive(Debug, Clone, Serialize)]
pub struct AlertTransition {
    pub alert: Alert,
    /// `None` when the alert was just opened.
    pub previous_status: Option<AlertStatus>,
    pub new_status: AlertStatus,
}

/// Filter for listing alerts.
#[derive(Debug, Default, Clone)]
pub struct ActiveFilter {
    pub status: Option<AlertStatus>,
    pub severity: Option<Severity>,
    pub rule_id: Option<String>,
    pub limit: Option<usize>,
}

impl ActiveFilter {
    pub(crate) fn matches(&self, alert: &Alert) -> bool {
        if let Some(status) = self.status {
            if alert.status != status {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if alert.severity != severity {
                return false;
            }
        }
        if let Some(ref rule_id) = self.rule_id {
            if alert.rule_id != *rule_id {
                return false;
            }
        }
        true
    }
}
