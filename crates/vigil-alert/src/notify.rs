//! Pluggable notification sink with bounded-backoff retry.
//!
//! The core depends only on the [`Notifier`] trait; email, webhook, or chat
//! transports live outside. Dispatch is best-effort: failures are retried a
//! bounded number of times with doubling backoff, then logged and dropped.
//! The alert transition itself is authoritative and never rolled back or
//! blocked by a failing sink.

use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use vigil_types::{AlertStatus, Severity};

use crate::alert::AlertTransition;

/// The payload delivered to the sink on every alert state change.
#[derive(Debug, Clone, Serialize)]
pub struct NotifyPayload {
    pub alert_id: Uuid,
    pub rule_id: String,
    pub dedup_key: String,
    /// `None` when the alert was just opened.
    pub previous_status: Option<AlertStatus>,
    pub new_status: AlertStatus,
    pub severity: Severity,
    /// Metric snapshot that caused the trigger.
    pub context: serde_json::Value,
}

impl From<&AlertTransition> for NotifyPayload {
    fn from(transition: &AlertTransition) -> Self {
        NotifyPayload {
            alert_id: transition.alert.id,
            rule_id: transition.alert.rule_id.clone(),
            dedup_key: transition.alert.dedup_key.clone(),
            previous_status: transition.previous_status,
            new_status: transition.new_status,
            severity: transition.alert.severity,
            context: transition.alert.context.clone(),
        }
    }
}

/// An external notification transport.
pub trait Notifier: Send + Sync {
    fn notify(&self, payload: &NotifyPayload) -> Result<(), String>;
}

/// Default sink: writes each notification to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, payload: &NotifyPayload) -> Result<(), String> {
        info!(
            "alert {} ({}) {} -> {}",
            payload.alert_id,
            payload.severity,
            payload
                .previous_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "inactive".into()),
            payload.new_status
        );
        Ok(())
    }
}

/// Bounded retry policy for notification dispatch.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the first retry, doubled per subsequent retry.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            base_backoff: Duration::from_millis(100),
        }
    }
}

/// Deliver one payload, retrying per the policy. Returns whether any
/// attempt succeeded.
pub fn dispatch_with_retry(
    notifier: &dyn Notifier,
    payload: &NotifyPayload,
    policy: &RetryPolicy,
) -> bool {
    let mut backoff = policy.base_backoff;
    for attempt in 1..=policy.attempts.max(1) {
        match notifier.notify(payload) {
            Ok(()) => return true,
            Err(e) => {
                if attempt == policy.attempts.max(1) {
                    error!(
                        "dropping notification for alert {} after {attempt} attempt(s): {e}",
                        payload.alert_id
                    );
                } else {
                    warn!(
                        "notification attempt {attempt} for alert {} failed, retrying: {e}",
                        payload.alert_id
                    );
                    std::thread::sleep(backoff);
                    backoff *= 2;
                }
            }
        }
    }
    false
}
