//! AuditEntry: a single immutable audit fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vigil_types::VigilError;

/// Where an event came from: producer IP and user agent, when known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub ip: Option<String>,
    pub agent: Option<String>,
}

/// An immutable audit fact: an action taken on a target at a point in time.
///
/// Once written to the store an entry is never mutated; the only removal
/// path is an explicit retention sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Option<String>,
    /// Action tag, e.g. `payment.failed` or `file.upload`.
    pub action: String,
    pub target_id: Option<String>,
    pub target_type: String,
    /// Opaque structured payload supplied by the producer.
    pub details: Option<serde_json::Value>,
    pub origin: Option<Origin>,
    pub occurred_at: DateTime<Utc>,
    /// Operation latency in milliseconds, when the payload carries one.
    /// Feeds duration summaries in the aggregator.
    pub duration_ms: Option<f64>,
}

/// A candidate entry, validated before it reaches the store.
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub actor_id: Option<String>,
    pub action: String,
    pub target_id: Option<String>,
    pub target_type: String,
    pub details: Option<serde_json::Value>,
    pub origin: Option<Origin>,
    /// When the action occurred. `None` means "now" at admission time.
    pub occurred_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
}

impl NewEntry {
    /// A minimal candidate with the two required fields.
    pub fn new(action: impl Into<String>, target_type: impl Into<String>) -> Self {
        NewEntry {
            action: action.into(),
            target_type: target_type.into(),
            ..Default::default()
        }
    }

    /// Reject candidates missing the required fields.
    pub fn validate(&self) -> Result<(), VigilError> {
        if self.action.trim().is_empty() {
            return Err(VigilError::Validation("entry is missing an action".into()));
        }
        if self.target_type.trim().is_empty() {
            return Err(VigilError::Validation(
                "entry is missing a target type".into(),
            ));
        }
        Ok(())
    }

    /// Materialize the candidate into a full entry with a fresh id.
    pub(crate) fn into_entry(self) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            actor_id: self.actor_id,
            action: self.action,
            target_id: self.target_id,
            target_type: self.target_type,
            details: self.details,
            origin: self.origin,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            duration_ms: self.duration_ms,
        }
    }
}
