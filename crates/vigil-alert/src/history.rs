//! Alert transition history in SQLite.
//!
//! The `alert_log` table records every applied alert transition plus
//! tie-break suppressions, giving an audit trail for alert behavior that is
//! queryable after the in-memory engine state is gone. History writes are
//! best-effort: a failed insert is logged and never blocks a transition.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::warn;

use vigil_types::{AlertRule, AlertStatus, VigilError};

use crate::alert::Alert;

/// SQL to create the alert_log table.
pub const CREATE_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS alert_log (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        alert_id        TEXT,
        rule_id         TEXT NOT NULL,
        dedup_key       TEXT NOT NULL,
        severity        TEXT NOT NULL,
        previous_status TEXT,
        new_status      TEXT,
        fired_at        TEXT NOT NULL,
        context         TEXT,
        suppressed      INTEGER NOT NULL DEFAULT 0
    );
";

/// A single row from the alert log.
#[derive(Debug, Clone)]
pub struct AlertLogRow {
    pub id: i64,
    pub alert_id: Option<String>,
    pub rule_id: String,
    pub dedup_key: String,
    pub severity: String,
    pub previous_status: Option<String>,
    pub new_status: Option<String>,
    pub fired_at: DateTime<Utc>,
    pub suppressed: bool,
}

/// Append-only log of alert transitions, on its own SQLite connection.
pub struct AlertHistory {
    conn: Connection,
}

impl AlertHistory {
    pub fn open(path: &Path) -> Result<Self, VigilError> {
        let conn = Connection::open(path)
            .map_err(|e| VigilError::Storage(format!("failed to open alert log: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| VigilError::Storage(format!("failed to create alert_log table: {e}")))?;
        Ok(AlertHistory { conn })
    }

    /// Record an applied transition. Failures are logged, not propagated --
    /// the transition itself is already authoritative.
    pub fn record_transition(
        &self,
        alert: &Alert,
        previous: Option<AlertStatus>,
        new: AlertStatus,
    ) {
        let result = self.conn.execute(
            "INSERT INTO alert_log
             (alert_id, rule_id, dedup_key, severity, previous_status, new_status,
              fired_at, context, suppressed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                alert.id.to_string(),
                alert.rule_id,
                alert.dedup_key,
                alert.severity.to_string(),
                previous.map(|s| s.to_string()),
                new.to_string(),
                Utc::now().to_rfc3339(),
                alert.context.to_string(),
            ],
        );
        if let Err(e) = result {
            warn!("failed to record alert transition for {}: {e}", alert.id);
        }
    }

    /// Record a tie-break suppression: the rule breached but a
    /// higher-severity rule already opened the dedup key this pass.
    pub fn record_suppressed(
        &self,
        rule: &AlertRule,
        dedup_key: &str,
        at: DateTime<Utc>,
        context: &serde_json::Value,
    ) {
        let result = self.conn.execute(
            "INSERT INTO alert_log
             (alert_id, rule_id, dedup_key, severity, previous_status, new_status,
              fired_at, context, suppressed)
             VALUES (NULL, ?1, ?2, ?3, NULL, NULL, ?4, ?5, 1)",
            params![
                rule.id,
                dedup_key,
                rule.severity.to_string(),
                at.to_rfc3339(),
                context.to_string(),
            ],
        );
        if let Err(e) = result {
            warn!("failed to record suppression for rule {:?}: {e}", rule.id);
        }
    }

    /// The most recent `limit` rows, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<AlertLogRow>, VigilError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, alert_id, rule_id, dedup_key, severity, previous_status,
                        new_status, fired_at, suppressed
                 FROM alert_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| VigilError::Storage(format!("alert log prepare failed: {e}")))?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(AlertLogRow {
                    id: row.get(0)?,
                    alert_id: row.get(1)?,
                    rule_id: row.get(2)?,
                    dedup_key: row.get(3)?,
                    severity: row.get(4)?,
                    previous_status: row.get(5)?,
                    new_status: row.get(6)?,
                    fired_at: row
                        .get::<_, String>(7)
                        .map(|s| DateTime::parse_from_rfc3339(&s).unwrap().into())?,
                    suppressed: row.get::<_, i64>(8)? != 0,
                })
            })
            .map_err(|e| VigilError::Storage(format!("alert log query failed: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| VigilError::Storage(format!("alert log read failed: {e}")))
    }
}
