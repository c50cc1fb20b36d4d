//! Retention sweeping on a dedicated connection.
//!
//! The sweeper opens its own SQLite connection so a purge never contends
//! with the admission path's store lock; WAL mode lets the delete run
//! alongside concurrent appends. Deletes are batched so a large backlog is
//! removed in bounded steps instead of one long transaction.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::info;

use vigil_types::VigilError;

/// Rows removed per delete statement.
const SWEEP_BATCH: usize = 500;

/// Removes audit entries and idempotency records past the retention
/// horizon. Independent of [`crate::EventStore`]; safe to run from a
/// background thread.
pub struct RetentionSweeper {
    conn: Connection,
    batch: usize,
}

impl RetentionSweeper {
    /// Open a sweeper connection against an existing audit database.
    pub fn open(path: &Path) -> Result<Self, VigilError> {
        let conn = Connection::open(path)
            .map_err(|e| VigilError::Storage(format!("failed to open sweep connection: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| VigilError::Storage(format!("failed to set WAL mode: {e}")))?;
        Ok(RetentionSweeper {
            conn,
            batch: SWEEP_BATCH,
        })
    }

    #[cfg(test)]
    fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch;
        self
    }

    /// Remove entries older than the cutoff, along with expired idempotency
    /// records. Returns the number of audit entries removed.
    pub fn sweep(&self, older_than: DateTime<Utc>) -> Result<usize, VigilError> {
        let cutoff = older_than.to_rfc3339();

        let mut removed = 0usize;
        loop {
            let n = self
                .conn
                .execute(
                    "DELETE FROM audit_log WHERE id IN
                     (SELECT id FROM audit_log WHERE occurred_at < ?1 LIMIT ?2)",
                    params![cutoff, self.batch as i64],
                )
                .map_err(|e| VigilError::Storage(format!("retention sweep failed: {e}")))?;
            removed += n;
            if n < self.batch {
                break;
            }
        }

        let expired = self
            .conn
            .execute(
                "DELETE FROM idempotency WHERE processed_at < ?1",
                params![cutoff],
            )
            .map_err(|e| VigilError::Storage(format!("idempotency sweep failed: {e}")))?;

        if removed > 0 || expired > 0 {
            info!(
                "retention sweep removed {} audit entries and {} idempotency records",
                removed, expired
            );
        }
        Ok(removed)
    }
}
