//! EventStore: SQLite-backed append-only audit event store.

use std::path::Path;

use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

use vigil_types::VigilError;

use crate::entry::{AuditEntry, NewEntry};

/// An append-only audit event store backed by SQLite.
///
/// Each entry insert is atomic: queries never observe a partially-written
/// entry. The store also owns the idempotency table so admission can mark
/// and insert in a single transaction (see [`crate::guard`]).
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open (or create) the audit store at the given path.
    ///
    /// Enables WAL mode and creates the `audit_log` and `idempotency`
    /// tables and indices if they do not exist.
    pub fn open(path: &Path) -> Result<Self, VigilError> {
        let conn = Connection::open(path)
            .map_err(|e| VigilError::Storage(format!("failed to open database: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| VigilError::Storage(format!("failed to set WAL mode: {e}")))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_id TEXT NOT NULL UNIQUE,
                actor_id TEXT,
                action TEXT NOT NULL,
                target_id TEXT,
                target_type TEXT NOT NULL,
                details TEXT,
                origin_ip TEXT,
                origin_agent TEXT,
                occurred_at TEXT NOT NULL,
                duration_ms REAL
            );
            CREATE INDEX IF NOT EXISTS idx_occurred_at ON audit_log(occurred_at);
            CREATE INDEX IF NOT EXISTS idx_action ON audit_log(action);
            CREATE INDEX IF NOT EXISTS idx_actor_id ON audit_log(actor_id);
            CREATE INDEX IF NOT EXISTS idx_target_type ON audit_log(target_type);

            CREATE TABLE IF NOT EXISTS idempotency (
                external_id TEXT PRIMARY KEY,
                entry_id TEXT NOT NULL,
                processed_at TEXT NOT NULL
            );",
        )
        .map_err(|e| VigilError::Storage(format!("failed to create schema: {e}")))?;

        info!("audit store opened at {}", path.display());

        Ok(EventStore { conn })
    }

    /// Append a validated entry. Atomic per entry; a failure here must be
    /// retried by the caller, the store never drops an admitted event.
    pub fn append(&mut self, candidate: NewEntry) -> Result<AuditEntry, VigilError> {
        candidate.validate()?;
        let entry = candidate.into_entry();
        self.insert_entry(&entry)?;
        Ok(entry)
    }

    pub(crate) fn insert_entry(&self, entry: &AuditEntry) -> Result<(), VigilError> {
        insert_entry(&self.conn, entry)
    }

    /// Fetch a single entry by its id.
    pub fn get(&self, id: Uuid) -> Result<Option<AuditEntry>, VigilError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT entry_id, actor_id, action, target_id, target_type, details,
                        origin_ip, origin_agent, occurred_at, duration_ms
                 FROM audit_log WHERE entry_id = ?1",
            )
            .map_err(|e| VigilError::Storage(format!("get prepare failed: {e}")))?;

        let mut rows = stmt
            .query_map(params![id.to_string()], crate::query::row_to_entry)
            .map_err(|e| VigilError::Storage(format!("get failed: {e}")))?;

        rows.next()
            .transpose()
            .map_err(|e| VigilError::Storage(format!("get read failed: {e}")))
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

/// Insert a single entry on the given connection (or open transaction).
pub(crate) fn insert_entry(conn: &Connection, entry: &AuditEntry) -> Result<(), VigilError> {
    let details = entry
        .details
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| VigilError::Validation(format!("unserializable details: {e}")))?;

    conn.execute(
        "INSERT INTO audit_log
         (entry_id, actor_id, action, target_id, target_type, details,
          origin_ip, origin_agent, occurred_at, duration_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.id.to_string(),
            entry.actor_id,
            entry.action,
            entry.target_id,
            entry.target_type,
            details,
            entry.origin.as_ref().and_then(|o| o.ip.clone()),
            entry.origin.as_ref().and_then(|o| o.agent.clone()),
            entry.occurred_at.to_rfc3339(),
            entry.duration_ms,
        ],
    )
    .map_err(|e| VigilError::Storage(format!("append failed: {e}")))?;
    Ok(())
}
