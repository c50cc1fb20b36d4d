//! Idempotent admission of externally-identified events.
//!
//! Producers that deliver at-least-once (webhooks, retried jobs) supply a
//! stable external identifier. Admission performs an atomic check-and-set
//! against the UNIQUE-keyed `idempotency` table and the entry insert in a
//! single SQLite transaction, so a crash between the two can never leave a
//! "seen but never stored" or "stored twice" state. Losers of a concurrent
//! race for the same identifier observe [`Admission::Duplicate`], never an
//! error.

use chrono::Utc;
use rusqlite::params;
use tracing::debug;
use uuid::Uuid;

use vigil_types::VigilError;

use crate::entry::{AuditEntry, NewEntry};
use crate::store::EventStore;

/// Outcome of admitting an externally-identified event.
#[derive(Debug, Clone)]
pub enum Admission {
    /// First sight of this identifier: the entry was stored.
    Admitted(AuditEntry),
    /// The identifier was seen before; the previously stored entry id.
    Duplicate(Uuid),
}

impl Admission {
    /// The stored entry's id, whichever way admission went.
    pub fn entry_id(&self) -> Uuid {
        match self {
            Admission::Admitted(entry) => entry.id,
            Admission::Duplicate(id) => *id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Admission::Duplicate(_))
    }
}

impl EventStore {
    /// Admit an externally-identified event exactly once.
    ///
    /// The identifier transitions at most once from absent to recorded;
    /// concurrent admissions of the same identifier collapse to a single
    /// stored entry. Duplicates are resolved silently, a conflict is never
    /// an error.
    pub fn admit(
        &mut self,
        external_id: &str,
        candidate: NewEntry,
    ) -> Result<Admission, VigilError> {
        if external_id.trim().is_empty() {
            return Err(VigilError::Validation(
                "external id must be non-empty".into(),
            ));
        }
        candidate.validate()?;

        let entry = candidate.into_entry();
        let tx = self
            .connection_mut()
            .transaction()
            .map_err(|e| VigilError::Storage(format!("admit transaction failed: {e}")))?;

        // Atomic check-and-set on the UNIQUE external_id. INSERT OR IGNORE
        // reports zero changed rows when the identifier is already recorded.
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO idempotency (external_id, entry_id, processed_at)
                 VALUES (?1, ?2, ?3)",
                params![external_id, entry.id.to_string(), Utc::now().to_rfc3339()],
            )
            .map_err(|e| VigilError::Storage(format!("idempotency insert failed: {e}")))?;

        if inserted == 0 {
            let existing: String = tx
                .query_row(
                    "SELECT entry_id FROM idempotency WHERE external_id = ?1",
                    params![external_id],
                    |row| row.get(0),
                )
                .map_err(|e| VigilError::Storage(format!("idempotency lookup failed: {e}")))?;
            tx.commit()
                .map_err(|e| VigilError::Storage(format!("admit commit failed: {e}")))?;

            let entry_id = Uuid::parse_str(&existing).map_err(|e| {
                VigilError::Storage(format!("corrupt idempotency record {existing:?}: {e}"))
            })?;
            debug!("duplicate admission for external id {external_id:?}");
            return Ok(Admission::Duplicate(entry_id));
        }

        crate::store::insert_entry(&tx, &entry)?;

        tx.commit()
            .map_err(|e| VigilError::Storage(format!("admit commit failed: {e}")))?;

        Ok(Admission::Admitted(entry))
    }
}
