//! Query interface for audit records.

use chrono::DateTime;
use uuid::Uuid;

use vigil_types::VigilError;

use crate::entry::{AuditEntry, Origin};
use crate::filter::AuditFilter;
use crate::store::EventStore;

const SELECT_COLUMNS: &str = "entry_id, actor_id, action, target_id, target_type, details,
     origin_ip, origin_agent, occurred_at, duration_ms";

impl EventStore {
    /// Return entries matching the filter, ordered by `occurred_at`
    /// descending. Entries with identical timestamps keep their insertion
    /// order (ascending rowid within the tie).
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, VigilError> {
        let fragment = filter.to_sql();

        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM audit_log");
        if !fragment.where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&fragment.where_clause);
        }
        sql.push_str(" ORDER BY occurred_at DESC, id ASC");
        // LIMIT -1 is the SQLite idiom for "no limit", so an offset works
        // without one.
        match (fragment.limit, fragment.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"))
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        let mut stmt = self
            .connection()
            .prepare(&sql)
            .map_err(|e| VigilError::Storage(format!("query prepare failed: {e}")))?;

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            fragment.params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), row_to_entry)
            .map_err(|e| VigilError::Storage(format!("query failed: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| VigilError::Storage(format!("query read failed: {e}")))
    }

    /// Return the last `n` entries, most recent first.
    pub fn query_last(&self, n: usize) -> Result<Vec<AuditEntry>, VigilError> {
        self.query(&AuditFilter {
            limit: Some(n),
            ..Default::default()
        })
    }

    /// Return the total number of entries in the store.
    pub fn count(&self) -> Result<usize, VigilError> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|c| c as usize)
            .map_err(|e| VigilError::Storage(format!("count failed: {e}")))
    }

    /// Count entries matching the filter.
    pub fn count_matching(&self, filter: &AuditFilter) -> Result<usize, VigilError> {
        let fragment = filter.to_sql();
        let mut sql = "SELECT COUNT(*) FROM audit_log".to_string();
        if !fragment.where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&fragment.where_clause);
        }

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            fragment.params.iter().map(|p| p.as_ref()).collect();
        self.connection()
            .query_row(&sql, param_refs.as_slice(), |row| row.get::<_, i64>(0))
            .map(|c| c as usize)
            .map_err(|e| VigilError::Storage(format!("count_matching failed: {e}")))
    }
}

/// Map a SQLite row to an AuditEntry.
pub(crate) fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let origin_ip: Option<String> = row.get(6)?;
    let origin_agent: Option<String> = row.get(7)?;
    let origin = if origin_ip.is_some() || origin_agent.is_some() {
        Some(Origin {
            ip: origin_ip,
            agent: origin_agent,
        })
    } else {
        None
    };

    Ok(AuditEntry {
        id: row
            .get::<_, String>(0)
            .map(|s| Uuid::parse_str(&s).unwrap())?,
        actor_id: row.get(1)?,
        action: row.get(2)?,
        target_id: row.get(3)?,
        target_type: row.get(4)?,
        details: row
            .get::<_, Option<String>>(5)?
            .map(|s| serde_json::from_str(&s).unwrap()),
        origin,
        occurred_at: row
            .get::<_, String>(8)
            .map(|s| DateTime::parse_from_rfc3339(&s).unwrap().into())?,
        duration_ms: row.get(9)?,
    })
}
