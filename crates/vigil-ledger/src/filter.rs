//! Composable filter for audit log queries.
//!
//! Builds a parameterized SQL WHERE clause dynamically from optional
//! filter criteria. All filters are AND-combined. Each `Some` field
//! adds a condition; `None` fields are ignored.

use chrono::{DateTime, Utc};

/// A composable filter for querying the audit log.
///
/// Use `Default::default()` for an empty filter (matches everything),
/// then set individual fields to narrow results.
#[derive(Debug, Default, Clone)]
pub struct AuditFilter {
    /// Only entries for this actor.
    pub actor_id: Option<String>,
    /// Only entries with this action tag.
    pub action: Option<String>,
    /// Only entries targeting this type.
    pub target_type: Option<String>,
    /// Only entries at or after this timestamp.
    pub from: Option<DateTime<Utc>>,
    /// Only entries at or before this timestamp.
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
    /// Number of entries to skip (for pagination).
    pub offset: Option<usize>,
}

/// A built SQL fragment with its positional parameters.
pub(crate) struct SqlFragment {
    /// The WHERE clause (without the "WHERE" keyword), or empty if no filters.
    pub where_clause: String,
    /// The positional parameter values, in order.
    pub params: Vec<Box<dyn rusqlite::types::ToSql>>,
    /// The LIMIT clause value, if any.
    pub limit: Option<usize>,
    /// The OFFSET clause value, if any.
    pub offset: Option<usize>,
}

impl AuditFilter {
    /// Build a SQL WHERE clause and parameter list from this filter.
    ///
    /// Parameters use positional `?N` placeholders starting from 1.
    pub(crate) fn to_sql(&self) -> SqlFragment {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut idx = 1usize;

        if let Some(ref actor_id) = self.actor_id {
            conditions.push(format!("actor_id = ?{idx}"));
            params.push(Box::new(actor_id.clone()));
            idx += 1;
        }

        if let Some(ref action) = self.action {
            conditions.push(format!("action = ?{idx}"));
            params.push(Box::new(action.clone()));
            idx += 1;
        }

        if let Some(ref target_type) = self.target_type {
            conditions.push(format!("target_type = ?{idx}"));
            params.push(Box::new(target_type.clone()));
            idx += 1;
        }

        if let Some(ref from) = self.from {
            conditions.push(format!("occurred_at >= ?{idx}"));
            params.push(Box::new(from.to_rfc3339()));
            idx += 1;
        }

        if let Some(ref to) = self.to {
            conditions.push(format!("occurred_at <= ?{idx}"));
            params.push(Box::new(to.to_rfc3339()));
        }

        SqlFragment {
            where_clause: conditions.join(" AND "),
            params,
            limit: self.limit,
            offset: self.offset,
        }
    }
}
