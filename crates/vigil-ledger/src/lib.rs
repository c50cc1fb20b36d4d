//! Append-only audit event store with idempotent admission.
//!
//! The [`EventStore`] persists [`AuditEntry`] facts in SQLite (WAL mode).
//! Entries are immutable once written; the only removal path is a
//! [`RetentionSweeper`] purge. Producers supplying an external event
//! identifier go through [`EventStore::admit`], which collapses concurrent
//! deliveries of the same identifier into a single stored entry.

pub mod entry;
pub mod filter;
pub mod guard;
pub mod query;
pub mod store;
pub mod sweep;

pub use entry::{AuditEntry, NewEntry, Origin};
pub use filter::AuditFilter;
pub use guard::Admission;
pub use store::EventStore;
pub use sweep::RetentionSweeper;
