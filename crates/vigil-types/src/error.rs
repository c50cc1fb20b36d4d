//! Error types shared across all Vigil crates.

/// Errors that can occur across the Vigil core.
///
/// Each variant is a failure class with its own retry semantics: validation
/// failures are rejected before persistence and must not be retried, storage
/// failures must be retried by the caller with backoff, and configuration
/// failures leave the previously loaded rule set active.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    /// Malformed input, rejected before anything is persisted.
    #[error("validation error: {0}")]
    Validation(String),

    /// The persistence layer failed. An admitted event is never silently
    /// dropped; the caller retries with backoff.
    #[error("storage error: {0}")]
    Storage(String),

    /// Reference to an unknown alert or rule.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed rule set or monitor configuration, rejected at load time.
    #[error("configuration error: {0}")]
    Config(String),
}
