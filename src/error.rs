//! Engine error taxonomy
//!
//! Absence of a signal is never an error: derivation falls back to
//! documented defaults. These variants cover the cases callers must
//! handle explicitly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown agent, approval, or policy id
    #[error("not found: {0}")]
    NotFound(String),

    /// Attempt to decide an approval that is no longer pending
    #[error("approval already decided: {0}")]
    AlreadyDecided(String),

    /// Malformed payload, rejected as a whole with no partial apply
    #[error("invalid input: {0}")]
    Validation(String),

    /// Concurrent duplicate-approval race caught by the store's
    /// uniqueness guard. Safe to retry: reconciliation is idempotent.
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// Transient storage failure; writes are retryable
    #[error("storage failure: {0}")]
    Store(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Store(format!("{err:#}"))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Validation(err.to_string())
    }
}
