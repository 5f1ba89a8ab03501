//! Registry error types.

use thiserror::Error;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Object not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Object already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The stored object changed since it was read (optimistic concurrency control).
    #[error("conflict on {key}: expected resource version {expected}, got {actual}")]
    Conflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

impl RegistryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
