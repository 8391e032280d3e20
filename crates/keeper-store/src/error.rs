//! Error types for store operations.

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Row data that cannot be mapped back into a domain type.
    ///
    /// Indicates corruption or a schema/code mismatch, never user input.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// Referenced eigen does not exist.
    #[error("unknown eigen: {0}")]
    UnknownEigen(String),

    /// Domain-level validation failure surfaced by keeper-core.
    #[error("domain error: {0}")]
    Domain(#[from] keeper_core::KeeperError),
}

impl StoreError {
    /// Create a corrupt-row error with context.
    #[must_use]
    pub fn corrupt(context: impl Into<String>) -> Self {
        Self::CorruptRow(context.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
