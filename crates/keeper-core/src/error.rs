//! Error types for keeper-core operations.
//!
//! This module defines the error types used throughout the keeper-core crate.
//! Errors are categorized by their source (configuration, ledger, decision).

use thiserror::Error;

/// Result type alias for keeper-core operations.
pub type Result<T> = std::result::Result<T, KeeperError>;

/// Errors that can occur in keeper-core operations.
#[derive(Debug, Error)]
pub enum KeeperError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid eigen configuration value.
    #[error("invalid eigen config: {0}")]
    InvalidConfig(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Ledger errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Sell quantity exceeds the recorded position.
    #[error("sell of {requested} exceeds position of {held}")]
    SellExceedsPosition {
        /// Quantity requested to sell (base units).
        requested: String,
        /// Quantity currently held (base units).
        held: String,
    },

    /// Price input was zero or not finite.
    #[error("invalid price: {0}")]
    InvalidPrice(f64),

    // ─────────────────────────────────────────────────────────────────────────
    // Serialization
    // ─────────────────────────────────────────────────────────────────────────
    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        let err = KeeperError::InvalidPrice(0.0);
        assert!(err.to_string().contains("invalid price"));

        let err = KeeperError::SellExceedsPosition {
            requested: "10".into(),
            held: "5".into(),
        };
        assert!(err.to_string().contains("exceeds"));
    }
}
