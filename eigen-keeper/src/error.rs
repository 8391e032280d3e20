//! Error types for the keeper service.

use thiserror::Error;

/// Result type for keeper service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors that can occur in the keeper service.
///
/// Per-eigen errors are caught at the cycle boundary and converted to
/// failure bookkeeping; only startup validation is fatal.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Chain gateway error.
    #[error("Gateway error: {0}")]
    Gateway(#[from] chain_gateway::GatewayError),

    /// Domain error from keeper-core.
    #[error("Keeper error: {0}")]
    Keeper(#[from] keeper_core::KeeperError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] keeper_store::StoreError),

    /// Transaction signing failed.
    #[error("Signing error: {0}")]
    Signing(String),

    /// Sell execution failed against the chain.
    #[error("Sell failed for {eigen}: {reason}")]
    SellFailed {
        /// The eigen whose sell failed.
        eigen: String,
        /// Failure reason (revert message or diagnostic).
        reason: String,
    },

    /// No pool resolved for an eigen that needs one.
    #[error("No pool resolved for eigen {0}")]
    PoolUnresolved(String),

    /// Imported wallet key failed integrity checks.
    #[error("Wallet key integrity error: {0}")]
    KeyIntegrity(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether this error should count toward the eigen's sell-block streak.
    #[must_use]
    pub const fn is_sell_failure(&self) -> bool {
        matches!(self, Self::SellFailed { .. })
    }
}

/// Configuration-specific errors. All fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Master key missing or malformed.
    #[error("Invalid keeper private key: {0}")]
    InvalidKeeperKey(String),

    /// Required setting missing.
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    /// Setting value out of range.
    #[error("Config validation failed: {0}")]
    Validation(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sell_failures_are_classified() {
        let err = ServiceError::SellFailed {
            eigen: "e1".into(),
            reason: "no_tokens_in_wallets".into(),
        };
        assert!(err.is_sell_failure());

        let err = ServiceError::PoolUnresolved("e1".into());
        assert!(!err.is_sell_failure());
    }
}
