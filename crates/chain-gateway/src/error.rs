//! Gateway error taxonomy.
//!
//! One enum covers everything the chain can do to the keeper: network
//! trouble, RPC rejections, reverts, nonce races, and malformed data.
//! [`GatewayError::is_retryable`] is the classification callers use to
//! decide between retrying and skipping an eigen for the cycle - the
//! gateway itself never retries.

use alloy::primitives::{Address, TxHash};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`GatewayError`].
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors from talking to a chain.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// RPC endpoint unreachable or connection dropped.
    #[error("connection failed: {0}")]
    Connection(String),

    /// No response within the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server rejected the request.
    #[error("RPC error ({code}): {message}")]
    Rpc {
        /// JSON-RPC error code (e.g., -32601 for method not found).
        code: i64,
        /// Server-supplied message.
        message: String,
    },

    /// Transaction was mined but reverted.
    #[error("transaction {tx_hash} reverted: {reason}")]
    Reverted {
        /// The transaction hash.
        tx_hash: TxHash,
        /// Revert reason when available.
        reason: String,
    },

    /// No receipt appeared within the wait window; the transaction may
    /// still be pending or may have been dropped.
    #[error("transaction {0} not found after waiting")]
    ReceiptNotFound(TxHash),

    /// A transaction already executed with this nonce. The sending path
    /// must invalidate its nonce cache and re-read the chain.
    #[error("nonce too low for {address}: expected >= {expected}, got {actual}")]
    NonceTooLow {
        /// Sending address.
        address: Address,
        /// Expected nonce.
        expected: u64,
        /// Provided nonce.
        actual: u64,
    },

    /// Calldata or return data could not be encoded/decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Valid JSON, wrong shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Caller misconfiguration (bad URL, duplicate registration).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No provider registered for the requested chain id.
    #[error("no provider for chain {0}")]
    UnknownChain(u64),

    /// Insufficient balance for the requested operation.
    #[error("insufficient balance: {address} has {balance}, needs {required}")]
    InsufficientBalance {
        /// The address short on funds.
        address: Address,
        /// Current balance.
        balance: String,
        /// Required balance.
        required: String,
    },

    /// Anything the other variants don't cover.
    #[error("gateway error: {0}")]
    Other(String),
}

impl GatewayError {
    /// Build an RPC error.
    #[must_use]
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Build a revert error.
    #[must_use]
    pub fn reverted(tx_hash: TxHash, reason: impl Into<String>) -> Self {
        Self::Reverted {
            tx_hash,
            reason: reason.into(),
        }
    }

    /// Whether retrying might succeed. Network trouble and server
    /// overload qualify; reverts and bad data never do.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            // -32005: limit exceeded; -32000: generic server error
            Self::Rpc { code, .. } => *code == -32005 || *code == -32000,
            _ => false,
        }
    }

    /// Whether this is a nonce race fixable by a cache resync.
    #[must_use]
    pub const fn is_nonce_error(&self) -> bool {
        matches!(self, Self::NonceTooLow { .. })
    }

    /// Whether this is an on-chain revert.
    #[must_use]
    pub const fn is_revert(&self) -> bool {
        matches!(self, Self::Reverted { .. })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERSIONS FROM alloy ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

impl From<alloy::transports::TransportError> for GatewayError {
    fn from(err: alloy::transports::TransportError) -> Self {
        // String-matching because alloy's transport errors are not
        // structured enough to classify otherwise
        let msg = err.to_string();
        let lower = msg.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            Self::Connection(format!("request timed out: {msg}"))
        } else if lower.contains("connection") || lower.contains("connect") || lower.contains("refused")
        {
            Self::Connection(msg)
        } else {
            Self::Other(msg)
        }
    }
}

impl From<alloy::sol_types::Error> for GatewayError {
    fn from(err: alloy::sol_types::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_classification() {
        assert!(GatewayError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(GatewayError::Connection("connection refused".into()).is_retryable());
        assert!(GatewayError::rpc(-32005, "rate limited").is_retryable());

        assert!(!GatewayError::rpc(-32601, "method not found").is_retryable());
        assert!(!GatewayError::reverted(TxHash::ZERO, "SLIPPAGE").is_retryable());
    }

    #[test]
    fn revert_classification() {
        assert!(GatewayError::reverted(TxHash::ZERO, "SLIPPAGE").is_revert());
        assert!(!GatewayError::UnknownChain(10143).is_revert());
    }

    #[test]
    fn nonce_classification() {
        let nonce_low = GatewayError::NonceTooLow {
            address: Address::ZERO,
            expected: 10,
            actual: 5,
        };
        assert!(nonce_low.is_nonce_error());
        assert!(!GatewayError::Timeout(Duration::from_secs(30)).is_nonce_error());
    }
}
