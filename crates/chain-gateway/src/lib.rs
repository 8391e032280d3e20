//! Chain access layer for the eigen keeper.
//!
//! This crate provides a unified interface for everything the keeper does
//! on-chain: balance and block reads, batched multicall queries, event-log
//! scans, transaction submission with receipt tracking, and per-address
//! nonce discipline.
//!
//! # Overview
//!
//! The core of this crate is the [`ChainProvider`] trait, which defines the
//! blockchain operations the keeper needs. [`EvmProvider`] implements it over
//! alloy's HTTP transport, [`ProviderPool`] keeps one provider per chain id,
//! and [`NonceManager`] serializes sends per address.
//!
//! # Quick Start
//!
//! ```ignore
//! use chain_gateway::{ChainProvider, EvmProvider, NonceManager};
//!
//! let provider = Arc::new(EvmProvider::connect(rpc_url).await?);
//! let nonces = NonceManager::new(Arc::clone(&provider));
//!
//! let lease = nonces.acquire(address).await?;
//! let tx = build_signed_tx(lease.nonce());
//! provider.send_raw_transaction(tx).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core [`ChainProvider`] trait
//! - [`types`] - Transaction requests, receipts, log filters, multicall entries
//! - [`standard`] - [`EvmProvider`] over alloy HTTP
//! - [`pool`] - [`ProviderPool`] per-chain registry
//! - [`multicall`] - Batched reads through Multicall3
//! - [`nonce`] - [`NonceManager`] with acquire/release/invalidate discipline
//! - [`mock`] - [`mock::MockProvider`] for tests
//! - [`error`] - Error types with retryability classification

// ═══════════════════════════════════════════════════════════════════════════════
// MODULES
// ═══════════════════════════════════════════════════════════════════════════════

pub mod error;
pub mod mock;
pub mod multicall;
pub mod nonce;
pub mod pool;
pub mod standard;
pub mod traits;
pub mod types;

// ═══════════════════════════════════════════════════════════════════════════════
// RE-EXPORTS
// ═══════════════════════════════════════════════════════════════════════════════

pub use error::{GatewayError, Result};
pub use multicall::Multicall;
pub use nonce::{NonceLease, NonceManager};
pub use pool::ProviderPool;
pub use standard::EvmProvider;
pub use traits::ChainProvider;
pub use types::{CallRequest, CallResult, LogFilter, TransactionReceipt, TransactionRequest};

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexports_compile() {
        let _filter = LogFilter::new();
        let _request = TransactionRequest::new();
        let _pool = ProviderPool::new();
    }
}
