//! Per-chain provider registry.
//!
//! The keeper can drive eigens on several chains at once. [`ProviderPool`]
//! keeps one connected read client per chain id so every component resolves
//! its provider by the chain id stored on the eigen config.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::error::{GatewayError, Result};
use crate::standard::EvmProvider;

// ═══════════════════════════════════════════════════════════════════════════════
// PROVIDER POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// One connected [`EvmProvider`] per chain id.
///
/// Built once at startup from the configured RPC URLs; lookup is infallible
/// for registered chains and an explicit error otherwise.
#[derive(Debug, Default)]
pub struct ProviderPool {
    providers: HashMap<u64, Arc<EvmProvider>>,
}

impl ProviderPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to an RPC URL and register the resulting provider under its
    /// reported chain id.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or chain-id query fails, or if the
    /// chain id is already registered.
    pub async fn connect(&mut self, rpc_url: &str) -> Result<u64> {
        let provider = EvmProvider::connect(rpc_url).await?;
        let chain_id = {
            use crate::traits::ChainProvider as _;
            provider.chain_id()
        };

        if self.providers.contains_key(&chain_id) {
            return Err(GatewayError::InvalidConfig(format!(
                "chain {chain_id} registered twice"
            )));
        }

        info!(chain_id, rpc_url, "Registered chain provider");
        self.providers.insert(chain_id, Arc::new(provider));
        Ok(chain_id)
    }

    /// Register an already-connected provider (used by tests).
    pub fn insert(&mut self, chain_id: u64, provider: Arc<EvmProvider>) {
        self.providers.insert(chain_id, provider);
    }

    /// Resolve the provider for a chain id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UnknownChain`] for unregistered chains.
    pub fn get(&self, chain_id: u64) -> Result<Arc<EvmProvider>> {
        self.providers
            .get(&chain_id)
            .cloned()
            .ok_or(GatewayError::UnknownChain(chain_id))
    }

    /// Registered chain ids.
    pub fn chain_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.providers.keys().copied()
    }

    /// Number of registered chains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_chain_errors() {
        let pool = ProviderPool::new();
        let err = pool.get(10143).unwrap_err();
        assert!(matches!(err, GatewayError::UnknownChain(10143)));
    }

    #[test]
    fn empty_pool() {
        let pool = ProviderPool::new();
        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.chain_ids().count(), 0);
    }
}
