//! The chain access seam.
//!
//! [`ChainProvider`] is the one trait every chain-facing component of the
//! keeper talks through: balance and block reads, read-only calls, log
//! queries, and transaction submission with receipt tracking. Keeping the
//! surface minimal makes mock implementations cheap, which is how the
//! executors and the nonce manager are tested without a node.
//!
//! Retry policy deliberately lives with callers: the gateway classifies
//! errors (see [`GatewayError::is_retryable`]) but never retries reads on
//! its own.

use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::rpc::types::Log;
use async_trait::async_trait;

use crate::error::{GatewayError, Result};
use crate::types::{LogFilter, TransactionReceipt, TransactionRequest};

/// ERC20 `balanceOf(address)` selector.
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN PROVIDER TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything the keeper needs from an EVM chain.
///
/// `get_pending_nonce` and `get_token_balance` have defaults so that a mock
/// (or a chain without pending-state queries) only implements the basics.
#[async_trait]
pub trait ChainProvider: Send + Sync + 'static {
    /// Chain identifier (e.g., 10143 for Monad testnet).
    fn chain_id(&self) -> u64;

    /// Native balance in wei.
    async fn get_balance(&self, address: Address) -> Result<U256>;

    /// Current head block number.
    async fn get_block_number(&self) -> Result<u64>;

    /// Confirmed transaction count for an address.
    async fn get_nonce(&self, address: Address) -> Result<u64>;

    /// Transaction count including the mempool.
    ///
    /// Defaults to [`get_nonce`](Self::get_nonce); override when the chain
    /// answers pending-state queries.
    async fn get_pending_nonce(&self, address: Address) -> Result<u64> {
        self.get_nonce(address).await
    }

    /// Submit an RLP-encoded signed transaction.
    ///
    /// The returned hash does NOT mean the transaction confirmed - pair
    /// with [`wait_for_receipt`](Self::wait_for_receipt).
    async fn send_raw_transaction(&self, tx: Bytes) -> Result<TxHash>;

    /// Wait (bounded by `timeout`) for a transaction's receipt.
    async fn wait_for_receipt(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<TransactionReceipt>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<u128>;

    /// Read-only call; returns the raw return data.
    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes>;

    /// Event logs matching a filter.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>>;

    /// ERC20 balance, built on [`call`](Self::call) with the standard
    /// `balanceOf` selector.
    async fn get_token_balance(&self, token: Address, account: Address) -> Result<U256> {
        let mut data = BALANCE_OF_SELECTOR.to_vec();
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(account.as_slice());

        let result = self
            .call(&TransactionRequest::new().to(token).data(Bytes::from(data)))
            .await?;

        if result.len() < 32 {
            return Err(GatewayError::InvalidResponse(
                "balanceOf returned less than 32 bytes".into(),
            ));
        }
        Ok(U256::from_be_slice(&result[..32]))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ARC DELEGATION
// ═══════════════════════════════════════════════════════════════════════════════

// Arc<T> forwards so components can share one connected provider.
#[async_trait]
impl<T: ChainProvider + ?Sized> ChainProvider for std::sync::Arc<T> {
    fn chain_id(&self) -> u64 {
        (**self).chain_id()
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        (**self).get_balance(address).await
    }

    async fn get_block_number(&self) -> Result<u64> {
        (**self).get_block_number().await
    }

    async fn get_nonce(&self, address: Address) -> Result<u64> {
        (**self).get_nonce(address).await
    }

    async fn get_pending_nonce(&self, address: Address) -> Result<u64> {
        (**self).get_pending_nonce(address).await
    }

    async fn send_raw_transaction(&self, tx: Bytes) -> Result<TxHash> {
        (**self).send_raw_transaction(tx).await
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<TransactionReceipt> {
        (**self).wait_for_receipt(tx_hash, timeout).await
    }

    async fn gas_price(&self) -> Result<u128> {
        (**self).gas_price().await
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes> {
        (**self).call(tx).await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        (**self).get_logs(filter).await
    }

    async fn get_token_balance(&self, token: Address, account: Address) -> Result<U256> {
        (**self).get_token_balance(token, account).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[tokio::test]
    async fn token_balance_default_impl() {
        let provider = MockProvider::new();
        let token = Address::repeat_byte(0x10);
        let account = Address::repeat_byte(0x20);

        provider.set_token_balance(token, account, U256::from(5000));

        let balance = provider.get_token_balance(token, account).await.unwrap();
        assert_eq!(balance, U256::from(5000));
    }

    #[tokio::test]
    async fn arc_provider_delegates() {
        let provider = std::sync::Arc::new(MockProvider::with_chain_id(10143));
        assert_eq!(provider.chain_id(), 10143);

        provider.set_balance(Address::ZERO, U256::from(77));
        let balance = provider.get_balance(Address::ZERO).await.unwrap();
        assert_eq!(balance, U256::from(77));
    }
}
