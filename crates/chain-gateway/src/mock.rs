//! In-memory provider for tests.
//!
//! [`MockProvider`] keeps all chain state in one mutex-guarded struct:
//! balances, nonces, token balances, canned call responses, and logs.
//! Failure switches let tests exercise the send-failure and revert paths.
//!
//! # Panics
//!
//! Lock poisoning panics; that only happens when a test already panicked
//! while holding the lock.

// Test-support module: panicking on a poisoned lock is the right behavior.
#![allow(clippy::expect_used)]
#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes, TxHash, U256};
use alloy::rpc::types::Log;
use async_trait::async_trait;

use crate::error::{GatewayError, Result};
use crate::traits::ChainProvider;
use crate::types::{LogFilter, TransactionReceipt, TransactionRequest};

// ═══════════════════════════════════════════════════════════════════════════════
// MOCK STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything the mock chain remembers.
#[derive(Debug, Default)]
struct MockState {
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    token_balances: HashMap<(Address, Address), U256>,
    call_responses: HashMap<(Address, [u8; 4]), Bytes>,
    logs: Vec<Log>,
    block_number: u64,
    calls_fail: bool,
    sends_fail: bool,
    receipts_revert: bool,
}

/// Mock blockchain provider.
///
/// ```
/// use chain_gateway::mock::MockProvider;
/// use chain_gateway::ChainProvider;
/// use alloy::primitives::{Address, U256};
///
/// #[tokio::main]
/// async fn main() {
///     let provider = MockProvider::new();
///     provider.set_balance(Address::ZERO, U256::from(1000));
///
///     let balance = provider.get_balance(Address::ZERO).await.unwrap();
///     assert_eq!(balance, U256::from(1000));
/// }
/// ```
#[derive(Debug)]
pub struct MockProvider {
    chain_id: u64,
    state: Mutex<MockState>,
    tx_counter: AtomicU64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a mock with the default (anvil) chain id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_chain_id(31337)
    }

    /// Create a mock with a specific chain id.
    #[must_use]
    pub fn with_chain_id(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(MockState {
                block_number: 1,
                ..MockState::default()
            }),
            tx_counter: AtomicU64::new(1),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Set the native balance for an address.
    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state().balances.insert(address, balance);
    }

    /// Set the nonce for an address.
    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.state().nonces.insert(address, nonce);
    }

    /// Set a token balance.
    pub fn set_token_balance(&self, token: Address, account: Address, balance: U256) {
        self.state().token_balances.insert((token, account), balance);
    }

    /// Set the head block number.
    pub fn set_block_number(&self, block: u64) {
        self.state().block_number = block;
    }

    /// Register a canned response for calls to `(to, selector)`.
    pub fn set_call_response(&self, to: Address, selector: [u8; 4], response: Bytes) {
        self.state().call_responses.insert((to, selector), response);
    }

    /// Push a log that `get_logs` (and receipts) will return.
    pub fn push_log(&self, log: Log) {
        self.state().logs.push(log);
    }

    /// Make every `call` fail with an RPC error.
    pub fn set_calls_fail(&self, fail: bool) {
        self.state().calls_fail = fail;
    }

    /// Make every `send_raw_transaction` fail.
    pub fn set_sends_fail(&self, fail: bool) {
        self.state().sends_fail = fail;
    }

    /// Make every receipt report a revert.
    pub fn set_receipts_revert(&self, revert: bool) {
        self.state().receipts_revert = revert;
    }

    /// Number of transactions accepted by this mock.
    pub fn sent_count(&self) -> u64 {
        self.tx_counter.load(Ordering::SeqCst) - 1
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN PROVIDER IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl ChainProvider for MockProvider {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        Ok(self.state().balances.get(&address).copied().unwrap_or_default())
    }

    async fn get_block_number(&self) -> Result<u64> {
        Ok(self.state().block_number)
    }

    async fn get_nonce(&self, address: Address) -> Result<u64> {
        Ok(self.state().nonces.get(&address).copied().unwrap_or_default())
    }

    async fn send_raw_transaction(&self, _tx: Bytes) -> Result<TxHash> {
        if self.state().sends_fail {
            return Err(GatewayError::rpc(-32000, "mock send failure"));
        }
        let counter = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        let mut hash = [0u8; 32];
        hash[24..].copy_from_slice(&counter.to_be_bytes());
        Ok(TxHash::from(hash))
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: TxHash,
        _timeout: Duration,
    ) -> Result<TransactionReceipt> {
        let state = self.state();
        Ok(TransactionReceipt {
            tx_hash,
            block_hash: B256::ZERO,
            block_number: state.block_number,
            tx_index: 0,
            from: Address::ZERO,
            to: Some(Address::ZERO),
            contract_address: None,
            gas_used: 21_000,
            success: !state.receipts_revert,
            logs: state.logs.clone(),
        })
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(1_000_000_000) // 1 gwei
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes> {
        let state = self.state();
        if state.calls_fail {
            return Err(GatewayError::rpc(-32000, "mock call failure"));
        }

        let to = tx
            .to
            .ok_or_else(|| GatewayError::InvalidConfig("call without target".into()))?;
        let Some(data) = &tx.data else {
            return Ok(Bytes::new());
        };

        // Emulate ERC20 balanceOf against the token_balances map
        if data.len() >= 36 && data[..4] == [0x70, 0xa0, 0x82, 0x31] {
            let account = Address::from_slice(&data[16..36]);
            let balance = state
                .token_balances
                .get(&(to, account))
                .copied()
                .unwrap_or_default();
            return Ok(Bytes::from(balance.to_be_bytes::<32>().to_vec()));
        }

        // Otherwise canned responses by selector
        if data.len() >= 4 {
            let selector = [data[0], data[1], data[2], data[3]];
            if let Some(response) = state.call_responses.get(&(to, selector)) {
                return Ok(response.clone());
            }
        }

        Ok(Bytes::new())
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        let state = self.state();
        Ok(state
            .logs
            .iter()
            .filter(|log| filter.address.is_none_or(|address| log.address() == address))
            .filter(|log| {
                filter
                    .topic0
                    .is_none_or(|topic0| log.topics().first().copied() == Some(topic0))
            })
            .cloned()
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn balances_default_to_zero() {
        let provider = MockProvider::new();
        let balance = provider.get_balance(Address::ZERO).await.unwrap();
        assert_eq!(balance, U256::ZERO);
    }

    #[tokio::test]
    async fn send_produces_unique_hashes() {
        let provider = MockProvider::new();

        let h1 = provider.send_raw_transaction(Bytes::new()).await.unwrap();
        let h2 = provider.send_raw_transaction(Bytes::new()).await.unwrap();

        assert_ne!(h1, h2);
        assert_eq!(provider.sent_count(), 2);
    }

    #[tokio::test]
    async fn failing_sends() {
        let provider = MockProvider::new();
        provider.set_sends_fail(true);

        assert!(provider.send_raw_transaction(Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn reverting_receipts() {
        let provider = MockProvider::new();
        provider.set_receipts_revert(true);

        let receipt = provider
            .wait_for_receipt(TxHash::ZERO, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!receipt.success);
    }
}
