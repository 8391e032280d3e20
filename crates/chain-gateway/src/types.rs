//! Wire types shared across the gateway.
//!
//! [`TransactionRequest`] and [`TransactionReceipt`] are deliberately our
//! own structs rather than alloy's: the keeper's surface is smaller, and
//! the mock provider should not depend on alloy's RPC types changing shape.

use alloy::primitives::{Address, B256, Bytes, TxHash, U256};
use alloy::rpc::types::Log;
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSACTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// A transaction to send.
///
/// Nonce and gas fields are never filled implicitly - nonce discipline
/// lives in [`crate::nonce::NonceManager`], gas in the signing path.
///
/// ```
/// use chain_gateway::TransactionRequest;
/// use alloy::primitives::{Address, U256};
///
/// let request = TransactionRequest::new()
///     .to(Address::ZERO)
///     .value(U256::from(1_000_000_000_000_000_000u64)); // 1 ETH
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionRequest {
    /// Sender (filled by the signer if unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,

    /// Recipient; `None` creates a contract.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,

    /// Wei to transfer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,

    /// Calldata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,

    /// Gas limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,

    /// Gas price in wei (legacy transactions).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u128>,

    /// Nonce from a lease.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,

    /// Chain id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

impl TransactionRequest {
    /// An empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sender.
    #[must_use]
    pub const fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    /// Set the recipient.
    #[must_use]
    pub const fn to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    /// Set the value.
    #[must_use]
    pub const fn value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the calldata.
    #[must_use]
    pub fn data(mut self, data: Bytes) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the gas limit.
    #[must_use]
    pub const fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    /// Set the gas price.
    #[must_use]
    pub const fn gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    /// Set the nonce.
    #[must_use]
    pub const fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Set the chain id.
    #[must_use]
    pub const fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }
}

/// A confirmed transaction.
#[derive(Debug, Clone)]
pub struct TransactionReceipt {
    /// Transaction hash.
    pub tx_hash: TxHash,

    /// Containing block's hash.
    pub block_hash: B256,

    /// Containing block's number.
    pub block_number: u64,

    /// Index within the block.
    pub tx_index: u64,

    /// Sender.
    pub from: Address,

    /// Recipient (`None` for contract creation).
    pub to: Option<Address>,

    /// Created contract, if any.
    pub contract_address: Option<Address>,

    /// Gas used.
    pub gas_used: u64,

    /// Whether execution succeeded.
    pub success: bool,

    /// Emitted logs.
    pub logs: Vec<Log>,
}

impl TransactionReceipt {
    /// Wei cost of this transaction at the given effective gas price.
    #[must_use]
    pub fn gas_cost(&self, gas_price: u128) -> U256 {
        U256::from(self.gas_used) * U256::from(gas_price)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOG FILTERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Filter for log queries.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    /// Emitting contract.
    pub address: Option<Address>,

    /// Range start (inclusive).
    pub from_block: Option<u64>,

    /// Range end (inclusive).
    pub to_block: Option<u64>,

    /// Event signature (topic0).
    pub topic0: Option<B256>,
}

impl LogFilter {
    /// An empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by emitting contract.
    #[must_use]
    pub const fn address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Filter by block range, inclusive on both ends.
    #[must_use]
    pub const fn block_range(mut self, from: u64, to: u64) -> Self {
        self.from_block = Some(from);
        self.to_block = Some(to);
        self
    }

    /// Filter by event signature.
    #[must_use]
    pub const fn event_signature(mut self, topic0: B256) -> Self {
        self.topic0 = Some(topic0);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MULTICALL ENTRIES
// ═══════════════════════════════════════════════════════════════════════════════

/// One read call in a multicall batch.
#[derive(Debug, Clone)]
pub struct CallRequest {
    /// Contract to call.
    pub target: Address,

    /// Encoded calldata.
    pub calldata: Bytes,
}

impl CallRequest {
    /// Build a call request.
    #[must_use]
    pub const fn new(target: Address, calldata: Bytes) -> Self {
        Self { target, calldata }
    }
}

/// One call's result within a multicall batch.
///
/// A failed call (or a failed batch) yields `success = false` with empty
/// data; it never aborts the surrounding multicall.
#[derive(Debug, Clone)]
pub struct CallResult {
    /// Whether the call succeeded.
    pub success: bool,

    /// Raw return data (empty on failure).
    pub data: Bytes,
}

impl CallResult {
    /// A failed call with no return data.
    #[must_use]
    pub const fn failed() -> Self {
        Self {
            success: false,
            data: Bytes::new(),
        }
    }

    /// Decode the first word as a big-endian U256, when present.
    #[must_use]
    pub fn as_u256(&self) -> Option<U256> {
        if !self.success || self.data.len() < 32 {
            return None;
        }
        Some(U256::from_be_slice(&self.data[..32]))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_request_builder() {
        let addr = Address::repeat_byte(0x42);
        let request = TransactionRequest::new()
            .to(addr)
            .value(U256::from(1000))
            .gas_limit(21000)
            .nonce(7)
            .chain_id(10143);

        assert_eq!(request.to, Some(addr));
        assert_eq!(request.value, Some(U256::from(1000)));
        assert_eq!(request.gas_limit, Some(21000));
        assert_eq!(request.nonce, Some(7));
        assert_eq!(request.chain_id, Some(10143));
        assert!(request.from.is_none());
    }

    #[test]
    fn log_filter_builder() {
        let addr = Address::repeat_byte(0x01);
        let filter = LogFilter::new().address(addr).block_range(100, 200);

        assert_eq!(filter.address, Some(addr));
        assert_eq!(filter.from_block, Some(100));
        assert_eq!(filter.to_block, Some(200));
        assert!(filter.topic0.is_none());
    }

    #[test]
    fn call_result_decoding() {
        let mut word = vec![0u8; 32];
        word[31] = 42;
        let ok = CallResult {
            success: true,
            data: Bytes::from(word),
        };
        assert_eq!(ok.as_u256(), Some(U256::from(42)));

        assert_eq!(CallResult::failed().as_u256(), None);
    }

    #[test]
    fn receipt_gas_cost() {
        let receipt = TransactionReceipt {
            tx_hash: TxHash::ZERO,
            block_hash: B256::ZERO,
            block_number: 1,
            tx_index: 0,
            from: Address::ZERO,
            to: None,
            contract_address: None,
            gas_used: 21_000,
            success: true,
            logs: vec![],
        };
        assert_eq!(
            receipt.gas_cost(1_000_000_000),
            U256::from(21_000_000_000_000u64)
        );
    }
}
