//! Batched read calls through the Multicall3 contract.
//!
//! Reading per-wallet balances for a fleet of sub-wallets one RPC call at a
//! time burns the provider's rate limit. This module batches reads through
//! Multicall3's `aggregate3`, splitting large inputs into fixed-size batches.
//!
//! # Failure Semantics
//!
//! Each call is sent with `allowFailure = true`, so an individual revert
//! yields `success = false` for that entry only. A batch-level RPC failure
//! maps every entry in that batch to a failed result without aborting the
//! whole operation - callers always get exactly one result per input call.

use alloy::primitives::{Address, Bytes, address};
use alloy::sol;
use alloy::sol_types::SolCall;
use tracing::{debug, warn};

use crate::error::Result;
use crate::traits::ChainProvider;
use crate::types::{CallRequest, CallResult, TransactionRequest};

// Multicall3 is deployed at the same address on every major EVM chain.
const MULTICALL3_ADDRESS: Address = address!("0xcA11bde05977b3631167028862bE2a173976CA11");

/// Maximum calls per aggregate3 batch.
const BATCH_SIZE: usize = 100;

sol! {
    /// Multicall3 aggregate3 interface.
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (Result[] memory returnData);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MULTICALL
// ═══════════════════════════════════════════════════════════════════════════════

/// Batched read executor over a [`ChainProvider`].
#[derive(Debug)]
pub struct Multicall<P> {
    provider: P,
    contract: Address,
}

impl<P: ChainProvider> Multicall<P> {
    /// Create a multicall executor using the canonical Multicall3 address.
    pub const fn new(provider: P) -> Self {
        Self {
            provider,
            contract: MULTICALL3_ADDRESS,
        }
    }

    /// Create a multicall executor against a custom contract address.
    pub const fn with_contract(provider: P, contract: Address) -> Self {
        Self { provider, contract }
    }

    /// Execute the given calls, batching as needed.
    ///
    /// Returns exactly one [`CallResult`] per input call, in input order.
    ///
    /// # Errors
    ///
    /// Never fails on batch-level RPC errors (those become per-entry failed
    /// results); only the encoding of the request itself can error.
    pub async fn try_aggregate(&self, calls: &[CallRequest]) -> Result<Vec<CallResult>> {
        let mut results = Vec::with_capacity(calls.len());

        for batch in calls.chunks(BATCH_SIZE) {
            match self.execute_batch(batch).await {
                Ok(mut batch_results) => results.append(&mut batch_results),
                Err(e) => {
                    warn!(
                        batch_len = batch.len(),
                        error = %e,
                        "Multicall batch failed, zeroing results"
                    );
                    results.extend(batch.iter().map(|_| CallResult::failed()));
                }
            }
        }

        Ok(results)
    }

    /// Convenience: read ERC20 balances for many (token, holder) pairs.
    ///
    /// Failed entries come back as `None`.
    pub async fn token_balances(
        &self,
        pairs: &[(Address, Address)],
    ) -> Result<Vec<Option<alloy::primitives::U256>>> {
        let calls: Vec<CallRequest> = pairs
            .iter()
            .map(|(token, holder)| {
                // ERC20 balanceOf(address)
                let mut data = vec![0x70, 0xa0, 0x82, 0x31];
                data.extend_from_slice(&[0u8; 12]);
                data.extend_from_slice(holder.as_slice());
                CallRequest::new(*token, Bytes::from(data))
            })
            .collect();

        let results = self.try_aggregate(&calls).await?;
        Ok(results.iter().map(CallResult::as_u256).collect())
    }

    async fn execute_batch(&self, batch: &[CallRequest]) -> Result<Vec<CallResult>> {
        let call3s: Vec<IMulticall3::Call3> = batch
            .iter()
            .map(|c| IMulticall3::Call3 {
                target: c.target,
                allowFailure: true,
                callData: c.calldata.clone(),
            })
            .collect();

        let calldata = IMulticall3::aggregate3Call { calls: call3s }.abi_encode();

        let request = TransactionRequest::new()
            .to(self.contract)
            .data(Bytes::from(calldata));

        let raw = self.provider.call(&request).await?;

        let decoded = IMulticall3::aggregate3Call::abi_decode_returns(&raw)?;

        debug!(batch_len = batch.len(), "Multicall batch executed");

        Ok(decoded
            .into_iter()
            .map(|r| CallResult {
                success: r.success,
                data: r.returnData,
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;
    use alloy::primitives::U256;
    use alloy::sol_types::SolValue;
    use std::sync::Arc;

    fn encode_results(results: Vec<(bool, Vec<u8>)>) -> Bytes {
        let sol_results: Vec<IMulticall3::Result> = results
            .into_iter()
            .map(|(success, data)| IMulticall3::Result {
                success,
                returnData: Bytes::from(data),
            })
            .collect();
        Bytes::from(sol_results.abi_encode())
    }

    #[tokio::test]
    async fn returns_one_result_per_call() {
        let provider = Arc::new(MockProvider::new());

        let mut word = vec![0u8; 32];
        word[31] = 1;
        provider.set_call_response(
            MULTICALL3_ADDRESS,
            [0x82, 0xad, 0x56, 0xcb], // aggregate3 selector
            encode_results(vec![(true, word.clone()), (false, vec![])]),
        );

        let multicall = Multicall::new(Arc::clone(&provider));
        let calls = vec![
            CallRequest::new(Address::repeat_byte(0x01), Bytes::new()),
            CallRequest::new(Address::repeat_byte(0x02), Bytes::new()),
        ];

        let results = multicall.try_aggregate(&calls).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[0].as_u256(), Some(U256::from(1)));
        assert!(!results[1].success);
    }

    #[tokio::test]
    async fn batch_failure_zeroes_entries() {
        // Mock provider with no registered response errors the call;
        // every entry must come back failed rather than erroring out.
        let provider = Arc::new(MockProvider::new());
        provider.set_calls_fail(true);

        let multicall = Multicall::new(Arc::clone(&provider));
        let calls: Vec<CallRequest> = (0..3)
            .map(|i| CallRequest::new(Address::repeat_byte(i), Bytes::new()))
            .collect();

        let results = multicall.try_aggregate(&calls).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| !r.success));
    }

    #[tokio::test]
    async fn empty_input_returns_empty() {
        let provider = Arc::new(MockProvider::new());
        let multicall = Multicall::new(provider);

        let results = multicall.try_aggregate(&[]).await.unwrap();
        assert!(results.is_empty());
    }
}
