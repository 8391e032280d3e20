//! [`EvmProvider`]: the production [`ChainProvider`] over alloy HTTP.
//!
//! The provider is built with no fillers: nonces, gas, and chain ids are
//! always set explicitly by the keeper's signing path, so nothing here
//! mutates a transaction behind the caller's back.
//!
//! ```ignore
//! let provider = EvmProvider::connect("https://testnet-rpc.monad.xyz").await?;
//! let balance = provider.get_balance(address).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use alloy::network::{Ethereum, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log, TransactionRequest as RpcTxRequest};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::error::{GatewayError, Result};
use crate::traits::ChainProvider;
use crate::types::{LogFilter, TransactionReceipt, TransactionRequest};

/// Receipt-poll flakes tolerated before giving up early.
const MAX_RECEIPT_FLAKES: u32 = 5;

// ═══════════════════════════════════════════════════════════════════════════════
// EVM PROVIDER
// ═══════════════════════════════════════════════════════════════════════════════

/// HTTP provider for any EVM chain.
#[derive(Debug, Clone)]
pub struct EvmProvider {
    inner: Arc<RootProvider<Ethereum>>,
    chain_id: u64,
    receipt_poll_interval: Duration,
}

impl EvmProvider {
    /// Connect to an RPC URL, querying the chain id from the node.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is invalid, the HTTP client cannot be
    /// built, or the chain-id query fails.
    pub async fn connect(rpc_url: &str) -> Result<Self> {
        Self::connect_with_timeout(rpc_url, Duration::from_secs(30)).await
    }

    /// Connect with a custom per-request timeout.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`connect`](Self::connect).
    pub async fn connect_with_timeout(rpc_url: &str, timeout: Duration) -> Result<Self> {
        let url: reqwest::Url = rpc_url
            .parse()
            .map_err(|e| GatewayError::InvalidConfig(format!("invalid RPC URL: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Connection(format!("failed to build HTTP client: {e}")))?;

        // Default builder = no fillers; the keeper owns nonce and gas fields
        let inner = ProviderBuilder::default().connect_reqwest(client, url);

        let chain_id = inner
            .get_chain_id()
            .await
            .map_err(|e| GatewayError::Connection(format!("failed to get chain ID: {e}")))?;

        debug!(chain_id, rpc_url, "Connected to EVM chain");

        Ok(Self {
            inner: Arc::new(inner),
            chain_id,
            receipt_poll_interval: Duration::from_millis(500),
        })
    }

    /// Override the receipt poll interval (default 500ms).
    #[must_use]
    pub const fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    /// Escape hatch to the raw alloy provider.
    pub fn inner(&self) -> &RootProvider<Ethereum> {
        &self.inner
    }

    fn into_rpc_request(tx: &TransactionRequest) -> RpcTxRequest {
        let mut request = RpcTxRequest::default();
        if let Some(from) = tx.from {
            request = request.from(from);
        }
        if let Some(to) = tx.to {
            request = request.to(to);
        }
        if let Some(value) = tx.value {
            request = request.value(value);
        }
        if let Some(data) = &tx.data {
            request = request.input(data.clone().into());
        }
        if let Some(gas_limit) = tx.gas_limit {
            request = request.gas_limit(gas_limit);
        }
        if let Some(gas_price) = tx.gas_price {
            request = request.gas_price(gas_price);
        }
        if let Some(nonce) = tx.nonce {
            request = request.nonce(nonce);
        }
        if let Some(chain_id) = tx.chain_id {
            request.set_chain_id(chain_id);
        }
        request
    }

    fn into_rpc_filter(filter: &LogFilter) -> Filter {
        let mut rpc = Filter::new();
        if let Some(address) = filter.address {
            rpc = rpc.address(address);
        }
        if let Some(from) = filter.from_block {
            rpc = rpc.from_block(from);
        }
        if let Some(to) = filter.to_block {
            rpc = rpc.to_block(to);
        }
        if let Some(topic0) = filter.topic0 {
            rpc = rpc.event_signature(topic0);
        }
        rpc
    }

    fn receipt_from_rpc(
        receipt: &alloy::rpc::types::TransactionReceipt,
    ) -> Result<TransactionReceipt> {
        let missing = |field: &str| GatewayError::InvalidResponse(format!("missing {field}"));

        Ok(TransactionReceipt {
            tx_hash: receipt.transaction_hash,
            block_hash: receipt.block_hash.ok_or_else(|| missing("block_hash"))?,
            block_number: receipt.block_number.ok_or_else(|| missing("block_number"))?,
            tx_index: receipt.transaction_index.unwrap_or(0),
            from: receipt.from,
            to: receipt.to,
            contract_address: receipt.contract_address,
            gas_used: receipt.gas_used,
            success: receipt.status(),
            logs: receipt.inner.logs().to_vec(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN PROVIDER IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl ChainProvider for EvmProvider {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    #[instrument(skip(self), fields(chain_id = self.chain_id))]
    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.inner
            .get_balance(address)
            .await
            .map_err(GatewayError::from)
    }

    #[instrument(skip(self), fields(chain_id = self.chain_id))]
    async fn get_block_number(&self) -> Result<u64> {
        self.inner
            .get_block_number()
            .await
            .map_err(GatewayError::from)
    }

    #[instrument(skip(self), fields(chain_id = self.chain_id))]
    async fn get_nonce(&self, address: Address) -> Result<u64> {
        self.inner
            .get_transaction_count(address)
            .await
            .map_err(GatewayError::from)
    }

    #[instrument(skip(self), fields(chain_id = self.chain_id))]
    async fn get_pending_nonce(&self, address: Address) -> Result<u64> {
        self.inner
            .get_transaction_count(address)
            .block_id(BlockNumberOrTag::Pending.into())
            .await
            .map_err(GatewayError::from)
    }

    #[instrument(skip(self, tx), fields(chain_id = self.chain_id))]
    async fn send_raw_transaction(&self, tx: Bytes) -> Result<TxHash> {
        let pending = self
            .inner
            .send_raw_transaction(&tx)
            .await
            .map_err(GatewayError::from)?;
        Ok(*pending.tx_hash())
    }

    #[instrument(skip(self), fields(chain_id = self.chain_id))]
    async fn wait_for_receipt(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<TransactionReceipt> {
        let deadline = std::time::Instant::now() + timeout;
        let mut flakes: u32 = 0;

        loop {
            if std::time::Instant::now() > deadline {
                return Err(GatewayError::ReceiptNotFound(tx_hash));
            }

            match self.inner.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Self::receipt_from_rpc(&receipt),
                Ok(None) => tokio::time::sleep(self.receipt_poll_interval).await,
                Err(e) => {
                    // Tolerate a handful of transient flakes under the
                    // overall deadline, backing off each time
                    flakes += 1;
                    if flakes > MAX_RECEIPT_FLAKES {
                        return Err(GatewayError::from(e));
                    }
                    warn!(%tx_hash, error = %e, attempt = flakes, "Receipt fetch flaked, retrying");
                    tokio::time::sleep(self.receipt_poll_interval * flakes).await;
                }
            }
        }
    }

    #[instrument(skip(self), fields(chain_id = self.chain_id))]
    async fn gas_price(&self) -> Result<u128> {
        self.inner.get_gas_price().await.map_err(GatewayError::from)
    }

    #[instrument(skip(self, tx), fields(chain_id = self.chain_id))]
    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes> {
        self.inner
            .call(Self::into_rpc_request(tx))
            .await
            .map_err(GatewayError::from)
    }

    #[instrument(skip(self, filter), fields(chain_id = self.chain_id))]
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        self.inner
            .get_logs(&Self::into_rpc_filter(filter))
            .await
            .map_err(GatewayError::from)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    // Connection tests need an anvil instance; run with:
    //   cargo test -p chain-gateway -- --ignored

    #[tokio::test]
    #[ignore = "requires running RPC endpoint"]
    async fn connect_to_anvil() {
        let provider = EvmProvider::connect("http://127.0.0.1:8545")
            .await
            .expect("should connect to anvil");

        assert_eq!(provider.chain_id(), 31337);
    }

    #[tokio::test]
    async fn invalid_url_fails() {
        let err = EvmProvider::connect("not-a-valid-url").await.unwrap_err();
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn rpc_request_conversion_maps_fields() {
        let addr = Address::repeat_byte(0x12);

        let tx = TransactionRequest::new()
            .to(addr)
            .value(U256::from(1000))
            .gas_limit(21000)
            .nonce(5);

        let rpc = EvmProvider::into_rpc_request(&tx);

        assert_eq!(rpc.to, Some(alloy::primitives::TxKind::Call(addr)));
        assert_eq!(rpc.value, Some(U256::from(1000)));
        assert_eq!(rpc.gas, Some(21000));
        assert_eq!(rpc.nonce, Some(5));
    }

    #[test]
    fn rpc_filter_conversion_maps_fields() {
        let addr = Address::repeat_byte(0x34);
        let filter = LogFilter::new().address(addr).block_range(10, 20);

        let converted = EvmProvider::into_rpc_filter(&filter);
        let expected = Filter::new().address(addr).from_block(10u64).to_block(20u64);
        assert_eq!(converted, expected);
    }
}
