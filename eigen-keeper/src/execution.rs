//! Trade execution: signing, buys, and the sell pipeline.
//!
//! All transaction sends go through [`Executor::send_signed`], which holds a
//! nonce lease across the send and invalidates it on failure. Buys route
//! either through the eigen's vault (`executeBuy`) or directly from the
//! sub-wallet; sells always execute from the sub-wallet that holds the
//! tokens, then reconcile proceeds, self-fund the keeper when it runs low,
//! and return the remainder to the vault.

use std::sync::Arc;

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxHash, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{SolCall, SolEvent};
use tracing::{debug, info, instrument, warn};

use chain_gateway::{ChainProvider, GatewayError, NonceManager, TransactionReceipt};
use keeper_core::alerts::Alert;
use keeper_core::math::{eth_to_wei, wei_to_eth};
use keeper_core::types::{EigenConfig, PoolSpec};
use keeper_store::Store;

use crate::alerts::AlertSink;
use crate::contracts::{
    ChainAddresses, IERC20, IPermit2, IVault, IWrappedNative, PERMIT2_ADDRESS, SwapDirection,
    SwapEncoder, min_out_with_slippage,
};
use crate::error::{Result, ServiceError};
use crate::wallets::WalletManager;

// ═══════════════════════════════════════════════════════════════════════════════
// GAS CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Gas limit for plain native transfers.
const TRANSFER_GAS: u64 = 21_000;

/// Gas limit for approvals and unwraps.
const TOKEN_OP_GAS: u64 = 80_000;

/// Gas limit for swaps and vault calls.
const SWAP_GAS: u64 = 600_000;

/// Receipt wait deadline.
const RECEIPT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(90);

/// Native floor below which a sub-wallet gets topped up before trading.
pub const WALLET_GAS_FLOOR_ETH: f64 = 0.005;

/// Fixed top-up transferred from the master wallet.
pub const WALLET_TOPUP_ETH: f64 = 0.01;

/// Native reserve left in a wallet when returning funds.
pub const WALLET_GAS_RESERVE_ETH: f64 = 0.002;

/// Top-up transferred to the keeper when it is merely low.
const KEEPER_TOPUP_ETH: f64 = 0.02;

/// Rough native cost of one transfer, kept back when sweeping.
const TRANSFER_COST_ETH: f64 = 0.0005;

/// Permit validity window in seconds.
const PERMIT_TTL_SECS: u64 = 1_800;

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of one confirmed send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// The confirmed receipt.
    pub receipt: TransactionReceipt,

    /// Native cost of the transaction.
    pub gas_cost_eth: f64,
}

/// Result of one buy execution.
#[derive(Debug, Clone)]
pub struct BuyOutcome {
    /// Exact tokens delivered to the wallet (from the Transfer log).
    pub tokens_received: U256,

    /// Native gas cost.
    pub gas_cost_eth: f64,

    /// Transaction hash.
    pub tx_hash: TxHash,
}

/// Result of one sell execution.
#[derive(Debug, Clone)]
pub struct SellOutcome {
    /// Native proceeds credited to the wallet.
    pub proceeds_eth: f64,

    /// Native gas cost across the sell sequence.
    pub gas_cost_eth: f64,

    /// Swap transaction hash.
    pub tx_hash: TxHash,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXECUTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-chain execution engine.
pub struct Executor<P> {
    provider: Arc<P>,
    nonces: Arc<NonceManager<P>>,
    chain_id: u64,
    addresses: ChainAddresses,
    encoder: Arc<dyn SwapEncoder>,
    store: Store,
    wallets: Arc<WalletManager>,
    alerts: AlertSink,
    dry_run: bool,
    min_keeper_gas_eth: f64,
    low_keeper_gas_eth: f64,
}

impl<P> std::fmt::Debug for Executor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("chain_id", &self.chain_id)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl<P: ChainProvider> Executor<P> {
    /// Create an executor for one chain.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<P>,
        nonces: Arc<NonceManager<P>>,
        chain_id: u64,
        addresses: ChainAddresses,
        encoder: Arc<dyn SwapEncoder>,
        store: Store,
        wallets: Arc<WalletManager>,
        alerts: AlertSink,
        dry_run: bool,
    ) -> Self {
        Self {
            provider,
            nonces,
            chain_id,
            addresses,
            encoder,
            store,
            wallets,
            alerts,
            dry_run,
            min_keeper_gas_eth: 0.01,
            low_keeper_gas_eth: 0.05,
        }
    }

    /// The provider this executor sends through.
    #[must_use]
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Chain addresses in use.
    #[must_use]
    pub const fn addresses(&self) -> &ChainAddresses {
        &self.addresses
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Signing and sending
    // ─────────────────────────────────────────────────────────────────────────

    /// Sign and send one transaction under the sender's nonce lease, then
    /// wait for its receipt. A reverted receipt is an error.
    ///
    /// # Errors
    ///
    /// Returns an error on signing failure, send failure (nonce cache
    /// invalidated), receipt timeout, or revert.
    #[instrument(skip_all, fields(chain = self.chain_id, to = %to))]
    pub async fn send_signed(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        value: U256,
        data: Bytes,
        gas_limit: u64,
    ) -> Result<SendOutcome> {
        if self.dry_run {
            info!(value = %value, gas_limit, "DRY RUN: would send transaction");
            return Err(ServiceError::Internal("dry_run".into()));
        }

        let gas_price = self.provider.gas_price().await.map_err(ServiceError::from)?;
        // Mild bump so replacement-fee rules never bite on busy chains
        let gas_price = gas_price + gas_price / 10;

        let lease = self
            .nonces
            .acquire(signer.address())
            .await
            .map_err(ServiceError::from)?;

        let mut tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: lease.nonce(),
            gas_price,
            gas_limit,
            to: TxKind::Call(to),
            value,
            input: data,
        };

        let signature = signer
            .sign_transaction_sync(&mut tx)
            .map_err(|e| ServiceError::Signing(e.to_string()))?;
        let envelope: TxEnvelope = tx.into_signed(signature).into();
        let encoded = Bytes::from(envelope.encoded_2718());

        let tx_hash = match self.provider.send_raw_transaction(encoded).await {
            Ok(hash) => {
                drop(lease);
                hash
            }
            Err(e) => {
                // MUST invalidate on any send failure
                lease.invalidate();
                return Err(e.into());
            }
        };

        let receipt = self
            .provider
            .wait_for_receipt(tx_hash, RECEIPT_TIMEOUT)
            .await
            .map_err(ServiceError::from)?;

        if !receipt.success {
            return Err(GatewayError::reverted(tx_hash, "execution reverted").into());
        }

        let gas_cost_eth = wei_to_eth(receipt.gas_cost(gas_price));
        debug!(%tx_hash, gas_cost_eth, "Transaction confirmed");

        Ok(SendOutcome {
            receipt,
            gas_cost_eth,
        })
    }

    /// Plain native transfer.
    pub async fn transfer_native(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        amount: U256,
    ) -> Result<SendOutcome> {
        self.send_signed(signer, to, amount, Bytes::new(), TRANSFER_GAS)
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Wallet funding
    // ─────────────────────────────────────────────────────────────────────────

    /// Top up a sub-wallet from the master wallet when its native balance is
    /// below the gas floor.
    ///
    /// When an eigen is given, its remaining gas budget gates the top-up: an
    /// exhausted budget skips silently (logged, not an error). The top-up is
    /// recorded against the eigen's `gas_spent_eth`.
    ///
    /// # Errors
    ///
    /// Returns an error when the funding transfer itself fails.
    #[instrument(skip(self, eigen), fields(wallet = %wallet))]
    pub async fn fund_wallet_if_needed(
        &self,
        wallet: Address,
        eigen: Option<&EigenConfig>,
    ) -> Result<f64> {
        let balance = self.provider.get_balance(wallet).await.map_err(ServiceError::from)?;
        if wei_to_eth(balance) >= WALLET_GAS_FLOOR_ETH {
            return Ok(0.0);
        }

        if let Some(config) = eigen
            && config.gas_remaining_eth() < WALLET_TOPUP_ETH
        {
            warn!(
                eigen = %config.id,
                remaining = config.gas_remaining_eth(),
                "Gas budget exhausted, skipping wallet top-up"
            );
            return Ok(0.0);
        }

        let outcome = self
            .transfer_native(
                self.wallets.master_signer(),
                wallet,
                eth_to_wei(WALLET_TOPUP_ETH),
            )
            .await?;

        if let Some(config) = eigen {
            self.store
                .record_eigen_gas(&config.id, WALLET_TOPUP_ETH + outcome.gas_cost_eth)
                .await?;
        }

        info!(topup = WALLET_TOPUP_ETH, "Sub-wallet funded");
        Ok(WALLET_TOPUP_ETH)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Buys
    // ─────────────────────────────────────────────────────────────────────────

    /// Execute a buy of `quote_amount` native into the eigen's token,
    /// delivered to `wallet`.
    ///
    /// Vault-routed eigens execute through `IVault::executeBuy` signed by
    /// the keeper; vaultless eigens swap directly from the sub-wallet.
    ///
    /// # Errors
    ///
    /// Returns an error on encoding, send, or revert; also when no Transfer
    /// log credits the wallet.
    #[instrument(skip(self, config, wallet_signer), fields(eigen = %config.id, wallet = %wallet))]
    pub async fn execute_buy(
        &self,
        config: &EigenConfig,
        pool: &PoolSpec,
        wallet: Address,
        wallet_signer: &PrivateKeySigner,
        quote_amount: U256,
        price: f64,
    ) -> Result<BuyOutcome> {
        // Expected tokens out at the current price, for the slippage floor
        let expected_tokens = if price > 0.0 {
            eth_to_wei(wei_to_eth(quote_amount) / price)
        } else {
            U256::ZERO
        };
        let min_out = min_out_with_slippage(expected_tokens, config.slippage_bps);

        let swap = self.encoder.encode(
            SwapDirection::NativeToToken,
            config.token,
            quote_amount,
            pool,
            wallet,
            min_out,
        )?;

        let outcome = if let Some(vault) = config.vault {
            // Vault-mediated: the keeper instructs the vault to spend
            let call = IVault::executeBuyCall {
                eigenId: config.onchain_id(),
                router: swap.router,
                amount: quote_amount,
                swapData: swap.calldata,
            };
            self.send_signed(
                self.wallets.master_signer(),
                vault,
                U256::ZERO,
                Bytes::from(call.abi_encode()),
                SWAP_GAS,
            )
            .await?
        } else {
            // Direct: the sub-wallet spends its own native balance
            self.send_signed(
                wallet_signer,
                swap.router,
                swap.value,
                swap.calldata,
                SWAP_GAS,
            )
            .await?
        };

        let tokens_received = tokens_transferred_to(&outcome.receipt, config.token, wallet);
        if tokens_received.is_zero() {
            return Err(ServiceError::Internal(format!(
                "buy confirmed but no token transfer to {wallet} found"
            )));
        }

        info!(
            tokens = %tokens_received,
            spent = %quote_amount,
            "Buy executed"
        );

        Ok(BuyOutcome {
            tokens_received,
            gas_cost_eth: outcome.gas_cost_eth,
            tx_hash: outcome.receipt.tx_hash,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sells
    // ─────────────────────────────────────────────────────────────────────────

    /// Execute a token→native sell from one sub-wallet and reconcile the
    /// proceeds.
    ///
    /// Flow: approvals → snapshot → swap → unwrap this swap's output →
    /// keeper self-funding → return remainder to the vault (failure leaves
    /// funds for recovery, never raises).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::SellFailed`] on revert or send failure.
    #[instrument(skip(self, config, signer), fields(eigen = %config.id, wallet = %wallet))]
    pub async fn execute_sell(
        &self,
        config: &EigenConfig,
        pool: &PoolSpec,
        wallet: Address,
        signer: &PrivateKeySigner,
        token_amount: U256,
        price: f64,
    ) -> Result<SellOutcome> {
        let mut gas_total = 0.0;

        // 1. Approvals
        gas_total += self
            .ensure_approvals(config, pool, wallet, signer, token_amount)
            .await
            .map_err(|e| sell_failed(&config.id, &e))?;

        // 2. Snapshot balances before the swap
        let wnative = self.addresses.wrapped_native;
        let pre_native = self.provider.get_balance(wallet).await.map_err(ServiceError::from)?;
        let pre_wrapped = self
            .provider
            .get_token_balance(wnative, wallet)
            .await
            .map_err(ServiceError::from)?;

        // 3. Swap
        let expected_native = eth_to_wei(wei_to_eth(token_amount) * price);
        let min_out = min_out_with_slippage(expected_native, config.slippage_bps);

        let swap = self.encoder.encode(
            SwapDirection::TokenToNative,
            config.token,
            token_amount,
            pool,
            wallet,
            min_out,
        )?;

        let swap_outcome = self
            .send_signed(signer, swap.router, swap.value, swap.calldata, SWAP_GAS)
            .await
            .map_err(|e| sell_failed(&config.id, &e))?;
        gas_total += swap_outcome.gas_cost_eth;

        // 4. Unwrap only what this swap delivered
        let post_wrapped = self
            .provider
            .get_token_balance(wnative, wallet)
            .await
            .map_err(ServiceError::from)?;
        let wrapped_received = post_wrapped.saturating_sub(pre_wrapped);

        let proceeds_eth = if wrapped_received > U256::ZERO {
            let unwrap = IWrappedNative::withdrawCall {
                amount: wrapped_received,
            };
            let outcome = self
                .send_signed(
                    signer,
                    wnative,
                    U256::ZERO,
                    Bytes::from(unwrap.abi_encode()),
                    TOKEN_OP_GAS,
                )
                .await
                .map_err(|e| sell_failed(&config.id, &e))?;
            gas_total += outcome.gas_cost_eth;
            wei_to_eth(wrapped_received)
        } else {
            // 5. Router paid out native directly
            let post_native = self.provider.get_balance(wallet).await.map_err(ServiceError::from)?;
            wei_to_eth(post_native.saturating_sub(pre_native))
        };

        // 6. Keeper self-funding from this wallet's fresh proceeds
        gas_total += self.keeper_self_fund(wallet, signer).await?;

        // 7. Return the remainder; failure leaves funds for later recovery
        if let Err(e) = self.return_remainder(config, wallet, signer).await {
            warn!(error = %e, "Remainder return failed, pending recovery");
            let balance = self
                .provider
                .get_balance(wallet)
                .await
                .map(wei_to_eth)
                .unwrap_or(0.0);
            self.alerts
                .emit(&Alert::pending_recovery(
                    &config.id,
                    &format!("{wallet:#x}"),
                    balance,
                    "return_failed",
                ))
                .await;
        }

        info!(proceeds_eth, gas_total, "Sell executed");

        Ok(SellOutcome {
            proceeds_eth,
            gas_cost_eth: gas_total,
            tx_hash: swap_outcome.receipt.tx_hash,
        })
    }

    /// Authorize the router (and permit authority for hooked pools) to move
    /// the wallet's tokens. Returns gas spent.
    async fn ensure_approvals(
        &self,
        config: &EigenConfig,
        pool: &PoolSpec,
        wallet: Address,
        signer: &PrivateKeySigner,
        amount: U256,
    ) -> Result<f64> {
        let mut gas_total = 0.0;
        let router = self.addresses.router;

        // Hooked pools route through the permit authority instead
        let spender = if pool.hook.is_some() {
            PERMIT2_ADDRESS
        } else {
            router
        };

        let allowance = self.read_allowance(config.token, wallet, spender).await?;
        if allowance < amount {
            let approve = IERC20::approveCall {
                spender,
                amount: U256::MAX,
            };
            let outcome = self
                .send_signed(
                    signer,
                    config.token,
                    U256::ZERO,
                    Bytes::from(approve.abi_encode()),
                    TOKEN_OP_GAS,
                )
                .await?;
            gas_total += outcome.gas_cost_eth;
            debug!(spender = %spender, "Token approval granted");
        }

        // Short-lived permit from the authority to the router
        if pool.hook.is_some() {
            let now_secs = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
            let expiration = now_secs + PERMIT_TTL_SECS;
            let permit = IPermit2::approveCall {
                token: config.token,
                spender: router,
                amount: alloy::primitives::aliases::U160::from(amount),
                expiration: alloy::primitives::aliases::U48::from(expiration),
            };
            let outcome = self
                .send_signed(
                    signer,
                    PERMIT2_ADDRESS,
                    U256::ZERO,
                    Bytes::from(permit.abi_encode()),
                    TOKEN_OP_GAS,
                )
                .await?;
            gas_total += outcome.gas_cost_eth;
            debug!("Permit granted");
        }

        Ok(gas_total)
    }

    async fn read_allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        let call = IERC20::allowanceCall { owner, spender };
        let request = chain_gateway::TransactionRequest::new()
            .to(token)
            .data(Bytes::from(call.abi_encode()));

        let raw = self.provider.call(&request).await.map_err(ServiceError::from)?;
        if raw.len() < 32 {
            return Ok(U256::ZERO);
        }
        Ok(U256::from_be_slice(&raw[..32]))
    }

    /// Move gas to the keeper when it runs low. Full sweep (minus a transfer
    /// cost) when critically low, a small top-up otherwise. Never funds
    /// itself. Returns gas spent.
    async fn keeper_self_fund(&self, wallet: Address, signer: &PrivateKeySigner) -> Result<f64> {
        let keeper = self.wallets.master_address();
        if wallet == keeper {
            return Ok(0.0);
        }

        let keeper_balance = wei_to_eth(
            self.provider
                .get_balance(keeper)
                .await
                .map_err(ServiceError::from)?,
        );
        if keeper_balance >= self.low_keeper_gas_eth {
            return Ok(0.0);
        }

        let wallet_balance = wei_to_eth(
            self.provider
                .get_balance(wallet)
                .await
                .map_err(ServiceError::from)?,
        );

        let amount_eth = if keeper_balance < self.min_keeper_gas_eth {
            // Critical: sweep everything we can
            wallet_balance - TRANSFER_COST_ETH
        } else {
            KEEPER_TOPUP_ETH
        };

        if amount_eth <= 0.0 || amount_eth > wallet_balance {
            return Ok(0.0);
        }

        let outcome = self
            .transfer_native(signer, keeper, eth_to_wei(amount_eth))
            .await?;

        info!(amount_eth, keeper_balance, "Keeper self-funded from sub-wallet");
        Ok(outcome.gas_cost_eth)
    }

    /// Return the wallet's native balance (minus the gas reserve) to the
    /// vault. Vaultless eigens keep funds in their wallets.
    async fn return_remainder(
        &self,
        config: &EigenConfig,
        wallet: Address,
        signer: &PrivateKeySigner,
    ) -> Result<()> {
        let Some(vault) = config.vault else {
            return Ok(());
        };

        let balance = wei_to_eth(
            self.provider
                .get_balance(wallet)
                .await
                .map_err(ServiceError::from)?,
        );
        let remainder = balance - WALLET_GAS_RESERVE_ETH;
        if remainder <= 0.0 {
            return Ok(());
        }

        let call = IVault::returnEthCall {
            eigenId: config.onchain_id(),
        };
        self.send_signed(
            signer,
            vault,
            eth_to_wei(remainder),
            Bytes::from(call.abi_encode()),
            SWAP_GAS,
        )
        .await?;

        debug!(remainder, "Remainder returned to vault");
        Ok(())
    }

    /// Set the keeper-gas thresholds (builder style, called at startup).
    #[must_use]
    pub const fn with_keeper_gas_floors(mut self, min_eth: f64, low_eth: f64) -> Self {
        self.min_keeper_gas_eth = min_eth;
        self.low_keeper_gas_eth = low_eth;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOG PARSING
// ═══════════════════════════════════════════════════════════════════════════════

/// Sum the token amounts transferred to `recipient` in a receipt.
#[must_use]
pub fn tokens_transferred_to(
    receipt: &TransactionReceipt,
    token: Address,
    recipient: Address,
) -> U256 {
    receipt
        .logs
        .iter()
        .filter(|log| log.address() == token)
        .filter(|log| log.topics().first() == Some(&IERC20::Transfer::SIGNATURE_HASH))
        .filter_map(|log| IERC20::Transfer::decode_log(&log.inner).ok())
        .map(|decoded| decoded.data)
        .filter(|event| event.to == recipient)
        .fold(U256::ZERO, |total, event| total + event.value)
}

fn sell_failed(eigen: &str, error: &ServiceError) -> ServiceError {
    ServiceError::SellFailed {
        eigen: eigen.to_string(),
        reason: error.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{B256, Log as PrimitiveLog, LogData};
    use alloy::rpc::types::Log;

    fn transfer_log(token: Address, from: Address, to: Address, value: U256) -> Log {
        let mut topics = vec![IERC20::Transfer::SIGNATURE_HASH];
        topics.push(B256::left_padding_from(from.as_slice()));
        topics.push(B256::left_padding_from(to.as_slice()));

        Log {
            inner: PrimitiveLog {
                address: token,
                data: LogData::new_unchecked(topics, value.to_be_bytes::<32>().to_vec().into()),
            },
            ..Default::default()
        }
    }

    fn receipt_with_logs(logs: Vec<Log>) -> TransactionReceipt {
        TransactionReceipt {
            tx_hash: TxHash::ZERO,
            block_hash: B256::ZERO,
            block_number: 1,
            tx_index: 0,
            from: Address::ZERO,
            to: None,
            contract_address: None,
            gas_used: 100_000,
            success: true,
            logs,
        }
    }

    #[test]
    fn transfer_parsing_sums_matching_logs() {
        let token = Address::repeat_byte(0x11);
        let other_token = Address::repeat_byte(0x12);
        let wallet = Address::repeat_byte(0x99);
        let pool = Address::repeat_byte(0x33);

        let receipt = receipt_with_logs(vec![
            transfer_log(token, pool, wallet, U256::from(600)),
            transfer_log(token, pool, wallet, U256::from(400)),
            // Wrong recipient
            transfer_log(token, pool, Address::repeat_byte(0x88), U256::from(123)),
            // Wrong token
            transfer_log(other_token, pool, wallet, U256::from(777)),
        ]);

        assert_eq!(
            tokens_transferred_to(&receipt, token, wallet),
            U256::from(1000)
        );
    }

    #[test]
    fn transfer_parsing_handles_no_matches() {
        let receipt = receipt_with_logs(vec![]);
        assert_eq!(
            tokens_transferred_to(&receipt, Address::repeat_byte(0x11), Address::repeat_byte(0x99)),
            U256::ZERO
        );
    }
}
