//! Self-healing: stranded assets, liquidation continuation, emergency
//! keeper funding.
//!
//! Runs at the start of every cycle, before the keeper-gas gate, so a keeper
//! that drained itself can pull gas back out of its own sub-wallets instead
//! of deadlocking.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use chain_gateway::ChainProvider;
use keeper_core::ledger;
use keeper_core::math::{eth_to_wei, wei_to_eth};
use keeper_core::types::{EigenConfig, EigenStatus, TradeKind, TradeRecord};
use keeper_store::Store;

use crate::alerts::AlertSink;
use crate::contracts::{IVault, IWrappedNative};
use crate::error::Result;
use crate::execution::{Executor, WALLET_GAS_RESERVE_ETH};
use crate::wallets::WalletManager;

/// Below this, a stranded balance goes straight to the keeper instead of
/// through a vault-return call.
const VAULT_RETURN_MIN_ETH: f64 = 0.01;

/// Dust floor; balances below this are not worth a transfer.
const RECOVERY_DUST_ETH: f64 = 0.003;

/// Gas limit for the unwrap call during recovery.
const UNWRAP_GAS: u64 = 80_000;

/// Gas limit for vault-return calls.
const VAULT_GAS: u64 = 600_000;

// ═══════════════════════════════════════════════════════════════════════════════
// RECOVERY
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-chain recovery driver.
pub struct Recovery<P> {
    executor: Arc<Executor<P>>,
    wallets: Arc<WalletManager>,
    store: Store,
    alerts: AlertSink,
}

impl<P> std::fmt::Debug for Recovery<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recovery").finish_non_exhaustive()
    }
}

impl<P: ChainProvider> Recovery<P> {
    /// Create a recovery driver.
    pub const fn new(
        executor: Arc<Executor<P>>,
        wallets: Arc<WalletManager>,
        store: Store,
        alerts: AlertSink,
    ) -> Self {
        Self {
            executor,
            wallets,
            store,
            alerts,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stranded assets
    // ─────────────────────────────────────────────────────────────────────────

    /// Recover stranded wrapped-native and native balances from every
    /// sub-wallet of an eigen.
    ///
    /// Failures on individual wallets are logged and skipped; recovery must
    /// never block the cycle.
    #[instrument(skip(self, config), fields(eigen = %config.id))]
    pub async fn recover_stranded(&self, config: &EigenConfig) -> Result<()> {
        let (wallets, source) = self.wallets.wallets_for(config).await?;
        let provider = self.executor.provider();
        let wnative = self.executor.addresses().wrapped_native;

        for meta in &wallets {
            let signer = match self
                .wallets
                .signer_for(config, source, meta.wallet_index)
                .await
            {
                Ok(signer) => signer,
                Err(e) => {
                    warn!(wallet = meta.wallet_index, error = %e, "No signer, skipping recovery");
                    continue;
                }
            };

            // Stranded wrapped-native: unwrap the whole balance
            match provider.get_token_balance(wnative, meta.address).await {
                Ok(wrapped) if wrapped > U256::ZERO => {
                    let call = IWrappedNative::withdrawCall { amount: wrapped };
                    if let Err(e) = self
                        .executor
                        .send_signed(
                            &signer,
                            wnative,
                            U256::ZERO,
                            Bytes::from(call.abi_encode()),
                            UNWRAP_GAS,
                        )
                        .await
                    {
                        warn!(wallet = meta.wallet_index, error = %e, "Unwrap failed");
                        continue;
                    }
                    info!(
                        wallet = meta.wallet_index,
                        amount = %wrapped,
                        "Stranded wrapped-native unwrapped"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(wallet = meta.wallet_index, error = %e, "Wrapped balance read failed");
                    continue;
                }
            }

            // Stranded native above the reserve
            let balance_eth = match provider.get_balance(meta.address).await {
                Ok(balance) => wei_to_eth(balance),
                Err(e) => {
                    warn!(wallet = meta.wallet_index, error = %e, "Balance read failed");
                    continue;
                }
            };

            let surplus = balance_eth - WALLET_GAS_RESERVE_ETH;
            if surplus < RECOVERY_DUST_ETH {
                continue;
            }

            let result = if config.vault.is_some() && surplus >= VAULT_RETURN_MIN_ETH {
                self.return_to_vault(config, &signer, surplus).await
            } else {
                // Too small for a vault-return call: straight to the keeper
                self.executor
                    .transfer_native(
                        &signer,
                        self.wallets.master_address(),
                        eth_to_wei(surplus),
                    )
                    .await
                    .map(|_| ())
            };

            match result {
                Ok(()) => info!(wallet = meta.wallet_index, surplus, "Stranded native recovered"),
                Err(e) => warn!(wallet = meta.wallet_index, error = %e, "Recovery transfer failed"),
            }
        }

        Ok(())
    }

    async fn return_to_vault(
        &self,
        config: &EigenConfig,
        signer: &alloy::signers::local::PrivateKeySigner,
        amount_eth: f64,
    ) -> Result<()> {
        let Some(vault) = config.vault else {
            return Ok(());
        };
        let call = IVault::returnEthCall {
            eigenId: config.onchain_id(),
        };
        self.executor
            .send_signed(
                signer,
                vault,
                eth_to_wei(amount_eth),
                Bytes::from(call.abi_encode()),
                VAULT_GAS,
            )
            .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Liquidation continuation
    // ─────────────────────────────────────────────────────────────────────────

    /// Drive a liquidating/terminated eigen toward full exit: sell every
    /// wallet's holdings, recover the proceeds, then mark liquidated.
    ///
    /// Partial progress is fine - the next cycle picks up where this one
    /// stopped.
    #[instrument(skip(self, config, price), fields(eigen = %config.id))]
    pub async fn continue_liquidation(&self, config: &EigenConfig, price: f64) -> Result<()> {
        let Some(pool) = &config.pool else {
            debug!("No pool resolved, deferring liquidation");
            return Ok(());
        };

        let (wallets, source) = self.wallets.wallets_for(config).await?;
        let provider = self.executor.provider();
        let mut tokens_remaining = false;

        for meta in &wallets {
            let held = match provider.get_token_balance(config.token, meta.address).await {
                Ok(held) => held,
                Err(e) => {
                    warn!(wallet = meta.wallet_index, error = %e, "Token balance read failed");
                    tokens_remaining = true;
                    continue;
                }
            };
            if held.is_zero() {
                continue;
            }

            let signer = self
                .wallets
                .signer_for(config, source, meta.wallet_index)
                .await?;

            match self
                .executor
                .execute_sell(config, pool, meta.address, &signer, held, price)
                .await
            {
                Ok(outcome) => {
                    let mut position = self
                        .store
                        .get_position(&config.id, config.token, meta.wallet_index)
                        .await?;
                    let sellable = held.min(position.amount_raw);
                    let realized = if sellable.is_zero() || price <= 0.0 {
                        0.0
                    } else {
                        ledger::apply_sell(&mut position, sellable, price)?
                    };
                    self.store.upsert_position(&position).await?;
                    self.store.record_eigen_gas(&config.id, outcome.gas_cost_eth).await?;

                    self.store
                        .append_trade(&TradeRecord {
                            eigen_id: config.id.clone(),
                            kind: TradeKind::Liquidation,
                            wallet_index: meta.wallet_index,
                            token: config.token,
                            token_amount: held,
                            quote_amount_eth: outcome.proceeds_eth,
                            execution_price: price,
                            realized_pnl: realized,
                            gas_cost_eth: outcome.gas_cost_eth,
                            tx_hash: Some(outcome.tx_hash),
                            router: Some(self.executor.addresses().router),
                            pool_version: Some(pool.version),
                            created_at: Utc::now(),
                        })
                        .await?;

                    self.wallets
                        .record_trade(&config.id, source, meta.wallet_index)
                        .await?;
                }
                Err(e) => {
                    warn!(wallet = meta.wallet_index, error = %e, "Liquidation sell failed");
                    tokens_remaining = true;
                }
            }
        }

        // Sweep native out of the wallets
        self.recover_stranded(config).await?;

        if tokens_remaining {
            debug!("Liquidation incomplete, continuing next cycle");
            return Ok(());
        }

        // Terminated vault eigens release custody to the owner on-chain
        if config.status == EigenStatus::Terminated
            && let Some(vault) = config.vault
        {
            let call = IVault::keeperTerminateCall {
                eigenId: config.onchain_id(),
            };
            if let Err(e) = self
                .executor
                .send_signed(
                    self.wallets.master_signer(),
                    vault,
                    U256::ZERO,
                    Bytes::from(call.abi_encode()),
                    VAULT_GAS,
                )
                .await
            {
                warn!(error = %e, "keeperTerminate failed, retrying next cycle");
                return Ok(());
            }
        }

        self.store
            .set_eigen_status(&config.id, EigenStatus::Liquidated, None)
            .await?;
        info!("Eigen fully liquidated");

        self.alerts
            .emit(&keeper_core::alerts::Alert::new(
                keeper_core::alerts::AlertLevel::Info,
                "liquidation_complete",
                serde_json::json!({ "eigen": config.id }),
            ))
            .await;

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Emergency keeper funding
    // ─────────────────────────────────────────────────────────────────────────

    /// Sweep gas back to a critically-low keeper from every sub-wallet of
    /// the given eigens.
    #[instrument(skip(self, configs))]
    pub async fn emergency_keeper_sweep(&self, configs: &[EigenConfig]) -> Result<f64> {
        let provider = self.executor.provider();
        let keeper = self.wallets.master_address();
        let mut recovered = 0.0;

        for config in configs {
            let (wallets, source) = self.wallets.wallets_for(config).await?;
            for meta in &wallets {
                let balance_eth = match provider.get_balance(meta.address).await {
                    Ok(balance) => wei_to_eth(balance),
                    Err(_) => continue,
                };

                let sweep = balance_eth - RECOVERY_DUST_ETH;
                if sweep <= 0.0 {
                    continue;
                }

                let Ok(signer) = self
                    .wallets
                    .signer_for(config, source, meta.wallet_index)
                    .await
                else {
                    continue;
                };

                if self
                    .executor
                    .transfer_native(&signer, keeper, eth_to_wei(sweep))
                    .await
                    .is_ok()
                {
                    recovered += sweep;
                }
            }
        }

        if recovered > 0.0 {
            warn!(recovered, "Emergency sweep funded the keeper from sub-wallets");
        }
        Ok(recovered)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    // Recovery paths are chain-heavy; the pure threshold logic is what unit
    // tests can pin down without a node.

    use super::*;

    #[test]
    fn thresholds_are_ordered() {
        // Dust must be below the vault-return minimum or small balances
        // would loop between the two paths.
        assert!(RECOVERY_DUST_ETH < VAULT_RETURN_MIN_ETH);
        assert!(WALLET_GAS_RESERVE_ETH < VAULT_RETURN_MIN_ETH);
    }
}
