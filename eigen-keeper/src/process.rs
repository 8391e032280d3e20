//! Per-eigen processing: one eigen, one cycle.
//!
//! The pipeline per eigen:
//!
//! 1. Cycle gas budget gate
//! 2. On-chain position sync (store vs real token balances)
//! 3. Deployment burst for fresh eigens (sequential buys, spaced sends)
//! 4. Decision ladder
//! 5. AI gate (fail-open)
//! 6. Sell-block gate (cooldown fallback to a small buy)
//! 7. Execution, ledger update, trade record, spend tracking
//!
//! Errors inside this module are converted by the scheduler into failure
//! bookkeeping; nothing here aborts a cycle.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use ai_gate::{EvalContext, Evaluator};
use chain_gateway::{ChainProvider, Multicall};
use keeper_core::alerts::Alert;
use keeper_core::decision::{
    Action, BUY_FLOOR_ETH, Decision, DecisionEngine, DecisionInputs, MIN_DEPLOY_BALANCE_ETH,
    SellVariant,
};
use keeper_core::ledger::{self, AggregatePosition};
use keeper_core::math::{annualized_volatility, eth_to_wei, percent_to_bps, percentage_of, wei_to_eth};
use keeper_core::types::{
    EigenConfig, ExternalBuySignal, PoolSpec, TradeKind, TradeRecord, WalletSource,
};
use keeper_core::{GasBudget, SellBlockTracker, SpendTracker};
use keeper_store::Store;
use keeper_store::wallets::WalletMeta;

use crate::alerts::AlertSink;
use crate::contracts::IVault;
use crate::error::{Result, ServiceError};
use crate::execution::Executor;
use crate::oracle::{PriceOracle, fresh_price_series};
use crate::reactive::{ReactiveDetector, ScanExclusions};
use crate::wallets::WalletManager;

use alloy::sol_types::SolCall;

/// Rough native gas estimate for one eigen's processing, used by the cycle
/// budget gate.
pub const EST_GAS_PER_EIGEN_ETH: f64 = 0.002;

/// Pause between deployment-burst sends.
const DEPLOY_TRADE_SPACING: Duration = Duration::from_secs(5);

/// Deployment buys spend this share of the balance across empty wallets.
const DEPLOY_BPS: u64 = 8_000;

/// Price history window handed to the AI context.
const PRICE_HISTORY_LIMIT: u32 = 50;

/// Snapshots older than this are dropped from the AI context.
const PRICE_MAX_AGE_MINUTES: i64 = 60;

// ═══════════════════════════════════════════════════════════════════════════════
// CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything one eigen's processing borrows from the scheduler.
pub struct EigenContext<P> {
    /// Config snapshot for this cycle.
    pub config: EigenConfig,

    /// Execution engine for the eigen's chain.
    pub executor: Arc<Executor<P>>,

    /// Price oracle for the eigen's chain.
    pub oracle: Arc<PriceOracle<P>>,

    /// External-buy detector.
    pub detector: Arc<ReactiveDetector<P>>,

    /// Local store handle.
    pub store: Store,

    /// Wallet manager.
    pub wallets: Arc<WalletManager>,

    /// AI gate.
    pub evaluator: Arc<Evaluator>,

    /// Decision engine (scheduler-owned; mutex for the RNG).
    pub engine: Arc<Mutex<DecisionEngine>>,

    /// Sell-block tracker.
    pub sell_block: Arc<Mutex<SellBlockTracker>>,

    /// Hourly spend tracker.
    pub spend: Arc<Mutex<SpendTracker>>,

    /// Cycle gas budget.
    pub gas_budget: Arc<Mutex<GasBudget>>,

    /// Alert sink.
    pub alerts: AlertSink,

    /// Spend-rate threshold, mirrored into alert payloads.
    pub spend_threshold_pct: f64,

    /// Dry run: log decisions, send nothing.
    pub dry_run: bool,
}

impl<P> std::fmt::Debug for EigenContext<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EigenContext")
            .field("eigen", &self.config.id)
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Run one eigen through one trade cycle.
///
/// # Errors
///
/// Returns an error for failures the scheduler must count (sell failures,
/// unexpected chain errors). Skips (budget, unresolved pool, no action)
/// return `Ok`.
#[instrument(skip(ctx), fields(eigen = %ctx.config.id))]
pub async fn process_eigen<P: ChainProvider>(ctx: &EigenContext<P>) -> Result<()> {
    let config = &ctx.config;

    // 1. Cycle gas budget
    {
        let budget = ctx.gas_budget.lock().await;
        if !budget.can_afford(EST_GAS_PER_EIGEN_ETH) {
            debug!(remaining = budget.remaining_eth(), "Cycle gas budget exhausted, skipping");
            return Ok(());
        }
    }

    // Pool and price are prerequisites for everything else
    let Some(pool) = config.pool.clone() else {
        debug!("No pool resolved, skipping this cycle");
        return Ok(());
    };

    let price = match ctx.oracle.spot_price(&pool, config.token).await {
        Ok(price) => price,
        Err(e) => {
            debug!(error = %e, "Price unavailable, skipping this cycle");
            return Ok(());
        }
    };

    let (wallet_metas, source) = ctx.wallets.wallets_for(config).await?;
    let wallet_addresses: Vec<Address> = wallet_metas.iter().map(|w| w.address).collect();

    // 2. On-chain position sync
    let (positions, wallet_token_balances) =
        sync_positions(ctx, &wallet_metas, price).await?;
    let aggregate = ledger::aggregate(positions.iter());

    let native_balance = read_native_balance(ctx, &wallet_addresses).await?;
    let native_eth = wei_to_eth(native_balance);

    // 3. Deployment burst for fresh eigens
    let nothing_held = wallet_token_balances.iter().all(U256::is_zero);
    if nothing_held && native_eth > MIN_DEPLOY_BALANCE_ETH {
        return deployment_burst(ctx, &pool, &wallet_metas, source, native_balance, price).await;
    }

    // Reactive scan runs before the decision; the cursor always advances
    let external_buys = if config.reactive_sell_enabled {
        Some(reactive_scan(ctx, &pool, &wallet_addresses).await?)
    } else {
        None
    };

    let last_trade_at = ctx.store.last_trade_at(&config.id).await?;

    // 4. Decide
    let inputs = DecisionInputs {
        config,
        native_balance,
        price,
        position: aggregate,
        wallet_token_balances: &wallet_token_balances,
        last_trade_at,
        external_buys,
        now: Utc::now(),
    };
    let decision = {
        let mut engine = ctx.engine.lock().await;
        engine.decide(&inputs)
    };

    let Some(mut decision) = decision else {
        debug!(
            native_eth,
            tokens = %aggregate.amount_raw,
            price,
            "No action this cycle"
        );
        return Ok(());
    };

    info!(action = decision.action.tag(), reason = %decision.reason, "Action decided");

    if ctx.dry_run {
        info!(action = decision.action.tag(), "DRY RUN: would execute");
        return Ok(());
    }

    // 5. AI gate
    if !ai_gate(ctx, &mut decision, &aggregate, price, native_eth, external_buys).await? {
        return Ok(());
    }

    // 6. Sell-block gate
    if decision.action.is_sell() {
        let blocked = ctx.sell_block.lock().await.is_blocked(&config.id);
        if blocked {
            if native_eth > BUY_FLOOR_ETH {
                let fallback = percentage_of(native_balance, percent_to_bps(config.order_size_min_pct));
                info!("Sells blocked, falling back to a small buy");
                decision = Decision {
                    action: Action::Buy {
                        quote_amount: fallback,
                    },
                    reason: "sell_blocked_fallback_buy".into(),
                };
            } else {
                info!("Sells blocked and balance too thin for a fallback buy");
                return Ok(());
            }
        }
    }

    // 7. Execute
    match decision.action.clone() {
        Action::Buy { quote_amount } => {
            execute_buy_action(ctx, &pool, &wallet_metas, source, quote_amount, price, native_eth)
                .await
        }
        Action::Sell {
            token_amount,
            variant,
        } => {
            execute_sell_action(
                ctx,
                &pool,
                &wallet_metas,
                source,
                &wallet_token_balances,
                token_amount,
                variant,
                price,
            )
            .await
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STAGE HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Reconcile stored positions against real token balances.
async fn sync_positions<P: ChainProvider>(
    ctx: &EigenContext<P>,
    wallets: &[WalletMeta],
    price: f64,
) -> Result<(Vec<keeper_core::types::Position>, Vec<U256>)> {
    let config = &ctx.config;

    let pairs: Vec<(Address, Address)> = wallets
        .iter()
        .map(|meta| (config.token, meta.address))
        .collect();
    let multicall = Multicall::new(Arc::clone(ctx.executor.provider()));
    let balances = multicall
        .token_balances(&pairs)
        .await
        .map_err(ServiceError::from)?;

    let mut positions = Vec::with_capacity(wallets.len());
    let mut chain_balances = Vec::with_capacity(wallets.len());

    for (meta, balance) in wallets.iter().zip(balances) {
        let chain_amount = balance.unwrap_or(U256::ZERO);
        let mut position = ctx
            .store
            .get_position(&config.id, config.token, meta.wallet_index)
            .await?;

        let outcome = ledger::reconcile(&mut position, chain_amount, price);
        if outcome != ledger::Reconciliation::Trusted {
            info!(
                wallet = meta.wallet_index,
                outcome = ?outcome,
                chain = %chain_amount,
                "Position reconciled against chain"
            );
            ctx.store.upsert_position(&position).await?;
        }

        chain_balances.push(chain_amount);
        positions.push(position);
    }

    Ok((positions, chain_balances))
}

/// Vault-routed eigens read the vault's net balance; vaultless eigens sum
/// their wallets.
async fn read_native_balance<P: ChainProvider>(
    ctx: &EigenContext<P>,
    wallet_addresses: &[Address],
) -> Result<U256> {
    let config = &ctx.config;
    let provider = ctx.executor.provider();

    if let Some(vault) = config.vault {
        let call = IVault::getNetBalanceCall {
            eigenId: config.onchain_id(),
        };
        let request = chain_gateway::TransactionRequest::new()
            .to(vault)
            .data(alloy::primitives::Bytes::from(call.abi_encode()));
        let raw = provider.call(&request).await.map_err(ServiceError::from)?;
        if raw.len() >= 32 {
            return Ok(U256::from_be_slice(&raw[..32]));
        }
        return Ok(U256::ZERO);
    }

    let mut total = U256::ZERO;
    for address in wallet_addresses {
        total += provider
            .get_balance(*address)
            .await
            .map_err(ServiceError::from)?;
    }
    Ok(total)
}

/// Distribute capital into empty wallets with spaced, sequential buys.
async fn deployment_burst<P: ChainProvider>(
    ctx: &EigenContext<P>,
    pool: &PoolSpec,
    wallets: &[WalletMeta],
    source: WalletSource,
    native_balance: U256,
    price: f64,
) -> Result<()> {
    let config = &ctx.config;
    let empty_count = wallets.len().max(1) as u64;
    let per_wallet = percentage_of(native_balance, DEPLOY_BPS) / U256::from(empty_count);

    if per_wallet.is_zero() {
        return Ok(());
    }

    info!(
        wallets = wallets.len(),
        per_wallet = %per_wallet,
        "Deployment burst starting"
    );

    if ctx.dry_run {
        info!("DRY RUN: would deploy into empty wallets");
        return Ok(());
    }

    for (i, meta) in wallets.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(DEPLOY_TRADE_SPACING).await;
        }

        let signer = ctx.wallets.signer_for(config, source, meta.wallet_index).await?;
        ctx.executor
            .fund_wallet_if_needed(meta.address, Some(config))
            .await?;

        let outcome = ctx
            .executor
            .execute_buy(config, pool, meta.address, &signer, per_wallet, price)
            .await?;

        settle_buy(ctx, meta, source, per_wallet, outcome.tokens_received, price, outcome.gas_cost_eth, outcome.tx_hash)
            .await?;
    }

    Ok(())
}

/// Run the reactive scan and persist the cursor.
async fn reactive_scan<P: ChainProvider>(
    ctx: &EigenContext<P>,
    pool: &PoolSpec,
    wallet_addresses: &[Address],
) -> Result<ExternalBuySignal> {
    let config = &ctx.config;
    let provider = ctx.executor.provider();

    let current_block = provider.get_block_number().await.map_err(ServiceError::from)?;
    let from_block = config
        .last_scanned_block
        .map_or(current_block, |cursor| cursor + 1);

    let exclusions = ScanExclusions::new(
        ctx.wallets.master_address(),
        config.vault,
        wallet_addresses,
        &ctx.executor.addresses().known_routers,
    );

    let signal = ctx
        .detector
        .scan(
            pool,
            config.token,
            ctx.executor.addresses().wrapped_native,
            from_block,
            current_block,
            &exclusions,
        )
        .await?;

    // The cursor advances whether or not buys were found
    ctx.store
        .set_scan_cursor(&config.id, signal.latest_block_scanned)
        .await?;

    Ok(signal)
}

/// Evaluate through the AI gate; returns whether execution may proceed.
/// Approved-with-resize mutates the decision in place.
async fn ai_gate<P: ChainProvider>(
    ctx: &EigenContext<P>,
    decision: &mut Decision,
    aggregate: &AggregatePosition,
    price: f64,
    native_eth: f64,
    external_buys: Option<ExternalBuySignal>,
) -> Result<bool> {
    let config = &ctx.config;

    let snapshots = ctx
        .store
        .recent_prices(config.token, PRICE_HISTORY_LIMIT)
        .await?;
    let prices = fresh_price_series(
        &snapshots,
        chrono::Duration::minutes(PRICE_MAX_AGE_MINUTES),
        Utc::now(),
    );
    let trades = ctx.store.recent_trades(&config.id, 5).await?;

    let context = EvalContext {
        native_balance_eth: native_eth,
        recent_prices: &prices,
        recent_trades: &trades,
        external_buy_volume_eth: external_buys
            .map_or(0.0, |signal| wei_to_eth(signal.total_base_in)),
        volatility: annualized_volatility(&prices),
    };

    let evaluation = ctx
        .evaluator
        .evaluate(decision, config, aggregate, price, &context)
        .await;

    ctx.store.append_evaluation(&evaluation).await?;

    if !evaluation.approved {
        info!(
            confidence = evaluation.confidence,
            reason = %evaluation.reason,
            "Trade rejected by AI gate"
        );
        return Ok(false);
    }

    if let Some(adjusted) = evaluation.adjusted_amount {
        match &mut decision.action {
            Action::Buy { quote_amount } => {
                let resized = eth_to_wei(adjusted);
                debug!(from = %*quote_amount, to = %resized, "AI resized buy");
                *quote_amount = resized;
            }
            Action::Sell { token_amount, .. } => {
                // Resizes only shrink; the holdings cap applied pre-gate
                let resized = eth_to_wei(adjusted).min(*token_amount);
                debug!(from = %*token_amount, to = %resized, "AI resized sell");
                *token_amount = resized;
            }
        }
    }

    Ok(true)
}

/// Buy path: select a wallet, fund it, swap, settle.
async fn execute_buy_action<P: ChainProvider>(
    ctx: &EigenContext<P>,
    pool: &PoolSpec,
    wallets: &[WalletMeta],
    source: WalletSource,
    quote_amount: U256,
    price: f64,
    vault_balance_eth: f64,
) -> Result<()> {
    let config = &ctx.config;

    let Some(meta) = WalletManager::select(wallets) else {
        return Err(ServiceError::Internal("eigen has no wallets".into()));
    };
    let meta = meta.clone();

    let signer = ctx.wallets.signer_for(config, source, meta.wallet_index).await?;
    ctx.executor
        .fund_wallet_if_needed(meta.address, Some(config))
        .await?;

    let outcome = ctx
        .executor
        .execute_buy(config, pool, meta.address, &signer, quote_amount, price)
        .await?;

    settle_buy(
        ctx,
        &meta,
        source,
        quote_amount,
        outcome.tokens_received,
        price,
        outcome.gas_cost_eth,
        outcome.tx_hash,
    )
    .await?;

    // Spend-rate watchdog
    let status = ctx.spend.lock().await.record_buy(
        &config.id,
        wei_to_eth(quote_amount),
        vault_balance_eth,
    );
    if status.threshold_crossed {
        ctx.alerts
            .emit(&Alert::high_spend_rate(
                &config.id,
                status.spent_pct,
                ctx.spend_threshold_pct,
            ))
            .await;
    }

    Ok(())
}

/// Ledger + records shared by market-making buys and deployment bursts.
#[allow(clippy::too_many_arguments)]
async fn settle_buy<P: ChainProvider>(
    ctx: &EigenContext<P>,
    meta: &WalletMeta,
    source: WalletSource,
    quote_amount: U256,
    tokens_received: U256,
    price: f64,
    gas_cost_eth: f64,
    tx_hash: alloy::primitives::TxHash,
) -> Result<()> {
    let config = &ctx.config;

    // Effective execution price from actual fill
    let execution_price = if tokens_received.is_zero() {
        price
    } else {
        wei_to_eth(quote_amount) / wei_to_eth(tokens_received)
    };

    let mut position = ctx
        .store
        .get_position(&config.id, config.token, meta.wallet_index)
        .await?;
    ledger::apply_buy(&mut position, tokens_received, execution_price)?;
    ctx.store.upsert_position(&position).await?;

    ctx.store
        .append_trade(&TradeRecord {
            eigen_id: config.id.clone(),
            kind: TradeKind::Buy,
            wallet_index: meta.wallet_index,
            token: config.token,
            token_amount: tokens_received,
            quote_amount_eth: wei_to_eth(quote_amount),
            execution_price,
            realized_pnl: 0.0,
            gas_cost_eth,
            tx_hash: Some(tx_hash),
            router: Some(ctx.executor.addresses().router),
            pool_version: config.pool.as_ref().map(|p| p.version),
            created_at: Utc::now(),
        })
        .await?;

    ctx.store
        .append_price_snapshot(&keeper_core::types::PriceSnapshot {
            token: config.token,
            price: execution_price,
            source: "trade".into(),
            created_at: Utc::now(),
        })
        .await?;

    ctx.wallets
        .record_trade(&config.id, source, meta.wallet_index)
        .await?;

    ctx.store.record_eigen_gas(&config.id, gas_cost_eth).await?;
    ctx.gas_budget.lock().await.record_spend(gas_cost_eth);

    Ok(())
}

/// Sell path: walk wallets in order, capping by real balances, until the
/// decided quantity is satisfied.
#[allow(clippy::too_many_arguments)]
async fn execute_sell_action<P: ChainProvider>(
    ctx: &EigenContext<P>,
    pool: &PoolSpec,
    wallets: &[WalletMeta],
    source: WalletSource,
    wallet_token_balances: &[U256],
    token_amount: U256,
    variant: SellVariant,
    price: f64,
) -> Result<()> {
    let config = &ctx.config;
    let kind = trade_kind_for(variant);

    let mut remaining = token_amount;
    let mut sold_any = false;

    for (meta, held) in wallets.iter().zip(wallet_token_balances) {
        if remaining.is_zero() {
            break;
        }
        let clip = remaining.min(*held);
        if clip.is_zero() {
            continue;
        }

        let signer = ctx.wallets.signer_for(config, source, meta.wallet_index).await?;
        ctx.executor
            .fund_wallet_if_needed(meta.address, Some(config))
            .await?;

        let outcome = match ctx
            .executor
            .execute_sell(config, pool, meta.address, &signer, clip, price)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                record_sell_failure(ctx, &e.to_string()).await;
                return Err(e);
            }
        };

        // Ledger: realized P&L against the stored entry
        let mut position = ctx
            .store
            .get_position(&config.id, config.token, meta.wallet_index)
            .await?;
        let sellable = clip.min(position.amount_raw);
        let realized = if sellable.is_zero() {
            0.0
        } else {
            ledger::apply_sell(&mut position, sellable, price)?
        };
        ctx.store.upsert_position(&position).await?;

        ctx.store
            .append_trade(&TradeRecord {
                eigen_id: config.id.clone(),
                kind,
                wallet_index: meta.wallet_index,
                token: config.token,
                token_amount: clip,
                quote_amount_eth: outcome.proceeds_eth,
                execution_price: price,
                realized_pnl: realized,
                gas_cost_eth: outcome.gas_cost_eth,
                tx_hash: Some(outcome.tx_hash),
                router: Some(ctx.executor.addresses().router),
                pool_version: Some(pool.version),
                created_at: Utc::now(),
            })
            .await?;

        ctx.wallets
            .record_trade(&config.id, source, meta.wallet_index)
            .await?;
        ctx.store.record_eigen_gas(&config.id, outcome.gas_cost_eth).await?;
        ctx.gas_budget.lock().await.record_spend(outcome.gas_cost_eth);

        remaining -= clip;
        sold_any = true;
    }

    if !sold_any {
        record_sell_failure(ctx, "no_tokens_in_wallets").await;
        return Err(ServiceError::SellFailed {
            eigen: config.id.clone(),
            reason: "no_tokens_in_wallets".into(),
        });
    }

    ctx.sell_block.lock().await.record_success(&config.id);

    if remaining > U256::ZERO {
        warn!(unfilled = %remaining, "Sell partially filled, wallets exhausted");
    }

    Ok(())
}

async fn record_sell_failure<P: ChainProvider>(ctx: &EigenContext<P>, error: &str) {
    let status = ctx.sell_block.lock().await.record_failure(&ctx.config.id, error);
    if status.just_blocked {
        ctx.alerts
            .emit(&Alert::sell_blocked(
                &ctx.config.id,
                status.consecutive_failures,
                error,
            ))
            .await;
    }
}

/// Map a sell variant onto the trade-record vocabulary. A stop-loss records
/// as a plain sell; the reason string carries the trigger.
const fn trade_kind_for(variant: SellVariant) -> TradeKind {
    match variant {
        SellVariant::Plain | SellVariant::StopLoss => TradeKind::Sell,
        SellVariant::ProfitTake => TradeKind::ProfitTake,
        SellVariant::Reactive => TradeKind::ReactiveSell,
        SellVariant::Liquidation => TradeKind::Liquidation,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sell_variants_map_to_trade_kinds() {
        assert_eq!(trade_kind_for(SellVariant::Plain), TradeKind::Sell);
        assert_eq!(trade_kind_for(SellVariant::StopLoss), TradeKind::Sell);
        assert_eq!(trade_kind_for(SellVariant::ProfitTake), TradeKind::ProfitTake);
        assert_eq!(trade_kind_for(SellVariant::Reactive), TradeKind::ReactiveSell);
        assert_eq!(trade_kind_for(SellVariant::Liquidation), TradeKind::Liquidation);
    }
}
