//! Phase-aware decision engine.
//!
//! One call to [`DecisionEngine::decide`] evaluates the priority ladder for a
//! single eigen and returns at most one action:
//!
//! 1. **Stop-loss** - holding and unrealized P&L at or below `-stop_loss_pct`
//!    sells the entire position.
//! 2. **Profit-take** - unrealized P&L at or above `profit_target_pct` sells
//!    the token quantity whose value equals the unrealized profit.
//! 3. **Reactive sell** - mirrors external buy flow found by the detector;
//!    funded reactive eigens never fall through to market-making.
//! 4. **Deployment** - capital still being distributed into empty sub-wallets
//!    buys `80% · balance / empty_wallets`.
//! 5. **Timing gate** - market-making waits `3600 / trade_frequency` seconds
//!    between trades.
//! 6. **Ratio market-making** - buy/sell around the token-value ratio with a
//!    dead band.
//!
//! The first rule whose guard holds wins; later rules are skipped. The engine
//! is pure apart from its RNG: the reactive scan and cursor persistence are
//! the caller's job, with the aggregated signal passed in.

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::ledger::AggregatePosition;
use crate::math::{eth_to_wei, percent_to_bps, percentage_of, wei_to_eth};
use crate::types::{EigenConfig, EigenStatus, ExternalBuySignal};

// ═══════════════════════════════════════════════════════════════════════════════
// THRESHOLDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Native balance above which an eigen still counts as deploying.
pub const MIN_DEPLOY_BALANCE_ETH: f64 = 0.05;

/// Native floor below which buys are not attempted.
pub const BUY_FLOOR_ETH: f64 = 0.01;

/// Native floor above which a reactive eigen idles instead of market-making.
pub const REACTIVE_IDLE_FLOOR_ETH: f64 = 0.01;

/// Deployment buys use this share of the remaining balance, spread across
/// empty wallets.
const DEPLOY_BPS: u64 = 8_000;

/// Token-value ratio above which the engine always sells.
const RATIO_SELL_BAND: f64 = 0.90;

/// Token-value ratio below which the engine always buys.
const RATIO_BUY_BAND: f64 = 0.70;

/// Mid-band split: sell above, buy below.
const RATIO_MID_SPLIT: f64 = 0.80;

/// When a buy is blocked by the native floor, sell instead only above this.
const RATIO_SELL_FALLBACK: f64 = 0.50;

// ═══════════════════════════════════════════════════════════════════════════════
// ACTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Why a sell was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellVariant {
    /// Ratio-based market-making sell.
    Plain,
    /// Stop-loss exit of the whole position.
    StopLoss,
    /// Partial sell realizing the unrealized profit.
    ProfitTake,
    /// Mirror of external buy flow.
    Reactive,
    /// Exit during liquidation.
    Liquidation,
}

/// One action the keeper should execute for an eigen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Spend `quote_amount` wei of native on tokens.
    Buy {
        /// Native amount to spend, in wei.
        quote_amount: U256,
    },
    /// Sell `token_amount` base units of the token.
    Sell {
        /// Token amount to sell, in base units.
        token_amount: U256,
        /// Why the sell was emitted.
        variant: SellVariant,
    },
}

impl Action {
    /// Short tag for logging and the AI prompt.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Buy { .. } => "buy",
            Self::Sell { variant, .. } => match variant {
                SellVariant::Plain => "sell",
                SellVariant::StopLoss => "stop_loss_sell",
                SellVariant::ProfitTake => "profit_take",
                SellVariant::Reactive => "reactive_sell",
                SellVariant::Liquidation => "liquidation",
            },
        }
    }

    /// Whether this action is any kind of sell.
    #[must_use]
    pub const fn is_sell(&self) -> bool {
        matches!(self, Self::Sell { .. })
    }
}

/// A decided action with its triggering reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// The action to execute.
    pub action: Action,

    /// Human-readable reason, recorded alongside the trade.
    pub reason: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// INPUTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything one decision needs, gathered by the scheduler.
#[derive(Debug)]
pub struct DecisionInputs<'a> {
    /// The eigen's configuration.
    pub config: &'a EigenConfig,

    /// Vault (or wallet-sum) native balance in wei.
    pub native_balance: U256,

    /// Current pool price in native per token. Zero means unknown/stale.
    pub price: f64,

    /// Position aggregated across sub-wallets.
    pub position: AggregatePosition,

    /// Per-wallet token balances, for deployment-phase classification.
    pub wallet_token_balances: &'a [U256],

    /// When this eigen last traded.
    pub last_trade_at: Option<DateTime<Utc>>,

    /// External buy flow found by the reactive detector this cycle, when
    /// reactive mode is on and the pool is known. The caller persists the
    /// scan cursor regardless of the decision.
    pub external_buys: Option<ExternalBuySignal>,

    /// Decision time.
    pub now: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Decision engine with its order-sizing RNG.
#[derive(Debug)]
pub struct DecisionEngine {
    rng: StdRng,
}

impl DecisionEngine {
    /// Create an engine with an OS-seeded RNG.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Create an engine with a fixed seed (for reproducible tests).
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Run the priority ladder for one eigen.
    ///
    /// Returns `None` when no rule fires: suspended eigen, unknown price,
    /// timing gate, or insufficient balance/holdings for the computed order.
    pub fn decide(&mut self, inputs: &DecisionInputs<'_>) -> Option<Decision> {
        let config = inputs.config;

        if config.status != EigenStatus::Active {
            debug!(eigen = %config.id, status = config.status.as_str(), "Not active, no action");
            return None;
        }

        if !inputs.price.is_finite() || inputs.price <= 0.0 {
            debug!(eigen = %config.id, "No usable price, no action");
            return None;
        }

        // 1. Stop-loss
        if let Some(decision) = Self::check_stop_loss(inputs) {
            return Some(decision);
        }

        // 2. Profit-take
        if let Some(decision) = Self::check_profit_take(inputs) {
            return Some(decision);
        }

        // 3. Reactive sell
        if config.reactive_sell_enabled {
            if let Some(decision) = Self::check_reactive(inputs) {
                return Some(decision);
            }
            // Funded reactive eigens do not market-make
            if wei_to_eth(inputs.native_balance) > REACTIVE_IDLE_FLOOR_ETH {
                debug!(eigen = %config.id, "Reactive eigen funded, idling");
                return None;
            }
        }

        // 4. Deployment phase
        if let Some(result) = Self::check_deployment(inputs) {
            return result;
        }

        // 5. Timing gate (market-making only)
        if Self::timing_gate_closed(inputs) {
            debug!(eigen = %config.id, "Timing gate closed, no action");
            return None;
        }

        // 6. Ratio market-making
        self.market_make(inputs)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ladder rules
    // ─────────────────────────────────────────────────────────────────────────

    fn check_stop_loss(inputs: &DecisionInputs<'_>) -> Option<Decision> {
        let pnl_pct = inputs.position.unrealized_pnl_pct(inputs.price)?;
        let stop = inputs.config.stop_loss_pct;

        if pnl_pct <= -stop {
            return Some(Decision {
                action: Action::Sell {
                    token_amount: inputs.position.amount_raw,
                    variant: SellVariant::StopLoss,
                },
                reason: format!("stop_loss_triggered: {pnl_pct:.1}% <= -{stop:.0}%"),
            });
        }
        None
    }

    fn check_profit_take(inputs: &DecisionInputs<'_>) -> Option<Decision> {
        let pnl_pct = inputs.position.unrealized_pnl_pct(inputs.price)?;
        let target = inputs.config.profit_target_pct;

        if pnl_pct >= target {
            // Sell the token quantity whose value equals the unrealized profit
            let profit = inputs.position.unrealized_pnl(inputs.price);
            let tokens = profit / inputs.price;
            let token_amount = eth_to_wei(tokens).min(inputs.position.amount_raw);

            if token_amount.is_zero() {
                return None;
            }

            return Some(Decision {
                action: Action::Sell {
                    token_amount,
                    variant: SellVariant::ProfitTake,
                },
                reason: format!("profit_target_reached: {pnl_pct:.1}% >= {target:.0}%"),
            });
        }
        None
    }

    fn check_reactive(inputs: &DecisionInputs<'_>) -> Option<Decision> {
        let signal = inputs.external_buys?;
        if signal.total_base_in.is_zero() {
            return None;
        }

        let mirror_bps = percent_to_bps(inputs.config.reactive_sell_pct);
        let sell_value = percentage_of(signal.total_base_in, mirror_bps);
        let tokens = wei_to_eth(sell_value) / inputs.price;
        // Capped by holdings before any AI resize
        let token_amount = eth_to_wei(tokens).min(inputs.position.amount_raw);

        if token_amount.is_zero() {
            debug!(
                eigen = %inputs.config.id,
                buys = signal.buy_count,
                "External buys seen but nothing to mirror"
            );
            return None;
        }

        Some(Decision {
            action: Action::Sell {
                token_amount,
                variant: SellVariant::Reactive,
            },
            reason: format!(
                "reactive_sell: mirroring {} external buys ({} wei in)",
                signal.buy_count, signal.total_base_in
            ),
        })
    }

    /// Returns `Some(result)` when the eigen is in deployment phase; the
    /// inner option is the buy to make (or `None` when deployment is pending
    /// funds).
    fn check_deployment(inputs: &DecisionInputs<'_>) -> Option<Option<Decision>> {
        let holding_wallets = inputs
            .wallet_token_balances
            .iter()
            .filter(|b| **b > U256::ZERO)
            .count();
        let empty_wallets = inputs.wallet_token_balances.len() - holding_wallets;
        let native_eth = wei_to_eth(inputs.native_balance);

        let deploying = holding_wallets == 0
            || (holding_wallets < inputs.wallet_token_balances.len()
                && native_eth > MIN_DEPLOY_BALANCE_ETH);

        if !deploying {
            return None;
        }

        if native_eth <= MIN_DEPLOY_BALANCE_ETH {
            debug!(eigen = %inputs.config.id, native_eth, "Deployment pending funds");
            return Some(None);
        }

        let per_wallet = percentage_of(inputs.native_balance, DEPLOY_BPS)
            / U256::from(empty_wallets.max(1) as u64);

        Some(Some(Decision {
            action: Action::Buy {
                quote_amount: per_wallet,
            },
            reason: format!("deployment: {empty_wallets} empty wallets"),
        }))
    }

    fn timing_gate_closed(inputs: &DecisionInputs<'_>) -> bool {
        let Some(last) = inputs.last_trade_at else {
            return false;
        };
        let freq = inputs.config.trade_frequency_per_hour;
        if freq <= 0.0 {
            return true;
        }

        let min_interval_secs = 3600.0 / freq;
        let elapsed = (inputs.now - last).num_seconds();
        #[allow(clippy::cast_precision_loss)]
        let gate_closed = (elapsed as f64) < min_interval_secs;
        gate_closed
    }

    fn market_make(&mut self, inputs: &DecisionInputs<'_>) -> Option<Decision> {
        let token_value = wei_to_eth(inputs.position.amount_raw) * inputs.price;
        let native_eth = wei_to_eth(inputs.native_balance);
        let total = token_value + native_eth;

        if total <= 0.0 {
            debug!(eigen = %inputs.config.id, "Nothing to trade with");
            return None;
        }

        let ratio = token_value / total;

        let min_bps = percent_to_bps(inputs.config.order_size_min_pct);
        let max_bps = percent_to_bps(inputs.config.order_size_max_pct);
        let pct_bps = if min_bps >= max_bps {
            min_bps
        } else {
            self.rng.random_range(min_bps..=max_bps)
        };

        // Direction with dead band
        let mut sell = if ratio > RATIO_SELL_BAND {
            true
        } else if ratio < RATIO_BUY_BAND {
            false
        } else {
            ratio > RATIO_MID_SPLIT
        };

        // Buy blocked by the native floor falls through to a sell only when
        // tokens dominate; otherwise wait for a refill.
        if !sell && native_eth < BUY_FLOOR_ETH {
            if ratio > RATIO_SELL_FALLBACK {
                sell = true;
            } else {
                debug!(
                    eigen = %inputs.config.id,
                    native_eth,
                    ratio,
                    "Buy wanted but balance below floor"
                );
                return None;
            }
        }

        if sell {
            let token_amount = percentage_of(inputs.position.amount_raw, pct_bps);
            if token_amount.is_zero() {
                debug!(eigen = %inputs.config.id, "Insufficient holdings for sell");
                return None;
            }
            Some(Decision {
                action: Action::Sell {
                    token_amount,
                    variant: SellVariant::Plain,
                },
                reason: format!("mm_sell: ratio {ratio:.3}, size {pct_bps}bps"),
            })
        } else {
            let quote_amount = percentage_of(inputs.native_balance, pct_bps);
            if quote_amount.is_zero() {
                return None;
            }
            Some(Decision {
                action: Action::Buy { quote_amount },
                reason: format!("mm_buy: ratio {ratio:.3}, size {pct_bps}bps"),
            })
        }
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{aggregate, apply_buy};
    use crate::types::{Position, WalletSource};
    use alloy::primitives::Address;

    const ONE: u128 = 1_000_000_000_000_000_000;

    fn config() -> EigenConfig {
        EigenConfig {
            id: "mm-test-01".into(),
            token: Address::repeat_byte(0x11),
            pool: None,
            owner: Address::repeat_byte(0x22),
            vault: None,
            status: EigenStatus::Active,
            volume_target_eth: 10.0,
            trade_frequency_per_hour: 6.0,
            order_size_min_pct: 8.0,
            order_size_max_pct: 15.0,
            spread_pct: 2.0,
            profit_target_pct: 50.0,
            stop_loss_pct: 30.0,
            wallet_count: 5,
            slippage_bps: 100,
            reactive_sell_enabled: false,
            reactive_sell_pct: 50.0,
            last_scanned_block: None,
            gas_budget_eth: 0.5,
            gas_spent_eth: 0.0,
            custom_prompt: None,
            wallet_source: WalletSource::Derived,
            chain_id: 10143,
        }
    }

    fn position_with_cost(amount: u128, price: f64) -> AggregatePosition {
        let mut p = Position::empty("mm-test-01".into(), Address::repeat_byte(0x11), 0);
        apply_buy(&mut p, U256::from(amount), price).unwrap();
        aggregate([&p])
    }

    fn inputs<'a>(
        config: &'a EigenConfig,
        native: u128,
        price: f64,
        position: AggregatePosition,
        wallet_balances: &'a [U256],
    ) -> DecisionInputs<'a> {
        DecisionInputs {
            config,
            native_balance: U256::from(native),
            price,
            position,
            wallet_token_balances: wallet_balances,
            last_trade_at: None,
            external_buys: None,
            now: Utc::now(),
        }
    }

    #[test]
    fn stop_loss_sells_entire_position() {
        let cfg = config();
        let mut engine = DecisionEngine::with_seed(42);

        // Bought 1 token at 1.0, price now 0.6 => -40% <= -30%
        let position = position_with_cost(ONE, 1.0);
        let balances = [U256::from(ONE)];
        let decision = engine
            .decide(&inputs(&cfg, ONE, 0.6, position, &balances))
            .unwrap();

        assert_eq!(
            decision.action,
            Action::Sell {
                token_amount: U256::from(ONE),
                variant: SellVariant::StopLoss,
            }
        );
        assert!(decision.reason.starts_with("stop_loss_triggered: -40.0% <= -30%"));
    }

    #[test]
    fn profit_take_sells_the_profit_value() {
        let cfg = config();
        let mut engine = DecisionEngine::with_seed(42);

        // Bought 1 token at 1.0, price now 2.0 => +100% >= 50%
        // Profit = 1.0 native; tokens = 1.0 / 2.0 = 0.5
        let position = position_with_cost(ONE, 1.0);
        let balances = [U256::from(ONE)];
        let decision = engine
            .decide(&inputs(&cfg, ONE, 2.0, position, &balances))
            .unwrap();

        assert_eq!(
            decision.action,
            Action::Sell {
                token_amount: U256::from(ONE / 2),
                variant: SellVariant::ProfitTake,
            }
        );
        assert!(decision.reason.starts_with("profit_target_reached"));
    }

    #[test]
    fn stop_loss_is_checked_before_profit_take() {
        // Tight thresholds put the pnl well past both rules' trigger
        // magnitudes; the ladder must resolve by order, not magnitude.
        let mut cfg = config();
        cfg.stop_loss_pct = 1.0;
        cfg.profit_target_pct = 1.0;

        let mut engine = DecisionEngine::with_seed(42);
        let position = position_with_cost(ONE, 1.0);
        let balances = [U256::from(ONE)];

        let decision = engine
            .decide(&inputs(&cfg, ONE, 0.5, position, &balances))
            .unwrap();
        assert!(matches!(
            decision.action,
            Action::Sell {
                variant: SellVariant::StopLoss,
                ..
            }
        ));

        // And the mirror case resolves to profit-take
        let position = position_with_cost(ONE, 1.0);
        let decision = engine
            .decide(&inputs(&cfg, ONE, 2.0, position, &balances))
            .unwrap();
        assert!(matches!(
            decision.action,
            Action::Sell {
                variant: SellVariant::ProfitTake,
                ..
            }
        ));
    }

    #[test]
    fn reactive_mirrors_external_buys_capped_by_holdings() {
        let mut cfg = config();
        cfg.reactive_sell_enabled = true;
        cfg.reactive_sell_pct = 50.0;

        let mut engine = DecisionEngine::with_seed(42);
        let position = position_with_cost(ONE / 10, 1.0); // holds 0.1 token
        let balances = [U256::from(ONE / 10)];

        let mut input = inputs(&cfg, 0, 1.0, position, &balances);
        input.external_buys = Some(ExternalBuySignal {
            buy_count: 3,
            total_base_in: U256::from(ONE), // 1 native in; mirror 50% = 0.5 token at price 1.0
            latest_block_scanned: 100,
        });

        let decision = engine.decide(&input).unwrap();
        // 0.5 token wanted, capped at the 0.1 held
        assert_eq!(
            decision.action,
            Action::Sell {
                token_amount: U256::from(ONE / 10),
                variant: SellVariant::Reactive,
            }
        );
    }

    #[test]
    fn funded_reactive_eigen_idles() {
        let mut cfg = config();
        cfg.reactive_sell_enabled = true;

        let mut engine = DecisionEngine::with_seed(42);
        let position = position_with_cost(ONE, 1.0);
        let balances = [U256::from(ONE)];

        // No external buys, balance above the idle floor: no action at all
        let mut input = inputs(&cfg, ONE, 1.0, position, &balances);
        input.external_buys = Some(ExternalBuySignal::default());

        assert!(engine.decide(&input).is_none());
    }

    #[test]
    fn deployment_buys_split_across_empty_wallets() {
        let cfg = config();
        let mut engine = DecisionEngine::with_seed(42);

        // 1 native, five empty wallets: 0.8 / 5 = 0.16 each
        let balances = [U256::ZERO; 5];
        let decision = engine
            .decide(&inputs(&cfg, ONE, 1.0, AggregatePosition::default(), &balances))
            .unwrap();

        assert_eq!(
            decision.action,
            Action::Buy {
                quote_amount: U256::from(160_000_000_000_000_000_u128),
            }
        );
        assert!(decision.reason.contains("deployment"));
    }

    #[test]
    fn partially_deployed_with_funds_keeps_deploying() {
        let cfg = config();
        let mut engine = DecisionEngine::with_seed(42);

        // Two wallets hold, three empty, balance above the deploy threshold
        let balances = [
            U256::from(ONE),
            U256::from(ONE),
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
        ];
        let position = position_with_cost(2 * ONE, 1.0);
        let decision = engine
            .decide(&inputs(&cfg, ONE, 1.0, position, &balances))
            .unwrap();

        // 0.8 / 3 empty wallets
        let expected = percentage_of(U256::from(ONE), 8000) / U256::from(3u64);
        assert_eq!(
            decision.action,
            Action::Buy {
                quote_amount: expected
            }
        );
    }

    #[test]
    fn timing_gate_blocks_recent_traders() {
        let cfg = config(); // 6 per hour => 600s between trades
        let mut engine = DecisionEngine::with_seed(42);

        let position = position_with_cost(ONE, 1.0);
        let balances = [U256::from(ONE)];
        let mut input = inputs(&cfg, ONE, 1.0, position, &balances);
        input.last_trade_at = Some(Utc::now() - chrono::Duration::seconds(60));

        assert!(engine.decide(&input).is_none());

        // Long enough ago: the gate opens
        input.last_trade_at = Some(Utc::now() - chrono::Duration::seconds(700));
        assert!(engine.decide(&input).is_some());
    }

    #[test]
    fn market_making_buys_below_the_band() {
        let mut cfg = config();
        // Force a deterministic 10% order size
        cfg.order_size_min_pct = 10.0;
        cfg.order_size_max_pct = 10.0;

        let mut engine = DecisionEngine::with_seed(42);

        // Token value 0.75, native 1.0 => ratio 0.428 < 0.70 => buy 10%
        let position = position_with_cost(3 * ONE / 4, 1.0);
        let balances = [U256::from(3 * ONE / 4)];
        let decision = engine
            .decide(&inputs(&cfg, ONE, 1.0, position, &balances))
            .unwrap();

        assert_eq!(
            decision.action,
            Action::Buy {
                quote_amount: U256::from(ONE / 10),
            }
        );
    }

    #[test]
    fn market_making_sells_above_the_band() {
        let mut cfg = config();
        cfg.order_size_min_pct = 10.0;
        cfg.order_size_max_pct = 10.0;

        let mut engine = DecisionEngine::with_seed(42);

        // Token value 10, native 0.02 => ratio ~0.998 > 0.90 => sell 10%
        let position = position_with_cost(10 * ONE, 1.0);
        let balances = [U256::from(10 * ONE)];
        let decision = engine
            .decide(&inputs(&cfg, ONE / 50, 1.0, position, &balances))
            .unwrap();

        assert_eq!(
            decision.action,
            Action::Sell {
                token_amount: U256::from(ONE),
                variant: SellVariant::Plain,
            }
        );
    }

    #[test]
    fn blocked_buy_waits_when_tokens_do_not_dominate() {
        let mut cfg = config();
        cfg.order_size_min_pct = 10.0;
        cfg.order_size_max_pct = 10.0;

        let mut engine = DecisionEngine::with_seed(42);

        // Ratio ~0.33 (buy wanted), native below the floor, ratio <= 0.50:
        // the engine waits rather than flipping to a sell.
        let position = position_with_cost(ONE / 500, 1.0);
        let balances = [U256::from(ONE / 500)];
        let input = inputs(&cfg, ONE / 250, 1.0, position, &balances);

        assert!(engine.decide(&input).is_none());
    }

    #[test]
    fn suspended_eigen_never_acts() {
        let mut cfg = config();
        cfg.status = EigenStatus::Suspended;

        let mut engine = DecisionEngine::with_seed(42);
        let position = position_with_cost(ONE, 1.0);
        let balances = [U256::from(ONE)];

        // Would be a clear stop-loss if active
        assert!(engine
            .decide(&inputs(&cfg, ONE, 0.1, position, &balances))
            .is_none());
    }

    #[test]
    fn zero_price_means_no_action() {
        let cfg = config();
        let mut engine = DecisionEngine::with_seed(42);
        let position = position_with_cost(ONE, 1.0);
        let balances = [U256::from(ONE)];

        assert!(engine
            .decide(&inputs(&cfg, ONE, 0.0, position, &balances))
            .is_none());
    }

    #[test]
    fn order_size_stays_in_configured_range() {
        let cfg = config(); // 8% - 15%
        let mut engine = DecisionEngine::with_seed(7);

        let position = position_with_cost(10 * ONE, 1.0);
        let balances = [U256::from(10 * ONE)];

        for _ in 0..50 {
            let decision = engine
                .decide(&inputs(&cfg, ONE / 50, 1.0, position, &balances))
                .unwrap();
            let Action::Sell { token_amount, .. } = decision.action else {
                continue;
            };
            let sold = wei_to_eth(token_amount);
            assert!(sold >= 10.0 * 0.08 - 1e-9, "sold {sold} below 8%");
            assert!(sold <= 10.0 * 0.15 + 1e-9, "sold {sold} above 15%");
        }
    }
}
