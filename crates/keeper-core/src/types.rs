//! Domain types for the eigen keeper.
//!
//! This module defines the entities the keeper schedules, trades, and
//! persists: eigen configurations, pools, positions, trade records, price
//! snapshots, and AI evaluation records.

use alloy::primitives::{Address, B256, TxHash, U256, keccak256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KeeperError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// EIGEN CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of an eigen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EigenStatus {
    /// Trading normally.
    Active,
    /// Paused by the operator; no actions are taken.
    Suspended,
    /// Exiting all positions; driven to completion by the recovery phase.
    Liquidating,
    /// Fully exited; terminal.
    Liquidated,
    /// Terminated by the keeper contract; funds swept.
    Terminated,
}

impl EigenStatus {
    /// Stable string form used in the store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Liquidating => "liquidating",
            Self::Liquidated => "liquidated",
            Self::Terminated => "terminated",
        }
    }

    /// Parse the store's string form.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown status strings.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "liquidating" => Ok(Self::Liquidating),
            "liquidated" => Ok(Self::Liquidated),
            "terminated" => Ok(Self::Terminated),
            other => Err(KeeperError::InvalidConfig(format!(
                "unknown eigen status: {other}"
            ))),
        }
    }

    /// Whether this eigen should be driven to exit during recovery.
    #[must_use]
    pub const fn needs_exit(self) -> bool {
        matches!(self, Self::Liquidating | Self::Terminated)
    }
}

/// Where an eigen's sub-wallet keys come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletSource {
    /// Keys derived deterministically from the master secret.
    #[default]
    Derived,
    /// Keys imported by the owner, stored encrypted.
    Imported,
}

impl WalletSource {
    /// Stable string form used in the store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Derived => "derived",
            Self::Imported => "imported",
        }
    }

    /// Parse the store's string form.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown source strings.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "derived" => Ok(Self::Derived),
            "imported" => Ok(Self::Imported),
            other => Err(KeeperError::InvalidConfig(format!(
                "unknown wallet source: {other}"
            ))),
        }
    }
}

/// AMM pool version tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolVersion {
    /// Constant-product pair.
    V2,
    /// Concentrated liquidity pool.
    V3,
    /// Singleton pool with hooks, identified by pool id.
    V4,
}

impl PoolVersion {
    /// Stable string form used in the store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V2 => "v2",
            Self::V3 => "v3",
            Self::V4 => "v4",
        }
    }

    /// Parse the store's string form.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown version strings.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "v2" => Ok(Self::V2),
            "v3" => Ok(Self::V3),
            "v4" => Ok(Self::V4),
            other => Err(KeeperError::InvalidConfig(format!(
                "unknown pool version: {other}"
            ))),
        }
    }
}

/// The AMM pool an eigen trades against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSpec {
    /// Version tag selecting the swap route and event signatures.
    pub version: PoolVersion,

    /// Pool (or pair) contract address. For V4 this is the pool manager.
    pub address: Address,

    /// Fee tier in hundredths of a bip (e.g., 3000 = 0.3%).
    pub fee: u32,

    /// Tick spacing for concentrated pools.
    pub tick_spacing: i32,

    /// Optional hook contract (V4 only).
    pub hook: Option<Address>,

    /// Derived pool id (V4 only).
    pub pool_id: Option<B256>,
}

/// Configuration for one autonomous trading agent.
///
/// Created by the external API surface, mutated only through the store's
/// whitelisted update path, and read-only inside a trade cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EigenConfig {
    /// Short human-readable identifier (e.g., "mm-wmon-01").
    pub id: String,

    /// Token this eigen trades.
    pub token: Address,

    /// Pool parameters, when resolved.
    pub pool: Option<PoolSpec>,

    /// Owner address (receives vault funds on termination).
    pub owner: Address,

    /// Vault contract custodying native funds, on vault-mediated chains.
    pub vault: Option<Address>,

    /// Lifecycle status.
    pub status: EigenStatus,

    /// Daily volume target in native units.
    pub volume_target_eth: f64,

    /// Target trades per hour; drives the market-making timing gate.
    pub trade_frequency_per_hour: f64,

    /// Minimum order size as percent of balance.
    pub order_size_min_pct: f64,

    /// Maximum order size as percent of balance.
    pub order_size_max_pct: f64,

    /// Quoted spread width in percent.
    pub spread_pct: f64,

    /// Take-profit threshold in percent of entry.
    pub profit_target_pct: f64,

    /// Stop-loss threshold in percent of entry (positive number).
    pub stop_loss_pct: f64,

    /// Number of sub-wallets to spread execution across.
    pub wallet_count: u32,

    /// Swap slippage tolerance in basis points.
    pub slippage_bps: u16,

    /// Whether to mirror external buy flow with sells.
    pub reactive_sell_enabled: bool,

    /// Percent of external buy volume to mirror.
    pub reactive_sell_pct: f64,

    /// Last block scanned by the reactive detector.
    pub last_scanned_block: Option<u64>,

    /// Lifetime gas budget in native units.
    pub gas_budget_eth: f64,

    /// Gas spent so far in native units. Monitored, not enforced.
    pub gas_spent_eth: f64,

    /// Optional strategy prompt appended to the AI evaluation context.
    pub custom_prompt: Option<String>,

    /// Where sub-wallet keys come from.
    pub wallet_source: WalletSource,

    /// Chain this eigen trades on.
    pub chain_id: u64,
}

impl EigenConfig {
    /// The on-chain bytes32 identifier: keccak of the short id.
    #[must_use]
    pub fn onchain_id(&self) -> B256 {
        keccak256(self.id.as_bytes())
    }

    /// Remaining gas budget in native units, saturating at zero.
    #[must_use]
    pub fn gas_remaining_eth(&self) -> f64 {
        (self.gas_budget_eth - self.gas_spent_eth).max(0.0)
    }

    /// Validate the config invariants.
    ///
    /// # Errors
    ///
    /// Returns an error when wallet count, slippage, or the risk thresholds
    /// are out of range.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(KeeperError::InvalidConfig("id is required".into()));
        }
        if self.wallet_count == 0 {
            return Err(KeeperError::InvalidConfig(
                "wallet_count must be >= 1".into(),
            ));
        }
        if self.slippage_bps > 10_000 {
            return Err(KeeperError::InvalidConfig(format!(
                "slippage_bps {} out of range [0, 10000]",
                self.slippage_bps
            )));
        }
        if self.stop_loss_pct <= 0.0 {
            return Err(KeeperError::InvalidConfig(
                "stop_loss_pct must be positive".into(),
            ));
        }
        if self.profit_target_pct <= 0.0 {
            return Err(KeeperError::InvalidConfig(
                "profit_target_pct must be positive".into(),
            ));
        }
        if self.order_size_min_pct > self.order_size_max_pct {
            return Err(KeeperError::InvalidConfig(
                "order_size_min_pct exceeds order_size_max_pct".into(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Token position held by one sub-wallet of one eigen.
///
/// Reduced to zero on full close, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Owning eigen.
    pub eigen_id: String,

    /// Token held.
    pub token: Address,

    /// Sub-wallet index within the eigen.
    pub wallet_index: u32,

    /// Amount held in base units.
    pub amount_raw: U256,

    /// Weighted-average entry price (native per token).
    pub entry_price: f64,

    /// Total cost basis in native units.
    pub total_cost: f64,
}

impl Position {
    /// An empty position for the given key.
    #[must_use]
    pub const fn empty(eigen_id: String, token: Address, wallet_index: u32) -> Self {
        Self {
            eigen_id,
            token,
            wallet_index,
            amount_raw: U256::ZERO,
            entry_price: 0.0,
            total_cost: 0.0,
        }
    }

    /// Whether any amount is held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.amount_raw > U256::ZERO
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRADES
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    /// Market-making or deployment buy.
    Buy,
    /// Market-making sell.
    Sell,
    /// Take-profit sell.
    ProfitTake,
    /// Sell mirroring external buy flow.
    ReactiveSell,
    /// Position exit during liquidation.
    Liquidation,
    /// Cross-venue arbitrage fill (recorded by the external arb module).
    Arbitrage,
}

impl TradeKind {
    /// Stable string form used in the store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::ProfitTake => "profit_take",
            Self::ReactiveSell => "reactive_sell",
            Self::Liquidation => "liquidation",
            Self::Arbitrage => "arbitrage",
        }
    }

    /// Parse the store's string form.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown kind strings.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            "profit_take" => Ok(Self::ProfitTake),
            "reactive_sell" => Ok(Self::ReactiveSell),
            "liquidation" => Ok(Self::Liquidation),
            "arbitrage" => Ok(Self::Arbitrage),
            other => Err(KeeperError::InvalidConfig(format!(
                "unknown trade kind: {other}"
            ))),
        }
    }
}

/// Append-only record of one execution attempt that reached the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Owning eigen.
    pub eigen_id: String,

    /// Kind of trade.
    pub kind: TradeKind,

    /// Sub-wallet index that executed.
    pub wallet_index: u32,

    /// Token traded.
    pub token: Address,

    /// Token quantity in base units (always positive; `kind` carries the side).
    pub token_amount: U256,

    /// Native quantity in decimal units.
    pub quote_amount_eth: f64,

    /// Execution price (native per token).
    pub execution_price: f64,

    /// Realized P&L in native units (zero for buys).
    pub realized_pnl: f64,

    /// Gas cost in native units.
    pub gas_cost_eth: f64,

    /// Transaction hash, when the send reached the mempool.
    pub tx_hash: Option<TxHash>,

    /// Router the swap went through.
    pub router: Option<Address>,

    /// Pool version used.
    pub pool_version: Option<PoolVersion>,

    /// When the trade was recorded.
    pub created_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SNAPSHOTS & EVALUATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Append-only price observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Token observed.
    pub token: Address,

    /// Price in native per token.
    pub price: f64,

    /// Where the price came from (e.g., "pool").
    pub source: String,

    /// Observation time.
    pub created_at: DateTime<Utc>,
}

/// Result of one AI pre-trade evaluation, including fail-open results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvaluation {
    /// Eigen whose trade was evaluated.
    pub eigen_id: String,

    /// Proposed action, serialized for the audit trail.
    pub proposed_action: String,

    /// Whether the trade may proceed.
    pub approved: bool,

    /// Model confidence in [0, 100].
    pub confidence: u8,

    /// Short reason string (truncated to 200 chars).
    pub reason: String,

    /// Adjusted token/native amount, when the model resized the trade.
    pub adjusted_amount: Option<f64>,

    /// Suggested wait in seconds before retrying, when rejected.
    pub suggested_wait_secs: Option<u64>,

    /// Model identifier that produced this evaluation.
    pub model: String,

    /// Provider round-trip latency in milliseconds.
    pub latency_ms: u64,

    /// Total tokens billed for the call.
    pub tokens_used: u32,

    /// When the evaluation was recorded.
    pub created_at: DateTime<Utc>,
}

/// Aggregated external buy flow found by the reactive detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalBuySignal {
    /// Number of qualifying external buys.
    pub buy_count: u32,

    /// Total base asset that entered the pool, in wei.
    pub total_base_in: U256,

    /// Highest block scanned; the caller advances its cursor to this even
    /// when no buys were found.
    pub latest_block_scanned: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

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
            gas_spent_eth: 0.1,
            custom_prompt: None,
            wallet_source: WalletSource::Derived,
            chain_id: 10143,
        }
    }

    #[test]
    fn onchain_id_is_keccak_of_short_id() {
        let cfg = config();
        assert_eq!(cfg.onchain_id(), keccak256(b"mm-test-01"));

        // Round-trips: same id, same hash
        let again = config();
        assert_eq!(cfg.onchain_id(), again.onchain_id());
    }

    #[test]
    fn gas_remaining_saturates() {
        let mut cfg = config();
        assert!((cfg.gas_remaining_eth() - 0.4).abs() < 1e-12);

        cfg.gas_spent_eth = 1.0;
        assert!(cfg.gas_remaining_eth().abs() < f64::EPSILON);
    }

    #[test]
    fn validate_rejects_bad_configs() {
        let mut cfg = config();
        cfg.wallet_count = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.slippage_bps = 10_001;
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.stop_loss_pct = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.order_size_min_pct = 20.0;
        assert!(cfg.validate().is_err());

        assert!(config().validate().is_ok());
    }

    #[test]
    fn status_round_trips() {
        for status in [
            EigenStatus::Active,
            EigenStatus::Suspended,
            EigenStatus::Liquidating,
            EigenStatus::Liquidated,
            EigenStatus::Terminated,
        ] {
            assert_eq!(EigenStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(EigenStatus::parse("zombie").is_err());
    }

    #[test]
    fn needs_exit_statuses() {
        assert!(EigenStatus::Liquidating.needs_exit());
        assert!(EigenStatus::Terminated.needs_exit());
        assert!(!EigenStatus::Active.needs_exit());
        assert!(!EigenStatus::Liquidated.needs_exit());
    }

    #[test]
    fn trade_kind_round_trips() {
        for kind in [
            TradeKind::Buy,
            TradeKind::Sell,
            TradeKind::ProfitTake,
            TradeKind::ReactiveSell,
            TradeKind::Liquidation,
            TradeKind::Arbitrage,
        ] {
            assert_eq!(TradeKind::parse(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn empty_position_is_closed() {
        let pos = Position::empty("e".into(), Address::ZERO, 0);
        assert!(!pos.is_open());
        assert!(pos.entry_price.abs() < f64::EPSILON);
        assert!(pos.total_cost.abs() < f64::EPSILON);
    }
}
