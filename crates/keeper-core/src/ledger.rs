//! Position ledger: weighted-average entries and realized P&L.
//!
//! The ledger operates on [`Position`] values; persistence lives in the
//! store. The accounting identities:
//!
//! - Buy of quantity `q` at price `p`: `total_cost += q·p`, `amount += q`,
//!   `entry_price = total_cost / amount` (weighted average).
//! - Sell of fraction `f = sold / held`: `total_cost *= (1 − f)`,
//!   `entry_price` unchanged, realized P&L `= sold · (p − entry_price)`.
//! - A position reduced to zero resets entry and cost to zero.

use alloy::primitives::U256;
use tracing::debug;

use crate::error::{KeeperError, Result};
use crate::math::wei_to_eth;
use crate::types::Position;

// ═══════════════════════════════════════════════════════════════════════════════
// MUTATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Apply a buy of `quantity` base units at `price` to the position.
///
/// # Errors
///
/// Returns an error when the price is zero or not finite.
pub fn apply_buy(position: &mut Position, quantity: U256, price: f64) -> Result<()> {
    if !price.is_finite() || price <= 0.0 {
        return Err(KeeperError::InvalidPrice(price));
    }
    if quantity.is_zero() {
        return Ok(());
    }

    let bought_tokens = wei_to_eth(quantity);
    position.total_cost += bought_tokens * price;
    position.amount_raw += quantity;

    let held_tokens = wei_to_eth(position.amount_raw);
    if held_tokens > 0.0 {
        position.entry_price = position.total_cost / held_tokens;
    }

    debug!(
        eigen = %position.eigen_id,
        wallet = position.wallet_index,
        amount = %position.amount_raw,
        entry = position.entry_price,
        "Ledger buy applied"
    );

    Ok(())
}

/// Apply a sell of `quantity` base units at `price` to the position.
///
/// Returns the realized P&L in native units. The entry price is preserved on
/// partial sells; a full close zeroes entry and cost.
///
/// # Errors
///
/// Returns an error when the price is invalid or the quantity exceeds the
/// recorded position.
pub fn apply_sell(position: &mut Position, quantity: U256, price: f64) -> Result<f64> {
    if !price.is_finite() || price <= 0.0 {
        return Err(KeeperError::InvalidPrice(price));
    }
    if quantity.is_zero() {
        return Ok(0.0);
    }
    if quantity > position.amount_raw {
        return Err(KeeperError::SellExceedsPosition {
            requested: quantity.to_string(),
            held: position.amount_raw.to_string(),
        });
    }

    let sold_tokens = wei_to_eth(quantity);
    let realized = sold_tokens * (price - position.entry_price);

    let held_tokens = wei_to_eth(position.amount_raw);
    let fraction = if held_tokens > 0.0 {
        sold_tokens / held_tokens
    } else {
        1.0
    };

    position.amount_raw -= quantity;
    position.total_cost *= 1.0 - fraction;

    if position.amount_raw.is_zero() {
        position.entry_price = 0.0;
        position.total_cost = 0.0;
    }

    debug!(
        eigen = %position.eigen_id,
        wallet = position.wallet_index,
        sold = %quantity,
        realized,
        remaining = %position.amount_raw,
        "Ledger sell applied"
    );

    Ok(realized)
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECONCILIATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of reconciling a stored position against the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Stored and chain state agree well enough; stored entry kept.
    Trusted,
    /// Chain shows nothing; position treated as externally sold (P&L 0).
    ClearedExternal,
    /// Chain shows tokens the store does not; entry reconstructed at the
    /// current price.
    Reconstructed,
}

/// Reconcile a stored position against the wallet's real token balance.
///
/// | Stored | Chain | Outcome |
/// |--------|-------|---------|
/// | > 0    | 0     | clear position, `ClearedExternal` |
/// | > 0    | > 0   | trust the store, `Trusted` |
/// | 0      | > 0   | rebuild at `current_price`, `Reconstructed` |
/// | 0      | 0     | `Trusted` (nothing to do) |
#[must_use]
pub fn reconcile(position: &mut Position, chain_amount: U256, current_price: f64) -> Reconciliation {
    let stored_open = position.is_open();
    let chain_open = chain_amount > U256::ZERO;

    match (stored_open, chain_open) {
        (true, false) => {
            position.amount_raw = U256::ZERO;
            position.entry_price = 0.0;
            position.total_cost = 0.0;
            Reconciliation::ClearedExternal
        }
        (false, true) => {
            position.amount_raw = chain_amount;
            position.entry_price = current_price;
            position.total_cost = wei_to_eth(chain_amount) * current_price;
            Reconciliation::Reconstructed
        }
        _ => Reconciliation::Trusted,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AGGREGATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Position aggregated across an eigen's sub-wallets.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregatePosition {
    /// Total amount held in base units.
    pub amount_raw: U256,

    /// Total cost basis in native units.
    pub total_cost: f64,

    /// Cost-weighted average entry price.
    pub entry_price: f64,
}

impl AggregatePosition {
    /// Whether any wallet holds tokens.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.amount_raw > U256::ZERO
    }

    /// Unrealized P&L in percent of cost at the given price.
    ///
    /// Returns `None` for empty positions or zero cost.
    #[must_use]
    pub fn unrealized_pnl_pct(&self, price: f64) -> Option<f64> {
        if !self.is_open() || self.total_cost <= 0.0 {
            return None;
        }
        let value = wei_to_eth(self.amount_raw) * price;
        Some((value - self.total_cost) / self.total_cost * 100.0)
    }

    /// Unrealized P&L in native units at the given price.
    #[must_use]
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        wei_to_eth(self.amount_raw) * price - self.total_cost
    }
}

/// Aggregate per-wallet positions into a single view.
#[must_use]
pub fn aggregate<'a>(positions: impl IntoIterator<Item = &'a Position>) -> AggregatePosition {
    let mut total = AggregatePosition::default();

    for pos in positions {
        total.amount_raw += pos.amount_raw;
        total.total_cost += pos.total_cost;
    }

    let held = wei_to_eth(total.amount_raw);
    if held > 0.0 {
        total.entry_price = total.total_cost / held;
    }

    total
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    const ONE: u128 = 1_000_000_000_000_000_000;

    fn pos() -> Position {
        Position::empty("e1".into(), Address::repeat_byte(0x01), 0)
    }

    #[test]
    fn buy_accumulates_cost_and_amount() {
        let mut p = pos();

        apply_buy(&mut p, U256::from(ONE), 2.0).unwrap();
        assert_eq!(p.amount_raw, U256::from(ONE));
        assert!((p.total_cost - 2.0).abs() < 1e-12);
        assert!((p.entry_price - 2.0).abs() < 1e-12);

        // Second buy at a different price moves the weighted average
        apply_buy(&mut p, U256::from(ONE), 4.0).unwrap();
        assert_eq!(p.amount_raw, U256::from(2 * ONE));
        assert!((p.total_cost - 6.0).abs() < 1e-12);
        assert!((p.entry_price - 3.0).abs() < 1e-12);
    }

    #[test]
    fn entry_is_cost_over_amount_after_buys() {
        let mut p = pos();
        for (qty, price) in [(ONE, 1.0), (ONE / 2, 3.0), (ONE / 4, 2.0)] {
            apply_buy(&mut p, U256::from(qty), price).unwrap();
        }
        let held = wei_to_eth(p.amount_raw);
        assert!((p.entry_price - p.total_cost / held).abs() < 1e-9);
    }

    #[test]
    fn partial_sell_reduces_cost_proportionally() {
        let mut p = pos();
        apply_buy(&mut p, U256::from(2 * ONE), 1.5).unwrap();

        // Sell half at 2.0
        let realized = apply_sell(&mut p, U256::from(ONE), 2.0).unwrap();

        // Realized P&L = q · (p − entry)
        assert!((realized - (2.0 - 1.5)).abs() < 1e-9);
        // Cost reduced by the sold fraction, entry unchanged
        assert!((p.total_cost - 1.5).abs() < 1e-9);
        assert!((p.entry_price - 1.5).abs() < 1e-9);
        assert_eq!(p.amount_raw, U256::from(ONE));
    }

    #[test]
    fn full_sell_zeroes_the_position() {
        let mut p = pos();
        apply_buy(&mut p, U256::from(ONE), 1.0).unwrap();

        let realized = apply_sell(&mut p, U256::from(ONE), 0.6).unwrap();
        assert!((realized - (-0.4)).abs() < 1e-9);

        assert!(p.amount_raw.is_zero());
        assert!(p.entry_price.abs() < f64::EPSILON);
        assert!(p.total_cost.abs() < f64::EPSILON);
    }

    #[test]
    fn sell_beyond_position_is_rejected() {
        let mut p = pos();
        apply_buy(&mut p, U256::from(ONE), 1.0).unwrap();

        let err = apply_sell(&mut p, U256::from(2 * ONE), 1.0).unwrap_err();
        assert!(matches!(err, KeeperError::SellExceedsPosition { .. }));
        // Position untouched on rejection
        assert_eq!(p.amount_raw, U256::from(ONE));
    }

    #[test]
    fn zero_price_is_rejected() {
        let mut p = pos();
        assert!(apply_buy(&mut p, U256::from(ONE), 0.0).is_err());
        assert!(apply_sell(&mut p, U256::ZERO, -1.0).is_err());
    }

    #[test]
    fn reconcile_clears_externally_sold() {
        let mut p = pos();
        apply_buy(&mut p, U256::from(ONE), 1.0).unwrap();

        let outcome = reconcile(&mut p, U256::ZERO, 2.0);
        assert_eq!(outcome, Reconciliation::ClearedExternal);
        assert!(!p.is_open());
        assert!(p.total_cost.abs() < f64::EPSILON);
    }

    #[test]
    fn reconcile_trusts_store_when_both_open() {
        let mut p = pos();
        apply_buy(&mut p, U256::from(2 * ONE), 1.0).unwrap();

        // Chain shows a different (smaller) amount; stored entry wins
        let outcome = reconcile(&mut p, U256::from(ONE), 5.0);
        assert_eq!(outcome, Reconciliation::Trusted);
        assert_eq!(p.amount_raw, U256::from(2 * ONE));
        assert!((p.entry_price - 1.0).abs() < 1e-12);
    }

    #[test]
    fn reconcile_reconstructs_unknown_holdings() {
        let mut p = pos();

        let outcome = reconcile(&mut p, U256::from(ONE), 2.5);
        assert_eq!(outcome, Reconciliation::Reconstructed);
        assert_eq!(p.amount_raw, U256::from(ONE));
        assert!((p.entry_price - 2.5).abs() < 1e-12);
        assert!((p.total_cost - 2.5).abs() < 1e-9);
    }

    #[test]
    fn aggregate_weights_entries_by_cost() {
        let mut a = pos();
        let mut b = Position::empty("e1".into(), Address::repeat_byte(0x01), 1);
        apply_buy(&mut a, U256::from(ONE), 1.0).unwrap();
        apply_buy(&mut b, U256::from(ONE), 3.0).unwrap();

        let total = aggregate([&a, &b]);
        assert_eq!(total.amount_raw, U256::from(2 * ONE));
        assert!((total.total_cost - 4.0).abs() < 1e-9);
        assert!((total.entry_price - 2.0).abs() < 1e-9);
    }

    #[test]
    fn unrealized_pnl_pct() {
        let mut p = pos();
        apply_buy(&mut p, U256::from(ONE), 1.0).unwrap();
        let total = aggregate([&p]);

        // Price 0.6 => -40%
        let pnl = total.unrealized_pnl_pct(0.6).unwrap();
        assert!((pnl - (-40.0)).abs() < 1e-9);

        // Price 1.6 => +60%
        let pnl = total.unrealized_pnl_pct(1.6).unwrap();
        assert!((pnl - 60.0).abs() < 1e-9);

        let empty = AggregatePosition::default();
        assert!(empty.unrealized_pnl_pct(1.0).is_none());
    }
}
