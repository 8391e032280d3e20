//! Safe integer math and statistics for trade sizing.
//!
//! This module provides basis-point arithmetic to avoid precision loss when
//! calculating percentages of token amounts, conversions between wei and
//! decimal native units, and the volatility estimator used by the AI context.
//!
//! # Basis Points
//!
//! Basis points (bps) represent percentages in hundredths of a percent:
//! - 10000 bps = 100%
//! - 5000 bps = 50%
//! - 100 bps = 1%
//!
//! # Why Not Floating Point For Sizing?
//!
//! With 18-decimal tokens, `u128` can represent values up to ~340 undecillion.
//! When cast to `f64` (53-bit mantissa), values above ~9 quadrillion lose
//! precision. Order sizing therefore stays in U256 basis-point arithmetic;
//! `f64` appears only for ratios, prices, and P&L in native units.

use alloy::primitives::U256;

/// Basis points representing 100%.
pub const BPS_100_PERCENT: u64 = 10_000;

/// Wei per native unit (18 decimals).
pub const WEI_PER_ETH: f64 = 1e18;

/// Five-minute sampling periods per year, used to annualize volatility.
pub const PERIODS_PER_YEAR: f64 = 105_120.0;

/// Calculate percentage of an amount using basis points.
///
/// Uses integer arithmetic: `(amount * bps) / 10000`. Safe for any U256
/// value; multiplies first to maintain precision.
///
/// # Example
///
/// ```
/// use keeper_core::math::percentage_of;
/// use alloy::primitives::U256;
///
/// let balance = U256::from(1_000_000_000_000_000_000_u128); // 1 token
/// let half = percentage_of(balance, 5000); // 50%
/// assert_eq!(half, U256::from(500_000_000_000_000_000_u128));
/// ```
#[must_use]
pub fn percentage_of(amount: U256, bps: u64) -> U256 {
    if bps == 0 {
        return U256::ZERO;
    }
    amount * U256::from(bps) / U256::from(BPS_100_PERCENT)
}

/// Convert a whole-number percentage (e.g., `12.5`) to basis points.
///
/// Values are clamped to [0, 10000].
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn percent_to_bps(pct: f64) -> u64 {
    let clamped = pct.clamp(0.0, 100.0);
    (clamped * 100.0).round() as u64
}

/// Convert a wei amount to decimal native units.
///
/// Precision loss above ~9M tokens is acceptable here: the result feeds
/// ratios and logging, never order sizing.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn wei_to_eth(wei: U256) -> f64 {
    // Saturate absurd balances rather than wrapping
    let limbs = wei.as_limbs();
    if limbs[2] != 0 || limbs[3] != 0 {
        return f64::MAX;
    }
    let low = u128::from(limbs[0]) | (u128::from(limbs[1]) << 64);
    low as f64 / WEI_PER_ETH
}

/// Convert decimal native units to wei.
///
/// Negative and non-finite inputs map to zero.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn eth_to_wei(eth: f64) -> U256 {
    if !eth.is_finite() || eth <= 0.0 {
        return U256::ZERO;
    }
    U256::from((eth * WEI_PER_ETH) as u128)
}

/// Annualized volatility from a price series.
///
/// Computes the standard deviation of log returns and scales by
/// `sqrt(PERIODS_PER_YEAR)` (five-minute sampling). Fewer than 3 prices, or
/// any non-positive price, contribute nothing.
///
/// # Example
///
/// ```
/// use keeper_core::math::annualized_volatility;
///
/// let flat = vec![1.0, 1.0, 1.0, 1.0];
/// assert!(annualized_volatility(&flat).abs() < f64::EPSILON);
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn annualized_volatility(prices: &[f64]) -> f64 {
    if prices.len() < 3 {
        return 0.0;
    }

    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();

    if returns.len() < 2 {
        return 0.0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);

    variance.sqrt() * PERIODS_PER_YEAR.sqrt()
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_of_basic() {
        let amount = U256::from(1_000_000_000_000_000_000_u128);

        assert_eq!(
            percentage_of(amount, 5000),
            U256::from(500_000_000_000_000_000_u128)
        );
        assert_eq!(
            percentage_of(amount, 1000),
            U256::from(100_000_000_000_000_000_u128)
        );
        assert_eq!(percentage_of(amount, 10000), amount);
        assert_eq!(percentage_of(amount, 0), U256::ZERO);
    }

    #[test]
    fn percentage_of_large_amounts() {
        // 10 million tokens - where f64 would start losing precision
        let large = U256::from(10_000_000_u128) * U256::from(10u128.pow(18));

        let half = percentage_of(large, 5000);
        let expected = U256::from(5_000_000_u128) * U256::from(10u128.pow(18));
        assert_eq!(half, expected);
    }

    #[test]
    fn percent_to_bps_conversion() {
        assert_eq!(percent_to_bps(0.0), 0);
        assert_eq!(percent_to_bps(8.0), 800);
        assert_eq!(percent_to_bps(12.5), 1250);
        assert_eq!(percent_to_bps(100.0), 10000);

        // Clamping
        assert_eq!(percent_to_bps(-5.0), 0);
        assert_eq!(percent_to_bps(150.0), 10000);
    }

    #[test]
    fn wei_eth_round_trip() {
        let one_eth = U256::from(1_000_000_000_000_000_000_u128);
        assert!((wei_to_eth(one_eth) - 1.0).abs() < f64::EPSILON);
        assert_eq!(eth_to_wei(1.0), one_eth);

        assert_eq!(eth_to_wei(-1.0), U256::ZERO);
        assert_eq!(eth_to_wei(f64::NAN), U256::ZERO);
        assert!((wei_to_eth(U256::ZERO)).abs() < f64::EPSILON);
    }

    #[test]
    fn volatility_needs_three_points() {
        assert!(annualized_volatility(&[]).abs() < f64::EPSILON);
        assert!(annualized_volatility(&[1.0]).abs() < f64::EPSILON);
        assert!(annualized_volatility(&[1.0, 1.1]).abs() < f64::EPSILON);
    }

    #[test]
    fn volatility_flat_series_is_zero() {
        let flat = vec![2.5; 10];
        assert!(annualized_volatility(&flat).abs() < f64::EPSILON);
    }

    #[test]
    fn volatility_increases_with_swings() {
        let calm = vec![1.0, 1.01, 1.0, 1.01, 1.0];
        let wild = vec![1.0, 1.5, 0.8, 1.4, 0.7];

        assert!(annualized_volatility(&wild) > annualized_volatility(&calm));
    }

    #[test]
    fn volatility_ignores_non_positive_prices() {
        let with_zero = vec![1.0, 0.0, 1.0, 1.0];
        // Only the final window survives, under the 2-return minimum
        assert!(annualized_volatility(&with_zero).abs() < f64::EPSILON);
    }
}
