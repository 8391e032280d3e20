//! Per-cycle gas budget and rolling-hour spend tracking.
//!
//! Two small budget machines protect the keeper from runaway spending:
//!
//! - [`GasBudget`] caps native-asset gas spend within a single cycle; the
//!   scheduler sheds low-priority eigens when the budget is exhausted.
//! - [`SpendTracker`] watches per-eigen buy volume over a rolling hour and
//!   flags eigens burning through their vault too quickly.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// CYCLE GAS BUDGET
// ═══════════════════════════════════════════════════════════════════════════════

/// Native-asset gas cap for one scheduler cycle.
///
/// Seeded at cycle start; `can_afford` gates each eigen before processing
/// and `record_spend` accounts what was actually used.
#[derive(Debug, Clone, Copy)]
pub struct GasBudget {
    budget_eth: f64,
    spent_eth: f64,
}

impl GasBudget {
    /// Create a budget with the given cap in native units.
    #[must_use]
    pub const fn new(budget_eth: f64) -> Self {
        Self {
            budget_eth,
            spent_eth: 0.0,
        }
    }

    /// Whether `estimate_eth` more spend still fits the budget.
    #[must_use]
    pub fn can_afford(&self, estimate_eth: f64) -> bool {
        self.spent_eth + estimate_eth <= self.budget_eth
    }

    /// Record actual gas spend.
    pub fn record_spend(&mut self, used_eth: f64) {
        self.spent_eth += used_eth;
        debug!(
            spent = self.spent_eth,
            budget = self.budget_eth,
            "Cycle gas spend recorded"
        );
    }

    /// Total spent this cycle in native units.
    #[must_use]
    pub const fn spent_eth(&self) -> f64 {
        self.spent_eth
    }

    /// Configured cap in native units.
    #[must_use]
    pub const fn budget_eth(&self) -> f64 {
        self.budget_eth
    }

    /// Remaining budget, saturating at zero.
    #[must_use]
    pub fn remaining_eth(&self) -> f64 {
        (self.budget_eth - self.spent_eth).max(0.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SPEND TRACKER
// ═══════════════════════════════════════════════════════════════════════════════

/// One eigen's rolling-hour spend window.
#[derive(Debug, Clone)]
struct SpendWindow {
    total_spent_eth: f64,
    max_vault_eth: f64,
    window_start: DateTime<Utc>,
    alerted: bool,
}

/// Outcome of recording a buy against the spend tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpendStatus {
    /// Spend as a fraction of the largest vault balance seen this window,
    /// in percent.
    pub spent_pct: f64,

    /// Set exactly once per window when the threshold is first crossed.
    pub threshold_crossed: bool,
}

/// Per-eigen rolling-hour spend monitor.
///
/// On every buy the window accumulates the spend and tracks the largest
/// vault balance seen. Crossing `threshold_pct` raises
/// [`SpendStatus::threshold_crossed`] exactly once per window.
#[derive(Debug)]
pub struct SpendTracker {
    threshold_pct: f64,
    windows: HashMap<String, SpendWindow>,
}

impl SpendTracker {
    /// Window length; spend older than this no longer counts.
    const WINDOW: Duration = Duration::hours(1);

    /// Create a tracker with the given alert threshold in percent.
    #[must_use]
    pub fn new(threshold_pct: f64) -> Self {
        Self {
            threshold_pct,
            windows: HashMap::new(),
        }
    }

    /// Record a buy of `spent_eth` for `eigen_id` with the vault currently
    /// holding `vault_balance_eth`.
    pub fn record_buy(
        &mut self,
        eigen_id: &str,
        spent_eth: f64,
        vault_balance_eth: f64,
    ) -> SpendStatus {
        self.record_buy_at(eigen_id, spent_eth, vault_balance_eth, Utc::now())
    }

    /// Clock-injected variant of [`record_buy`](Self::record_buy) for tests.
    pub fn record_buy_at(
        &mut self,
        eigen_id: &str,
        spent_eth: f64,
        vault_balance_eth: f64,
        now: DateTime<Utc>,
    ) -> SpendStatus {
        let window = self
            .windows
            .entry(eigen_id.to_string())
            .or_insert_with(|| SpendWindow {
                total_spent_eth: 0.0,
                max_vault_eth: 0.0,
                window_start: now,
                alerted: false,
            });

        // Roll the window when the hour is up
        if now - window.window_start > Self::WINDOW {
            window.total_spent_eth = 0.0;
            window.max_vault_eth = 0.0;
            window.window_start = now;
            window.alerted = false;
        }

        window.total_spent_eth += spent_eth;
        window.max_vault_eth = window.max_vault_eth.max(vault_balance_eth);

        let spent_pct = if window.max_vault_eth > 0.0 {
            window.total_spent_eth / window.max_vault_eth * 100.0
        } else {
            0.0
        };

        let threshold_crossed = spent_pct >= self.threshold_pct && !window.alerted;
        if threshold_crossed {
            window.alerted = true;
            warn!(
                eigen = eigen_id,
                spent_pct,
                threshold = self.threshold_pct,
                "High hourly spend rate"
            );
        }

        SpendStatus {
            spent_pct,
            threshold_crossed,
        }
    }

    /// Current spend percentage for an eigen, if it has a window.
    #[must_use]
    pub fn spent_pct(&self, eigen_id: &str) -> Option<f64> {
        let window = self.windows.get(eigen_id)?;
        if window.max_vault_eth > 0.0 {
            Some(window.total_spent_eth / window.max_vault_eth * 100.0)
        } else {
            Some(0.0)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_budget_gates_and_records() {
        let mut budget = GasBudget::new(0.05);

        assert!(budget.can_afford(0.03));
        budget.record_spend(0.03);

        assert!(budget.can_afford(0.02));
        assert!(!budget.can_afford(0.021));

        budget.record_spend(0.02);
        assert!((budget.remaining_eth()).abs() < 1e-12);
        assert!(!budget.can_afford(0.001));
    }

    #[test]
    fn spend_tracker_alerts_once_per_window() {
        let mut tracker = SpendTracker::new(30.0);
        let now = Utc::now();

        // 10% of a 1.0 vault: under threshold
        let status = tracker.record_buy_at("e1", 0.1, 1.0, now);
        assert!(!status.threshold_crossed);
        assert!((status.spent_pct - 10.0).abs() < 1e-9);

        // +25% crosses the 30% threshold: exactly one alert
        let status = tracker.record_buy_at("e1", 0.25, 1.0, now);
        assert!(status.threshold_crossed);

        let status = tracker.record_buy_at("e1", 0.1, 1.0, now);
        assert!(!status.threshold_crossed);
        assert!(status.spent_pct > 30.0);
    }

    #[test]
    fn spend_tracker_rolls_the_window() {
        let mut tracker = SpendTracker::new(30.0);
        let start = Utc::now();

        let status = tracker.record_buy_at("e1", 0.5, 1.0, start);
        assert!(status.threshold_crossed);

        // An hour and a bit later the window resets and can alert again
        let later = start + Duration::minutes(61);
        let status = tracker.record_buy_at("e1", 0.5, 1.0, later);
        assert!(status.threshold_crossed);
        assert!((status.spent_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn spend_tracker_uses_max_vault_seen() {
        let mut tracker = SpendTracker::new(30.0);
        let now = Utc::now();

        // Vault shrank between buys; percentage uses the max seen (2.0)
        tracker.record_buy_at("e1", 0.2, 2.0, now);
        let status = tracker.record_buy_at("e1", 0.2, 1.0, now);
        assert!((status.spent_pct - 20.0).abs() < 1e-9);
    }

    #[test]
    fn eigens_are_tracked_independently() {
        let mut tracker = SpendTracker::new(30.0);
        let now = Utc::now();

        tracker.record_buy_at("e1", 0.9, 1.0, now);
        let status = tracker.record_buy_at("e2", 0.01, 1.0, now);
        assert!(!status.threshold_crossed);
        assert!(tracker.spent_pct("e1").unwrap() > 30.0);
    }
}
