//! Sell-failure tracking with cooldown blocking.
//!
//! Repeated sell failures usually mean something structural (no liquidity,
//! stuck approvals, a draining pool) that more attempts only make worse.
//! [`SellBlockTracker`] counts consecutive failures per eigen and blocks
//! sells for a cooldown once the threshold is reached.
//!
//! # States
//!
//! ```text
//! ┌──────────┐  3 consecutive   ┌──────────┐   5 min since    ┌──────────┐
//! │  Open    │ ────────────────▶│ Blocked  │ ────────────────▶│  Open    │
//! │ (normal) │     failures     │(no sells)│   last failure   │ (reset)  │
//! └──────────┘                  └──────────┘                  └──────────┘
//!       │                            │
//!       │ sell success               │ cooldown check resets the
//!       ▼                            ▼ counter on read
//! failure count = 0            failure count = 0
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-eigen failure state.
#[derive(Debug, Clone)]
pub struct SellFailureState {
    /// Consecutive failures since the last success.
    pub consecutive_failures: u32,

    /// When the last failure happened.
    pub last_failure_at: DateTime<Utc>,

    /// Last error string (truncated).
    pub last_error: String,
}

/// Outcome of recording a sell failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureStatus {
    /// Consecutive failures including this one.
    pub consecutive_failures: u32,

    /// Set exactly once, on the failure that crosses the block threshold.
    pub just_blocked: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Tracks consecutive sell failures per eigen and blocks sells after too
/// many, for a bounded cooldown.
#[derive(Debug, Default)]
pub struct SellBlockTracker {
    states: HashMap<String, SellFailureState>,
}

impl SellBlockTracker {
    /// Consecutive failures required to block.
    pub const BLOCK_THRESHOLD: u32 = 3;

    /// How long a block lasts after the most recent failure.
    pub const COOLDOWN: Duration = Duration::minutes(5);

    /// Maximum stored error length.
    const ERROR_TRUNCATE: usize = 300;

    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed sell.
    ///
    /// Returns the running count and whether this failure crossed the block
    /// threshold (the crossing emits a blocking alert exactly once).
    pub fn record_failure(&mut self, eigen_id: &str, error: &str) -> FailureStatus {
        self.record_failure_at(eigen_id, error, Utc::now())
    }

    /// Clock-injected variant of [`record_failure`](Self::record_failure).
    pub fn record_failure_at(
        &mut self,
        eigen_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> FailureStatus {
        let truncated: String = error.chars().take(Self::ERROR_TRUNCATE).collect();

        let state = self
            .states
            .entry(eigen_id.to_string())
            .or_insert_with(|| SellFailureState {
                consecutive_failures: 0,
                last_failure_at: now,
                last_error: String::new(),
            });

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure_at = now;
        state.last_error = truncated;

        let just_blocked = state.consecutive_failures == Self::BLOCK_THRESHOLD;
        if just_blocked {
            warn!(
                eigen = eigen_id,
                failures = state.consecutive_failures,
                error = %state.last_error,
                "Sell blocking engaged"
            );
        }

        FailureStatus {
            consecutive_failures: state.consecutive_failures,
            just_blocked,
        }
    }

    /// Record a successful sell, clearing the failure streak.
    pub fn record_success(&mut self, eigen_id: &str) {
        if let Some(state) = self.states.get_mut(eigen_id)
            && state.consecutive_failures > 0
        {
            info!(
                eigen = eigen_id,
                cleared = state.consecutive_failures,
                "Sell failure streak cleared"
            );
            state.consecutive_failures = 0;
        }
    }

    /// Whether sells are currently blocked for this eigen.
    ///
    /// An expired cooldown resets the counter on read, so the block lifts
    /// exactly once without a separate sweep.
    pub fn is_blocked(&mut self, eigen_id: &str) -> bool {
        self.is_blocked_at(eigen_id, Utc::now())
    }

    /// Clock-injected variant of [`is_blocked`](Self::is_blocked).
    pub fn is_blocked_at(&mut self, eigen_id: &str, now: DateTime<Utc>) -> bool {
        let Some(state) = self.states.get_mut(eigen_id) else {
            return false;
        };

        if state.consecutive_failures < Self::BLOCK_THRESHOLD {
            return false;
        }

        if now - state.last_failure_at >= Self::COOLDOWN {
            info!(eigen = eigen_id, "Sell block cooldown expired, resetting");
            state.consecutive_failures = 0;
            return false;
        }

        true
    }

    /// Current failure state for an eigen, if any failures were recorded.
    #[must_use]
    pub fn state(&self, eigen_id: &str) -> Option<&SellFailureState> {
        self.states.get(eigen_id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_three_failures() {
        let mut tracker = SellBlockTracker::new();
        let now = Utc::now();

        assert!(!tracker.record_failure_at("e1", "revert", now).just_blocked);
        assert!(!tracker.is_blocked_at("e1", now));

        assert!(!tracker.record_failure_at("e1", "revert", now).just_blocked);
        assert!(!tracker.is_blocked_at("e1", now));

        let status = tracker.record_failure_at("e1", "revert", now);
        assert!(status.just_blocked);
        assert_eq!(status.consecutive_failures, 3);
        assert!(tracker.is_blocked_at("e1", now));
    }

    #[test]
    fn crossing_alert_fires_once() {
        let mut tracker = SellBlockTracker::new();
        let now = Utc::now();

        for _ in 0..2 {
            tracker.record_failure_at("e1", "x", now);
        }
        assert!(tracker.record_failure_at("e1", "x", now).just_blocked);
        // Fourth failure does not re-raise the crossing flag
        assert!(!tracker.record_failure_at("e1", "x", now).just_blocked);
    }

    #[test]
    fn success_resets_the_streak() {
        let mut tracker = SellBlockTracker::new();
        let now = Utc::now();

        tracker.record_failure_at("e1", "x", now);
        tracker.record_failure_at("e1", "x", now);
        tracker.record_success("e1");

        let status = tracker.record_failure_at("e1", "x", now);
        assert_eq!(status.consecutive_failures, 1);
        assert!(!tracker.is_blocked_at("e1", now));
    }

    #[test]
    fn cooldown_expiry_resets_on_read() {
        let mut tracker = SellBlockTracker::new();
        let now = Utc::now();

        for _ in 0..3 {
            tracker.record_failure_at("e1", "x", now);
        }
        assert!(tracker.is_blocked_at("e1", now));

        // Within the cooldown: still blocked
        let later = now + Duration::minutes(4);
        assert!(tracker.is_blocked_at("e1", later));

        // After the cooldown: unblocked and counter reset
        let after = now + Duration::minutes(5);
        assert!(!tracker.is_blocked_at("e1", after));
        assert_eq!(tracker.state("e1").unwrap().consecutive_failures, 0);
    }

    #[test]
    fn eigens_fail_independently() {
        let mut tracker = SellBlockTracker::new();
        let now = Utc::now();

        for _ in 0..3 {
            tracker.record_failure_at("e1", "x", now);
        }
        tracker.record_failure_at("e2", "x", now);

        assert!(tracker.is_blocked_at("e1", now));
        assert!(!tracker.is_blocked_at("e2", now));
    }

    #[test]
    fn error_strings_are_truncated() {
        let mut tracker = SellBlockTracker::new();
        let long = "x".repeat(1000);

        tracker.record_failure_at("e1", &long, Utc::now());
        assert_eq!(tracker.state("e1").unwrap().last_error.len(), 300);
    }
}
