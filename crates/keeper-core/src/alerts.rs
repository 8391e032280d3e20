//! Structured alert types.
//!
//! Alerts are plain data here; the service binary owns emission (stdout line
//! plus best-effort webhook for warn/critical). Constructors cover the
//! keeper's alert vocabulary so call sites stay uniform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

// ═══════════════════════════════════════════════════════════════════════════════
// ALERT LEVEL
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Informational; stdout only.
    Info,
    /// Needs operator attention soon; forwarded to the webhook.
    Warning,
    /// Needs operator attention now; forwarded to the webhook.
    Critical,
}

impl AlertLevel {
    /// Stable lowercase form for the stdout line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Whether this level is forwarded to the webhook sink.
    #[must_use]
    pub const fn is_forwarded(self) -> bool {
        matches!(self, Self::Warning | Self::Critical)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ALERT
// ═══════════════════════════════════════════════════════════════════════════════

/// One structured alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Severity.
    pub level: AlertLevel,

    /// Machine-readable kind (e.g., "high_spend_rate").
    pub kind: String,

    /// Structured payload.
    pub payload: serde_json::Value,

    /// When the alert was raised.
    pub at: DateTime<Utc>,
}

impl Alert {
    /// Create an alert.
    #[must_use]
    pub fn new(level: AlertLevel, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            level,
            kind: kind.into(),
            payload,
            at: Utc::now(),
        }
    }

    /// Keeper gas below the hard minimum; the cycle aborts.
    #[must_use]
    pub fn keeper_gas_critical(balance_eth: f64, min_eth: f64) -> Self {
        Self::new(
            AlertLevel::Critical,
            "keeper_gas_critical",
            json!({ "balance_eth": balance_eth, "min_eth": min_eth }),
        )
    }

    /// Keeper gas below the warning threshold.
    #[must_use]
    pub fn keeper_gas_low(balance_eth: f64, low_eth: f64) -> Self {
        Self::new(
            AlertLevel::Warning,
            "keeper_gas_low",
            json!({ "balance_eth": balance_eth, "low_eth": low_eth }),
        )
    }

    /// An eigen crossed the sell-block threshold.
    #[must_use]
    pub fn sell_blocked(eigen_id: &str, failures: u32, last_error: &str) -> Self {
        Self::new(
            AlertLevel::Warning,
            "sell_blocked",
            json!({
                "eigen": eigen_id,
                "consecutive_failures": failures,
                "last_error": last_error,
            }),
        )
    }

    /// Third consecutive processing failure for an eigen.
    #[must_use]
    pub fn consecutive_failures(eigen_id: &str, failures: u32, error: &str) -> Self {
        let truncated: String = error.chars().take(200).collect();
        Self::new(
            AlertLevel::Warning,
            "consecutive_failures",
            json!({
                "eigen": eigen_id,
                "failures": failures,
                "error": truncated,
            }),
        )
    }

    /// An eigen is burning through its vault too quickly.
    #[must_use]
    pub fn high_spend_rate(eigen_id: &str, spent_pct: f64, threshold_pct: f64) -> Self {
        Self::new(
            AlertLevel::Critical,
            "high_spend_rate",
            json!({
                "eigen": eigen_id,
                "spent_pct": spent_pct,
                "threshold_pct": threshold_pct,
            }),
        )
    }

    /// Funds left stranded in a sub-wallet for later recovery.
    #[must_use]
    pub fn pending_recovery(eigen_id: &str, wallet: &str, amount_eth: f64, reason: &str) -> Self {
        Self::new(
            AlertLevel::Warning,
            "pending_recovery",
            json!({
                "eigen": eigen_id,
                "wallet": wallet,
                "amount_eth": amount_eth,
                "reason": reason,
            }),
        )
    }

    /// End-of-cycle summary.
    #[must_use]
    pub fn cycle_summary(
        processed: usize,
        failures: usize,
        duration_ms: u64,
        gas_spent_eth: f64,
        gas_budget_eth: f64,
    ) -> Self {
        Self::new(
            AlertLevel::Info,
            "cycle_summary",
            json!({
                "processed": processed,
                "failures": failures,
                "duration_ms": duration_ms,
                "gas_spent_eth": gas_spent_eth,
                "gas_budget_eth": gas_budget_eth,
            }),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_by_severity() {
        assert!(AlertLevel::Info < AlertLevel::Warning);
        assert!(AlertLevel::Warning < AlertLevel::Critical);
    }

    #[test]
    fn forwarding_rules() {
        assert!(!AlertLevel::Info.is_forwarded());
        assert!(AlertLevel::Warning.is_forwarded());
        assert!(AlertLevel::Critical.is_forwarded());
    }

    #[test]
    fn constructors_set_kind_and_level() {
        let alert = Alert::high_spend_rate("e1", 45.0, 30.0);
        assert_eq!(alert.kind, "high_spend_rate");
        assert_eq!(alert.level, AlertLevel::Critical);
        assert_eq!(alert.payload["eigen"], "e1");

        let alert = Alert::cycle_summary(10, 2, 1500, 0.01, 0.05);
        assert_eq!(alert.level, AlertLevel::Info);
        assert_eq!(alert.payload["failures"], 2);
    }

    #[test]
    fn consecutive_failure_error_truncated() {
        let long = "y".repeat(500);
        let alert = Alert::consecutive_failures("e1", 3, &long);
        assert_eq!(
            alert.payload["error"].as_str().unwrap().len(),
            200
        );
    }

    #[test]
    fn alerts_serialize_to_json() {
        let alert = Alert::keeper_gas_critical(0.001, 0.01);
        let text = serde_json::to_string(&alert).unwrap();
        assert!(text.contains("keeper_gas_critical"));
        assert!(text.contains("critical"));
    }
}
