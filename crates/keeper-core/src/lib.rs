//! Domain logic for the eigen keeper.
//!
//! This crate provides the IO-free building blocks the keeper service runs:
//! decision-making, position accounting, and the failure/budget machines.
//! The scheduler in the `eigen-keeper` binary wires these to the chain
//! gateway, the store, and the AI gate.
//!
//! # Crate Relationships
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Service Layer                                               │
//! │  └─ eigen-keeper (scheduler, executors, wallets)             │
//! └──────────────────────────────────┬───────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Domain Layer (keeper-core) ◄── YOU ARE HERE                 │
//! │  └─ DecisionEngine: phase-aware priority ladder              │
//! │  └─ ledger: weighted-average entries, realized P&L           │
//! │  └─ GasBudget / SpendTracker: per-cycle and hourly budgets   │
//! │  └─ SellBlockTracker: failure streaks with cooldown          │
//! │  └─ Alert: structured alert vocabulary                       │
//! └──────────────────────────────────┬───────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Chain Access Layer (chain-gateway)                          │
//! │  └─ ChainProvider: unified interface to any EVM chain        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! ## Eigens
//!
//! An eigen is one autonomous trading agent bound to one token on one chain.
//! [`EigenConfig`](types::EigenConfig) carries its knobs; positions and
//! trades are tracked per sub-wallet.
//!
//! ## Decisions
//!
//! [`DecisionEngine`](decision::DecisionEngine) walks a strict priority
//! ladder (stop-loss, profit-take, reactive, deployment, timing gate, ratio
//! market-making) and returns at most one [`Action`](decision::Action).
//!
//! ## Safety
//!
//! [`SellBlockTracker`](sellblock::SellBlockTracker) cools down eigens whose
//! sells keep failing; [`GasBudget`](budget::GasBudget) sheds work when a
//! cycle runs out of gas; [`SpendTracker`](budget::SpendTracker) flags
//! runaway hourly spending.

// ═══════════════════════════════════════════════════════════════════════════════
// MODULES
// ═══════════════════════════════════════════════════════════════════════════════

pub mod alerts;
pub mod budget;
pub mod decision;
pub mod error;
pub mod ledger;
pub mod math;
pub mod sellblock;
pub mod types;

// ═══════════════════════════════════════════════════════════════════════════════
// RE-EXPORTS
// ═══════════════════════════════════════════════════════════════════════════════

pub use alerts::{Alert, AlertLevel};
pub use budget::{GasBudget, SpendTracker};
pub use decision::{Action, Decision, DecisionEngine, DecisionInputs, SellVariant};
pub use error::{KeeperError, Result};
pub use ledger::AggregatePosition;
pub use sellblock::SellBlockTracker;
pub use types::{
    EigenConfig, EigenStatus, ExternalBuySignal, PoolSpec, PoolVersion, Position, PriceSnapshot,
    TradeEvaluation, TradeKind, TradeRecord, WalletSource,
};

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexports_compile() {
        let _engine = DecisionEngine::with_seed(1);
        let _budget = GasBudget::new(0.05);
        let _tracker = SellBlockTracker::new();
        let _spend = SpendTracker::new(30.0);
    }
}
