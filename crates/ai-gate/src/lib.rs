//! LLM pre-trade evaluation gate for the eigen keeper.
//!
//! A pluggable, provider-agnostic gate that reviews each proposed trade
//! before execution. The gate can reject, approve, or resize - and it fails
//! open: if the provider is disabled, slow, unreachable, or answers garbage,
//! the rule-engine decision executes unchanged.
//!
//! # Quick Start
//!
//! ```ignore
//! use ai_gate::{Evaluator, EvaluatorConfig, ProviderKind};
//!
//! let evaluator = Evaluator::new(EvaluatorConfig {
//!     enabled: true,
//!     provider: ProviderKind::OpenAi,
//!     model: "gpt-4o-mini".into(),
//!     ..EvaluatorConfig::default()
//! });
//!
//! let evaluation = evaluator.evaluate(&decision, &eigen, &position, price, &context).await;
//! if !evaluation.approved {
//!     return Ok(()); // skip this trade
//! }
//! ```
//!
//! # Modules
//!
//! - [`provider`] - [`ChatClient`] over the vendor wire shapes
//! - [`evaluator`] - prompt construction, parsing, the confidence ladder
//! - [`error`] - error taxonomy (all paths resolve to fail-open)

// ═══════════════════════════════════════════════════════════════════════════════
// MODULES
// ═══════════════════════════════════════════════════════════════════════════════

pub mod error;
pub mod evaluator;
pub mod provider;

// ═══════════════════════════════════════════════════════════════════════════════
// RE-EXPORTS
// ═══════════════════════════════════════════════════════════════════════════════

pub use error::{AiGateError, Result};
pub use evaluator::{EvalContext, Evaluator, EvaluatorConfig};
pub use provider::{ChatClient, ChatResponse, ProviderKind};

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_disabled() {
        let config = EvaluatorConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.confidence_threshold, 70);

        let evaluator = Evaluator::new(config);
        assert!(!evaluator.is_active());
    }
}
