//! Pre-trade evaluation with fail-open semantics.
//!
//! The evaluator sits between the decision engine and the executors. It can
//! reject a trade, approve it, or approve with a resize - but it can never
//! stall the keeper: disabled gate, timeout, transport failure, and parse
//! failure all return a fail-open evaluation that lets the rule-engine
//! decision through unchanged.
//!
//! # Confidence Ladder
//!
//! | Model confidence | Outcome |
//! |------------------|---------|
//! | < 50 | reject |
//! | < threshold (default 70) | approve, halve the trade size |
//! | >= threshold | approve as-is, or with the model's suggested resize |

use std::time::{Duration, Instant};

use chrono::Utc;
use keeper_core::decision::{Action, Decision};
use keeper_core::ledger::AggregatePosition;
use keeper_core::math::wei_to_eth;
use keeper_core::types::{EigenConfig, TradeEvaluation, TradeRecord};
use tracing::{debug, instrument, warn};

use crate::error::{AiGateError, Result};
use crate::provider::{ChatClient, ProviderKind};

/// Completion budget for one evaluation.
const MAX_TOKENS: u32 = 256;

/// Sampling temperature; evaluations should be conservative.
const TEMPERATURE: f64 = 0.2;

/// Maximum stored reason length.
const REASON_TRUNCATE: usize = 200;

/// Confidence below which a trade is rejected outright.
const REJECT_BELOW: u8 = 50;

/// Confidence reported by fail-open evaluations.
const FAIL_OPEN_CONFIDENCE: u8 = 75;

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Evaluator configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Master switch; disabled means every trade passes fail-open.
    pub enabled: bool,

    /// Which provider to call.
    pub provider: ProviderKind,

    /// Model identifier.
    pub model: String,

    /// Confidence threshold for full-size approval.
    pub confidence_threshold: u8,

    /// Per-call timeout.
    pub timeout: Duration,

    /// API key, when the provider needs one.
    pub api_key: Option<String>,

    /// Base URL override (required for `Compatible`).
    pub base_url: Option<String>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: ProviderKind::Ollama,
            model: "llama3.2".into(),
            confidence_threshold: 70,
            timeout: Duration::from_millis(2_000),
            api_key: None,
            base_url: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Market context assembled by the scheduler for one evaluation.
#[derive(Debug, Default)]
pub struct EvalContext<'a> {
    /// Native balance available to the eigen, in native units.
    pub native_balance_eth: f64,

    /// Recent price history, oldest first.
    pub recent_prices: &'a [f64],

    /// Recent trades, newest first.
    pub recent_trades: &'a [TradeRecord],

    /// External buy volume seen this cycle, in native units.
    pub external_buy_volume_eth: f64,

    /// Annualized volatility of the snapshot window.
    pub volatility: f64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVALUATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// The AI gate.
#[derive(Debug)]
pub struct Evaluator {
    config: EvaluatorConfig,
    client: Option<ChatClient>,
}

impl Evaluator {
    /// Build an evaluator from configuration.
    ///
    /// A disabled gate, or one whose client cannot be constructed, still
    /// yields a working evaluator - it just answers fail-open.
    #[must_use]
    pub fn new(config: EvaluatorConfig) -> Self {
        let client = if config.enabled {
            match ChatClient::new(
                config.provider,
                config.model.clone(),
                config.api_key.clone(),
                config.base_url.clone(),
            ) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!(error = %e, "AI gate client unavailable, failing open");
                    None
                }
            }
        } else {
            None
        };

        Self { config, client }
    }

    /// Whether the gate will actually call a provider.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.client.is_some()
    }

    /// Evaluate a proposed trade. Never errors: every failure path returns a
    /// fail-open evaluation.
    #[instrument(skip_all, fields(eigen = %eigen.id, action = decision.action.tag()))]
    pub async fn evaluate(
        &self,
        decision: &Decision,
        eigen: &EigenConfig,
        position: &AggregatePosition,
        price: f64,
        context: &EvalContext<'_>,
    ) -> TradeEvaluation {
        let proposed = Self::describe_action(&decision.action);

        let Some(client) = &self.client else {
            return self.fail_open(eigen, &proposed, "ai_unavailable");
        };

        let system = Self::system_prompt(eigen);
        let user = Self::user_prompt(decision, eigen, position, price, context);

        let started = Instant::now();
        let result = client
            .chat(&system, &user, MAX_TOKENS, TEMPERATURE, self.config.timeout)
            .await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(response) => {
                match self.interpret(&response.text, &decision.action) {
                    Ok(mut evaluation) => {
                        evaluation.eigen_id = eigen.id.clone();
                        evaluation.proposed_action = proposed;
                        evaluation.model = self.config.model.clone();
                        evaluation.latency_ms = latency_ms;
                        evaluation.tokens_used = response.total_tokens();
                        evaluation
                    }
                    Err(e) => {
                        warn!(error = %e, "Unparseable evaluation, failing open");
                        self.fail_open(eigen, &proposed, "ai_parse_error")
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "AI gate call failed, failing open");
                self.fail_open(eigen, &proposed, "ai_error")
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Prompt construction
    // ─────────────────────────────────────────────────────────────────────────

    fn system_prompt(eigen: &EigenConfig) -> String {
        let mut prompt = String::from(
            "You are a risk reviewer for an automated market-making keeper. \
             Review the proposed trade against the market context and answer \
             with a single JSON object: {\"approved\": bool, \"confidence\": \
             0-100, \"reason\": string, \"adjusted_amount\": number|null, \
             \"suggested_wait_secs\": number|null}. Be conservative with \
             oversized orders and thin balances.",
        );

        if let Some(custom) = &eigen.custom_prompt {
            prompt.push_str("\n\nOperator strategy notes: ");
            prompt.push_str(custom);
        }

        prompt
    }

    fn user_prompt(
        decision: &Decision,
        eigen: &EigenConfig,
        position: &AggregatePosition,
        price: f64,
        context: &EvalContext<'_>,
    ) -> String {
        use std::fmt::Write as _;

        let mut prompt = String::with_capacity(1024);
        let _ = writeln!(
            prompt,
            "Proposed action: {} ({})",
            Self::describe_action(&decision.action),
            decision.reason
        );
        let _ = writeln!(
            prompt,
            "Balances: {:.6} native, {:.6} tokens (ratio to total value below)",
            context.native_balance_eth,
            wei_to_eth(position.amount_raw)
        );
        let token_value = wei_to_eth(position.amount_raw) * price;
        let total = token_value + context.native_balance_eth;
        if total > 0.0 {
            let _ = writeln!(prompt, "Token value ratio: {:.3}", token_value / total);
        }
        let _ = writeln!(
            prompt,
            "Entry price: {:.8}, current price: {:.8}",
            position.entry_price, price
        );
        if let Some(pnl) = position.unrealized_pnl_pct(price) {
            let _ = writeln!(prompt, "Unrealized P&L: {pnl:.2}%");
        }
        let _ = writeln!(prompt, "Annualized volatility: {:.3}", context.volatility);
        if context.external_buy_volume_eth > 0.0 {
            let _ = writeln!(
                prompt,
                "External buy volume this window: {:.6} native",
                context.external_buy_volume_eth
            );
        }

        if !context.recent_prices.is_empty() {
            let series: Vec<String> = context
                .recent_prices
                .iter()
                .map(|p| format!("{p:.8}"))
                .collect();
            let _ = writeln!(prompt, "Recent prices (oldest first): {}", series.join(", "));
        }

        if !context.recent_trades.is_empty() {
            let _ = writeln!(prompt, "Recent trades (newest first):");
            for trade in context.recent_trades.iter().take(5) {
                let _ = writeln!(
                    prompt,
                    "  {} {:.6} tokens at {:.8} (pnl {:.6})",
                    trade.kind.as_str(),
                    wei_to_eth(trade.token_amount),
                    trade.execution_price,
                    trade.realized_pnl
                );
            }
        }

        let _ = writeln!(
            prompt,
            "Eigen limits: stop-loss {:.0}%, profit target {:.0}%, slippage {} bps",
            eigen.stop_loss_pct, eigen.profit_target_pct, eigen.slippage_bps
        );

        prompt
    }

    fn describe_action(action: &Action) -> String {
        match action {
            Action::Buy { quote_amount } => {
                format!("buy with {:.6} native", wei_to_eth(*quote_amount))
            }
            Action::Sell { token_amount, .. } => {
                format!("{} {:.6} tokens", action.tag(), wei_to_eth(*token_amount))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Response interpretation
    // ─────────────────────────────────────────────────────────────────────────

    fn interpret(&self, completion: &str, action: &Action) -> Result<TradeEvaluation> {
        let raw = first_json_object(completion).ok_or(AiGateError::NoJsonInCompletion)?;
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| AiGateError::MalformedResponse(e.to_string()))?;

        let approved = coerce_bool(value.get("approved")).unwrap_or(false);
        let confidence = coerce_confidence(value.get("confidence"));
        let reason: String = value
            .get("reason")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .chars()
            .take(REASON_TRUNCATE)
            .collect();
        let adjusted_amount = value.get("adjusted_amount").and_then(serde_json::Value::as_f64);
        let suggested_wait_secs = value
            .get("suggested_wait_secs")
            .and_then(serde_json::Value::as_u64);

        let proposed_size = match action {
            Action::Buy { quote_amount } => wei_to_eth(*quote_amount),
            Action::Sell { token_amount, .. } => wei_to_eth(*token_amount),
        };

        // Confidence ladder
        let (approved, reason, adjusted_amount) = if confidence < REJECT_BELOW {
            (
                false,
                format!("low_confidence ({confidence}): {reason}"),
                None,
            )
        } else if confidence < self.config.confidence_threshold {
            // Approve at half size; the model's own resize is ignored below
            // the threshold.
            debug!(confidence, "Below threshold, halving trade size");
            (true, reason, Some(proposed_size / 2.0))
        } else {
            (approved, reason, adjusted_amount)
        };

        Ok(TradeEvaluation {
            eigen_id: String::new(),
            proposed_action: String::new(),
            approved,
            confidence,
            reason,
            adjusted_amount,
            suggested_wait_secs,
            model: String::new(),
            latency_ms: 0,
            tokens_used: 0,
            created_at: Utc::now(),
        })
    }

    fn fail_open(&self, eigen: &EigenConfig, proposed: &str, reason: &str) -> TradeEvaluation {
        TradeEvaluation {
            eigen_id: eigen.id.clone(),
            proposed_action: proposed.to_string(),
            approved: true,
            confidence: FAIL_OPEN_CONFIDENCE,
            reason: reason.to_string(),
            adjusted_amount: None,
            suggested_wait_secs: None,
            model: self.config.model.clone(),
            latency_ms: 0,
            tokens_used: 0,
            created_at: Utc::now(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSING HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Slice out the first balanced JSON object in a completion.
///
/// Models wrap answers in prose and code fences; brace balancing (with
/// string awareness) is more robust than trimming.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn coerce_bool(value: Option<&serde_json::Value>) -> Option<bool> {
    match value? {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn coerce_confidence(value: Option<&serde_json::Value>) -> u8 {
    let raw = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    raw.clamp(0.0, 100.0).round() as u8
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
