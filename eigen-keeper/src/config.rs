//! Startup configuration.
//!
//! Every knob maps onto an environment variable (clap's `env` attribute), so
//! the keeper deploys the same way under systemd, docker, or a shell. The
//! configuration is read once at startup and validated before anything
//! connects; validation failure is the only fatal path (exit code 1).

use std::time::Duration;

use ai_gate::{EvaluatorConfig, ProviderKind};
use clap::Parser;
use tracing::debug;

use crate::error::{ConfigError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// CLI / ENVIRONMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Eigen Keeper - autonomous market-making keeper for on-chain token pools
#[derive(Parser, Debug, Clone)]
#[command(name = "eigen-keeper")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Comma-separated RPC URLs, one per chain
    #[arg(long, env = "RPC_URLS", value_delimiter = ',')]
    pub rpc_urls: Vec<String>,

    /// Master secret: 0x-prefixed 64-hex-char private key
    #[arg(long, env = "KEEPER_PRIVATE_KEY", hide_env_values = true)]
    pub keeper_private_key: String,

    /// Path to the local SQLite store
    #[arg(long, env = "KEEPER_DB_PATH", default_value = "keeper.db")]
    pub db_path: String,

    /// Milliseconds between cycle starts
    #[arg(long, env = "POLL_INTERVAL", default_value_t = 15_000)]
    pub poll_interval: u64,

    /// Per-cycle worker count
    #[arg(long, env = "TRADE_CONCURRENCY", default_value_t = 5)]
    pub trade_concurrency: usize,

    /// Native-asset gas cap per cycle
    #[arg(long, env = "CYCLE_GAS_BUDGET", default_value_t = 0.05)]
    pub cycle_gas_budget: f64,

    /// Hourly spend alert threshold in percent
    #[arg(long, env = "SPEND_RATE_THRESHOLD_PCT", default_value_t = 30.0)]
    pub spend_rate_threshold_pct: f64,

    /// Keeper balance below this aborts the cycle with a critical alert
    #[arg(long, env = "MIN_KEEPER_GAS_BALANCE", default_value_t = 0.01)]
    pub min_keeper_gas_balance: f64,

    /// Keeper balance below this warns and triggers self-funding
    #[arg(long, env = "LOW_KEEPER_GAS_BALANCE", default_value_t = 0.05)]
    pub low_keeper_gas_balance: f64,

    /// Milliseconds between pool price snapshots
    #[arg(long, env = "PRICE_SNAPSHOT_INTERVAL", default_value_t = 300_000)]
    pub price_snapshot_interval: u64,

    /// Enable the AI pre-trade gate
    #[arg(long, env = "AI_EVALUATION_ENABLED", default_value_t = false)]
    pub ai_evaluation_enabled: bool,

    /// AI provider: openai | anthropic | ollama | compatible
    #[arg(long, env = "AI_PROVIDER", default_value = "ollama")]
    pub ai_provider: String,

    /// AI model identifier
    #[arg(long, env = "AI_MODEL", default_value = "llama3.2")]
    pub ai_model: String,

    /// AI provider API key
    #[arg(long, env = "AI_API_KEY", hide_env_values = true)]
    pub ai_api_key: Option<String>,

    /// Confidence threshold for full-size approval
    #[arg(long, env = "AI_CONFIDENCE_THRESHOLD", default_value_t = 70)]
    pub ai_confidence_threshold: u8,

    /// Per-evaluation timeout in milliseconds
    #[arg(long, env = "AI_TIMEOUT_MS", default_value_t = 2_000)]
    pub ai_timeout_ms: u64,

    /// AI provider base URL override
    #[arg(long, env = "AI_BASE_URL")]
    pub ai_base_url: Option<String>,

    /// Webhook receiving warn/critical alerts
    #[arg(long, env = "ALERT_WEBHOOK_URL")]
    pub alert_webhook_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "KEEPER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "KEEPER_JSON_LOGS")]
    pub json_logs: bool,

    /// Dry run mode (decisions logged, no transactions sent)
    #[arg(long, env = "KEEPER_DRY_RUN")]
    pub dry_run: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SETTINGS
// ═══════════════════════════════════════════════════════════════════════════════

/// Validated runtime settings derived from [`Args`].
#[derive(Debug, Clone)]
pub struct Settings {
    /// RPC endpoints, one per chain.
    pub rpc_urls: Vec<String>,

    /// Master secret (0x-prefixed hex). Never logged.
    pub keeper_private_key: String,

    /// SQLite store path.
    pub db_path: String,

    /// Cycle start interval.
    pub poll_interval: Duration,

    /// Per-cycle worker count.
    pub trade_concurrency: usize,

    /// Native-asset gas cap per cycle.
    pub cycle_gas_budget_eth: f64,

    /// Hourly spend alert threshold.
    pub spend_rate_threshold_pct: f64,

    /// Hard keeper-gas floor.
    pub min_keeper_gas_eth: f64,

    /// Soft keeper-gas floor.
    pub low_keeper_gas_eth: f64,

    /// Price snapshot cadence.
    pub price_snapshot_interval: Duration,

    /// AI gate configuration.
    pub evaluator: EvaluatorConfig,

    /// Alert webhook.
    pub alert_webhook_url: Option<String>,

    /// Dry run mode.
    pub dry_run: bool,
}

impl Settings {
    /// Build validated settings from parsed arguments.
    ///
    /// # Errors
    ///
    /// Returns an error when the master key is malformed, no RPC URL is
    /// configured, or numeric settings are out of range.
    pub fn from_args(args: &Args) -> Result<Self> {
        validate_keeper_key(&args.keeper_private_key)?;

        if args.rpc_urls.is_empty() {
            return Err(ConfigError::Missing("RPC_URLS").into());
        }
        if args.trade_concurrency == 0 {
            return Err(ConfigError::Validation("TRADE_CONCURRENCY must be > 0".into()).into());
        }
        if args.cycle_gas_budget <= 0.0 {
            return Err(ConfigError::Validation("CYCLE_GAS_BUDGET must be > 0".into()).into());
        }
        if args.min_keeper_gas_balance > args.low_keeper_gas_balance {
            return Err(ConfigError::Validation(
                "MIN_KEEPER_GAS_BALANCE must not exceed LOW_KEEPER_GAS_BALANCE".into(),
            )
            .into());
        }

        let provider = ProviderKind::parse(&args.ai_provider)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let evaluator = EvaluatorConfig {
            enabled: args.ai_evaluation_enabled,
            provider,
            model: args.ai_model.clone(),
            confidence_threshold: args.ai_confidence_threshold,
            timeout: Duration::from_millis(args.ai_timeout_ms),
            api_key: args.ai_api_key.clone(),
            base_url: args.ai_base_url.clone(),
        };

        debug!(
            chains = args.rpc_urls.len(),
            ai_enabled = args.ai_evaluation_enabled,
            "Settings validated"
        );

        Ok(Self {
            rpc_urls: args.rpc_urls.clone(),
            keeper_private_key: args.keeper_private_key.clone(),
            db_path: args.db_path.clone(),
            poll_interval: Duration::from_millis(args.poll_interval),
            trade_concurrency: args.trade_concurrency,
            cycle_gas_budget_eth: args.cycle_gas_budget,
            spend_rate_threshold_pct: args.spend_rate_threshold_pct,
            min_keeper_gas_eth: args.min_keeper_gas_balance,
            low_keeper_gas_eth: args.low_keeper_gas_balance,
            price_snapshot_interval: Duration::from_millis(args.price_snapshot_interval),
            evaluator,
            alert_webhook_url: args.alert_webhook_url.clone(),
            dry_run: args.dry_run,
        })
    }
}

/// Validate the master secret: 0x prefix plus exactly 64 hex characters.
fn validate_keeper_key(key: &str) -> Result<()> {
    if !key.starts_with("0x") {
        return Err(ConfigError::InvalidKeeperKey("missing 0x prefix".into()).into());
    }
    if key.len() != 66 {
        return Err(ConfigError::InvalidKeeperKey(format!(
            "expected 66 characters, got {}",
            key.len()
        ))
        .into());
    }
    if !key[2..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::InvalidKeeperKey("non-hex characters".into()).into());
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe512961708279feb1be6ae5538da033";

    fn args() -> Args {
        Args {
            rpc_urls: vec!["https://testnet-rpc.monad.xyz".into()],
            keeper_private_key: KEY.into(),
            db_path: "keeper.db".into(),
            poll_interval: 15_000,
            trade_concurrency: 5,
            cycle_gas_budget: 0.05,
            spend_rate_threshold_pct: 30.0,
            min_keeper_gas_balance: 0.01,
            low_keeper_gas_balance: 0.05,
            price_snapshot_interval: 300_000,
            ai_evaluation_enabled: false,
            ai_provider: "ollama".into(),
            ai_model: "llama3.2".into(),
            ai_api_key: None,
            ai_confidence_threshold: 70,
            ai_timeout_ms: 2_000,
            ai_base_url: None,
            alert_webhook_url: None,
            log_level: "info".into(),
            json_logs: false,
            dry_run: false,
        }
    }

    #[test]
    fn valid_args_produce_settings() {
        let settings = Settings::from_args(&args()).unwrap();
        assert_eq!(settings.poll_interval, Duration::from_millis(15_000));
        assert_eq!(settings.trade_concurrency, 5);
        assert_eq!(settings.evaluator.confidence_threshold, 70);
        assert!(!settings.evaluator.enabled);
    }

    #[test]
    fn malformed_keys_are_fatal() {
        let mut bad = args();
        bad.keeper_private_key = "deadbeef".into();
        assert!(Settings::from_args(&bad).is_err());

        let mut bad = args();
        bad.keeper_private_key = format!("0x{}", "g".repeat(64));
        assert!(Settings::from_args(&bad).is_err());

        let mut bad = args();
        bad.keeper_private_key = "0x1234".into();
        assert!(Settings::from_args(&bad).is_err());
    }

    #[test]
    fn missing_rpc_urls_is_fatal() {
        let mut bad = args();
        bad.rpc_urls.clear();
        assert!(Settings::from_args(&bad).is_err());
    }

    #[test]
    fn gas_floor_ordering_enforced() {
        let mut bad = args();
        bad.min_keeper_gas_balance = 0.1;
        bad.low_keeper_gas_balance = 0.05;
        assert!(Settings::from_args(&bad).is_err());
    }

    #[test]
    fn unknown_ai_provider_is_fatal() {
        let mut bad = args();
        bad.ai_provider = "skynet".into();
        assert!(Settings::from_args(&bad).is_err());
    }
}
