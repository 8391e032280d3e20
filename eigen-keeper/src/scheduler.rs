//! The trade scheduler: one cooperative loop, one cycle at a time.
//!
//! Per cycle:
//!
//! 1. Snapshot active configs and enrich them with on-chain state
//! 2. Self-healing first: liquidation continuation, stranded-asset
//!    recovery, emergency keeper sweeps
//! 3. Keeper gas gate (critical aborts the cycle, low warns)
//! 4. Sequential vault refills (master-wallet nonce stays monotonic)
//! 5. Priority sort: deploying > trading > idle, larger balance first
//! 6. Nonce cache reset
//! 7. Bounded-parallel per-eigen processing (settle-all)
//! 8. Cycle summary alert
//!
//! Cycle-level errors convert to an inter-cycle sleep; per-eigen errors
//! convert to failure bookkeeping. Nothing in here panics the process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use alloy::primitives::{Bytes, U256};
use alloy::sol_types::SolCall;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use ai_gate::Evaluator;
use chain_gateway::{ChainProvider, EvmProvider, NonceManager, ProviderPool, TransactionRequest};
use keeper_core::alerts::Alert;
use keeper_core::decision::{DecisionEngine, MIN_DEPLOY_BALANCE_ETH};
use keeper_core::math::{eth_to_wei, wei_to_eth};
use keeper_core::types::EigenConfig;
use keeper_core::{GasBudget, SellBlockTracker, SpendTracker};
use keeper_store::Store;

use crate::alerts::AlertSink;
use crate::config::Settings;
use crate::contracts::{ChainAddresses, IVault, V3SwapEncoder};
use crate::error::{Result, ServiceError};
use crate::execution::Executor;
use crate::oracle::PriceOracle;
use crate::process::{EigenContext, process_eigen};
use crate::reactive::ReactiveDetector;
use crate::recovery::Recovery;
use crate::wallets::WalletManager;

/// Vault balances below this trigger a refill attempt.
const VAULT_REFILL_FLOOR_ETH: f64 = 0.02;

/// Cap per refill transfer.
const VAULT_REFILL_CAP_ETH: f64 = 0.1;

/// Consecutive processing failures before the alert fires.
const FAILURE_ALERT_THRESHOLD: u32 = 3;

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN HANDLES
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything the scheduler holds per chain.
struct ChainHandles {
    provider: Arc<EvmProvider>,
    nonces: Arc<NonceManager<EvmProvider>>,
    executor: Arc<Executor<EvmProvider>>,
    oracle: Arc<PriceOracle<EvmProvider>>,
    detector: Arc<ReactiveDetector<EvmProvider>>,
    recovery: Arc<Recovery<EvmProvider>>,
}

/// One eigen enriched with the state the sorter needs.
#[derive(Debug)]
struct EigenState {
    config: EigenConfig,
    native_eth: f64,
    has_open_position: bool,
    traded_recently: bool,
}

impl EigenState {
    /// Priority tier: deploying (0) > actively trading (1) > idle (2).
    fn tier(&self) -> u8 {
        if !self.has_open_position && self.native_eth > MIN_DEPLOY_BALANCE_ETH {
            0
        } else if self.traded_recently {
            1
        } else {
            2
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEEPER SERVICE
// ═══════════════════════════════════════════════════════════════════════════════

/// The keeper's main orchestrator.
pub struct KeeperService {
    settings: Settings,
    store: Store,
    wallets: Arc<WalletManager>,
    chains: HashMap<u64, ChainHandles>,
    evaluator: Arc<Evaluator>,
    engine: Arc<Mutex<DecisionEngine>>,
    sell_block: Arc<Mutex<SellBlockTracker>>,
    spend: Arc<Mutex<SpendTracker>>,
    alerts: AlertSink,
    failure_streaks: HashMap<String, u32>,
}

impl std::fmt::Debug for KeeperService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeeperService")
            .field("chains", &self.chains.keys().collect::<Vec<_>>())
            .field("dry_run", &self.settings.dry_run)
            .finish_non_exhaustive()
    }
}

impl KeeperService {
    /// Connect providers and assemble the service.
    ///
    /// # Errors
    ///
    /// Returns an error when a chain connection or the wallet manager fails.
    pub async fn new(settings: Settings, store: Store) -> Result<Self> {
        let wallets = Arc::new(WalletManager::new(&settings.keeper_private_key, store.clone())?);
        let alerts = AlertSink::new(settings.alert_webhook_url.clone());

        let mut pool = ProviderPool::new();
        let mut chains = HashMap::new();
        for rpc_url in &settings.rpc_urls {
            let chain_id = pool.connect(rpc_url).await?;
            let provider = pool.get(chain_id)?;
            let addresses = ChainAddresses::for_chain(chain_id);

            let nonces = Arc::new(NonceManager::new(Arc::clone(&provider)));
            let encoder = Arc::new(V3SwapEncoder {
                router: addresses.router,
                wrapped_native: addresses.wrapped_native,
            });

            let executor = Arc::new(
                Executor::new(
                    Arc::clone(&provider),
                    Arc::clone(&nonces),
                    chain_id,
                    addresses.clone(),
                    encoder,
                    store.clone(),
                    Arc::clone(&wallets),
                    alerts.clone(),
                    settings.dry_run,
                )
                .with_keeper_gas_floors(settings.min_keeper_gas_eth, settings.low_keeper_gas_eth),
            );

            let oracle = Arc::new(PriceOracle::new(
                Arc::clone(&provider),
                addresses.wrapped_native,
            ));
            let detector = Arc::new(ReactiveDetector::new(Arc::clone(&provider)));
            let recovery = Arc::new(Recovery::new(
                Arc::clone(&executor),
                Arc::clone(&wallets),
                store.clone(),
                alerts.clone(),
            ));

            info!(chain_id, rpc_url, "Chain wired");
            chains.insert(
                chain_id,
                ChainHandles {
                    provider,
                    nonces,
                    executor,
                    oracle,
                    detector,
                    recovery,
                },
            );
        }

        let evaluator = Arc::new(Evaluator::new(settings.evaluator.clone()));
        let spend = Arc::new(Mutex::new(SpendTracker::new(
            settings.spend_rate_threshold_pct,
        )));

        info!(
            chains = chains.len(),
            ai_active = evaluator.is_active(),
            dry_run = settings.dry_run,
            "Keeper service initialized"
        );

        Ok(Self {
            settings,
            store,
            wallets,
            chains,
            evaluator,
            engine: Arc::new(Mutex::new(DecisionEngine::new())),
            sell_block: Arc::new(Mutex::new(SellBlockTracker::new())),
            spend,
            alerts,
            failure_streaks: HashMap::new(),
        })
    }

    /// Run cycles until cancelled.
    ///
    /// # Errors
    ///
    /// Only unrecoverable startup-adjacent failures propagate; cycle errors
    /// are logged and the next tick proceeds.
    pub async fn run(mut self) -> Result<()> {
        let snapshot_job = self.spawn_snapshot_job();

        let mut tick = tokio::time::interval(self.settings.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            poll_ms = self.settings.poll_interval.as_millis() as u64,
            "Starting trade scheduler"
        );

        loop {
            tick.tick().await;

            if let Err(e) = self.cycle().await {
                // Cycle-level errors convert to the inter-cycle sleep
                error!(error = %e, "Cycle failed");
            }

            if snapshot_job.is_finished() {
                warn!("Price snapshot job stopped unexpectedly");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // One cycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one full cycle over all active eigens.
    #[instrument(skip(self))]
    pub async fn cycle(&mut self) -> Result<()> {
        let started = Instant::now();
        let actives = self.store.active_eigens().await?;

        // Self-healing before any gas gating: a broke keeper refuels here
        self.recovery_phase(&actives).await;

        // Keeper gas gate
        if !self.keeper_gas_gate().await? {
            return Ok(());
        }

        // Vault refills, sequential: master-wallet nonces stay monotonic
        self.refill_vaults(&actives).await;

        // Enrich and sort
        let mut states = self.assemble_states(actives).await;
        states.sort_by(|a, b| {
            a.tier()
                .cmp(&b.tier())
                .then(b.native_eth.total_cmp(&a.native_eth))
        });

        // Fresh nonce state for the cycle
        for handles in self.chains.values() {
            handles.nonces.reset_all().await;
        }

        // Bounded-parallel per-eigen processing, settle-all
        let gas_budget = Arc::new(Mutex::new(GasBudget::new(self.settings.cycle_gas_budget_eth)));
        let semaphore = Arc::new(Semaphore::new(self.settings.trade_concurrency));
        let mut join_set = JoinSet::new();
        let mut processed = 0usize;

        for state in states {
            let Some(handles) = self.chains.get(&state.config.chain_id) else {
                warn!(
                    eigen = %state.config.id,
                    chain = state.config.chain_id,
                    "No provider for chain, skipping"
                );
                continue;
            };
            processed += 1;

            let ctx = EigenContext {
                config: state.config,
                executor: Arc::clone(&handles.executor),
                oracle: Arc::clone(&handles.oracle),
                detector: Arc::clone(&handles.detector),
                store: self.store.clone(),
                wallets: Arc::clone(&self.wallets),
                evaluator: Arc::clone(&self.evaluator),
                engine: Arc::clone(&self.engine),
                sell_block: Arc::clone(&self.sell_block),
                spend: Arc::clone(&self.spend),
                gas_budget: Arc::clone(&gas_budget),
                alerts: self.alerts.clone(),
                spend_threshold_pct: self.settings.spend_rate_threshold_pct,
                dry_run: self.settings.dry_run,
            };
            let semaphore = Arc::clone(&semaphore);

            join_set.spawn(async move {
                let _permit = semaphore.acquire().await;
                let eigen_id = ctx.config.id.clone();
                let result = process_eigen(&ctx).await;
                (eigen_id, result)
            });
        }

        // Settle-all: every task reports, failures feed the streak counter
        let mut failures = 0usize;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((eigen_id, Ok(()))) => {
                    self.failure_streaks.remove(&eigen_id);
                }
                Ok((eigen_id, Err(e))) => {
                    failures += 1;
                    warn!(eigen = %eigen_id, error = %e, "Eigen processing failed");
                    self.note_failure(&eigen_id, &e.to_string()).await;
                }
                Err(e) => {
                    failures += 1;
                    error!(error = %e, "Eigen task panicked");
                }
            }
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let spent = gas_budget.lock().await.spent_eth();
        self.alerts
            .emit(&Alert::cycle_summary(
                processed,
                failures,
                duration_ms,
                spent,
                self.settings.cycle_gas_budget_eth,
            ))
            .await;

        debug!(processed, failures, duration_ms, "Cycle complete");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Phases
    // ─────────────────────────────────────────────────────────────────────────

    /// Liquidation continuation, stranded recovery, and emergency sweeps.
    async fn recovery_phase(&self, actives: &[EigenConfig]) {
        if self.settings.dry_run {
            return;
        }

        // Exiting eigens first
        match self.store.exiting_eigens().await {
            Ok(exiting) => {
                for config in exiting {
                    let Some(handles) = self.chains.get(&config.chain_id) else {
                        continue;
                    };
                    let price = match &config.pool {
                        Some(pool) => handles
                            .oracle
                            .spot_price(pool, config.token)
                            .await
                            .unwrap_or(0.0),
                        None => 0.0,
                    };
                    if let Err(e) = handles.recovery.continue_liquidation(&config, price).await {
                        warn!(eigen = %config.id, error = %e, "Liquidation continuation failed");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Could not list exiting eigens"),
        }

        // Stranded assets on active eigens
        for config in actives {
            let Some(handles) = self.chains.get(&config.chain_id) else {
                continue;
            };
            if let Err(e) = handles.recovery.recover_stranded(config).await {
                warn!(eigen = %config.id, error = %e, "Stranded recovery failed");
            }
        }

        // Emergency sweep when the keeper is critically low
        let keeper = self.wallets.master_address();
        for (chain_id, handles) in &self.chains {
            let Ok(balance) = handles.provider.get_balance(keeper).await else {
                continue;
            };
            if wei_to_eth(balance) < self.settings.min_keeper_gas_eth {
                let chain_actives: Vec<EigenConfig> = actives
                    .iter()
                    .filter(|c| c.chain_id == *chain_id)
                    .cloned()
                    .collect();
                if let Err(e) = handles.recovery.emergency_keeper_sweep(&chain_actives).await {
                    warn!(chain = chain_id, error = %e, "Emergency sweep failed");
                }
            }
        }
    }

    /// Check keeper gas on every chain. Returns `false` when the cycle must
    /// abort.
    async fn keeper_gas_gate(&self) -> Result<bool> {
        let keeper = self.wallets.master_address();

        for (chain_id, handles) in &self.chains {
            let balance_eth = wei_to_eth(
                handles
                    .provider
                    .get_balance(keeper)
                    .await
                    .map_err(ServiceError::from)?,
            );

            if balance_eth < self.settings.min_keeper_gas_eth {
                error!(chain = chain_id, balance_eth, "Keeper gas below hard minimum");
                self.alerts
                    .emit(&Alert::keeper_gas_critical(
                        balance_eth,
                        self.settings.min_keeper_gas_eth,
                    ))
                    .await;
                return Ok(false);
            }

            if balance_eth < self.settings.low_keeper_gas_eth {
                warn!(chain = chain_id, balance_eth, "Keeper gas low");
                self.alerts
                    .emit(&Alert::keeper_gas_low(
                        balance_eth,
                        self.settings.low_keeper_gas_eth,
                    ))
                    .await;
            }
        }

        Ok(true)
    }

    /// Refill underfunded vaults from keeper surplus, strictly sequential.
    async fn refill_vaults(&self, actives: &[EigenConfig]) {
        if self.settings.dry_run {
            return;
        }
        let keeper = self.wallets.master_address();

        for config in actives {
            let Some(vault) = config.vault else { continue };
            let Some(handles) = self.chains.get(&config.chain_id) else {
                continue;
            };

            let vault_eth = match Self::vault_balance(&handles.provider, config).await {
                Ok(balance) => balance,
                Err(e) => {
                    debug!(eigen = %config.id, error = %e, "Vault balance read failed");
                    continue;
                }
            };
            if vault_eth >= VAULT_REFILL_FLOOR_ETH {
                continue;
            }

            let keeper_eth = match handles.provider.get_balance(keeper).await {
                Ok(balance) => wei_to_eth(balance),
                Err(_) => continue,
            };
            let surplus = keeper_eth - self.settings.low_keeper_gas_eth;
            if surplus <= 0.0 {
                continue;
            }

            let refill = surplus.min(VAULT_REFILL_CAP_ETH);
            let call = IVault::depositCall {};
            match handles
                .executor
                .send_signed(
                    self.wallets.master_signer(),
                    vault,
                    eth_to_wei(refill),
                    Bytes::from(call.abi_encode()),
                    200_000,
                )
                .await
            {
                Ok(_) => info!(eigen = %config.id, refill, "Vault refilled"),
                Err(e) => warn!(eigen = %config.id, error = %e, "Vault refill failed"),
            }
        }
    }

    async fn vault_balance(provider: &Arc<EvmProvider>, config: &EigenConfig) -> Result<f64> {
        let Some(vault) = config.vault else {
            return Ok(0.0);
        };
        let call = IVault::getNetBalanceCall {
            eigenId: config.onchain_id(),
        };
        let request = TransactionRequest::new()
            .to(vault)
            .data(Bytes::from(call.abi_encode()));
        let raw = provider.call(&request).await.map_err(ServiceError::from)?;
        if raw.len() < 32 {
            return Ok(0.0);
        }
        Ok(wei_to_eth(U256::from_be_slice(&raw[..32])))
    }

    /// Enrich configs with the state the priority sort needs.
    async fn assemble_states(&self, actives: Vec<EigenConfig>) -> Vec<EigenState> {
        let mut states = Vec::with_capacity(actives.len());
        let recent_cutoff = Utc::now() - ChronoDuration::hours(1);

        for config in actives {
            let Some(handles) = self.chains.get(&config.chain_id) else {
                continue;
            };

            let native_eth = if config.vault.is_some() {
                Self::vault_balance(&handles.provider, &config)
                    .await
                    .unwrap_or(0.0)
            } else {
                match self.wallets.wallets_for(&config).await {
                    Ok((metas, _)) => {
                        let mut total = 0.0;
                        for meta in metas {
                            if let Ok(balance) = handles.provider.get_balance(meta.address).await {
                                total += wei_to_eth(balance);
                            }
                        }
                        total
                    }
                    Err(_) => 0.0,
                }
            };

            let has_open_position = self
                .store
                .positions_for_eigen(&config.id, config.token)
                .await
                .map(|positions| positions.iter().any(keeper_core::types::Position::is_open))
                .unwrap_or(false);

            let traded_recently = self
                .store
                .last_trade_at(&config.id)
                .await
                .ok()
                .flatten()
                .is_some_and(|at| at > recent_cutoff);

            states.push(EigenState {
                config,
                native_eth,
                has_open_position,
                traded_recently,
            });
        }

        states
    }

    /// Track consecutive processing failures; the third in a row alerts.
    async fn note_failure(&mut self, eigen_id: &str, error: &str) {
        let streak = self
            .failure_streaks
            .entry(eigen_id.to_string())
            .or_insert(0);
        *streak += 1;

        if *streak == FAILURE_ALERT_THRESHOLD {
            self.alerts
                .emit(&Alert::consecutive_failures(eigen_id, *streak, error))
                .await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Price snapshot job
    // ─────────────────────────────────────────────────────────────────────────

    /// Spawn the periodic pool-price snapshot loop.
    fn spawn_snapshot_job(&self) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let interval = self.settings.price_snapshot_interval;
        let oracles: HashMap<u64, Arc<PriceOracle<EvmProvider>>> = self
            .chains
            .iter()
            .map(|(chain_id, handles)| (*chain_id, Arc::clone(&handles.oracle)))
            .collect();

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tick.tick().await;

                let configs = match store.active_eigens().await {
                    Ok(configs) => configs,
                    Err(e) => {
                        warn!(error = %e, "Snapshot job could not list eigens");
                        continue;
                    }
                };

                for config in configs {
                    let (Some(pool), Some(oracle)) =
                        (&config.pool, oracles.get(&config.chain_id))
                    else {
                        continue;
                    };

                    match oracle.observe(pool, config.token).await {
                        Ok(snapshot) => {
                            if let Err(e) = store.append_price_snapshot(&snapshot).await {
                                warn!(error = %e, "Snapshot write failed");
                            }
                        }
                        Err(e) => {
                            debug!(eigen = %config.id, error = %e, "Snapshot read failed");
                        }
                    }
                }
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
