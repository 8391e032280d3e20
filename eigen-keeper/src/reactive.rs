//! External-buy detection for reactive selling.
//!
//! Scans a pool's recent swap events for buys that did not originate from
//! the keeper's own footprint (keeper wallet, vault, sub-wallets, known
//! routers) and aggregates the base-asset volume that entered the pool. The
//! caller mirrors a configured share of that volume with sells.
//!
//! The scan window is capped to the most recent blocks so a long-idle eigen
//! does not replay history, and the latest scanned block is always returned
//! so the caller can advance its cursor even when nothing was found.

use std::collections::HashSet;
use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use tracing::{debug, instrument, warn};

use chain_gateway::{ChainProvider, LogFilter};
use keeper_core::types::{ExternalBuySignal, PoolSpec, PoolVersion};

use crate::contracts::{IV2Pair, IV3Pool, IV4PoolManager};
use crate::error::Result;

/// Maximum blocks scanned per cycle.
const SCAN_WINDOW_BLOCKS: u64 = 100;

// ═══════════════════════════════════════════════════════════════════════════════
// EXCLUSIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Addresses whose swaps never count as external flow.
#[derive(Debug, Clone, Default)]
pub struct ScanExclusions {
    set: HashSet<Address>,
}

impl ScanExclusions {
    /// Build the exclusion set for one eigen.
    #[must_use]
    pub fn new(
        keeper: Address,
        vault: Option<Address>,
        sub_wallets: &[Address],
        routers: &[Address],
    ) -> Self {
        let mut set = HashSet::new();
        set.insert(keeper);
        if let Some(vault) = vault {
            set.insert(vault);
        }
        set.extend(sub_wallets.iter().copied());
        set.extend(routers.iter().copied());
        Self { set }
    }

    /// Whether an address belongs to the keeper's own footprint.
    #[must_use]
    pub fn contains(&self, address: Address) -> bool {
        self.set.contains(&address)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DETECTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Pool swap-event scanner.
#[derive(Debug)]
pub struct ReactiveDetector<P> {
    provider: Arc<P>,
}

impl<P: ChainProvider> ReactiveDetector<P> {
    /// Create a detector over the given provider.
    pub const fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// Scan for external buys between `from_block` and `current_block`.
    ///
    /// The window is capped to the last [`SCAN_WINDOW_BLOCKS`] blocks. The
    /// returned signal always carries `latest_block_scanned =
    /// current_block`, buys or not, so cursors only move forward.
    ///
    /// # Errors
    ///
    /// Returns an error only when the log query itself fails; undecodable
    /// logs are skipped with a warning.
    #[instrument(skip(self, pool, exclusions), fields(pool = %pool.address, from = from_block, to = current_block))]
    pub async fn scan(
        &self,
        pool: &PoolSpec,
        token: Address,
        wrapped_native: Address,
        from_block: u64,
        current_block: u64,
        exclusions: &ScanExclusions,
    ) -> Result<ExternalBuySignal> {
        let mut signal = ExternalBuySignal {
            latest_block_scanned: current_block,
            ..ExternalBuySignal::default()
        };

        // Cap the window to recent history
        let window_floor = current_block.saturating_sub(SCAN_WINDOW_BLOCKS - 1);
        let from = from_block.max(window_floor);
        if from > current_block {
            return Ok(signal);
        }

        let topic0 = match pool.version {
            PoolVersion::V2 => IV2Pair::Swap::SIGNATURE_HASH,
            PoolVersion::V3 => IV3Pool::Swap::SIGNATURE_HASH,
            PoolVersion::V4 => IV4PoolManager::Swap::SIGNATURE_HASH,
        };

        let filter = LogFilter::new()
            .address(pool.address)
            .block_range(from, current_block)
            .event_signature(topic0);

        let logs = self.provider.get_logs(&filter).await.map_err(crate::error::ServiceError::from)?;

        // Token ordering decides which amount is the base asset
        let native_is_token0 = wrapped_native < token;

        for log in &logs {
            let Some(base_in) = Self::classify(pool, log, native_is_token0, exclusions) else {
                continue;
            };
            signal.buy_count += 1;
            signal.total_base_in += base_in;
        }

        debug!(
            buys = signal.buy_count,
            base_in = %signal.total_base_in,
            scanned = logs.len(),
            "Reactive scan complete"
        );

        Ok(signal)
    }

    /// Returns the base amount entering the pool when the log is an
    /// external buy, `None` otherwise.
    fn classify(
        pool: &PoolSpec,
        log: &Log,
        native_is_token0: bool,
        exclusions: &ScanExclusions,
    ) -> Option<U256> {
        match pool.version {
            PoolVersion::V2 => {
                let event = match IV2Pair::Swap::decode_log(&log.inner) {
                    Ok(decoded) => decoded.data,
                    Err(e) => {
                        warn!(error = %e, "Undecodable V2 swap log");
                        return None;
                    }
                };
                if exclusions.contains(event.sender) || exclusions.contains(event.to) {
                    return None;
                }
                let native_in = if native_is_token0 {
                    event.amount0In
                } else {
                    event.amount1In
                };
                (native_in > U256::ZERO).then_some(native_in)
            }
            PoolVersion::V3 => {
                let event = match IV3Pool::Swap::decode_log(&log.inner) {
                    Ok(decoded) => decoded.data,
                    Err(e) => {
                        warn!(error = %e, "Undecodable V3 swap log");
                        return None;
                    }
                };
                if exclusions.contains(event.sender) || exclusions.contains(event.recipient) {
                    return None;
                }
                // Positive amount = asset paid into the pool
                let native_in = if native_is_token0 {
                    event.amount0
                } else {
                    event.amount1
                };
                if native_in.is_positive() {
                    Some(native_in.unsigned_abs())
                } else {
                    None
                }
            }
            PoolVersion::V4 => {
                let event = match IV4PoolManager::Swap::decode_log(&log.inner) {
                    Ok(decoded) => decoded.data,
                    Err(e) => {
                        warn!(error = %e, "Undecodable V4 swap log");
                        return None;
                    }
                };
                // Hooked pools share one manager; match this pool's id
                if let Some(pool_id) = pool.pool_id
                    && B256::from(event.id) != pool_id
                {
                    return None;
                }
                if exclusions.contains(event.sender) {
                    return None;
                }
                let native_in = if native_is_token0 {
                    event.amount0
                } else {
                    event.amount1
                };
                if native_in.is_positive() {
                    Some(U256::from(native_in.unsigned_abs()))
                } else {
                    None
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{I256, Log as PrimitiveLog};
    use chain_gateway::mock::MockProvider;
    use keeper_core::types::PoolVersion;

    const ONE: u128 = 1_000_000_000_000_000_000;

    // Addresses chosen so wrapped_native < token => native is token0
    fn wnative() -> Address {
        Address::repeat_byte(0x01)
    }

    fn token() -> Address {
        Address::repeat_byte(0x02)
    }

    fn pool() -> PoolSpec {
        PoolSpec {
            version: PoolVersion::V3,
            address: Address::repeat_byte(0x33),
            fee: 3000,
            tick_spacing: 60,
            hook: None,
            pool_id: None,
        }
    }

    fn v3_swap_log(sender: Address, recipient: Address, amount0: I256, amount1: I256) -> Log {
        let event = IV3Pool::Swap {
            sender,
            recipient,
            amount0,
            amount1,
            sqrtPriceX96: alloy::primitives::aliases::U160::ZERO,
            liquidity: 0,
            tick: alloy::primitives::aliases::I24::ZERO,
        };
        let inner: PrimitiveLog = PrimitiveLog {
            address: Address::repeat_byte(0x33),
            data: event.encode_log_data(),
        };
        Log {
            inner,
            block_number: Some(100),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn external_buys_are_aggregated() {
        let provider = Arc::new(MockProvider::new());
        provider.set_block_number(100);

        let buyer_a = Address::repeat_byte(0xa1);
        let buyer_b = Address::repeat_byte(0xa2);
        // Two external buys: native (token0) into the pool
        provider.push_log(v3_swap_log(
            buyer_a,
            buyer_a,
            I256::try_from(ONE).unwrap(),
            I256::try_from(-1000).unwrap(),
        ));
        provider.push_log(v3_swap_log(
            buyer_b,
            buyer_b,
            I256::try_from(ONE / 2).unwrap(),
            I256::try_from(-500).unwrap(),
        ));
        // A sell (native out) must not count
        provider.push_log(v3_swap_log(
            buyer_a,
            buyer_a,
            I256::try_from(-(ONE as i128)).unwrap(),
            I256::try_from(1000).unwrap(),
        ));

        let detector = ReactiveDetector::new(Arc::clone(&provider));
        let exclusions = ScanExclusions::new(Address::repeat_byte(0xff), None, &[], &[]);

        let signal = detector
            .scan(&pool(), token(), wnative(), 50, 100, &exclusions)
            .await
            .unwrap();

        assert_eq!(signal.buy_count, 2);
        assert_eq!(signal.total_base_in, U256::from(ONE + ONE / 2));
        assert_eq!(signal.latest_block_scanned, 100);
    }

    #[tokio::test]
    async fn own_footprint_is_excluded() {
        let provider = Arc::new(MockProvider::new());
        provider.set_block_number(100);

        let keeper = Address::repeat_byte(0xff);
        let sub_wallet = Address::repeat_byte(0xee);
        let router = Address::repeat_byte(0xdd);

        provider.push_log(v3_swap_log(
            keeper,
            keeper,
            I256::try_from(ONE).unwrap(),
            I256::try_from(-1).unwrap(),
        ));
        provider.push_log(v3_swap_log(
            router,
            sub_wallet,
            I256::try_from(ONE).unwrap(),
            I256::try_from(-1).unwrap(),
        ));

        let detector = ReactiveDetector::new(Arc::clone(&provider));
        let exclusions =
            ScanExclusions::new(keeper, None, &[sub_wallet], &[router]);

        let signal = detector
            .scan(&pool(), token(), wnative(), 50, 100, &exclusions)
            .await
            .unwrap();

        assert_eq!(signal.buy_count, 0);
        assert_eq!(signal.total_base_in, U256::ZERO);
        // Cursor still advances
        assert_eq!(signal.latest_block_scanned, 100);
    }

    #[tokio::test]
    async fn empty_window_still_returns_cursor() {
        let provider = Arc::new(MockProvider::new());
        provider.set_block_number(100);

        let detector = ReactiveDetector::new(Arc::clone(&provider));
        let exclusions = ScanExclusions::new(Address::repeat_byte(0xff), None, &[], &[]);

        // from > to after capping: nothing scanned
        let signal = detector
            .scan(&pool(), token(), wnative(), 200, 100, &exclusions)
            .await
            .unwrap();

        assert_eq!(signal.buy_count, 0);
        assert_eq!(signal.latest_block_scanned, 100);
    }

    #[test]
    fn exclusion_set_membership() {
        let keeper = Address::repeat_byte(0x01);
        let vault = Address::repeat_byte(0x02);
        let exclusions = ScanExclusions::new(keeper, Some(vault), &[], &[]);

        assert!(exclusions.contains(keeper));
        assert!(exclusions.contains(vault));
        assert!(!exclusions.contains(Address::repeat_byte(0x03)));
    }
}
