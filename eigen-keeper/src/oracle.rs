//! Pool-derived spot prices and the snapshot job.
//!
//! Prices are always quoted as native-per-token. Each pool version has its
//! own read path:
//!
//! - V2: `getReserves` ratio
//! - V3: `slot0` sqrt price
//! - V4: `extsload` of the pool's slot0 word on the singleton manager
//!
//! The snapshot loop persists one observation per token per interval;
//! [`fresh_price_series`] guards AI context reads against stale windows.

use std::sync::Arc;

use alloy::primitives::{Address, B256, Bytes, U256, keccak256};
use alloy::sol_types::SolCall;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, instrument};

use chain_gateway::{ChainProvider, TransactionRequest};
use keeper_core::types::{PoolSpec, PoolVersion, PriceSnapshot};

use crate::contracts::{IV2Pair, IV3Pool, IV4PoolManager};
use crate::error::{Result, ServiceError};

/// Storage slot of the pools mapping in the v4 singleton manager.
const V4_POOLS_SLOT: u64 = 6;

/// 2^96 as f64, for sqrt-price conversion.
const TWO_POW_96: f64 = 79_228_162_514_264_337_593_543_950_336.0;

// ═══════════════════════════════════════════════════════════════════════════════
// ORACLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-chain price reader.
#[derive(Debug)]
pub struct PriceOracle<P> {
    provider: Arc<P>,
    wrapped_native: Address,
}

impl<P: ChainProvider> PriceOracle<P> {
    /// Create an oracle over the given provider.
    pub const fn new(provider: Arc<P>, wrapped_native: Address) -> Self {
        Self {
            provider,
            wrapped_native,
        }
    }

    /// Current spot price of `token` in native units.
    ///
    /// # Errors
    ///
    /// Returns an error when the pool read fails or decodes to an unusable
    /// price (zero reserves, zero sqrt price).
    #[instrument(skip(self, pool), fields(pool = %pool.address, version = pool.version.as_str()))]
    pub async fn spot_price(&self, pool: &PoolSpec, token: Address) -> Result<f64> {
        let native_is_token0 = self.wrapped_native < token;

        let price = match pool.version {
            PoolVersion::V2 => self.v2_price(pool, native_is_token0).await?,
            PoolVersion::V3 => self.v3_price(pool, native_is_token0).await?,
            PoolVersion::V4 => self.v4_price(pool, native_is_token0).await?,
        };

        if !price.is_finite() || price <= 0.0 {
            return Err(ServiceError::Internal(format!(
                "pool {} produced unusable price {price}",
                pool.address
            )));
        }

        debug!(price, "Spot price read");
        Ok(price)
    }

    /// Read a snapshot for the token and wrap it for persistence.
    ///
    /// # Errors
    ///
    /// Propagates [`spot_price`](Self::spot_price) failures.
    pub async fn observe(&self, pool: &PoolSpec, token: Address) -> Result<PriceSnapshot> {
        let price = self.spot_price(pool, token).await?;
        Ok(PriceSnapshot {
            token,
            price,
            source: "pool".into(),
            created_at: Utc::now(),
        })
    }

    async fn v2_price(&self, pool: &PoolSpec, native_is_token0: bool) -> Result<f64> {
        let call = IV2Pair::getReservesCall {};
        let raw = self.read(pool.address, Bytes::from(call.abi_encode())).await?;

        let decoded = IV2Pair::getReservesCall::abi_decode_returns(&raw)
            .map_err(|e| ServiceError::Internal(format!("getReserves decode: {e}")))?;

        let reserve0 = u256_to_f64(U256::from(decoded.reserve0));
        let reserve1 = u256_to_f64(U256::from(decoded.reserve1));
        if reserve0 <= 0.0 || reserve1 <= 0.0 {
            return Err(ServiceError::Internal("empty v2 reserves".into()));
        }

        // native per token = native reserve / token reserve
        Ok(if native_is_token0 {
            reserve0 / reserve1
        } else {
            reserve1 / reserve0
        })
    }

    async fn v3_price(&self, pool: &PoolSpec, native_is_token0: bool) -> Result<f64> {
        let call = IV3Pool::slot0Call {};
        let raw = self.read(pool.address, Bytes::from(call.abi_encode())).await?;

        let decoded = IV3Pool::slot0Call::abi_decode_returns(&raw)
            .map_err(|e| ServiceError::Internal(format!("slot0 decode: {e}")))?;

        sqrt_price_to_native_per_token(
            U256::from(decoded.sqrtPriceX96),
            native_is_token0,
        )
    }

    async fn v4_price(&self, pool: &PoolSpec, native_is_token0: bool) -> Result<f64> {
        let pool_id = pool
            .pool_id
            .ok_or_else(|| ServiceError::Internal("v4 pool without pool id".into()))?;

        // slot0 word of pools[poolId]: keccak256(poolId ∥ POOLS_SLOT)
        let mut preimage = [0u8; 64];
        preimage[..32].copy_from_slice(pool_id.as_slice());
        preimage[32..].copy_from_slice(&U256::from(V4_POOLS_SLOT).to_be_bytes::<32>());
        let slot = keccak256(preimage);

        let call = IV4PoolManager::extsloadCall { slot };
        let raw = self.read(pool.address, Bytes::from(call.abi_encode())).await?;

        let word = IV4PoolManager::extsloadCall::abi_decode_returns(&raw)
            .map_err(|e| ServiceError::Internal(format!("extsload decode: {e}")))?;

        // sqrtPriceX96 occupies the low 160 bits of the packed slot0 word
        let word_u256 = U256::from_be_slice(B256::from(word).as_slice());
        let mask = (U256::from(1u8) << 160) - U256::from(1u8);
        let sqrt_price = word_u256 & mask;

        sqrt_price_to_native_per_token(sqrt_price, native_is_token0)
    }

    async fn read(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let request = TransactionRequest::new().to(to).data(data);
        self.provider.call(&request).await.map_err(ServiceError::from)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERSIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Convert a sqrt price (X96) to native-per-token.
///
/// The sqrt price encodes `token1/token0`; the caller says which side the
/// native asset sits on.
///
/// # Errors
///
/// Returns an error for a zero sqrt price.
pub fn sqrt_price_to_native_per_token(sqrt_price_x96: U256, native_is_token0: bool) -> Result<f64> {
    if sqrt_price_x96.is_zero() {
        return Err(ServiceError::Internal("zero sqrt price".into()));
    }

    let sqrt = u256_to_f64(sqrt_price_x96) / TWO_POW_96;
    // token1 per token0
    let ratio = sqrt * sqrt;

    // Price of the TOKEN in native units:
    // native = token0 → ratio is token-per-native → invert
    let price = if native_is_token0 { 1.0 / ratio } else { ratio };
    Ok(price)
}

/// Approximate a U256 as f64 (used for ratios only, never sizing).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn u256_to_f64(value: U256) -> f64 {
    let limbs = value.as_limbs();
    limbs[0] as f64
        + limbs[1] as f64 * 2f64.powi(64)
        + limbs[2] as f64 * 2f64.powi(128)
        + limbs[3] as f64 * 2f64.powi(192)
}

// ═══════════════════════════════════════════════════════════════════════════════
// STALENESS GUARD
// ═══════════════════════════════════════════════════════════════════════════════

/// Filter a snapshot series down to observations newer than `max_age`.
///
/// Protects the AI context from reasoning over a dead window after the
/// snapshot job has been down.
#[must_use]
pub fn fresh_price_series(
    snapshots: &[PriceSnapshot],
    max_age: ChronoDuration,
    now: DateTime<Utc>,
) -> Vec<f64> {
    snapshots
        .iter()
        .filter(|snapshot| now - snapshot.created_at <= max_age)
        .map(|snapshot| snapshot.price)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_f64_approximation() {
        assert!((u256_to_f64(U256::ZERO)).abs() < f64::EPSILON);
        assert!((u256_to_f64(U256::from(1_000_000u64)) - 1_000_000.0).abs() < f64::EPSILON);

        let one_eth = U256::from(10u128.pow(18));
        assert!((u256_to_f64(one_eth) - 1e18).abs() / 1e18 < 1e-12);
    }

    #[test]
    fn sqrt_price_at_parity() {
        // sqrtPrice = 2^96 encodes a 1:1 pool
        let parity = U256::from(1u8) << 96;

        let price = sqrt_price_to_native_per_token(parity, true).unwrap();
        assert!((price - 1.0).abs() < 1e-9);

        let price = sqrt_price_to_native_per_token(parity, false).unwrap();
        assert!((price - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sqrt_price_orientation() {
        // sqrtPrice = 2 * 2^96 => token1/token0 ratio of 4
        let double = U256::from(2u8) << 96;

        // Native on token0: 4 tokens per native => price 0.25
        let price = sqrt_price_to_native_per_token(double, true).unwrap();
        assert!((price - 0.25).abs() < 1e-9);

        // Native on token1: 4 native per token
        let price = sqrt_price_to_native_per_token(double, false).unwrap();
        assert!((price - 4.0).abs() < 1e-9);
    }

    #[test]
    fn zero_sqrt_price_is_an_error() {
        assert!(sqrt_price_to_native_per_token(U256::ZERO, true).is_err());
    }

    #[test]
    fn staleness_guard_filters_old_snapshots() {
        let now = Utc::now();
        let token = Address::repeat_byte(0x11);

        let snapshots = vec![
            PriceSnapshot {
                token,
                price: 1.0,
                source: "pool".into(),
                created_at: now - ChronoDuration::hours(2),
            },
            PriceSnapshot {
                token,
                price: 2.0,
                source: "pool".into(),
                created_at: now - ChronoDuration::minutes(3),
            },
        ];

        let fresh = fresh_price_series(&snapshots, ChronoDuration::minutes(30), now);
        assert_eq!(fresh, vec![2.0]);
    }
}
