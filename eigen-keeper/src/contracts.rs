//! Contract bindings and swap-route encoding.
//!
//! This module provides type-safe interfaces to the contracts the keeper
//! touches, using Alloy's sol! macro for ABI generation, plus the
//! [`SwapEncoder`] seam that turns a trade intent into `(router, calldata)`
//! without the executors knowing any AMM specifics.

use std::fmt::Debug;

use alloy::primitives::{Address, Bytes, U160, U256, address};
use alloy::sol;
use alloy::sol_types::SolCall;

use keeper_core::types::{PoolSpec, PoolVersion};

use crate::error::{Result, ServiceError};

// ═══════════════════════════════════════════════════════════════════════════════
// CONTRACT ABI DEFINITIONS
// ═══════════════════════════════════════════════════════════════════════════════

// Vault - per-eigen native custody on vault-mediated chains
sol! {
    /// Vault custodying an eigen's native funds.
    interface IVault {
        // === Core Functions ===
        function deposit() external payable;
        function executeBuy(bytes32 eigenId, address router, uint256 amount, bytes calldata swapData) external returns (uint256 received);
        function returnEth(bytes32 eigenId) external payable;
        function keeperTerminate(bytes32 eigenId) external;

        // === View Functions ===
        function getNetBalance(bytes32 eigenId) external view returns (uint256);
        function getEigenInfo(bytes32 eigenId) external view returns (
            address owner,
            uint256 balance,
            bool active
        );
    }
}

// Standard token surfaces
sol! {
    /// Minimal ERC20 surface.
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);

        event Transfer(address indexed from, address indexed to, uint256 value);
    }

    /// Wrapped-native token (deposit/withdraw).
    interface IWrappedNative {
        function deposit() external payable;
        function withdraw(uint256 amount) external;
    }

    /// Permit2 allowance authority.
    interface IPermit2 {
        function approve(address token, address spender, uint160 amount, uint48 expiration) external;
    }
}

// Pool surfaces (price reads and swap events)
sol! {
    /// Concentrated-liquidity pool state and swap event.
    interface IV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96,
            int24 tick,
            uint16 observationIndex,
            uint16 observationCardinality,
            uint16 observationCardinalityNext,
            uint8 feeProtocol,
            bool unlocked
        );

        event Swap(
            address indexed sender,
            address indexed recipient,
            int256 amount0,
            int256 amount1,
            uint160 sqrtPriceX96,
            uint128 liquidity,
            int24 tick
        );
    }

    /// Constant-product pair reserves and swap event.
    interface IV2Pair {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);

        event Swap(
            address indexed sender,
            uint256 amount0In,
            uint256 amount1In,
            uint256 amount0Out,
            uint256 amount1Out,
            address indexed to
        );
    }

    /// Singleton pool-manager state reads and swap event (hooked pools).
    interface IV4PoolManager {
        function extsload(bytes32 slot) external view returns (bytes32 value);

        event Swap(
            bytes32 indexed id,
            address indexed sender,
            int128 amount0,
            int128 amount1,
            uint160 sqrtPriceX96,
            uint128 liquidity,
            int24 tick,
            uint24 fee
        );
    }

    /// Router exact-input swap.
    interface ISwapRouter {
        struct ExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint24 fee;
            address recipient;
            uint256 amountIn;
            uint256 amountOutMinimum;
            uint160 sqrtPriceLimitX96;
        }

        function exactInputSingle(ExactInputSingleParams calldata params) external payable returns (uint256 amountOut);
    }
}

/// Canonical Permit2 deployment address.
pub const PERMIT2_ADDRESS: Address = address!("0x000000000022D473030F116dDEE9F6B43aC78BA3");

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN ADDRESSES
// ═══════════════════════════════════════════════════════════════════════════════

/// Well-known contract addresses for one chain.
#[derive(Debug, Clone)]
pub struct ChainAddresses {
    /// Wrapped-native token (WMON, WETH, ...).
    pub wrapped_native: Address,

    /// Default swap router.
    pub router: Address,

    /// Routers excluded from external-buy detection.
    pub known_routers: Vec<Address>,
}

impl ChainAddresses {
    /// Monad testnet chain id.
    pub const MONAD_TESTNET: u64 = 10_143;

    /// Addresses for a chain id.
    ///
    /// Unknown chains fall back to zeroed addresses; routes on such chains
    /// must be configured through the eigen's pool spec instead.
    #[must_use]
    pub fn for_chain(chain_id: u64) -> Self {
        match chain_id {
            Self::MONAD_TESTNET => Self {
                wrapped_native: address!("0x760AfE86e5de5fa0Ee542fc7B7B713e1c5425701"),
                router: address!("0xfB8e1C3b833f9E67a71C859a132cf783b645e436"),
                known_routers: vec![
                    address!("0xfB8e1C3b833f9E67a71C859a132cf783b645e436"),
                    PERMIT2_ADDRESS,
                ],
            },
            _ => Self {
                wrapped_native: Address::ZERO,
                router: Address::ZERO,
                known_routers: vec![PERMIT2_ADDRESS],
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SWAP ENCODING
// ═══════════════════════════════════════════════════════════════════════════════

/// Which way a swap moves value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    /// Spend native, receive the token.
    NativeToToken,
    /// Spend the token, receive native (wrapped).
    TokenToNative,
}

/// A route-encoded swap ready to send.
#[derive(Debug, Clone)]
pub struct EncodedSwap {
    /// Router to call.
    pub router: Address,

    /// Encoded calldata.
    pub calldata: Bytes,

    /// Native value to attach.
    pub value: U256,
}

/// Encoder collaborator: `(direction, token, amount, pool, recipient,
/// min_out) -> (router, calldata)`.
///
/// AMM-version specifics live behind this seam; the executors never encode
/// calldata themselves.
pub trait SwapEncoder: Send + Sync + Debug {
    /// Encode a swap for the given pool.
    ///
    /// # Errors
    ///
    /// Returns an error when the pool version is not supported by this
    /// encoder.
    fn encode(
        &self,
        direction: SwapDirection,
        token: Address,
        amount: U256,
        pool: &PoolSpec,
        recipient: Address,
        min_out: U256,
    ) -> Result<EncodedSwap>;
}

/// Exact-input-single encoder for concentrated-liquidity routes.
#[derive(Debug, Clone)]
pub struct V3SwapEncoder {
    /// Router address.
    pub router: Address,

    /// Wrapped-native token paired against every eigen token.
    pub wrapped_native: Address,
}

impl SwapEncoder for V3SwapEncoder {
    fn encode(
        &self,
        direction: SwapDirection,
        token: Address,
        amount: U256,
        pool: &PoolSpec,
        recipient: Address,
        min_out: U256,
    ) -> Result<EncodedSwap> {
        if pool.version != PoolVersion::V3 {
            return Err(ServiceError::Internal(format!(
                "v3 encoder cannot encode {} route",
                pool.version.as_str()
            )));
        }

        let (token_in, token_out, value) = match direction {
            // The router wraps attached native value itself
            SwapDirection::NativeToToken => (self.wrapped_native, token, amount),
            SwapDirection::TokenToNative => (token, self.wrapped_native, U256::ZERO),
        };

        let params = ISwapRouter::ExactInputSingleParams {
            tokenIn: token_in,
            tokenOut: token_out,
            fee: alloy::primitives::aliases::U24::from(pool.fee),
            recipient,
            amountIn: amount,
            amountOutMinimum: min_out,
            sqrtPriceLimitX96: U160::ZERO,
        };

        let calldata = ISwapRouter::exactInputSingleCall { params }.abi_encode();

        Ok(EncodedSwap {
            router: self.router,
            calldata: Bytes::from(calldata),
            value,
        })
    }
}

/// Apply a slippage tolerance to an expected output.
#[must_use]
pub fn min_out_with_slippage(expected: U256, slippage_bps: u16) -> U256 {
    let keep_bps = U256::from(10_000_u64.saturating_sub(u64::from(slippage_bps)));
    expected * keep_bps / U256::from(10_000_u64)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn v3_pool() -> PoolSpec {
        PoolSpec {
            version: PoolVersion::V3,
            address: Address::repeat_byte(0x33),
            fee: 3000,
            tick_spacing: 60,
            hook: None,
            pool_id: None,
        }
    }

    #[test]
    fn native_to_token_attaches_value() {
        let encoder = V3SwapEncoder {
            router: Address::repeat_byte(0xaa),
            wrapped_native: Address::repeat_byte(0xbb),
        };

        let swap = encoder
            .encode(
                SwapDirection::NativeToToken,
                Address::repeat_byte(0x11),
                U256::from(1000),
                &v3_pool(),
                Address::repeat_byte(0x99),
                U256::from(990),
            )
            .unwrap();

        assert_eq!(swap.router, Address::repeat_byte(0xaa));
        assert_eq!(swap.value, U256::from(1000));
        // selector + 7 words of struct fields
        assert_eq!(swap.calldata.len(), 4 + 7 * 32);
    }

    #[test]
    fn token_to_native_has_no_value() {
        let encoder = V3SwapEncoder {
            router: Address::repeat_byte(0xaa),
            wrapped_native: Address::repeat_byte(0xbb),
        };

        let swap = encoder
            .encode(
                SwapDirection::TokenToNative,
                Address::repeat_byte(0x11),
                U256::from(1000),
                &v3_pool(),
                Address::repeat_byte(0x99),
                U256::ZERO,
            )
            .unwrap();

        assert_eq!(swap.value, U256::ZERO);
    }

    #[test]
    fn wrong_pool_version_is_rejected() {
        let encoder = V3SwapEncoder {
            router: Address::repeat_byte(0xaa),
            wrapped_native: Address::repeat_byte(0xbb),
        };
        let mut pool = v3_pool();
        pool.version = PoolVersion::V2;

        let result = encoder.encode(
            SwapDirection::NativeToToken,
            Address::repeat_byte(0x11),
            U256::from(1000),
            &pool,
            Address::repeat_byte(0x99),
            U256::ZERO,
        );
        assert!(result.is_err());
    }

    #[test]
    fn slippage_math() {
        let expected = U256::from(10_000);
        assert_eq!(min_out_with_slippage(expected, 100), U256::from(9_900));
        assert_eq!(min_out_with_slippage(expected, 0), expected);
        assert_eq!(min_out_with_slippage(expected, 10_000), U256::ZERO);
    }

    #[test]
    fn chain_addresses_known_and_fallback() {
        let monad = ChainAddresses::for_chain(ChainAddresses::MONAD_TESTNET);
        assert_ne!(monad.wrapped_native, Address::ZERO);
        assert!(monad.known_routers.contains(&PERMIT2_ADDRESS));

        let unknown = ChainAddresses::for_chain(1);
        assert_eq!(unknown.router, Address::ZERO);
    }
}
