//! Deterministic pair derivation and pool loading.
//!
//! Pair addresses come from the CREATE2 formula (EIP-1014), so loading a
//! pool costs exactly one `getReserves()` call, with no factory lookups.

use alloy::primitives::{keccak256, Address, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use searcher_data::client::{ChainClient, ClientError};
use searcher_data::registry::{DexConfig, KNOWN_DEXES};
use thiserror::Error;

use crate::types::{PairPools, Pool};

sol! {
    interface IUniswapV2Pair {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
    }
}

/// Pool-set loading failure.
#[derive(Clone, Debug, Error)]
pub enum PoolError {
    /// Fewer than two active pools trade the pair; arbitrage needs both
    /// sides.
    #[error("need at least 2 active pools for arbitrage, found {found}")]
    InsufficientLiquidity { found: usize },
}

/// Orders two `(address, decimals)` tokens ascending by address bytes,
/// the way every V2 factory stores them.
pub fn sort_tokens(
    token_a: (Address, u8),
    token_b: (Address, u8),
) -> ((Address, u8), (Address, u8)) {
    if token_a.0 < token_b.0 {
        (token_a, token_b)
    } else {
        (token_b, token_a)
    }
}

/// Derives the pair address for sorted tokens via CREATE2:
/// `lower20(keccak256(0xff ‖ factory ‖ keccak256(t0 ‖ t1) ‖ init_code_hash))`.
///
/// Pure and deterministic; tokens must already be sorted.
pub fn compute_pair_address(dex: &DexConfig, token0: Address, token1: Address) -> Address {
    let mut salt_preimage = [0u8; 40];
    salt_preimage[..20].copy_from_slice(token0.as_slice());
    salt_preimage[20..].copy_from_slice(token1.as_slice());
    let salt = keccak256(salt_preimage);

    dex.factory.create2(salt, dex.init_code_hash)
}

/// Fetches `(reserve0, reserve1)` from a pair contract at `block_number`.
pub async fn fetch_reserves(
    client: &ChainClient,
    pool: Address,
    block_number: u64,
) -> Result<(U256, U256), ClientError> {
    let calldata = IUniswapV2Pair::getReservesCall {}.abi_encode();
    let data = client.call(pool, calldata.into(), block_number).await?;

    let decoded = IUniswapV2Pair::getReservesCall::abi_decode_returns(&data, true)
        .map_err(|err| ClientError::Decode(format!("getReserves: {err}")))?;

    Ok((
        U256::from_limbs_slice(decoded.reserve0.as_limbs()),
        U256::from_limbs_slice(decoded.reserve1.as_limbs()),
    ))
}

async fn load_pool(
    client: &ChainClient,
    dex: &'static DexConfig,
    block_number: u64,
    token0: Address,
    token1: Address,
) -> Result<Pool, ClientError> {
    let address = compute_pair_address(dex, token0, token1);
    let (reserve0, reserve1) = fetch_reserves(client, address, block_number).await?;
    Ok(Pool {
        address,
        token0,
        token1,
        reserve0,
        reserve1,
        dex: dex.name,
    })
}

/// Loads the pair's pools across every known DEX at `block_number`.
///
/// Pools that fail to load (likely never deployed on that DEX) and pools
/// with zero reserves are skipped silently.
///
/// # Errors
/// Returns [`PoolError::InsufficientLiquidity`] when fewer than two
/// active pools remain.
pub async fn get_pair_pools(
    client: &ChainClient,
    block_number: u64,
    token_a: (Address, u8),
    token_b: (Address, u8),
) -> Result<PairPools, PoolError> {
    let ((token0, token0_decimals), (token1, token1_decimals)) = sort_tokens(token_a, token_b);

    let mut pools = Vec::with_capacity(KNOWN_DEXES.len());
    for dex in &KNOWN_DEXES {
        let pool = match load_pool(client, dex, block_number, token0, token1).await {
            Ok(pool) => pool,
            Err(err) => {
                tracing::debug!(dex = dex.name, %err, "skipping pool");
                continue;
            }
        };

        if pool.reserve0.is_zero() || pool.reserve1.is_zero() {
            tracing::debug!(dex = dex.name, "skipping pool with zero reserves");
            continue;
        }

        pools.push(pool);
    }

    if pools.len() < 2 {
        return Err(PoolError::InsufficientLiquidity { found: pools.len() });
    }

    Ok(PairPools {
        token0,
        token1,
        token0_decimals,
        token1_decimals,
        pools,
    })
}
