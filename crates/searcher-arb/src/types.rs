//! Pool and opportunity types.

use alloy::primitives::{Address, U256};

use crate::math;

/// A Uniswap V2-style constant-product pool at one block.
///
/// Invariant: `token0 < token1` byte-lexicographically, and both reserves
/// are strictly positive for a pool considered active. Reserves fit
/// uint112 by contract; `U256` keeps the arithmetic overflow-free.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pool {
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    pub reserve0: U256,
    pub reserve1: U256,
    /// Registry name of the DEX this pool belongs to.
    pub dex: &'static str,
}

/// Pools sharing the same ordered `(token0, token1)` pair across DEXes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairPools {
    pub token0: Address,
    pub token1: Address,
    pub token0_decimals: u8,
    pub token1_decimals: u8,
    pub pools: Vec<Pool>,
}

impl PairPools {
    /// Human-readable prices for every pool, or `None` if any pool's
    /// price cannot be computed (zero reserves).
    pub fn prices(&self) -> Option<Vec<PoolPrice>> {
        self.pools
            .iter()
            .map(|pool| {
                let token1_per_token0 = math::pool_price(
                    pool.reserve0,
                    pool.reserve1,
                    self.token0_decimals,
                    self.token1_decimals,
                )?;
                let token0_per_token1 = math::pool_price(
                    pool.reserve1,
                    pool.reserve0,
                    self.token1_decimals,
                    self.token0_decimals,
                )?;
                Some(PoolPrice {
                    pool_address: pool.address,
                    dex: pool.dex,
                    token1_per_token0,
                    token0_per_token1,
                })
            })
            .collect()
    }
}

/// Price of one pool, both ways around.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolPrice {
    pub pool_address: Address,
    pub dex: &'static str,
    pub token1_per_token0: f64,
    pub token0_per_token1: f64,
}

/// A detected two-leg arbitrage: buy token1 cheap, sell it expensive.
/// Input and profit are denominated in token0 base units.
#[derive(Clone, Debug, PartialEq)]
pub struct Opportunity {
    pub buy_pool: Pool,
    pub sell_pool: Pool,
    /// Percentage spread between the two pool prices.
    pub spread_percent: f64,
    pub optimal_in: U256,
    pub est_profit: U256,
    /// Block the opportunity was observed at; set by the caller.
    pub block_number: u64,
}
