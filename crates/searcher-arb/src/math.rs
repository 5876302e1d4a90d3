//! Constant-product AMM arithmetic.
//!
//! Swap amounts use exact integer math with `U256` intermediates (floor
//! division, no silent narrowing); human-readable prices are `f64`,
//! which carries a 52-bit mantissa, above the 50-bit floor
//! the spread comparison needs.

use alloy::primitives::{I256, U256};

use crate::types::Pool;

/// Iteration budget of the ternary search. The profit function is
/// unimodal over the positive-profit region of a constant-product pair,
/// so 20 rounds narrow the interval below any practical tick size.
const TERNARY_SEARCH_STEPS: usize = 20;

fn u256_to_f64(value: U256) -> f64 {
    // Decimal round-trip keeps full 52-bit precision for any magnitude.
    value.to_string().parse::<f64>().unwrap_or(f64::INFINITY)
}

/// Price of token1 in terms of token0, adjusted for decimals:
/// `(reserve0 / reserve1) * 10^(decimals1 - decimals0)`.
///
/// Returns `None` when `reserve1` is zero.
pub fn pool_price(
    reserve0: U256,
    reserve1: U256,
    decimals0: u8,
    decimals1: u8,
) -> Option<f64> {
    if reserve1.is_zero() {
        return None;
    }
    let ratio = u256_to_f64(reserve0) / u256_to_f64(reserve1);
    let adjustment = 10f64.powi(i32::from(decimals1) - i32::from(decimals0));
    Some(ratio * adjustment)
}

/// Percentage spread between two prices: `100 * (max - min) / min`.
pub fn spread_percent(price_a: f64, price_b: f64) -> f64 {
    if price_a == price_b {
        return 0.0;
    }
    let (higher, lower) = if price_a > price_b {
        (price_a, price_b)
    } else {
        (price_b, price_a)
    };
    100.0 * (higher - lower) / lower
}

/// Uniswap V2 output amount with the 0.3% fee:
/// `(in * 997 * reserve_out) / (reserve_in * 1000 + in * 997)`.
///
/// Integer division floors. Zero if any input is non-positive.
pub fn get_amount_out(amount_in: U256, reserve_in: U256, reserve_out: U256) -> U256 {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
        return U256::ZERO;
    }

    let amount_in_with_fee = amount_in * U256::from(997);
    let numerator = amount_in_with_fee * reserve_out;
    let denominator = reserve_in * U256::from(1000) + amount_in_with_fee;

    numerator / denominator
}

/// Profit of the two-leg round trip: swap `amount_in` at the cheap pool,
/// swap the proceeds at the expensive pool, and compare what comes back
/// against what went in. May be negative.
///
/// `token0_is_input` selects the input currency: `true` routes
/// token0 → token1 at the cheap pool and token1 → token0 at the
/// expensive one.
pub fn round_trip_profit(
    amount_in: U256,
    cheap: &Pool,
    expensive: &Pool,
    token0_is_input: bool,
) -> I256 {
    let (buy_in, buy_out, sell_in, sell_out) = if token0_is_input {
        (
            cheap.reserve0,
            cheap.reserve1,
            expensive.reserve1,
            expensive.reserve0,
        )
    } else {
        (
            cheap.reserve1,
            cheap.reserve0,
            expensive.reserve0,
            expensive.reserve1,
        )
    };

    let bought = get_amount_out(amount_in, buy_in, buy_out);
    let returned = get_amount_out(bought, sell_in, sell_out);

    I256::try_from(returned).unwrap_or(I256::MAX)
        - I256::try_from(amount_in).unwrap_or(I256::MAX)
}

/// Ternary search for the profit-maximizing input over `[min, max]`.
///
/// Probes the two third-points each round, keeps the best profit seen,
/// and narrows the interval toward the better candidate. A degenerate
/// range (`min > max`) returns `(min, profit(min))`.
pub fn find_optimal_input(
    cheap: &Pool,
    expensive: &Pool,
    token0_is_input: bool,
    min_amount: U256,
    max_amount: U256,
) -> (U256, I256) {
    let mut best_input = min_amount;
    let mut best_profit = round_trip_profit(min_amount, cheap, expensive, token0_is_input);
    if min_amount > max_amount {
        return (best_input, best_profit);
    }

    let mut left = min_amount;
    let mut right = max_amount;

    for _ in 0..TERNARY_SEARCH_STEPS {
        let third = (right - left) / U256::from(3);
        let mid1 = left + third;
        let mid2 = left + third * U256::from(2);

        let profit1 = round_trip_profit(mid1, cheap, expensive, token0_is_input);
        let profit2 = round_trip_profit(mid2, cheap, expensive, token0_is_input);

        if profit1 > best_profit {
            best_profit = profit1;
            best_input = mid1;
        }
        if profit2 > best_profit {
            best_profit = profit2;
            best_input = mid2;
        }

        if profit1 > profit2 {
            right = mid2;
        } else {
            left = mid1;
        }
    }

    (best_input, best_profit)
}
