//! Synthesizes the two-leg swap bundle that would capture an
//! opportunity.
//!
//! Leg one buys token1 on the cheap pool's router; leg two sells the
//! proceeds on the expensive pool's router. Each leg carries a 2%
//! slippage floor and a deadline two minutes past the block timestamp.

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::SolCall;
use eyre::{Context, Result};
use searcher_data::registry::{self, KNOWN_DEXES};

use crate::math;
use crate::types::Opportunity;

sol! {
    interface IUniswapV2Router02 {
        function swapExactTokensForTokens(
            uint256 amountIn,
            uint256 amountOutMin,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external returns (uint256[] memory amounts);
    }
}

const SWAP_GAS_LIMIT: u64 = 150_000;
const SWAP_GAS_PRICE: u128 = 30_000_000_000; // 30 gwei
const DEADLINE_SLACK_SECS: u64 = 120;
const SLIPPAGE_NUMERATOR: u64 = 98;
const SLIPPAGE_DENOMINATOR: u64 = 100;

/// ABI-encodes a `swapExactTokensForTokens` call.
pub fn build_swap_calldata(
    amount_in: U256,
    amount_out_min: U256,
    path: Vec<Address>,
    recipient: Address,
    deadline: U256,
) -> Bytes {
    IUniswapV2Router02::swapExactTokensForTokensCall {
        amountIn: amount_in,
        amountOutMin: amount_out_min,
        path,
        to: recipient,
        deadline,
    }
    .abi_encode()
    .into()
}

fn router_for(dex: &str) -> Address {
    registry::dex_by_name(dex)
        .map(|config| config.router)
        // Unknown tag falls back to the first registered router.
        .unwrap_or(KNOWN_DEXES[0].router)
}

fn with_slippage(amount: U256) -> U256 {
    amount * U256::from(SLIPPAGE_NUMERATOR) / U256::from(SLIPPAGE_DENOMINATOR)
}

/// Builds the unsigned two-leg bundle for `opportunity`, executed by
/// `executor` within a block stamped `block_timestamp`.
pub fn build_arb_transactions(
    opportunity: &Opportunity,
    executor: Address,
    block_timestamp: u64,
) -> [TxLegacy; 2] {
    let deadline = U256::from(block_timestamp + DEADLINE_SLACK_SECS);

    // Leg 1: token0 -> token1 on the cheap pool's router.
    let buy = &opportunity.buy_pool;
    let expected_buy_out =
        math::get_amount_out(opportunity.optimal_in, buy.reserve0, buy.reserve1);
    let buy_calldata = build_swap_calldata(
        opportunity.optimal_in,
        with_slippage(expected_buy_out),
        vec![buy.token0, buy.token1],
        executor,
        deadline,
    );
    let buy_tx = TxLegacy {
        chain_id: Some(1),
        nonce: 0,
        gas_price: SWAP_GAS_PRICE,
        gas_limit: SWAP_GAS_LIMIT,
        to: TxKind::Call(router_for(buy.dex)),
        value: U256::ZERO,
        input: buy_calldata,
    };

    // Leg 2: sell everything leg 1 bought, token1 -> token0.
    let sell = &opportunity.sell_pool;
    let expected_sell_out =
        math::get_amount_out(expected_buy_out, sell.reserve1, sell.reserve0);
    let sell_calldata = build_swap_calldata(
        expected_buy_out,
        with_slippage(expected_sell_out),
        vec![sell.token1, sell.token0],
        executor,
        deadline,
    );
    let sell_tx = TxLegacy {
        chain_id: Some(1),
        nonce: 1,
        gas_price: SWAP_GAS_PRICE,
        gas_limit: SWAP_GAS_LIMIT,
        to: TxKind::Call(router_for(sell.dex)),
        value: U256::ZERO,
        input: sell_calldata,
    };

    [buy_tx, sell_tx]
}

/// Signs the two-leg bundle with `signer`.
///
/// # Errors
/// Returns error if signing fails.
pub fn sign_arb_bundle(
    opportunity: &Opportunity,
    signer: &PrivateKeySigner,
    block_timestamp: u64,
) -> Result<Vec<TxEnvelope>> {
    let legs = build_arb_transactions(opportunity, signer.address(), block_timestamp);
    legs.into_iter()
        .enumerate()
        .map(|(index, mut tx)| {
            let signature = signer
                .sign_transaction_sync(&mut tx)
                .wrap_err_with(|| format!("failed to sign bundle leg {index}"))?;
            Ok(TxEnvelope::Legacy(tx.into_signed(signature)))
        })
        .collect()
}
