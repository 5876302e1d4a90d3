//! End-to-end opportunity validation against a forked state.
//!
//! Synthesizes an executor account out of thin air, seeds it with gas
//! ETH, a token0 balance and router allowances directly in storage, then
//! runs the signed two-leg bundle through the atomic bundle executor and
//! compares realized profit against the detector's estimate.
//!
//! The storage seeding is USDC-shaped (balance mapping slot 9, allowance
//! mapping slot 10), so the harness supports the USDC-quoted pairs.

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use eyre::{Context, Result};
use searcher_data::registry::{self, KNOWN_DEXES};
use searcher_sim::{BundleExecutor, ForkedState, TxSimResult};

use crate::builder;
use crate::types::Opportunity;

/// USDC `balanceOf` mapping slot.
const USDC_BALANCE_SLOT: u64 = 9;
/// USDC `allowance` mapping slot.
const USDC_ALLOWANCE_SLOT: u64 = 10;
/// WETH `allowance` mapping slot.
const WETH_ALLOWANCE_SLOT: u64 = 2;

/// Outcome of simulating one opportunity.
#[derive(Clone, Debug)]
pub struct ArbSimOutcome {
    pub success: bool,
    /// Detector's estimate, token0 base units.
    pub est_profit: U256,
    /// Realized token0 delta on the executor account, zero on failure.
    pub actual_profit: U256,
    pub gas_used: u64,
    pub revert_reason: Option<String>,
    pub tx_results: Vec<TxSimResult>,
}

impl ArbSimOutcome {
    /// One-line estimated-vs-simulated comparison.
    pub fn comparison(&self) -> String {
        if !self.success {
            return format!(
                "simulation FAILED: {}",
                self.revert_reason.as_deref().unwrap_or("unknown")
            );
        }
        let est = self.est_profit.to_string().parse::<f64>().unwrap_or(0.0) / 1e6;
        let actual = self.actual_profit.to_string().parse::<f64>().unwrap_or(0.0) / 1e6;
        let error = if est > 0.0 {
            (actual - est) / est * 100.0
        } else {
            0.0
        };
        format!("estimated ${est:.2} | simulated ${actual:.2} | error {error:.2}%")
    }
}

/// Storage slot of `mapping(address => ...)` at `slot_index`, for `key`.
fn mapping_slot(key: Address, slot_index: u64) -> U256 {
    let mut preimage = [0u8; 64];
    preimage[12..32].copy_from_slice(key.as_slice());
    preimage[32..64].copy_from_slice(&U256::from(slot_index).to_be_bytes::<32>());
    U256::from_be_bytes(keccak256(preimage).0)
}

/// Storage slot of `allowance[owner][spender]` rooted at `slot_index`.
fn allowance_slot(owner: Address, spender: Address, slot_index: u64) -> U256 {
    let inner = B256::from(mapping_slot(owner, slot_index));
    let mut preimage = [0u8; 64];
    preimage[12..32].copy_from_slice(spender.as_slice());
    preimage[32..64].copy_from_slice(inner.as_slice());
    U256::from_be_bytes(keccak256(preimage).0)
}

/// Simulates synthesized arbitrage bundles against a forked state.
pub struct ArbSimulator<'a> {
    fork: &'a ForkedState,
}

impl<'a> ArbSimulator<'a> {
    pub fn new(fork: &'a ForkedState) -> Self {
        Self { fork }
    }

    /// Gives `executor` gas ETH, `token0_amount` of USDC, and max
    /// router allowances for USDC and WETH on every registered router.
    pub fn seed_executor_state(&self, executor: Address, token0_amount: U256) {
        let usdc = registry::USDC.address;
        let weth = registry::WETH.address;

        self.fork
            .set_balance(executor, U256::from(10u64).pow(U256::from(18)));
        self.fork.set_storage(
            usdc,
            mapping_slot(executor, USDC_BALANCE_SLOT),
            token0_amount,
        );

        for dex in &KNOWN_DEXES {
            self.fork.set_storage(
                usdc,
                allowance_slot(executor, dex.router, USDC_ALLOWANCE_SLOT),
                U256::MAX,
            );
            self.fork.set_storage(
                weth,
                allowance_slot(executor, dex.router, WETH_ALLOWANCE_SLOT),
                U256::MAX,
            );
        }
    }

    /// Builds, signs and atomically executes the two-leg bundle for
    /// `opportunity`, reporting realized against estimated profit.
    ///
    /// # Errors
    /// Returns error if signing or bundle construction fails; a
    /// reverting bundle is a `success: false` outcome.
    pub fn simulate_opportunity(&self, opportunity: &Opportunity) -> Result<ArbSimOutcome> {
        let signer = PrivateKeySigner::random();
        let executor = signer.address();
        let usdc = registry::USDC.address;
        let balance_slot = mapping_slot(executor, USDC_BALANCE_SLOT);

        self.seed_executor_state(executor, opportunity.optimal_in);
        let seeded = self
            .fork
            .get_storage(usdc, balance_slot)
            .wrap_err("failed to read seeded balance")?;

        let ctx = self.fork.block_context().clone();
        let bundle = builder::sign_arb_bundle(opportunity, &signer, ctx.timestamp)?;

        let result = BundleExecutor::new(self.fork)
            .execute_bundle(&bundle, &ctx)
            .wrap_err("bundle execution failed")?;

        if !result.success {
            return Ok(ArbSimOutcome {
                success: false,
                est_profit: opportunity.est_profit,
                actual_profit: U256::ZERO,
                gas_used: result.total_gas_used,
                revert_reason: result.revert_reason().map(str::to_owned),
                tx_results: result.transactions,
            });
        }

        // Realized profit: growth of the seeded token0 balance slot.
        let final_balance = self
            .fork
            .get_storage(usdc, balance_slot)
            .wrap_err("failed to read post-bundle balance")?;
        let actual_profit = final_balance.saturating_sub(seeded);

        tracing::debug!(
            gas_used = result.total_gas_used,
            %actual_profit,
            "arbitrage bundle simulated"
        );

        Ok(ArbSimOutcome {
            success: true,
            est_profit: opportunity.est_profit,
            actual_profit,
            gas_used: result.total_gas_used,
            revert_reason: None,
            tx_results: result.transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use searcher_sim::BlockContext;

    fn offline_fork() -> ForkedState {
        ForkedState::offline(BlockContext {
            number: 19_500_000,
            timestamp: 1_712_000_000,
            coinbase: Address::ZERO,
            difficulty: U256::ZERO,
            gas_limit: 30_000_000,
            base_fee: 0,
        })
    }

    #[test]
    fn mapping_slot_matches_solidity_layout() {
        // keccak256(abi.encode(address, uint256(9))): spot-check the
        // encoding shape: 32-byte left-padded address then the index.
        let holder = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
        let slot = mapping_slot(holder, USDC_BALANCE_SLOT);

        let mut expected_preimage = [0u8; 64];
        expected_preimage[12..32].copy_from_slice(holder.as_slice());
        expected_preimage[63] = 9;
        assert_eq!(
            slot,
            U256::from_be_bytes(keccak256(expected_preimage).0)
        );
    }

    #[test]
    fn allowance_slot_differs_per_spender() {
        let owner = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
        let uniswap = registry::dex_by_name("uniswap").unwrap().router;
        let sushiswap = registry::dex_by_name("sushiswap").unwrap().router;
        assert_ne!(
            allowance_slot(owner, uniswap, USDC_ALLOWANCE_SLOT),
            allowance_slot(owner, sushiswap, USDC_ALLOWANCE_SLOT)
        );
    }

    #[test]
    fn seeding_writes_balance_eth_and_allowances() {
        let fork = offline_fork();
        let simulator = ArbSimulator::new(&fork);
        let executor = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
        let amount = U256::from(5_000_000_000u64);

        simulator.seed_executor_state(executor, amount);

        assert_eq!(
            fork.get_balance(executor).expect("eth balance"),
            U256::from(10u64).pow(U256::from(18))
        );
        assert_eq!(
            fork.get_storage(
                registry::USDC.address,
                mapping_slot(executor, USDC_BALANCE_SLOT)
            )
            .expect("usdc balance"),
            amount
        );
        let uniswap = registry::dex_by_name("uniswap").unwrap().router;
        assert_eq!(
            fork.get_storage(
                registry::USDC.address,
                allowance_slot(executor, uniswap, USDC_ALLOWANCE_SLOT)
            )
            .expect("usdc allowance"),
            U256::MAX
        );
    }

    #[test]
    fn comparison_renders_failure_reason() {
        let outcome = ArbSimOutcome {
            success: false,
            est_profit: U256::from(1_000_000u64),
            actual_profit: U256::ZERO,
            gas_used: 0,
            revert_reason: Some("TRANSFER_FROM_FAILED".to_string()),
            tx_results: Vec::new(),
        };
        assert!(outcome.comparison().contains("TRANSFER_FROM_FAILED"));
    }
}
