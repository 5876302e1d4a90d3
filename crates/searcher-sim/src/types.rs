//! Execution context and result types.

use alloy::primitives::{Address, Bytes, B256, U256};
use revm::primitives::{BlockEnv, Log};

/// Immutable block-level execution context.
///
/// Lives for the lifetime of a forked state. When simulating prior-state
/// continuation this is typically the block *after* the fork point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockContext {
    pub number: u64,
    pub timestamp: u64,
    pub coinbase: Address,
    pub difficulty: U256,
    pub gas_limit: u64,
    /// Base fee in wei. Zero pre-London.
    pub base_fee: u128,
}

impl BlockContext {
    /// Extracts the context from a fetched block header.
    pub fn from_header(header: &alloy::rpc::types::Header) -> Self {
        Self {
            number: header.number,
            timestamp: header.timestamp,
            coinbase: header.beneficiary,
            difficulty: header.difficulty,
            gas_limit: header.gas_limit,
            base_fee: header.base_fee_per_gas.map(u128::from).unwrap_or_default(),
        }
    }

    /// Maps the context onto REVM's block environment.
    pub fn block_env(&self) -> BlockEnv {
        BlockEnv {
            number: U256::from(self.number),
            timestamp: U256::from(self.timestamp),
            gas_limit: U256::from(self.gas_limit),
            basefee: U256::from(self.base_fee),
            // Post-merge: difficulty is unused, prevrandao must be present.
            difficulty: self.difficulty,
            prevrandao: Some(B256::ZERO),
            coinbase: self.coinbase,
            // No blob transactions in these simulations.
            blob_excess_gas_and_price: None,
        }
    }
}

/// Outcome of applying a single transaction against the forked state.
///
/// A revert is not an error: it produces `success: false` plus a reason,
/// and the fork is rolled back to its pre-transaction snapshot.
#[derive(Clone, Debug, Default)]
pub struct SimulationResult {
    pub success: bool,
    pub gas_used: u64,
    pub return_data: Bytes,
    pub logs: Vec<Log>,
    pub revert_reason: Option<String>,
}
