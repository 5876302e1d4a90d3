//! Atomic multi-transaction simulation.
//!
//! Executes an ordered bundle over the shared fork with all-or-nothing
//! semantics: if any transaction fails, the fork is restored to the
//! pre-bundle snapshot and the result records where it died.

use alloy::consensus::TxEnvelope;
use alloy::primitives::{Bytes, B256};
use eyre::{bail, Result};
use revm::primitives::Log;

use crate::executor::{Executor, ExecutorConfig};
use crate::fork::ForkedState;
use crate::types::BlockContext;

/// Per-transaction slice of a bundle result.
#[derive(Clone, Debug)]
pub struct TxSimResult {
    pub tx_hash: B256,
    pub success: bool,
    pub gas_used: u64,
    pub return_data: Bytes,
    pub logs: Vec<Log>,
    pub revert_reason: Option<String>,
}

/// Bundle outcome. `reverted_at` is the index of the failing
/// transaction, or `-1` when every transaction succeeded.
#[derive(Clone, Debug)]
pub struct BundleResult {
    pub success: bool,
    pub total_gas_used: u64,
    pub reverted_at: i64,
    pub transactions: Vec<TxSimResult>,
}

impl BundleResult {
    /// Revert reason of the failing transaction, if the bundle failed.
    pub fn revert_reason(&self) -> Option<&str> {
        usize::try_from(self.reverted_at)
            .ok()
            .and_then(|index| self.transactions.get(index))
            .and_then(|tx| tx.revert_reason.as_deref())
    }
}

pub struct BundleExecutor<'a> {
    executor: Executor<'a>,
}

impl<'a> BundleExecutor<'a> {
    pub fn new(fork: &'a ForkedState) -> Self {
        Self {
            executor: Executor::new(fork),
        }
    }

    pub fn with_config(fork: &'a ForkedState, config: ExecutorConfig) -> Self {
        Self {
            executor: Executor::with_config(fork, config),
        }
    }

    /// Executes `txs` in order against the shared fork.
    ///
    /// Cumulative gas is not checked against the block gas limit; that
    /// is the caller's concern.
    ///
    /// # Errors
    /// Returns error for an empty bundle or a malformed transaction.
    /// A reverting transaction is not an error: the fork is rolled back
    /// and the result reports `success: false`.
    pub fn execute_bundle(&self, txs: &[TxEnvelope], ctx: &BlockContext) -> Result<BundleResult> {
        if txs.is_empty() {
            bail!("empty bundle");
        }

        let fork = self.executor.fork();
        let snapshot = fork.snapshot();
        let mut result = BundleResult {
            success: true,
            total_gas_used: 0,
            reverted_at: -1,
            transactions: Vec::with_capacity(txs.len()),
        };

        for (index, tx) in txs.iter().enumerate() {
            tracing::debug!(
                index,
                total = txs.len(),
                tx_hash = %tx.tx_hash(),
                "executing bundle transaction"
            );

            let sim = match self.executor.execute_transaction(tx, ctx) {
                Ok(sim) => sim,
                Err(err) => {
                    if let Err(revert_err) = fork.revert_to(snapshot) {
                        tracing::warn!(%revert_err, "bundle revert failed");
                    }
                    return Err(err.wrap_err(format!("bundle tx {index} failed")));
                }
            };

            result.total_gas_used += sim.gas_used;
            result.transactions.push(TxSimResult {
                tx_hash: *tx.tx_hash(),
                success: sim.success,
                gas_used: sim.gas_used,
                return_data: sim.return_data,
                logs: sim.logs,
                revert_reason: sim.revert_reason,
            });

            if !result.transactions[index].success {
                tracing::debug!(
                    index,
                    reason = result.transactions[index].revert_reason.as_deref(),
                    "bundle transaction reverted; rolling back bundle"
                );
                result.success = false;
                result.reverted_at = index as i64;
                if let Err(revert_err) = fork.revert_to(snapshot) {
                    tracing::warn!(%revert_err, "bundle revert failed");
                }
                return Ok(result);
            }
        }

        fork.commit_snapshot(snapshot);
        tracing::debug!(
            tx_count = result.transactions.len(),
            total_gas = result.total_gas_used,
            "bundle executed successfully"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};

    #[test]
    fn empty_bundle_is_rejected() {
        let fork = ForkedState::offline(BlockContext {
            number: 18_000_000,
            timestamp: 1_708_617_600,
            coinbase: Address::ZERO,
            difficulty: U256::ZERO,
            gas_limit: 30_000_000,
            base_fee: 0,
        });
        let bundle = BundleExecutor::new(&fork);
        let ctx = fork.block_context().clone();
        assert!(bundle.execute_bundle(&[], &ctx).is_err());
    }

    #[test]
    fn revert_reason_lookup() {
        let result = BundleResult {
            success: false,
            total_gas_used: 21_000,
            reverted_at: 1,
            transactions: vec![
                TxSimResult {
                    tx_hash: B256::ZERO,
                    success: true,
                    gas_used: 21_000,
                    return_data: Bytes::new(),
                    logs: Vec::new(),
                    revert_reason: None,
                },
                TxSimResult {
                    tx_hash: B256::with_last_byte(1),
                    success: false,
                    gas_used: 0,
                    return_data: Bytes::new(),
                    logs: Vec::new(),
                    revert_reason: Some("nonce too high".to_string()),
                },
            ],
        };
        assert_eq!(result.revert_reason(), Some("nonce too high"));

        let ok = BundleResult {
            success: true,
            total_gas_used: 0,
            reverted_at: -1,
            transactions: Vec::new(),
        };
        assert_eq!(ok.revert_reason(), None);
    }
}
