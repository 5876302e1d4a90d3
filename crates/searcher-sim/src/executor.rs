//! Single-transaction execution against a forked state.
//!
//! Wraps a [`ForkStateDb`] adapter and REVM. Reverts and interpreter
//! rejections are success-path outcomes (`success: false` plus reason),
//! never errors; the fork is rolled back to its pre-transaction snapshot
//! in both cases.

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2930::AccessList;
use alloy::primitives::{Address, Bytes, U256};
use eyre::{Context, Result};
use revm::primitives::{ExecutionResult, ResultAndState, SpecId, TransactTo, TxEnv};
use revm::{DatabaseCommit, Evm};

use crate::fork::ForkedState;
use crate::state_db::ForkStateDb;
use crate::types::{BlockContext, SimulationResult};

const MAINNET_CHAIN_ID: u64 = 1;

// Mainnet fork schedule, most recent first. The backtest horizon is
// post-Berlin; anything older falls back to Istanbul rules.
const CANCUN_TIME: u64 = 1_710_338_135;
const SHANGHAI_TIME: u64 = 1_681_338_455;
const MERGE_BLOCK: u64 = 15_537_394;
const LONDON_BLOCK: u64 = 12_965_000;
const BERLIN_BLOCK: u64 = 12_244_000;

/// Mainnet chain rules effective at the given block number and time.
pub fn chain_spec_at(number: u64, timestamp: u64) -> SpecId {
    if timestamp >= CANCUN_TIME {
        SpecId::CANCUN
    } else if timestamp >= SHANGHAI_TIME {
        SpecId::SHANGHAI
    } else if number >= MERGE_BLOCK {
        SpecId::MERGE
    } else if number >= LONDON_BLOCK {
        SpecId::LONDON
    } else if number >= BERLIN_BLOCK {
        SpecId::BERLIN
    } else {
        SpecId::ISTANBUL
    }
}

/// Precompile addresses warmed by transaction preparation.
pub fn precompile_addresses(spec: SpecId) -> Vec<Address> {
    let count: u8 = if spec >= SpecId::CANCUN { 10 } else { 9 };
    (1..=count).map(Address::with_last_byte).collect()
}

const TX_BASE_GAS: u64 = 21_000;
const TX_CREATE_GAS: u64 = 32_000;
const DATA_ZERO_GAS: u64 = 4;
const DATA_NONZERO_GAS: u64 = 16;
const ACCESS_LIST_ADDRESS_GAS: u64 = 2_400;
const ACCESS_LIST_SLOT_GAS: u64 = 1_900;
const INITCODE_WORD_GAS: u64 = 2;

/// Intrinsic gas of a message: the base cost charged before a single
/// opcode runs. EIP-2028 calldata pricing, EIP-2930 access-list costs,
/// and the EIP-3860 initcode word surcharge for creations.
pub fn intrinsic_gas(data: &[u8], access_list: &AccessList, is_create: bool) -> u64 {
    let mut gas = if is_create {
        TX_BASE_GAS + TX_CREATE_GAS
    } else {
        TX_BASE_GAS
    };

    let zero_bytes = data.iter().filter(|byte| **byte == 0).count() as u64;
    let nonzero_bytes = data.len() as u64 - zero_bytes;
    gas += zero_bytes * DATA_ZERO_GAS + nonzero_bytes * DATA_NONZERO_GAS;

    for item in access_list.iter() {
        gas += ACCESS_LIST_ADDRESS_GAS;
        gas += item.storage_keys.len() as u64 * ACCESS_LIST_SLOT_GAS;
    }

    if is_create {
        gas += data.len().div_ceil(32) as u64 * INITCODE_WORD_GAS;
    }

    gas
}

/// Decodes a revert payload into something readable: the string of a
/// solidity `Error(string)`, otherwise the raw hex.
fn decode_revert_reason(output: &Bytes) -> String {
    const ERROR_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
    if output.len() >= 68 && output[..4] == ERROR_SELECTOR {
        let length = usize::try_from(U256::from_be_slice(&output[36..68])).unwrap_or(0);
        if length > 0 && output.len() >= 68 + length {
            let message = String::from_utf8_lossy(&output[68..68 + length]);
            return format!("execution reverted: {message}");
        }
    }
    if output.is_empty() {
        "execution reverted".to_string()
    } else {
        format!(
            "execution reverted: {}",
            alloy::hex::encode_prefixed(output)
        )
    }
}

/// Executor policy knobs.
#[derive(Clone, Copy, Debug)]
pub struct ExecutorConfig {
    /// When `false` (the default), simulation is side-effect-free with
    /// respect to the normal economic flows: the effective gas price is
    /// zeroed and the base-fee floor lifted, so the sender is never
    /// debited for the fee and the coinbase never credited. Gas usage is
    /// still accounted and reported. `true` restores canonical fee flow.
    pub charge_fees: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { charge_fees: false }
    }
}

/// Applies signed transactions to a forked state, one at a time.
pub struct Executor<'a> {
    fork: &'a ForkedState,
    config: ExecutorConfig,
}

impl<'a> Executor<'a> {
    pub fn new(fork: &'a ForkedState) -> Self {
        Self {
            fork,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(fork: &'a ForkedState, config: ExecutorConfig) -> Self {
        Self { fork, config }
    }

    pub fn fork(&self) -> &'a ForkedState {
        self.fork
    }

    /// Executes one signed transaction within `ctx` (typically the block
    /// after the fork point when simulating prior-state continuation).
    ///
    /// # Errors
    /// Returns error only for malformed input (unrecoverable signature).
    /// Every execution-level failure is a `success: false` result.
    pub fn execute_transaction(
        &self,
        tx: &TxEnvelope,
        ctx: &BlockContext,
    ) -> Result<SimulationResult> {
        let mut state_db = ForkStateDb::new(self.fork);

        let sender = tx
            .recover_signer()
            .wrap_err("failed to recover transaction sender")?;
        let target = tx.to();
        let access_list = tx.access_list().cloned().unwrap_or_default();

        let intrinsic = intrinsic_gas(tx.input(), &access_list, target.is_none());
        if tx.gas_limit() < intrinsic {
            return Ok(SimulationResult {
                success: false,
                revert_reason: Some(format!(
                    "intrinsic gas too low: have {}, want {}",
                    tx.gas_limit(),
                    intrinsic
                )),
                ..Default::default()
            });
        }

        let snapshot = self.fork.snapshot();
        let spec = chain_spec_at(ctx.number, ctx.timestamp);
        state_db.prepare(
            spec,
            sender,
            ctx.coinbase,
            target,
            &precompile_addresses(spec),
            &access_list,
        );

        let (gas_price, gas_priority_fee) = if self.config.charge_fees {
            match tx.gas_price() {
                Some(price) => (U256::from(price), None),
                None => (
                    U256::from(tx.max_fee_per_gas()),
                    tx.max_priority_fee_per_gas().map(U256::from),
                ),
            }
        } else {
            (
                U256::ZERO,
                tx.max_priority_fee_per_gas().map(|_| U256::ZERO),
            )
        };

        let tx_env = TxEnv {
            caller: sender,
            transact_to: target.map_or(TransactTo::Create, TransactTo::Call),
            value: tx.value(),
            data: tx.input().clone(),
            gas_limit: tx.gas_limit(),
            gas_price,
            gas_priority_fee,
            nonce: Some(tx.nonce()),
            chain_id: tx.chain_id(),
            access_list: access_list
                .iter()
                .map(|item| revm::primitives::AccessListItem {
                    address: item.address,
                    storage_keys: item.storage_keys.clone(),
                })
                .collect(),
            blob_hashes: Vec::new(),
            max_fee_per_blob_gas: None,
            authorization_list: None,
        };

        let charge_fees = self.config.charge_fees;
        let outcome = {
            let mut evm = Evm::builder()
                .with_db(&mut state_db)
                .with_spec_id(spec)
                .modify_cfg_env(|cfg| {
                    cfg.chain_id = MAINNET_CHAIN_ID;
                    cfg.disable_base_fee = !charge_fees;
                })
                .modify_block_env(|block| *block = ctx.block_env())
                .modify_tx_env(|env| *env = tx_env)
                .build();
            evm.transact()
        };

        let ResultAndState { result, state } = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                // Interpreter-level rejection: nonce mismatch,
                // insufficient funds for value, malformed message.
                if let Err(revert_err) = self.fork.revert_to(snapshot) {
                    tracing::warn!(%revert_err, "snapshot revert failed after rejection");
                }
                return Ok(SimulationResult {
                    success: false,
                    revert_reason: Some(err.to_string()),
                    ..Default::default()
                });
            }
        };

        let result = match result {
            ExecutionResult::Success {
                gas_used,
                logs,
                output,
                ..
            } => {
                state_db.commit(state);
                for log in logs {
                    state_db.add_log(log);
                }
                self.fork.commit_snapshot(snapshot);
                SimulationResult {
                    success: true,
                    gas_used,
                    return_data: output.into_data(),
                    logs: state_db.take_logs(),
                    revert_reason: None,
                }
            }
            ExecutionResult::Revert { gas_used, output } => {
                if let Err(revert_err) = self.fork.revert_to(snapshot) {
                    tracing::warn!(%revert_err, "snapshot revert failed after revert");
                }
                SimulationResult {
                    success: false,
                    gas_used,
                    revert_reason: Some(decode_revert_reason(&output)),
                    return_data: output,
                    logs: Vec::new(),
                }
            }
            ExecutionResult::Halt { reason, gas_used } => {
                if let Err(revert_err) = self.fork.revert_to(snapshot) {
                    tracing::warn!(%revert_err, "snapshot revert failed after halt");
                }
                SimulationResult {
                    success: false,
                    gas_used,
                    revert_reason: Some(format!("halted: {reason:?}")),
                    ..Default::default()
                }
            }
        };

        state_db.clear_transient_storage();
        tracing::debug!(
            tx_hash = %tx.tx_hash(),
            success = result.success,
            gas_used = result.gas_used,
            "executed transaction"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::eips::eip2930::AccessListItem;
    use alloy::primitives::B256;

    #[test]
    fn spec_ladder_matches_mainnet_schedule() {
        assert_eq!(chain_spec_at(19_500_000, 1_712_000_000), SpecId::CANCUN);
        assert_eq!(chain_spec_at(17_000_000, 1_685_000_000), SpecId::SHANGHAI);
        assert_eq!(chain_spec_at(16_000_000, 1_670_000_000), SpecId::MERGE);
        assert_eq!(chain_spec_at(13_000_000, 1_635_000_000), SpecId::LONDON);
        assert_eq!(chain_spec_at(12_300_000, 1_620_000_000), SpecId::BERLIN);
        assert_eq!(chain_spec_at(11_000_000, 1_600_000_000), SpecId::ISTANBUL);
    }

    #[test]
    fn intrinsic_gas_plain_transfer() {
        assert_eq!(intrinsic_gas(&[], &AccessList::default(), false), 21_000);
    }

    #[test]
    fn intrinsic_gas_counts_calldata_bytes() {
        // Two zero bytes (4 each) + three non-zero bytes (16 each).
        let data = [0x00, 0x00, 0x01, 0x02, 0x03];
        assert_eq!(
            intrinsic_gas(&data, &AccessList::default(), false),
            21_000 + 2 * 4 + 3 * 16
        );
    }

    #[test]
    fn intrinsic_gas_charges_access_list() {
        let access_list = AccessList(vec![AccessListItem {
            address: Address::ZERO,
            storage_keys: vec![B256::ZERO, B256::with_last_byte(1)],
        }]);
        assert_eq!(
            intrinsic_gas(&[], &access_list, false),
            21_000 + 2_400 + 2 * 1_900
        );
    }

    #[test]
    fn intrinsic_gas_creation_surcharge_and_initcode_words() {
        // 33 bytes of initcode: two 32-byte words.
        let data = [1u8; 33];
        assert_eq!(
            intrinsic_gas(&data, &AccessList::default(), true),
            21_000 + 32_000 + 33 * 16 + 2 * 2
        );
    }

    #[test]
    fn revert_reason_decodes_error_string() {
        // Error("nope"): selector + offset 0x20 + length 4 + "nope" padded.
        let mut payload = Vec::new();
        payload.extend_from_slice(&[0x08, 0xc3, 0x79, 0xa0]);
        payload.extend_from_slice(&U256::from(0x20).to_be_bytes::<32>());
        payload.extend_from_slice(&U256::from(4).to_be_bytes::<32>());
        let mut message = [0u8; 32];
        message[..4].copy_from_slice(b"nope");
        payload.extend_from_slice(&message);

        assert_eq!(
            decode_revert_reason(&Bytes::from(payload)),
            "execution reverted: nope"
        );
        assert_eq!(
            decode_revert_reason(&Bytes::new()),
            "execution reverted"
        );
    }

    #[test]
    fn precompile_set_grows_at_cancun() {
        assert_eq!(precompile_addresses(SpecId::SHANGHAI).len(), 9);
        assert_eq!(precompile_addresses(SpecId::CANCUN).len(), 10);
    }
}
