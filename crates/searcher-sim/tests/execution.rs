//! Integration tests driving real EVM execution against an offline fork.

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::network::TxSignerSync;
use alloy::primitives::{address, Address, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use searcher_sim::{BlockContext, BundleExecutor, Executor, ExecutorConfig, ForkedState};

const RECIPIENT: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");
const ONE_ETH: u128 = 1_000_000_000_000_000_000;

fn test_context() -> BlockContext {
    BlockContext {
        number: 19_500_000,
        timestamp: 1_712_000_000, // Cancun rules
        coinbase: address!("95222290DD7278Aa3Ddd389Cc1E1d165CC4BAfe5"),
        difficulty: U256::ZERO,
        gas_limit: 30_000_000,
        base_fee: 1_000_000_000,
    }
}

fn signed_transfer(
    signer: &PrivateKeySigner,
    nonce: u64,
    value: U256,
    gas_limit: u64,
) -> TxEnvelope {
    let mut tx = TxLegacy {
        chain_id: Some(1),
        nonce,
        gas_price: 0,
        gas_limit,
        to: TxKind::Call(RECIPIENT),
        value,
        input: Bytes::new(),
    };
    let signature = signer.sign_transaction_sync(&mut tx).expect("sign transfer");
    TxEnvelope::Legacy(tx.into_signed(signature))
}

#[test]
fn transfer_executes_and_commits_state() {
    let fork = ForkedState::offline(test_context());
    let signer = PrivateKeySigner::random();
    let sender = signer.address();
    fork.set_balance(sender, U256::from(ONE_ETH));

    let tx = signed_transfer(&signer, 0, U256::from(12_345), 21_000);
    let executor = Executor::new(&fork);
    let ctx = fork.block_context().clone();

    let result = executor
        .execute_transaction(&tx, &ctx)
        .expect("execution should not error");

    assert!(result.success, "transfer should succeed: {:?}", result.revert_reason);
    assert_eq!(result.gas_used, 21_000);
    assert_eq!(
        fork.get_balance(RECIPIENT).expect("recipient balance"),
        U256::from(12_345)
    );
    // Fee policy: sender pays only the transferred value, never gas.
    assert_eq!(
        fork.get_balance(sender).expect("sender balance"),
        U256::from(ONE_ETH) - U256::from(12_345)
    );
    assert_eq!(fork.get_nonce(sender).expect("sender nonce"), 1);
}

#[test]
fn charging_fees_debits_the_sender() {
    let fork = ForkedState::offline(test_context());
    let signer = PrivateKeySigner::random();
    let sender = signer.address();
    fork.set_balance(sender, U256::from(ONE_ETH));

    // Legacy tx priced exactly at the 1 gwei base fee.
    let mut tx = TxLegacy {
        chain_id: Some(1),
        nonce: 0,
        gas_price: 1_000_000_000,
        gas_limit: 21_000,
        to: TxKind::Call(RECIPIENT),
        value: U256::from(100),
        input: Bytes::new(),
    };
    let signature = signer.sign_transaction_sync(&mut tx).expect("sign transfer");
    let tx = TxEnvelope::Legacy(tx.into_signed(signature));

    let executor = Executor::with_config(&fork, ExecutorConfig { charge_fees: true });
    let ctx = fork.block_context().clone();
    let result = executor.execute_transaction(&tx, &ctx).expect("runs");

    assert!(result.success, "fee-charging transfer should succeed: {:?}", result.revert_reason);
    let fee = U256::from(21_000u64) * U256::from(1_000_000_000u64);
    assert_eq!(
        fork.get_balance(sender).expect("sender balance"),
        U256::from(ONE_ETH) - U256::from(100) - fee,
        "canonical fee flow must debit gas from the sender"
    );
}

#[test]
fn gas_limit_below_intrinsic_fails_without_state_change() {
    let fork = ForkedState::offline(test_context());
    let signer = PrivateKeySigner::random();
    fork.set_balance(signer.address(), U256::from(ONE_ETH));

    let tx = signed_transfer(&signer, 0, U256::from(1), 20_000);
    let executor = Executor::new(&fork);
    let ctx = fork.block_context().clone();

    let result = executor.execute_transaction(&tx, &ctx).expect("no hard error");
    assert!(!result.success);
    let reason = result.revert_reason.expect("intrinsic gas reason");
    assert!(reason.contains("intrinsic gas"), "got: {reason}");
    assert_eq!(
        fork.get_balance(RECIPIENT).expect("recipient balance"),
        U256::ZERO
    );
}

#[test]
fn nonce_mismatch_is_reported_and_rolled_back() {
    let fork = ForkedState::offline(test_context());
    let signer = PrivateKeySigner::random();
    let sender = signer.address();
    fork.set_balance(sender, U256::from(ONE_ETH));

    let tx = signed_transfer(&signer, 7, U256::from(1), 21_000);
    let executor = Executor::new(&fork);
    let ctx = fork.block_context().clone();

    let result = executor.execute_transaction(&tx, &ctx).expect("no hard error");
    assert!(!result.success, "stale-state nonce must be rejected");
    assert!(result.revert_reason.is_some());
    assert_eq!(fork.get_nonce(sender).expect("nonce"), 0);
}

#[test]
fn bundle_succeeds_and_accumulates_gas() {
    let fork = ForkedState::offline(test_context());
    let signer = PrivateKeySigner::random();
    fork.set_balance(signer.address(), U256::from(ONE_ETH));

    let txs = vec![
        signed_transfer(&signer, 0, U256::from(100), 21_000),
        signed_transfer(&signer, 1, U256::from(200), 21_000),
    ];

    let bundle = BundleExecutor::new(&fork);
    let ctx = fork.block_context().clone();
    let result = bundle.execute_bundle(&txs, &ctx).expect("bundle runs");

    assert!(result.success);
    assert_eq!(result.reverted_at, -1);
    assert_eq!(result.total_gas_used, 42_000);
    assert_eq!(result.transactions.len(), 2);
    assert_eq!(
        fork.get_balance(RECIPIENT).expect("recipient balance"),
        U256::from(300)
    );
}

#[test]
fn failed_bundle_restores_pre_bundle_state() {
    let fork = ForkedState::offline(test_context());
    let signer = PrivateKeySigner::random();
    let sender = signer.address();
    fork.set_balance(sender, U256::from(ONE_ETH));

    let txs = vec![
        signed_transfer(&signer, 0, U256::from(100), 21_000),
        // Nonce gap: the interpreter rejects this one.
        signed_transfer(&signer, 5, U256::from(200), 21_000),
    ];

    let bundle = BundleExecutor::new(&fork);
    let ctx = fork.block_context().clone();
    let result = bundle.execute_bundle(&txs, &ctx).expect("bundle runs");

    assert!(!result.success);
    assert_eq!(result.reverted_at, 1);
    assert_eq!(result.transactions.len(), 2);
    assert!(result.revert_reason().is_some());

    // All-or-nothing: the first transfer is unwound too.
    assert_eq!(
        fork.get_balance(RECIPIENT).expect("recipient balance"),
        U256::ZERO
    );
    assert_eq!(
        fork.get_balance(sender).expect("sender balance"),
        U256::from(ONE_ETH)
    );
    assert_eq!(fork.get_nonce(sender).expect("sender nonce"), 0);
}

#[test]
fn snapshot_revert_scenario() {
    // set_balance(1000); snapshot; set_balance(2000); revert -> 1000.
    let fork = ForkedState::offline(test_context());
    let addr = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    fork.set_balance(addr, U256::from(1000));
    let handle = fork.snapshot();
    fork.set_balance(addr, U256::from(2000));
    fork.revert_to(handle).expect("revert");

    assert_eq!(fork.get_balance(addr).expect("balance"), U256::from(1000));
}
