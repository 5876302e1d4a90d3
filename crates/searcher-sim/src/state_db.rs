//! Adapter between the forked state and the state contract the EVM
//! interpreter demands.
//!
//! One adapter lives for exactly one transaction: it borrows the fork,
//! carries the transaction-scoped state (logs, refunds, access list,
//! transient storage, original storage values) and is dropped when the
//! transaction completes. The fork outlives it.
//!
//! Errors from the fork are swallowed into EVM defaults: balance zero,
//! empty code, zero storage word. The fork only fails on transport
//! errors, never on legitimately missing data, so this matches the EVM's
//! semantics for uninitialized accounts.

use std::collections::{HashMap, HashSet};

use alloy::eips::eip2930::AccessList;
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use revm::primitives::{AccountInfo, Bytecode, EvmState, Log, SpecId, KECCAK_EMPTY};
use revm::{Database, DatabaseCommit};

use crate::fork::{ForkedState, StateError};

/// Per-transaction state database over a [`ForkedState`].
pub struct ForkStateDb<'a> {
    fork: &'a ForkedState,
    logs: Vec<Log>,
    refund: u64,
    access_addresses: HashSet<Address>,
    access_slots: HashMap<Address, HashSet<U256>>,
    original_storage: HashMap<Address, HashMap<U256, U256>>,
    transient: HashMap<Address, HashMap<U256, U256>>,
    created: HashSet<Address>,
    code_by_hash: HashMap<B256, Bytecode>,
}

impl<'a> ForkStateDb<'a> {
    pub fn new(fork: &'a ForkedState) -> Self {
        Self {
            fork,
            logs: Vec::new(),
            refund: 0,
            access_addresses: HashSet::new(),
            access_slots: HashMap::new(),
            original_storage: HashMap::new(),
            transient: HashMap::new(),
            created: HashSet::new(),
            code_by_hash: HashMap::new(),
        }
    }

    /// Creates a fresh empty account, marking it as created this
    /// transaction.
    pub fn create_account(&mut self, address: Address) {
        self.fork.set_balance(address, U256::ZERO);
        self.fork.set_nonce(address, 0);
        self.created.insert(address);
    }

    /// An account exists if any of balance, nonce or code is non-empty.
    pub fn exists(&self, address: Address) -> bool {
        !self.balance(address).is_zero()
            || self.nonce(address) > 0
            || !self.code(address).is_empty()
    }

    /// EIP-161 emptiness: zero balance, zero nonce, no code.
    pub fn is_empty(&self, address: Address) -> bool {
        !self.exists(address)
    }

    pub fn balance(&self, address: Address) -> U256 {
        self.fork.get_balance(address).unwrap_or_default()
    }

    /// Credits `amount` and returns the *prior* balance; interpreter gas
    /// accounting reads the old value.
    pub fn add_balance(&mut self, address: Address, amount: U256) -> U256 {
        let prior = self.balance(address);
        self.fork.set_balance(address, prior.wrapping_add(amount));
        prior
    }

    /// Debits `amount` and returns the *prior* balance.
    pub fn sub_balance(&mut self, address: Address, amount: U256) -> U256 {
        let prior = self.balance(address);
        self.fork.set_balance(address, prior.wrapping_sub(amount));
        prior
    }

    pub fn nonce(&self, address: Address) -> u64 {
        self.fork.get_nonce(address).unwrap_or_default()
    }

    pub fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.fork.set_nonce(address, nonce);
    }

    pub fn code(&self, address: Address) -> Bytes {
        self.fork.get_code(address).unwrap_or_default()
    }

    /// Deploys code and returns what it replaced.
    pub fn set_code(&mut self, address: Address, code: Bytes) -> Bytes {
        let previous = self.code(address);
        self.fork.set_code(address, code);
        previous
    }

    pub fn code_size(&self, address: Address) -> usize {
        self.code(address).len()
    }

    /// keccak-256 of the account's code. The canonical empty-code hash
    /// for an existing account with no code; the zero hash for an
    /// account that does not exist at all.
    pub fn code_hash(&self, address: Address) -> B256 {
        let code = self.code(address);
        if code.is_empty() {
            if self.exists(address) {
                KECCAK_EMPTY
            } else {
                B256::ZERO
            }
        } else {
            keccak256(&code)
        }
    }

    pub fn storage(&mut self, address: Address, slot: U256) -> U256 {
        let value = self.fork.get_storage(address, slot).unwrap_or_default();
        self.observe_original(address, slot, value);
        value
    }

    /// Writes a slot and returns the value it replaced.
    pub fn set_storage(&mut self, address: Address, slot: U256, value: U256) -> U256 {
        let previous = self.storage(address, slot);
        self.fork.set_storage(address, slot, value);
        previous
    }

    /// Returns `(current, original)` where `original` is the slot value
    /// as of the start of this transaction.
    ///
    /// Known limitation: the original-value map is populated lazily on
    /// first observation, so the first read of a slot reports
    /// `(current, current)`; a strict EIP-2200 implementation would
    /// distinguish the two when the slot was already written this tx.
    pub fn committed_storage(&mut self, address: Address, slot: U256) -> (U256, U256) {
        let current = self.storage(address, slot);
        let original = self
            .original_storage
            .get(&address)
            .and_then(|slots| slots.get(&slot))
            .copied()
            .unwrap_or(current);
        (current, original)
    }

    fn observe_original(&mut self, address: Address, slot: U256, value: U256) {
        self.original_storage
            .entry(address)
            .or_default()
            .entry(slot)
            .or_insert(value);
    }

    /// EIP-1153 transient storage read. Zero when never written this tx.
    pub fn transient_storage(&self, address: Address, slot: U256) -> U256 {
        self.transient
            .get(&address)
            .and_then(|slots| slots.get(&slot))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_transient_storage(&mut self, address: Address, slot: U256, value: U256) {
        self.transient.entry(address).or_default().insert(slot, value);
    }

    /// Clears transient storage at transaction end (EIP-1153).
    pub fn clear_transient_storage(&mut self) {
        self.transient.clear();
    }

    pub fn add_log(&mut self, log: Log) {
        self.logs.push(log);
    }

    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    pub fn take_logs(&mut self) -> Vec<Log> {
        std::mem::take(&mut self.logs)
    }

    pub fn add_refund(&mut self, gas: u64) {
        self.refund += gas;
    }

    /// Subtracting more than the current refund clamps to zero.
    pub fn sub_refund(&mut self, gas: u64) {
        self.refund = self.refund.saturating_sub(gas);
    }

    pub fn refund(&self) -> u64 {
        self.refund
    }

    pub fn add_address_to_access_list(&mut self, address: Address) {
        self.access_addresses.insert(address);
    }

    pub fn add_slot_to_access_list(&mut self, address: Address, slot: U256) {
        self.access_addresses.insert(address);
        self.access_slots.entry(address).or_default().insert(slot);
    }

    pub fn address_in_access_list(&self, address: Address) -> bool {
        self.access_addresses.contains(&address)
    }

    /// Returns `(address_present, slot_present)`.
    pub fn slot_in_access_list(&self, address: Address, slot: U256) -> (bool, bool) {
        if !self.access_addresses.contains(&address) {
            return (false, false);
        }
        let slot_present = self
            .access_slots
            .get(&address)
            .is_some_and(|slots| slots.contains(&slot));
        (true, slot_present)
    }

    /// EIP-2929/2930 transaction warm-up: sender, coinbase, target,
    /// every precompile, and every tuple in the tx access list.
    pub fn prepare(
        &mut self,
        _spec: SpecId,
        sender: Address,
        coinbase: Address,
        target: Option<Address>,
        precompiles: &[Address],
        access_list: &AccessList,
    ) {
        self.add_address_to_access_list(sender);
        self.add_address_to_access_list(coinbase);
        if let Some(target) = target {
            self.add_address_to_access_list(target);
        }
        for precompile in precompiles {
            self.add_address_to_access_list(*precompile);
        }
        for item in access_list.iter() {
            self.add_address_to_access_list(item.address);
            for key in &item.storage_keys {
                self.add_slot_to_access_list(item.address, U256::from_be_bytes(key.0));
            }
        }
    }

    /// Zeroes the balance and returns its previous value.
    pub fn self_destruct(&mut self, address: Address) -> U256 {
        let prior = self.balance(address);
        self.fork.set_balance(address, U256::ZERO);
        prior
    }

    /// Post-Cancun (EIP-6780) variant: additionally reports whether the
    /// account was created in this same transaction. Conservatively
    /// `true` unless the account verifiably pre-existed: it has state
    /// and was not created through this adapter.
    pub fn self_destruct_6780(&mut self, address: Address) -> (U256, bool) {
        let pre_existing = self.exists(address) && !self.created.contains(&address);
        (self.self_destruct(address), !pre_existing)
    }
}

impl Database for ForkStateDb<'_> {
    type Error = StateError;

    fn basic(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        let balance = self.fork.get_balance(address).unwrap_or_default();
        let nonce = self.fork.get_nonce(address).unwrap_or_default();
        let code_bytes = self.fork.get_code(address).unwrap_or_default();

        if balance.is_zero() && nonce == 0 && code_bytes.is_empty() {
            return Ok(None);
        }

        let code = Bytecode::new_raw(code_bytes);
        let code_hash = if code.is_empty() {
            KECCAK_EMPTY
        } else {
            code.hash_slow()
        };
        self.code_by_hash.insert(code_hash, code.clone());

        Ok(Some(AccountInfo {
            balance,
            nonce,
            code_hash,
            code: Some(code),
        }))
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        if code_hash == KECCAK_EMPTY {
            return Ok(Bytecode::default());
        }
        Ok(self
            .code_by_hash
            .get(&code_hash)
            .cloned()
            .unwrap_or_default())
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        Ok(ForkStateDb::storage(self, address, index))
    }

    fn block_hash(&mut self, _number: u64) -> Result<B256, Self::Error> {
        // Historical block hashes are not needed for this simulation.
        Ok(B256::ZERO)
    }
}

impl DatabaseCommit for ForkStateDb<'_> {
    /// Writes the interpreter's state delta into the fork's execution
    /// cache. Only called on successful execution; reverted transactions
    /// are rolled back via the fork snapshot instead.
    fn commit(&mut self, changes: EvmState) {
        for (address, account) in changes {
            if !account.is_touched() {
                continue;
            }
            if account.is_selfdestructed() {
                self.fork.set_balance(address, U256::ZERO);
                self.fork.set_nonce(address, 0);
                self.fork.set_code(address, Bytes::new());
                continue;
            }
            if account.is_created() {
                self.created.insert(address);
            }

            self.fork.set_balance(address, account.info.balance);
            self.fork.set_nonce(address, account.info.nonce);
            if let Some(code) = account.info.code {
                if !code.is_empty() {
                    self.fork.set_code(address, code.original_bytes());
                }
            }
            for (slot, value) in account.storage {
                if value.is_changed() {
                    self.fork.set_storage(address, slot, value.present_value);
                }
            }
        }
    }
}
