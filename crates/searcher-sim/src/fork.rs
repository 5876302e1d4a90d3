//! Lazily-materialized fork of chain state at a historical block.
//!
//! Reads walk a four-tier hierarchy; a hit at a colder tier backfills
//! every hotter one:
//!
//! 1. execution cache: per-fork mutations and reads, the only tier that
//!    sees in-flight writes
//! 2. shared LRU: bounded in-memory cache of historical values
//! 3. persistent store: SQLite keyed by `(block, address[, slot])`
//! 4. remote RPC: the archive endpoint, fetched on demand
//!
//! Tiers 2–3 hold *historical* state, immutable for a given block; writes
//! from the executor only ever touch tier 1. Snapshots deep-copy tier 1
//! onto a stack so speculative execution can be rolled back byte-for-byte.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use alloy::primitives::{Address, Bytes, B256, U256};
use eyre::{Context, Result};
use lru::LruCache;
use searcher_data::client::{AccountSnapshot, ChainClient, ClientError};
use searcher_data::state_cache::StateCacheDb;
use thiserror::Error;

use crate::types::BlockContext;

const ACCOUNT_LRU_CAPACITY: usize = 10_000;
const STORAGE_LRU_CAPACITY: usize = 50_000;

/// Failure surfaced by the fork. Cache misses are never errors; only
/// the remote tier can fail, and only on transport problems.
#[derive(Clone, Debug, Error)]
pub enum StateError {
    #[error("remote state fetch failed: {0}")]
    Remote(#[from] ClientError),
    #[error("invalid snapshot handle {0}")]
    InvalidSnapshot(usize),
}

/// Tier 1: the execution cache. One map per account field plus nested
/// storage. Cloning it is the snapshot operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct ExecCache {
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    code: HashMap<Address, Bytes>,
    storage: HashMap<Address, HashMap<U256, U256>>,
}

struct ForkInner {
    cache: ExecCache,
    snapshots: Vec<ExecCache>,
}

#[derive(Clone, Debug, Default)]
struct AccountEntry {
    balance: Option<U256>,
    nonce: Option<u64>,
    code: Option<Bytes>,
}

struct RemoteTier {
    client: Arc<ChainClient>,
    runtime: tokio::runtime::Handle,
}

impl RemoteTier {
    /// Bridges the fork's synchronous read contract onto async RPC.
    /// Requires a multi-thread runtime (`block_in_place`).
    fn block_on<T>(&self, fut: impl Future<Output = T>) -> T {
        tokio::task::block_in_place(|| self.runtime.block_on(fut))
    }
}

#[derive(Default)]
struct CacheStats {
    lru_hits: AtomicU64,
    persistent_hits: AtomicU64,
    remote_fetches: AtomicU64,
    prewarm_batches: AtomicU64,
}

/// Point-in-time cache counters. Observability only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub lru_hits: u64,
    pub persistent_hits: u64,
    pub remote_fetches: u64,
    pub prewarm_batches: u64,
}

/// A forked view of chain state at one block.
///
/// Created for one block, accumulates reads across one or more
/// executions, then is discarded. The LRU tiers are per-fork so keying
/// never involves the block number.
pub struct ForkedState {
    remote: Option<RemoteTier>,
    store: Option<Arc<StateCacheDb>>,
    block_number: u64,
    context: BlockContext,
    block: Option<alloy::rpc::types::Block>,
    inner: RwLock<ForkInner>,
    account_lru: Mutex<LruCache<Address, AccountEntry>>,
    storage_lru: Mutex<LruCache<(Address, U256), U256>>,
    stats: CacheStats,
}

impl ForkedState {
    /// Forks state at `block_number`, fetching and holding the full block.
    ///
    /// # Errors
    /// Returns error if the block fetch fails.
    pub async fn new(
        client: Arc<ChainClient>,
        store: Option<Arc<StateCacheDb>>,
        block_number: u64,
    ) -> Result<Self> {
        let block = client
            .block_by_number(block_number)
            .await
            .wrap_err_with(|| format!("failed to fetch fork block {block_number}"))?;
        let context = BlockContext::from_header(&block.header);

        tracing::info!(
            block_number,
            timestamp = context.timestamp,
            base_fee = context.base_fee,
            "forked state at block"
        );

        Ok(Self {
            remote: Some(RemoteTier {
                client,
                runtime: tokio::runtime::Handle::current(),
            }),
            store,
            block_number,
            context,
            block: Some(block),
            inner: RwLock::new(ForkInner {
                cache: ExecCache::default(),
                snapshots: Vec::new(),
            }),
            account_lru: Mutex::new(LruCache::new(
                NonZeroUsize::new(ACCOUNT_LRU_CAPACITY).expect("nonzero capacity"),
            )),
            storage_lru: Mutex::new(LruCache::new(
                NonZeroUsize::new(STORAGE_LRU_CAPACITY).expect("nonzero capacity"),
            )),
            stats: CacheStats::default(),
        })
    }

    /// Constructs a fork with no persistent or remote tier. Misses read
    /// as zero/empty, matching EVM semantics for untouched accounts.
    /// Intended for tests and synthetic scenarios.
    pub fn offline(context: BlockContext) -> Self {
        Self {
            remote: None,
            store: None,
            block_number: context.number,
            context,
            block: None,
            inner: RwLock::new(ForkInner {
                cache: ExecCache::default(),
                snapshots: Vec::new(),
            }),
            account_lru: Mutex::new(LruCache::new(
                NonZeroUsize::new(ACCOUNT_LRU_CAPACITY).expect("nonzero capacity"),
            )),
            storage_lru: Mutex::new(LruCache::new(
                NonZeroUsize::new(STORAGE_LRU_CAPACITY).expect("nonzero capacity"),
            )),
            stats: CacheStats::default(),
        }
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    /// The block this state was forked at.
    pub fn block_context(&self) -> &BlockContext {
        &self.context
    }

    /// The full fetched block, when the fork was built from a live client.
    pub fn block(&self) -> Option<&alloy::rpc::types::Block> {
        self.block.as_ref()
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            lru_hits: self.stats.lru_hits.load(Ordering::Relaxed),
            persistent_hits: self.stats.persistent_hits.load(Ordering::Relaxed),
            remote_fetches: self.stats.remote_fetches.load(Ordering::Relaxed),
            prewarm_batches: self.stats.prewarm_batches.load(Ordering::Relaxed),
        }
    }

    /// Account balance at the forked state.
    pub fn get_balance(&self, address: Address) -> Result<U256, StateError> {
        if let Some(balance) = self
            .inner
            .read()
            .expect("fork lock poisoned")
            .cache
            .balances
            .get(&address)
            .copied()
        {
            return Ok(balance);
        }

        let lru_hit = self
            .account_lru
            .lock()
            .expect("fork lock poisoned")
            .get(&address)
            .and_then(|entry| entry.balance);
        if let Some(balance) = lru_hit {
            self.stats.lru_hits.fetch_add(1, Ordering::Relaxed);
            self.write_exec(|cache| {
                cache.balances.insert(address, balance);
            });
            return Ok(balance);
        }

        if let Some(store) = &self.store {
            if let Some(balance) = store.balance(self.block_number, address) {
                self.stats.persistent_hits.fetch_add(1, Ordering::Relaxed);
                self.backfill_account(address, |entry| entry.balance = Some(balance));
                self.write_exec(|cache| {
                    cache.balances.insert(address, balance);
                });
                return Ok(balance);
            }
        }

        let balance = match &self.remote {
            Some(remote) => {
                let value = remote.block_on(remote.client.balance_at(address, self.block_number))?;
                self.stats.remote_fetches.fetch_add(1, Ordering::Relaxed);
                if let Some(store) = &self.store {
                    if let Err(err) = store.set_balance(self.block_number, address, value) {
                        tracing::debug!(%err, %address, "state cache write failed");
                    }
                }
                value
            }
            None => U256::ZERO,
        };

        self.backfill_account(address, |entry| entry.balance = Some(balance));
        self.write_exec(|cache| {
            cache.balances.insert(address, balance);
        });
        Ok(balance)
    }

    /// Account nonce at the forked state.
    pub fn get_nonce(&self, address: Address) -> Result<u64, StateError> {
        if let Some(nonce) = self
            .inner
            .read()
            .expect("fork lock poisoned")
            .cache
            .nonces
            .get(&address)
            .copied()
        {
            return Ok(nonce);
        }

        let lru_hit = self
            .account_lru
            .lock()
            .expect("fork lock poisoned")
            .get(&address)
            .and_then(|entry| entry.nonce);
        if let Some(nonce) = lru_hit {
            self.stats.lru_hits.fetch_add(1, Ordering::Relaxed);
            self.write_exec(|cache| {
                cache.nonces.insert(address, nonce);
            });
            return Ok(nonce);
        }

        if let Some(store) = &self.store {
            if let Some(nonce) = store.nonce(self.block_number, address) {
                self.stats.persistent_hits.fetch_add(1, Ordering::Relaxed);
                self.backfill_account(address, |entry| entry.nonce = Some(nonce));
                self.write_exec(|cache| {
                    cache.nonces.insert(address, nonce);
                });
                return Ok(nonce);
            }
        }

        let nonce = match &self.remote {
            Some(remote) => {
                let value = remote.block_on(remote.client.nonce_at(address, self.block_number))?;
                self.stats.remote_fetches.fetch_add(1, Ordering::Relaxed);
                if let Some(store) = &self.store {
                    if let Err(err) = store.set_nonce(self.block_number, address, value) {
                        tracing::debug!(%err, %address, "state cache write failed");
                    }
                }
                value
            }
            None => 0,
        };

        self.backfill_account(address, |entry| entry.nonce = Some(nonce));
        self.write_exec(|cache| {
            cache.nonces.insert(address, nonce);
        });
        Ok(nonce)
    }

    /// Contract bytecode at the forked state. Empty bytes for EOAs.
    pub fn get_code(&self, address: Address) -> Result<Bytes, StateError> {
        if let Some(code) = self
            .inner
            .read()
            .expect("fork lock poisoned")
            .cache
            .code
            .get(&address)
            .cloned()
        {
            return Ok(code);
        }

        let lru_hit = self
            .account_lru
            .lock()
            .expect("fork lock poisoned")
            .get(&address)
            .and_then(|entry| entry.code.clone());
        if let Some(code) = lru_hit {
            self.stats.lru_hits.fetch_add(1, Ordering::Relaxed);
            self.write_exec(|cache| {
                cache.code.insert(address, code.clone());
            });
            return Ok(code);
        }

        if let Some(store) = &self.store {
            if let Some(code) = store.code(self.block_number, address) {
                self.stats.persistent_hits.fetch_add(1, Ordering::Relaxed);
                self.backfill_account(address, |entry| entry.code = Some(code.clone()));
                self.write_exec(|cache| {
                    cache.code.insert(address, code.clone());
                });
                return Ok(code);
            }
        }

        let code = match &self.remote {
            Some(remote) => {
                let value = remote.block_on(remote.client.code_at(address, self.block_number))?;
                self.stats.remote_fetches.fetch_add(1, Ordering::Relaxed);
                if let Some(store) = &self.store {
                    if let Err(err) = store.set_code(self.block_number, address, &value) {
                        tracing::debug!(%err, %address, "state cache write failed");
                    }
                }
                value
            }
            None => Bytes::new(),
        };

        self.backfill_account(address, |entry| entry.code = Some(code.clone()));
        self.write_exec(|cache| {
            cache.code.insert(address, code.clone());
        });
        Ok(code)
    }

    /// Storage slot value at the forked state.
    pub fn get_storage(&self, address: Address, slot: U256) -> Result<U256, StateError> {
        if let Some(value) = self
            .inner
            .read()
            .expect("fork lock poisoned")
            .cache
            .storage
            .get(&address)
            .and_then(|slots| slots.get(&slot))
            .copied()
        {
            return Ok(value);
        }

        let lru_hit = self
            .storage_lru
            .lock()
            .expect("fork lock poisoned")
            .get(&(address, slot))
            .copied();
        if let Some(value) = lru_hit {
            self.stats.lru_hits.fetch_add(1, Ordering::Relaxed);
            self.write_exec(|cache| {
                cache.storage.entry(address).or_default().insert(slot, value);
            });
            return Ok(value);
        }

        if let Some(store) = &self.store {
            if let Some(value) = store.storage_value(self.block_number, address, slot) {
                self.stats.persistent_hits.fetch_add(1, Ordering::Relaxed);
                self.storage_lru
                    .lock()
                    .expect("fork lock poisoned")
                    .put((address, slot), value);
                self.write_exec(|cache| {
                    cache.storage.entry(address).or_default().insert(slot, value);
                });
                return Ok(value);
            }
        }

        let value = match &self.remote {
            Some(remote) => {
                let value =
                    remote.block_on(remote.client.storage_at(address, slot, self.block_number))?;
                self.stats.remote_fetches.fetch_add(1, Ordering::Relaxed);
                if let Some(store) = &self.store {
                    if let Err(err) = store.set_storage(self.block_number, address, slot, value) {
                        tracing::debug!(%err, %address, "state cache write failed");
                    }
                }
                value
            }
            None => U256::ZERO,
        };

        self.storage_lru
            .lock()
            .expect("fork lock poisoned")
            .put((address, slot), value);
        self.write_exec(|cache| {
            cache.storage.entry(address).or_default().insert(slot, value);
        });
        Ok(value)
    }

    /// Overrides a balance in the execution cache. Tiers 2–3 hold the
    /// immutable historical state and are never touched by writes.
    pub fn set_balance(&self, address: Address, balance: U256) {
        self.write_exec(|cache| {
            cache.balances.insert(address, balance);
        });
    }

    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.write_exec(|cache| {
            cache.nonces.insert(address, nonce);
        });
    }

    pub fn set_code(&self, address: Address, code: Bytes) {
        self.write_exec(|cache| {
            cache.code.insert(address, code);
        });
    }

    pub fn set_storage(&self, address: Address, slot: U256, value: U256) {
        self.write_exec(|cache| {
            cache.storage.entry(address).or_default().insert(slot, value);
        });
    }

    /// Deep-copies the execution cache onto the snapshot stack and
    /// returns its handle. Handles obey LIFO: reverting to an earlier
    /// handle invalidates every later one.
    pub fn snapshot(&self) -> usize {
        let mut inner = self.inner.write().expect("fork lock poisoned");
        let copy = inner.cache.clone();
        inner.snapshots.push(copy);
        inner.snapshots.len() - 1
    }

    /// Restores the execution cache to the state saved at `handle` and
    /// truncates the stack above it. The handle is not reusable afterwards.
    ///
    /// # Errors
    /// Returns error if `handle` does not name a live snapshot.
    pub fn revert_to(&self, handle: usize) -> Result<(), StateError> {
        let mut inner = self.inner.write().expect("fork lock poisoned");
        if handle >= inner.snapshots.len() {
            return Err(StateError::InvalidSnapshot(handle));
        }
        let restored = inner
            .snapshots
            .drain(handle..)
            .next()
            .expect("bounds checked above");
        inner.cache = restored;
        Ok(())
    }

    /// Discards the snapshot at `handle` (and any pushed after it),
    /// keeping all mutations. The commit counterpart of [`revert_to`].
    ///
    /// [`revert_to`]: Self::revert_to
    pub fn commit_snapshot(&self, handle: usize) {
        let mut inner = self.inner.write().expect("fork lock poisoned");
        if handle < inner.snapshots.len() {
            inner.snapshots.truncate(handle);
        }
    }

    /// Bulk-loads everything a target transaction touched into tiers 2–3
    /// using a prestate trace plus at most two batched RPC round-trips.
    ///
    /// Best-effort: every failure is swallowed at debug level.
    pub async fn prewarm(&self, tx_hash: B256) {
        let Some(remote) = &self.remote else {
            return;
        };

        let trace = match remote.client.trace_transaction(tx_hash).await {
            Ok(trace) => trace,
            Err(ClientError::NotSupported(_)) => {
                tracing::debug!("endpoint lacks prestate tracing; skipping prewarm");
                return;
            }
            Err(err) => {
                tracing::debug!(%err, %tx_hash, "prewarm trace failed");
                return;
            }
        };

        match remote
            .client
            .batch_accounts(&trace.accounts, self.block_number)
            .await
        {
            Ok(results) => {
                let snapshots: Vec<AccountSnapshot> =
                    results.into_iter().filter_map(Result::ok).collect();
                self.stats.prewarm_batches.fetch_add(1, Ordering::Relaxed);
                {
                    let mut lru = self.account_lru.lock().expect("fork lock poisoned");
                    for account in &snapshots {
                        lru.put(
                            account.address,
                            AccountEntry {
                                balance: Some(account.balance),
                                nonce: Some(account.nonce),
                                code: Some(account.code.clone()),
                            },
                        );
                    }
                }
                if let Some(store) = &self.store {
                    if let Err(err) = store.batch_put_accounts(self.block_number, &snapshots) {
                        tracing::debug!(%err, "prewarm account persist failed");
                    }
                }
                tracing::debug!(accounts = snapshots.len(), "prewarmed accounts");
            }
            Err(err) => tracing::debug!(%err, "prewarm account batch failed"),
        }

        let requests: Vec<(Address, U256)> = trace
            .storage
            .iter()
            .flat_map(|(address, slots)| slots.iter().map(move |slot| (*address, *slot)))
            .collect();
        if requests.is_empty() {
            return;
        }

        match remote
            .client
            .batch_storage(&requests, self.block_number)
            .await
        {
            Ok(results) => {
                let entries: Vec<(Address, U256, U256)> = requests
                    .iter()
                    .zip(results)
                    .filter_map(|((address, slot), result)| {
                        result.ok().map(|value| (*address, *slot, value))
                    })
                    .collect();
                self.stats.prewarm_batches.fetch_add(1, Ordering::Relaxed);
                {
                    let mut lru = self.storage_lru.lock().expect("fork lock poisoned");
                    for (address, slot, value) in &entries {
                        lru.put((*address, *slot), *value);
                    }
                }
                if let Some(store) = &self.store {
                    if let Err(err) = store.batch_put_storage(self.block_number, &entries) {
                        tracing::debug!(%err, "prewarm storage persist failed");
                    }
                }
                tracing::debug!(slots = entries.len(), "prewarmed storage");
            }
            Err(err) => tracing::debug!(%err, "prewarm storage batch failed"),
        }
    }

    fn write_exec(&self, apply: impl FnOnce(&mut ExecCache)) {
        let mut inner = self.inner.write().expect("fork lock poisoned");
        apply(&mut inner.cache);
    }

    fn backfill_account(&self, address: Address, apply: impl FnOnce(&mut AccountEntry)) {
        let mut lru = self.account_lru.lock().expect("fork lock poisoned");
        let entry = lru.get_or_insert_mut(address, AccountEntry::default);
        apply(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn test_context(number: u64) -> BlockContext {
        BlockContext {
            number,
            timestamp: 1_708_617_600,
            coinbase: Address::ZERO,
            difficulty: U256::ZERO,
            gas_limit: 30_000_000,
            base_fee: 0,
        }
    }

    const ADDR: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    #[test]
    fn offline_reads_default_to_empty() {
        let fork = ForkedState::offline(test_context(18_000_000));
        assert_eq!(fork.get_balance(ADDR).expect("balance"), U256::ZERO);
        assert_eq!(fork.get_nonce(ADDR).expect("nonce"), 0);
        assert_eq!(fork.get_code(ADDR).expect("code"), Bytes::new());
        assert_eq!(
            fork.get_storage(ADDR, U256::from(1)).expect("storage"),
            U256::ZERO
        );
    }

    #[test]
    fn writes_hit_tier_one_only_and_reads_see_them() {
        let fork = ForkedState::offline(test_context(18_000_000));
        fork.set_balance(ADDR, U256::from(1000));
        fork.set_storage(ADDR, U256::from(7), U256::from(42));

        assert_eq!(fork.get_balance(ADDR).expect("balance"), U256::from(1000));
        assert_eq!(
            fork.get_storage(ADDR, U256::from(7)).expect("storage"),
            U256::from(42)
        );
        // Historical tiers untouched by writes.
        assert!(fork
            .account_lru
            .lock()
            .unwrap()
            .get(&ADDR)
            .and_then(|e| e.balance)
            .is_none());
    }

    #[test]
    fn repeated_storage_reads_are_stable() {
        let fork = ForkedState::offline(test_context(18_000_000));
        let first = fork.get_storage(ADDR, U256::from(3)).expect("read");
        for _ in 0..5 {
            assert_eq!(fork.get_storage(ADDR, U256::from(3)).expect("read"), first);
        }
    }

    #[test]
    fn snapshot_revert_restores_exact_state() {
        let fork = ForkedState::offline(test_context(18_000_000));
        fork.set_balance(ADDR, U256::from(1000));
        fork.set_storage(ADDR, U256::from(1), U256::from(1));

        let handle = fork.snapshot();
        let saved = fork.inner.read().unwrap().cache.clone();

        fork.set_balance(ADDR, U256::from(2000));
        fork.set_nonce(ADDR, 5);
        fork.set_storage(ADDR, U256::from(1), U256::from(99));
        fork.set_storage(ADDR, U256::from(2), U256::from(7));

        fork.revert_to(handle).expect("revert");
        assert_eq!(fork.inner.read().unwrap().cache, saved);
        assert_eq!(fork.get_balance(ADDR).expect("balance"), U256::from(1000));
    }

    #[test]
    fn snapshot_revert_is_idempotent_across_cycles() {
        let fork = ForkedState::offline(test_context(0)); // genesis fork is permitted
        fork.set_balance(ADDR, U256::from(1));
        let baseline = fork.inner.read().unwrap().cache.clone();

        for _ in 0..3 {
            let handle = fork.snapshot();
            fork.revert_to(handle).expect("revert");
            assert_eq!(fork.inner.read().unwrap().cache, baseline);
        }
    }

    #[test]
    fn revert_invalidates_later_handles() {
        let fork = ForkedState::offline(test_context(18_000_000));
        let first = fork.snapshot();
        fork.set_balance(ADDR, U256::from(1));
        let second = fork.snapshot();
        fork.set_balance(ADDR, U256::from(2));

        fork.revert_to(first).expect("revert to first");
        assert!(
            matches!(fork.revert_to(second), Err(StateError::InvalidSnapshot(_))),
            "handles pushed after the revert target must be dead"
        );
    }

    #[test]
    fn commit_snapshot_keeps_mutations() {
        let fork = ForkedState::offline(test_context(18_000_000));
        let handle = fork.snapshot();
        fork.set_balance(ADDR, U256::from(123));
        fork.commit_snapshot(handle);

        assert_eq!(fork.get_balance(ADDR).expect("balance"), U256::from(123));
        assert!(fork.inner.read().unwrap().snapshots.is_empty());
        assert!(matches!(
            fork.revert_to(handle),
            Err(StateError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn cache_stats_start_at_zero() {
        let fork = ForkedState::offline(test_context(18_000_000));
        assert_eq!(fork.cache_stats(), CacheStatsSnapshot::default());
    }
}
