//! SQLite-backed persistent cache of historical chain state.
//!
//! Keys are `(block, address)` for account fields and
//! `(block, address, slot)` for storage words. Entries are immutable once
//! written for a given block, so reads never need invalidation. WAL mode
//! keeps concurrent readers cheap while one writer upserts.
//!
//! Reads never fail observably: any I/O or parse error degrades to a
//! cache miss and the caller falls through to the next tier.

use std::path::Path;
use std::sync::Mutex;

use alloy::primitives::{Address, Bytes, U256};
use eyre::{Context, Result};
use rusqlite::Connection;

use crate::client::AccountSnapshot;

/// Durable key-value store for account and storage state.
///
/// The connection sits behind a mutex so a single store can be shared by
/// every forked-state instance in the process.
pub struct StateCacheDb {
    conn: Mutex<Connection>,
}

fn word_hex(value: U256) -> String {
    format!("0x{value:064x}")
}

fn parse_word(text: &str) -> Option<U256> {
    U256::from_str_radix(text.trim_start_matches("0x"), 16).ok()
}

impl StateCacheDb {
    /// Opens (or creates) the cache database at `path` with WAL enabled
    /// and the schema migrated. `:memory:` is accepted for tests.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrations fail.
    pub fn new(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .wrap_err_with(|| format!("failed to create cache dir {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path).wrap_err("failed to open state cache db")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .wrap_err("failed to enable WAL")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.lock().expect("state cache lock poisoned").execute_batch(
            "
            CREATE TABLE IF NOT EXISTS account_state (
                block_number INTEGER NOT NULL,
                address TEXT NOT NULL,
                balance TEXT,
                nonce INTEGER,
                code BLOB,
                PRIMARY KEY (block_number, address)
            );

            CREATE TABLE IF NOT EXISTS storage_state (
                block_number INTEGER NOT NULL,
                address TEXT NOT NULL,
                slot TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (block_number, address, slot)
            );
            ",
        )?;
        Ok(())
    }

    /// Cached balance, or `None` on miss. Balance is stored as decimal text.
    pub fn balance(&self, block_number: u64, address: Address) -> Option<U256> {
        let conn = self.conn.lock().expect("state cache lock poisoned");
        let text: String = conn
            .query_row(
                "SELECT balance FROM account_state WHERE block_number = ?1 AND address = ?2",
                rusqlite::params![block_number, address.to_checksum(None)],
                |row| row.get(0),
            )
            .ok()?;
        U256::from_str_radix(&text, 10).ok()
    }

    /// Upserts the balance without disturbing a cached nonce or code for
    /// the same row.
    pub fn set_balance(&self, block_number: u64, address: Address, balance: U256) -> Result<()> {
        self.conn.lock().expect("state cache lock poisoned").execute(
            "INSERT INTO account_state (block_number, address, balance) VALUES (?1, ?2, ?3)
             ON CONFLICT(block_number, address) DO UPDATE SET balance = excluded.balance",
            rusqlite::params![block_number, address.to_checksum(None), balance.to_string()],
        )?;
        Ok(())
    }

    /// Cached nonce, or `None` on miss.
    pub fn nonce(&self, block_number: u64, address: Address) -> Option<u64> {
        let conn = self.conn.lock().expect("state cache lock poisoned");
        conn.query_row(
            "SELECT nonce FROM account_state WHERE block_number = ?1 AND address = ?2 AND nonce IS NOT NULL",
            rusqlite::params![block_number, address.to_checksum(None)],
            |row| row.get(0),
        )
        .ok()
    }

    pub fn set_nonce(&self, block_number: u64, address: Address, nonce: u64) -> Result<()> {
        self.conn.lock().expect("state cache lock poisoned").execute(
            "INSERT INTO account_state (block_number, address, nonce) VALUES (?1, ?2, ?3)
             ON CONFLICT(block_number, address) DO UPDATE SET nonce = excluded.nonce",
            rusqlite::params![block_number, address.to_checksum(None), nonce],
        )?;
        Ok(())
    }

    /// Cached bytecode, or `None` on miss. Empty code is a valid hit.
    pub fn code(&self, block_number: u64, address: Address) -> Option<Bytes> {
        let conn = self.conn.lock().expect("state cache lock poisoned");
        let blob: Vec<u8> = conn
            .query_row(
                "SELECT code FROM account_state WHERE block_number = ?1 AND address = ?2 AND code IS NOT NULL",
                rusqlite::params![block_number, address.to_checksum(None)],
                |row| row.get(0),
            )
            .ok()?;
        Some(Bytes::from(blob))
    }

    pub fn set_code(&self, block_number: u64, address: Address, code: &Bytes) -> Result<()> {
        self.conn.lock().expect("state cache lock poisoned").execute(
            "INSERT INTO account_state (block_number, address, code) VALUES (?1, ?2, ?3)
             ON CONFLICT(block_number, address) DO UPDATE SET code = excluded.code",
            rusqlite::params![block_number, address.to_checksum(None), code.as_ref()],
        )?;
        Ok(())
    }

    /// Cached storage word, or `None` on miss. Slot and value are stored
    /// as 0x-prefixed 64-nibble hex.
    pub fn storage_value(&self, block_number: u64, address: Address, slot: U256) -> Option<U256> {
        let conn = self.conn.lock().expect("state cache lock poisoned");
        let text: String = conn
            .query_row(
                "SELECT value FROM storage_state WHERE block_number = ?1 AND address = ?2 AND slot = ?3",
                rusqlite::params![block_number, address.to_checksum(None), word_hex(slot)],
                |row| row.get(0),
            )
            .ok()?;
        parse_word(&text)
    }

    pub fn set_storage(
        &self,
        block_number: u64,
        address: Address,
        slot: U256,
        value: U256,
    ) -> Result<()> {
        self.conn.lock().expect("state cache lock poisoned").execute(
            "INSERT INTO storage_state (block_number, address, slot, value) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(block_number, address, slot) DO UPDATE SET value = excluded.value",
            rusqlite::params![
                block_number,
                address.to_checksum(None),
                word_hex(slot),
                word_hex(value)
            ],
        )?;
        Ok(())
    }

    /// Writes a batch of account snapshots atomically (single transaction).
    ///
    /// # Errors
    /// Returns error if the transaction fails; partial writes are rolled
    /// back.
    pub fn batch_put_accounts(
        &self,
        block_number: u64,
        accounts: &[AccountSnapshot],
    ) -> Result<()> {
        let mut conn = self.conn.lock().expect("state cache lock poisoned");
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO account_state (block_number, address, balance, nonce, code)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(block_number, address) DO UPDATE SET
                     balance = excluded.balance,
                     nonce = excluded.nonce,
                     code = excluded.code",
            )?;
            for account in accounts {
                stmt.execute(rusqlite::params![
                    block_number,
                    account.address.to_checksum(None),
                    account.balance.to_string(),
                    account.nonce,
                    account.code.as_ref(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Writes a batch of storage words atomically (single transaction).
    pub fn batch_put_storage(
        &self,
        block_number: u64,
        entries: &[(Address, U256, U256)],
    ) -> Result<()> {
        let mut conn = self.conn.lock().expect("state cache lock poisoned");
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO storage_state (block_number, address, slot, value)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(block_number, address, slot) DO UPDATE SET value = excluded.value",
            )?;
            for (address, slot, value) in entries {
                stmt.execute(rusqlite::params![
                    block_number,
                    address.to_checksum(None),
                    word_hex(*slot),
                    word_hex(*value),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Row counts `(account_entries, storage_entries)` for monitoring.
    pub fn entry_counts(&self) -> Result<(u64, u64)> {
        let conn = self.conn.lock().expect("state cache lock poisoned");
        let accounts: u64 =
            conn.query_row("SELECT COUNT(*) FROM account_state", [], |row| row.get(0))?;
        let storage: u64 =
            conn.query_row("SELECT COUNT(*) FROM storage_state", [], |row| row.get(0))?;
        Ok((accounts, storage))
    }
}
