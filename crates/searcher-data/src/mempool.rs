//! Read-only interface over the mempool corpus.
//!
//! The `mempool_txs` table is produced by the external ingestion
//! pipeline; this module only consumes it. The core query reconstructs
//! the mempool as it stood when a block was built: every transaction
//! observed strictly before that block's timestamp.

use std::sync::Mutex;

use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Decodable2718;
use eyre::{Context, Result};
use rusqlite::Connection;

pub struct MempoolDb {
    conn: Mutex<Connection>,
}

impl MempoolDb {
    /// Opens the corpus database and verifies the ingester has run.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or the
    /// `mempool_txs` table is missing.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).wrap_err("failed to open mempool db")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .wrap_err("failed to enable WAL")?;

        conn.query_row("SELECT COUNT(*) FROM mempool_txs LIMIT 1", [], |row| {
            row.get::<_, i64>(0)
        })
        .wrap_err("mempool_txs table not found; run the ingester first")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Returns every signed transaction observed strictly before block
    /// `block_number`'s timestamp, oldest first.
    ///
    /// Rows whose raw bytes fail to decode are skipped with a debug log;
    /// a partially corrupt corpus should not sink a whole backtest.
    ///
    /// # Errors
    /// Returns error if `block_number` is absent from the corpus or the
    /// query fails.
    pub fn mempool_for_block(&self, block_number: u64) -> Result<Vec<TxEnvelope>> {
        let conn = self.conn.lock().expect("mempool lock poisoned");

        let block_timestamp: i64 = conn
            .query_row(
                "SELECT included_block_timestamp FROM mempool_txs
                 WHERE included_block = ?1 AND included_block_timestamp IS NOT NULL
                 LIMIT 1",
                rusqlite::params![block_number],
                |row| row.get(0),
            )
            .wrap_err_with(|| format!("block {block_number} not found in mempool corpus"))?;

        let mut stmt = conn.prepare(
            "SELECT raw_tx FROM mempool_txs WHERE timestamp < ?1 ORDER BY timestamp ASC",
        )?;
        let raw_rows = stmt
            .query_map(rusqlite::params![block_timestamp], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut txs = Vec::with_capacity(raw_rows.len());
        let mut skipped = 0usize;
        for raw_hex in raw_rows {
            let Ok(raw) = alloy::hex::decode(raw_hex.trim_start_matches("0x")) else {
                skipped += 1;
                continue;
            };
            match TxEnvelope::decode_2718(&mut raw.as_slice()) {
                Ok(tx) => txs.push(tx),
                Err(err) => {
                    tracing::debug!(%err, "skipping undecodable mempool transaction");
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            tracing::debug!(
                block_number,
                skipped,
                decoded = txs.len(),
                "mempool rows skipped during decode"
            );
        }

        Ok(txs)
    }

    /// Corpus statistics: `(total_txs, blocks_covered)`.
    pub fn stats(&self) -> Result<(u64, u64)> {
        let conn = self.conn.lock().expect("mempool lock poisoned");
        let total: u64 = conn.query_row("SELECT COUNT(*) FROM mempool_txs", [], |row| row.get(0))?;
        let blocks: u64 = conn.query_row(
            "SELECT COUNT(DISTINCT included_block) FROM mempool_txs",
            [],
            |row| row.get(0),
        )?;
        Ok((total, blocks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::consensus::{SignableTransaction, TxLegacy};
    use alloy::eips::eip2718::Encodable2718;
    use alloy::network::TxSignerSync;
    use alloy::primitives::{address, Bytes, TxKind, U256};
    use alloy::signers::local::PrivateKeySigner;

    fn ingester_schema(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE mempool_txs (
                tx_hash TEXT PRIMARY KEY,
                timestamp INTEGER,
                included_block INTEGER,
                included_block_timestamp INTEGER,
                raw_tx TEXT,
                gas_price TEXT,
                tx_to TEXT,
                tx_value TEXT
            );",
        )
        .expect("create ingester schema");
    }

    fn signed_raw_tx(nonce: u64) -> (String, TxEnvelope) {
        let signer = PrivateKeySigner::random();
        let mut tx = TxLegacy {
            chain_id: Some(1),
            nonce,
            gas_price: 30_000_000_000,
            gas_limit: 21_000,
            to: TxKind::Call(address!("70997970C51812dc3A010C7d01b50e0d17dc79C8")),
            value: U256::from(1),
            input: Bytes::new(),
        };
        let signature = signer.sign_transaction_sync(&mut tx).expect("sign");
        let envelope = TxEnvelope::Legacy(tx.into_signed(signature));
        let raw = alloy::hex::encode_prefixed(envelope.encoded_2718());
        (raw, envelope)
    }

    fn open_with_schema(path: &str) -> MempoolDb {
        {
            let conn = Connection::open(path).expect("open raw");
            ingester_schema(&conn);
        }
        MempoolDb::open(path).expect("open mempool db")
    }

    #[test]
    fn open_requires_ingested_table() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("empty.db");
        let result = MempoolDb::open(path.to_str().unwrap());
        assert!(result.is_err(), "missing table should be rejected");
    }

    #[test]
    fn mempool_for_block_filters_by_timestamp() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("mempool.db");
        let db = open_with_schema(path.to_str().unwrap());

        let (raw_early, envelope_early) = signed_raw_tx(0);
        let (raw_late, _) = signed_raw_tx(1);
        {
            let conn = db.conn.lock().unwrap();
            // Block 100 was mined at t=2000; one tx seen before, one after.
            conn.execute(
                "INSERT INTO mempool_txs (tx_hash, timestamp, included_block, included_block_timestamp, raw_tx)
                 VALUES ('0x01', 1500, 100, 2000, ?1)",
                rusqlite::params![raw_early],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO mempool_txs (tx_hash, timestamp, included_block, included_block_timestamp, raw_tx)
                 VALUES ('0x02', 2500, 101, 2012, ?1)",
                rusqlite::params![raw_late],
            )
            .unwrap();
        }

        let txs = db.mempool_for_block(100).expect("query mempool");
        assert_eq!(txs.len(), 1, "only the pre-block tx qualifies");
        assert_eq!(txs[0].tx_hash(), envelope_early.tx_hash());

        assert!(db.mempool_for_block(999).is_err(), "unknown block fails");
    }

    #[test]
    fn undecodable_rows_are_skipped() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("mempool.db");
        let db = open_with_schema(path.to_str().unwrap());

        let (raw, _) = signed_raw_tx(0);
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO mempool_txs (tx_hash, timestamp, included_block, included_block_timestamp, raw_tx)
                 VALUES ('0x01', 1000, 100, 2000, '0xdeadbeef')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO mempool_txs (tx_hash, timestamp, included_block, included_block_timestamp, raw_tx)
                 VALUES ('0x02', 1001, 100, 2000, ?1)",
                rusqlite::params![raw],
            )
            .unwrap();
        }

        let txs = db.mempool_for_block(100).expect("query mempool");
        assert_eq!(txs.len(), 1, "garbage row skipped, valid row decoded");

        let (total, blocks) = db.stats().expect("stats");
        assert_eq!(total, 2);
        assert_eq!(blocks, 1);
    }
}
