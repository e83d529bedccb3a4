//! SQLite persistence for produced blocks, pooled transactions and node settings

use crate::block::Block;
use crate::error::ChainError;
use crate::hash::Hash;
use crate::transaction::{Transaction, TxState};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Mutex, MutexGuard};

const LAST_RECEIVE_SEQUENCE: &str = "last_receive_sequence";

/// A block row as the submitter sees it: the header fields plus the content id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub height: u64,
    pub cur_block: Hash,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    pub timestamp: u64,
    pub cid: String,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blocks (
                height INTEGER PRIMARY KEY,
                cur_block TEXT NOT NULL,
                prev_block TEXT NOT NULL,
                merkle_root TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                cid TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS blocks_cur_block ON blocks (cur_block);

            CREATE TABLE IF NOT EXISTS tx (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sequence INTEGER NOT NULL,
                trade_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                state TEXT NOT NULL,
                amount TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                exchange_user_id TEXT NOT NULL,
                exchange_id TEXT NOT NULL,
                signer TEXT NOT NULL,
                signature TEXT NOT NULL,
                hash TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS setting (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create tables: {}", e)))?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ChainError> {
        self.conn
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))
    }

    // Blocks

    /// Stores a produced block under its height. A height can only be written once.
    pub fn insert_block(&self, block: &Block, cid: &str) -> Result<(), ChainError> {
        if cid.is_empty() {
            return Err(ChainError::DatabaseError(
                "Refusing to store a block without a content id".to_string(),
            ));
        }

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO blocks (height, cur_block, prev_block, merkle_root, timestamp, cid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                block.header.height as i64,
                block.hash().to_hex(),
                block.header.prev_block.to_hex(),
                block.header.merkle_root.to_hex(),
                block.header.timestamp as i64,
                cid,
            ],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!(
                "Failed to save block {}: {}",
                block.header.height, e
            ))
        })?;

        Ok(())
    }

    pub fn select_block_by_height(&self, height: u64) -> Result<Option<StoredBlock>, ChainError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT height, cur_block, prev_block, merkle_root, timestamp, cid
             FROM blocks WHERE height = ?1",
            params![height as i64],
            stored_block_from_row,
        )
        .optional()
        .map_err(|e| ChainError::DatabaseError(format!("Failed to load block {}: {}", height, e)))
    }

    /// Highest stored height, `None` when no block has been stored yet.
    pub fn select_last_height(&self) -> Result<Option<u64>, ChainError> {
        let conn = self.lock()?;
        let height: Option<i64> = conn
            .query_row("SELECT MAX(height) FROM blocks", [], |row| row.get(0))
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query last height: {}", e)))?;
        Ok(height.map(|h| h as u64))
    }

    pub fn select_last_block(&self) -> Result<Option<StoredBlock>, ChainError> {
        match self.select_last_height()? {
            Some(height) => self.select_block_by_height(height),
            None => Ok(None),
        }
    }

    /// Drops every block strictly below `height`. Returns the number of rows removed.
    pub fn delete_blocks_below(&self, height: u64) -> Result<usize, ChainError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM blocks WHERE height < ?1", params![height as i64])
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prune blocks: {}", e)))
    }

    // Pooled transactions

    /// Appends transactions in order; ones whose hash is already stored are skipped.
    /// Returns how many rows were actually inserted.
    pub fn insert_txs(&self, txs: &[Transaction]) -> Result<usize, ChainError> {
        if txs.is_empty() {
            return Err(ChainError::DatabaseError(
                "insert_txs called with no transactions".to_string(),
            ));
        }

        let conn = self.lock()?;
        let db_tx = conn.unchecked_transaction().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to start transaction: {}", e))
        })?;

        let mut inserted = 0;
        {
            let mut stmt = db_tx.prepare(
                "INSERT OR IGNORE INTO tx (sequence, trade_id, user_id, state, amount, timestamp,
                    exchange_user_id, exchange_id, signer, signature, hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for tx in txs {
                inserted += stmt
                    .execute(params![
                        tx.sequence as i64,
                        tx.trade_id,
                        tx.user_id,
                        tx.state.as_str(),
                        tx.amount.to_string(),
                        tx.timestamp as i64,
                        tx.exchange_user_id,
                        tx.exchange_id,
                        tx.signer,
                        tx.signature,
                        tx.hash().to_hex(),
                    ])
                    .map_err(|e| {
                        ChainError::DatabaseError(format!("Failed to save transaction: {}", e))
                    })?;
            }
        }

        db_tx.commit().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(inserted)
    }

    /// Oldest `limit` transactions in arrival order.
    pub fn select_txs(&self, limit: usize) -> Result<Vec<Transaction>, ChainError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT sequence, trade_id, user_id, state, amount, timestamp,
                    exchange_user_id, exchange_id, signer, signature
             FROM tx ORDER BY id ASC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], transaction_from_row)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query transactions: {}", e)))?;

        let mut txs = Vec::new();
        for row in rows {
            txs.push(row.map_err(|e| {
                ChainError::DatabaseError(format!("Failed to load transaction: {}", e))
            })?);
        }
        Ok(txs)
    }

    pub fn delete_txs(&self, hashes: &[Hash]) -> Result<usize, ChainError> {
        let conn = self.lock()?;
        let db_tx = conn.unchecked_transaction().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to start transaction: {}", e))
        })?;

        let mut deleted = 0;
        {
            let mut stmt = db_tx.prepare("DELETE FROM tx WHERE hash = ?1")?;
            for hash in hashes {
                deleted += stmt.execute(params![hash.to_hex()])?;
            }
        }

        db_tx.commit().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(deleted)
    }

    pub fn count_txs(&self) -> Result<usize, ChainError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tx", [], |row| row.get(0))
            .map_err(|e| ChainError::DatabaseError(format!("Failed to count transactions: {}", e)))?;
        Ok(count as usize)
    }

    // Settings

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, ChainError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM setting WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| ChainError::DatabaseError(format!("Failed to read setting {}: {}", key, e)))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO setting (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save setting {}: {}", key, e)))?;
        Ok(())
    }

    /// Sequence of the last accepted intake record, `-1` before the first one.
    pub fn get_last_receive_sequence(&self) -> Result<i64, ChainError> {
        match self.get_setting(LAST_RECEIVE_SEQUENCE)? {
            Some(value) => value.parse::<i64>().map_err(|e| {
                ChainError::DatabaseError(format!(
                    "Stored {} is not a number ({}): {}",
                    LAST_RECEIVE_SEQUENCE, value, e
                ))
            }),
            None => Ok(-1),
        }
    }

    pub fn set_last_receive_sequence(&self, sequence: i64) -> Result<(), ChainError> {
        self.set_setting(LAST_RECEIVE_SEQUENCE, &sequence.to_string())
    }
}

fn conversion_error(idx: usize, err: ChainError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn hash_column(row: &Row, idx: usize) -> rusqlite::Result<Hash> {
    let text: String = row.get(idx)?;
    text.parse::<Hash>().map_err(|e| conversion_error(idx, e))
}

fn stored_block_from_row(row: &Row) -> rusqlite::Result<StoredBlock> {
    let height: i64 = row.get(0)?;
    let timestamp: i64 = row.get(4)?;
    Ok(StoredBlock {
        height: height as u64,
        cur_block: hash_column(row, 1)?,
        prev_block: hash_column(row, 2)?,
        merkle_root: hash_column(row, 3)?,
        timestamp: timestamp as u64,
        cid: row.get(5)?,
    })
}

fn transaction_from_row(row: &Row) -> rusqlite::Result<Transaction> {
    let sequence: i64 = row.get(0)?;
    let state: String = row.get(3)?;
    let amount: String = row.get(4)?;
    let timestamp: i64 = row.get(5)?;

    let state = state.parse::<TxState>().map_err(|e| conversion_error(3, e))?;
    let amount = amount.parse::<u64>().map_err(|e| {
        conversion_error(4, ChainError::DatabaseError(format!("Invalid amount: {}", e)))
    })?;

    Ok(Transaction {
        sequence: sequence as u64,
        trade_id: row.get(1)?,
        user_id: row.get(2)?,
        state,
        amount,
        timestamp: timestamp as u32,
        exchange_user_id: row.get(6)?,
        exchange_id: row.get(7)?,
        signer: row.get(8)?,
        signature: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(trade_id: &str) -> Transaction {
        Transaction::new(
            trade_id,
            "0x064c9Fc53d5936792845ca58778a52317fCf47F2",
            TxState::Discharge,
            250,
            1668044556,
            "997DE626B2D417F0361D61C09EB907A57226DB5B",
            "a5c19fed89739383",
        )
        .with_signature("0x02aa", "0xbb")
    }

    #[test]
    fn test_database_open() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.conn.lock().unwrap().is_autocommit());
        assert_eq!(db.select_last_height().unwrap(), None);
        assert_eq!(db.count_txs().unwrap(), 0);
    }

    #[test]
    fn test_insert_and_select_block() {
        let db = Database::open(":memory:").unwrap();
        let block = Block::create(Hash::NULL, None, vec![tx("1"), tx("2")], 1669702553);
        db.insert_block(&block, "QmGenesis").unwrap();

        let stored = db.select_block_by_height(0).unwrap().unwrap();
        assert_eq!(stored.cur_block, block.hash());
        assert_eq!(stored.prev_block, Hash::NULL);
        assert_eq!(stored.merkle_root, block.header.merkle_root);
        assert_eq!(stored.timestamp, 1669702553);
        assert_eq!(stored.cid, "QmGenesis");

        assert_eq!(db.select_last_height().unwrap(), Some(0));
        assert_eq!(db.select_block_by_height(1).unwrap(), None);
    }

    #[test]
    fn test_block_height_is_written_once() {
        let db = Database::open(":memory:").unwrap();
        let block = Block::create(Hash::NULL, None, vec![], 1);
        db.insert_block(&block, "cid-a").unwrap();
        assert!(db.insert_block(&block, "cid-b").is_err());
        assert_eq!(db.select_block_by_height(0).unwrap().unwrap().cid, "cid-a");
    }

    #[test]
    fn test_empty_cid_is_rejected() {
        let db = Database::open(":memory:").unwrap();
        let block = Block::create(Hash::NULL, None, vec![], 1);
        assert!(db.insert_block(&block, "").is_err());
        assert_eq!(db.select_last_height().unwrap(), None);
    }

    #[test]
    fn test_delete_blocks_below() {
        let db = Database::open(":memory:").unwrap();
        let mut prev: Option<Block> = None;
        for ts in 0..5u64 {
            let block = match &prev {
                Some(p) => Block::create(p.hash(), Some(p.header.height), vec![], ts),
                None => Block::create(Hash::NULL, None, vec![], ts),
            };
            db.insert_block(&block, &format!("cid-{}", ts)).unwrap();
            prev = Some(block);
        }

        assert_eq!(db.delete_blocks_below(3).unwrap(), 3);
        assert_eq!(db.select_block_by_height(2).unwrap(), None);
        assert!(db.select_block_by_height(3).unwrap().is_some());
        assert_eq!(db.select_last_block().unwrap().unwrap().height, 4);
    }

    #[test]
    fn test_transactions_fifo_and_dedup() {
        let db = Database::open(":memory:").unwrap();
        assert_eq!(db.insert_txs(&[tx("a"), tx("b")]).unwrap(), 2);
        assert_eq!(db.insert_txs(&[tx("a"), tx("c")]).unwrap(), 1);
        assert_eq!(db.count_txs().unwrap(), 3);

        let ids: Vec<String> = db
            .select_txs(10)
            .unwrap()
            .into_iter()
            .map(|t| t.trade_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(db.select_txs(0).unwrap().is_empty());
        assert_eq!(db.select_txs(1).unwrap()[0], tx("a"));

        assert!(db.insert_txs(&[]).is_err());
    }

    #[test]
    fn test_delete_txs_by_hash() {
        let db = Database::open(":memory:").unwrap();
        db.insert_txs(&[tx("a"), tx("b"), tx("c")]).unwrap();
        assert_eq!(db.delete_txs(&[tx("a").hash(), tx("c").hash()]).unwrap(), 2);
        let remaining = db.select_txs(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].trade_id, "b");
    }

    #[test]
    fn test_settings() {
        let db = Database::open(":memory:").unwrap();
        assert_eq!(db.get_setting("missing").unwrap(), None);
        assert_eq!(db.get_last_receive_sequence().unwrap(), -1);

        db.set_last_receive_sequence(0).unwrap();
        db.set_last_receive_sequence(41).unwrap();
        assert_eq!(db.get_last_receive_sequence().unwrap(), 41);

        db.set_setting(LAST_RECEIVE_SEQUENCE, "garbage").unwrap();
        assert!(db.get_last_receive_sequence().is_err());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollup.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::open(path).unwrap();
            db.insert_txs(&[tx("persisted")]).unwrap();
            db.insert_block(&Block::create(Hash::NULL, None, vec![], 7), "cid").unwrap();
            db.set_last_receive_sequence(3).unwrap();
        }

        let db = Database::open(path).unwrap();
        assert_eq!(db.select_txs(5).unwrap()[0].trade_id, "persisted");
        assert_eq!(db.select_last_height().unwrap(), Some(0));
        assert_eq!(db.get_last_receive_sequence().unwrap(), 3);
    }
}
