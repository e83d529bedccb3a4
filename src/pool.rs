//! Storage-backed FIFO pool of transactions waiting to be put into a block

use crate::error::ChainError;
use crate::hash::Hash;
use crate::persistence::Database;
use crate::transaction::Transaction;
use std::sync::Arc;

/// A pooled transaction together with its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub hash: Hash,
    pub tx: Transaction,
}

impl PoolEntry {
    pub fn new(tx: Transaction) -> Self {
        PoolEntry { hash: tx.hash(), tx }
    }
}

impl From<Transaction> for PoolEntry {
    fn from(tx: Transaction) -> Self {
        PoolEntry::new(tx)
    }
}

#[derive(Clone)]
pub struct TransactionPool {
    db: Arc<Database>,
}

impl TransactionPool {
    pub fn new(db: Arc<Database>) -> Self {
        TransactionPool { db }
    }

    /// Adds entries that are not already pooled. Returns the number added.
    pub fn add(&self, entries: &[PoolEntry]) -> Result<usize, ChainError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let txs: Vec<Transaction> = entries.iter().map(|e| e.tx.clone()).collect();
        self.db.insert_txs(&txs)
    }

    pub fn add_tx(&self, tx: Transaction) -> Result<usize, ChainError> {
        self.add(&[PoolEntry::new(tx)])
    }

    /// Up to `count` oldest entries, left in the pool.
    pub fn get(&self, count: usize) -> Result<Vec<PoolEntry>, ChainError> {
        Ok(self
            .db
            .select_txs(count)?
            .into_iter()
            .map(PoolEntry::new)
            .collect())
    }

    pub fn remove(&self, entries: &[PoolEntry]) -> Result<usize, ChainError> {
        let hashes: Vec<Hash> = entries.iter().map(|e| e.hash).collect();
        self.db.delete_txs(&hashes)
    }

    pub fn length(&self) -> Result<usize, ChainError> {
        self.db.count_txs()
    }
}
