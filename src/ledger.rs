//! Remote ledger that blocks are finally committed to
//!
//! The ledger accepts block headers strictly in height order and only when
//! `prev_block` matches the hash it recorded at `height - 1`.

pub mod memory;
pub mod rpc;

pub use memory::MemoryLedger;
pub use rpc::RpcLedger;

use crate::error::ChainError;
use crate::hash::Hash;
use crate::persistence::StoredBlock;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Height reported by a ledger that holds no block yet.
pub const LEDGER_EMPTY: u64 = u64::MAX;

/// Header fields as recorded on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBlock {
    pub height: u64,
    pub cur_block: Hash,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    pub timestamp: u64,
    pub content_id: String,
}

impl From<StoredBlock> for LedgerBlock {
    fn from(stored: StoredBlock) -> Self {
        LedgerBlock {
            height: stored.height,
            cur_block: stored.cur_block,
            prev_block: stored.prev_block,
            merkle_root: stored.merkle_root,
            timestamp: stored.timestamp,
            content_id: stored.cid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_id: String,
    pub height: u64,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Last committed height, [`LEDGER_EMPTY`] when nothing is committed.
    async fn get_last_height(&self) -> Result<u64, ChainError>;

    async fn get_by_height(&self, height: u64) -> Result<LedgerBlock, ChainError>;

    /// Commits `block`. Fails with [`ChainError::StaleCandidate`] when the ledger
    /// already moved past the block or its parent does not match.
    async fn add(&self, block: &LedgerBlock) -> Result<Receipt, ChainError>;

    /// Forgets any locally tracked nonce so the next `add` starts from the ledger's view.
    async fn reset_nonce(&self);
}
