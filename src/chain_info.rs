//! Recovery of the chain tip at startup from local storage and the ledger

use crate::error::ChainError;
use crate::hash::Hash;
use crate::ledger::{Ledger, LEDGER_EMPTY};
use crate::persistence::Database;
use tracing::{debug, warn};

/// Height and hash of the most recent block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastBlockInfo {
    pub height: u64,
    pub hash: Hash,
}

impl LastBlockInfo {
    /// Last block stored locally, `None` if storage is empty or unreadable.
    pub fn from_storage(db: &Database) -> Option<Self> {
        match db.select_last_block() {
            Ok(Some(block)) => Some(LastBlockInfo {
                height: block.height,
                hash: block.cur_block,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read the last block from storage: {}", e);
                None
            }
        }
    }

    /// Last block committed to the ledger, `None` if it is empty or unreachable.
    pub async fn from_ledger(ledger: &dyn Ledger) -> Option<Self> {
        match Self::query_ledger(ledger).await {
            Ok(info) => info,
            Err(e) => {
                warn!("Failed to read the last block from the ledger: {}", e);
                None
            }
        }
    }

    /// Like [`LastBlockInfo::from_ledger`], but keeps an unreachable ledger apart from
    /// an empty one.
    pub async fn query_ledger(ledger: &dyn Ledger) -> Result<Option<Self>, ChainError> {
        let height = match ledger.get_last_height().await? {
            LEDGER_EMPTY => return Ok(None),
            height => height,
        };
        let block = ledger.get_by_height(height).await?;
        Ok(Some(LastBlockInfo {
            height,
            hash: block.cur_block,
        }))
    }

    /// Picks the authoritative tip. The higher block wins and the ledger wins ties.
    pub fn choose(storage: Option<Self>, ledger: Option<Self>) -> Option<Self> {
        match (storage, ledger) {
            (None, ledger) => ledger,
            (storage, None) => storage,
            (Some(storage), Some(ledger)) => {
                if ledger.height >= storage.height {
                    Some(ledger)
                } else {
                    Some(storage)
                }
            }
        }
    }

    pub async fn resolve(db: &Database, ledger: &dyn Ledger) -> Option<Self> {
        let storage = Self::from_storage(db);
        let remote = Self::from_ledger(ledger).await;
        debug!(?storage, ?remote, "Resolving last block");
        Self::choose(storage, remote)
    }
}
