//! Block submission: pushes stored blocks to the ledger one height at a time

use crate::error::ChainError;
use crate::ledger::{Ledger, LedgerBlock, Receipt, LEDGER_EMPTY};
use crate::persistence::Database;
use crate::scheduler::{self, PeriodGate, PeriodicTask};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Height to submit next, given the ledger's last height and the highest stored height.
pub fn select_candidate(ledger_last: u64, storage_last: u64) -> Option<u64> {
    if ledger_last == LEDGER_EMPTY {
        Some(0)
    } else if storage_last > ledger_last {
        Some(ledger_last + 1)
    } else {
        None
    }
}

pub struct SubmitterDeps {
    pub db: Arc<Database>,
    pub ledger: Arc<dyn Ledger>,
}

pub struct BlockSubmitter {
    deps: SubmitterDeps,
    gate: PeriodGate,
    prune_submitted: bool,
}

impl BlockSubmitter {
    pub fn new(deps: SubmitterDeps, interval: u64, now: u64) -> Self {
        BlockSubmitter {
            deps,
            gate: PeriodGate::new(interval, now),
            prune_submitted: false,
        }
    }

    /// Delete blocks below each confirmed height.
    pub fn with_pruning(mut self, prune_submitted: bool) -> Self {
        self.prune_submitted = prune_submitted;
        self
    }

    /// Runs one scheduler tick at time `now`. Returns the receipt of a confirmed submission.
    pub async fn tick(&mut self, now: u64) -> Result<Option<Receipt>, ChainError> {
        if !self.gate.check(now) {
            return Ok(None);
        }
        self.submit_next().await
    }

    async fn submit_next(&mut self) -> Result<Option<Receipt>, ChainError> {
        let ledger_last = self.deps.ledger.get_last_height().await?;
        let storage_last = match self.deps.db.select_last_height()? {
            Some(height) => height,
            None => {
                debug!("No block data in DB");
                return Ok(None);
            }
        };

        let height = match select_candidate(ledger_last, storage_last) {
            Some(height) => height,
            None => {
                info!(
                    ledger_last,
                    storage_last, "The last block height of the DB is not above the ledger"
                );
                return Ok(None);
            }
        };

        let stored = match self.deps.db.select_block_by_height(height)? {
            Some(stored) => stored,
            None => {
                warn!(height, "This block is not in the DB");
                return Ok(None);
            }
        };

        match self.deps.ledger.add(&LedgerBlock::from(stored)).await {
            Ok(receipt) => {
                info!(height, tx = %receipt.tx_id, "Successful in adding block to the ledger");
                if self.prune_submitted {
                    let pruned = self.deps.db.delete_blocks_below(height)?;
                    debug!(height, pruned, "Pruned submitted blocks");
                }
                Ok(Some(receipt))
            }
            Err(ChainError::StaleCandidate(msg)) => {
                warn!(height, "Ledger rejected a stale candidate: {}", msg);
                Err(ChainError::StaleCandidate(msg))
            }
            Err(e) => {
                self.deps.ledger.reset_nonce().await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl PeriodicTask for BlockSubmitter {
    fn name(&self) -> &'static str {
        "block_submitter"
    }

    async fn work(&mut self) -> Result<(), ChainError> {
        self.tick(scheduler::now()).await.map(|_| ())
    }
}
