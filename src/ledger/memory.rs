/// In-process ledger enforcing the same admission rules as the deployed contract
use super::{Ledger, LedgerBlock, Receipt, LEDGER_EMPTY};
use crate::error::ChainError;
use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Default)]
struct State {
    blocks: Vec<LedgerBlock>,
    nonce: u64,
    nonce_resets: usize,
    unavailable: bool,
    fail_next_add: Option<ChainError>,
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail as if the ledger could not be reached.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// The next `add` returns `err` without touching the ledger.
    pub fn fail_next_add(&self, err: ChainError) {
        self.state.lock().fail_next_add = Some(err);
    }

    pub fn nonce_resets(&self) -> usize {
        self.state.lock().nonce_resets
    }

    pub fn len(&self) -> usize {
        self.state.lock().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn blocks(&self) -> Vec<LedgerBlock> {
        self.state.lock().blocks.clone()
    }

    fn check_available(state: &State) -> Result<(), ChainError> {
        if state.unavailable {
            return Err(ChainError::LedgerError("Ledger unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get_last_height(&self) -> Result<u64, ChainError> {
        let state = self.state.lock();
        Self::check_available(&state)?;
        Ok(match state.blocks.len() {
            0 => LEDGER_EMPTY,
            n => (n - 1) as u64,
        })
    }

    async fn get_by_height(&self, height: u64) -> Result<LedgerBlock, ChainError> {
        let state = self.state.lock();
        Self::check_available(&state)?;
        state
            .blocks
            .get(height as usize)
            .cloned()
            .ok_or_else(|| ChainError::LedgerError(format!("No block at height {}", height)))
    }

    async fn add(&self, block: &LedgerBlock) -> Result<Receipt, ChainError> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        if let Some(err) = state.fail_next_add.take() {
            return Err(err);
        }

        let expected = state.blocks.len() as u64;
        if block.height != expected {
            return Err(ChainError::StaleCandidate(format!(
                "height {} is not the next height {}",
                block.height, expected
            )));
        }
        if let Some(parent) = state.blocks.last() {
            if parent.cur_block != block.prev_block {
                return Err(ChainError::StaleCandidate(format!(
                    "prev_block {} does not match {} at height {}",
                    block.prev_block, parent.cur_block, parent.height
                )));
            }
        }

        state.blocks.push(block.clone());
        state.nonce += 1;
        Ok(Receipt {
            tx_id: format!("memory-{}", state.nonce),
            height: block.height,
        })
    }

    async fn reset_nonce(&self) {
        self.state.lock().nonce_resets += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash, Hash};

    fn ledger_block(height: u64, prev: Hash) -> LedgerBlock {
        LedgerBlock {
            height,
            cur_block: hash(&height.to_le_bytes()),
            prev_block: prev,
            merkle_root: Hash::NULL,
            timestamp: 1669702553 + height,
            content_id: format!("cid-{}", height),
        }
    }

    #[tokio::test]
    async fn test_accepts_blocks_in_order() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.get_last_height().await.unwrap(), LEDGER_EMPTY);

        let b0 = ledger_block(0, Hash::NULL);
        let b1 = ledger_block(1, b0.cur_block);
        ledger.add(&b0).await.unwrap();
        let receipt = ledger.add(&b1).await.unwrap();

        assert_eq!(receipt.height, 1);
        assert_eq!(ledger.get_last_height().await.unwrap(), 1);
        assert_eq!(ledger.get_by_height(1).await.unwrap(), b1);
        assert!(ledger.get_by_height(2).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_out_of_order_and_wrong_parent() {
        let ledger = MemoryLedger::new();
        let b0 = ledger_block(0, Hash::NULL);
        ledger.add(&b0).await.unwrap();

        let err = ledger.add(&b0).await.unwrap_err();
        assert!(matches!(err, ChainError::StaleCandidate(_)));

        let skipped = ledger_block(2, b0.cur_block);
        assert!(matches!(
            ledger.add(&skipped).await.unwrap_err(),
            ChainError::StaleCandidate(_)
        ));

        let orphan = ledger_block(1, Hash::NULL);
        assert!(matches!(
            ledger.add(&orphan).await.unwrap_err(),
            ChainError::StaleCandidate(_)
        ));
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let ledger = MemoryLedger::new();
        ledger.set_unavailable(true);
        assert!(ledger.get_last_height().await.is_err());
        ledger.set_unavailable(false);

        ledger.fail_next_add(ChainError::LedgerError("nonce too low".to_string()));
        let b0 = ledger_block(0, Hash::NULL);
        assert!(ledger.add(&b0).await.is_err());
        assert!(ledger.add(&b0).await.is_ok());

        ledger.reset_nonce().await;
        assert_eq!(ledger.nonce_resets(), 1);
    }
}
