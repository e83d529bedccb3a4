//! Block production: once per period, drain the pool into a block, anchor it in the
//! content store, persist it and advance the tip.

use crate::block::Block;
use crate::chain_info::LastBlockInfo;
use crate::content_store::ContentStore;
use crate::error::ChainError;
use crate::hash::Hash;
use crate::ledger::Ledger;
use crate::persistence::Database;
use crate::pool::TransactionPool;
use crate::scheduler::{self, PeriodGate, PeriodicTask};
use crate::transaction::Transaction;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receives every block right after it has been committed.
pub trait BlockExternalizer: Send + Sync {
    fn externalize(&self, block: &Block, cid: &str);
}

/// The block new blocks are built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainTip {
    /// Not looked up yet.
    Unknown,
    /// No block exists anywhere; the next block is genesis.
    Genesis,
    At { hash: Hash, height: u64 },
}

impl From<Option<LastBlockInfo>> for ChainTip {
    fn from(info: Option<LastBlockInfo>) -> Self {
        match info {
            Some(info) => ChainTip::At {
                hash: info.hash,
                height: info.height,
            },
            None => ChainTip::Genesis,
        }
    }
}

pub struct ProducerDeps {
    pub db: Arc<Database>,
    pub pool: TransactionPool,
    pub content_store: Arc<dyn ContentStore>,
    pub ledger: Arc<dyn Ledger>,
}

pub struct BlockProducer {
    deps: ProducerDeps,
    max_txs: usize,
    gate: PeriodGate,
    tip: ChainTip,
    /// Whether the tip has been reconciled with a reachable ledger.
    ledger_checked: bool,
    externalizer: Option<Arc<dyn BlockExternalizer>>,
}

impl BlockProducer {
    /// `interval` is the block period in seconds; `now` seeds the period gate so the
    /// first block is produced at the next period boundary.
    pub fn new(deps: ProducerDeps, interval: u64, max_txs: usize, now: u64) -> Self {
        BlockProducer {
            deps,
            max_txs,
            gate: PeriodGate::new(interval, now),
            tip: ChainTip::Unknown,
            ledger_checked: false,
            externalizer: None,
        }
    }

    pub fn with_externalizer(mut self, externalizer: Arc<dyn BlockExternalizer>) -> Self {
        self.externalizer = Some(externalizer);
        self
    }

    pub fn tip(&self) -> ChainTip {
        self.tip
    }

    /// Adds a received transaction to the pool.
    pub fn receive(&self, tx: Transaction) -> Result<usize, ChainError> {
        self.deps.pool.add_tx(tx)
    }

    /// Reconciles the tip against storage and the ledger.
    ///
    /// When the ledger cannot be reached the storage tip is kept as a provisional
    /// tip and no block is built on it until a later reconciliation succeeds.
    pub async fn resolve_tip(&mut self) -> ChainTip {
        let storage = LastBlockInfo::from_storage(&self.deps.db);
        match LastBlockInfo::query_ledger(self.deps.ledger.as_ref()).await {
            Ok(remote) => {
                self.tip = LastBlockInfo::choose(storage, remote).into();
                self.ledger_checked = true;
                info!(tip = ?self.tip, "Resolved chain tip");
            }
            Err(e) => {
                self.tip = storage.into();
                self.ledger_checked = false;
                warn!(tip = ?self.tip, "Ledger unreachable, chain tip is provisional: {}", e);
            }
        }
        self.tip
    }

    /// Runs one scheduler tick at time `now`. Returns the committed block, if any.
    pub async fn tick(&mut self, now: u64) -> Result<Option<Block>, ChainError> {
        if !self.gate.check(now) {
            return Ok(None);
        }
        self.produce(now).await
    }

    async fn produce(&mut self, now: u64) -> Result<Option<Block>, ChainError> {
        let entries = self.deps.pool.get(self.max_txs)?;
        if entries.is_empty() {
            debug!("No pooled transactions, skipping block");
            return Ok(None);
        }

        if !self.ledger_checked {
            self.resolve_tip().await;
            if !self.ledger_checked {
                return Err(ChainError::LedgerError(
                    "Chain tip is not reconciled with the ledger, skipping block".to_string(),
                ));
            }
        }
        let (prev_hash, prev_height) = match self.tip {
            ChainTip::At { hash, height } => (hash, Some(height)),
            _ => (Hash::NULL, None),
        };

        let txs: Vec<Transaction> = entries.iter().map(|e| e.tx.clone()).collect();
        let block = Block::create(prev_hash, prev_height, txs, now);
        let height = block.header.height;

        let cid = self.deps.content_store.add(block.to_json()?.into_bytes()).await?;
        info!(height, cid = %cid, "Saved block to content store");

        self.deps.db.insert_block(&block, &cid)?;
        info!(height, cid = %cid, "Saved block to DB");

        self.tip = ChainTip::At {
            hash: block.hash(),
            height,
        };
        self.deps.pool.remove(&entries)?;

        if let Some(externalizer) = &self.externalizer {
            externalizer.externalize(&block, &cid);
        }
        Ok(Some(block))
    }
}

#[async_trait]
impl PeriodicTask for BlockProducer {
    fn name(&self) -> &'static str {
        "block_producer"
    }

    async fn on_start(&mut self) -> Result<(), ChainError> {
        self.resolve_tip().await;
        Ok(())
    }

    async fn work(&mut self) -> Result<(), ChainError> {
        self.tick(scheduler::now()).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_store::TestContentStore;
    use crate::ledger::{LedgerBlock, MemoryLedger};
    use crate::transaction::TxState;
    use parking_lot::Mutex;

    struct FailingStore;

    #[async_trait]
    impl ContentStore for FailingStore {
        async fn add(&self, _data: Vec<u8>) -> Result<String, ChainError> {
            Err(ChainError::ContentStoreError("IPFS down".to_string()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(u64, String)>>,
    }

    impl BlockExternalizer for Recorder {
        fn externalize(&self, block: &Block, cid: &str) {
            self.seen.lock().push((block.header.height, cid.to_string()));
        }
    }

    fn tx(n: u32) -> Transaction {
        Transaction::new(
            format!("{:08}", n),
            "0x5Db97BBEad6979AeD57cB9Fb19c78eDB08187436",
            TxState::Charge,
            1_000_000_000,
            1668044556 + n,
            "0x0000000000000000000000000000000000000000",
            "exchange",
        )
    }

    fn deps(content_store: Arc<dyn ContentStore>, ledger: Arc<MemoryLedger>) -> ProducerDeps {
        let db = Arc::new(Database::open(":memory:").unwrap());
        ProducerDeps {
            pool: TransactionPool::new(db.clone()),
            db,
            content_store,
            ledger,
        }
    }

    #[tokio::test]
    async fn test_one_block_per_period() {
        let deps = deps(Arc::new(TestContentStore), Arc::new(MemoryLedger::new()));
        let pool = deps.pool.clone();
        let mut producer = BlockProducer::new(deps, 600, 128, 1200);
        producer.resolve_tip().await;
        assert_eq!(producer.tip(), ChainTip::Genesis);

        for n in 0..3 {
            producer.receive(tx(n)).unwrap();
        }

        let mut produced = Vec::new();
        for now in 1201..=1800 {
            if let Some(block) = producer.tick(now).await.unwrap() {
                produced.push(block);
            }
            if now == 1500 {
                producer.receive(tx(99)).unwrap();
            }
        }

        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].header.height, 0);
        assert_eq!(produced[0].header.timestamp, 1800);
        assert_eq!(produced[0].txs.len(), 4);
        assert_eq!(pool.length().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_blocks_chain_and_respect_max_txs() {
        let deps = deps(Arc::new(TestContentStore), Arc::new(MemoryLedger::new()));
        let db = deps.db.clone();
        let pool = deps.pool.clone();
        let recorder = Arc::new(Recorder::default());
        let mut producer =
            BlockProducer::new(deps, 10, 2, 0).with_externalizer(recorder.clone());

        for n in 0..3 {
            producer.receive(tx(n)).unwrap();
        }

        let first = producer.tick(10).await.unwrap().unwrap();
        assert_eq!(first.txs.len(), 2);
        assert_eq!(pool.length().unwrap(), 1);

        let second = producer.tick(20).await.unwrap().unwrap();
        assert_eq!(second.header.height, 1);
        assert_eq!(second.header.prev_block, first.hash());
        assert_eq!(
            producer.tip(),
            ChainTip::At {
                hash: second.hash(),
                height: 1
            }
        );

        assert!(producer.tick(30).await.unwrap().is_none());

        let seen = recorder.seen.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].0, 1);
        assert_eq!(db.select_block_by_height(1).unwrap().unwrap().cid, seen[1].1);
    }

    #[tokio::test]
    async fn test_content_store_failure_commits_nothing() {
        let deps = deps(Arc::new(FailingStore), Arc::new(MemoryLedger::new()));
        let db = deps.db.clone();
        let pool = deps.pool.clone();
        let recorder = Arc::new(Recorder::default());
        let mut producer =
            BlockProducer::new(deps, 10, 128, 0).with_externalizer(recorder.clone());
        producer.resolve_tip().await;
        producer.receive(tx(1)).unwrap();

        let err = producer.tick(10).await.unwrap_err();
        assert!(matches!(err, ChainError::ContentStoreError(_)));
        assert_eq!(pool.length().unwrap(), 1);
        assert_eq!(producer.tip(), ChainTip::Genesis);
        assert_eq!(db.select_last_height().unwrap(), None);
        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_commits_nothing() {
        let deps = deps(Arc::new(TestContentStore), Arc::new(MemoryLedger::new()));
        let db = deps.db.clone();
        let pool = deps.pool.clone();
        let mut producer = BlockProducer::new(deps, 10, 128, 0);
        producer.resolve_tip().await;

        // Height 0 gets taken after the tip was resolved.
        db.insert_block(&Block::create(Hash::NULL, None, vec![], 5), "other")
            .unwrap();
        producer.receive(tx(1)).unwrap();

        assert!(producer.tick(10).await.is_err());
        assert_eq!(pool.length().unwrap(), 1);
        assert_eq!(producer.tip(), ChainTip::Genesis);
        assert_eq!(db.select_block_by_height(0).unwrap().unwrap().cid, "other");
    }

    #[tokio::test]
    async fn test_unknown_tip_is_recovered_from_storage() {
        let deps = deps(Arc::new(TestContentStore), Arc::new(MemoryLedger::new()));
        let db = deps.db.clone();
        let stored = Block::create(Hash::NULL, Some(3), vec![], 5);
        db.insert_block(&stored, "cid-4").unwrap();

        let mut producer = BlockProducer::new(deps, 10, 128, 0);
        assert_eq!(producer.tip(), ChainTip::Unknown);
        producer.receive(tx(1)).unwrap();

        let block = producer.tick(10).await.unwrap().unwrap();
        assert_eq!(block.header.height, 5);
        assert_eq!(block.header.prev_block, stored.hash());
    }

    #[tokio::test]
    async fn test_ledger_ahead_of_storage_wins() {
        let ledger = Arc::new(MemoryLedger::new());
        let b0 = LedgerBlock {
            height: 0,
            cur_block: crate::hash::hash(b"remote genesis"),
            prev_block: Hash::NULL,
            merkle_root: Hash::NULL,
            timestamp: 1,
            content_id: "cid".to_string(),
        };
        ledger.add(&b0).await.unwrap();

        let mut producer = BlockProducer::new(deps(Arc::new(TestContentStore), ledger), 10, 128, 0);
        assert_eq!(
            producer.resolve_tip().await,
            ChainTip::At {
                hash: b0.cur_block,
                height: 0
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_ledger_at_startup_blocks_production() {
        let ledger = Arc::new(MemoryLedger::new());
        let mut prev = Hash::NULL;
        for height in 0..3u64 {
            let block = LedgerBlock {
                height,
                cur_block: crate::hash::hash(&height.to_le_bytes()),
                prev_block: prev,
                merkle_root: Hash::NULL,
                timestamp: height,
                content_id: format!("cid-{}", height),
            };
            ledger.add(&block).await.unwrap();
            prev = block.cur_block;
        }

        let deps = deps(Arc::new(TestContentStore), ledger.clone());
        let db = deps.db.clone();
        let pool = deps.pool.clone();
        let mut producer = BlockProducer::new(deps, 10, 128, 0);

        ledger.set_unavailable(true);
        assert_eq!(producer.resolve_tip().await, ChainTip::Genesis);
        producer.receive(tx(1)).unwrap();

        let err = producer.tick(10).await.unwrap_err();
        assert!(matches!(err, ChainError::LedgerError(_)));
        assert_eq!(pool.length().unwrap(), 1);
        assert_eq!(db.select_last_height().unwrap(), None);

        ledger.set_unavailable(false);
        let block = producer.tick(20).await.unwrap().unwrap();
        assert_eq!(block.header.height, 3);
        assert_eq!(block.header.prev_block, prev);
        assert_eq!(pool.length().unwrap(), 0);
    }
}
