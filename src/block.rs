//! Block and block header value types

use crate::error::ChainError;
use crate::hash::{hash_full, Hash, Hashable};
use crate::merkle::{build_merkle_tree, merkle_root};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the previous header, `Hash::NULL` for genesis.
    pub prev_block: Hash,
    pub merkle_root: Hash,
    /// Genesis is height 0.
    #[serde(deserialize_with = "height_format::deserialize")]
    pub height: u64,
    pub timestamp: u64,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        hash_full(self)
    }
}

impl Hashable for BlockHeader {
    fn compute_hash(&self, buffer: &mut Vec<u8>) {
        self.prev_block.compute_hash(buffer);
        self.merkle_root.compute_hash(buffer);
        self.height.compute_hash(buffer);
        self.timestamp.compute_hash(buffer);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
    /// Flattened Merkle tree, leaves first and root last.
    pub merkle_tree: Vec<Hash>,
}

impl Block {
    /// Builds the block that follows `prev_hash`. `prev_height` is `None` when
    /// there is no previous block, which makes this the genesis block.
    pub fn create(
        prev_hash: Hash,
        prev_height: Option<u64>,
        txs: Vec<Transaction>,
        timestamp: u64,
    ) -> Self {
        let leaves: Vec<Hash> = txs.iter().map(hash_full).collect();
        let merkle_tree = build_merkle_tree(&leaves);
        let header = BlockHeader {
            prev_block: prev_hash,
            merkle_root: merkle_root(&merkle_tree),
            height: prev_height.map_or(0, |h| h + 1),
            timestamp,
        };

        Block {
            header,
            txs,
            merkle_tree,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Checks that the Merkle tree matches the transactions and the header.
    pub fn validate(&self) -> Result<(), ChainError> {
        let leaves: Vec<Hash> = self.txs.iter().map(hash_full).collect();
        let expected = build_merkle_tree(&leaves);
        if expected != self.merkle_tree {
            return Err(ChainError::InvalidBlock(format!(
                "Merkle tree of block {} does not match its transactions",
                self.header.height
            )));
        }

        let root = merkle_root(&self.merkle_tree);
        if root != self.header.merkle_root {
            return Err(ChainError::InvalidBlock(format!(
                "Merkle root mismatch. Expected {}, but got {}.",
                root, self.header.merkle_root
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ChainError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses and validates a block, rejecting any structurally unsound record.
    pub fn from_json(json: &str) -> Result<Self, ChainError> {
        let block: Block = serde_json::from_str(json)
            .map_err(|e| ChainError::InvalidBlock(format!("Malformed block JSON: {}", e)))?;
        block.validate()?;
        Ok(block)
    }
}

/// Heights are written as numbers; decimal strings are accepted on input.
mod height_format {
    use serde::{de, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s.parse::<u64>().map_err(de::Error::custom),
        }
    }
}
