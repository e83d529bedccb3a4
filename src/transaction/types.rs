/// Transaction types for the rollup
use crate::error::ChainError;
use crate::hash::{hash_full, Hash, Hashable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of a recorded trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxState {
    #[serde(rename = "0")]
    Charge,
    #[serde(rename = "1")]
    Discharge,
}

impl TxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::Charge => "0",
            TxState::Discharge => "1",
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxState {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(TxState::Charge),
            "1" => Ok(TxState::Discharge),
            other => Err(ChainError::InvalidTransaction(format!(
                "state must be \"0\" (charge) or \"1\" (discharge), got \"{}\"",
                other
            ))),
        }
    }
}

/// A signed trade record submitted by an exchange.
///
/// Only the business fields take part in the hash; `sequence`, `signer` and
/// `signature` describe how the record arrived and are not hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub sequence: u64,
    pub trade_id: String,
    pub user_id: String,
    pub state: TxState,
    #[serde(with = "amount_format")]
    pub amount: u64,
    pub timestamp: u32,
    pub exchange_user_id: String,
    pub exchange_id: String,
    #[serde(default)]
    pub signer: String,
    #[serde(default)]
    pub signature: String,
}

impl Transaction {
    pub fn new(
        trade_id: impl Into<String>,
        user_id: impl Into<String>,
        state: TxState,
        amount: u64,
        timestamp: u32,
        exchange_user_id: impl Into<String>,
        exchange_id: impl Into<String>,
    ) -> Self {
        Transaction {
            sequence: 0,
            trade_id: trade_id.into(),
            user_id: user_id.into(),
            state,
            amount,
            timestamp,
            exchange_user_id: exchange_user_id.into(),
            exchange_id: exchange_id.into(),
            signer: String::new(),
            signature: String::new(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_signature(mut self, signer: impl Into<String>, signature: impl Into<String>) -> Self {
        self.signer = signer.into();
        self.signature = signature.into();
        self
    }

    pub fn hash(&self) -> Hash {
        hash_full(self)
    }

    /// Bytes covered by the envelope signature: the transaction hash.
    pub fn signable_message(&self) -> Vec<u8> {
        self.hash().as_bytes().to_vec()
    }
}

impl Hashable for Transaction {
    fn compute_hash(&self, buffer: &mut Vec<u8>) {
        self.trade_id.compute_hash(buffer);
        self.user_id.compute_hash(buffer);
        self.state.as_str().compute_hash(buffer);
        self.amount.compute_hash(buffer);
        self.timestamp.compute_hash(buffer);
        self.exchange_user_id.compute_hash(buffer);
        self.exchange_id.compute_hash(buffer);
    }
}

/// Amounts travel as decimal strings in JSON; plain numbers are accepted on input.
mod amount_format {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => {
                if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(de::Error::custom(format!(
                        "amount must be a decimal string, got \"{}\"",
                        s
                    )));
                }
                s.parse::<u64>().map_err(de::Error::custom)
            }
        }
    }
}
