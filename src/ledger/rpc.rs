/// JSON-RPC client for a ledger node hosting the rollup contract
use super::{Ledger, LedgerBlock, Receipt};
use crate::crypto::KeyPair;
use crate::error::ChainError;
use crate::hash::{hash_multi, Hash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug)]
enum RpcFailure {
    Transport(String),
    Rejected { code: i64, message: String },
}

impl From<RpcFailure> for ChainError {
    fn from(failure: RpcFailure) -> Self {
        match failure {
            RpcFailure::Transport(msg) => ChainError::LedgerError(msg),
            RpcFailure::Rejected { code, message } => {
                ChainError::LedgerError(format!("RPC error {}: {}", code, message))
            }
        }
    }
}

/// Parameters of `rollup_add`: the block, the manager's nonce and a signature over both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedAdd {
    pub rollup: String,
    pub block: LedgerBlock,
    pub nonce: u64,
    pub signer: String,
    pub signature: String,
}

impl SignedAdd {
    /// Digest the manager signs for a `rollup_add` call.
    pub fn message(rollup: &str, block: &LedgerBlock, nonce: u64) -> Hash {
        hash_multi(&[
            &rollup,
            &block.height,
            &block.cur_block,
            &block.prev_block,
            &block.merkle_root,
            &block.timestamp,
            &block.content_id,
            &nonce,
        ])
    }

    pub fn verify(&self) -> Result<(), ChainError> {
        let message = Self::message(&self.rollup, &self.block, self.nonce);
        crate::crypto::verify_hex_signature(&self.signer, message.as_bytes(), &self.signature)
    }
}

pub struct RpcLedger {
    http: reqwest::Client,
    url: String,
    rollup_address: String,
    manager: KeyPair,
    nonce: Mutex<Option<u64>>,
    next_id: AtomicU64,
}

impl RpcLedger {
    pub fn new(
        url: &str,
        rollup_address: &str,
        manager: KeyPair,
        timeout: Duration,
    ) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::LedgerError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(RpcLedger {
            http,
            url: url.to_string(),
            rollup_address: rollup_address.to_string(),
            manager,
            nonce: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcFailure> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(format!("{} request failed: {}", method, e)))?;

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcFailure::Transport(format!("{} returned invalid JSON: {}", method, e)))?;

        if let Some(err) = body.error {
            return Err(RpcFailure::Rejected {
                code: err.code,
                message: err.message,
            });
        }
        body.result
            .ok_or_else(|| RpcFailure::Transport(format!("{} returned no result", method)))
    }

    async fn fetch_nonce(&self) -> Result<u64, ChainError> {
        let value = self
            .call("rollup_getNonce", json!([self.manager.signer_id()]))
            .await?;
        parse_quantity(&value)
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn get_last_height(&self) -> Result<u64, ChainError> {
        let value = self
            .call("rollup_getLastHeight", json!([self.rollup_address]))
            .await?;
        parse_quantity(&value)
    }

    async fn get_by_height(&self, height: u64) -> Result<LedgerBlock, ChainError> {
        let value = self
            .call("rollup_getByHeight", json!([self.rollup_address, height]))
            .await?;
        if value.is_null() {
            return Err(ChainError::LedgerError(format!("No block at height {}", height)));
        }
        serde_json::from_value(value)
            .map_err(|e| ChainError::LedgerError(format!("Malformed ledger block: {}", e)))
    }

    async fn add(&self, block: &LedgerBlock) -> Result<Receipt, ChainError> {
        let mut tracked = self.nonce.lock().await;
        let nonce = match *tracked {
            Some(nonce) => nonce,
            None => self.fetch_nonce().await?,
        };

        let message = SignedAdd::message(&self.rollup_address, block, nonce);
        let params = SignedAdd {
            rollup: self.rollup_address.clone(),
            block: block.clone(),
            nonce,
            signer: self.manager.signer_id(),
            signature: self.manager.sign_hex(message.as_bytes())?,
        };
        let params = serde_json::to_value(&params)?;

        match self.call("rollup_add", json!([params])).await {
            Ok(value) => {
                *tracked = Some(nonce + 1);
                let tx_id = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                debug!(height = block.height, nonce, tx = %tx_id, "rollup_add accepted");
                Ok(Receipt {
                    tx_id,
                    height: block.height,
                })
            }
            Err(RpcFailure::Rejected { code, message }) if is_stale_revert(&message) => {
                warn!(height = block.height, code, "rollup_add reverted: {}", message);
                Err(ChainError::StaleCandidate(message))
            }
            Err(failure) => Err(failure.into()),
        }
    }

    async fn reset_nonce(&self) {
        *self.nonce.lock().await = None;
    }
}

fn is_stale_revert(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("height") || message.contains("prev")
}

/// Reads an unsigned quantity given as a JSON number, a decimal string or a `0x` hex string.
fn parse_quantity(value: &Value) -> Result<u64, ChainError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(digits) => u64::from_str_radix(digits, 16).ok(),
            None => s.parse::<u64>().ok(),
        },
        _ => None,
    };
    parsed.ok_or_else(|| ChainError::LedgerError(format!("Invalid quantity: {}", value)))
}
