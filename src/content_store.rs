//! Content-addressed storage for serialized blocks

use crate::error::ChainError;
use async_trait::async_trait;
use rand::RngCore;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Stores an opaque payload and returns the content id it can be fetched by.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn add(&self, data: Vec<u8>) -> Result<String, ChainError>;
}

/// Client for the `add` endpoint of an IPFS HTTP API.
pub struct IpfsClient {
    http: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

impl IpfsClient {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::ContentStoreError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(IpfsClient {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn add_url(&self) -> String {
        format!("{}/api/v0/add", self.api_url)
    }
}

#[async_trait]
impl ContentStore for IpfsClient {
    async fn add(&self, data: Vec<u8>) -> Result<String, ChainError> {
        let size = data.len();
        let part = reqwest::multipart::Part::bytes(data).file_name("block.json");
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.add_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChainError::ContentStoreError(format!("IPFS request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::ContentStoreError(format!(
                "IPFS add returned {}: {}",
                status, body
            )));
        }

        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| ChainError::ContentStoreError(format!("Invalid IPFS response: {}", e)))?;

        if added.hash.is_empty() {
            return Err(ChainError::ContentStoreError(
                "IPFS returned an empty content id".to_string(),
            ));
        }

        debug!(cid = %added.hash, size, "Stored payload in IPFS");
        Ok(added.hash)
    }
}

/// Content store for test runs: nothing leaves the process and every call yields a
/// fresh random base58 id.
#[derive(Debug, Default, Clone)]
pub struct TestContentStore;

#[async_trait]
impl ContentStore for TestContentStore {
    async fn add(&self, _data: Vec<u8>) -> Result<String, ChainError> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Ok(bs58::encode(bytes).into_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_test_store_returns_distinct_base58_ids() {
        let store = TestContentStore;
        let a = store.add(b"block".to_vec()).await.unwrap();
        let b = store.add(b"block".to_vec()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(bs58::decode(&a).into_vec().unwrap().len(), 32);
    }

    #[test]
    fn test_ipfs_url_is_normalized() {
        let client = IpfsClient::new("http://localhost:5001/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.add_url(), "http://localhost:5001/api/v0/add");
    }

    #[tokio::test]
    async fn test_unreachable_ipfs_is_an_error() {
        let client = IpfsClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.add(b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, ChainError::ContentStoreError(_)));
    }
}
