//! Error types for the rollup node

use std::fmt;

#[derive(Debug, Clone)]
pub enum ChainError {
    InvalidHash(String),
    InvalidTransaction(String),
    InvalidBlock(String),
    DatabaseError(String),
    ContentStoreError(String),
    LedgerError(String),
    /// The ledger refused the block because its height or parent no longer lines up.
    StaleCandidate(String),
    CryptoError(String),
    ConfigError(String),
    SerializationError(String),
    IoError(String),
    SchedulerError(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::InvalidHash(msg) => write!(f, "Invalid hash: {}", msg),
            ChainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {}", msg),
            ChainError::InvalidBlock(msg) => write!(f, "Invalid block: {}", msg),
            ChainError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ChainError::ContentStoreError(msg) => write!(f, "Content store error: {}", msg),
            ChainError::LedgerError(msg) => write!(f, "Ledger error: {}", msg),
            ChainError::StaleCandidate(msg) => write!(f, "Stale ledger candidate: {}", msg),
            ChainError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            ChainError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            ChainError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            ChainError::IoError(msg) => write!(f, "IO error: {}", msg),
            ChainError::SchedulerError(msg) => write!(f, "Scheduler error: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
