//! Rollup node - batches signed exchange records into blocks, anchors them in
//! content-addressed storage and commits their headers to a ledger
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Data
//! - [`hash`] - Hash type and canonical hashing
//! - [`merkle`] - Merkle tree construction
//! - [`transaction`] - Transaction records and validation
//! - [`block`] - Block and header structures
//!
//! ## State Management
//! - [`persistence`] - Database layer (SQLite)
//! - [`pool`] - Transaction pool
//!
//! ## Block Pipeline
//! - [`scheduler`] - Periodic task runner
//! - [`chain_info`] - Chain tip reconciliation
//! - [`producer`] - Block production
//! - [`submitter`] - Block submission to the ledger
//!
//! ## External Services
//! - [`content_store`] - IPFS and test content stores
//! - [`ledger`] - In-process and JSON-RPC ledgers
//!
//! ## Cryptography
//! - [`crypto`] - Signatures and verification (secp256k1)
//!
//! ## Integration
//! - [`api`] - HTTP intake API
//! - [`node`] - Node orchestration
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Data
// ============================================================================
pub mod block;
pub mod hash;
pub mod merkle;
pub mod transaction;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;
pub mod pool;

// ============================================================================
// Block Pipeline
// ============================================================================
pub mod chain_info;
pub mod producer;
pub mod scheduler;
pub mod submitter;

// ============================================================================
// External Services
// ============================================================================
pub mod content_store;
pub mod ledger;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// Integration
// ============================================================================
pub mod api;
pub mod node;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
