//! Node orchestration: wires storage, adapters, schedulers and the intake API together

use crate::api::{self, ApiState};
use crate::config::{Config, LedgerConfig, NodeConfig};
use crate::content_store::{ContentStore, IpfsClient, TestContentStore};
use crate::crypto::KeyPair;
use crate::error::ChainError;
use crate::ledger::{Ledger, MemoryLedger, RpcLedger};
use crate::persistence::Database;
use crate::pool::TransactionPool;
use crate::producer::{BlockProducer, ProducerDeps};
use crate::scheduler::{self, Scheduler};
use crate::submitter::{BlockSubmitter, SubmitterDeps};
use std::fs;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How often each scheduler wakes up to check its period gate.
const SCHEDULER_TICK: Duration = Duration::from_secs(1);

pub struct Node {
    pub config: Config,
    pub db: Arc<Database>,
    pub pool: TransactionPool,
    pub content_store: Arc<dyn ContentStore>,
    pub ledger: Arc<dyn Ledger>,
}

impl Node {
    pub fn init(config: Config) -> Result<Self, ChainError> {
        config.validate()?;

        let db_path = Path::new(&config.database.path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    ChainError::ConfigError(format!(
                        "Failed to create data dir {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let db = Arc::new(Database::open(&config.database.path)?);
        let pool = TransactionPool::new(db.clone());
        let content_store = build_content_store(&config.node, &config.ledger)?;
        let ledger = build_ledger(&config.ledger)?;

        info!(
            database = %config.database.path,
            pooled = pool.length()?,
            "Rollup node initialised"
        );

        Ok(Node {
            config,
            db,
            pool,
            content_store,
            ledger,
        })
    }

    pub fn api_state(&self) -> ApiState {
        ApiState::new(
            self.pool.clone(),
            self.db.clone(),
            &self.config.authorization.api_access_token,
        )
    }

    /// Starts the enabled schedulers on the current runtime.
    pub fn start_schedulers(&self) -> Vec<Scheduler> {
        let now = scheduler::now();
        let mut schedulers = Vec::new();

        if self.config.node.enable_producer {
            let producer = BlockProducer::new(
                ProducerDeps {
                    db: self.db.clone(),
                    pool: self.pool.clone(),
                    content_store: self.content_store.clone(),
                    ledger: self.ledger.clone(),
                },
                self.config.node.interval,
                self.config.node.max_txs,
                now,
            );
            schedulers.push(Scheduler::start(producer, SCHEDULER_TICK));
        }

        if self.config.node.enable_submitter {
            let submitter = BlockSubmitter::new(
                SubmitterDeps {
                    db: self.db.clone(),
                    ledger: self.ledger.clone(),
                },
                self.config.node.send_interval,
                now,
            )
            .with_pruning(self.config.node.prune_submitted);
            schedulers.push(Scheduler::start(submitter, SCHEDULER_TICK));
        }

        schedulers
    }

    /// Runs the schedulers and the API until `shutdown` resolves, then stops the
    /// schedulers and waits for their in-flight ticks.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ChainError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ip: IpAddr = self.config.server.address.parse().map_err(|e| {
            ChainError::ConfigError(format!(
                "Invalid server.address '{}': {}",
                self.config.server.address, e
            ))
        })?;
        let addr = SocketAddr::new(ip, self.config.server.port);

        let schedulers = self.start_schedulers();
        let result = api::run_api_server(self.api_state(), addr, shutdown).await;

        info!("Shutting down schedulers");
        for scheduler in &schedulers {
            scheduler.stop();
        }
        for scheduler in schedulers {
            let name = scheduler.name();
            if let Err(e) = scheduler.wait_for_stop().await {
                warn!(scheduler = name, "{}", e);
            }
        }

        result
    }
}

fn build_content_store(
    node: &NodeConfig,
    ledger: &LedgerConfig,
) -> Result<Arc<dyn ContentStore>, ChainError> {
    if node.ipfs_test {
        info!("Using test content store");
        return Ok(Arc::new(TestContentStore));
    }
    let timeout = Duration::from_secs(ledger.request_timeout_secs);
    Ok(Arc::new(IpfsClient::new(&node.ipfs_api_url, timeout)?))
}

fn build_ledger(config: &LedgerConfig) -> Result<Arc<dyn Ledger>, ChainError> {
    if config.rpc_url.is_empty() {
        warn!("No ledger rpc_url configured, using an in-process ledger");
        return Ok(Arc::new(MemoryLedger::new()));
    }

    let manager = KeyPair::from_secret_hex(&config.manager_key)
        .map_err(|e| ChainError::ConfigError(format!("Invalid ledger.manager_key: {}", e)))?;
    info!(rpc = %config.rpc_url, manager = %manager.signer_id(), "Using JSON-RPC ledger");

    Ok(Arc::new(RpcLedger::new(
        &config.rpc_url,
        &config.rollup_address,
        manager,
        Duration::from_secs(config.request_timeout_secs),
    )?))
}
