//! Configuration management for the rollup node

use crate::error::ChainError;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    pub authorization: AuthorizationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Block period in seconds.
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_max_txs")]
    pub max_txs: usize,
    /// Submission period in seconds.
    #[serde(default = "default_send_interval")]
    pub send_interval: u64,
    #[serde(default = "default_ipfs_api_url")]
    pub ipfs_api_url: String,
    /// Use random content ids instead of a real IPFS node.
    #[serde(default = "default_true")]
    pub ipfs_test: bool,
    #[serde(default = "default_true")]
    pub enable_producer: bool,
    #[serde(default = "default_true")]
    pub enable_submitter: bool,
    #[serde(default)]
    pub prune_submitted: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_txs: default_max_txs(),
            send_interval: default_send_interval(),
            ipfs_api_url: default_ipfs_api_url(),
            ipfs_test: true,
            enable_producer: true,
            enable_submitter: true,
            prune_submitted: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint. Empty runs against an in-process ledger.
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default = "default_rollup_address")]
    pub rollup_address: String,
    #[serde(default)]
    pub manager_key: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            rollup_address: default_rollup_address(),
            manager_key: String::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationConfig {
    pub api_access_token: String,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_level() -> String {
    "info".to_string()
}

fn default_db_path() -> String {
    "./data/rollup.db".to_string()
}

fn default_interval() -> u64 {
    600
}

fn default_max_txs() -> usize {
    128
}

fn default_send_interval() -> u64 {
    14
}

fn default_ipfs_api_url() -> String {
    "http://localhost:5001".to_string()
}

fn default_true() -> bool {
    true
}

fn default_rollup_address() -> String {
    "0x0000000000000000000000000000000000000000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    pub fn from_toml(source: &str) -> Result<Self, ChainError> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if self.database.path.is_empty() {
            return Err(ChainError::ConfigError("database.path must be set".to_string()));
        }
        if self.authorization.api_access_token.is_empty() {
            return Err(ChainError::ConfigError(
                "authorization.api_access_token must be set".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ChainError::ConfigError(format!(
                "logging.level must be one of {}, got '{}'",
                LOG_LEVELS.join("|"),
                self.logging.level
            )));
        }
        if self.node.interval == 0 || self.node.send_interval == 0 {
            return Err(ChainError::ConfigError(
                "node.interval and node.send_interval must be positive".to_string(),
            ));
        }
        if self.node.max_txs == 0 {
            return Err(ChainError::ConfigError("node.max_txs must be positive".to_string()));
        }
        if !self.node.ipfs_test && self.node.ipfs_api_url.is_empty() {
            return Err(ChainError::ConfigError(
                "node.ipfs_api_url must be set when node.ipfs_test is false".to_string(),
            ));
        }
        if self.node.prune_submitted && self.ledger.rpc_url.is_empty() {
            return Err(ChainError::ConfigError(
                "node.prune_submitted requires ledger.rpc_url".to_string(),
            ));
        }
        if !self.ledger.rpc_url.is_empty() && self.ledger.manager_key.is_empty() {
            return Err(ChainError::ConfigError(
                "ledger.manager_key must be set when ledger.rpc_url is set".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ChainError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|e| {
        ChainError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
    })?;
    Config::from_toml(&source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[authorization]
api_access_token = "9812176e565a007a84c5d2fc4cf842b12eb26dbc7568b4e40fc4f2418f2c8f54"
"#;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.server.address, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.database.path, "./data/rollup.db");
        assert_eq!(config.node.interval, 600);
        assert_eq!(config.node.max_txs, 128);
        assert_eq!(config.node.send_interval, 14);
        assert!(config.node.ipfs_test);
        assert!(config.node.enable_producer);
        assert!(!config.node.prune_submitted);
        assert!(config.ledger.rpc_url.is_empty());
        assert_eq!(config.ledger.request_timeout_secs, 30);
    }

    #[test]
    fn test_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
address = "0.0.0.0"
port = 7070

[logging]
level = "debug"

[database]
path = "/tmp/rollup-test.db"

[node]
interval = 5
max_txs = 16
send_interval = 3
ipfs_test = false
ipfs_api_url = "http://ipfs:5001"
prune_submitted = true

[ledger]
rpc_url = "http://ledger:8545"
rollup_address = "0x1234"
manager_key = "0x94bf5604b9eb7990985dfabbfd1298a16a3c94cb79a5fa39638279ba9ca48a80"

[authorization]
api_access_token = "token"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.node.interval, 5);
        assert_eq!(config.node.max_txs, 16);
        assert!(!config.node.ipfs_test);
        assert!(config.node.prune_submitted);
        assert_eq!(config.ledger.rpc_url, "http://ledger:8545");
    }

    #[test]
    fn test_validation_errors() {
        let missing_token = "[authorization]\napi_access_token = \"\"\n";
        assert!(matches!(
            Config::from_toml(missing_token),
            Err(ChainError::ConfigError(_))
        ));

        let bad_level = format!("{}\n[logging]\nlevel = \"loud\"\n", MINIMAL);
        assert!(Config::from_toml(&bad_level).is_err());

        let rpc_without_key = format!("{}\n[ledger]\nrpc_url = \"http://x\"\n", MINIMAL);
        assert!(Config::from_toml(&rpc_without_key).is_err());

        let zero_interval = format!("{}\n[node]\ninterval = 0\n", MINIMAL);
        assert!(Config::from_toml(&zero_interval).is_err());

        let prune_without_ledger = format!("{}\n[node]\nprune_submitted = true\n", MINIMAL);
        assert!(matches!(
            Config::from_toml(&prune_without_ledger),
            Err(ChainError::ConfigError(_))
        ));

        assert!(Config::from_toml("not toml at all [").is_err());
        assert!(load_config("/nonexistent/rollup.toml").is_err());
    }
}
