#![forbid(unsafe_code)]
//! Rollup sidechain node: intake API, block producer and block submitter

use clap::Parser;
use rollup_node::config::load_config;
use rollup_node::node::Node;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "rollup-node", version, about = "Rollup sidechain node")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let level = tracing::Level::from_str(&config.logging.level).unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let node = match Node::init(config) {
        Ok(node) => node,
        Err(e) => {
            error!("Failed to initialise node: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    match node.run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Node stopped with error: {}", e);
            ExitCode::FAILURE
        }
    }
}
