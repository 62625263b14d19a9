//! Interbank node binary.
//!
//! Usage: `interbank-node [CONFIG]`. The config path falls back to
//! `INTERBANK_CONFIG`, then `config/bank.yaml`.

use interbank_node::{Node, NodeConfig, logging::init_logging};
use tokio::net::TcpListener;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "config/bank.yaml";

#[tokio::main]
async fn main() {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("INTERBANK_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match NodeConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = init_logging(&config.log) {
        eprintln!("FATAL: {e}");
        std::process::exit(1);
    }
    info!(
        config = %path,
        version = interbank_types::constants::VERSION,
        "Starting interbank node"
    );

    let node = match Node::build(&config) {
        Ok(node) => node,
        Err(e) => {
            error!(error = %e, "Node setup failed");
            std::process::exit(1);
        }
    };
    let listener = match TcpListener::bind(&config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.listen, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };
    if let Err(e) = node.serve(listener).await {
        error!(error = %e, "Server stopped");
        std::process::exit(1);
    }
}
