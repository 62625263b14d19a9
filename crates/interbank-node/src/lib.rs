//! # interbank-node
//!
//! The process that hosts one bank's executor:
//!
//! - [`config`]: YAML node configuration.
//! - [`logging`]: tracing subscriber setup.
//! - [`http`]: `POST /interbank`, the endpoint peer banks deliver to.
//! - [`node`]: wiring of store, executor, relay and HTTP server.

pub mod config;
pub mod http;
pub mod logging;
pub mod node;

pub use config::{AccountSeed, LogConfig, NodeConfig};
pub use node::Node;
