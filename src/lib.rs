//! Mining Pool Integration Harness
//!
//! Black-box checks for a running mining pool deployment:
//! - Stratum-style login handshake over line-delimited JSON
//! - Web UI statistics, workers and landing page
//! - Convergence polling of pool counters with an injectable sleeper
//! - Daemon and wallet RPC cross-checks
//! - Mining client start/stop for live-mining scenarios

pub mod client;
pub mod config;
pub mod error;
pub mod miner;
pub mod poller;
pub mod rpc;
pub mod scenario;
pub mod schema;
pub mod stratum;
pub mod types;

pub use config::{Config, HarnessEnv, HarnessSettings};
pub use error::{Error, Result};
pub use scenario::{Outcome, ScenarioKind, ScenarioReport, ScenarioRunner};
pub use types::*;

/// Application information
pub const APP_NAME: &str = "pool-integ";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
