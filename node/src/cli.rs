//! # CLI Interface
//!
//! Command-line arguments for `strongbox-node`, defined with `clap` derive.
//! Subcommands: `run`, `init` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use strongbox_protocol::config::{DEFAULT_METRICS_PORT, DEFAULT_RPC_PORT};
use strongbox_protocol::Address;

/// Strongbox custodial ledger node.
///
/// Serves a capacity-capped deposit bank over HTTP, with a WebSocket feed
/// of receipts and a Prometheus endpoint.
#[derive(Parser, Debug)]
#[command(
    name = "strongbox-node",
    about = "Strongbox custodial ledger node",
    version,
    propagate_version = true
)]
pub struct StrongboxNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Write a starter `config.toml` into the data directory.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node configuration file (TOML).
    ///
    /// When omitted, the node looks for `config.toml` in the data directory.
    #[arg(long, short = 'c', env = "STRONGBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the ledger database.
    #[arg(long, short = 'd', env = "STRONGBOX_DATA_DIR", default_value = ".strongbox")]
    pub data_dir: PathBuf,

    /// Port for the REST and WebSocket API.
    #[arg(long, env = "STRONGBOX_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "STRONGBOX_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "STRONGBOX_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Data directory to initialize.
    #[arg(long, short = 'd', env = "STRONGBOX_DATA_DIR", default_value = ".strongbox")]
    pub data_dir: PathBuf,

    /// Address that will hold the admin role.
    #[arg(long, env = "STRONGBOX_AUTHORITY")]
    pub authority: Address,
}
