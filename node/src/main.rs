// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Strongbox Node
//!
//! Entry point for the `strongbox-node` binary. Parses CLI arguments,
//! initializes logging and metrics, opens the ledger database, wires the
//! bank engine to its in-process collaborators, and serves the HTTP/WS API.
//!
//! The binary supports three subcommands:
//!
//! - `run`     — start the node
//! - `init`    — write a starter configuration
//! - `version` — print build version information

mod api;
mod cli;
mod config;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, Mutex};

use strongbox_contracts::{
    BankEngine, Clock, Collaborators, InMemoryCustody, ManualPriceFeed, SystemClock,
};
use strongbox_protocol::VaultDB;

use cli::{Commands, StrongboxNodeCli};
use config::NodeConfig;
use logging::LogFormat;
use metrics::NodeMetrics;

/// Broadcast channel capacity for live event streaming.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = StrongboxNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node: bank engine, API server and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        logging::DEFAULT_FILTER,
        LogFormat::from_str_lossy(&args.log_format),
    );

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.data_dir.join("config.toml"));
    let node_config = NodeConfig::from_file(&config_path)?;

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        config = %config_path.display(),
        "starting strongbox-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = VaultDB::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Collaborators ---
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let price_feed = Arc::new(ManualPriceFeed::new());
    for seed in &node_config.prices {
        price_feed.set_price(&seed.feed, i128::from(seed.answer), seed.decimals, clock.now());
    }
    let router = node_config.build_router()?;
    let custody = InMemoryCustody::new(node_config.custody_address)
        .with_holdings(strongbox_protocol::AssetId::NATIVE, node_config.native_reserve_amount()?);

    // --- Engine ---
    let mut engine = BankEngine::open(
        node_config.bank.clone(),
        db,
        Collaborators {
            price_feed: price_feed.clone(),
            router: Box::new(router.clone()),
            custody: Box::new(custody),
            clock: Arc::clone(&clock),
        },
    )
    .context("failed to open bank")?;

    let authority = engine.authority();
    for seed in &node_config.assets {
        if engine.asset_config(&seed.asset).supported {
            continue;
        }
        engine
            .add_asset(&authority, seed.asset, seed.decimals, seed.feed.clone())
            .with_context(|| format!("failed to register seed asset {}", seed.asset))?;
    }
    let info = engine.bank_info()?;
    tracing::info!(
        authority = %authority,
        capacity_used = %info.total_capacity_used,
        max_cap = %info.max_cap,
        halted = info.halted,
        assets = engine.assets().len(),
        "bank ready"
    );

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    node_metrics.observe_bank(&info);

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            strongbox_protocol::config::PROTOCOL_VERSION,
        ),
        engine: Arc::new(Mutex::new(engine)),
        price_feed,
        router,
        clock,
        event_tx,
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    tracing::info!("strongbox-node stopped");
    Ok(())
}

/// Creates the data directory and writes a starter `config.toml`.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("strongbox_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    let config_path = data_dir.join("config.toml");
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let config = NodeConfig::sample(args.authority);
    std::fs::write(&config_path, config.to_toml_string()?)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    tracing::info!(
        config = %config_path.display(),
        authority = %args.authority,
        "node initialized"
    );

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Config         : {}", config_path.display());
    println!("  Authority      : {}", args.authority);

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("strongbox-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol       {}", strongbox_protocol::config::PROTOCOL_VERSION);
    println!("rustc          {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
