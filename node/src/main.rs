// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Keel Node
//!
//! Entry point for the `keel-node` binary. Parses CLI arguments, initializes
//! logging and metrics, opens the ledger, starts the peer node and serves
//! the HTTP API.
//!
//! The binary supports three subcommands:
//!
//! - `run`     — start the node
//! - `init`    — create the data directory and generate a validator key
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use keel_protocol::crypto::Keypair;
use keel_protocol::ledger::Ledger;
use keel_protocol::network::{Node, NodeConfig};
use keel_protocol::storage::{Block, LedgerStore};

use cli::{Commands, KeelNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

/// File name of the validator key inside the data directory.
const VALIDATOR_KEY_FILE: &str = "validator.key";

/// How long to wait for the event loop to close its peers on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = KeelNodeCli::parse();
    let format = LogFormat::from(cli.log_format);

    match cli.command {
        Commands::Run(args) => run_node(args, format).await,
        Commands::Init(args) => init_node(args, format),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full node: ledger, peer node, API server and metrics endpoint.
async fn run_node(args: cli::RunArgs, format: LogFormat) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, format);

    tracing::info!(
        api_port = args.api_port,
        p2p_port = args.p2p_port,
        metrics_port = args.metrics_port,
        seeds = args.seeds.len(),
        data_dir = %args.data_dir.display(),
        "starting keel-node"
    );

    // --- Ledger ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let store = LedgerStore::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    let genesis_key = Keypair::from_hex(&args.genesis_key).context("invalid genesis key")?;
    let genesis = Block::genesis(&genesis_key);
    let ledger = Arc::new(Ledger::open(store, &genesis).context("failed to open ledger")?);
    tracing::info!(
        path = %db_path.display(),
        height = ledger.height()?,
        genesis = %genesis.hash_hex(),
        "ledger opened"
    );

    // --- Validator key ---
    let validator = load_validator_key(args.validator_key.as_deref(), &args.data_dir)?;
    match &validator {
        Some(kp) => tracing::info!(address = %kp.address(), "validator key loaded"),
        None => tracing::warn!("no validator key, this node will not seal blocks"),
    }

    // --- Peer node ---
    let config = NodeConfig {
        listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.p2p_port)),
        seeds: args.seeds,
        block_time: Duration::from_secs(args.block_time),
        ..NodeConfig::default()
    };
    let (node, node_task) = Node::start(config, ledger, validator.clone())
        .await
        .with_context(|| format!("failed to start peer listener on port {}", args.p2p_port))?;

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());
    let sampler = metrics::spawn_sampler(Arc::clone(&node_metrics), node.clone());

    // --- API server ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            keel_protocol::config::PROTOCOL_VERSION,
        ),
        node: node.clone(),
        faucet_key: validator.map(Arc::new),
        metrics: Arc::clone(&node_metrics),
    };
    let api_router = api::create_router(app_state);
    let api_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.api_port));
    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!(addr = %api_addr, "API server listening");

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.metrics_port));
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!(addr = %metrics_addr, "metrics server listening");

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "API server error");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "metrics server error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, closing peers");
        }
    }

    sampler.abort();
    node.shutdown();
    if tokio::time::timeout(SHUTDOWN_GRACE, node_task).await.is_err() {
        tracing::warn!("event loop did not stop in time");
    }
    tracing::info!("keel-node stopped");
    Ok(())
}

/// The key from `--validator-key`, else `<data-dir>/validator.key`, else none.
fn load_validator_key(flag: Option<&str>, data_dir: &Path) -> Result<Option<Keypair>> {
    if let Some(hex_key) = flag {
        return Keypair::from_hex(hex_key)
            .map(Some)
            .context("invalid --validator-key");
    }

    let key_path = data_dir.join(VALIDATOR_KEY_FILE);
    if !key_path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&key_path)
        .with_context(|| format!("failed to read {}", key_path.display()))?;
    Keypair::from_hex(&contents)
        .map(Some)
        .with_context(|| format!("invalid validator key in {}", key_path.display()))
}

/// Initializes a new node data directory and generates a validator keypair.
fn init_node(args: cli::InitArgs, format: LogFormat) -> Result<()> {
    logging::init_logging("keel_node=info", format);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let key_path = data_dir.join(VALIDATOR_KEY_FILE);
    if key_path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists, pass --force to replace it",
            key_path.display()
        );
    }

    let keypair = Keypair::generate();
    std::fs::write(&key_path, keypair.secret_hex())
        .with_context(|| format!("failed to write validator key to {}", key_path.display()))?;

    // Restrict permissions on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict {}", key_path.display()))?;
    }

    tracing::info!(
        address = %keypair.address(),
        key_path = %key_path.display(),
        "validator keypair generated"
    );

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Validator key  : {}", key_path.display());
    println!("  Public key     : {}", keypair.public_key().to_hex());
    println!("  Address        : {}", keypair.address());

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("keel-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", keel_protocol::config::PROTOCOL_VERSION);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_key_prefers_flag() {
        let dir = tempfile::tempdir().unwrap();
        let kp = Keypair::generate();
        std::fs::write(dir.path().join(VALIDATOR_KEY_FILE), Keypair::generate().secret_hex())
            .unwrap();

        let loaded = load_validator_key(Some(&kp.secret_hex()), dir.path())
            .unwrap()
            .unwrap();
        assert_eq!(loaded.address(), kp.address());
    }

    #[test]
    fn validator_key_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_validator_key(None, dir.path()).unwrap().is_none());

        let kp = Keypair::generate();
        std::fs::write(dir.path().join(VALIDATOR_KEY_FILE), format!("{}\n", kp.secret_hex()))
            .unwrap();
        let loaded = load_validator_key(None, dir.path()).unwrap().unwrap();
        assert_eq!(loaded.address(), kp.address());
    }

    #[test]
    fn malformed_key_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(VALIDATOR_KEY_FILE), "not hex").unwrap();
        assert!(load_validator_key(None, dir.path()).is_err());
    }
}
