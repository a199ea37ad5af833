//! # CLI Interface
//!
//! Defines the command-line argument structure for `keel-node` using
//! `clap` derive. Three subcommands: `run`, `init` and `version`. Every
//! flag can also come from a `KEEL_*` environment variable.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

use keel_protocol::config::{
    DEFAULT_API_PORT, DEFAULT_METRICS_PORT, DEFAULT_P2P_PORT, DEVNET_GENESIS_SEED,
};

/// Keel proof-of-authority ledger node.
///
/// Keeps a local copy of the chain, syncs it with peers, serves the HTTP
/// query API and, when given a validator key, seals blocks.
#[derive(Parser, Debug)]
#[command(
    name = "keel-node",
    about = "Keel proof-of-authority ledger node",
    version,
    propagate_version = true
)]
pub struct KeelNodeCli {
    /// Log output format.
    #[arg(long, global = true, value_enum, env = "KEEL_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormatArg,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

/// Top-level subcommands for the Keel node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Create the data directory and generate a validator key.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the chain database and the validator key.
    #[arg(long, short = 'd', env = "KEEL_DATA_DIR", default_value = ".keel")]
    pub data_dir: PathBuf,

    /// Port for peer connections.
    #[arg(long, env = "KEEL_P2P_PORT", default_value_t = DEFAULT_P2P_PORT)]
    pub p2p_port: u16,

    /// Port for the HTTP API.
    #[arg(long, env = "KEEL_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "KEEL_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Peers to dial at startup. Without any, this node is the bootstrap
    /// node and starts sealing right away.
    #[arg(long = "seed", env = "KEEL_SEEDS", value_delimiter = ',')]
    pub seeds: Vec<SocketAddr>,

    /// Seconds between sealing attempts.
    #[arg(long, env = "KEEL_BLOCK_TIME", default_value_t = 7)]
    pub block_time: u64,

    /// Hex-encoded seed of the key that signs the genesis block. Every node
    /// on a network must use the same one.
    #[arg(long, env = "KEEL_GENESIS_KEY", default_value_t = hex::encode(DEVNET_GENESIS_SEED))]
    pub genesis_key: String,

    /// Hex-encoded Ed25519 validator seed.
    ///
    /// If not provided, the node reads `validator.key` from the data
    /// directory. Without either, the node relays and syncs but never seals.
    #[arg(long, env = "KEEL_VALIDATOR_KEY")]
    pub validator_key: Option<String>,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "KEEL_DATA_DIR", default_value = ".keel")]
    pub data_dir: PathBuf,

    /// Overwrite an existing validator key.
    #[arg(long)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        KeelNodeCli::command().debug_assert();
    }

    #[test]
    fn run_defaults_and_seed_list() {
        let cli = KeelNodeCli::try_parse_from([
            "keel-node",
            "run",
            "--seed",
            "127.0.0.1:9740,127.0.0.1:9750",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.seeds.len(), 2);
        assert_eq!(args.p2p_port, DEFAULT_P2P_PORT);
        assert_eq!(args.block_time, 7);
        assert_eq!(args.genesis_key, hex::encode(DEVNET_GENESIS_SEED));
        assert_eq!(cli.log_format, LogFormatArg::Pretty);
    }

    #[test]
    fn log_format_is_global() {
        let cli = KeelNodeCli::try_parse_from(["keel-node", "version", "--log-format", "json"])
            .unwrap();
        assert_eq!(cli.log_format, LogFormatArg::Json);
    }
}
