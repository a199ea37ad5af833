//! # Protocol Configuration & Constants
//!
//! Every protocol-level number lives here. Runtime knobs that an operator
//! may change per node (ports, seeds, block time) are carried by
//! [`crate::network::node::NodeConfig`] and default to the values below.
//!
//! Changing anything in the "Consensus" section splits the network: all
//! nodes must agree on the reward, the block version, and the genesis key.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// Crate-level protocol version reported by the node API.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Header `version` stamped on every block this node seals.
pub const BLOCK_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

/// Units credited to a block's signer when the block is applied.
pub const BLOCK_REWARD: u64 = 10;

/// Units the faucet endpoint sends per request.
pub const FAUCET_AMOUNT: u64 = 10;

/// Timestamp of the genesis header.
pub const GENESIS_TIMESTAMP: u64 = 0;

/// Well-known devnet seed for the genesis signer. Every node on a network
/// must use the same genesis key or their chains will never converge.
pub const DEVNET_GENESIS_SEED: [u8; 32] = [
    0xa2, 0x28, 0x8d, 0xb6, 0x3c, 0x70, 0x16, 0xb8, 0x15, 0xc5, 0x5c, 0x10, 0x84, 0xc2, 0x49, 0x1b,
    0x85, 0x99, 0x83, 0x45, 0x00, 0x40, 0x8b, 0xa8, 0x63, 0xec, 0x37, 0x98, 0x95, 0x37, 0x3a, 0xe9,
];

// ---------------------------------------------------------------------------
// Block Production
// ---------------------------------------------------------------------------

/// Default interval between sealed blocks.
pub const BLOCK_TIME: Duration = Duration::from_secs(7);

/// Upper bound (inclusive, whole seconds) of the random delay added to the
/// mining timer each time a block arrives from a peer. Spreads producers out
/// so they do not all seal at the same instant.
pub const BLOCK_TIME_JITTER_SECS: u64 = 6;

// ---------------------------------------------------------------------------
// Transaction Pool
// ---------------------------------------------------------------------------

/// Default pool capacity. When full, the oldest entry is evicted.
pub const TX_POOL_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// How long mining stays paused after serving a `BlockRequest` with no
/// further sync traffic.
pub const SYNC_RESUME_GRACE: Duration = Duration::from_secs(10);

/// How often the event loop checks the resume deadline.
pub const SYNC_GUARD_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Networking
// ---------------------------------------------------------------------------

/// Default TCP port for peer connections.
pub const DEFAULT_P2P_PORT: u16 = 9740;

/// Default port for the HTTP query API.
pub const DEFAULT_API_PORT: u16 = 9741;

/// Default port for the Prometheus endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9742;

/// Largest frame accepted from a peer (type byte + payload).
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Per-send deadline. A peer that cannot absorb a frame in this time is
/// evicted.
pub const PEER_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the channel carrying decoded peer messages into the loop.
pub const INBOUND_QUEUE_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Query API
// ---------------------------------------------------------------------------

/// Hard cap on `size` for paginated reads.
pub const MAX_PAGE_SIZE: usize = 100;
