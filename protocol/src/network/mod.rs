//! # Network Module
//!
//! Peer-to-peer side of a Keel node: the wire codec, peer connections, the
//! transaction pool, block production and the sync state machine, all tied
//! together by the node's event loop.
//!
//! ## Architecture
//!
//! ```text
//! message.rs  — length-prefixed frames and the eight message types
//! peer.rs     — split TCP connections, reader tasks, timed sends
//! txpool.rs   — insertion-ordered pool, one pending tx per sender
//! producer.rs — seals the pool into a block on top of the tip
//! sync.rs     — pause/target/probe bookkeeping for catch-up and forks
//! node.rs     — listener, peer map and the event loop
//! ```
//!
//! ## Design Decisions
//!
//! - One event-loop task performs every protocol-driven ledger and pool
//!   write. Reader tasks only decode, so a slow ledger write never stalls a
//!   socket and two peers can never race each other into the ledger.
//! - Sends are fire-and-forget tasks with a timeout. The loop never awaits a
//!   peer.
//! - Fork resolution walks back one height per round trip. Chains are
//!   short-lived on a permissioned network, so the simple walk wins over a
//!   locator scheme.

pub mod message;
pub mod node;
pub mod peer;
pub mod producer;
pub mod sync;
pub mod txpool;

pub use message::{read_frame, write_frame, CodecError, Message, MessageType};
pub use node::{Node, NodeConfig, NodeError, NodeHandle};
pub use peer::{Peer, PeerEvent};
pub use producer::{BlockProducer, ProducedBlock};
pub use sync::SyncState;
pub use txpool::{PoolConfig, PoolEntry, PoolError, TxPool};
