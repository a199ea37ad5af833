//! # Peer Node
//!
//! A `Node` is one participant in the permissioned network. It owns a TCP
//! listener, a set of connected peers, and a single event-loop task that
//! is the only protocol-side writer of the ledger and the pool.
//!
//! ```text
//!   accept loop ──┐
//!   connect()  ───┼──> new peers ──┐
//!                 │                │
//!   peer readers ─┴──> PeerEvent ──┼──> event loop ──> Ledger / TxPool
//!   NodeHandle::submit_transaction ┤         │
//!   mining timer / sync guard ─────┘         └──> detached sends to peers
//! ```
//!
//! Handlers never await. Every outbound message is encoded once and written
//! by a detached task with a timeout; a peer whose send fails is evicted.
//!
//! ## Sync
//!
//! Convergence follows the message flow documented in
//! [`sync`](super::sync). When a downloaded or gossiped block does not link,
//! the node probes the peer's hash at its own tip height and walks down,
//! rolling back one block per mismatch, until both sides agree. Reverted
//! transactions go back into the pool.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::message::{CodecError, Message};
use super::peer::{Peer, PeerEvent};
use super::producer::BlockProducer;
use super::sync::SyncState;
use super::txpool::{PoolConfig, PoolError, TxPool};
use crate::config::{
    BLOCK_TIME, BLOCK_TIME_JITTER_SECS, DEFAULT_P2P_PORT, INBOUND_QUEUE_CAPACITY,
    SYNC_GUARD_INTERVAL, SYNC_RESUME_GRACE,
};
use crate::crypto::hash::short_hex;
use crate::crypto::{Address, Hash, Keypair, ZERO_HASH};
use crate::ledger::{Ledger, LedgerError};
use crate::storage::Block;
use crate::transaction::{verify_transaction, Transaction, TxVerifyError};

type PeerMap = Arc<RwLock<HashMap<SocketAddr, Peer>>>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address the peer listener binds. Port 0 picks a free port.
    pub listen_addr: SocketAddr,
    /// Peers dialed at startup. A node without seeds is the bootstrap node
    /// and starts sealing immediately.
    pub seeds: Vec<SocketAddr>,
    /// Interval between sealing attempts.
    pub block_time: Duration,
    /// How long a sync may go without traffic before mining resumes anyway.
    pub sync_grace: Duration,
    pub pool: PoolConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_P2P_PORT)),
            seeds: Vec::new(),
            block_time: BLOCK_TIME,
            sync_grace: SYNC_RESUME_GRACE,
            pool: PoolConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] TxVerifyError),

    #[error("unknown peer {0}")]
    UnknownPeer(SocketAddr),

    #[error("height {requested} is above the local tip {tip}")]
    HeightOutOfRange { requested: u32, tip: u32 },

    #[error("node stopped")]
    Stopped,
}

impl NodeError {
    /// Duplicates and fork-choice losers. Expected under gossip.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            NodeError::Ledger(LedgerError::Known)
                | NodeError::Pool(PoolError::AlreadyPending)
                | NodeError::Pool(PoolError::Ledger(LedgerError::Known))
        )
    }
}

// ---------------------------------------------------------------------------
// NodeHandle
// ---------------------------------------------------------------------------

struct Submission {
    tx: Transaction,
    reply: oneshot::Sender<Result<(), NodeError>>,
}

/// Cloneable control surface of a running node.
#[derive(Clone)]
pub struct NodeHandle {
    local_addr: SocketAddr,
    ledger: Arc<Ledger>,
    pool: Arc<TxPool>,
    peers: PeerMap,
    validator: Option<Address>,
    mining_paused: Arc<AtomicBool>,
    submissions: mpsc::Sender<Submission>,
    new_peers: mpsc::Sender<(TcpStream, SocketAddr)>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("local_addr", &self.local_addr)
            .field("peers", &self.peer_count())
            .field("validator", &self.validator)
            .finish()
    }
}

impl NodeHandle {
    /// Address the peer listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn pool(&self) -> &Arc<TxPool> {
        &self.pool
    }

    /// Address of the sealing key, if this node has one.
    pub fn validator_address(&self) -> Option<Address> {
        self.validator
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    pub fn peer_addrs(&self) -> Vec<SocketAddr> {
        self.peers.read().keys().copied().collect()
    }

    /// True while the node is downloading, probing, or serving a peer.
    pub fn is_syncing(&self) -> bool {
        self.mining_paused.load(Ordering::Relaxed)
    }

    /// Verify `tx`, admit it to the pool and flood it to peers.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<(), NodeError> {
        let (reply, result) = oneshot::channel();
        self.submissions
            .send(Submission { tx, reply })
            .await
            .map_err(|_| NodeError::Stopped)?;
        result.await.map_err(|_| NodeError::Stopped)?
    }

    /// Dial `addr` and hand the connection to the event loop.
    pub async fn connect(&self, addr: SocketAddr) -> Result<(), NodeError> {
        let stream = TcpStream::connect(addr).await?;
        self.new_peers
            .send((stream, addr))
            .await
            .map_err(|_| NodeError::Stopped)
    }

    /// Ask the accept and event loops to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

pub struct Node;

impl Node {
    /// Bind the listener, dial the seeds and spawn the event loop.
    ///
    /// `keypair` is the sealing key. Without one the node relays and syncs
    /// but never produces blocks.
    pub async fn start(
        config: NodeConfig,
        ledger: Arc<Ledger>,
        keypair: Option<Keypair>,
    ) -> Result<(NodeHandle, JoinHandle<()>), NodeError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let pool = Arc::new(TxPool::with_config(config.pool.clone()));
        let peers: PeerMap = Arc::new(RwLock::new(HashMap::new()));
        let (new_peers_tx, new_peers_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let (submissions_tx, submissions_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sync = SyncState::with_grace(
            !config.seeds.is_empty(),
            config.sync_grace,
            std::time::Instant::now(),
        );
        let mining_paused = Arc::new(AtomicBool::new(sync.is_mining_paused()));
        let producer = keypair.map(|kp| BlockProducer::new(ledger.clone(), pool.clone(), kp));

        let handle = NodeHandle {
            local_addr,
            ledger: ledger.clone(),
            pool: pool.clone(),
            peers: peers.clone(),
            validator: producer.as_ref().map(BlockProducer::address),
            mining_paused: mining_paused.clone(),
            submissions: submissions_tx,
            new_peers: new_peers_tx.clone(),
            shutdown: Arc::new(shutdown_tx),
        };

        info!(
            addr = %local_addr,
            seeds = config.seeds.len(),
            validator = ?handle.validator,
            "node starting"
        );

        tokio::spawn(accept_loop(listener, new_peers_tx, shutdown_rx.clone()));

        for seed in config.seeds {
            let dialer = handle.clone();
            tokio::spawn(async move {
                if let Err(e) = dialer.connect(seed).await {
                    warn!(seed = %seed, error = %e, "failed to dial seed");
                }
            });
        }

        let event_loop = EventLoop {
            ledger,
            pool,
            peers,
            producer,
            sync,
            mining_paused,
            block_time: config.block_time,
            next_seal: Instant::now() + config.block_time,
            events_tx,
            genesis_conflicts: HashSet::new(),
        };
        let task = tokio::spawn(event_loop.run(
            new_peers_rx,
            events_rx,
            submissions_rx,
            shutdown_rx,
        ));

        Ok((handle, task))
    }
}

async fn accept_loop(
    listener: TcpListener,
    new_peers: mpsc::Sender<(TcpStream, SocketAddr)>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if new_peers.send((stream, addr)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("accept loop stopped");
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

struct EventLoop {
    ledger: Arc<Ledger>,
    pool: Arc<TxPool>,
    peers: PeerMap,
    producer: Option<BlockProducer>,
    sync: SyncState,
    /// Mirror of `sync.is_mining_paused()` for handles.
    mining_paused: Arc<AtomicBool>,
    block_time: Duration,
    next_seal: Instant,
    /// Cloned into every peer reader.
    events_tx: mpsc::Sender<PeerEvent>,
    /// Peers already asked for block 1 after a genesis mismatch.
    genesis_conflicts: HashSet<SocketAddr>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut new_peers: mpsc::Receiver<(TcpStream, SocketAddr)>,
        mut events: mpsc::Receiver<PeerEvent>,
        mut submissions: mpsc::Receiver<Submission>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut guard = tokio::time::interval(SYNC_GUARD_INTERVAL);
        guard.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("event loop starting");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some((stream, addr)) = new_peers.recv() => self.on_connect(stream, addr),
                Some(Submission { tx, reply }) = submissions.recv() => {
                    let result = self.on_transaction(tx, None);
                    let _ = reply.send(result);
                }
                Some(event) = events.recv() => match event {
                    PeerEvent::Message { from, message } => {
                        if let Err(e) = self.on_message(from, message) {
                            log_failure(from, &e);
                        }
                    }
                    PeerEvent::Disconnected { addr, reason } => self.on_disconnect(addr, &reason),
                },
                () = tokio::time::sleep_until(self.next_seal) => self.on_mining_tick(),
                _ = guard.tick() => {
                    if self.sync.check_deadline(std::time::Instant::now()) {
                        info!("sync went quiet, giving up and resuming mining");
                    }
                }
            }
            self.mining_paused
                .store(self.sync.is_mining_paused(), Ordering::Relaxed);
        }

        let peers: Vec<Peer> = self.peers.write().drain().map(|(_, p)| p).collect();
        for peer in peers {
            peer.close().await;
        }
        info!("event loop stopped");
    }

    // -- Peers ---------------------------------------------------------------

    fn on_connect(&mut self, stream: TcpStream, addr: SocketAddr) {
        let (peer, _reader) = Peer::attach(stream, addr, self.events_tx.clone());
        let count = {
            let mut peers = self.peers.write();
            peers.insert(addr, peer);
            peers.len()
        };
        info!(peer = %addr, peers = count, "peer connected");

        if let Err(e) = self.send_to(addr, &Message::ChainInfoRequest) {
            log_failure(addr, &e);
        }
    }

    fn on_disconnect(&mut self, addr: SocketAddr, reason: &str) {
        if self.peers.write().remove(&addr).is_some() {
            info!(peer = %addr, %reason, "peer disconnected");
        }
        self.genesis_conflicts.remove(&addr);
    }

    fn send_to(&self, addr: SocketAddr, message: &Message) -> Result<(), NodeError> {
        let peer = self
            .peers
            .read()
            .get(&addr)
            .cloned()
            .ok_or(NodeError::UnknownPeer(addr))?;
        let frame = Arc::new(message.to_frame()?);
        spawn_send(self.peers.clone(), peer, frame);
        Ok(())
    }

    /// Send to every peer except `except`. Encodes once.
    fn broadcast(&self, message: &Message, except: Option<SocketAddr>) -> Result<(), NodeError> {
        let targets: Vec<Peer> = self
            .peers
            .read()
            .values()
            .filter(|p| Some(p.addr()) != except)
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(());
        }
        let frame = Arc::new(message.to_frame()?);
        for peer in targets {
            spawn_send(self.peers.clone(), peer, frame.clone());
        }
        Ok(())
    }

    // -- Dispatch ------------------------------------------------------------

    fn on_message(&mut self, from: SocketAddr, message: Message) -> Result<(), NodeError> {
        if matches!(
            message,
            Message::ChainInfoResponse { .. }
                | Message::BlockResponse { .. }
                | Message::BlockHashResponse { .. }
        ) {
            self.sync.refresh(std::time::Instant::now());
        }

        match message {
            Message::Tx(tx) => self.on_transaction(tx, Some(from)),
            Message::Block(block) => self.on_gossip_block(from, block),
            Message::ChainInfoRequest => {
                let height = self.ledger.height()?;
                self.send_to(from, &Message::ChainInfoResponse { height })
            }
            Message::ChainInfoResponse { height } => self.on_chain_info(from, height),
            Message::BlockRequest { height } => self.on_block_request(from, height),
            Message::BlockResponse { block } => self.on_block_response(from, block),
            Message::BlockHashRequest { height } => {
                let hash = self
                    .ledger
                    .header_by_height(height)?
                    .map(|h| h.hash())
                    .unwrap_or(ZERO_HASH);
                let local = self.ledger.height()?;
                self.send_to(
                    from,
                    &Message::BlockHashResponse {
                        hash,
                        height: local,
                    },
                )
            }
            Message::BlockHashResponse { hash, height } => self.on_hash_response(from, hash, height),
        }
    }

    // -- Transactions --------------------------------------------------------

    /// Verify, admit and flood. `from` is `None` for local submissions.
    fn on_transaction(&mut self, tx: Transaction, from: Option<SocketAddr>) -> Result<(), NodeError> {
        verify_transaction(&tx)?;
        if self.ledger.contains_tx(&tx.hash())? {
            return Err(LedgerError::Known.into());
        }
        self.pool.add(tx.clone(), &self.ledger)?;
        debug!(tx = %short_hex(&tx.hash()), pending = self.pool.pending_count(), "transaction admitted");
        self.broadcast(&Message::Tx(tx), from)
    }

    /// Put transactions from a reverted block back into the pool.
    fn requeue(&self, transactions: Vec<Transaction>) {
        for tx in transactions {
            let hash = tx.hash();
            if let Err(e) = self.pool.add(tx, &self.ledger) {
                debug!(tx = %short_hex(&hash), error = %e, "reverted transaction not requeued");
            }
        }
    }

    // -- Blocks --------------------------------------------------------------

    fn on_gossip_block(&mut self, from: SocketAddr, block: Block) -> Result<(), NodeError> {
        if self.sync.is_mining_paused() {
            debug!(peer = %from, height = block.height(), "ignoring gossip block while syncing");
            return Ok(());
        }

        // Give the network a chance to settle before sealing on top of it.
        let jitter = rand::thread_rng().gen_range(0..=BLOCK_TIME_JITTER_SECS);
        self.next_seal = Instant::now() + self.block_time + Duration::from_secs(jitter);

        match self.ledger.link_block(&block) {
            Ok(outcome) => {
                info!(
                    peer = %from,
                    height = block.height(),
                    hash = %short_hex(&block.hash()),
                    txs = outcome.committed.len(),
                    "block linked"
                );
                self.requeue(outcome.reverted);
                self.broadcast(&Message::Block(block), Some(from))
            }
            Err(LedgerError::PrevMismatch { .. }) | Err(LedgerError::TooHigh { .. }) => {
                self.start_fork_resolution(from)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn on_mining_tick(&mut self) {
        self.next_seal = Instant::now() + self.block_time;

        let Some(producer) = &self.producer else {
            return;
        };
        if self.sync.is_mining_paused() {
            debug!("sealing skipped, mining paused");
            return;
        }

        let timestamp = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
        match producer.produce_block(timestamp) {
            Ok(produced) => {
                if let Err(e) = self.broadcast(&Message::Block(produced.block), None) {
                    warn!(error = %e, "failed to flood sealed block");
                }
            }
            Err(e) => warn!(error = %e, "block production failed"),
        }
    }

    // -- Sync ----------------------------------------------------------------

    fn on_chain_info(&mut self, from: SocketAddr, height: u32) -> Result<(), NodeError> {
        let local = self.ledger.height()?;
        if height <= local {
            if self.sync.is_mining_paused() {
                info!(peer = %from, height = local, "caught up");
            }
            self.sync.caught_up();
            return Ok(());
        }

        info!(peer = %from, local, remote = height, "peer is ahead, downloading");
        self.sync.set_target(height);
        self.sync.pause(std::time::Instant::now());
        self.send_to(from, &Message::BlockRequest { height: local + 1 })
    }

    fn on_block_request(&mut self, from: SocketAddr, height: u32) -> Result<(), NodeError> {
        self.sync.pause(std::time::Instant::now());

        let tip = self.ledger.height()?;
        let block = self
            .ledger
            .block_by_height(height)?
            .ok_or(NodeError::HeightOutOfRange {
                requested: height,
                tip,
            })?;
        self.send_to(from, &Message::BlockResponse { block })
    }

    fn on_block_response(&mut self, from: SocketAddr, block: Block) -> Result<(), NodeError> {
        let height = block.height();
        match self.ledger.link_block(&block) {
            Ok(outcome) => {
                debug!(peer = %from, height, hash = %short_hex(&block.hash()), "downloaded block linked");
                self.requeue(outcome.reverted);
                self.request_next_or_confirm(from, height)
            }
            Err(LedgerError::PrevMismatch { .. }) | Err(LedgerError::TooHigh { .. }) => {
                self.start_fork_resolution(from)
            }
            Err(LedgerError::Known) => {
                let local = self.ledger.height()?;
                self.request_next_or_confirm(from, local)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn request_next_or_confirm(&mut self, from: SocketAddr, height: u32) -> Result<(), NodeError> {
        if self.sync.wants_more_than(height) {
            self.send_to(from, &Message::BlockRequest { height: height + 1 })
        } else {
            self.sync.clear_target();
            self.send_to(from, &Message::ChainInfoRequest)
        }
    }

    fn start_fork_resolution(&mut self, from: SocketAddr) -> Result<(), NodeError> {
        let local = self.ledger.height()?;
        info!(peer = %from, height = local, "block does not link, probing for common ancestor");
        self.sync.pause(std::time::Instant::now());
        self.probe(from, local)
    }

    fn probe(&mut self, from: SocketAddr, height: u32) -> Result<(), NodeError> {
        self.sync.start_probe(height);
        self.send_to(from, &Message::BlockHashRequest { height })
    }

    fn on_hash_response(
        &mut self,
        from: SocketAddr,
        hash: Hash,
        peer_height: u32,
    ) -> Result<(), NodeError> {
        let Some(probe) = self.sync.take_probe() else {
            debug!(peer = %from, "unsolicited block hash response");
            return Ok(());
        };

        // The peer has nothing at the probed height; ask where its chain ends.
        if peer_height < probe {
            return self.probe(from, peer_height);
        }

        let local_hash = self.ledger.header_by_height(probe)?.map(|h| h.hash());
        if local_hash == Some(hash) {
            let local = self.ledger.height()?;
            info!(peer = %from, height = probe, "common ancestor found");
            if peer_height > local {
                self.sync.set_target(peer_height);
                return self.send_to(from, &Message::BlockRequest { height: local + 1 });
            }
            self.sync.caught_up();
            return Ok(());
        }

        if probe == 0 {
            if !self.genesis_conflicts.insert(from) {
                warn!(peer = %from, "genesis differs from peer, giving up on sync");
                self.sync.caught_up();
                return Ok(());
            }
            warn!(peer = %from, "genesis hash mismatch, requesting block 1");
            self.sync.set_target(peer_height);
            return self.send_to(from, &Message::BlockRequest { height: 1 });
        }

        while self.ledger.height()? >= probe {
            let rolled = self.ledger.rollback_tip()?;
            info!(
                height = rolled.block.height(),
                hash = %short_hex(&rolled.block.hash()),
                txs = rolled.transactions.len(),
                "rolled back diverged block"
            );
            self.requeue(rolled.transactions);
        }
        self.probe(from, probe - 1)
    }
}

fn spawn_send(peers: PeerMap, peer: Peer, frame: Arc<Vec<u8>>) {
    tokio::spawn(async move {
        if let Err(e) = peer.send_frame(&frame).await {
            warn!(peer = %peer.addr(), error = %e, "send failed, dropping peer");
            peers.write().remove(&peer.addr());
            peer.close().await;
        }
    });
}

fn log_failure(peer: SocketAddr, error: &NodeError) {
    if error.is_benign() {
        debug!(peer = %peer, error = %error, "message ignored");
    } else {
        warn!(peer = %peer, error = %error, "message handling failed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::{read_frame, write_frame};
    use crate::storage::LedgerStore;
    use crate::transaction::sign_transaction;

    fn open_ledger(gk: &Keypair) -> Arc<Ledger> {
        let store = LedgerStore::open_temporary().unwrap();
        Arc::new(Ledger::open(store, &Block::genesis(gk)).unwrap())
    }

    fn local_config(seeds: Vec<SocketAddr>) -> NodeConfig {
        NodeConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            seeds,
            block_time: Duration::from_secs(3600),
            ..NodeConfig::default()
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..250 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached in time");
    }

    fn signed(kp: &Keypair, nonce: u64) -> Transaction {
        let mut tx = Transaction::new(nonce, kp.address(), Some(kp.address()), 0, vec![]);
        sign_transaction(&mut tx, kp);
        tx
    }

    #[test]
    fn benign_errors() {
        assert!(NodeError::Ledger(LedgerError::Known).is_benign());
        assert!(NodeError::Pool(PoolError::AlreadyPending).is_benign());
        assert!(!NodeError::Stopped.is_benign());
        assert!(!NodeError::Ledger(LedgerError::PrevMismatch { height: 3 }).is_benign());
    }

    #[tokio::test]
    async fn answers_chain_info_over_the_wire() {
        let gk = Keypair::generate();
        let (handle, _task) = Node::start(local_config(vec![]), open_ledger(&gk), None)
            .await
            .unwrap();

        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        // The node greets every new peer.
        assert_eq!(read_frame(&mut stream).await.unwrap(), Message::ChainInfoRequest);

        write_frame(&mut stream, &Message::ChainInfoRequest).await.unwrap();
        assert_eq!(
            read_frame(&mut stream).await.unwrap(),
            Message::ChainInfoResponse { height: 0 }
        );

        write_frame(&mut stream, &Message::BlockHashRequest { height: 5 })
            .await
            .unwrap();
        assert_eq!(
            read_frame(&mut stream).await.unwrap(),
            Message::BlockHashResponse {
                hash: ZERO_HASH,
                height: 0
            }
        );
        handle.shutdown();
    }

    #[tokio::test]
    async fn serves_blocks_by_height() {
        let gk = Keypair::generate();
        let ledger = open_ledger(&gk);
        let genesis = ledger.last_block().unwrap();
        let (handle, _task) = Node::start(local_config(vec![]), ledger, None)
            .await
            .unwrap();

        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        read_frame(&mut stream).await.unwrap();
        write_frame(&mut stream, &Message::BlockRequest { height: 0 })
            .await
            .unwrap();
        assert_eq!(
            read_frame(&mut stream).await.unwrap(),
            Message::BlockResponse { block: genesis }
        );
        handle.shutdown();
    }

    #[tokio::test]
    async fn submitted_transaction_reaches_peer_pool() {
        let gk = Keypair::generate();
        let (a, _ta) = Node::start(local_config(vec![]), open_ledger(&gk), None)
            .await
            .unwrap();
        let (b, _tb) = Node::start(local_config(vec![a.local_addr()]), open_ledger(&gk), None)
            .await
            .unwrap();
        wait_until(|| a.peer_count() == 1 && b.peer_count() == 1).await;

        let tx = signed(&Keypair::generate(), 0);
        a.submit_transaction(tx.clone()).await.unwrap();
        assert!(a.pool().contains(&tx.hash()));
        wait_until(|| b.pool().contains(&tx.hash())).await;

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn submit_rejects_bad_input() {
        let gk = Keypair::generate();
        let (handle, _task) = Node::start(local_config(vec![]), open_ledger(&gk), None)
            .await
            .unwrap();

        let alice = Keypair::generate();
        let unsigned = Transaction::new(0, alice.address(), None, 0, vec![]);
        assert!(matches!(
            handle.submit_transaction(unsigned).await,
            Err(NodeError::InvalidTransaction(_))
        ));

        let tx = signed(&alice, 0);
        handle.submit_transaction(tx.clone()).await.unwrap();
        assert!(matches!(
            handle.submit_transaction(tx).await,
            Err(NodeError::Pool(PoolError::AlreadyPending))
        ));
        assert!(matches!(
            handle.submit_transaction(signed(&alice, 1)).await,
            Err(NodeError::Pool(PoolError::AccountHasPending(_)))
        ));
        handle.shutdown();
    }

    #[tokio::test]
    async fn submit_checks_nonce_against_ledger() {
        let gk = Keypair::generate();
        let (a, _ta) = Node::start(local_config(vec![]), open_ledger(&gk), None)
            .await
            .unwrap();
        let (b, _tb) = Node::start(local_config(vec![a.local_addr()]), open_ledger(&gk), None)
            .await
            .unwrap();
        wait_until(|| a.peer_count() == 1 && b.peer_count() == 1).await;

        let alice = Keypair::generate();
        let future = signed(&alice, 5);
        assert!(matches!(
            a.submit_transaction(future.clone()).await,
            Err(NodeError::Pool(PoolError::Ledger(LedgerError::BadNonce { expected: 0, got: 5 })))
        ));
        assert!(!a.pool().contains(&future.hash()));

        // The sender's slot is still free and only the valid tx is flooded.
        let current = signed(&alice, 0);
        a.submit_transaction(current.clone()).await.unwrap();
        wait_until(|| b.pool().contains(&current.hash())).await;
        assert!(!b.pool().contains(&future.hash()));

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn bootstrap_validator_seals_blocks() {
        let gk = Keypair::generate();
        let config = NodeConfig {
            block_time: Duration::from_millis(50),
            ..local_config(vec![])
        };
        let (handle, _task) = Node::start(config, open_ledger(&gk), Some(gk.clone()))
            .await
            .unwrap();
        assert_eq!(handle.validator_address(), Some(gk.address()));
        assert!(!handle.is_syncing());

        let ledger = handle.ledger().clone();
        wait_until(|| ledger.height().unwrap() >= 2).await;
        handle.shutdown();
    }

    #[tokio::test]
    async fn stopped_node_refuses_submissions() {
        let gk = Keypair::generate();
        let (handle, task) = Node::start(local_config(vec![]), open_ledger(&gk), None)
            .await
            .unwrap();
        handle.shutdown();
        task.await.unwrap();
        assert!(matches!(
            handle.submit_transaction(signed(&gk, 0)).await,
            Err(NodeError::Stopped)
        ));
    }
}
