//! # Chain Synchronization State
//!
//! Sync is driven by the node's event loop, one message at a time. This
//! module holds the little bit of state that carries across messages:
//!
//! ```text
//! Local                               Peer
//! ─────                               ────
//!   │  ChainInfoRequest                 │
//!   │─────────────────────────────────> │
//!   │  ChainInfoResponse { height }     │
//!   │ <─────────────────────────────────│
//!   │  BlockRequest { local + 1 }       │   (mining paused,
//!   │─────────────────────────────────> │    target = height)
//!   │  BlockResponse { block }          │
//!   │ <─────────────────────────────────│
//!   │  ... until target reached ...     │
//! ```
//!
//! When a received block does not link, the node walks back with
//! `BlockHashRequest`s, rolling back its own tip one block at a time until
//! both sides agree on a hash, then downloads forward from there.
//!
//! Mining is paused while any of this is in flight. Every pause carries a
//! deadline of `grace` past the last sync message seen, so a peer that goes
//! quiet mid-download, mid-walk or before it ever answers cannot stop
//! production forever. When the deadline passes the outstanding target and
//! probe are dropped along with the pause.

use std::time::{Duration, Instant};

use crate::config::SYNC_RESUME_GRACE;

#[derive(Debug, Clone)]
pub struct SyncState {
    mining_paused: bool,
    /// Auto-resume deadline. Set whenever mining is paused.
    resume_by: Option<Instant>,
    /// Quiet period after which a pause lapses.
    grace: Duration,
    /// Height we are downloading towards.
    target_height: Option<u32>,
    /// Height of the outstanding `BlockHashRequest`.
    probe_height: Option<u32>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::with_grace(false, SYNC_RESUME_GRACE, Instant::now())
    }
}

impl SyncState {
    /// Initial state. A bootstrap node (no seeds) mines immediately;
    /// everyone else waits to hear from a peer first, for at most
    /// `SYNC_RESUME_GRACE`.
    pub fn new(mining_paused: bool, now: Instant) -> Self {
        Self::with_grace(mining_paused, SYNC_RESUME_GRACE, now)
    }

    pub fn with_grace(mining_paused: bool, grace: Duration, now: Instant) -> Self {
        Self {
            mining_paused,
            resume_by: mining_paused.then(|| now + grace),
            grace,
            target_height: None,
            probe_height: None,
        }
    }

    pub fn is_mining_paused(&self) -> bool {
        self.mining_paused
    }

    /// Pause until `now + grace`. A later deadline already in place is kept.
    pub fn pause(&mut self, now: Instant) {
        self.mining_paused = true;
        let deadline = now + self.grace;
        self.resume_by = Some(self.resume_by.map_or(deadline, |d| d.max(deadline)));
    }

    /// Sync traffic arrived. Pushes the deadline of an existing pause out.
    pub fn refresh(&mut self, now: Instant) {
        if self.mining_paused {
            self.pause(now);
        }
    }

    pub fn resume(&mut self) {
        self.mining_paused = false;
        self.resume_by = None;
    }

    /// Give up on a stalled sync once the deadline has passed: resume
    /// mining and forget the target and probe. Returns true if it did.
    pub fn check_deadline(&mut self, now: Instant) -> bool {
        match self.resume_by {
            Some(deadline) if now >= deadline => {
                self.caught_up();
                true
            }
            _ => false,
        }
    }

    pub fn target_height(&self) -> Option<u32> {
        self.target_height
    }

    pub fn set_target(&mut self, height: u32) {
        self.target_height = Some(height);
    }

    pub fn clear_target(&mut self) {
        self.target_height = None;
    }

    /// True while a download target above `height` is outstanding.
    pub fn wants_more_than(&self, height: u32) -> bool {
        matches!(self.target_height, Some(t) if t > height)
    }

    pub fn probe_height(&self) -> Option<u32> {
        self.probe_height
    }

    pub fn start_probe(&mut self, height: u32) {
        self.probe_height = Some(height);
    }

    /// Take the outstanding probe, if any.
    pub fn take_probe(&mut self) -> Option<u32> {
        self.probe_height.take()
    }

    /// Caught up with the network: no target, no probe, mining on.
    pub fn caught_up(&mut self) {
        self.target_height = None;
        self.probe_height = None;
        self.resume();
    }
}
