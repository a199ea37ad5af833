// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Keel Protocol — Core Library
//!
//! Keel is a small permissioned ledger: a fixed set of authority keys seal
//! blocks, everyone else relays and verifies. There is no mining puzzle and
//! no stake. A block is valid if the right key signed it and it links.
//!
//! ## Architecture
//!
//! - **crypto** — Ed25519 keys, BLAKE3/SHA-256 hashing, 20-byte addresses.
//! - **transaction** — Signed value transfers and their canonical hash.
//! - **storage** — Blocks, headers, accounts and the sled-backed store.
//! - **ledger** — The state machine: fork choice, apply, exact rollback.
//! - **network** — Wire codec, peers, pool, sealing and chain sync.
//! - **config** — Protocol constants and network parameters.
//!
//! ## Design Philosophy
//!
//! 1. Every ledger write is one atomic batch. Crash anywhere, reopen clean.
//! 2. Every apply records its own undo. Rollback never guesses.
//! 3. Fork choice is a pure function of two blocks, so every node picks the
//!    same winner no matter what order blocks arrive in.

pub mod config;
pub mod crypto;
pub mod ledger;
pub mod network;
pub mod storage;
pub mod transaction;
