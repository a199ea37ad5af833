//! # Ledger State Machine
//!
//! The ledger owns account state and the block, header and transaction
//! indices. Everything that mutates them goes through one of three entry
//! points, all serialized by a ledger-scoped write lock:
//!
//! - [`Ledger::link_block`]: fork-choice, then apply (and possibly roll back
//!   the tip first).
//! - [`Ledger::apply_block_unchecked`]: apply without fork-choice. Used for
//!   genesis and by tests.
//! - [`Ledger::rollback_tip`]: exact inverse of the last apply.
//!
//! ## Apply
//!
//! Transactions run in order against an in-memory account overlay. A
//! transaction with a stale nonce, an overdraft, a credit overflow or a value
//! transfer with no recipient is dropped; the rest of the block still
//! applies. The signer is paid [`BLOCK_REWARD`]. The whole result,
//! including the undo journal for the block, lands in one atomic batch.
//!
//! ## Rollback
//!
//! The journal recorded at apply time is inverted and replayed newest first,
//! again as one batch. Accounts that the block created are deleted, not
//! zeroed.

pub mod ops;
pub mod validator;

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{BLOCK_REWARD, MAX_PAGE_SIZE};
use crate::crypto::hash::short_hex;
use crate::crypto::{Address, Hash};
use crate::storage::{Account, Block, DbError, Header, LedgerStore, WriteBatch};
use crate::transaction::Transaction;

pub use ops::StateOp;
pub use validator::{validate, ValidationError, Verdict};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("block already known or superseded")]
    Known,

    #[error("block {height} is ahead of local tip {tip}")]
    TooHigh { height: u32, tip: u32 },

    #[error("block {height} does not link to the local chain")]
    PrevMismatch { height: u32 },

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    #[error("insufficient balance: {address} has {balance}, needs {needed}")]
    InsufficientBalance {
        address: Address,
        balance: u64,
        needed: u64,
    },

    #[error("bad nonce: expected {expected}, got {got}")]
    BadNonce { expected: u64, got: u64 },

    #[error("value transfer without a recipient")]
    MissingRecipient,

    #[error("credit would overflow the recipient balance")]
    BalanceOverflow,

    #[error("the genesis block cannot be rolled back")]
    GenesisRollback,

    #[error("ledger has no blocks")]
    EmptyChain,

    #[error("no undo journal for block {0}")]
    MissingJournal(u32),
}

impl From<ValidationError> for LedgerError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Known => LedgerError::Known,
            ValidationError::TooHigh { height, tip } => LedgerError::TooHigh { height, tip },
            ValidationError::PrevMismatch { height } => LedgerError::PrevMismatch { height },
            ValidationError::Verification(reason) => LedgerError::Verification(reason.to_string()),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What [`Ledger::link_block`] did.
#[derive(Debug, Clone, Default)]
pub struct LinkOutcome {
    /// Transactions the block actually committed, stamped with its height
    /// and timestamp.
    pub committed: Vec<Transaction>,
    /// Transactions from a replaced tip, as signed, without inclusion stamps.
    pub reverted: Vec<Transaction>,
}

/// What [`Ledger::rollback_tip`] removed.
#[derive(Debug, Clone)]
pub struct RolledBack {
    pub block: Block,
    /// The transactions the block had committed, in block order.
    pub transactions: Vec<Transaction>,
}

/// One page of a newest-first listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// The chain and its account state. Shared as `Arc<Ledger>`.
#[derive(Debug)]
pub struct Ledger {
    store: LedgerStore,
    write_lock: Mutex<()>,
}

impl Ledger {
    /// Open the ledger on `store`, applying `genesis` if the store is empty.
    ///
    /// A store that already holds a different genesis block is refused.
    pub fn open(store: LedgerStore, genesis: &Block) -> LedgerResult<Self> {
        let ledger = Self {
            store,
            write_lock: Mutex::new(()),
        };

        match ledger.store.block_by_height(0)? {
            None => {
                ledger.apply_block_unchecked(genesis)?;
                info!(hash = %short_hex(&genesis.hash()), signer = %genesis.signer(), "genesis applied");
            }
            Some(existing) if existing != *genesis => {
                return Err(LedgerError::Verification(format!(
                    "stored genesis signed by {} does not match configured genesis signed by {}",
                    existing.signer(),
                    genesis.signer(),
                )));
            }
            Some(_) => {
                let height = ledger.height()?;
                info!(height, "ledger opened");
            }
        }

        Ok(ledger)
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    // -- Writes ---------------------------------------------------------------

    /// Run fork-choice against the tip and apply `block` if it wins.
    ///
    /// `Known` is returned for duplicates and fork-choice losers; callers
    /// treat it as benign.
    pub fn link_block(&self, block: &Block) -> LedgerResult<LinkOutcome> {
        let _guard = self.write_lock.lock();
        let tip = self.store.last_block()?.ok_or(LedgerError::EmptyChain)?;

        match validate(block, &tip)? {
            Verdict::Genesis => {
                if self.store.block_by_height(0)?.is_some() {
                    return Err(LedgerError::Known);
                }
                let committed = self.apply_locked(block)?;
                Ok(LinkOutcome {
                    committed,
                    reverted: Vec::new(),
                })
            }
            Verdict::Extend => {
                let committed = self.apply_locked(block)?;
                Ok(LinkOutcome {
                    committed,
                    reverted: Vec::new(),
                })
            }
            Verdict::ReplaceTip => {
                let rolled = self.rollback_locked()?;
                info!(
                    height = block.height(),
                    old = %short_hex(&rolled.block.hash()),
                    new = %short_hex(&block.hash()),
                    "tip replaced by lower-hash block"
                );
                let committed = self.apply_locked(block)?;
                Ok(LinkOutcome {
                    committed,
                    reverted: rolled.transactions,
                })
            }
        }
    }

    /// Apply `block` on top of the current state without fork-choice.
    pub fn apply_block_unchecked(&self, block: &Block) -> LedgerResult<Vec<Transaction>> {
        let _guard = self.write_lock.lock();
        self.apply_locked(block)
    }

    /// Undo the tip block. Refuses genesis.
    pub fn rollback_tip(&self) -> LedgerResult<RolledBack> {
        let _guard = self.write_lock.lock();
        self.rollback_locked()
    }

    fn apply_locked(&self, block: &Block) -> LedgerResult<Vec<Transaction>> {
        let height = block.height();
        let timestamp = block.header().timestamp;

        let mut overlay = AccountOverlay::new(&self.store);
        let mut journal = Vec::with_capacity(block.tx_count() * 3 + 2);
        let mut committed = Vec::with_capacity(block.tx_count());
        let mut next_number = match self.store.last_tx_number()? {
            Some(n) => n + 1,
            None => 0,
        };

        for tx in block.transactions() {
            match overlay.transfer(tx) {
                Ok(account_ops) => {
                    journal.extend(account_ops);
                    let included = tx.included_at(height, timestamp);
                    journal.push(StateOp::TxIndex {
                        tx: included.clone(),
                        number: next_number,
                        present: true,
                    });
                    next_number += 1;
                    committed.push(included);
                }
                Err(LedgerError::Storage(e)) => return Err(e.into()),
                Err(reason) => {
                    debug!(height, tx = %short_hex(&tx.hash()), %reason, "transaction dropped");
                }
            }
        }

        let signer = Address::from_public_key(block.signer());
        match overlay.credit(signer, BLOCK_REWARD)? {
            Some(op) => journal.push(op),
            None => warn!(height, %signer, "block reward would overflow signer balance"),
        }

        journal.push(StateOp::BlockIndex {
            block: block.clone(),
            present: true,
        });

        let mut batch = WriteBatch::new();
        for op in &journal {
            op.stage(&self.store, &mut batch)?;
        }
        LedgerStore::stage_journal(&mut batch, height, &journal)?;
        self.store.apply(batch)?;

        info!(
            height,
            hash = %short_hex(&block.hash()),
            txs = committed.len(),
            dropped = block.tx_count() - committed.len(),
            "block applied"
        );
        Ok(committed)
    }

    fn rollback_locked(&self) -> LedgerResult<RolledBack> {
        let tip = self.store.last_block()?.ok_or(LedgerError::EmptyChain)?;
        let height = tip.height();
        if height == 0 {
            return Err(LedgerError::GenesisRollback);
        }

        let journal = self
            .store
            .journal(height)?
            .ok_or(LedgerError::MissingJournal(height))?;

        let mut batch = WriteBatch::new();
        for op in journal.iter().rev() {
            op.inverse().stage(&self.store, &mut batch)?;
        }
        LedgerStore::unstage_journal(&mut batch, height);
        self.store.apply(batch)?;

        let mut committed: HashSet<Hash> = journal
            .iter()
            .filter_map(|op| match op {
                StateOp::TxIndex {
                    tx, present: true, ..
                } => Some(tx.hash()),
                _ => None,
            })
            .collect();
        let transactions = tip
            .transactions()
            .iter()
            .filter(|tx| committed.remove(&tx.hash()))
            .cloned()
            .collect();

        info!(height, hash = %short_hex(&tip.hash()), "tip rolled back");
        Ok(RolledBack {
            block: tip,
            transactions,
        })
    }

    // -- Block reads ----------------------------------------------------------

    pub fn last_block(&self) -> LedgerResult<Block> {
        self.store.last_block()?.ok_or(LedgerError::EmptyChain)
    }

    pub fn last_header(&self) -> LedgerResult<Header> {
        self.store.last_header()?.ok_or(LedgerError::EmptyChain)
    }

    /// Height of the tip.
    pub fn height(&self) -> LedgerResult<u32> {
        Ok(self.last_header()?.height)
    }

    pub fn block_by_hash(&self, hash: &Hash) -> LedgerResult<Option<Block>> {
        Ok(self.store.block_by_hash(hash)?)
    }

    pub fn block_by_height(&self, height: u32) -> LedgerResult<Option<Block>> {
        Ok(self.store.block_by_height(height)?)
    }

    pub fn header_by_hash(&self, hash: &Hash) -> LedgerResult<Option<Header>> {
        Ok(self.store.header_by_hash(hash)?)
    }

    pub fn header_by_height(&self, height: u32) -> LedgerResult<Option<Header>> {
        Ok(self.store.header_by_height(height)?)
    }

    /// Newest-first page of blocks. `page` is 1-based.
    pub fn blocks(&self, page: usize, size: usize) -> LedgerResult<Page<Block>> {
        let total = u64::from(self.height()?) + 1;
        let mut items = Vec::new();
        for height in page_indices(total, page, size) {
            if let Some(block) = self.store.block_by_height(height as u32)? {
                items.push(block);
            }
        }
        Ok(Page {
            items,
            total_count: total,
        })
    }

    // -- Transaction reads ------------------------------------------------------

    pub fn tx_by_hash(&self, hash: &Hash) -> LedgerResult<Option<Transaction>> {
        Ok(self.store.tx_by_hash(hash)?)
    }

    /// True once `hash` has been committed on the current chain.
    pub fn contains_tx(&self, hash: &Hash) -> LedgerResult<bool> {
        Ok(self.store.has_tx(hash)?)
    }

    pub fn tx_by_number(&self, number: u32) -> LedgerResult<Option<Transaction>> {
        Ok(self.store.tx_by_number(number)?)
    }

    pub fn last_tx(&self) -> LedgerResult<Option<Transaction>> {
        Ok(self.store.last_tx()?)
    }

    pub fn last_tx_number(&self) -> LedgerResult<Option<u32>> {
        Ok(self.store.last_tx_number()?)
    }

    /// Number of committed transactions.
    pub fn tx_count(&self) -> LedgerResult<u64> {
        Ok(self.store.last_tx_number()?.map_or(0, |n| u64::from(n) + 1))
    }

    /// Newest-first page of committed transactions. `page` is 1-based.
    pub fn transactions(&self, page: usize, size: usize) -> LedgerResult<Page<Transaction>> {
        let total = self.tx_count()?;
        let mut items = Vec::new();
        for number in page_indices(total, page, size) {
            if let Some(tx) = self.store.tx_by_number(number as u32)? {
                items.push(tx);
            }
        }
        Ok(Page {
            items,
            total_count: total,
        })
    }

    // -- Account reads ----------------------------------------------------------

    pub fn account(&self, address: &Address) -> LedgerResult<Option<Account>> {
        Ok(self.store.account(address)?)
    }

    pub fn balance(&self, address: &Address) -> LedgerResult<Option<u64>> {
        Ok(self.account(address)?.map(|a| a.balance))
    }

    pub fn nonce(&self, address: &Address) -> LedgerResult<Option<u64>> {
        Ok(self.account(address)?.map(|a| a.nonce))
    }
}

/// Indices on page `page` (1-based) of a newest-first listing over
/// `0..total`.
fn page_indices(total: u64, page: usize, size: usize) -> Vec<u64> {
    let size = size.clamp(1, MAX_PAGE_SIZE) as u64;
    let skip = (page.max(1) as u64 - 1).saturating_mul(size);
    if skip >= total {
        return Vec::new();
    }
    let top = total - 1 - skip;
    let count = size.min(top + 1);
    (0..count).map(|i| top - i).collect()
}

// ---------------------------------------------------------------------------
// Account overlay
// ---------------------------------------------------------------------------

/// Accounts touched by the block being applied. Reads fall through to the
/// store once; every write is returned as a journal op.
struct AccountOverlay<'a> {
    store: &'a LedgerStore,
    accounts: HashMap<Address, Option<Account>>,
}

impl<'a> AccountOverlay<'a> {
    fn new(store: &'a LedgerStore) -> Self {
        Self {
            store,
            accounts: HashMap::new(),
        }
    }

    fn get(&mut self, address: Address) -> LedgerResult<Option<Account>> {
        if let Some(account) = self.accounts.get(&address) {
            return Ok(account.clone());
        }
        let account = self.store.account(&address)?;
        self.accounts.insert(address, account.clone());
        Ok(account)
    }

    fn get_or_new(&mut self, address: Address) -> LedgerResult<Account> {
        Ok(self.get(address)?.unwrap_or_else(|| Account::new(address)))
    }

    /// Caller must have read `account.address` through [`Self::get`] first.
    fn set(&mut self, account: Account) -> StateOp {
        let address = account.address;
        let before = self.accounts.insert(address, Some(account.clone())).flatten();
        StateOp::Account {
            address,
            before,
            after: Some(account),
        }
    }

    /// Check and apply one transaction. On error nothing is written.
    fn transfer(&mut self, tx: &Transaction) -> LedgerResult<Vec<StateOp>> {
        let from = tx.from();
        let value = tx.value();
        let sender = self.get_or_new(from)?;

        if sender.nonce != tx.nonce() {
            return Err(LedgerError::BadNonce {
                expected: sender.nonce,
                got: tx.nonce(),
            });
        }
        if tx.to().is_none() && value > 0 {
            return Err(LedgerError::MissingRecipient);
        }
        let balance = sender
            .balance
            .checked_sub(value)
            .ok_or(LedgerError::InsufficientBalance {
                address: from,
                balance: sender.balance,
                needed: value,
            })?;
        let debited = Account {
            address: from,
            nonce: sender.nonce + 1,
            balance,
        };

        let Some(to) = tx.to() else {
            return Ok(vec![self.set(debited)]);
        };

        if to == from {
            let settled = debited
                .checked_credit(value)
                .ok_or(LedgerError::BalanceOverflow)?;
            return Ok(vec![self.set(settled)]);
        }

        let credited = self
            .get_or_new(to)?
            .checked_credit(value)
            .ok_or(LedgerError::BalanceOverflow)?;
        Ok(vec![self.set(debited), self.set(credited)])
    }

    /// Credit `amount` to `address`, or `None` on overflow.
    fn credit(&mut self, address: Address, amount: u64) -> LedgerResult<Option<StateOp>> {
        let account = self.get_or_new(address)?;
        Ok(account.checked_credit(amount).map(|a| self.set(a)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
