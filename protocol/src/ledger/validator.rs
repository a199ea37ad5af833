//! Fork-choice validation.
//!
//! A pure function of the candidate block and the current tip. It decides
//! whether the candidate extends the chain, replaces the tip, or is ignored.
//! It never touches storage; the ledger acts on the [`Verdict`].
//!
//! ```text
//! height == 0            → Genesis
//! height <  tip          → Known
//! height >  tip + 1      → TooHigh        (caller should sync)
//! height == tip          → ReplaceTip iff hash < tip.hash, else Known
//! height == tip + 1      → Extend         (prev hash and signatures checked)
//! ```

use crate::storage::{Block, BlockVerifyError};

/// What the ledger should do with a candidate block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// A height-0 block. Always structurally acceptable.
    Genesis,
    /// The candidate extends the tip by one.
    Extend,
    /// The candidate wins fork choice at the tip height.
    ReplaceTip,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("block already known or superseded")]
    Known,

    #[error("block {height} is ahead of local tip {tip}")]
    TooHigh { height: u32, tip: u32 },

    #[error("block {height} does not link to the local chain")]
    PrevMismatch { height: u32 },

    #[error("block failed verification: {0}")]
    Verification(#[from] BlockVerifyError),
}

/// Decide how `candidate` relates to `tip`.
pub fn validate(candidate: &Block, tip: &Block) -> Result<Verdict, ValidationError> {
    let height = candidate.height();
    let tip_height = tip.height();

    if height == 0 {
        return Ok(Verdict::Genesis);
    }

    if height < tip_height {
        return Err(ValidationError::Known);
    }

    if height > tip_height.saturating_add(1) {
        return Err(ValidationError::TooHigh {
            height,
            tip: tip_height,
        });
    }

    if height == tip_height {
        // Lower hash wins. Arrays compare lexicographically, which is
        // unsigned big-endian order.
        if candidate.hash() >= tip.hash() {
            return Err(ValidationError::Known);
        }
        if candidate.header().prev_block_hash != tip.header().prev_block_hash {
            return Err(ValidationError::PrevMismatch { height });
        }
        candidate.verify()?;
        return Ok(Verdict::ReplaceTip);
    }

    if tip.header().hash() != candidate.header().prev_block_hash {
        return Err(ValidationError::PrevMismatch { height });
    }
    candidate.verify()?;
    Ok(Verdict::Extend)
}
