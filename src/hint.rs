//! Per-producer hint contexts (§4.6).
//!
//! A [`HintContext`] wraps a persistent [`HintDf`] and caches `(offset,
//! seq)` so that a producer's successive reservations land on sequential
//! offsets. `seq` is bumped once per successful reservation and is carried
//! on each [`crate::reserve::ReservedExt`] so that [`hint_cancel`] and
//! [`hint_tx_publish`] can detect whether later reservations observed (or
//! interleaved with) the one being cancelled or published.

use crate::constants::HINT_OFF_INVAL;
use crate::error::{Error, Result};
use crate::persist::HintDf;
use crate::txn::{Transaction, TreeId};

pub struct HintContext {
    pub(crate) key: u64,
    pub(crate) tree: TreeId,
    pub(crate) cached_offset: u64,
    pub(crate) cached_seq: u64,
}

impl HintContext {
    pub(crate) fn new(tree: TreeId, key: u64, persisted: HintDf) -> Self {
        HintContext {
            key,
            tree,
            cached_offset: persisted.off,
            cached_seq: persisted.seq,
        }
    }

    /// `hint_get`: read the cached offset only.
    pub fn get(&self) -> u64 {
        self.cached_offset
    }

    /// `hint_update`: advance the cached copy after a successful extent-tier
    /// reservation; returns the `seq` stamped onto the reservation.
    pub(crate) fn update(&mut self, off: u64) -> u64 {
        self.cached_offset = off;
        self.cached_seq += 1;
        self.cached_seq
    }
}

fn is_interleaved(seq_min: u64, seq_max: u64, seq_cnt: u64) -> bool {
    let diff = seq_max - seq_min + 1;
    debug_assert!(diff >= seq_cnt);
    diff > seq_cnt
}

/// `hint_cancel`: roll the cached offset back to `off` (the pre-reserve
/// offset) if this was the most recent, non-interleaved reservation on the
/// hint; otherwise leave the hole in place, or raise [`Error`] on a
/// genuinely violated ordering invariant.
pub(crate) fn hint_cancel(
    hint: &mut HintContext,
    off: u64,
    seq_min: u64,
    seq_max: u64,
    seq_cnt: u64,
) -> Result<()> {
    if hint.cached_seq == seq_max && !is_interleaved(seq_min, seq_max, seq_cnt) {
        hint.cached_offset = off;
        return Ok(());
    }
    if hint.cached_seq > seq_max {
        // A later successful reserve observed this hint; tolerate the hole.
        return Ok(());
    }
    Err(Error::invalid(format!(
        "hint cancel sequence violation: cached_seq={} seq_min={} seq_max={} seq_cnt={}",
        hint.cached_seq, seq_min, seq_max, seq_cnt
    )))
}

/// `hint_tx_publish`: write the new `(off, seq_max)` to the persistent copy
/// of the hint, transactionally, subject to the same ordering rules as
/// cancel.
pub(crate) fn hint_tx_publish(
    txn: &mut Transaction,
    hint: &mut HintContext,
    off: u64,
    seq_min: u64,
    seq_max: u64,
    seq_cnt: u64,
) -> Result<()> {
    let persisted: HintDf = txn.tree_get(hint.tree, hint.key)?.unwrap_or_default();

    if persisted.seq == seq_min || persisted.seq == seq_max {
        return Err(Error::invalid(format!(
            "hint publish sequence violation: persisted_seq={} seq_min={} seq_max={}",
            persisted.seq, seq_min, seq_max
        )));
    }
    if persisted.seq > seq_max {
        // A subsequent reserve's publish already landed; nothing to do.
        return Ok(());
    }
    if persisted.seq < seq_min || is_interleaved(seq_min, seq_max, seq_cnt) {
        txn.tree_upsert(
            hint.tree,
            hint.key,
            &HintDf {
                off,
                seq: seq_max,
            },
        )?;
        return Ok(());
    }
    Err(Error::invalid(format!(
        "hint publish sequence violation: persisted_seq={} seq_min={} seq_max={}",
        persisted.seq, seq_min, seq_max
    )))
}

pub(crate) fn hint_off_or_inval(hint: Option<&HintContext>) -> u64 {
    hint.map(|h| h.get()).unwrap_or(HINT_OFF_INVAL)
}
