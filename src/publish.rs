//! Publish and cancel (§4.3): turn a caller's list of [`ReservedExt`]s either
//! into durable allocations (`tx_publish`, inside the caller's transaction)
//! or back into free space (`cancel`, synchronous).
//!
//! Grounded on DAOS's `vea_api.c` (`process_resrvd_list`, `vea_cancel`,
//! `vea_tx_publish`) and `vea_alloc.c`'s `persistent_alloc`/
//! `persistent_alloc_extent`.

use crate::constants::HINT_OFF_INVAL;
use crate::error::{Error, Result};
use crate::free::{compound_free, persistent_remove_extent};
use crate::hint::{hint_cancel, hint_tx_publish, HintContext};
use crate::index::bitmap::BitmapState;
use crate::instance::Instance;
use crate::persist::FreeBitmapDf;
use crate::reserve::ReservedExt;
use crate::txn::{Transaction, TreeId};

/// `cancel`: return every entry in `list` to the in-memory allocatable index
/// via `compound_free`, then roll the hint context back if this was the most
/// recent, non-interleaved reservation on it.
pub fn cancel(instance: &mut Instance, hint: Option<&mut HintContext>, list: &[ReservedExt]) -> Result<()> {
    for r in list {
        compound_free(instance, r.off, r.cnt)?;
    }

    let Some(hint) = hint else { return Ok(()) };
    let hinted: Vec<&ReservedExt> = list.iter().filter(|r| r.hint_off_before != HINT_OFF_INVAL).collect();
    if hinted.is_empty() {
        return Ok(());
    }
    let seq_min = hinted.iter().map(|r| r.hint_seq).min().unwrap();
    let seq_max = hinted.iter().map(|r| r.hint_seq).max().unwrap();
    let seq_cnt = hinted.len() as u64;
    let rollback_off = hinted.iter().min_by_key(|r| r.hint_seq).unwrap().hint_off_before;
    hint_cancel(hint, rollback_off, seq_min, seq_max, seq_cnt)
}

/// `tx_publish`: make every entry in `list` durable, inside the caller's
/// already-open transaction `txn`.
pub fn tx_publish(
    instance: &mut Instance,
    txn: &mut Transaction,
    hint: Option<&mut HintContext>,
    list: &[ReservedExt],
) -> Result<()> {
    for r in list {
        persistent_alloc(instance, txn, r)?;
    }

    let Some(hint) = hint else { return Ok(()) };
    let hinted: Vec<&ReservedExt> = list.iter().filter(|r| r.hint_off_before != HINT_OFF_INVAL).collect();
    if hinted.is_empty() {
        return Ok(());
    }
    let seq_min = hinted.iter().map(|r| r.hint_seq).min().unwrap();
    let seq_max = hinted.iter().map(|r| r.hint_seq).max().unwrap();
    let seq_cnt = hinted.len() as u64;
    hint_tx_publish(txn, hint, hint.get(), seq_min, seq_max, seq_cnt)
}

/// `persistent_alloc`: the inverse of `persistent_free` for one reservation —
/// removes the range from the persistent free tree, or sets its bit in the
/// persistent bitmap, carving a brand-new chunk's backing extent and
/// upserting its first `FreeBitmapDf` when necessary.
fn persistent_alloc(instance: &mut Instance, txn: &mut Transaction, r: &ReservedExt) -> Result<()> {
    let Some(chunk_off) = r.bitmap_chunk else {
        return persistent_remove_extent(txn, TreeId::Free, r.off, r.cnt);
    };

    if r.new_bitmap_chunk {
        publish_new_bitmap_chunk(instance, txn, chunk_off, r.cnt)
    } else {
        persistent_alloc_bitmap_slot(txn, chunk_off, r.off, r.cnt)
    }
}

/// The "new bitmap chunks" sub-protocol (§4.3): carve the chunk's backing
/// extent out of the persistent free tree, write its first `FreeBitmapDf`,
/// and flip the in-memory entry's state `New` → `Publishing` → `Published`.
/// A real transaction engine would stage the state flip as ONCOMMIT/ONABORT
/// callbacks on a nested transaction; this mock engine's callbacks cannot
/// safely capture `&mut Instance`, so the flip happens synchronously around
/// the nested scope instead (see `txn::NestedTransaction`).
fn publish_new_bitmap_chunk(instance: &mut Instance, txn: &mut Transaction, chunk_off: u64, _class: u32) -> Result<()> {
    let (blk_cnt, df) = {
        let entry = instance
            .index
            .bitmap_tree
            .get_mut(chunk_off)
            .ok_or_else(|| Error::invalid(format!("no bitmap chunk at {chunk_off}")))?;
        entry.state = BitmapState::Publishing;
        (entry.blk_cnt, entry.to_persistent())
    };

    let mut nested = txn.nested();
    let alloc_result = persistent_remove_extent(&mut nested, TreeId::Free, chunk_off, blk_cnt)
        .and_then(|_| nested.tree_upsert(TreeId::Bitmap, chunk_off, &df));

    match alloc_result {
        Ok(()) => {
            nested.commit();
            if let Some(entry) = instance.index.bitmap_tree.get_mut(chunk_off) {
                entry.state = BitmapState::Published;
            }
            Ok(())
        }
        Err(e) => {
            nested.abort();
            if let Some(entry) = instance.index.bitmap_tree.get_mut(chunk_off) {
                entry.state = BitmapState::New;
            }
            Err(e)
        }
    }
}

/// Set the bit for an already-published chunk's slot in its persistent
/// `FreeBitmapDf`.
fn persistent_alloc_bitmap_slot(txn: &mut Transaction, chunk_off: u64, off: u64, cnt: u32) -> Result<()> {
    let mut df: FreeBitmapDf = txn
        .tree_get(TreeId::Bitmap, chunk_off)?
        .ok_or_else(|| Error::invalid(format!("no persistent bitmap chunk at {chunk_off}")))?;
    let class = df.class as u32;
    let rel = off - df.blk_off;
    if rel % class as u64 != 0 || cnt != class {
        return Err(Error::invalid(format!(
            "publish range [{off}, {cnt}) does not align to chunk {chunk_off} class {class}"
        )));
    }
    let slot = (rel / class as u64) as usize;
    let words = df.bitmap_words.clone();
    let mut bits: bitvec::vec::BitVec<u64, bitvec::order::Lsb0> = bitvec::vec::BitVec::from_vec(words);
    bits.truncate(df.slots() as usize);
    if bits[slot] {
        return Err(Error::invalid(format!("double publish of bitmap slot {slot} in chunk {chunk_off}")));
    }
    bits.set(slot, true);
    df.bitmap_words = bits.into_vec();
    txn.tree_upsert(TreeId::Bitmap, chunk_off, &df)
}
