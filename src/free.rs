//! Free paths (§4.4): `compound_free` (in-memory only, used by both the
//! aging-buffer flush and by cancel), `persistent_free` (durable, runs inside
//! the caller's transaction), `aggregated_free` (stages a freed range into
//! the aging buffer on commit), and the public [`free`] entry point that
//! ties the three together.
//!
//! Grounded on DAOS's `vea_free.c` (`free_type`, `persistent_free_extent`,
//! `persistent_free`, `aggregated_free`, `compound_free_extent`,
//! `compound_free`).

use crate::aging::AggEntry;
use crate::error::{Error, Result};
use crate::index::bitmap::BitmapState;
use crate::index::FreeType;
use crate::instance::Instance;
use crate::ordered_index::{OrderedIndex, Probe};
use crate::persist::{FreeBitmapDf, FreeExtentDf};
use crate::txn::{Transaction, TreeId};

/// Public `free`: release `[off, off+cnt)` back to the allocator. Durable as
/// of the point this call returns; the range only becomes reusable once a
/// later [`crate::instance::Instance::flush`] promotes it out of the aging
/// buffer.
pub fn free(instance: &mut Instance, off: u64, cnt: u32) -> Result<()> {
    if cnt == 0 {
        return Err(Error::invalid("free requires a positive block count"));
    }
    let ty = instance.index.classify(off, cnt)?;

    let mut txn = instance.pool().begin();
    persistent_free(&mut txn, ty, off, cnt)?;
    txn.commit()?;

    // `aggregated_free` is the on-commit callback's body; run directly since
    // this mock engine's callbacks can't safely capture `&mut Instance`.
    aggregated_free(instance, ty, off, cnt);
    instance.schedule_aging_flush(false);
    Ok(())
}

// ---- persistent_free (durable) -----------------------------------------

/// `persistent_free`: write the freed range into the persistent free tree
/// (or clear the corresponding bits of a persistent bitmap chunk), merging
/// unconditionally with an abutting persisted neighbor — the persistent
/// tree always reflects the true union of free and still-aging space, so it
/// carries no [`crate::constants::LARGE_AGING_FRAG_BLKS`] ceiling.
pub(crate) fn persistent_free(txn: &mut Transaction, ty: FreeType, off: u64, cnt: u32) -> Result<()> {
    match ty {
        FreeType::Extent => persistent_merge_extent(txn, TreeId::Free, off, cnt).map(|_| ()),
        FreeType::Bitmap(chunk_off) => {
            let mut df: FreeBitmapDf = txn
                .tree_get(TreeId::Bitmap, chunk_off)?
                .ok_or_else(|| Error::invalid(format!("no persistent bitmap chunk at {chunk_off}")))?;
            let class = df.class as u32;
            let rel = off - df.blk_off;
            if rel % class as u64 != 0 || cnt != class {
                return Err(Error::invalid(format!(
                    "free range [{off}, {cnt}) does not align to chunk {chunk_off} class {class}"
                )));
            }
            let slot = (rel / class as u64) as usize;
            let words = df.bitmap_words.clone();
            let mut bits: bitvec::vec::BitVec<u64, bitvec::order::Lsb0> = bitvec::vec::BitVec::from_vec(words);
            bits.truncate(df.slots() as usize);
            if !bits[slot] {
                return Err(Error::invalid(format!("double free of bitmap slot {slot} in chunk {chunk_off}")));
            }
            bits.set(slot, false);
            df.bitmap_words = bits.into_vec();
            txn.tree_upsert(TreeId::Bitmap, chunk_off, &df)
        }
    }
}

/// Unconditional offset-tree merge against persisted neighbors, used for
/// both the persistent free tree (here) and, inversely, by
/// `persistent_alloc_extent` in `publish.rs`.
pub(crate) fn persistent_merge_extent(
    txn: &mut Transaction,
    tree: TreeId,
    off: u64,
    cnt: u32,
) -> Result<(u64, u32)> {
    if txn.tree_get::<FreeExtentDf>(tree, off)?.is_some() {
        return Err(Error::invalid(format!("overlapping persistent free extent at {off}")));
    }
    let mut merged_off = off;
    let mut merged_cnt = cnt;

    if let Some((poff, pext)) = txn.tree_prev::<FreeExtentDf>(tree, off)? {
        if pext.end() > off {
            return Err(Error::invalid(format!(
                "overlapping persistent free extent: predecessor [{}, {}) overlaps [{off}, {})",
                pext.blk_off, pext.end(), off + cnt as u64
            )));
        }
        if pext.end() == off {
            txn.tree_delete(tree, poff)?;
            merged_off = pext.blk_off;
            merged_cnt += pext.blk_cnt;
        }
    }
    let merged_end = merged_off + merged_cnt as u64;
    if let Some((noff, next)) = txn.tree_probe::<FreeExtentDf>(tree, Probe::Ge, merged_end)? {
        if noff < merged_end {
            return Err(Error::invalid(format!(
                "overlapping persistent free extent: successor at {noff} overlaps [{merged_off}, {merged_end})"
            )));
        }
        if noff == merged_end {
            txn.tree_delete(tree, noff)?;
            merged_cnt += next.blk_cnt;
        }
    }

    txn.tree_upsert(
        tree,
        merged_off,
        &FreeExtentDf {
            blk_off: merged_off,
            blk_cnt: merged_cnt,
            age: 0,
        },
    )?;
    Ok((merged_off, merged_cnt))
}

/// Remove (a piece of) a persistent free extent, splitting the stored entry
/// as needed. Used by `persistent_alloc_extent` when publishing a
/// reservation that was served out of the persistent free tree's slack.
pub(crate) fn persistent_remove_extent(txn: &mut Transaction, tree: TreeId, off: u64, cnt: u32) -> Result<()> {
    let (poff, pext) = txn
        .tree_probe::<FreeExtentDf>(tree, Probe::Le, off)?
        .filter(|(_, v)| v.end() >= off + cnt as u64)
        .ok_or_else(|| Error::invalid(format!("no persistent free extent contains [{off}, {})", off + cnt as u64)))?;
    txn.tree_delete(tree, poff)?;
    let front = off - pext.blk_off;
    let back = pext.end() - (off + cnt as u64);
    if front > 0 {
        txn.tree_upsert(
            tree,
            pext.blk_off,
            &FreeExtentDf {
                blk_off: pext.blk_off,
                blk_cnt: front as u32,
                age: 0,
            },
        )?;
    }
    if back > 0 {
        let tail_off = off + cnt as u64;
        txn.tree_upsert(
            tree,
            tail_off,
            &FreeExtentDf {
                blk_off: tail_off,
                blk_cnt: back as u32,
                age: 0,
            },
        )?;
    }
    Ok(())
}

// ---- aggregated_free (staged, not yet allocatable) ----------------------

/// `aggregated_free`: stage a freed range into the relevant aging buffer
/// (the instance-wide one for a plain extent, or the owning chunk's own for
/// a bitmap slot), subject to the [`crate::constants::LARGE_AGING_FRAG_BLKS`]
/// ceiling, and
/// track it on the global LRU so [`crate::instance::Instance::flush`] can
/// find it again once it has aged out.
pub(crate) fn aggregated_free(instance: &mut Instance, ty: FreeType, off: u64, cnt: u32) {
    let entry = AggEntry {
        blk_off: off,
        blk_cnt: cnt,
        age: crate::aging::current_coarse_seconds(),
    };
    match ty {
        FreeType::Extent => {
            let (merged, swallowed) = instance.agg_tree_mut().insert_merging(entry);
            for s in swallowed {
                instance.agg_lru_mut().remove(s);
            }
            instance.agg_lru_mut().push_back(merged.blk_off, None);
        }
        FreeType::Bitmap(chunk_off) => {
            let Some(chunk) = instance.index.bitmap_tree.get_mut(chunk_off) else {
                return;
            };
            let (merged, swallowed) = chunk.agg_tree.insert_merging(entry);
            for s in swallowed {
                instance.agg_lru_mut().remove(s);
            }
            instance.agg_lru_mut().push_back(merged.blk_off, Some(chunk_off));
        }
    }
    instance.metrics().frags_aging.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
}

// ---- compound_free (in-memory promotion, used by flush and by cancel) ---

/// `compound_free` for a plain extent: merge it back into the allocatable
/// offset tree, respecting the aging ceiling, and account for the
/// newly-allocatable space.
pub(crate) fn compound_free_extent(instance: &mut Instance, off: u64, cnt: u32) -> Result<()> {
    instance.index.merge_with_neighbors(off, cnt, true)?;
    instance.metrics().inc_extent_blks(cnt as u64);
    Ok(())
}

/// `compound_free` for a bitmap slot: clear the in-memory bit, re-dock the
/// chunk's LRU membership, and reclaim the whole chunk back to the extent
/// tier if it is a never-published (`New`) chunk that just went empty.
pub(crate) fn compound_free_bitmap(instance: &mut Instance, chunk_off: u64, off: u64, cnt: u32) -> Result<()> {
    let reclaim = {
        let entry = instance
            .index
            .bitmap_tree
            .get_mut(chunk_off)
            .ok_or_else(|| Error::invalid(format!("no bitmap chunk at {chunk_off}")))?;
        let slots = entry
            .slot_range(off, cnt)
            .ok_or_else(|| Error::invalid(format!("misaligned bitmap free [{off}, {cnt}) in chunk {chunk_off}")))?;
        for slot in slots {
            entry.bitmap.set(slot, false);
        }
        entry.is_empty_bitmap() && entry.state == BitmapState::New
    };

    if reclaim {
        let entry = instance.index.remove_bitmap_entry(chunk_off).expect("just looked up");
        instance.metrics().dec_bitmap_blks(entry.blk_cnt as u64 - cnt as u64);
        compound_free_extent(instance, entry.blk_off, entry.blk_cnt)?;
        return Ok(());
    }

    instance.index.dock_bitmap(chunk_off);
    instance.metrics().inc_bitmap_blks(cnt as u64);
    Ok(())
}

/// Dispatch to the extent or bitmap flavor of `compound_free` by
/// classifying `(off, cnt)` fresh (used by cancel, where the range may no
/// longer be associated with the [`FreeType`] it had at reserve time if a
/// bitmap chunk was reclaimed in between).
pub(crate) fn compound_free(instance: &mut Instance, off: u64, cnt: u32) -> Result<()> {
    match instance.index.classify(off, cnt)? {
        FreeType::Extent => compound_free_extent(instance, off, cnt),
        FreeType::Bitmap(chunk_off) => compound_free_bitmap(instance, chunk_off, off, cnt),
    }
}
