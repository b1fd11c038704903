//! The reserve protocol (§4.2): hint path, bitmap path, small path, large
//! path, with a single forced-flush retry before giving up.
//!
//! Grounded on DAOS's `vea_alloc.c` (`reserve_hint`, `reserve_bitmap`,
//! `reserve_bitmap_chunk`, `reserve_size_tree`, `reserve_extent`,
//! `reserve_single`) and `vea_api.c`'s `vea_reserve`.

use crate::constants::*;
use crate::error::{Error, ErrorKind, Result};
use crate::hint::HintContext;
use crate::index::bitmap::{chunk_blks, BitmapEntry};
use crate::instance::Instance;
use crate::ordered_index::{OrderedIndex, Probe};

/// One reservation handed back to the caller. Not yet durable: the caller
/// must [`crate::publish::tx_publish`] or [`crate::publish::cancel`] every
/// entry it produces.
#[derive(Clone, Copy, Debug)]
pub struct ReservedExt {
    pub off: u64,
    pub cnt: u32,
    /// The hint's cached offset *before* this reservation touched it (used
    /// by cancel to know what to roll back to); [`HINT_OFF_INVAL`] if no
    /// hint was involved.
    pub hint_off_before: u64,
    pub hint_seq: u64,
    /// `Some(chunk_off)` if this range came out of a bitmap chunk.
    pub bitmap_chunk: Option<u64>,
    pub new_bitmap_chunk: bool,
}

impl ReservedExt {
    fn extent(off: u64, cnt: u32, hint_off_before: u64, hint_seq: u64) -> Self {
        ReservedExt {
            off,
            cnt,
            hint_off_before,
            hint_seq,
            bitmap_chunk: None,
            new_bitmap_chunk: false,
        }
    }
}

/// `vea_reserve`: reserve `n` blocks, trying (in order) the caller's hint,
/// the bitmap tier, the small-extent tier, and the large-extent tier, with
/// one forced aging-buffer flush before reporting [`ErrorKind::NoSpace`].
pub fn reserve(
    instance: &mut Instance,
    n: u32,
    mut hint: Option<&mut HintContext>,
    out: &mut Vec<ReservedExt>,
) -> Result<()> {
    if n == 0 {
        return Err(Error::invalid("reserve requires a positive block count"));
    }

    instance.inline_aging_flush(false, MAX_FLUSH_FRAGS);

    if let Some(r) = try_reserve(instance, n, hint.as_deref_mut())? {
        out.push(r);
        return Ok(());
    }

    log::warn!("reserve: first attempt for {n} blocks failed, forcing an aging flush and retrying");
    instance.inline_aging_flush(true, FORCED_FLUSH_FRAGS);

    match try_reserve(instance, n, hint.as_deref_mut())? {
        Some(r) => {
            out.push(r);
            Ok(())
        }
        None => Err(ErrorKind::NoSpace.into()),
    }
}

fn try_reserve(
    instance: &mut Instance,
    n: u32,
    mut hint: Option<&mut HintContext>,
) -> Result<Option<ReservedExt>> {
    let bitmap_enabled = instance.bitmap_enabled();
    let try_hint = !(bitmap_enabled && n <= MAX_BITMAP_CLASS);

    if try_hint {
        if let Some(r) = reserve_hint(instance, n, hint.as_deref_mut())? {
            instance.metrics().resrv_hint.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            instance.metrics().dec_extent_blks(n as u64);
            return Ok(Some(r));
        }
    }

    if let Some(r) = reserve_small(instance, n)? {
        // reserve_small covers both the bitmap tier and the size tree; only
        // a size-tree hit touches the caller's hint (bitmap-tier
        // reservations use the allocator's own dedicated hint instead).
        if r.bitmap_chunk.is_none() {
            let seq = hint.as_deref_mut().map(|h| h.update(r.off + r.cnt as u64));
            instance.metrics().resrv_small.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            instance.metrics().dec_extent_blks(n as u64);
            return Ok(Some(ReservedExt {
                hint_seq: seq.unwrap_or(0),
                ..r
            }));
        }
        instance.metrics().resrv_bitmap.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        instance.metrics().dec_bitmap_blks(n as u64);
        return Ok(Some(r));
    }

    if let Some((off, cnt)) = reserve_extent_tier(instance, n)? {
        let seq = hint.as_deref_mut().map(|h| h.update(off + cnt as u64));
        instance.metrics().resrv_large.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        instance.metrics().dec_extent_blks(n as u64);
        return Ok(Some(ReservedExt::extent(off, cnt, HINT_OFF_INVAL, seq.unwrap_or(0))));
    }

    Ok(None)
}

/// `reserve_hint`: exact-offset fast path. Only valid if a free extent
/// starts precisely at the hint's cached offset and is big enough.
fn reserve_hint(
    instance: &mut Instance,
    n: u32,
    hint: Option<&mut HintContext>,
) -> Result<Option<ReservedExt>> {
    let Some(hint) = hint else { return Ok(None) };
    let off_before = hint.get();
    if off_before == HINT_OFF_INVAL {
        return Ok(None);
    }
    let big_enough = instance
        .index
        .free_tree
        .get(off_before)
        .map(|e| e.cnt() >= n)
        .unwrap_or(false);
    if !big_enough {
        return Ok(None);
    }
    instance.index.shrink_front(off_before, n);
    let seq = hint.update(off_before + n as u64);
    Ok(Some(ReservedExt::extent(off_before, n, off_before, seq)))
}

/// `reserve_small`: the bitmap tier (if applicable), then the size tree.
/// Neither of these is attempted for `n` above the large threshold.
fn reserve_small(instance: &mut Instance, n: u32) -> Result<Option<ReservedExt>> {
    if instance.bitmap_enabled() && (MIN_BITMAP_CLASS..=MAX_BITMAP_CLASS).contains(&n) {
        if let Some(r) = reserve_bitmap(instance, n)? {
            return Ok(Some(r));
        }
    }
    if n > instance.large_thresh() {
        return Ok(None);
    }
    Ok(reserve_size_tree(instance, n).map(|(off, cnt)| ReservedExt::extent(off, cnt, HINT_OFF_INVAL, 0)))
}

/// `reserve_bitmap`: a free slot in an existing chunk's LRU, then an empty
/// chunk's first slot, then carve a brand-new chunk.
fn reserve_bitmap(instance: &mut Instance, n: u32) -> Result<Option<ReservedExt>> {
    for chunk_off in instance.index.bitmap_lru_iter(n).collect::<Vec<_>>() {
        let Some(entry) = instance.index.bitmap_tree.get_mut(chunk_off) else { continue };
        let Some(slot) = entry.first_free_slot() else {
            // Stale LRU membership (shouldn't normally happen); drop it.
            instance.index.undock_bitmap(chunk_off, entry.class);
            continue;
        };
        entry.bitmap.set(slot, true);
        let off = entry.slot_offset(slot);
        let now_full = entry.first_free_slot().is_none();
        if now_full {
            instance.index.undock_bitmap(chunk_off, n);
        }
        return Ok(Some(ReservedExt {
            off,
            cnt: n,
            hint_off_before: HINT_OFF_INVAL,
            hint_seq: 0,
            bitmap_chunk: Some(chunk_off),
            new_bitmap_chunk: false,
        }));
    }

    if let Some(chunk_off) = instance.index.bitmap_empty_pop(n) {
        let entry = instance.index.bitmap_tree.get_mut(chunk_off).expect("bitmap entry must exist");
        entry.bitmap.set(0, true);
        let off = entry.slot_offset(0);
        instance.index.dock_bitmap(chunk_off);
        return Ok(Some(ReservedExt {
            off,
            cnt: n,
            hint_off_before: HINT_OFF_INVAL,
            hint_seq: 0,
            bitmap_chunk: Some(chunk_off),
            new_bitmap_chunk: false,
        }));
    }

    reserve_bitmap_chunk(instance, n)
}

/// Carve a brand-new chunk for class `n`, using the allocator's own
/// dedicated hint context so repeated chunk carving also benefits from the
/// sequential fast path.
fn reserve_bitmap_chunk(instance: &mut Instance, class: u32) -> Result<Option<ReservedExt>> {
    let large_free = instance.metrics().free_extent_blks.load(std::sync::atomic::Ordering::Relaxed)
        >= (32u64 << 30) / BLK_SZ as u64;
    let blks = chunk_blks(class, large_free);

    let mut bitmap_hint = instance.take_bitmap_hint();
    let found = reserve_bitmap_chunk_extent(instance, blks, bitmap_hint.as_mut());

    let result = match found {
        Ok(Some((off, cnt))) => {
            instance.metrics().dec_extent_blks(blks as u64);
            if let Some(h) = bitmap_hint.as_mut() {
                h.update(off + cnt as u64);
            }
            let entry = BitmapEntry::new_empty(off, blks, class);
            instance.index.insert_bitmap_entry(entry);
            let slot_off = {
                let e = instance.index.bitmap_tree.get_mut(off).unwrap();
                e.bitmap.set(0, true);
                e.slot_offset(0)
            };
            instance.index.dock_bitmap(off);
            instance.metrics().inc_bitmap_blks(blks as u64);
            Ok(Some(ReservedExt {
                off: slot_off,
                cnt: class,
                hint_off_before: HINT_OFF_INVAL,
                hint_seq: 0,
                bitmap_chunk: Some(off),
                new_bitmap_chunk: true,
            }))
        }
        Ok(None) => Ok(None),
        Err(e) => Err(e),
    };
    instance.restore_bitmap_hint(bitmap_hint);
    result
}

/// The hint/size-tree/large-heap fallback chain used to carve a fresh
/// bitmap chunk out of the extent tier, using the caller-supplied dedicated
/// bitmap hint rather than a producer's hint.
fn reserve_bitmap_chunk_extent(
    instance: &mut Instance,
    blks: u32,
    hint: Option<&mut HintContext>,
) -> Result<Option<(u64, u32)>> {
    if let Some(h) = hint {
        if let Some(r) = reserve_hint(instance, blks, Some(h))? {
            return Ok(Some((r.off, r.cnt)));
        }
    }
    if let Some(hit) = reserve_size_tree(instance, blks) {
        return Ok(Some(hit));
    }
    reserve_extent_tier(instance, blks)
}

/// `reserve_size_tree`: best-fit via `Probe::Ge` into the size tree, taking
/// the least-recently-used member of the smallest class that still fits.
fn reserve_size_tree(instance: &mut Instance, n: u32) -> Option<(u64, u32)> {
    let class_key = *instance.index.size_tree.probe(Probe::Ge, n)?.0;
    let off = instance
        .index
        .size_tree
        .get(class_key)
        .and_then(|sc| sc.least_recently_used())?;
    instance.index.shrink_front(off, n);
    Some((off, n))
}

/// `reserve_extent`: the large-extent heap. If the root extent isn't much
/// bigger than what's needed, carve straight off its front; otherwise split
/// it in half and reserve from the back half, re-docking the front half and
/// any leftover tail as plain (unmerged, unaccounted) free extents.
fn reserve_extent_tier(instance: &mut Instance, n: u32) -> Result<Option<(u64, u32)>> {
    let large_thresh = instance.large_thresh();
    let root = instance
        .index
        .large_heap
        .root(|off| instance.index.free_tree.get(off).map(|e| e.cnt()).unwrap_or(0));
    let Some(off) = root else { return Ok(None) };
    let tot = instance.index.free_tree.get(off).expect("heap member must exist in offset tree").cnt();
    if tot < n {
        return Ok(None);
    }

    if tot <= n.max(large_thresh) * 2 {
        instance.index.shrink_front(off, n);
        return Ok(Some((off, n)));
    }

    let half = tot >> 1;
    instance.index.remove_extent(off);
    instance.index.insert_extent(off, half);
    let second_half_off = off + half as u64;
    let tail_off = second_half_off + n as u64;
    let tail_cnt = tot - half - n;
    if tail_cnt > 0 {
        instance.index.insert_extent(tail_off, tail_cnt);
    }
    Ok(Some((second_half_off, n)))
}
