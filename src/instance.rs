//! The `Instance` (§3, §5): the single-writer handle binding one persistent
//! `SpaceDf` header to its in-memory indexes, aging buffers, and metrics.
//!
//! Mirrors how `database::handler::Handler` is the one shared, externally
//! synchronized handle a dataset's operations are threaded through; VEA's
//! `Instance` plays the same role for the allocator core, with the caller
//! expected to hold its own lock across every call (§5).

use crate::aging::{AggTree, AgingLru};
use crate::constants::*;
use crate::error::{Error, Result};
use crate::free;
use crate::hint::HintContext;
use crate::index::{FreeSpaceIndex, FreeType};
use crate::metrics::{Metrics, Stat};
use crate::ordered_index::OrderedIndex;
use crate::persist::{HintDf, SpaceDf};
use crate::txn::{MemPmemPool, TreeId};
use crate::unmap::{UnmapContext, UnmapRange};
use std::sync::Arc;

/// Attributes fixed at `format` time, returned by [`Instance::query`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attr {
    pub compat: u32,
    pub block_sz: u32,
    pub hdr_blks: u32,
    pub large_thresh: u32,
    pub total_blks: u64,
    pub free_blks: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Query {
    pub attr: Attr,
    pub stat: Stat,
}

pub struct Instance {
    pool: MemPmemPool,
    pub(crate) index: FreeSpaceIndex,
    agg_tree: AggTree,
    agg_lru: AgingLru,
    bitmap_hint: Option<HintContext>,
    unmap_ctx: Arc<dyn UnmapContext>,
    metrics: Metrics,
    header: SpaceDf,
    last_flush: u32,
    flush_scheduled: bool,
}

impl Instance {
    pub(crate) fn new(pool: MemPmemPool, header: SpaceDf, unmap_ctx: Arc<dyn UnmapContext>, metrics: Metrics) -> Self {
        let large_thresh = large_thresh_blks(header.block_sz);
        Instance {
            pool,
            index: FreeSpaceIndex::new(large_thresh),
            agg_tree: AggTree::new(),
            agg_lru: AgingLru::new(),
            bitmap_hint: None,
            unmap_ctx,
            metrics,
            header,
            last_flush: crate::aging::current_coarse_seconds(),
            flush_scheduled: false,
        }
    }

    pub(crate) fn pool(&self) -> &MemPmemPool {
        &self.pool
    }

    /// Begin a transaction against this instance's backing pool, for a
    /// caller that is about to call [`crate::publish::tx_publish`]. `free`
    /// manages its own internal transaction and does not need this.
    pub fn begin_txn(&self) -> crate::txn::Transaction {
        self.pool.begin()
    }

    pub fn bitmap_enabled(&self) -> bool {
        self.header.compat & COMPAT_FEATURE_BITMAP != 0
    }

    pub fn large_thresh(&self) -> u32 {
        self.index.large_thresh
    }

    pub fn block_sz(&self) -> u32 {
        self.header.block_sz
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn take_bitmap_hint(&mut self) -> Option<HintContext> {
        self.bitmap_hint.take()
    }

    pub(crate) fn restore_bitmap_hint(&mut self, hint: Option<HintContext>) {
        self.bitmap_hint = hint;
    }

    pub(crate) fn index_mut(&mut self) -> &mut FreeSpaceIndex {
        &mut self.index
    }

    pub(crate) fn agg_tree_mut(&mut self) -> &mut AggTree {
        &mut self.agg_tree
    }

    pub(crate) fn agg_lru_mut(&mut self) -> &mut AgingLru {
        &mut self.agg_lru
    }

    /// `hint_load`: wrap a producer's persistent `HintDf` as a cached
    /// [`HintContext`]. `key` identifies the producer's slot in the bitmap
    /// tree's hint namespace (any key other than
    /// [`BITMAP_CHUNK_HINT_KEY`], which is reserved).
    pub fn hint_load(&self, key: u64) -> Result<HintContext> {
        if key == BITMAP_CHUNK_HINT_KEY {
            return Err(Error::invalid("hint key collides with the reserved chunk-carve hint"));
        }
        let txn = self.pool.begin();
        let persisted: HintDf = txn.tree_get(TreeId::Bitmap, key)?.unwrap_or_default();
        Ok(HintContext::new(TreeId::Bitmap, key, persisted))
    }

    /// `hint_unload`: releases a hint context. The cache is not persisted
    /// beyond what `tx_publish` already wrote, so this is a no-op beyond
    /// dropping the handle.
    pub fn hint_unload(&self, _hint: HintContext) {}

    // ---- flush scheduling (§4.5) ----------------------------------------

    pub(crate) fn need_aging_flush(&self) -> bool {
        !self.agg_lru.is_empty() && !self.flush_scheduled
    }

    /// Mark a flush as due; called from `free`'s on-tx-end callback. Runs it
    /// immediately if the debounce interval has elapsed or `force`, the way
    /// the teacher's `Handler` eagerly runs deferred maintenance rather than
    /// truly queuing a callback for a scheduler that doesn't exist here.
    pub(crate) fn schedule_aging_flush(&mut self, force: bool) {
        if self.unmap_ctx.ext_flush() {
            self.flush_scheduled = true;
            return;
        }
        let now = crate::aging::current_coarse_seconds();
        if force || now.saturating_sub(self.last_flush) >= FLUSH_DEBOUNCE_SECS {
            let _ = self.flush(MAX_FLUSH_FRAGS, force);
        } else {
            self.flush_scheduled = true;
        }
    }

    /// Inline flush attempted by `reserve`: before every attempt
    /// (`force=false`, 256 frags) and again on `NoSpace` (`force=true`, 2560
    /// frags). A no-op when the caller drives flushing externally.
    pub(crate) fn inline_aging_flush(&mut self, force: bool, nr_flush: usize) {
        if self.unmap_ctx.ext_flush() {
            return;
        }
        let _ = self.flush(nr_flush, force);
    }

    /// `flush(nr_flush)`: reclaim fully-emptied bitmap chunks, then drain up
    /// to `nr_flush` expired aging-buffer entries (or every entry, if
    /// `force`), unmapping the large ones before promoting any of them to
    /// the allocatable index. Reclaims again afterwards, since a chunk can
    /// go fully empty only once this drain clears its last in-memory bit.
    /// Returns the number of ranges promoted.
    pub fn flush(&mut self, nr_flush: usize, force: bool) -> Result<usize> {
        self.reclaim_empty_bitmap_chunks()?;

        let now = crate::aging::current_coarse_seconds();
        let mut drained: Vec<(u64, u32, Option<u64>)> = Vec::new();
        while drained.len() < nr_flush {
            let Some((off, owner)) = self.agg_lru.front() else { break };
            let age = match owner {
                None => self.agg_tree.get(off).map(|e| e.age),
                Some(chunk_off) => self
                    .index
                    .bitmap_tree
                    .get(chunk_off)
                    .and_then(|c| c.agg_tree.get(off))
                    .map(|e| e.age),
            };
            let Some(age) = age else {
                // Stale LRU membership; drop and keep walking.
                self.agg_lru.pop_front();
                continue;
            };
            if !force && age + AGING_EXPIRY_SECS > now {
                break;
            }
            self.agg_lru.pop_front();
            let entry = match owner {
                None => self.agg_tree.remove(off),
                Some(chunk_off) => self.index.bitmap_tree.get_mut(chunk_off).and_then(|c| c.agg_tree.remove(off)),
            }
            .expect("lru-tracked entry must exist in its tree");
            drained.push((entry.blk_off, entry.blk_cnt, owner));
        }

        let unmap_thresh = unmap_thresh_blks(self.header.block_sz);
        let unmap_sgl: Vec<UnmapRange> = drained
            .iter()
            .filter(|(_, cnt, _)| *cnt >= unmap_thresh)
            .map(|(off, cnt, _)| UnmapRange { blk_off: *off, blk_cnt: *cnt })
            .collect();
        self.unmap_ctx.unmap(&unmap_sgl, self.header.block_sz)?;

        let mut flushed = 0usize;
        let mut first_err = None;
        for (off, cnt, owner) in drained {
            let result = match owner {
                None => free::compound_free_extent(self, off, cnt),
                Some(chunk_off) => free::compound_free_bitmap(self, chunk_off, off, cnt),
            };
            match result {
                Ok(()) => flushed += 1,
                Err(e) => {
                    log::warn!("flush: compound_free of [{off}, {cnt}) failed: {e}");
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        self.reclaim_empty_bitmap_chunks()?;

        self.last_flush = now;
        self.flush_scheduled = false;
        if let Some(e) = first_err {
            return Err(e);
        }
        Ok(flushed)
    }

    fn reclaim_empty_bitmap_chunks(&mut self) -> Result<()> {
        for chunk_off in self.index.all_empty_bitmaps() {
            let Some(entry) = self.index.remove_bitmap_entry(chunk_off) else { continue };
            if !entry.is_empty_bitmap() {
                self.index.insert_bitmap_entry(entry);
                continue;
            }
            self.metrics().dec_bitmap_blks(entry.blk_cnt as u64);
            let mut txn = self.pool.begin();
            txn.tree_delete(TreeId::Bitmap, chunk_off)?;
            free::persistent_merge_extent(&mut txn, TreeId::Free, entry.blk_off, entry.blk_cnt)?;
            txn.commit()?;
            free::aggregated_free(self, FreeType::Extent, entry.blk_off, entry.blk_cnt);
        }
        Ok(())
    }

    // ---- observability (§6, §8) -----------------------------------------

    pub fn query(&self) -> Query {
        Query {
            attr: Attr {
                compat: self.header.compat,
                block_sz: self.header.block_sz,
                hdr_blks: self.header.hdr_blks,
                large_thresh: self.index.large_thresh,
                total_blks: self.header.total_blks,
                free_blks: self.metrics.free_blks(),
            },
            stat: self.metrics.snapshot(),
        }
    }

    /// `verify_alloc`: §8 property 1/3's oracle. `persistent=true` checks the
    /// on-pmem trees; `persistent=false` checks the in-memory allocatable
    /// index (the "transient" view).
    pub fn verify_alloc(&self, persistent: bool, off: u64, cnt: u32) -> Result<bool> {
        if persistent {
            let txn = self.pool.begin();
            if let Some((poff, pext)) = txn.tree_probe::<crate::persist::FreeExtentDf>(TreeId::Free, crate::ordered_index::Probe::Le, off)? {
                if poff <= off && pext.end() >= off + cnt as u64 {
                    return Ok(false);
                }
            }
            if let Some((boff, bdf)) = txn.tree_probe::<crate::persist::FreeBitmapDf>(TreeId::Bitmap, crate::ordered_index::Probe::Le, off)? {
                if boff <= off && bdf.end() > off {
                    let class = bdf.class as u32;
                    let rel = off - boff;
                    if rel % class as u64 == 0 && cnt == class {
                        let slot = (rel / class as u64) as usize;
                        let mut bits: bitvec::vec::BitVec<u64, bitvec::order::Lsb0> =
                            bitvec::vec::BitVec::from_vec(bdf.bitmap_words.clone());
                        bits.truncate(bdf.slots() as usize);
                        return Ok(bits[slot]);
                    }
                }
            }
            Ok(true)
        } else {
            match self.index.classify(off, cnt)? {
                FreeType::Extent => Ok(match self.index.free_tree.probe(crate::ordered_index::Probe::Le, off) {
                    Some((poff, pext)) if poff <= off && pext.end() >= off + cnt as u64 => false,
                    _ => true,
                }),
                FreeType::Bitmap(chunk_off) => {
                    let chunk = self
                        .index
                        .bitmap_tree
                        .get(chunk_off)
                        .ok_or_else(|| Error::invalid(format!("no bitmap chunk at {chunk_off}")))?;
                    let slots = chunk
                        .slot_range(off, cnt)
                        .ok_or_else(|| Error::invalid("misaligned verify_alloc range"))?;
                    Ok(slots.clone().all(|s| chunk.bitmap[s]))
                }
            }
        }
    }

    pub fn enumerate_free(&self, mut visitor: impl FnMut(u64, u32)) {
        for (&off, entry) in self.index.free_tree.iter() {
            visitor(off, entry.cnt());
        }
    }

    pub fn header(&self) -> SpaceDf {
        self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut SpaceDf {
        &mut self.header
    }
}
