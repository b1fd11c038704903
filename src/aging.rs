//! The aging buffer (§4.5): freshly-freed ranges are staged here, where
//! they can still coalesce with an adjacent free, before `flush` unmaps and
//! promotes them into the allocatable index.

use crate::constants::LARGE_AGING_FRAG_BLKS;
use crate::ordered_index::{BTreeIndex, OrderedIndex, Probe};
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// `current_coarse_seconds`: a monotonic-enough, second-granularity clock
/// for aging timestamps.
pub fn current_coarse_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AggEntry {
    pub blk_off: u64,
    pub blk_cnt: u32,
    pub age: u32,
}

impl AggEntry {
    pub fn end(&self) -> u64 {
        self.blk_off + self.blk_cnt as u64
    }
}

/// Offset-keyed tree of not-yet-flushed entries, merged with adjacent
/// entries as they arrive. One lives on [`crate::instance::Instance`] for
/// extent-tier frees, and one inside each
/// [`crate::index::bitmap::BitmapEntry`] for bitmap-slot frees.
#[derive(Default)]
pub struct AggTree {
    tree: BTreeIndex<u64, AggEntry>,
}

impl AggTree {
    pub fn new() -> Self {
        AggTree::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn remove(&mut self, off: u64) -> Option<AggEntry> {
        self.tree.delete(off)
    }

    pub fn get(&self, off: u64) -> Option<AggEntry> {
        self.tree.get(off).copied()
    }

    /// Insert `entry`, merging with an aging-buffer neighbor unless that
    /// neighbor is itself at least [`LARGE_AGING_FRAG_BLKS`] (preserved
    /// intact per §4.4). Returns the entry as finally stored (merged or
    /// not) plus the offsets of any neighbors it swallowed, so the caller
    /// can relink the global LRU accordingly.
    pub fn insert_merging(&mut self, mut entry: AggEntry) -> (AggEntry, Vec<u64>) {
        let mut swallowed = Vec::new();
        // Predecessor.
        if let Some((&poff, &pentry)) = self.tree.probe(Probe::Le, entry.blk_off) {
            if pentry.end() == entry.blk_off && pentry.blk_cnt < LARGE_AGING_FRAG_BLKS {
                self.tree.delete(poff);
                entry.blk_off = pentry.blk_off;
                entry.blk_cnt += pentry.blk_cnt;
                swallowed.push(poff);
            }
        }
        // Successor.
        if let Some((&noff, &nentry)) = self.tree.probe(Probe::Eq, entry.end()) {
            if entry.blk_cnt < LARGE_AGING_FRAG_BLKS {
                self.tree.delete(noff);
                entry.blk_cnt += nentry.blk_cnt;
                swallowed.push(noff);
            }
        }
        self.tree.upsert(entry.blk_off, entry);
        (entry, swallowed)
    }
}

/// Which [`AggTree`] an [`AgingLru`] entry lives in: the instance-wide one
/// (`None`) or a particular bitmap chunk's own (`Some(chunk_off)`).
pub type AgingOwner = Option<u64>;

/// Global LRU of aging-buffer entries, in first-freed-first order,
/// independent of which [`AggTree`] currently owns the entry (instance-wide
/// or per-bitmap-chunk). Offsets are globally unique (a block belongs to at
/// most one tree at a time), so the owner is carried alongside the offset
/// purely so [`crate::instance::Instance::flush`] knows which tree to pull
/// the entry from without re-deriving it.
#[derive(Default)]
pub struct AgingLru {
    order: VecDeque<(u64, AgingOwner)>,
}

impl AgingLru {
    pub fn new() -> Self {
        AgingLru::default()
    }

    pub fn push_back(&mut self, off: u64, owner: AgingOwner) {
        self.order.retain(|&(o, _)| o != off);
        self.order.push_back((off, owner));
    }

    pub fn remove(&mut self, off: u64) {
        self.order.retain(|&(o, _)| o != off);
    }

    pub fn front(&self) -> Option<(u64, AgingOwner)> {
        self.order.front().copied()
    }

    pub fn pop_front(&mut self) -> Option<(u64, AgingOwner)> {
        self.order.pop_front()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
