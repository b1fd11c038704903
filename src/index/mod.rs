//! The in-memory free-space index (§4.1): the offset tree, the size tree,
//! the large-extent heap, and the bitmap tier, kept consistent with each
//! other the way `database::handler::Handler` keeps its root tree and its
//! `free_space`/`free_space_tier` gauges consistent.

pub mod bitmap;
pub mod extent;

use crate::constants::BITMAP_MAX_CHUNK_BLKS;
use crate::error::{Error, Result};
use crate::ordered_index::{BTreeIndex, OrderedIndex, Probe};
use bitmap::{BitmapEntry, BitmapState};
use extent::{ExtentEntry, LargeHeap, SizedClass};
use std::collections::VecDeque;

/// Result of classifying a `(off, cnt)` range per §4.1.1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreeType {
    Extent,
    Bitmap(u64),
}

pub struct FreeSpaceIndex {
    pub free_tree: BTreeIndex<u64, ExtentEntry>,
    pub size_tree: BTreeIndex<u32, SizedClass>,
    pub large_heap: LargeHeap,
    pub bitmap_tree: BTreeIndex<u64, BitmapEntry>,
    bitmap_lru: Vec<VecDeque<u64>>,
    bitmap_empty: Vec<VecDeque<u64>>,
    pub large_thresh: u32,
}

impl FreeSpaceIndex {
    pub fn new(large_thresh: u32) -> Self {
        FreeSpaceIndex {
            free_tree: BTreeIndex::new(),
            size_tree: BTreeIndex::new(),
            large_heap: LargeHeap::default(),
            bitmap_tree: BTreeIndex::new(),
            bitmap_lru: (0..64).map(|_| VecDeque::new()).collect(),
            bitmap_empty: (0..64).map(|_| VecDeque::new()).collect(),
            large_thresh,
        }
    }

    // ---- classification (§4.1.1) ----------------------------------------

    pub fn classify(&self, off: u64, cnt: u32) -> Result<FreeType> {
        match self.bitmap_tree.probe(Probe::Le, off) {
            None => Ok(FreeType::Extent),
            Some((boff, entry)) => {
                if cnt > BITMAP_MAX_CHUNK_BLKS {
                    return Ok(FreeType::Extent);
                }
                if off >= boff && off <= entry.end().saturating_sub(1) {
                    if off + cnt as u64 <= entry.end() {
                        Ok(FreeType::Bitmap(boff))
                    } else {
                        Err(Error::invalid(format!(
                            "range [{off}, {cnt}) straddles bitmap chunk boundary at {boff}"
                        )))
                    }
                } else {
                    Ok(FreeType::Extent)
                }
            }
        }
    }

    // ---- extent docking --------------------------------------------------

    fn dock_extent(&mut self, off: u64, cnt: u32) {
        if cnt > self.large_thresh {
            self.large_heap.insert(off);
        } else if let Some(sc) = self.size_tree.get_mut(cnt) {
            sc.push_back(off);
        } else {
            let mut sc = SizedClass::default();
            sc.push_back(off);
            self.size_tree.upsert(cnt, sc);
        }
    }

    fn undock_extent(&mut self, off: u64, cnt: u32) {
        if cnt > self.large_thresh {
            self.large_heap.remove(off);
        } else if let Some(sc) = self.size_tree.get_mut(cnt) {
            sc.remove(off);
            if sc.lru.is_empty() {
                self.size_tree.delete(cnt);
            }
        }
    }

    /// Insert a brand-new free extent into the offset tree and dock it into
    /// the correct tier.
    pub fn insert_extent(&mut self, off: u64, cnt: u32) {
        self.free_tree.upsert(off, ExtentEntry::new(off, cnt));
        self.dock_extent(off, cnt);
    }

    /// Remove a free extent from both the offset tree and its tier.
    pub fn remove_extent(&mut self, off: u64) -> Option<ExtentEntry> {
        let entry = self.free_tree.delete(off)?;
        self.undock_extent(off, entry.cnt());
        Some(entry)
    }

    /// Shrink the extent at `off` by carving `carve` blocks off its front,
    /// re-docking it at its new (offset, size). Returns the new offset.
    pub fn shrink_front(&mut self, off: u64, carve: u32) -> u64 {
        let entry = self.free_tree.delete(off).expect("extent must exist");
        self.undock_extent(off, entry.cnt());
        let new_off = off + carve as u64;
        let new_cnt = entry.cnt() - carve;
        if new_cnt > 0 {
            self.insert_extent(new_off, new_cnt);
        }
        new_off
    }

    /// `merge-with-neighbors` (§4.4): insert `(off, cnt)` into the offset
    /// tree, coalescing with an abutting predecessor/successor unless that
    /// neighbor is at least `LARGE_AGING_FRAG_BLKS` (preserved intact).
    /// Fatal on overlap.
    pub fn merge_with_neighbors(&mut self, off: u64, cnt: u32, merge: bool) -> Result<(u64, u32)> {
        if self.free_tree.get(off).is_some() {
            return Err(Error::invalid(format!("overlapping free extent at {off}")));
        }
        let mut merged_off = off;
        let mut merged_cnt = cnt;

        if merge {
            if let Some((poff, pentry)) = self.free_tree.probe(Probe::Le, off).map(|(k, v)| (k, *v)) {
                if pentry.end() > off {
                    return Err(Error::invalid(format!(
                        "overlapping free extent: predecessor [{}, {}) overlaps [{}, {})",
                        pentry.off(), pentry.end(), off, off + cnt as u64
                    )));
                }
                if pentry.end() == off && pentry.cnt() < crate::constants::LARGE_AGING_FRAG_BLKS {
                    self.remove_extent(poff);
                    merged_off = pentry.off();
                    merged_cnt += pentry.cnt();
                }
            }
            let merged_end = merged_off + merged_cnt as u64;
            if let Some((noff, nentry)) = self.free_tree.probe(Probe::Ge, merged_end).map(|(k, v)| (k, *v)) {
                if noff < merged_end {
                    return Err(Error::invalid(format!(
                        "overlapping free extent: successor at {noff} overlaps [{merged_off}, {merged_end})"
                    )));
                }
                if noff == merged_end && nentry.cnt() < crate::constants::LARGE_AGING_FRAG_BLKS {
                    self.remove_extent(noff);
                    merged_cnt += nentry.cnt();
                }
            }
        }

        self.insert_extent(merged_off, merged_cnt);
        Ok((merged_off, merged_cnt))
    }

    // ---- bitmap docking ----------------------------------------------------

    fn class_idx(class: u32) -> usize {
        (class - 1) as usize
    }

    pub fn dock_bitmap(&mut self, off: u64) {
        let (class, empty) = {
            let e = self.bitmap_tree.get(off).expect("bitmap entry must exist");
            (e.class, e.is_empty_bitmap())
        };
        let idx = Self::class_idx(class);
        self.bitmap_lru[idx].retain(|&o| o != off);
        self.bitmap_empty[idx].retain(|&o| o != off);
        if empty {
            self.bitmap_empty[idx].push_back(off);
        } else {
            self.bitmap_lru[idx].push_back(off);
        }
    }

    pub fn undock_bitmap(&mut self, off: u64, class: u32) {
        let idx = Self::class_idx(class);
        self.bitmap_lru[idx].retain(|&o| o != off);
        self.bitmap_empty[idx].retain(|&o| o != off);
    }

    pub fn insert_bitmap_entry(&mut self, entry: BitmapEntry) {
        let off = entry.blk_off;
        self.bitmap_tree.upsert(off, entry);
        self.dock_bitmap(off);
    }

    pub fn remove_bitmap_entry(&mut self, off: u64) -> Option<BitmapEntry> {
        let entry = self.bitmap_tree.delete(off)?;
        self.undock_bitmap(off, entry.class);
        Some(entry)
    }

    pub fn bitmap_lru_front(&self, class: u32) -> VecDeque<u64> {
        self.bitmap_lru[Self::class_idx(class)].clone()
    }

    pub fn bitmap_lru_iter(&self, class: u32) -> impl Iterator<Item = u64> + '_ {
        self.bitmap_lru[Self::class_idx(class)].iter().copied()
    }

    pub fn bitmap_empty_pop(&mut self, class: u32) -> Option<u64> {
        self.bitmap_empty[Self::class_idx(class)].pop_front()
    }

    pub fn all_empty_bitmaps(&self) -> Vec<u64> {
        self.bitmap_empty.iter().flatten().copied().collect()
    }

    pub fn frags_bitmap(&self) -> u64 {
        self.bitmap_tree.len() as u64
    }

    pub fn frags_small(&self) -> u64 {
        self.size_tree.values().map(|sc| sc.lru.len() as u64).sum()
    }

    pub fn frags_large(&self) -> u64 {
        self.large_heap.members.len() as u64
    }
}

pub use bitmap::{chunk_blks, BitmapState as BState};
