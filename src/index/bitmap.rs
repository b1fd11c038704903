//! Bitmap-tier chunk bookkeeping (§4.1, §4.2, §4.4).
//!
//! A chunk is a contiguous run of `blk_cnt` blocks, carved once from the
//! extent tier, and subdivided into `blk_cnt / class` fixed-size slots. The
//! working bitmap lives in a [`bitvec::vec::BitVec`] the way the parent
//! storage stack's `allocator::worst_fit_list::WorstFitList` keeps its
//! segment bitmap in a `bitvec` bit-array; here the chunk size is dynamic
//! (a function of class and free-space pressure, see [`chunk_blks`]) so a
//! growable `BitVec` replaces the teacher's fixed `BitArr!`.

use crate::aging::AggTree;
use crate::constants::{BITMAP_MAX_CHUNK_BLKS, BITMAP_MIN_CHUNK_BLKS};
use crate::persist::FreeBitmapDf;
use bitvec::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitmapState {
    Published,
    Publishing,
    New,
}

pub struct BitmapEntry {
    pub blk_off: u64,
    pub blk_cnt: u32,
    pub class: u32,
    pub bitmap: BitVec<u64, Lsb0>,
    pub state: BitmapState,
    pub agg_tree: AggTree,
}

impl BitmapEntry {
    pub fn new_empty(blk_off: u64, blk_cnt: u32, class: u32) -> Self {
        let slots = blk_cnt / class;
        BitmapEntry {
            blk_off,
            blk_cnt,
            class,
            bitmap: bitvec![u64, Lsb0; 0; slots as usize],
            state: BitmapState::New,
            agg_tree: AggTree::new(),
        }
    }

    pub fn from_persistent(df: &FreeBitmapDf, state: BitmapState) -> Self {
        let mut bitmap: BitVec<u64, Lsb0> = BitVec::from_vec(df.bitmap_words.clone());
        bitmap.truncate(df.slots() as usize);
        BitmapEntry {
            blk_off: df.blk_off,
            blk_cnt: df.blk_cnt,
            class: df.class as u32,
            bitmap,
            state,
            agg_tree: AggTree::new(),
        }
    }

    pub fn slots(&self) -> u32 {
        self.blk_cnt / self.class
    }

    pub fn end(&self) -> u64 {
        self.blk_off + self.blk_cnt as u64
    }

    pub fn free_blocks(&self) -> u32 {
        (self.slots() - self.bitmap.count_ones() as u32) * self.class
    }

    pub fn is_empty_bitmap(&self) -> bool {
        self.bitmap.not_any()
    }

    /// First zero (free) slot, if any.
    pub fn first_free_slot(&self) -> Option<usize> {
        self.bitmap.iter_zeros().next()
    }

    pub fn to_persistent(&self) -> FreeBitmapDf {
        FreeBitmapDf {
            blk_off: self.blk_off,
            blk_cnt: self.blk_cnt,
            class: self.class as u16,
            bitmap_words: self.bitmap.clone().into_vec(),
        }
    }

    /// Offset of the `slot`-th slot.
    pub fn slot_offset(&self, slot: usize) -> u64 {
        self.blk_off + (slot as u64) * self.class as u64
    }

    /// Range of slots covering `[off, off+cnt)`. Returns `None` if the
    /// range doesn't align to `class`.
    pub fn slot_range(&self, off: u64, cnt: u32) -> Option<std::ops::Range<usize>> {
        if off < self.blk_off || off + cnt as u64 > self.end() {
            return None;
        }
        let rel = off - self.blk_off;
        if rel % self.class as u64 != 0 || cnt % self.class != 0 {
            return None;
        }
        let start = (rel / self.class as u64) as usize;
        let len = (cnt / self.class) as usize;
        Some(start..start + len)
    }
}

/// `chunk_blks`: size of a freshly-carved chunk for `class`, always a
/// multiple of `64 * class` so the bitmap word array is whole. Doubles
/// toward `max_chunk_blks` when the instance is flush with free extent
/// space (§4.2).
pub fn chunk_blks(class: u32, free_extent_blks_ge_32gib: bool) -> u32 {
    let base = BITMAP_MIN_CHUNK_BLKS * class;
    let size = if free_extent_blks_ge_32gib {
        let max = BITMAP_MAX_CHUNK_BLKS;
        base * (max / base).max(1)
    } else {
        base
    };
    // Already a multiple of 64*class by construction (BITMAP_MIN_CHUNK_BLKS
    // is itself 256 = 4*64), but keep the invariant explicit.
    let unit = 64 * class;
    (size / unit) * unit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_sizing_is_word_aligned() {
        for class in [1u32, 3, 17, 64] {
            let sz = chunk_blks(class, false);
            assert_eq!(sz % (64 * class), 0);
            assert!(sz >= BITMAP_MIN_CHUNK_BLKS * class);
        }
    }

    #[test]
    fn slot_range_rejects_misalignment() {
        let entry = BitmapEntry::new_empty(100, 256, 4);
        assert_eq!(entry.slot_range(100, 4), Some(0..1));
        assert_eq!(entry.slot_range(102, 4), None);
        assert_eq!(entry.slot_range(100, 3), None);
    }
}
