//! On-pmem record layouts (§3, §6). These are the values stored through
//! [`crate::txn::Transaction`] and are bit-exact with the legacy format in
//! the sense that every field named in §6 is present in the order given
//! there; encoding is left to `serde`/`bincode` rather than hand-rolled
//! little-endian packing, matching how the rest of the storage stack
//! persists its structures (e.g. `database::storage_info::StorageInfo`).

use serde::{Deserialize, Serialize};

/// Device header, the value of the well-known header slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceDf {
    pub magic: u32,
    pub compat: u32,
    pub block_sz: u32,
    pub hdr_blks: u32,
    pub total_blks: u64,
}

/// Value of the persistent free-extent tree; key is `blk_off`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeExtentDf {
    pub blk_off: u64,
    pub blk_cnt: u32,
    pub age: u32,
}

impl FreeExtentDf {
    pub fn end(&self) -> u64 {
        self.blk_off + self.blk_cnt as u64
    }
}

/// Value of the persistent bitmap tree at a chunk's `blk_off` key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeBitmapDf {
    pub blk_off: u64,
    pub blk_cnt: u32,
    pub class: u16,
    pub bitmap_words: Vec<u64>,
}

impl FreeBitmapDf {
    pub fn end(&self) -> u64 {
        self.blk_off + self.blk_cnt as u64
    }

    pub fn slots(&self) -> u32 {
        self.blk_cnt / self.class as u32
    }
}

/// Value stored at a producer's hint key (and, at
/// [`crate::constants::BITMAP_CHUNK_HINT_KEY`], the allocator's own
/// chunk-carving cursor).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintDf {
    pub off: u64,
    pub seq: u64,
}
