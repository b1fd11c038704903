//! Format-compatibility constants (§6). None of these may change without a
//! `compat` bit, since they are baked into the on-disk layout or change the
//! observable behavior of an already-formatted device.

/// Default block size in bytes (4 KiB). Block size is chosen at format time
/// and must be a multiple of this, up to [`MAX_BLOCK_SZ`].
pub const BLK_SZ: u32 = 4 * 1024;

/// Upper bound on block size accepted by `format`.
pub const MAX_BLOCK_SZ: u32 = 1024 * 1024;

/// Large-extent threshold, expressed in MiB. Extents above
/// `LARGE_EXT_MB * 1MiB / block_sz` blocks live in the large-extent heap
/// rather than the size-keyed small-extent tree.
pub const LARGE_EXT_MB: u64 = 64;

/// Maximum number of aging-buffer entries drained by one ordinary flush.
pub const MAX_FLUSH_FRAGS: usize = 256;

/// Forced flush (on `NoSpace`) drains up to this many fragments.
pub const FORCED_FLUSH_FRAGS: usize = 10 * MAX_FLUSH_FRAGS;

/// An aging-buffer neighbor at least this large is never merged into during
/// compound-free; it is preserved intact so that large freed ranges keep
/// their own identity until flushed.
pub const LARGE_AGING_FRAG_BLKS: u32 = 8192;

/// Smallest bitmap allocation class (in blocks).
pub const MIN_BITMAP_CLASS: u32 = 1;
/// Largest bitmap allocation class (in blocks).
pub const MAX_BITMAP_CLASS: u32 = 64;

/// Smallest bitmap chunk size, in blocks (1 MiB at the default block size).
pub const BITMAP_MIN_CHUNK_BLKS: u32 = 256;
/// Largest bitmap chunk size, in blocks (64 MiB at the default block size).
pub const BITMAP_MAX_CHUNK_BLKS: u32 = MAX_BITMAP_CLASS * BITMAP_MIN_CHUNK_BLKS;

/// Reserved bitmap-tree key holding the allocator's own chunk-carving hint.
pub const BITMAP_CHUNK_HINT_KEY: u64 = u64::MAX;

/// Sentinel hint offset meaning "no hint recorded yet".
pub const HINT_OFF_INVAL: u64 = 0;

/// An aging-buffer entry becomes eligible for flush this long after it was
/// freed.
pub const AGING_EXPIRY_SECS: u32 = 3;

/// Minimum spacing between two scheduled (non-forced) flushes.
pub const FLUSH_DEBOUNCE_SECS: u32 = 2;

/// Ranges at least this large are unmapped before being made allocatable
/// again.
pub const UNMAP_THRESHOLD_MB: u64 = 1;

/// Magic stamped into [`crate::types::SpaceDf`] by `format`.
pub const VEA_MAGIC: u32 = 0xea20_1804;

/// `compat` bit: the bitmap tier (sized allocation classes) is enabled.
pub const COMPAT_FEATURE_BITMAP: u32 = 1 << 0;

/// Minimum device capacity `format` will accept, in blocks.
pub const MIN_FORMAT_BLKS: u64 = 100;

pub fn large_thresh_blks(block_sz: u32) -> u32 {
    ((LARGE_EXT_MB * 1024 * 1024) / block_sz as u64) as u32
}

pub fn unmap_thresh_blks(block_sz: u32) -> u32 {
    ((UNMAP_THRESHOLD_MB * 1024 * 1024) / block_sz as u64) as u32
}
