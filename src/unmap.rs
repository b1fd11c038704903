//! The block-device discard/unmap primitive (§1, §5).
//!
//! Modeled as a small capability trait per the design notes in §9: the real
//! callback may suspend (it is the one cooperative-yield point inside
//! `flush`), so it is invoked with the whole scatter list at once rather
//! than once per range.

/// One contiguous byte range to discard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnmapRange {
    pub blk_off: u64,
    pub blk_cnt: u32,
}

pub trait UnmapContext: Send + Sync {
    /// Discard every range in `sgl`. May suspend; callers must not hold the
    /// caller-provided external lock across anything that depends on this
    /// call completing on another thread (see §5).
    fn unmap(&self, sgl: &[UnmapRange], block_sz: u32) -> crate::error::Result<()>;

    /// When set, inline and scheduled flushing are disabled: the caller
    /// drives `flush` externally (§6, `unmap_ctx.ext_flush`).
    fn ext_flush(&self) -> bool {
        false
    }
}

/// No-op unmap used by tests and by callers that truly cannot discard
/// (e.g. a plain file-backed device where the allocator's accounting is all
/// that matters).
#[derive(Clone, Copy, Debug, Default)]
pub struct NullUnmap;

impl UnmapContext for NullUnmap {
    fn unmap(&self, _sgl: &[UnmapRange], _block_sz: u32) -> crate::error::Result<()> {
        Ok(())
    }
}

/// Records every scatter list it was asked to discard; used by tests that
/// assert on unmap behavior.
#[derive(Default)]
pub struct RecordingUnmap {
    pub calls: parking_lot::Mutex<Vec<Vec<UnmapRange>>>,
}

impl UnmapContext for RecordingUnmap {
    fn unmap(&self, sgl: &[UnmapRange], _block_sz: u32) -> crate::error::Result<()> {
        self.calls.lock().push(sgl.to_vec());
        Ok(())
    }
}
