//! A crash-consistent block allocator for byte-addressable persistent
//! memory: a two-tier free-space index (offset/size-keyed extent trees plus
//! a large-extent heap, and a bitmap tier for small fixed-size classes),
//! an aging buffer that defers freed ranges from reuse until they have been
//! unmapped, and per-producer hint contexts for cheap sequential allocation.
//!
//! The allocator core owns no I/O of its own: the persistent-memory
//! transaction engine ([`txn::MemPmemPool`]), the discard primitive
//! ([`unmap::UnmapContext`]), and the ordered key-value index
//! ([`ordered_index::OrderedIndex`]) are all small capability traits with
//! in-process mock implementations, mirroring how the rest of the storage
//! stack keeps its vdev and tree layers behind traits rather than hardwiring
//! a single backend.
//!
//! Every call on an [`instance::Instance`] assumes the caller holds their own
//! lock across it; the allocator itself performs no internal locking beyond
//! what its mock transaction engine needs (§5 of the design).

pub mod aging;
pub mod block;
pub mod config;
pub mod constants;
pub mod error;
pub mod format;
pub mod free;
pub mod hint;
pub mod index;
pub mod instance;
pub mod logging;
pub mod metrics;
pub mod ordered_index;
pub mod persist;
pub mod publish;
pub mod reserve;
pub mod txn;
pub mod unmap;

pub use config::VeaConfig;
pub use error::{Error, ErrorKind, Result};
pub use format::{format, load, unload, upgrade};
pub use free::free;
pub use hint::HintContext;
pub use instance::{Attr, Instance, Query};
pub use metrics::{FragStats, Metrics, ReserveStats, Stat};
pub use publish::{cancel, tx_publish};
pub use reserve::{reserve, ReservedExt};
pub use txn::{MemPmemPool, Transaction, TreeId};
pub use unmap::{NullUnmap, RecordingUnmap, UnmapContext, UnmapRange};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fresh(capacity_blks: u64) -> Instance {
        let pool = MemPmemPool::new();
        format(
            &pool,
            constants::BLK_SZ,
            1,
            capacity_blks * constants::BLK_SZ as u64,
            None::<fn() -> Result<()>>,
            false,
            constants::COMPAT_FEATURE_BITMAP,
        )
        .unwrap();
        load(pool, Arc::new(NullUnmap)).unwrap()
    }

    #[test]
    fn reserve_publish_free_roundtrip() {
        let mut instance = fresh(10_000);
        let mut reserved = Vec::new();
        reserve(&mut instance, 16, None, &mut reserved).unwrap();
        assert_eq!(reserved.len(), 1);
        let r = reserved[0];

        let mut txn = instance.begin_txn();
        tx_publish(&mut instance, &mut txn, None, &reserved).unwrap();
        txn.commit().unwrap();

        assert!(instance.verify_alloc(true, r.off, r.cnt).unwrap());
        assert!(instance.verify_alloc(false, r.off, r.cnt).unwrap());

        free(&mut instance, r.off, r.cnt).unwrap();
        assert!(!instance.verify_alloc(true, r.off, r.cnt).unwrap());
        // Not yet promoted out of the aging buffer: still transient-allocated.
        assert!(instance.verify_alloc(false, r.off, r.cnt).unwrap());

        instance.flush(constants::MAX_FLUSH_FRAGS, true).unwrap();
        assert!(!instance.verify_alloc(false, r.off, r.cnt).unwrap());
    }

    #[test]
    fn cancel_returns_space_without_touching_pmem() {
        let mut instance = fresh(10_000);
        let mut reserved = Vec::new();
        reserve(&mut instance, 32, None, &mut reserved).unwrap();
        let r = reserved[0];

        cancel(&mut instance, None, &reserved).unwrap();
        assert!(!instance.verify_alloc(false, r.off, r.cnt).unwrap());
        // cancel never touched persistent state; the range was never removed
        // from the persistent free tree in the first place.
        assert!(!instance.verify_alloc(true, r.off, r.cnt).unwrap());
    }

    #[test]
    fn no_space_on_exhausted_device() {
        let mut instance = fresh(constants::MIN_FORMAT_BLKS + 10);
        let mut reserved = Vec::new();
        let err = reserve(&mut instance, 1_000_000, None, &mut reserved).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoSpace));
    }
}
