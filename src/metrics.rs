//! Observability: the `stat` counters and gauges from §2/§6, kept as atomics
//! the way [`database::storage_info::AtomicStorageInfo`] keeps per-tier free
//! space — cheap to update from the fast path, snapshotted into a plain
//! struct for [`crate::instance::Instance::query`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStats {
    pub hint: u64,
    pub large: u64,
    pub small: u64,
    pub bitmap: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragStats {
    pub large: u64,
    pub small: u64,
    pub bitmap: u64,
    pub aging: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub resrv: ReserveStats,
    pub frags: FragStats,
    pub free_extent_blks: u64,
    pub free_bitmap_blks: u64,
}

/// Atomic counterpart of [`Stat`], updated from the reserve/free/flush fast
/// paths without requiring the caller's external lock to cover metrics
/// reads.
#[derive(Default)]
pub struct Metrics {
    pub resrv_hint: AtomicU64,
    pub resrv_large: AtomicU64,
    pub resrv_small: AtomicU64,
    pub resrv_bitmap: AtomicU64,
    pub frags_large: AtomicU64,
    pub frags_small: AtomicU64,
    pub frags_bitmap: AtomicU64,
    pub frags_aging: AtomicU64,
    pub free_extent_blks: AtomicU64,
    pub free_bitmap_blks: AtomicU64,
}

macro_rules! bump {
    ($field:expr, $delta:expr) => {
        $field.fetch_add($delta, Ordering::Relaxed)
    };
}

macro_rules! drop_by {
    ($field:expr, $delta:expr) => {
        $field.fetch_sub($delta, Ordering::Relaxed)
    };
}

impl Metrics {
    pub fn snapshot(&self) -> Stat {
        Stat {
            resrv: ReserveStats {
                hint: self.resrv_hint.load(Ordering::Relaxed),
                large: self.resrv_large.load(Ordering::Relaxed),
                small: self.resrv_small.load(Ordering::Relaxed),
                bitmap: self.resrv_bitmap.load(Ordering::Relaxed),
            },
            frags: FragStats {
                large: self.frags_large.load(Ordering::Relaxed),
                small: self.frags_small.load(Ordering::Relaxed),
                bitmap: self.frags_bitmap.load(Ordering::Relaxed),
                aging: self.frags_aging.load(Ordering::Relaxed),
            },
            free_extent_blks: self.free_extent_blks.load(Ordering::Relaxed),
            free_bitmap_blks: self.free_bitmap_blks.load(Ordering::Relaxed),
        }
    }

    pub fn inc_extent_blks(&self, n: u64) {
        bump!(self.free_extent_blks, n);
    }

    pub fn dec_extent_blks(&self, n: u64) {
        drop_by!(self.free_extent_blks, n);
    }

    pub fn inc_bitmap_blks(&self, n: u64) {
        bump!(self.free_bitmap_blks, n);
    }

    pub fn dec_bitmap_blks(&self, n: u64) {
        drop_by!(self.free_bitmap_blks, n);
    }

    pub fn free_blks(&self) -> u64 {
        self.free_extent_blks.load(Ordering::Relaxed) + self.free_bitmap_blks.load(Ordering::Relaxed)
    }
}
