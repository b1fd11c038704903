//! `quickcheck`-backed property tests for the round-trip/idempotence laws
//! and free-space-index invariants.

use quickcheck_macros::quickcheck;
use std::sync::Arc;
use vea::{cancel, constants, format, free, load, reserve, tx_publish, Instance, MemPmemPool, NullUnmap};

const CAPACITY_BLKS: u64 = 32 * 1024;

fn fresh() -> Instance {
    let pool = MemPmemPool::new();
    format(
        &pool,
        constants::BLK_SZ,
        1,
        CAPACITY_BLKS * constants::BLK_SZ as u64,
        None::<fn() -> vea::Result<()>>,
        false,
        0,
    )
    .unwrap();
    load(pool, Arc::new(NullUnmap)).unwrap()
}

/// `reserve(n); cancel` is a no-op on `query().attr.free_blks`.
#[quickcheck]
fn reserve_then_cancel_restores_free_blks(n: u32) -> bool {
    let n = 1 + (n % 4096);
    let mut instance = fresh();
    let before = instance.query().attr.free_blks;

    let mut reserved = Vec::new();
    if reserve(&mut instance, n, None, &mut reserved).is_err() {
        return true;
    }
    cancel(&mut instance, None, &reserved).unwrap();

    instance.query().attr.free_blks == before
}

/// A second reservation on the same hint lands exactly where the first one
/// left off, and cancelling it alone rolls the hint back to that point.
#[quickcheck]
fn second_reservation_cancel_rolls_back_hint(n1: u32, n2: u32) -> bool {
    let n1 = 1 + (n1 % 256);
    let n2 = 1 + (n2 % 256);
    let mut instance = fresh();
    let mut hint = instance.hint_load(1).unwrap();

    let mut r1 = Vec::new();
    if reserve(&mut instance, n1, Some(&mut hint), &mut r1).is_err() {
        return true;
    }
    let after_first = hint.get();

    let mut r2 = Vec::new();
    if reserve(&mut instance, n2, Some(&mut hint), &mut r2).is_err() {
        return true;
    }

    cancel(&mut instance, Some(&mut hint), &r2).unwrap();
    hint.get() == after_first
}

/// `reserve(n); publish; free; flush(force)` restores `free_blks` to the
/// pre-reserve value.
#[quickcheck]
fn reserve_publish_free_flush_restores_free_blks(n: u32) -> bool {
    let n = 1 + (n % 4096);
    let mut instance = fresh();
    let before = instance.query().attr.free_blks;

    let mut reserved = Vec::new();
    if reserve(&mut instance, n, None, &mut reserved).is_err() {
        return true;
    }
    let mut txn = instance.begin_txn();
    tx_publish(&mut instance, &mut txn, None, &reserved).unwrap();
    txn.commit().unwrap();

    for r in &reserved {
        free(&mut instance, r.off, r.cnt).unwrap();
    }
    instance.flush(constants::MAX_FLUSH_FRAGS, true).unwrap();

    instance.query().attr.free_blks == before
}

/// After a flush, no two entries of the in-memory allocatable offset tree
/// are overlapping or adjacent (they would have been merged).
#[quickcheck]
fn free_tree_entries_never_overlap_or_touch(n1: u32, n2: u32, n3: u32) -> bool {
    let n1 = 1 + (n1 % 512);
    let n2 = 1 + (n2 % 512);
    let n3 = 1 + (n3 % 512);
    let mut instance = fresh();

    let mut reservations = Vec::new();
    for n in [n1, n2, n3] {
        let mut r = Vec::new();
        if reserve(&mut instance, n, None, &mut r).is_err() {
            return true;
        }
        reservations.push(r.remove(0));
    }

    // Free every other reservation so the survivors keep the freed ranges
    // from trivially spanning the whole device.
    for (i, r) in reservations.iter().enumerate() {
        if i % 2 == 0 {
            free(&mut instance, r.off, r.cnt).unwrap();
        }
    }
    instance.flush(constants::MAX_FLUSH_FRAGS, true).unwrap();

    let mut entries: Vec<(u64, u32)> = Vec::new();
    instance.enumerate_free(|off, cnt| entries.push((off, cnt)));
    entries.sort_by_key(|e| e.0);
    entries.windows(2).all(|w| w[0].0 + w[0].1 as u64 < w[1].0)
}
