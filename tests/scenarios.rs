//! The six concrete end-to-end scenarios from spec.md §8, run against the
//! in-process `MemPmemPool` mock.

use std::sync::Arc;
use vea::{cancel, constants, format, free, load, reserve, tx_publish, Instance, MemPmemPool, NullUnmap, ReservedExt};

fn fresh(total_blks: u64, bitmap: bool) -> Instance {
    let pool = MemPmemPool::new();
    let compat = if bitmap { constants::COMPAT_FEATURE_BITMAP } else { 0 };
    format(
        &pool,
        constants::BLK_SZ,
        1,
        total_blks * constants::BLK_SZ as u64,
        None::<fn() -> vea::Result<()>>,
        false,
        compat,
    )
    .unwrap();
    load(pool, Arc::new(NullUnmap)).unwrap()
}

fn publish_all(instance: &mut Instance, list: &[ReservedExt]) {
    let mut txn = instance.begin_txn();
    tx_publish(instance, &mut txn, None, list).unwrap();
    txn.commit().unwrap();
}

#[test]
fn interleaved_reserves_on_two_streams() {
    let mut instance = fresh(32 * 1024, false);
    let mut hint_a = instance.hint_load(1).unwrap();
    let mut hint_b = instance.hint_load(2).unwrap();

    let mut a1 = Vec::new();
    reserve(&mut instance, 10, Some(&mut hint_a), &mut a1).unwrap();
    assert_eq!(a1[0].off, 1);
    assert_eq!(a1[0].cnt, 10);

    let mut b1 = Vec::new();
    reserve(&mut instance, 256, Some(&mut hint_b), &mut b1).unwrap();
    assert_eq!(b1[0].off, 11);

    let mut a2 = Vec::new();
    reserve(&mut instance, 1, Some(&mut hint_a), &mut a2).unwrap();
    assert_eq!(a2[0].off, 11 + 256);
}

#[test]
fn cancel_of_non_last_reserve_leaves_hole() {
    let mut instance = fresh(32 * 1024, false);

    let mut a = Vec::new();
    reserve(&mut instance, 2, None, &mut a).unwrap();
    reserve(&mut instance, 2, None, &mut a).unwrap();

    let mut b = Vec::new();
    reserve(&mut instance, 2, None, &mut b).unwrap();
    reserve(&mut instance, 2, None, &mut b).unwrap();

    publish_all(&mut instance, &b);
    cancel(&mut instance, None, &a).unwrap();

    for r in &b {
        assert!(instance.verify_alloc(true, r.off, r.cnt).unwrap());
    }
    for r in &a {
        assert!(!instance.verify_alloc(false, r.off, r.cnt).unwrap());
    }
}

#[test]
fn bitmap_chunk_promotion() {
    let mut instance = fresh(32 * 1024, true);

    let mut reserved = Vec::new();
    reserve(&mut instance, 1, None, &mut reserved).unwrap();
    let r = reserved[0];
    assert!(r.bitmap_chunk.is_some());
    assert!(r.new_bitmap_chunk);

    publish_all(&mut instance, &reserved);
    assert!(instance.verify_alloc(true, r.off, r.cnt).unwrap());
    assert!(instance.verify_alloc(false, r.off, r.cnt).unwrap());
}

#[test]
fn aging_defers_reuse() {
    let mut instance = fresh(32 * 1024, false);

    let mut reserved = Vec::new();
    reserve(&mut instance, 4, None, &mut reserved).unwrap();
    publish_all(&mut instance, &reserved);
    let r = reserved[0];

    free(&mut instance, r.off, r.cnt).unwrap();
    assert_eq!(instance.query().stat.frags.aging, 1);

    let mut again = Vec::new();
    reserve(&mut instance, 4, None, &mut again).unwrap();
    assert_ne!(again[0].off, r.off);

    instance.flush(constants::MAX_FLUSH_FRAGS, true).unwrap();
    assert!(!instance.verify_alloc(false, r.off, r.cnt).unwrap());
}

#[test]
fn fragmented_device_still_serves_large() {
    let large_thresh = constants::large_thresh_blks(constants::BLK_SZ);
    let mut instance = fresh((large_thresh as u64) * 4, false);

    let mut all = Vec::new();
    loop {
        let mut r = Vec::new();
        if reserve(&mut instance, 8, None, &mut r).is_err() {
            break;
        }
        all.push(r.remove(0));
    }
    assert!(!all.is_empty());

    // Free a contiguous trailing run (sequential carving means these
    // reservations sit back to back) so the freed space can actually
    // coalesce into one range big enough to satisfy a large reservation.
    for r in all.iter().skip(all.len() / 2) {
        free(&mut instance, r.off, r.cnt).unwrap();
    }
    instance.flush(constants::MAX_FLUSH_FRAGS, true).unwrap();

    let mut big = Vec::new();
    reserve(&mut instance, large_thresh + 1, None, &mut big).unwrap();
    assert_eq!(big[0].cnt, large_thresh + 1);
}

#[test]
fn fully_freed_bitmap_chunk_is_reclaimed() {
    let mut instance = fresh(32 * 1024, true);

    let mut slots = Vec::new();
    for _ in 0..256 {
        let mut r = Vec::new();
        reserve(&mut instance, 1, None, &mut r).unwrap();
        slots.push(r.remove(0));
    }
    publish_all(&mut instance, &slots);
    let chunk_off = slots[0].bitmap_chunk.unwrap();

    for r in &slots {
        free(&mut instance, r.off, r.cnt).unwrap();
    }
    instance.flush(constants::MAX_FLUSH_FRAGS, true).unwrap();

    assert!(!instance.verify_alloc(true, chunk_off, 256).unwrap());
}
