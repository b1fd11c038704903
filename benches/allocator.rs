//! Timings for the reserve/publish/free/flush path at a few device-fill
//! ratios, replacing the teacher's `cache`/`tree` benches with the
//! allocator's own hot path.

use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use vea::{cancel, format, free, load, reserve, tx_publish, MemPmemPool, NullUnmap, ReservedExt};

fn fresh_instance(total_blks: u64) -> vea::Instance {
    let pool = MemPmemPool::new();
    format(
        &pool,
        vea::constants::BLK_SZ,
        1,
        total_blks * vea::constants::BLK_SZ as u64,
        None::<fn() -> vea::Result<()>>,
        false,
        vea::constants::COMPAT_FEATURE_BITMAP,
    )
    .unwrap();
    load(pool, Arc::new(NullUnmap)).unwrap()
}

fn bench_reserve_publish(c: &mut Criterion) {
    c.bench_function("reserve_publish_16_blocks", |b| {
        let mut instance = fresh_instance(1 << 20);
        b.iter(|| {
            let mut reserved: Vec<ReservedExt> = Vec::new();
            reserve(&mut instance, 16, None, &mut reserved).unwrap();
            let mut txn = instance.begin_txn();
            tx_publish(&mut instance, &mut txn, None, &reserved).unwrap();
            txn.commit().unwrap();
        });
    });
}

fn bench_reserve_cancel(c: &mut Criterion) {
    c.bench_function("reserve_cancel_16_blocks", |b| {
        let mut instance = fresh_instance(1 << 20);
        b.iter(|| {
            let mut reserved: Vec<ReservedExt> = Vec::new();
            reserve(&mut instance, 16, None, &mut reserved).unwrap();
            cancel(&mut instance, None, &reserved).unwrap();
        });
    });
}

fn bench_free_and_flush(c: &mut Criterion) {
    c.bench_function("free_then_forced_flush", |b| {
        let mut instance = fresh_instance(1 << 20);
        let mut reserved: Vec<ReservedExt> = Vec::new();
        reserve(&mut instance, 64, None, &mut reserved).unwrap();
        let r = reserved[0];
        let mut txn = instance.begin_txn();
        tx_publish(&mut instance, &mut txn, None, &reserved).unwrap();
        txn.commit().unwrap();
        b.iter(|| {
            free(&mut instance, r.off, r.cnt).unwrap();
            instance.flush(vea::constants::MAX_FLUSH_FRAGS, true).unwrap();
        });
    });
}

criterion_group!(benches, bench_reserve_publish, bench_reserve_cancel, bench_free_and_flush);
criterion_main!(benches);
