//! A bounded, deterministic stress run shaped after DAOS's `vea_stress.c`:
//! repeated reserve/publish/free/merge cycles against one instance, checking
//! that `query().attr` stays internally consistent throughout. Uses a fixed
//! linear-congruential sequence instead of a system RNG so the run is
//! reproducible without a `rand` dependency.

use std::sync::Arc;
use vea::{cancel, constants, format, free, load, reserve, tx_publish, Instance, MemPmemPool, NullUnmap, ReservedExt};

const CAPACITY_BLKS: u64 = 256 * 1024;
const ITERATIONS: usize = 2_000;
const RSRV_CNT_MAX: u32 = 10;
const UPD_BLKS_MAX: u32 = 256;
const FREE_CNT_MAX: usize = 30;

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        // Numerical Recipes constants; plenty of spread for this test's needs.
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 32
    }

    fn range(&mut self, max_inclusive: u32) -> u32 {
        (self.next() % (max_inclusive as u64 + 1)) as u32
    }

    fn count(&mut self, max: u32) -> u32 {
        let c = self.range(max);
        if c == 0 {
            1
        } else {
            c
        }
    }
}

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

#[test]
fn stress_reserve_publish_free_cycle_keeps_attr_consistent() {
    let mut instance = fresh();
    let mut rng = Lcg(0x5eed_dead_beef_cafe);
    let mut allocated: Vec<ReservedExt> = Vec::new();
    let total_blks = instance.query().attr.total_blks;

    for _ in 0..ITERATIONS {
        let free_blks = instance.query().attr.free_blks;
        let alloc_blks: u64 = allocated.iter().map(|r| r.cnt as u64).sum();
        assert_eq!(free_blks + alloc_blks + instance.header().hdr_blks as u64, total_blks);

        // Punch: once over half the device is allocated, free a big batch
        // before doing any more IO, mirroring the original's need_punch gate.
        if alloc_blks > total_blks / 2 && !allocated.is_empty() {
            let drop_cnt = (allocated.len() / 2).max(1);
            for r in allocated.drain(..drop_cnt) {
                free(&mut instance, r.off, r.cnt).unwrap();
            }
            instance.flush(constants::MAX_FLUSH_FRAGS, true).unwrap();
            continue;
        }

        let do_io = rng.range(99) < 70 || allocated.is_empty();
        if do_io {
            let rsrv_cnt = rng.count(RSRV_CNT_MAX);
            let mut batch = Vec::new();
            let mut ok = true;
            for _ in 0..rsrv_cnt {
                let blks = rng.count(UPD_BLKS_MAX);
                let mut r = Vec::new();
                if reserve(&mut instance, blks, None, &mut r).is_err() {
                    ok = false;
                    break;
                }
                batch.push(r.remove(0));
            }
            if ok {
                let mut txn = instance.begin_txn();
                tx_publish(&mut instance, &mut txn, None, &batch).unwrap();
                txn.commit().unwrap();
                allocated.extend(batch);
            } else {
                cancel(&mut instance, None, &batch).unwrap();
            }
        } else {
            let free_cnt = (rng.count(FREE_CNT_MAX as u32) as usize).min(allocated.len());
            for r in allocated.drain(..free_cnt) {
                free(&mut instance, r.off, r.cnt).unwrap();
            }
        }

        if rng.range(9) == 0 {
            instance.flush(constants::MAX_FLUSH_FRAGS, false).unwrap();
        }
    }

    for r in allocated.drain(..) {
        free(&mut instance, r.off, r.cnt).unwrap();
    }
    instance.flush(constants::MAX_FLUSH_FRAGS, true).unwrap();
    assert_eq!(instance.query().attr.free_blks + instance.header().hdr_blks as u64, total_blks);
}
