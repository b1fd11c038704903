//! Format, load, unload, upgrade (§4.7).
//!
//! Grounded on DAOS's `vea_format`, `vea_load`, `vea_unload`, and the
//! `compat`-bit upgrade path sketched in `vea_api.c`.

use crate::constants::*;
use crate::error::{Error, ErrorKind, Result};
use crate::hint::HintContext;
use crate::index::bitmap::{BitmapEntry, BitmapState};
use crate::instance::Instance;
use crate::metrics::Metrics;
use crate::persist::{FreeBitmapDf, FreeExtentDf, HintDf, SpaceDf};
use crate::txn::{MemPmemPool, TreeId};
use crate::unmap::UnmapContext;
use std::sync::Arc;

/// `format`: stamp a fresh `SpaceDf` header and the device's single initial
/// free extent. `on_format_cb`, if given, runs outside any transaction
/// (device-level initialization that may suspend) before the metadata
/// transaction begins.
pub fn format(
    pool: &MemPmemPool,
    block_sz: u32,
    hdr_blks: u32,
    capacity: u64,
    on_format_cb: Option<impl FnOnce() -> Result<()>>,
    force: bool,
    compat: u32,
) -> Result<()> {
    if block_sz == 0 || block_sz > MAX_BLOCK_SZ || block_sz % BLK_SZ != 0 {
        return Err(Error::invalid(format!("invalid block size {block_sz}")));
    }

    if let Some(existing) = pool.header_get::<SpaceDf>()? {
        if existing.magic == VEA_MAGIC && !force {
            return Err(ErrorKind::Exist.into());
        }
    }

    if let Some(cb) = on_format_cb {
        cb()?;
    }

    let total_blks = capacity / block_sz as u64;
    if total_blks <= hdr_blks as u64 || total_blks - hdr_blks as u64 < MIN_FORMAT_BLKS {
        return Err(ErrorKind::NoSpace.into());
    }
    let free_blks = total_blks - hdr_blks as u64;

    let mut txn = pool.begin();
    if force {
        txn.clear_tree(TreeId::Free);
        txn.clear_tree(TreeId::Bitmap);
    }
    txn.header_set(&SpaceDf {
        magic: VEA_MAGIC,
        compat,
        block_sz,
        hdr_blks,
        total_blks,
    })?;
    txn.tree_upsert(
        TreeId::Free,
        hdr_blks as u64,
        &FreeExtentDf {
            blk_off: hdr_blks as u64,
            blk_cnt: free_blks as u32,
            age: 0,
        },
    )?;
    if compat & COMPAT_FEATURE_BITMAP != 0 {
        txn.tree_upsert(TreeId::Bitmap, BITMAP_CHUNK_HINT_KEY, &HintDf::default())?;
    }
    txn.commit()?;
    log::info!("format: {total_blks} blocks at {block_sz} bytes/block, {free_blks} free, compat={compat:#x}");
    Ok(())
}

/// `load`: build a fresh `Instance` by replaying both persistent trees.
pub fn load(pool: MemPmemPool, unmap_ctx: Arc<dyn UnmapContext>) -> Result<Instance> {
    let header: SpaceDf = pool
        .header_get()?
        .ok_or_else(|| Error::from(ErrorKind::Uninit))?;
    if header.magic != VEA_MAGIC {
        return Err(ErrorKind::Uninit.into());
    }

    let mut instance = Instance::new(pool.clone(), header, unmap_ctx, Metrics::default());

    let txn = pool.begin();
    for (off, ext) in txn.tree_iter::<FreeExtentDf>(TreeId::Free)? {
        instance.index_mut().insert_extent(off, ext.blk_cnt);
        instance.metrics().inc_extent_blks(ext.blk_cnt as u64);
    }
    for (off, df) in txn.tree_iter::<FreeBitmapDf>(TreeId::Bitmap)? {
        if off == BITMAP_CHUNK_HINT_KEY {
            continue;
        }
        let entry = BitmapEntry::from_persistent(&df, BitmapState::Published);
        let free_blocks = entry.free_blocks();
        instance.index_mut().insert_bitmap_entry(entry);
        instance.metrics().inc_bitmap_blks(free_blocks as u64);
    }

    if header.compat & COMPAT_FEATURE_BITMAP != 0 {
        let persisted: HintDf = txn.tree_get(TreeId::Bitmap, BITMAP_CHUNK_HINT_KEY)?.unwrap_or_default();
        instance.restore_bitmap_hint(Some(HintContext::new(TreeId::Bitmap, BITMAP_CHUNK_HINT_KEY, persisted)));
    }

    log::info!("load: {} total blocks, {} free", header.total_blks, instance.metrics().free_blks());
    Ok(instance)
}

/// `unload`: tear down the in-memory `Instance`. Persistent state is
/// untouched.
pub fn unload(_instance: Instance) {}

/// `upgrade`: turn on the bitmap feature for a device formatted before it
/// existed. Destroys and recreates the (previously unused) bitmap-tree slot
/// under uint keys, and inserts the chunk-carve hint. Gated on an explicit
/// version argument rather than inferring intent from the current `compat`
/// value (§9 open question).
pub fn upgrade(pool: &MemPmemPool, new_version: u32) -> Result<()> {
    if new_version < 1 {
        return Err(Error::invalid("upgrade requires a target version >= 1"));
    }
    let header: SpaceDf = pool
        .header_get()?
        .ok_or_else(|| Error::from(ErrorKind::Uninit))?;
    if header.compat & COMPAT_FEATURE_BITMAP != 0 {
        return Ok(());
    }

    let mut txn = pool.begin();
    txn.clear_tree(TreeId::Bitmap);
    txn.tree_upsert(TreeId::Bitmap, BITMAP_CHUNK_HINT_KEY, &HintDf::default())?;
    txn.header_set(&SpaceDf {
        compat: header.compat | COMPAT_FEATURE_BITMAP,
        ..header
    })?;
    txn.commit()?;
    log::info!("upgrade: bitmap feature enabled (target version {new_version})");
    Ok(())
}
