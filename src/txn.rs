//! Mock persistent-memory transaction engine.
//!
//! §1 and §6 name the real transaction engine (begin/commit/abort, staged
//! commit/abort/end callbacks, undo-log `add_ptr`) as an external
//! collaborator that the allocator core requires but does not implement.
//! [`MemPmemPool`] is the in-process stand-in used by this crate and its
//! tests: two named trees (`Free`, `Bitmap`) of serialized records plus a
//! header blob, guarded by a single [`parking_lot::Mutex`] the way the rest
//! of the storage stack guards its shared structures (see
//! `database::handler::Handler`).
//!
//! A [`Transaction`] stages its writes against a private snapshot of the
//! pool and only publishes them on [`Transaction::commit`]; [`Transaction::abort`]
//! simply drops the snapshot. This gives the "on abort, persistent records
//! revert" behavior required by §3 without modeling a real undo log.

use crate::error::{Error, Result};
use crate::ordered_index::{BTreeIndex, OrderedIndex, Probe};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TreeId {
    Free,
    Bitmap,
}

#[derive(Clone, Default)]
struct PoolState {
    header: Option<Vec<u8>>,
    free: BTreeIndex<u64, Vec<u8>>,
    bitmap: BTreeIndex<u64, Vec<u8>>,
}

impl PoolState {
    fn tree(&self, id: TreeId) -> &BTreeIndex<u64, Vec<u8>> {
        match id {
            TreeId::Free => &self.free,
            TreeId::Bitmap => &self.bitmap,
        }
    }

    fn tree_mut(&mut self, id: TreeId) -> &mut BTreeIndex<u64, Vec<u8>> {
        match id {
            TreeId::Free => &mut self.free,
            TreeId::Bitmap => &mut self.bitmap,
        }
    }
}

/// The mock backing pool. Cheap to clone (an `Arc` handle), matching how
/// `Handler` is shared across datasets in the parent storage stack.
#[derive(Clone, Default)]
pub struct MemPmemPool {
    state: Arc<Mutex<PoolState>>,
}

type Callback = Box<dyn FnOnce() + Send>;
type EndCallback = Box<dyn FnOnce(bool) + Send>;

/// A single transaction scope. Writes are only visible to other
/// transactions after [`Transaction::commit`].
pub struct Transaction {
    pool: Arc<Mutex<PoolState>>,
    staged: PoolState,
    on_commit: Vec<Callback>,
    on_abort: Vec<Callback>,
    on_end: Vec<EndCallback>,
    nested: bool,
}

impl MemPmemPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a top-level transaction, staging a private copy of the pool.
    pub fn begin(&self) -> Transaction {
        let staged = self.state.lock().clone();
        Transaction {
            pool: self.state.clone(),
            staged,
            on_commit: Vec::new(),
            on_abort: Vec::new(),
            on_end: Vec::new(),
            nested: false,
        }
    }

    pub fn header_get<H: DeserializeOwned>(&self) -> Result<Option<H>> {
        let guard = self.state.lock();
        decode_opt(guard.header.as_deref())
    }
}

impl Transaction {
    /// Open a transaction nested within this one. §4.3/§4.7 use this for the
    /// publish of a freshly-carved bitmap chunk and for `upgrade`. Real
    /// engines join the nested undo log to the parent scope; here the
    /// nested scope shares the same staged snapshot so writes are visible
    /// immediately to the rest of this (still-open) transaction, but its
    /// commit/abort callbacks fire at the nested boundary rather than
    /// waiting for the outer commit.
    pub fn nested(&mut self) -> NestedTransaction<'_> {
        NestedTransaction {
            parent: self,
            on_commit: Vec::new(),
            on_abort: Vec::new(),
        }
    }

    pub fn header_get<H: DeserializeOwned>(&self) -> Result<Option<H>> {
        decode_opt(self.staged.header.as_deref())
    }

    pub fn header_set<H: Serialize>(&mut self, header: &H) -> Result<()> {
        self.staged.header = Some(encode(header)?);
        Ok(())
    }

    pub fn tree_get<V: DeserializeOwned>(&self, tree: TreeId, key: u64) -> Result<Option<V>> {
        decode_opt(self.staged.tree(tree).get(key).map(Vec::as_slice))
    }

    pub fn tree_probe<V: DeserializeOwned>(
        &self,
        tree: TreeId,
        probe: Probe,
        key: u64,
    ) -> Result<Option<(u64, V)>> {
        match self.staged.tree(tree).probe(probe, key) {
            None => Ok(None),
            Some((k, bytes)) => Ok(Some((k, decode(bytes)?))),
        }
    }

    pub fn tree_prev<V: DeserializeOwned>(&self, tree: TreeId, key: u64) -> Result<Option<(u64, V)>> {
        match self.staged.tree(tree).prev(key) {
            None => Ok(None),
            Some((k, bytes)) => Ok(Some((k, decode(bytes)?))),
        }
    }

    pub fn tree_next<V: DeserializeOwned>(&self, tree: TreeId, key: u64) -> Result<Option<(u64, V)>> {
        match self.staged.tree(tree).next(key) {
            None => Ok(None),
            Some((k, bytes)) => Ok(Some((k, decode(bytes)?))),
        }
    }

    pub fn tree_upsert<V: Serialize>(&mut self, tree: TreeId, key: u64, value: &V) -> Result<()> {
        let bytes = encode(value)?;
        self.staged.tree_mut(tree).upsert(key, bytes);
        Ok(())
    }

    pub fn tree_delete(&mut self, tree: TreeId, key: u64) -> Result<()> {
        self.staged.tree_mut(tree).delete(key);
        Ok(())
    }

    pub fn tree_iter<V: DeserializeOwned>(&self, tree: TreeId) -> Result<Vec<(u64, V)>> {
        self.staged
            .tree(tree)
            .iter()
            .map(|(k, bytes)| Ok((*k, decode(bytes)?)))
            .collect()
    }

    pub fn clear_tree(&mut self, tree: TreeId) {
        *self.staged.tree_mut(tree) = BTreeIndex::new();
    }

    pub fn on_commit(&mut self, cb: Callback) {
        self.on_commit.push(cb);
    }

    pub fn on_abort(&mut self, cb: Callback) {
        self.on_abort.push(cb);
    }

    pub fn on_end(&mut self, cb: EndCallback) {
        self.on_end.push(cb);
    }

    pub fn commit(self) -> Result<()> {
        *self.pool.lock() = self.staged;
        for cb in self.on_commit {
            cb();
        }
        for cb in self.on_end {
            cb(true);
        }
        Ok(())
    }

    pub fn abort(self) {
        for cb in self.on_abort {
            cb();
        }
        for cb in self.on_end {
            cb(false);
        }
    }
}

/// Handle returned by [`Transaction::nested`]. Dropping it without calling
/// [`commit`](NestedTransaction::commit) or [`abort`](NestedTransaction::abort)
/// is a logic error in the allocator core and is intentionally left to panic
/// via the unfired callbacks rather than silently doing either.
pub struct NestedTransaction<'a> {
    parent: &'a mut Transaction,
    on_commit: Vec<Callback>,
    on_abort: Vec<Callback>,
}

impl<'a> std::ops::Deref for NestedTransaction<'a> {
    type Target = Transaction;
    fn deref(&self) -> &Transaction {
        self.parent
    }
}

impl<'a> std::ops::DerefMut for NestedTransaction<'a> {
    fn deref_mut(&mut self) -> &mut Transaction {
        self.parent
    }
}

impl<'a> NestedTransaction<'a> {
    pub fn on_commit(&mut self, cb: Callback) {
        self.on_commit.push(cb);
    }

    pub fn on_abort(&mut self, cb: Callback) {
        self.on_abort.push(cb);
    }

    pub fn commit(self) {
        for cb in self.on_commit {
            cb();
        }
    }

    pub fn abort(self) {
        for cb in self.on_abort {
            cb();
        }
    }
}

fn encode<V: Serialize>(value: &V) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::from(format!("serialize failed: {e}")))
}

fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
    bincode::deserialize(bytes).map_err(|e| Error::from(format!("deserialize failed: {e}")))
}

fn decode_opt<V: DeserializeOwned>(bytes: Option<&[u8]>) -> Result<Option<V>> {
    match bytes {
        None => Ok(None),
        Some(b) => Ok(Some(decode(b)?)),
    }
}
