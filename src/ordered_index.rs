//! The generic key-ordered index the allocator core is built on.
//!
//! §6 treats the real key-ordered B+-tree (the one shared with the rest of
//! the storage stack) as an external collaborator: VEA only needs ordered
//! `LE`/`GE`/`EQ` lookup, cursor iteration from a missed probe, and
//! insert/upsert/delete with in-place embedded values. [`OrderedIndex`]
//! captures exactly that contract as a trait, mirroring how
//! the teacher's own `tree::layer::TreeBaseLayer` draws the boundary
//! between the allocator's view of a tree and the tree's own node/page
//! machinery.
//! [`BTreeIndex`] is the in-process implementation used both for the
//! in-memory indexes and, via [`crate::txn`], for the persistent mirrors.

use std::collections::BTreeMap;
use std::ops::Bound;

/// The probe kinds the allocator issues against an ordered index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    /// Largest key `<= target`.
    Le,
    /// Smallest key `>= target`.
    Ge,
    /// Exactly `target`.
    Eq,
}

pub trait OrderedIndex<K: Ord + Copy, V> {
    fn probe(&self, probe: Probe, key: K) -> Option<(K, &V)>;
    fn get(&self, key: K) -> Option<&V>;
    fn get_mut(&mut self, key: K) -> Option<&mut V>;
    /// Insert or overwrite; returns the previous value, if any.
    fn upsert(&mut self, key: K, value: V) -> Option<V>;
    fn delete(&mut self, key: K) -> Option<V>;
    fn is_empty(&self) -> bool;
    fn len(&self) -> usize;
    /// Largest key strictly less than `key`.
    fn prev(&self, key: K) -> Option<(K, &V)>;
    /// Smallest key strictly greater than `key`.
    fn next(&self, key: K) -> Option<(K, &V)>;
}

/// `std::collections::BTreeMap`-backed implementation of [`OrderedIndex`].
///
/// A real deployment swaps this for the shared on-disk B+-tree; the
/// allocator core never depends on anything beyond the trait above.
#[derive(Clone, Debug, Default)]
pub struct BTreeIndex<K: Ord + Copy, V> {
    map: BTreeMap<K, V>,
}

impl<K: Ord + Copy, V> BTreeIndex<K, V> {
    pub fn new() -> Self {
        BTreeIndex { map: BTreeMap::new() }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.map.values()
    }

    pub fn into_inner(self) -> BTreeMap<K, V> {
        self.map
    }
}

impl<K: Ord + Copy, V> OrderedIndex<K, V> for BTreeIndex<K, V> {
    fn probe(&self, probe: Probe, key: K) -> Option<(K, &V)> {
        match probe {
            Probe::Eq => self.map.get_key_value(&key).map(|(k, v)| (*k, v)),
            Probe::Le => self
                .map
                .range((Bound::Unbounded, Bound::Included(key)))
                .next_back()
                .map(|(k, v)| (*k, v)),
            Probe::Ge => self
                .map
                .range((Bound::Included(key), Bound::Unbounded))
                .next()
                .map(|(k, v)| (*k, v)),
        }
    }

    fn get(&self, key: K) -> Option<&V> {
        self.map.get(&key)
    }

    fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.map.get_mut(&key)
    }

    fn upsert(&mut self, key: K, value: V) -> Option<V> {
        self.map.insert(key, value)
    }

    fn delete(&mut self, key: K) -> Option<V> {
        self.map.remove(&key)
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn prev(&self, key: K) -> Option<(K, &V)> {
        self.map
            .range((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
            .map(|(k, v)| (*k, v))
    }

    fn next(&self, key: K) -> Option<(K, &V)> {
        self.map
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, v)| (*k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes() {
        let mut idx: BTreeIndex<u64, u32> = BTreeIndex::new();
        idx.upsert(10, 1);
        idx.upsert(20, 2);
        idx.upsert(30, 3);

        assert_eq!(idx.probe(Probe::Eq, 20), Some((20, &2)));
        assert_eq!(idx.probe(Probe::Eq, 21), None);
        assert_eq!(idx.probe(Probe::Le, 25), Some((20, &2)));
        assert_eq!(idx.probe(Probe::Le, 5), None);
        assert_eq!(idx.probe(Probe::Ge, 15), Some((20, &2)));
        assert_eq!(idx.probe(Probe::Ge, 35), None);
        assert_eq!(idx.prev(20), Some((10, &1)));
        assert_eq!(idx.next(20), Some((30, &3)));
    }
}
