//! Bounding-box index over scene entities.
//!
//! Entries are keyed for constant-time insert/remove; queries scan every box.
//! The contract (exact intersecting set, no ordering) leaves room for a grid later.
//! Boxes are captured at insertion time, so callers re-insert after moving an
//! entity.

use super::types::Bounds;
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct SpatialIndex<K> {
    entries: HashMap<K, Bounds>,
}

impl<K> Default for SpatialIndex<K> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<K: Eq + Hash> SpatialIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` with `bounds`, replacing any previous entry for the same key.
    pub fn insert(&mut self, key: K, bounds: Bounds) {
        self.entries.insert(key, bounds);
    }

    /// Returns `true` when an entry was removed.
    pub fn remove(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keys whose box intersects `area` (edges inclusive).
    pub fn query<'a>(&'a self, area: &'a Bounds) -> impl Iterator<Item = &'a K> + 'a {
        self.entries.iter().filter(move |(_, b)| b.intersects(area)).map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
