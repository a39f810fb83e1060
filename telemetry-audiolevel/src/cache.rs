//! Most-recent audio level per contributing source.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Sparse map from a contributing source (CSRC) to its most recently
/// computed audio level.
///
/// Writes publish a complete new backing map atomically (copy-on-write), so
/// a reader that obtained a [`snapshot`](Self::snapshot) before an update
/// keeps seeing a consistent, possibly stale, whole structure rather than a
/// partially updated one. Absence of a key means "unknown", which is
/// distinct from a level of 0 (loudest).
#[derive(Debug, Default)]
pub struct AudioLevelCache {
    levels: RwLock<Arc<HashMap<u32, u8>>>,
}

impl AudioLevelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `level` as the current level of `source_id`, replacing any
    /// previous value. Publishing is skipped when the value is unchanged.
    pub fn put_level(&self, source_id: u32, level: u8) {
        let mut levels = self.write_lock();
        if levels.get(&source_id) == Some(&level) {
            return;
        }
        let mut next = HashMap::clone(&levels);
        next.insert(source_id, level);
        *levels = Arc::new(next);
    }

    /// The most recent level of `source_id`, or `None` if no level has been
    /// recorded for it.
    pub fn level(&self, source_id: u32) -> Option<u8> {
        self.read_lock().get(&source_id).copied()
    }

    /// Removes the level of `source_id`. Returns whether an entry existed.
    pub fn remove_level(&self, source_id: u32) -> bool {
        let mut levels = self.write_lock();
        if !levels.contains_key(&source_id) {
            return false;
        }
        let mut next = HashMap::clone(&levels);
        next.remove(&source_id);
        *levels = Arc::new(next);
        true
    }

    /// The currently published whole-map snapshot. Later writes replace the
    /// published map and never mutate a snapshot already handed out.
    pub fn snapshot(&self) -> Arc<HashMap<u32, u8>> {
        Arc::clone(&self.read_lock())
    }

    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    // A poisoned lock only means a writer panicked before swapping in its
    // new map; the published Arc is always a whole map, so recovery is safe.
    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, Arc<HashMap<u32, u8>>> {
        self.levels
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, Arc<HashMap<u32, u8>>> {
        self.levels
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
