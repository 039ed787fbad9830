//! Reference-counted cache of in-memory trunks.
//!
//! The cache keeps every trunk that someone still points at: the
//! controller's active trunk, the views handed out to readers, and the
//! write requests queued for the io worker each hold one reference. An
//! entry is dropped the moment its last reference is released, so memory
//! use is bounded by the number of live views plus the io queue depth.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use granary_types::TrunkId;

/// One cached trunk buffer.
///
/// The buffer is behind an `RwLock` so readers can share it while the
/// controller appends to the active trunk with brief exclusive access.
pub(crate) struct Slot {
    pub(crate) buf: RwLock<Box<[u8]>>,
}

impl Slot {
    /// A fresh zero-filled trunk.
    pub(crate) fn zeroed(trunk_size: u32) -> Arc<Self> {
        Self::from_buf(vec![0u8; trunk_size as usize].into_boxed_slice())
    }

    pub(crate) fn from_buf(buf: Box<[u8]>) -> Arc<Self> {
        Arc::new(Self {
            buf: RwLock::new(buf),
        })
    }
}

struct Entry {
    refs: usize,
    slot: Arc<Slot>,
}

/// Maps trunk ids to cached slots with explicit reference counts.
///
/// Counts are explicit rather than `Arc::strong_count` so the cache can
/// tell exactly which trunks are still referenced at shutdown. A poisoned
/// map only happens after a panic elsewhere; lookups then behave as misses.
pub(crate) struct TrunkCache {
    entries: Mutex<HashMap<u32, Entry>>,
}

impl TrunkCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the slot for `id` and takes a reference on it, or `None` if
    /// the trunk is not cached.
    pub(crate) fn acquire(&self, id: TrunkId) -> Option<Arc<Slot>> {
        let Ok(mut entries) = self.entries.lock() else {
            return None;
        };
        let entry = entries.get_mut(&id.as_u32())?;
        entry.refs += 1;
        Some(Arc::clone(&entry.slot))
    }

    /// Inserts a trunk that is not currently cached, with one reference.
    pub(crate) fn insert(&self, id: TrunkId, slot: Arc<Slot>) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let prev = entries.insert(id.as_u32(), Entry { refs: 1, slot });
        debug_assert!(prev.is_none(), "trunk {id} was already cached");
    }

    /// Takes an additional reference on a trunk known to be cached.
    pub(crate) fn retain(&self, id: TrunkId) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        match entries.get_mut(&id.as_u32()) {
            Some(entry) => entry.refs += 1,
            None => debug_assert!(false, "retain of uncached trunk {id}"),
        }
    }

    /// Drops one reference; the entry is removed when none remain.
    pub(crate) fn release(&self, id: TrunkId) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let Some(entry) = entries.get_mut(&id.as_u32()) else {
            debug_assert!(false, "release of uncached trunk {id}");
            return;
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            entries.remove(&id.as_u32());
        }
    }

    /// Reference count for `id`, if cached.
    #[cfg(test)]
    pub(crate) fn refs(&self, id: TrunkId) -> Option<usize> {
        let entries = self.entries.lock().ok()?;
        entries.get(&id.as_u32()).map(|entry| entry.refs)
    }

    /// Entries still cached, as `(id, refs)` pairs sorted by id. Used for
    /// leak reporting at shutdown, when this should be empty.
    pub(crate) fn leaked(&self) -> Vec<(u32, usize)> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        let mut out: Vec<_> = entries
            .iter()
            .map(|(&id, entry)| (id, entry.refs))
            .collect();
        out.sort_unstable();
        out
    }
}
