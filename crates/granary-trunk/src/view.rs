//! Read handles over cached trunks.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, RwLockReadGuard};

use granary_types::TrunkId;

use crate::cache::Slot;
use crate::error::TrunkError;
use crate::shared::Shared;

/// A reference-counted handle to one cached trunk.
///
/// Holding a view pins the trunk in the cache; dropping it releases the
/// reference. Views come from
/// [`TrunkController::link`](crate::TrunkController::link).
pub struct TrunkView {
    id: TrunkId,
    slot: Arc<Slot>,
    shared: Arc<Shared>,
}

impl TrunkView {
    pub(crate) fn new(id: TrunkId, slot: Arc<Slot>, shared: Arc<Shared>) -> Self {
        Self { id, slot, shared }
    }

    /// The trunk this view points at.
    #[must_use]
    pub fn id(&self) -> TrunkId {
        self.id
    }

    /// Borrows the trunk's contents for the lifetime of the returned guard.
    pub fn bytes(&self) -> Result<TrunkBytes<'_>, TrunkError> {
        let guard = self
            .slot
            .buf
            .read()
            .map_err(|_| TrunkError::CorruptState("trunk buffer lock poisoned".into()))?;
        Ok(TrunkBytes { guard })
    }

    pub(crate) fn slot(&self) -> &Arc<Slot> {
        &self.slot
    }
}

impl Drop for TrunkView {
    fn drop(&mut self) {
        self.shared.cache.release(self.id);
    }
}

impl fmt::Debug for TrunkView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrunkView").field("id", &self.id).finish()
    }
}

/// Borrowed contents of a cached trunk.
///
/// Derefs to `&[u8]` covering the whole trunk, padding included; callers
/// slice out the range they need.
pub struct TrunkBytes<'a> {
    pub(crate) guard: RwLockReadGuard<'a, Box<[u8]>>,
}

impl Deref for TrunkBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard
    }
}

impl AsRef<[u8]> for TrunkBytes<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}
