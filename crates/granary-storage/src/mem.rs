//! In-memory trunk storage.
//!
//! Backs unit tests and ephemeral streams. Follows the same write contract
//! as [`LocalStorage`](crate::LocalStorage): the newest trunk may be
//! rewritten, the next trunk appended, nothing else.

use std::sync::Mutex;

use granary_types::TrunkId;

use crate::{StorageError, TrunkStorage};

struct MemInner {
    trunks: Vec<Box<[u8]>>,
    last_trunk_len: u32,
}

/// Trunk storage held entirely in memory.
pub struct MemStorage {
    trunk_size: u32,
    inner: Mutex<MemInner>,
}

impl MemStorage {
    /// Creates an empty stream of one zeroed trunk.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotPowerOfTwo`] for an invalid trunk size.
    pub fn new(trunk_size: u32) -> Result<Self, StorageError> {
        if !trunk_size.is_power_of_two() {
            return Err(StorageError::NotPowerOfTwo(trunk_size));
        }
        Ok(Self {
            trunk_size,
            inner: Mutex::new(MemInner {
                trunks: vec![vec![0u8; trunk_size as usize].into_boxed_slice()],
                last_trunk_len: 0,
            }),
        })
    }

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, MemInner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Io(std::io::Error::other("storage state lock poisoned")))
    }
}

impl TrunkStorage for MemStorage {
    fn trunk_size(&self) -> u32 {
        self.trunk_size
    }

    fn trunk_count(&self) -> u32 {
        self.inner.lock().map(|g| g.trunks.len() as u32).unwrap_or_default()
    }

    fn last_trunk_len(&self) -> u32 {
        self.inner.lock().map(|g| g.last_trunk_len).unwrap_or_default()
    }

    fn read_trunk(&self, id: TrunkId, buf: &mut [u8]) -> Result<(), StorageError> {
        let inner = self.lock_inner()?;
        let trunk = inner
            .trunks
            .get(id.as_usize())
            .ok_or(StorageError::TrunkOutOfRange {
                id: id.as_u32(),
                count: inner.trunks.len() as u32,
            })?;
        buf.copy_from_slice(trunk);
        Ok(())
    }

    fn write_trunk(&self, id: TrunkId, data: &[u8]) -> Result<(), StorageError> {
        let mut inner = self.lock_inner()?;
        if data.len() > self.trunk_size as usize {
            return Err(StorageError::TooLong {
                len: data.len(),
                trunk_size: self.trunk_size,
            });
        }
        let count = inner.trunks.len() as u32;
        if id.as_u32() == count {
            inner
                .trunks
                .push(vec![0u8; self.trunk_size as usize].into_boxed_slice());
        } else if id.as_u32() + 1 != count {
            return Err(StorageError::NonSequentialWrite {
                id: id.as_u32(),
                count,
            });
        }
        // A shorter rewrite keeps the stale tail, like a preallocated file.
        inner.trunks[id.as_usize()][..data.len()].copy_from_slice(data);
        inner.last_trunk_len = data.len() as u32;
        Ok(())
    }

    fn read_at(&self, id: TrunkId, offset: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        let inner = self.lock_inner()?;
        let trunk = inner
            .trunks
            .get(id.as_usize())
            .ok_or(StorageError::TrunkOutOfRange {
                id: id.as_u32(),
                count: inner.trunks.len() as u32,
            })?;
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.trunk_size as usize {
            return Err(StorageError::ReadBeyondTrunk {
                offset,
                len: buf.len(),
                trunk_size: self.trunk_size,
            });
        }
        buf.copy_from_slice(&trunk[start..end]);
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
