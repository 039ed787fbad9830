//! Local-filesystem trunk storage.
//!
//! One directory per stream. Trunks are grouped into preallocated block
//! files so a long stream does not turn into millions of small files:
//!
//! ```text
//! stream_dir/
//!   LOCK       <- advisory lock (exclusive writer / shared readers)
//!   meta       <- StreamMeta record, rewritten on flush
//!   0.block    <- trunks [0, trunks_per_file)
//!   1.block    <- trunks [trunks_per_file, 2*trunks_per_file)
//!   ...
//! ```
//!
//! Block file `f` stores trunk `id` at byte offset
//! `(id % trunks_per_file) * trunk_size`. Files are preallocated to their
//! full size on creation, so a trunk's bytes always live at a fixed offset
//! and positioned reads never race file growth.
//!
//! Trunk count and last-trunk length advance in memory as writes land and
//! are persisted by [`flush`](crate::TrunkStorage::flush); a crash loses at
//! most the writes since the last flush, which recovery treats as absent.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fs2::FileExt;
use granary_types::TrunkId;
use tracing::{debug, info, trace};

use crate::meta::StreamMeta;
use crate::{StorageError, TrunkStorage};

/// File name of the persisted meta record.
const META_FILE: &str = "meta";

/// File name of the advisory lock. A separate file from `meta`, which is
/// atomically replaced on flush and so cannot carry a lock across flushes.
const LOCK_FILE: &str = "LOCK";

/// Mutable state behind the storage lock.
struct Inner {
    meta: StreamMeta,
    /// Cached handle of the block file currently being written.
    write_file: Option<(u32, File)>,
}

/// Trunk storage backed by a local directory.
///
/// Writable streams hold an exclusive advisory lock for their lifetime;
/// read-only streams hold a shared one. A second writer fails to open with
/// [`StorageError::Locked`].
pub struct LocalStorage {
    dir: PathBuf,
    /// Held open for the lifetime of the stream; dropping releases the lock.
    _lock_file: File,
    writable: bool,
    inner: Mutex<Inner>,
}

impl LocalStorage {
    /// Opens a stream for writing, creating it if it does not exist.
    ///
    /// `trunk_size` must be a power of two; `trunks_per_file` must be at
    /// least 1. When the stream already exists, the requested geometry must
    /// match the persisted one.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotPowerOfTwo`] for an invalid trunk size
    /// - [`StorageError::Locked`] if another process has the stream open
    ///   for writing
    /// - [`StorageError::GeometryMismatch`] if the stream exists with a
    ///   different geometry
    pub fn writable(
        dir: impl Into<PathBuf>,
        trunk_size: u32,
        trunks_per_file: u32,
    ) -> Result<Self, StorageError> {
        let dir = dir.into();
        if !trunk_size.is_power_of_two() {
            return Err(StorageError::NotPowerOfTwo(trunk_size));
        }
        if trunks_per_file == 0 {
            return Err(StorageError::ZeroTrunksPerFile);
        }

        fs::create_dir_all(&dir)?;
        let lock_file = Self::lock(&dir, true)?;

        let meta_path = dir.join(META_FILE);
        let meta = if meta_path.exists() {
            let meta = StreamMeta::load(&meta_path)?;
            if meta.trunk_size != trunk_size || meta.trunks_per_file != trunks_per_file {
                return Err(StorageError::GeometryMismatch {
                    meta_trunk_size: meta.trunk_size,
                    meta_trunks_per_file: meta.trunks_per_file,
                    trunk_size,
                    trunks_per_file,
                });
            }
            debug!(
                path = %dir.display(),
                trunks = meta.trunk_count,
                last_trunk_len = meta.last_trunk_len,
                "resumed trunk stream"
            );
            meta
        } else {
            let meta = StreamMeta::new(trunk_size, trunks_per_file);
            meta.store(&meta_path)?;
            info!(
                path = %dir.display(),
                trunk_size,
                trunks_per_file,
                "created trunk stream"
            );
            meta
        };

        Ok(Self {
            dir,
            _lock_file: lock_file,
            writable: true,
            inner: Mutex::new(Inner {
                meta,
                write_file: None,
            }),
        })
    }

    /// Opens an existing stream read-only, with geometry taken from its meta
    /// record.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if the stream does not exist
    /// - [`StorageError::Locked`] if a lock cannot be obtained
    pub fn read_only(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        let meta_path = dir.join(META_FILE);
        if !meta_path.exists() {
            return Err(StorageError::NotFound { path: dir });
        }

        let lock_file = Self::lock(&dir, false)?;
        let meta = StreamMeta::load(&meta_path)?;
        debug!(
            path = %dir.display(),
            trunks = meta.trunk_count,
            last_trunk_len = meta.last_trunk_len,
            "opened trunk stream read-only"
        );

        Ok(Self {
            dir,
            _lock_file: lock_file,
            writable: false,
            inner: Mutex::new(Inner {
                meta,
                write_file: None,
            }),
        })
    }

    /// Returns the stream's directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Takes the stream's advisory lock: exclusive for writers, shared for
    /// readers.
    fn lock(dir: &Path, exclusive: bool) -> Result<File, StorageError> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let locked = if exclusive {
            file.try_lock_exclusive()
        } else {
            FileExt::try_lock_shared(&file)
        };
        locked.map_err(|_| StorageError::Locked {
            path: dir.to_path_buf(),
        })?;
        Ok(file)
    }

    fn lock_inner(&self) -> Result<MutexGuard<'_, Inner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Io(std::io::Error::other("storage state lock poisoned")))
    }

    fn block_path(&self, file_id: u32) -> PathBuf {
        self.dir.join(format!("{file_id}.block"))
    }

    /// Size each block file is preallocated to.
    fn block_file_len(meta: &StreamMeta) -> u64 {
        u64::from(meta.trunk_size) * u64::from(meta.trunks_per_file)
    }

    /// Byte offset of `id` within its block file.
    fn in_file_offset(meta: &StreamMeta, id: u32) -> u64 {
        u64::from(id % meta.trunks_per_file) * u64::from(meta.trunk_size)
    }

    /// Opens the block file holding `id` for reading.
    fn open_for_read(&self, meta: &StreamMeta, id: u32) -> Result<File, StorageError> {
        let file_id = id / meta.trunks_per_file;
        Ok(File::open(self.block_path(file_id))?)
    }

    /// Returns a handle to the block file holding `id` for writing, creating
    /// and preallocating it if needed. The newest block file's handle is
    /// cached across writes.
    fn open_for_write<'a>(
        &self,
        inner: &'a mut Inner,
        id: u32,
    ) -> Result<&'a mut File, StorageError> {
        let file_id = id / inner.meta.trunks_per_file;
        let reuse = matches!(inner.write_file, Some((cached, _)) if cached == file_id);
        if !reuse {
            // Sync the outgoing block file before letting go of its handle,
            // so flush only ever needs to sync the newest one.
            if let Some((_, old)) = inner.write_file.take() {
                old.sync_all()?;
            }
            let path = self.block_path(file_id);
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            if file.metadata()?.len() == 0 {
                file.set_len(Self::block_file_len(&inner.meta))?;
                debug!(path = %path.display(), "preallocated block file");
            }
            inner.write_file = Some((file_id, file));
        }
        match inner.write_file.as_mut() {
            Some((_, file)) => Ok(file),
            None => unreachable!("write file cached above"),
        }
    }
}

impl TrunkStorage for LocalStorage {
    fn trunk_size(&self) -> u32 {
        // Geometry is immutable after open; a poisoned lock cannot change it.
        self.inner
            .lock()
            .map(|g| g.meta.trunk_size)
            .unwrap_or_default()
    }

    fn trunk_count(&self) -> u32 {
        self.inner
            .lock()
            .map(|g| g.meta.trunk_count)
            .unwrap_or_default()
    }

    fn last_trunk_len(&self) -> u32 {
        self.inner
            .lock()
            .map(|g| g.meta.last_trunk_len)
            .unwrap_or_default()
    }

    fn read_trunk(&self, id: TrunkId, buf: &mut [u8]) -> Result<(), StorageError> {
        let inner = self.lock_inner()?;
        let meta = inner.meta;
        if id.as_u32() >= meta.trunk_count {
            return Err(StorageError::TrunkOutOfRange {
                id: id.as_u32(),
                count: meta.trunk_count,
            });
        }
        debug_assert_eq!(buf.len(), meta.trunk_size as usize, "whole-trunk buffer");

        let file = self.open_for_read(&meta, id.as_u32())?;
        drop(inner);

        let mut reader = &file;
        reader.seek(SeekFrom::Start(Self::in_file_offset(&meta, id.as_u32())))?;
        reader.read_exact(buf)?;
        Ok(())
    }

    fn write_trunk(&self, id: TrunkId, data: &[u8]) -> Result<(), StorageError> {
        if !self.writable {
            return Err(StorageError::ReadOnly);
        }
        let mut inner = self.lock_inner()?;
        let meta = inner.meta;
        if data.len() > meta.trunk_size as usize {
            return Err(StorageError::TooLong {
                len: data.len(),
                trunk_size: meta.trunk_size,
            });
        }
        // Only the newest trunk may be rewritten; only the next one appended.
        let extends = id.as_u32() == meta.trunk_count;
        if !extends && id.as_u32() + 1 != meta.trunk_count {
            return Err(StorageError::NonSequentialWrite {
                id: id.as_u32(),
                count: meta.trunk_count,
            });
        }

        let offset = Self::in_file_offset(&meta, id.as_u32());
        let file = self.open_for_write(&mut inner, id.as_u32())?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        if extends {
            inner.meta.trunk_count += 1;
        }
        inner.meta.last_trunk_len = data.len() as u32;
        trace!(trunk = id.as_u32(), len = data.len(), "wrote trunk");
        Ok(())
    }

    fn read_at(&self, id: TrunkId, offset: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        let inner = self.lock_inner()?;
        let meta = inner.meta;
        if id.as_u32() >= meta.trunk_count {
            return Err(StorageError::TrunkOutOfRange {
                id: id.as_u32(),
                count: meta.trunk_count,
            });
        }
        if u64::from(offset) + buf.len() as u64 > u64::from(meta.trunk_size) {
            return Err(StorageError::ReadBeyondTrunk {
                offset,
                len: buf.len(),
                trunk_size: meta.trunk_size,
            });
        }

        let file = self.open_for_read(&meta, id.as_u32())?;
        drop(inner);

        let mut reader = &file;
        reader.seek(SeekFrom::Start(
            Self::in_file_offset(&meta, id.as_u32()) + u64::from(offset),
        ))?;
        reader.read_exact(buf)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        if !self.writable {
            return Ok(());
        }
        let inner = self.lock_inner()?;
        if let Some((_, file)) = inner.write_file.as_ref() {
            file.sync_all()?;
        }
        inner.meta.store(&self.dir.join(META_FILE))?;
        trace!(
            trunks = inner.meta.trunk_count,
            last_trunk_len = inner.meta.last_trunk_len,
            "persisted stream meta"
        );
        Ok(())
    }
}
