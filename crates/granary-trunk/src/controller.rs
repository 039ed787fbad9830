//! Single-writer append path with asynchronous write-back.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};

use granary_storage::TrunkStorage;
use granary_types::{Position, TrunkId};
use tracing::{debug, error, warn};

use crate::cache::{Slot, TrunkCache};
use crate::error::{IoOp, TrunkError};
use crate::shared::{PrefetchState, Shared};
use crate::view::TrunkView;
use crate::worker::{self, IoRequest};

/// Default depth of the background io queue.
pub const DEFAULT_IO_QUEUE: usize = 16;

/// Caches trunks of one stream and appends to its newest trunk.
///
/// The controller owns the stream's write path: records are appended to an
/// in-memory active trunk, full trunks are handed to a background worker
/// for write-back, and linked historical trunks are staged one ahead of a
/// sequential scan. Reads go through [`TrunkView`]s, which pin trunks in
/// the cache while they are in use.
///
/// A controller is single-writer. Share the underlying storage, not the
/// controller.
pub struct TrunkController {
    shared: Arc<Shared>,
    tx: SyncSender<IoRequest>,
    worker: Option<JoinHandle<()>>,
    trunk_size: u32,
    /// Trunks in the stream, counting the active one. Runs ahead of the
    /// backend's count while rotated trunks are still queued.
    trunk_count: u32,
    /// Bytes appended to the active trunk so far.
    active_len: u32,
    /// The controller's own pin on the newest trunk. `None` only during
    /// construction and teardown.
    active: Option<TrunkView>,
    /// Set by append, cleared by flush.
    dirty: bool,
}

impl TrunkController {
    /// Opens a controller over `storage` with the default io queue depth.
    pub fn new(storage: Arc<dyn TrunkStorage>) -> Result<Self, TrunkError> {
        Self::with_queue_size(storage, DEFAULT_IO_QUEUE)
    }

    /// Opens a controller with an io queue of `queue_size` requests. Appends
    /// block on a full queue until the worker catches up.
    pub fn with_queue_size(
        storage: Arc<dyn TrunkStorage>,
        queue_size: usize,
    ) -> Result<Self, TrunkError> {
        let trunk_size = storage.trunk_size();
        let trunk_count = storage.trunk_count();
        let active_len = storage.last_trunk_len();
        debug_assert!(trunk_count >= 1, "a stream always has at least one trunk");

        let shared = Arc::new(Shared {
            storage,
            cache: TrunkCache::new(),
            prefetch: Mutex::new(PrefetchState::new(trunk_size)),
            inflight: AtomicUsize::new(0),
            failure: Mutex::new(None),
            stop: AtomicBool::new(false),
        });
        let (tx, rx) = mpsc::sync_channel(queue_size);

        let mut controller = Self {
            shared,
            tx,
            worker: None,
            trunk_size,
            trunk_count,
            active_len,
            active: None,
            dirty: false,
        };

        // Link the newest trunk before the worker exists; the initial link
        // never prefetches, so no request can be queued yet.
        let active = controller.link(TrunkId::new(trunk_count - 1))?;
        controller.active = Some(active);

        let worker_shared = Arc::clone(&controller.shared);
        let handle = thread::Builder::new()
            .name("granary-io".into())
            .spawn(move || worker::run(worker_shared, rx))
            .map_err(TrunkError::WorkerSpawn)?;
        controller.worker = Some(handle);

        debug!(
            trunks = trunk_count,
            active_len, "opened trunk controller"
        );
        Ok(controller)
    }

    /// Size of every trunk in this stream, in bytes.
    #[must_use]
    pub fn trunk_size(&self) -> u32 {
        self.trunk_size
    }

    /// Number of trunks, counting the active one.
    #[must_use]
    pub fn trunk_count(&self) -> u32 {
        self.trunk_count
    }

    /// Bytes appended to the active trunk so far.
    #[must_use]
    pub fn active_len(&self) -> u32 {
        self.active_len
    }

    /// Appends a record to the active trunk and returns the position of its
    /// end.
    ///
    /// A record never spans trunks: if it does not fit in the active trunk,
    /// the trunk is rotated out first. When a record fills the trunk
    /// exactly, the returned offset equals the trunk size and the next
    /// append goes to a fresh trunk.
    ///
    /// # Errors
    ///
    /// - [`TrunkError::TooLarge`] if the record exceeds the trunk size
    /// - [`TrunkError::Background`] if an earlier queued write failed; the
    ///   controller keeps returning it until reopened
    pub fn append(&mut self, data: &[u8]) -> Result<Position, TrunkError> {
        self.raise_background()?;
        if data.len() > self.trunk_size as usize {
            return Err(TrunkError::TooLarge {
                len: data.len(),
                trunk_size: self.trunk_size,
            });
        }
        if data.len() + self.active_len as usize > self.trunk_size as usize {
            self.rotate()?;
        }

        let active = self
            .active
            .as_ref()
            .ok_or_else(|| TrunkError::CorruptState("no active trunk".into()))?;
        {
            let mut buf = match active.slot().buf.try_write() {
                Ok(buf) => buf,
                Err(TryLockError::WouldBlock) => {
                    return Err(TrunkError::CorruptState(
                        "active trunk is borrowed during append".into(),
                    ))
                }
                Err(TryLockError::Poisoned(_)) => {
                    return Err(TrunkError::CorruptState(
                        "trunk buffer lock poisoned".into(),
                    ))
                }
            };
            let start = self.active_len as usize;
            buf[start..start + data.len()].copy_from_slice(data);
        }

        self.active_len += data.len() as u32;
        self.dirty = true;
        let position = Position::new(TrunkId::new(self.trunk_count - 1), self.active_len);

        // An exactly full trunk rotates now so the next append starts clean.
        if self.active_len == self.trunk_size {
            self.rotate()?;
        }
        Ok(position)
    }

    /// Returns a pinned view of trunk `id`, loading it from the backend if
    /// it is not cached.
    ///
    /// Linking a historical trunk schedules a prefetch of the one after it,
    /// so a sequential scan mostly finds its next trunk already staged.
    ///
    /// # Errors
    ///
    /// Returns [`TrunkError::OutOfRange`] if the stream has no trunk `id`.
    pub fn link(&self, id: TrunkId) -> Result<TrunkView, TrunkError> {
        if id.as_u32() >= self.trunk_count {
            return Err(TrunkError::OutOfRange {
                id: id.as_u32(),
                count: self.trunk_count,
            });
        }
        if let Some(slot) = self.shared.cache.acquire(id) {
            return Ok(TrunkView::new(id, slot, Arc::clone(&self.shared)));
        }

        let buf = if id.as_u32() + 1 == self.trunk_count {
            // The newest trunk is only missing right after open; rebuild it
            // from the backend up to its known length.
            let mut buf = vec![0u8; self.trunk_size as usize].into_boxed_slice();
            if self.active_len > 0 {
                self.shared
                    .storage
                    .read_at(id, 0, &mut buf[..self.active_len as usize])
                    .map_err(|source| TrunkError::Backend {
                        op: IoOp::Read,
                        id: id.as_u32(),
                        source,
                    })?;
            }
            buf
        } else {
            self.fetch_historical(id)?
        };

        let slot = Slot::from_buf(buf);
        self.shared.cache.insert(id, Arc::clone(&slot));

        // Keep one trunk of read-ahead in front of a sequential scan.
        let next = id.next();
        if next.as_u32() + 1 < self.trunk_count {
            self.prepare(next)?;
        }

        Ok(TrunkView::new(id, slot, Arc::clone(&self.shared)))
    }

    /// Points `view` at trunk `id`, releasing the trunk it held before.
    /// A no-op when the view already points at `id`.
    pub fn relink(&self, view: &mut TrunkView, id: TrunkId) -> Result<(), TrunkError> {
        if view.id() == id {
            return Ok(());
        }
        *view = self.link(id)?;
        Ok(())
    }

    /// Reads `buf.len()` bytes at `position` straight from the backend,
    /// bypassing the cache. Appends since the last flush may not be visible
    /// to it; flush first when that matters.
    pub fn pread(&self, position: Position, buf: &mut [u8]) -> Result<(), TrunkError> {
        self.shared
            .storage
            .read_at(position.trunk(), position.offset(), buf)
            .map_err(|source| TrunkError::Backend {
                op: IoOp::Read,
                id: position.trunk().as_u32(),
                source,
            })
    }

    /// Drains queued writes, writes the active trunk if it grew, and makes
    /// the stream durable. The backend flush runs even when nothing is
    /// dirty.
    pub fn flush(&mut self) -> Result<(), TrunkError> {
        self.raise_background()?;
        // Wait for queued writes and prefetches to complete, then check
        // whether any of them failed.
        while self.shared.inflight.load(Ordering::Acquire) > 0 {
            thread::yield_now();
        }
        self.raise_background()?;

        // Rewriting the active trunk is only needed when something was
        // appended since the last flush.
        if self.dirty {
            let active = self
                .active
                .as_ref()
                .ok_or_else(|| TrunkError::CorruptState("no active trunk".into()))?;
            let id = active.id();
            {
                let buf = active
                    .slot()
                    .buf
                    .read()
                    .map_err(|_| TrunkError::CorruptState("trunk buffer lock poisoned".into()))?;
                self.shared
                    .storage
                    .write_trunk(id, &buf[..self.active_len as usize])
                    .map_err(|source| TrunkError::Backend {
                        op: IoOp::Write,
                        id: id.as_u32(),
                        source,
                    })?;
            }
            self.dirty = false;
        }
        self.shared
            .storage
            .flush()
            .map_err(|source| TrunkError::Backend {
                op: IoOp::Flush,
                id: self.trunk_count - 1,
                source,
            })?;
        debug!(
            trunk = self.trunk_count - 1,
            len = self.active_len,
            "flushed trunk stream"
        );
        Ok(())
    }

    /// Hands the active trunk to the worker and starts a fresh one.
    fn rotate(&mut self) -> Result<(), TrunkError> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| TrunkError::CorruptState("no active trunk".into()))?;
        let id = active.id();
        debug_assert_eq!(
            id.as_u32(),
            self.trunk_count - 1,
            "active view must point at the newest trunk"
        );

        // The queued write holds its own cache reference so the rotated
        // trunk stays readable until the write completes.
        self.shared.cache.retain(id);
        self.shared.inflight.fetch_add(1, Ordering::AcqRel);
        let request = IoRequest::Write {
            id,
            slot: Arc::clone(active.slot()),
            len: self.trunk_size as usize,
        };
        if self.tx.send(request).is_err() {
            self.shared.inflight.fetch_sub(1, Ordering::AcqRel);
            self.shared.cache.release(id);
            return Err(TrunkError::CorruptState("io worker disconnected".into()));
        }
        debug!(trunk = %id, len = self.active_len, "rotated active trunk");

        self.trunk_count += 1;
        self.active_len = 0;
        let next = TrunkId::new(self.trunk_count - 1);
        let slot = Slot::zeroed(self.trunk_size);
        self.shared.cache.insert(next, Arc::clone(&slot));
        self.active = Some(TrunkView::new(next, slot, Arc::clone(&self.shared)));
        Ok(())
    }

    /// Loads a historical trunk, consuming a staged prefetch when one is
    /// pending for it.
    fn fetch_historical(&self, id: TrunkId) -> Result<Box<[u8]>, TrunkError> {
        loop {
            {
                let mut state = self
                    .shared
                    .prefetch
                    .lock()
                    .map_err(|_| TrunkError::CorruptState("prefetch lock poisoned".into()))?;
                if state.wanted == Some(id.as_u32()) {
                    if !state.ready {
                        // Staging is in flight; wait for the worker. A
                        // failed read clears `wanted`, so this cannot spin
                        // forever.
                        drop(state);
                        thread::yield_now();
                        continue;
                    }
                    if let Some(staged) = state.buf.as_deref() {
                        let mut buf =
                            vec![0u8; self.trunk_size as usize].into_boxed_slice();
                        buf.copy_from_slice(staged);
                        state.wanted = None;
                        state.ready = false;
                        return Ok(buf);
                    }
                    // Ready without a buffer cannot happen; fall back to a
                    // synchronous read.
                    state.wanted = None;
                    state.ready = false;
                }
            }

            let mut buf = vec![0u8; self.trunk_size as usize].into_boxed_slice();
            self.shared
                .storage
                .read_trunk(id, &mut buf)
                .map_err(|source| TrunkError::Backend {
                    op: IoOp::Read,
                    id: id.as_u32(),
                    source,
                })?;
            return Ok(buf);
        }
    }

    /// Asks the worker to stage trunk `id` in the prefetch slot.
    fn prepare(&self, id: TrunkId) -> Result<(), TrunkError> {
        {
            let mut state = self
                .shared
                .prefetch
                .lock()
                .map_err(|_| TrunkError::CorruptState("prefetch lock poisoned".into()))?;
            if state.wanted == Some(id.as_u32()) {
                // Already staged or in flight.
                return Ok(());
            }
            state.wanted = Some(id.as_u32());
            state.ready = false;
        }
        self.shared.inflight.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(IoRequest::Prefetch { id }).is_err() {
            self.shared.inflight.fetch_sub(1, Ordering::AcqRel);
            // Clear the request so no reader waits for a prefetch that will
            // never run.
            if let Ok(mut state) = self.shared.prefetch.lock() {
                if state.wanted == Some(id.as_u32()) {
                    state.wanted = None;
                    state.ready = false;
                }
            }
            return Err(TrunkError::CorruptState("io worker disconnected".into()));
        }
        Ok(())
    }

    /// Surfaces the first failure the worker hit, if any.
    fn raise_background(&self) -> Result<(), TrunkError> {
        let failure = self
            .shared
            .failure
            .lock()
            .map_err(|_| TrunkError::CorruptState("failure lock poisoned".into()))?;
        match failure.as_ref() {
            Some(f) => Err(TrunkError::Background {
                op: f.op,
                id: f.trunk_id,
                detail: f.detail.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Cache reference count for `id`, if cached.
    #[cfg(test)]
    pub(crate) fn cache_refs(&self, id: TrunkId) -> Option<usize> {
        self.shared.cache.refs(id)
    }

    fn shutdown(&mut self) {
        if self.dirty {
            if let Err(err) = self.flush() {
                warn!(%err, "flush on close failed; appends since the last flush may be lost");
            }
        }
        // Drop our pin on the active trunk before the leak check.
        self.active = None;
        for (id, refs) in self.shared.cache.leaked() {
            warn!(trunk = id, refs, "trunk still referenced at close");
        }
        self.shared.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("io worker panicked");
            }
        }
    }
}

impl Drop for TrunkController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for TrunkController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrunkController")
            .field("trunk_size", &self.trunk_size)
            .field("trunk_count", &self.trunk_count)
            .field("active_len", &self.active_len)
            .field("dirty", &self.dirty)
            .finish()
    }
}
