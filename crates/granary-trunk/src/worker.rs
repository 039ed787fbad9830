//! The background io worker.
//!
//! One worker thread per controller drains a bounded queue of write-back
//! and prefetch requests. There is exactly one worker and it handles
//! requests strictly in order: a prefetch enqueued after a rotation's write
//! can rely on that write having completed before the read runs.

use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

use granary_storage::StorageError;
use granary_types::TrunkId;
use tracing::error;

use crate::cache::Slot;
use crate::error::IoOp;
use crate::shared::Shared;

/// A unit of background io.
pub(crate) enum IoRequest {
    /// Write the first `len` bytes of a rotated trunk to the backend. The
    /// request owns one cache reference, released on completion.
    Write {
        id: TrunkId,
        slot: Arc<Slot>,
        len: usize,
    },
    /// Stage a historical trunk in the prefetch slot.
    Prefetch { id: TrunkId },
}

/// Drains the request queue until stopped or the controller goes away.
pub(crate) fn run(shared: Arc<Shared>, rx: Receiver<IoRequest>) {
    while !shared.stop.load(Ordering::Acquire) {
        match rx.try_recv() {
            Ok(request) => {
                handle(&shared, request);
                shared.inflight.fetch_sub(1, Ordering::AcqRel);
            }
            Err(TryRecvError::Empty) => thread::yield_now(),
            Err(TryRecvError::Disconnected) => break,
        }
    }
}

fn handle(shared: &Shared, request: IoRequest) {
    match request {
        IoRequest::Write { id, slot, len } => {
            let result = match slot.buf.read() {
                Ok(buf) => shared.storage.write_trunk(id, &buf[..len]),
                Err(_) => Err(StorageError::Io(std::io::Error::other(
                    "trunk buffer lock poisoned",
                ))),
            };
            if let Err(err) = result {
                error!(trunk = %id, %err, "background trunk write failed");
                shared.fail(IoOp::Write, id, err.to_string());
            }
            shared.cache.release(id);
        }
        IoRequest::Prefetch { id } => prefetch(shared, id),
    }
}

/// Reads trunk `id` into the staging buffer. The prefetch lock is not held
/// across the read itself; the buffer is taken out and put back instead.
fn prefetch(shared: &Shared, id: TrunkId) {
    let mut buf = {
        let Ok(mut state) = shared.prefetch.lock() else {
            return;
        };
        if state.wanted != Some(id.as_u32()) || state.ready {
            // Superseded by a newer request.
            return;
        }
        match state.buf.take() {
            Some(buf) => buf,
            None => {
                // The staging buffer is gone; let waiters fall back to a
                // synchronous read instead of spinning on this slot.
                state.wanted = None;
                return;
            }
        }
    };

    let result = shared.storage.read_trunk(id, &mut buf);

    let Ok(mut state) = shared.prefetch.lock() else {
        return;
    };
    state.buf = Some(buf);
    match result {
        // Publish only if nobody re-targeted the slot during the read.
        Ok(()) => state.ready = state.wanted == Some(id.as_u32()),
        Err(err) => {
            error!(trunk = %id, %err, "trunk prefetch failed");
            state.wanted = None;
            shared.fail(IoOp::Prefetch, id, err.to_string());
        }
    }
}
