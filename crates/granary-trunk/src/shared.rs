//! State shared between the controller, its views, and the io worker.

use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{Arc, Mutex};

use granary_storage::TrunkStorage;
use granary_types::TrunkId;

use crate::cache::TrunkCache;
use crate::error::IoOp;

/// Staging state for the one-slot read-ahead.
pub(crate) struct PrefetchState {
    /// Trunk the worker was asked to stage, if any.
    pub(crate) wanted: Option<u32>,
    /// True once `buf` holds the wanted trunk in full.
    pub(crate) ready: bool,
    /// The staging buffer, allocated once per controller. The worker takes
    /// it while a read is in flight and puts it back before `ready` can be
    /// set, so `ready` implies the buffer is present.
    pub(crate) buf: Option<Box<[u8]>>,
}

impl PrefetchState {
    pub(crate) fn new(trunk_size: u32) -> Self {
        Self {
            wanted: None,
            ready: false,
            buf: Some(vec![0u8; trunk_size as usize].into_boxed_slice()),
        }
    }
}

/// A failure the io worker hit after the triggering call had returned.
pub(crate) struct BackgroundFailure {
    pub(crate) op: IoOp,
    pub(crate) trunk_id: u32,
    pub(crate) detail: String,
}

/// Everything the controller, its views, and the worker thread share.
pub(crate) struct Shared {
    pub(crate) storage: Arc<dyn TrunkStorage>,
    pub(crate) cache: TrunkCache,
    pub(crate) prefetch: Mutex<PrefetchState>,
    /// Requests handed to the worker but not yet completed.
    pub(crate) inflight: AtomicUsize,
    /// First failure the worker hit; never cleared.
    pub(crate) failure: Mutex<Option<BackgroundFailure>>,
    pub(crate) stop: AtomicBool,
}

impl Shared {
    /// Records a worker failure. The first failure is kept; later ones are
    /// usually downstream of it.
    pub(crate) fn fail(&self, op: IoOp, id: TrunkId, detail: String) {
        let Ok(mut failure) = self.failure.lock() else {
            return;
        };
        if failure.is_none() {
            *failure = Some(BackgroundFailure {
                op,
                trunk_id: id.as_u32(),
                detail,
            });
        }
    }
}
