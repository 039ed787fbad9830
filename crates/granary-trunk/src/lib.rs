//! # granary-trunk: trunk cache and write-back controller
//!
//! Sits between record framing (`granary`) and durable storage
//! (`granary-storage`). A [`TrunkController`] keeps the newest trunk of a
//! stream in memory for appends, hands full trunks to a background worker
//! for write-back, and pins recently linked trunks in a reference-counted
//! cache for readers.
//!
//! # Design
//!
//! - **Single writer**: one controller owns a stream's append path. Appends
//!   copy into the in-memory active trunk and return immediately.
//! - **Write-back**: a full trunk is queued for the io worker and replaced
//!   by a fresh one; the append path never waits for the disk.
//! - **Read-ahead**: linking a historical trunk stages the one after it in
//!   a one-slot prefetch buffer, so sequential scans overlap io with
//!   processing.
//! - **Pinning**: [`TrunkView`]s count references; a trunk stays cached
//!   exactly as long as something points at it.
//!
//! Failures on the worker thread are remembered and returned from the next
//! [`append`](TrunkController::append) or [`flush`](TrunkController::flush);
//! a failed controller stays failed until reopened.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use granary_storage::MemStorage;
//! use granary_trunk::TrunkController;
//!
//! let storage = Arc::new(MemStorage::new(1 << 25)?);
//! let mut controller = TrunkController::new(storage)?;
//! let position = controller.append(b"hello")?;
//! controller.flush()?;
//!
//! let view = controller.link(position.trunk())?;
//! let bytes = view.bytes()?;
//! assert_eq!(&bytes[..5], b"hello");
//! ```

mod cache;
mod controller;
mod error;
mod shared;
mod view;
mod worker;

pub use controller::{TrunkController, DEFAULT_IO_QUEUE};
pub use error::{IoOp, TrunkError};
pub use view::{TrunkBytes, TrunkView};
