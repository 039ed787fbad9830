//! # granary-storage: durable trunk streams
//!
//! A trunk stream is an append-only sequence of fixed-size trunks addressed
//! by [`TrunkId`]. The stream always contains at least one trunk; the
//! newest one is partially filled and grows as records are appended
//! upstream. This crate owns the persistence of those trunks and nothing
//! else: caching, write-back, and record framing live in `granary-trunk`
//! and `granary`.
//!
//! Two backends implement [`TrunkStorage`]:
//!
//! - [`LocalStorage`]: a directory of preallocated block files plus a
//!   checksummed meta record, with advisory locking for single-writer /
//!   multi-reader access
//! - [`MemStorage`]: an in-memory stream for tests and ephemeral data
//!
//! # Write contract
//!
//! Trunks are written whole and strictly in order. For a stream of
//! `trunk_count` trunks, a backend accepts exactly two writes:
//!
//! - `id == trunk_count - 1`: rewrite the newest trunk (it grew)
//! - `id == trunk_count`: append the next trunk
//!
//! Anything else is a [`StorageError::NonSequentialWrite`]. Counters move
//! in memory as writes land; [`TrunkStorage::flush`] makes them durable.

mod error;
mod local;
mod mem;
mod meta;

pub use error::StorageError;
pub use local::LocalStorage;
pub use mem::MemStorage;

use granary_types::TrunkId;

/// A durable, append-only stream of fixed-size trunks.
///
/// Implementations are shared across threads: the caller's append path and
/// its background io worker both hold the same backend.
pub trait TrunkStorage: Send + Sync {
    /// Size of every trunk in bytes. Constant for the stream's lifetime.
    fn trunk_size(&self) -> u32;

    /// Number of trunks in the stream, counting the newest partial one.
    /// Always at least 1.
    fn trunk_count(&self) -> u32;

    /// Bytes of the newest trunk known to be written, as of the last write
    /// or, after reopening, the last flush.
    fn last_trunk_len(&self) -> u32;

    /// Reads trunk `id` in full into `buf`, which must be `trunk_size`
    /// bytes.
    fn read_trunk(&self, id: TrunkId, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Writes trunk `id` from its start. `data` holds the whole trunk for
    /// historical trunks and a prefix of it for the newest trunk.
    fn write_trunk(&self, id: TrunkId, data: &[u8]) -> Result<(), StorageError>;

    /// Reads `buf.len()` bytes at `offset` within trunk `id`, without
    /// touching stream counters.
    fn read_at(&self, id: TrunkId, offset: u32, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Makes all completed writes and the stream counters durable.
    fn flush(&self) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests;
