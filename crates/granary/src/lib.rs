//! # granary: an append-only record store on trunk-chunked streams
//!
//! A [`Dataset`] stores variable-length records in order and reads them
//! back sequentially or by index. On disk it is two trunk streams in
//! sibling directories:
//!
//! ```text
//! root/
//!   index/    one 8-byte Position per record: where the record ends
//!   data/     raw record bytes, packed into fixed-size trunks
//! ```
//!
//! Each stream runs through its own [`TrunkController`], which caches
//! trunks in memory, appends to a single active trunk, and hands full
//! trunks to a background thread for write-back:
//!
//! ```text
//! Dataset ──▶ TrunkController (index) ──▶ TrunkStorage  root/index
//!        └──▶ TrunkController (data)  ──▶ TrunkStorage  root/data
//! ```
//!
//! ## Design
//!
//! - **Records never span trunks.** A record that does not fit in the
//!   active data trunk rotates to a fresh one, so every record is a
//!   single contiguous slice and sequential reads borrow straight from
//!   the trunk cache.
//! - **One index entry per record.** Record `n` starts where `n - 1`
//!   ended, so the index stores only end positions. Seeks cost at most
//!   two entry lookups.
//! - **Write-back, explicit durability.** Appends go to memory and are
//!   immediately readable through the writing dataset; `flush` makes
//!   them durable. Records flushed before a crash survive it; records
//!   written after the last flush do not.
//! - **Single writer, many readers.** Write mode takes an exclusive file
//!   lock per stream; read mode shares it.
//!
//! ## Example
//!
//! ```ignore
//! use granary::{Dataset, Mode, Whence};
//!
//! let mut dataset = Dataset::open("/var/lib/granary/events", Mode::Write)?;
//! dataset.write(b"first")?;
//! dataset.write(b"second")?;
//! dataset.flush()?;
//!
//! dataset.seek(Whence::Start(0))?;
//! while dataset.tell() < dataset.size() {
//!     let record = dataset.read()?;
//!     println!("{} bytes", record.len());
//! }
//! ```

mod config;
mod dataset;
mod error;
mod record;

pub use config::DatasetConfig;
pub use dataset::{Dataset, Mode, Whence};
pub use error::DatasetError;
pub use record::Record;

pub use granary_storage::{LocalStorage, MemStorage, StorageError, TrunkStorage};
pub use granary_trunk::{TrunkController, TrunkError, TrunkView};
pub use granary_types::{Position, TrunkId};
