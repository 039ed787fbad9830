//! Error types for datasets.

use granary_storage::StorageError;
use granary_trunk::TrunkError;

/// Errors that can occur while reading or writing a dataset.
#[derive(thiserror::Error, Debug)]
pub enum DatasetError {
    /// Write issued against a dataset opened read-only.
    #[error("dataset is open read-only")]
    NotWritable,

    /// A read or seek referenced a record the dataset does not have.
    #[error("record {index} out of range: dataset has {total} records")]
    OutOfRange { index: u64, total: u64 },

    /// An index entry disagrees with the data stream's geometry. The
    /// dataset is damaged on disk; the cursor is left untouched.
    #[error("index entry {index} is inconsistent with the data stream")]
    CorruptIndex { index: u64 },

    /// The underlying trunk controller failed.
    #[error("trunk controller error: {0}")]
    Trunk(#[from] TrunkError),

    /// The underlying storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
