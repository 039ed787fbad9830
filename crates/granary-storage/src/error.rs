//! Error types for trunk storage backends.

use std::io;
use std::path::PathBuf;

/// Errors that can occur while persisting or retrieving trunks.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// Filesystem I/O error.
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),

    /// A read referenced a trunk the stream does not have.
    #[error("trunk {id} out of range: stream has {count} trunks")]
    TrunkOutOfRange { id: u32, count: u32 },

    /// A write referenced a trunk that is neither the newest trunk nor the
    /// next sequential one.
    #[error("non-sequential write of trunk {id}: stream has {count} trunks")]
    NonSequentialWrite { id: u32, count: u32 },

    /// A write payload does not fit in one trunk.
    #[error("write of {len} bytes exceeds trunk size {trunk_size}")]
    TooLong { len: usize, trunk_size: u32 },

    /// A positioned read extends past the end of a trunk.
    #[error("read of {len} bytes at offset {offset} exceeds trunk size {trunk_size}")]
    ReadBeyondTrunk {
        offset: u32,
        len: usize,
        trunk_size: u32,
    },

    /// Trunk sizes must be a power of two.
    #[error("trunk size {0} is not a power of two")]
    NotPowerOfTwo(u32),

    /// Block files must hold at least one trunk.
    #[error("trunks per file must be at least 1")]
    ZeroTrunksPerFile,

    /// A stream was opened with a geometry that does not match its meta record.
    #[error(
        "stream geometry mismatch: meta has trunk size {meta_trunk_size} x {meta_trunks_per_file} \
         per file, requested {trunk_size} x {trunks_per_file}"
    )]
    GeometryMismatch {
        meta_trunk_size: u32,
        meta_trunks_per_file: u32,
        trunk_size: u32,
        trunks_per_file: u32,
    },

    /// Meta file has invalid magic bytes.
    #[error("invalid meta magic bytes")]
    BadMagic,

    /// Meta file has an unsupported format version.
    #[error("unsupported meta version: {0}")]
    UnsupportedVersion(u16),

    /// Meta file checksum mismatch - the record is corrupted.
    #[error("meta checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Meta file is smaller than the fixed record size.
    #[error("truncated meta file: expected {expected} bytes, got {actual}")]
    TruncatedMeta { expected: usize, actual: usize },

    /// Another process holds the stream's advisory lock.
    #[error("stream at {path} is locked by another process")]
    Locked { path: PathBuf },

    /// Read-only open of a stream that does not exist.
    #[error("no stream found at {path}")]
    NotFound { path: PathBuf },

    /// Write issued against a read-only stream.
    #[error("stream is read-only")]
    ReadOnly,
}
