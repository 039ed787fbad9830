//! Error types for the trunk controller.

use std::fmt;

use granary_storage::StorageError;

/// The backend operation a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
    Flush,
    Prefetch,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IoOp::Read => "read",
            IoOp::Write => "write",
            IoOp::Flush => "flush",
            IoOp::Prefetch => "prefetch",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while appending to or reading from a trunk stream.
#[derive(thiserror::Error, Debug)]
pub enum TrunkError {
    /// A record is larger than one trunk and can never be stored.
    #[error("record of {len} bytes exceeds trunk size {trunk_size}")]
    TooLarge { len: usize, trunk_size: u32 },

    /// A link referenced a trunk the stream does not have.
    #[error("trunk {id} out of range: stream has {count} trunks")]
    OutOfRange { id: u32, count: u32 },

    /// A synchronous backend operation failed.
    #[error("trunk {op} failed for trunk {id}")]
    Backend {
        op: IoOp,
        id: u32,
        #[source]
        source: StorageError,
    },

    /// The io worker hit an error after the triggering call had already
    /// returned. Raised on the next append or flush; the controller stays
    /// failed until it is reopened.
    #[error("background {op} of trunk {id} failed: {detail}")]
    Background {
        op: IoOp,
        id: u32,
        detail: String,
    },

    /// The io worker thread could not be started.
    #[error("failed to start io worker")]
    WorkerSpawn(#[source] std::io::Error),

    /// An internal invariant no longer holds.
    #[error("corrupt controller state: {0}")]
    CorruptState(String),
}
