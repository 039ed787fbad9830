//! The persisted meta record describing one trunk stream.
//!
//! Every local stream directory carries a small `meta` file that is the
//! recovery root for the stream: it records how many trunks exist, how full
//! the newest one is, and the stream's geometry.
//!
//! # File Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  Offset  │  Size  │  Description                 │
//! ├──────────────────────────────────────────────────┤
//! │  0       │  4     │  Magic bytes: "GRNY"         │
//! │  4       │  2     │  Version: 1 (u16 LE)         │
//! │  6       │  2     │  Reserved (zero padding)     │
//! │  8       │  4     │  Trunk count (u32 LE)        │
//! │  12      │  4     │  Last trunk length (u32 LE)  │
//! │  16      │  4     │  Trunk size (u32 LE)         │
//! │  20      │  4     │  Trunks per file (u32 LE)    │
//! │  24      │  4     │  CRC32 of bytes 0..24        │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! The record is rewritten on every flush via a temp file and an atomic
//! rename, so a crash mid-flush leaves the previous record intact.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};

use crate::StorageError;

// ============================================================================
// File Format Constants
// ============================================================================

/// Magic bytes identifying a granary stream meta file.
const MAGIC: &[u8; 4] = b"GRNY";

/// Current meta record format version.
const VERSION: u16 = 1;

/// Reserved bytes for future use.
const RESERVED: [u8; 2] = [0u8; 2];

/// Fixed size of the encoded record: header(8) + fields(16) + crc(4).
pub(crate) const META_SIZE: usize = 28;

/// Persistent description of one trunk stream.
///
/// `trunk_count` includes the newest, possibly partial trunk and is therefore
/// always at least 1: an empty stream is one empty trunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMeta {
    /// Number of trunks in the stream, including the partial newest one.
    pub trunk_count: u32,
    /// Byte length of the newest trunk's contents.
    pub last_trunk_len: u32,
    /// Fixed trunk size in bytes (power of two).
    pub trunk_size: u32,
    /// How many trunks each block file groups.
    pub trunks_per_file: u32,
}

impl StreamMeta {
    /// Creates the meta record for a brand-new stream: one empty trunk.
    pub fn new(trunk_size: u32, trunks_per_file: u32) -> Self {
        Self {
            trunk_count: 1,
            last_trunk_len: 0,
            trunk_size,
            trunks_per_file,
        }
    }

    /// Encodes the record, checksum included.
    pub fn encode(&self) -> [u8; META_SIZE] {
        let mut buf = BytesMut::with_capacity(META_SIZE);
        buf.put_slice(MAGIC);
        buf.put_u16_le(VERSION);
        buf.put_slice(&RESERVED);
        buf.put_u32_le(self.trunk_count);
        buf.put_u32_le(self.last_trunk_len);
        buf.put_u32_le(self.trunk_size);
        buf.put_u32_le(self.trunks_per_file);

        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);

        debug_assert_eq!(buf.len(), META_SIZE, "encoded meta size mismatch");
        let mut out = [0u8; META_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Decodes and validates a record.
    ///
    /// # Errors
    ///
    /// - [`StorageError::TruncatedMeta`] if fewer than [`META_SIZE`] bytes
    /// - [`StorageError::BadMagic`] if the magic bytes don't match
    /// - [`StorageError::UnsupportedVersion`] for unknown format versions
    /// - [`StorageError::ChecksumMismatch`] if the CRC32 doesn't verify
    pub fn decode(data: &[u8]) -> Result<Self, StorageError> {
        if data.len() < META_SIZE {
            return Err(StorageError::TruncatedMeta {
                expected: META_SIZE,
                actual: data.len(),
            });
        }

        // Verify the CRC before trusting any field.
        let crc_start = META_SIZE - 4;
        let mut crc_bytes = &data[crc_start..META_SIZE];
        let stored_crc = crc_bytes.get_u32_le();
        let computed_crc = crc32fast::hash(&data[..crc_start]);
        if stored_crc != computed_crc {
            return Err(StorageError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let mut cur = &data[..crc_start];
        if &cur[..MAGIC.len()] != MAGIC {
            return Err(StorageError::BadMagic);
        }
        cur.advance(MAGIC.len());

        let version = cur.get_u16_le();
        if version != VERSION {
            return Err(StorageError::UnsupportedVersion(version));
        }
        cur.advance(RESERVED.len());

        Ok(Self {
            trunk_count: cur.get_u32_le(),
            last_trunk_len: cur.get_u32_le(),
            trunk_size: cur.get_u32_le(),
            trunks_per_file: cur.get_u32_le(),
        })
    }

    /// Loads the record from `path`.
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let data = fs::read(path)?;
        Self::decode(&data)
    }

    /// Persists the record to `path` atomically: write a temp file, sync it,
    /// rename it over the old record.
    pub fn store(&self, path: &Path) -> Result<(), StorageError> {
        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&self.encode())?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
