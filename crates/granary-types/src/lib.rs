//! # granary-types: Core types for granary
//!
//! This crate contains the shared primitives used across the granary system:
//! - Trunk identity ([`TrunkId`])
//! - Packed stream positions ([`Position`])
//!
//! Both are cheap `Copy` values. `Position` is an external format: it is the
//! 8-byte little-endian value stored per record in a dataset's index stream,
//! so its bit layout must never change.

use std::fmt::Display;

// ============================================================================
// TrunkId - Identity of one fixed-size chunk within a stream
// ============================================================================

/// Identifier of a trunk within a stream.
///
/// Trunk ids are assigned sequentially starting at 0. The trunk with the
/// highest id is the "active" trunk: the only one still accepting appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TrunkId(u32);

impl TrunkId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns the id as a `usize`, for indexing buffers and tables.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    /// Returns the id of the trunk that follows this one.
    #[must_use]
    pub fn next(&self) -> TrunkId {
        TrunkId(self.0 + 1)
    }
}

impl Display for TrunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TrunkId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<TrunkId> for u32 {
    fn from(id: TrunkId) -> Self {
        id.0
    }
}

// ============================================================================
// Position - Packed (trunk id, in-trunk offset) pointer
// ============================================================================

/// A packed pointer into a trunked byte stream.
///
/// The trunk id occupies the upper 32 bits and the in-trunk byte offset the
/// lower 32:
///
/// ```text
/// ┌────────────────┬────────────────┐
/// │ trunk id (u32) │  offset (u32)  │
/// │   bits 63-32   │   bits 31-0    │
/// └────────────────┴────────────────┘
/// ```
///
/// Every append produces one, and the dataset layer stores one per record in
/// its index stream (as [`Position::SIZE`] little-endian bytes), pointing at
/// the byte immediately after the record.
///
/// The offset may momentarily equal the trunk size: an append that exactly
/// fills a trunk reports the trunk's full length as its end offset, and the
/// stream rotates to a fresh trunk immediately afterwards.
///
/// # Example
///
/// ```
/// use granary_types::{Position, TrunkId};
///
/// let pos = Position::new(TrunkId::new(3), 128);
/// assert_eq!(pos.trunk(), TrunkId::new(3));
/// assert_eq!(pos.offset(), 128);
/// assert_eq!(Position::from_le_bytes(pos.to_le_bytes()), pos);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position(u64);

impl Position {
    /// Size of the on-disk encoding in bytes.
    pub const SIZE: usize = 8;

    pub fn new(trunk: TrunkId, offset: u32) -> Self {
        Self((u64::from(trunk.as_u32()) << 32) | u64::from(offset))
    }

    /// Returns the trunk this position points into.
    #[must_use]
    pub fn trunk(&self) -> TrunkId {
        TrunkId::new((self.0 >> 32) as u32)
    }

    /// Returns the byte offset within the trunk.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.0 as u32
    }

    /// Returns the packed 64-bit value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Encodes the position as it is stored in an index stream.
    #[must_use]
    pub fn to_le_bytes(self) -> [u8; Self::SIZE] {
        self.0.to_le_bytes()
    }

    /// Decodes a position from its index-stream encoding.
    #[must_use]
    pub fn from_le_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.trunk(), self.offset())
    }
}

impl From<u64> for Position {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Position> for u64 {
    fn from(pos: Position) -> Self {
        pos.0
    }
}

#[cfg(test)]
mod tests;
