//! Records returned by dataset reads.

use std::fmt;
use std::ops::Deref;

use granary_trunk::TrunkBytes;

/// One record's bytes.
///
/// Usually a zero-copy slice of a cached trunk, pinned for the record's
/// lifetime; reads that bypass the cache return an owned copy instead.
/// Either way it derefs to `&[u8]`.
pub struct Record<'a> {
    inner: RecordInner<'a>,
}

enum RecordInner<'a> {
    Cached {
        bytes: TrunkBytes<'a>,
        start: usize,
        end: usize,
    },
    Owned(Vec<u8>),
}

impl<'a> Record<'a> {
    /// Bounds are validated against the trunk before construction.
    pub(crate) fn cached(bytes: TrunkBytes<'a>, start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= bytes.len());
        Self {
            inner: RecordInner::Cached { bytes, start, end },
        }
    }

    pub(crate) fn owned(buf: Vec<u8>) -> Self {
        Self {
            inner: RecordInner::Owned(buf),
        }
    }

    /// The record's bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self
    }

    /// Copies the record out of the trunk it lives in.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// True when the record was copied out instead of borrowed from the
    /// trunk cache.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        matches!(self.inner, RecordInner::Owned(_))
    }
}

impl Deref for Record<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.inner {
            RecordInner::Cached { bytes, start, end } => &bytes[*start..*end],
            RecordInner::Owned(buf) => buf,
        }
    }
}

impl AsRef<[u8]> for Record<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl fmt::Debug for Record<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("len", &self.len())
            .field("owned", &self.is_owned())
            .finish()
    }
}
