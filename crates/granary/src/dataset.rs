//! Record-indexed datasets over a pair of trunk streams.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use granary_storage::{LocalStorage, TrunkStorage};
use granary_trunk::{TrunkController, TrunkView};
use granary_types::{Position, TrunkId};
use tracing::{debug, info};

use crate::config::{DatasetConfig, INDEX_TRUNKS_PER_FILE, INDEX_TRUNK_SIZE};
use crate::error::DatasetError;
use crate::record::Record;

/// Subdirectory of a dataset root holding the index stream.
const INDEX_DIR: &str = "index";

/// Subdirectory of a dataset root holding the data stream.
const DATA_DIR: &str = "data";

/// How a dataset is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Sequential and positioned reads only. Shares the dataset with other
    /// readers.
    Read,
    /// Appends plus reads. Takes the dataset's exclusive lock.
    Write,
}

/// Where a seek points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute record index from the start.
    Start(u64),
    /// Records forward or backward from the cursor.
    Current(i64),
    /// Records back from the end; `End(0)` is one past the last record.
    End(u64),
}

/// An append-only sequence of records with sequential and random reads.
///
/// A dataset is two trunk streams. The data stream holds raw record bytes,
/// packed back to back within a trunk; a record never spans trunks. The
/// index stream holds one 8-byte [`Position`] per record: the trunk and
/// end offset of that record's bytes. Record `n` starts where record
/// `n - 1` ended, or at offset zero when it opens a new trunk, so one
/// entry per record is enough to find both ends.
///
/// Sequential reads walk both streams through pinned trunk views and cost
/// no backend io while they stay inside a trunk. Seeks are two index-entry
/// lookups. Writes append to both streams and return the new record's
/// index.
pub struct Dataset {
    // Declared before the controllers: views must drop first so controller
    // shutdown finds no pinned trunks.
    index_view: TrunkView,
    data_view: TrunkView,
    index: TrunkController,
    data: TrunkController,
    mode: Mode,
    /// Record the next sequential read returns.
    tell: u64,
    /// Records in the dataset.
    total: u64,
    /// Where the record at `tell` starts inside the current data trunk.
    data_offset: u32,
    /// log2 of index entries per index trunk.
    entry_shift: u32,
    entry_mask: u64,
}

impl Dataset {
    /// Opens the dataset under `root` with the default configuration.
    pub fn open(root: impl AsRef<Path>, mode: Mode) -> Result<Self, DatasetError> {
        Self::open_with(root, mode, DatasetConfig::default())
    }

    /// Opens the dataset under `root`.
    ///
    /// A dataset lives in two sibling directories, `root/index` and
    /// `root/data`. `config` shapes the data stream when the dataset is
    /// first created, and must match when reopening for write. Read mode
    /// takes the geometry from disk and uses `config` only for the io
    /// queue depth.
    pub fn open_with(
        root: impl AsRef<Path>,
        mode: Mode,
        config: DatasetConfig,
    ) -> Result<Self, DatasetError> {
        let root = root.as_ref();
        let index_dir = root.join(INDEX_DIR);
        let data_dir = root.join(DATA_DIR);
        let (index_storage, data_storage): (Arc<dyn TrunkStorage>, Arc<dyn TrunkStorage>) =
            match mode {
                Mode::Write => (
                    Arc::new(LocalStorage::writable(
                        index_dir,
                        INDEX_TRUNK_SIZE,
                        INDEX_TRUNKS_PER_FILE,
                    )?),
                    Arc::new(LocalStorage::writable(
                        data_dir,
                        config.trunk_size,
                        config.trunks_per_file,
                    )?),
                ),
                Mode::Read => (
                    Arc::new(LocalStorage::read_only(index_dir)?),
                    Arc::new(LocalStorage::read_only(data_dir)?),
                ),
            };

        let dataset = Self::with_controllers(
            TrunkController::with_queue_size(index_storage, config.io_queue)?,
            TrunkController::with_queue_size(data_storage, config.io_queue)?,
            mode,
        )?;
        info!(
            path = %root.display(),
            mode = ?mode,
            records = dataset.total,
            "opened dataset"
        );
        Ok(dataset)
    }

    /// Builds a dataset over caller-supplied controllers: the first stream
    /// carries the 8-byte index entries, the second the record bytes.
    pub fn with_controllers(
        index: TrunkController,
        data: TrunkController,
        mode: Mode,
    ) -> Result<Self, DatasetError> {
        let entries_per_trunk = u64::from(index.trunk_size()) / Position::SIZE as u64;
        debug_assert!(
            entries_per_trunk.is_power_of_two(),
            "index trunks must hold a power of two of entries"
        );
        let entry_shift = entries_per_trunk.trailing_zeros();
        let entry_mask = entries_per_trunk - 1;
        let total = (u64::from(index.trunk_count()) - 1) * entries_per_trunk
            + u64::from(index.active_len()) / Position::SIZE as u64;

        let index_view = index.link(TrunkId::new(0))?;
        let data_view = data.link(TrunkId::new(0))?;
        debug!(records = total, "dataset cursor at start");

        Ok(Self {
            index_view,
            data_view,
            index,
            data,
            mode,
            tell: 0,
            total,
            data_offset: 0,
            entry_shift,
            entry_mask,
        })
    }

    /// Record index the next sequential read returns.
    #[must_use]
    pub fn tell(&self) -> u64 {
        self.tell
    }

    /// Number of records in the dataset.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.total
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Appends a record and returns its index.
    ///
    /// The record is immediately visible to reads through this dataset and
    /// becomes durable at the next [`flush`](Self::flush).
    ///
    /// # Errors
    ///
    /// - [`DatasetError::NotWritable`] in read mode
    /// - [`TrunkError::TooLarge`](granary_trunk::TrunkError::TooLarge) if
    ///   the record exceeds the data trunk size
    pub fn write(&mut self, record: &[u8]) -> Result<u64, DatasetError> {
        if self.mode != Mode::Write {
            return Err(DatasetError::NotWritable);
        }
        let end = self.data.append(record)?;
        self.index.append(&end.to_le_bytes())?;
        let record_index = self.total;
        self.total += 1;
        Ok(record_index)
    }

    /// Makes every written record durable: the index stream first, then
    /// the data stream. A crash between the two can leave the index naming
    /// records whose bytes never became durable; recovering from that is
    /// the caller's concern. A no-op on read-only datasets.
    pub fn flush(&mut self) -> Result<(), DatasetError> {
        if self.mode != Mode::Write {
            return Ok(());
        }
        self.index.flush()?;
        self.data.flush()?;
        Ok(())
    }

    /// Returns the record at the cursor and advances it.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::OutOfRange`] once the cursor reaches the
    /// end.
    pub fn read(&mut self) -> Result<Record<'_>, DatasetError> {
        if self.tell >= self.total {
            return Err(DatasetError::OutOfRange {
                index: self.tell,
                total: self.total,
            });
        }
        // The index view follows the cursor; put it back if an earlier
        // error left it elsewhere.
        let index_trunk = self.index_trunk_of(self.tell);
        if self.index_view.id() != index_trunk {
            self.index.relink(&mut self.index_view, index_trunk)?;
        }
        let end = self.index_entry(self.tell)?;

        let same_trunk = end.trunk() == self.data_view.id();
        let start = if same_trunk { self.data_offset as usize } else { 0 };
        let stop = end.offset() as usize;
        if stop < start || stop > self.data.trunk_size() as usize {
            return Err(DatasetError::CorruptIndex { index: self.tell });
        }

        if !same_trunk {
            // Records never span trunks; a new trunk starts fresh.
            self.data.relink(&mut self.data_view, end.trunk())?;
        }
        self.data_offset = end.offset();
        self.tell += 1;
        // Stepping past the last entry of an index trunk moves the view,
        // onto the still-empty active trunk when the cursor hits the end.
        if self.tell & self.entry_mask == 0 {
            let next = self.index_trunk_of(self.tell);
            self.index.relink(&mut self.index_view, next)?;
        }

        let bytes = self.data_view.bytes()?;
        Ok(Record::cached(bytes, start, stop))
    }

    /// Moves the cursor and returns its new position. Targets beyond
    /// either end are clamped to `[0, size]`; a cursor at `size` reads
    /// nothing until more records are written.
    pub fn seek(&mut self, whence: Whence) -> Result<u64, DatasetError> {
        let target = match whence {
            Whence::Start(index) => index.min(self.total),
            Whence::Current(delta) => {
                let target = i128::from(self.tell) + i128::from(delta);
                target.clamp(0, self.total as i128) as u64
            }
            Whence::End(back) => self.total.saturating_sub(back),
        };

        let index_trunk = self.index_trunk_of(target);
        self.index.relink(&mut self.index_view, index_trunk)?;

        if target == 0 {
            self.data.relink(&mut self.data_view, TrunkId::new(0))?;
            self.data_offset = 0;
        } else {
            // The record at `target` starts where record `target - 1`
            // ended, unless it opens a new trunk. At the very end there is
            // no entry for `target` yet; the previous end is enough, and
            // the next read re-resolves against whatever gets written.
            let prev_end = self.index_entry(target - 1)?;
            let (data_trunk, data_offset) = if target == self.total {
                (prev_end.trunk(), prev_end.offset())
            } else {
                let end = self.index_entry(target)?;
                if end.trunk() == prev_end.trunk() {
                    (prev_end.trunk(), prev_end.offset())
                } else {
                    (end.trunk(), 0)
                }
            };
            self.data.relink(&mut self.data_view, data_trunk)?;
            self.data_offset = data_offset;
        }

        self.tell = target;
        Ok(target)
    }

    /// Reads record `index` without moving the cursor.
    ///
    /// When the record lives in the trunk the cursor is already reading,
    /// its bytes are borrowed from the cache. Otherwise they are copied
    /// straight from the backend, skipping the cache; that path only sees
    /// flushed records, so interleave [`flush`](Self::flush) when
    /// positioned reads chase recent writes.
    pub fn pread(&self, index: u64) -> Result<Record<'_>, DatasetError> {
        if index >= self.total {
            return Err(DatasetError::OutOfRange {
                index,
                total: self.total,
            });
        }
        let end = self.index_entry(index)?;
        let start = if index == 0 {
            0
        } else {
            let prev_end = self.index_entry(index - 1)?;
            if prev_end.trunk() == end.trunk() {
                prev_end.offset()
            } else {
                0
            }
        };
        let stop = end.offset();
        if stop < start || stop as usize > self.data.trunk_size() as usize {
            return Err(DatasetError::CorruptIndex { index });
        }

        if end.trunk() == self.data_view.id() {
            let bytes = self.data_view.bytes()?;
            Ok(Record::cached(bytes, start as usize, stop as usize))
        } else {
            let mut buf = vec![0u8; (stop - start) as usize];
            self.data
                .pread(Position::new(end.trunk(), start), &mut buf)?;
            Ok(Record::owned(buf))
        }
    }

    /// Flushes and closes the dataset. Dropping a dataset also flushes,
    /// but only `close` reports the outcome.
    pub fn close(mut self) -> Result<(), DatasetError> {
        self.flush()
    }

    fn index_trunk_of(&self, index: u64) -> TrunkId {
        TrunkId::new((index >> self.entry_shift) as u32)
    }

    /// Reads index entry `index`, from the linked view when possible and
    /// through a temporary link otherwise.
    fn index_entry(&self, index: u64) -> Result<Position, DatasetError> {
        let trunk = self.index_trunk_of(index);
        let offset = (index & self.entry_mask) as usize * Position::SIZE;
        let mut raw = [0u8; Position::SIZE];
        if self.index_view.id() == trunk {
            let bytes = self.index_view.bytes()?;
            raw.copy_from_slice(&bytes[offset..offset + Position::SIZE]);
        } else {
            let view = self.index.link(trunk)?;
            let bytes = view.bytes()?;
            raw.copy_from_slice(&bytes[offset..offset + Position::SIZE]);
        }
        Ok(Position::from_le_bytes(raw))
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("mode", &self.mode)
            .field("tell", &self.tell)
            .field("total", &self.total)
            .finish()
    }
}
