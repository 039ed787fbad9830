//! Dataset configuration.

use granary_trunk::DEFAULT_IO_QUEUE;

/// Trunk size of every index stream: 32 MiB, or four million records per
/// index trunk. Index geometry is fixed so readers never need it spelled
/// out; only the data stream's geometry is configurable.
pub(crate) const INDEX_TRUNK_SIZE: u32 = 1 << 25;

/// Block files of an index stream hold one trunk each.
pub(crate) const INDEX_TRUNKS_PER_FILE: u32 = 1;

/// Geometry and io settings for a dataset's data stream.
///
/// The defaults suit bulk record storage: 32 MiB trunks, four to a block
/// file. Records must fit in one trunk, so `trunk_size` bounds the largest
/// storable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetConfig {
    /// Size of each data trunk in bytes. Must be a power of two.
    pub trunk_size: u32,
    /// Data trunks grouped into one block file.
    pub trunks_per_file: u32,
    /// Depth of each controller's background io queue.
    pub io_queue: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            trunk_size: 1 << 25,
            trunks_per_file: 4,
            io_queue: DEFAULT_IO_QUEUE,
        }
    }
}

impl DatasetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the data trunk size in bytes.
    #[must_use]
    pub fn with_trunk_size(mut self, trunk_size: u32) -> Self {
        self.trunk_size = trunk_size;
        self
    }

    /// Sets how many data trunks share one block file.
    #[must_use]
    pub fn with_trunks_per_file(mut self, trunks_per_file: u32) -> Self {
        self.trunks_per_file = trunks_per_file;
        self
    }

    /// Sets the background io queue depth.
    #[must_use]
    pub fn with_io_queue(mut self, io_queue: usize) -> Self {
        self.io_queue = io_queue;
        self
    }
}
