//! VEIL - Store Configuration
//! Defines the parameters used to open a store and size its engine.

use std::path::PathBuf;

/// Smallest memtable write buffer the engine will use.
const MIN_MEMTABLE_SIZE: usize = 64 * 1024;

/// Configuration for opening a [`Store`](crate::store::Store).
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the WAL and table files.
    pub data_dir: PathBuf,

    /// Total memory budget in bytes, split between the value cache
    /// and the memtable write buffer.
    pub cache_size: usize,

    /// Keep all engine data in memory; nothing touches `data_dir`.
    pub in_memory: bool,

    /// Remove any existing data in `data_dir` before opening.
    pub wipe: bool,

    /// Obfuscate stored values with a random XOR key when creating a new store.
    pub obfuscate: bool,

    /// Fsync every commit, even when the caller did not ask for a sync write.
    pub sync_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            cache_size: 8 * 1024 * 1024, // 8 MB
            in_memory: false,
            wipe: false,
            obfuscate: false,
            sync_writes: false,
        }
    }
}

impl Config {
    /// Create a new Config with a custom data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Create a Config for a store that lives entirely in memory.
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            ..Default::default()
        }
    }

    /// Set the total cache budget in bytes.
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Wipe existing data on open.
    pub fn with_wipe(mut self, wipe: bool) -> Self {
        self.wipe = wipe;
        self
    }

    /// Request value obfuscation for newly created stores.
    pub fn with_obfuscation(mut self, obfuscate: bool) -> Self {
        self.obfuscate = obfuscate;
        self
    }

    /// Force every commit to be synced to disk.
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Bytes reserved for the engine's value cache (half the budget).
    pub fn block_cache_size(&self) -> usize {
        self.cache_size / 2
    }

    /// Memtable size that triggers a flush to a table (a quarter of the budget).
    pub fn memtable_max_size(&self) -> usize {
        (self.cache_size / 4).max(MIN_MEMTABLE_SIZE)
    }

    /// Ensure the data directory exists.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}
