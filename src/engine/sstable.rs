//! VEIL - SSTable (Sorted String Table)
//! Immutable sorted storage produced by MemTable flushes and compactions.
//!
//! A table is a plain sequence of [`record`](super::record) frames in key
//! order. Keys and record locations are indexed in memory when the table
//! is built or opened; values stay on disk (or in the table's buffer in
//! in-memory mode) and are read on demand through the value cache.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Result, VeilError};
use crate::types::{Key, Mutation, Value};

use super::cache::ValueCache;
use super::record;

/// File extension of table files.
pub const TABLE_EXTENSION: &str = "sst";

/// Location of one record inside a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHandle {
    /// Byte offset of the record frame.
    pub offset: u64,
    /// Length of the whole record frame.
    pub len: u32,
    /// True if the record is a tombstone.
    pub tombstone: bool,
}

enum TableData {
    File(Mutex<File>),
    Memory(Vec<u8>),
}

/// Sorted String Table - immutable storage for flushed data.
pub struct SSTable {
    /// Unique, monotonically assigned table id (newer tables have larger ids).
    id: u64,
    /// Path to the table file, `None` for in-memory tables.
    path: Option<PathBuf>,
    data: TableData,
    /// Key -> record location.
    index: BTreeMap<Key, RecordHandle>,
    /// Size of the table in bytes.
    file_size: u64,
}

/// File name used for table `id`.
pub fn file_name(id: u64) -> String {
    format!("{:06}.{}", id, TABLE_EXTENSION)
}

/// Parse a table id out of a file name produced by [`file_name`].
pub fn parse_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(TABLE_EXTENSION)?.strip_suffix('.')?;
    stem.parse().ok()
}

impl SSTable {
    /// Write sorted `entries` as table `id`.
    ///
    /// With `dir` set the table is written to a temporary file, synced,
    /// and renamed into place; otherwise it is kept in memory.
    /// `None` values are written as tombstones.
    pub fn build<I>(id: u64, dir: Option<&Path>, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Key, Option<Value>)>,
    {
        let mut buf = Vec::new();
        let mut index = BTreeMap::new();

        for (key, value) in entries {
            let offset = buf.len() as u64;
            let mutation = match value {
                Some(value) => Mutation::put(key, value),
                None => Mutation::delete(key),
            };
            let len = record::encode_into(&mut buf, &mutation);
            let handle = RecordHandle {
                offset,
                len: len as u32,
                tombstone: mutation.is_tombstone(),
            };
            if let Mutation::Put { key, .. } | Mutation::Delete { key } = mutation {
                index.insert(key, handle);
            }
        }

        let file_size = buf.len() as u64;
        let (path, data) = match dir {
            Some(dir) => {
                let path = dir.join(file_name(id));
                let tmp = path.with_extension("tmp");
                {
                    let mut file = File::create(&tmp)?;
                    file.write_all(&buf)?;
                    file.sync_all()?;
                }
                fs::rename(&tmp, &path)?;
                let file = File::open(&path)?;
                (Some(path), TableData::File(Mutex::new(file)))
            }
            None => (None, TableData::Memory(buf)),
        };

        log::debug!("Built table {} ({} entries, {} bytes)", id, index.len(), file_size);
        Ok(Self {
            id,
            path,
            data,
            index,
            file_size,
        })
    }

    /// Open an existing table file and rebuild its index.
    /// Every record is checksum-verified; any damage fails the open.
    pub fn open(id: u64, path: PathBuf) -> Result<Self> {
        let bytes = fs::read(&path)?;
        let mut index = BTreeMap::new();
        let mut offset = 0usize;

        while offset < bytes.len() {
            let (mutation, used) = record::decode(&bytes[offset..], true).map_err(|e| {
                VeilError::Corruption(format!("table {:?} at offset {}: {}", path, offset, e))
            })?;
            let handle = RecordHandle {
                offset: offset as u64,
                len: used as u32,
                tombstone: mutation.is_tombstone(),
            };
            if let Mutation::Put { key, .. } | Mutation::Delete { key } = mutation {
                index.insert(key, handle);
            }
            offset += used;
        }

        let file = File::open(&path)?;
        Ok(Self {
            id,
            path: Some(path),
            data: TableData::File(Mutex::new(file)),
            index,
            file_size: bytes.len() as u64,
        })
    }

    /// Returns the table id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the path to the table file, if it lives on disk.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Returns the number of entries (tombstones included).
    pub fn entry_count(&self) -> usize {
        self.index.len()
    }

    /// Returns the table size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Smallest key in the table.
    pub fn min_key(&self) -> Option<&Key> {
        self.index.keys().next()
    }

    /// Largest key in the table.
    pub fn max_key(&self) -> Option<&Key> {
        self.index.keys().next_back()
    }

    /// Key -> record location index.
    pub fn handles(&self) -> &BTreeMap<Key, RecordHandle> {
        &self.index
    }

    /// Look up `key`.
    /// `Ok(Some(None))` is a tombstone, `Ok(None)` means the table has no entry.
    pub fn get(
        &self,
        key: &[u8],
        verify: bool,
        cache: &ValueCache,
        fill_cache: bool,
    ) -> Result<Option<Option<Value>>> {
        match self.index.get(key) {
            None => Ok(None),
            Some(handle) if handle.tombstone => Ok(Some(None)),
            Some(handle) => self
                .read_value(handle, verify, cache, fill_cache)
                .map(|v| Some(Some(v))),
        }
    }

    /// Read the value stored at `handle`, going through the cache.
    pub fn read_value(
        &self,
        handle: &RecordHandle,
        verify: bool,
        cache: &ValueCache,
        fill_cache: bool,
    ) -> Result<Value> {
        let cache_key = (self.id, handle.offset);
        if let Some(value) = cache.get(cache_key) {
            return Ok(value.as_ref().clone());
        }

        let raw = self.read_at(handle.offset, handle.len as usize)?;
        let (mutation, _) = record::decode(&raw, verify)?;
        let value = match mutation {
            Mutation::Put { value, .. } => value,
            Mutation::Delete { .. } => {
                return Err(VeilError::Corruption(format!(
                    "table {} offset {}: expected a value, found a tombstone",
                    self.id, handle.offset
                )))
            }
        };
        if fill_cache {
            cache.insert(cache_key, Arc::new(value.clone()));
        }
        Ok(value)
    }

    /// Approximate bytes occupied by keys in `[start, end)`.
    pub fn approximate_size(&self, start: &[u8], end: &[u8]) -> u64 {
        if start >= end {
            return 0;
        }
        self.index
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
            .map(|(_, handle)| handle.len as u64)
            .sum()
    }

    /// Returns true if the table's key span intersects `[start, end]`.
    /// A `None` bound is unbounded.
    pub fn overlaps(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> bool {
        let (Some(min), Some(max)) = (self.min_key(), self.max_key()) else {
            return false;
        };
        start.map_or(true, |s| max.as_slice() >= s) && end.map_or(true, |e| min.as_slice() <= e)
    }

    /// Read every entry in key order.
    pub fn entries(&self, verify: bool) -> Result<Vec<(Key, Option<Value>)>> {
        let bytes = self.read_at(0, self.file_size as usize)?;
        let mut entries = Vec::with_capacity(self.index.len());
        let mut offset = 0usize;
        while offset < bytes.len() {
            let (mutation, used) = record::decode(&bytes[offset..], verify)?;
            entries.push(match mutation {
                Mutation::Put { key, value } => (key, Some(value)),
                Mutation::Delete { key } => (key, None),
            });
            offset += used;
        }
        Ok(entries)
    }

    /// Delete the backing file. In-memory tables have nothing to delete.
    pub fn remove_file(&self) -> Result<()> {
        if let Some(path) = &self.path {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        match &self.data {
            TableData::File(file) => {
                let mut file = file
                    .lock()
                    .map_err(|e| VeilError::LockPoisoned(format!("table file: {}", e)))?;
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf)?;
                Ok(buf)
            }
            TableData::Memory(bytes) => {
                let start = offset as usize;
                bytes
                    .get(start..start + len)
                    .map(|slice| slice.to_vec())
                    .ok_or_else(|| {
                        VeilError::Corruption(format!(
                            "table {} read past end ({} + {})",
                            self.id, offset, len
                        ))
                    })
            }
        }
    }
}
