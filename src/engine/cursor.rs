//! VEIL - Snapshot Cursor
//! Ordered iteration over a point-in-time view of the engine.
//!
//! The cursor merges the MemTable and every table into a sorted list of
//! live keys when it is created, then iterates over that. Creation is
//! O(n) in the number of keys. MemTable values are shared, table values
//! are only read when the cursor is positioned on them. Tables are held by `Arc`, so compactions that run
//! after the snapshot do not disturb it.

use std::sync::Arc;

use crate::error::{Result, VeilError};
use crate::types::{Key, Value};

use super::cache::ValueCache;
use super::sstable::{RecordHandle, SSTable};
use super::{EngineCursor, ReadOptions};

/// Where a snapshot entry's value lives.
pub(crate) enum Source {
    Memory(Arc<Value>),
    Table(Arc<SSTable>, RecordHandle),
}

/// Cursor over an [`LsmEngine`](super::LsmEngine) snapshot.
pub struct LsmCursor {
    entries: Vec<(Key, Source)>,
    /// Current position; `entries.len()` means not positioned.
    pos: usize,
    /// Value loaded from a table for the current position.
    loaded: Option<Value>,
    /// First read failure, sticky until the cursor is dropped.
    error: Option<String>,
    options: ReadOptions,
    cache: Arc<ValueCache>,
}

impl LsmCursor {
    pub(crate) fn new(entries: Vec<(Key, Source)>, options: ReadOptions, cache: Arc<ValueCache>) -> Self {
        let pos = entries.len();
        Self {
            entries,
            pos,
            loaded: None,
            error: None,
            options,
            cache,
        }
    }

    /// Number of live entries in the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the snapshot holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn load(&mut self) {
        self.loaded = None;
        let Some((_, Source::Table(table, handle))) = self.entries.get(self.pos) else {
            return;
        };
        match table.read_value(handle, self.options.verify_checksums, &self.cache, self.options.fill_cache) {
            Ok(value) => self.loaded = Some(value),
            Err(e) => {
                log::error!("Cursor read failed in table {}: {}", table.id(), e);
                self.error = Some(e.to_string());
                self.pos = self.entries.len();
            }
        }
    }
}

impl EngineCursor for LsmCursor {
    fn valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn seek_to_first(&mut self) {
        if self.error.is_some() {
            return;
        }
        self.pos = 0;
        self.load();
    }

    fn seek(&mut self, key: &[u8]) {
        if self.error.is_some() {
            return;
        }
        self.pos = self.entries.partition_point(|(k, _)| k.as_slice() < key);
        self.load();
    }

    fn next(&mut self) {
        if self.valid() {
            self.pos += 1;
            self.load();
        }
    }

    fn key(&self) -> &[u8] {
        match self.entries.get(self.pos) {
            Some((key, _)) => key,
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.entries.get(self.pos) {
            Some((_, Source::Memory(value))) => value.as_slice(),
            Some((_, Source::Table(..))) => self.loaded.as_deref().unwrap_or(&[]),
            None => &[],
        }
    }

    fn status(&self) -> Result<()> {
        match &self.error {
            Some(msg) => Err(VeilError::Corruption(msg.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor() -> LsmCursor {
        let table = Arc::new(
            SSTable::build(
                1,
                None,
                vec![(b"b".to_vec(), Some(b"from-table".to_vec()))],
            )
            .unwrap(),
        );
        let handle = table.handles()[b"b".as_slice()];
        let entries = vec![
            (b"a".to_vec(), Source::Memory(Arc::new(b"1".to_vec()))),
            (b"b".to_vec(), Source::Table(table, handle)),
            (b"d".to_vec(), Source::Memory(Arc::new(b"4".to_vec()))),
        ];
        LsmCursor::new(entries, ReadOptions::default(), Arc::new(ValueCache::new(0)))
    }

    #[test]
    fn test_unpositioned_is_invalid() {
        let c = cursor();
        assert!(!c.valid());
        assert_eq!(c.key(), b"");
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn test_forward_scan() {
        let mut c = cursor();
        c.seek_to_first();
        let mut seen = Vec::new();
        while c.valid() {
            seen.push((c.key().to_vec(), c.value().to_vec()));
            c.next();
        }
        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"from-table".to_vec()),
                (b"d".to_vec(), b"4".to_vec()),
            ]
        );
        assert!(c.status().is_ok());
    }

    #[test]
    fn test_seek_lands_on_next_key() {
        let mut c = cursor();
        c.seek(b"c");
        assert!(c.valid());
        assert_eq!(c.key(), b"d");
        c.seek(b"b");
        assert_eq!(c.value(), b"from-table");
        c.seek(b"e");
        assert!(!c.valid());
    }

    #[test]
    fn test_next_past_end_stays_invalid() {
        let mut c = cursor();
        c.seek(b"d");
        c.next();
        assert!(!c.valid());
        c.next();
        assert!(!c.valid());
    }
}
