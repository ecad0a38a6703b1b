//! VEIL - MemTable (In-Memory Sorted Map)
//! Write buffer of the engine: committed batches land here and stay
//! until the next flush turns them into a table.
//!
//! Size is tracked in table bytes (record framing included), so the
//! flush threshold matches what the flushed table will occupy.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::{Key, Mutation, Value};

use super::record::RECORD_OVERHEAD;

/// Result of a MemTable lookup for a key it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// The key is live with this value.
    Found(&'a Value),
    /// The key was deleted; older tables must not be consulted.
    Deleted,
}

/// Counts from applying one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub puts: usize,
    pub deletes: usize,
    /// Key and value bytes carried by the batch.
    pub bytes: usize,
}

fn framed_size(key: &[u8], value: Option<&Value>) -> usize {
    RECORD_OVERHEAD + key.len() + value.map_or(0, |v| v.len())
}

/// Sorted write buffer; `None` values are tombstones.
///
/// Values sit behind `Arc` so cursor snapshots share them instead of
/// copying.
pub struct MemTable {
    entries: BTreeMap<Key, Option<Arc<Value>>>,
    size_bytes: usize,
}

impl MemTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            size_bytes: 0,
        }
    }

    /// Bytes the buffered entries would occupy in a table.
    pub fn size(&self) -> usize {
        self.size_bytes
    }

    /// Number of buffered keys, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn set(&mut self, key: Key, value: Option<Arc<Value>>) {
        let added = framed_size(&key, value.as_deref());
        if let Some(old) = self.entries.insert(key.clone(), value) {
            self.size_bytes -= framed_size(&key, old.as_deref());
        }
        self.size_bytes += added;
    }

    /// Insert or overwrite a key.
    pub fn put(&mut self, key: Key, value: Value) {
        self.set(key, Some(Arc::new(value)));
    }

    /// Record a tombstone for `key`.
    pub fn delete(&mut self, key: Key) {
        self.set(key, None);
    }

    /// Apply a batch in order; a later mutation on the same key wins.
    pub fn apply_batch(&mut self, mutations: &[Mutation]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for mutation in mutations {
            summary.bytes += mutation.key().len() + mutation.value().map_or(0, |v| v.len());
            match mutation {
                Mutation::Put { key, value } => {
                    summary.puts += 1;
                    self.put(key.clone(), value.clone());
                }
                Mutation::Delete { key } => {
                    summary.deletes += 1;
                    self.delete(key.clone());
                }
            }
        }
        summary
    }

    /// `None` if the MemTable knows nothing about `key`.
    pub fn lookup(&self, key: &[u8]) -> Option<Lookup<'_>> {
        self.entries.get(key).map(|entry| match entry {
            Some(value) => Lookup::Found(&**value),
            None => Lookup::Deleted,
        })
    }

    /// Live value for `key`, ignoring tombstones.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        match self.lookup(key) {
            Some(Lookup::Found(value)) => Some(value),
            _ => None,
        }
    }

    /// True if `key` is buffered, as a value or a tombstone.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, Option<&Arc<Value>>)> + '_ {
        self.entries.iter().map(|(k, v)| (k, v.as_ref()))
    }

    /// True if some live key other than `except` is buffered.
    pub fn has_live_key_besides(&self, except: &[u8]) -> bool {
        self.entries
            .iter()
            .any(|(k, v)| v.is_some() && k.as_slice() != except)
    }

    /// Owned copy of the entries in key order, for writing a table.
    /// Tombstones are left out unless `keep_tombstones` is set.
    pub fn to_sorted_vec(&self, keep_tombstones: bool) -> Vec<(Key, Option<Value>)> {
        self.entries
            .iter()
            .filter(|(_, v)| keep_tombstones || v.is_some())
            .map(|(k, v)| (k.clone(), v.as_deref().cloned()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.size_bytes = 0;
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
