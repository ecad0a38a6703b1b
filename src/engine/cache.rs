//! VEIL - Value Cache
//! Byte-budgeted cache for values read out of tables.
//! Entries are keyed by (table id, record offset), which never repeat
//! because table ids are never reused.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Cache slot identifier: (table id, record offset).
pub type CacheKey = (u64, u64);

/// FIFO-evicting cache bounded by total value bytes.
pub struct ValueCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    map: HashMap<CacheKey, Arc<Vec<u8>>>,
    order: VecDeque<CacheKey>,
    used: usize,
}

impl ValueCache {
    /// Create a cache holding at most `capacity` value bytes.
    /// A zero capacity disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Configured byte budget.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held.
    pub fn usage(&self) -> usize {
        self.inner.lock().map(|inner| inner.used).unwrap_or(0)
    }

    /// Number of cached values.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.map.len()).unwrap_or(0)
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a cached value.
    pub fn get(&self, key: CacheKey) -> Option<Arc<Vec<u8>>> {
        let inner = self.inner.lock().ok()?;
        inner.map.get(&key).cloned()
    }

    /// Insert a value, evicting the oldest entries to stay within budget.
    /// Values larger than the whole budget are not cached.
    pub fn insert(&self, key: CacheKey, value: Arc<Vec<u8>>) {
        if value.len() > self.capacity {
            return;
        }
        // A poisoned cache only loses hits.
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.map.contains_key(&key) {
            return;
        }
        while inner.used + value.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.map.remove(&oldest) {
                inner.used -= evicted.len();
            }
        }
        inner.used += value.len();
        inner.order.push_back(key);
        inner.map.insert(key, value);
    }
}
