//! VEIL - Core Type Definitions
//! Defines fundamental types shared by the adapter and the engine.

/// Raw key bytes as stored by the engine.
pub type Key = Vec<u8>;

/// Raw value bytes as stored by the engine (obfuscated when a key is set).
pub type Value = Vec<u8>;

/// A single pending mutation inside a write batch.
/// Mutations are applied in order; a later mutation on the same key wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert or overwrite `key` with `value`.
    Put { key: Key, value: Value },
    /// Delete `key` (tombstone).
    Delete { key: Key },
}

impl Mutation {
    /// Create a PUT mutation.
    pub fn put(key: Key, value: Value) -> Self {
        Mutation::Put { key, value }
    }

    /// Create a DELETE mutation.
    pub fn delete(key: Key) -> Self {
        Mutation::Delete { key }
    }

    /// The key this mutation targets.
    pub fn key(&self) -> &[u8] {
        match self {
            Mutation::Put { key, .. } | Mutation::Delete { key } => key,
        }
    }

    /// The value carried by a PUT, `None` for a DELETE.
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Mutation::Put { value, .. } => Some(value),
            Mutation::Delete { .. } => None,
        }
    }

    /// Returns true if this mutation is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Mutation::Delete { .. })
    }
}
