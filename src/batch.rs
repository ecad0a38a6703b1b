//! VEIL - Write Batch
//! Accumulates mutations for a single atomic commit and keeps a running
//! estimate of their serialized size.
//!
//! The estimate mirrors the engine's record framing:
//! `[tag][varint key_len][key][varint value_len][value]`. Lengths above 127
//! are counted as two-byte varints, so the figure undercounts entries larger
//! than 16KB. It is a planning signal for flush policies, not an exact size.

use serde::Serialize;

use crate::codec;
use crate::error::{Result, VeilError};
use crate::obfuscation::{ObfuscateKey, OBFUSCATE_KEY_KEY};
use crate::types::Mutation;

/// Estimated length of the varint encoding of `n`.
fn varint_len(n: usize) -> usize {
    if n > 127 {
        2
    } else {
        1
    }
}

/// The obfuscation key entry is owned by the store; a typed key such as
/// `(0u8, *b"obfuscate_key")` encodes to the same bytes.
fn check_not_reserved(key: &[u8]) -> Result<()> {
    if key == OBFUSCATE_KEY_KEY {
        log::warn!("Rejected mutation of the reserved obfuscation key entry");
        return Err(VeilError::ReservedKey);
    }
    Ok(())
}

/// A set of pending puts and deletes committed atomically by
/// [`Store::write_batch`](crate::store::Store::write_batch).
///
/// Borrows the obfuscation key of the store that created it, so it can
/// neither outlive that store nor be committed to a different one.
pub struct WriteBatch<'a> {
    obfuscate_key: &'a ObfuscateKey,
    mutations: Vec<Mutation>,
    size_estimate: usize,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(obfuscate_key: &'a ObfuscateKey) -> Self {
        Self {
            obfuscate_key,
            mutations: Vec::new(),
            size_estimate: 0,
        }
    }

    /// Queue a typed put.
    pub fn write<K, V>(&mut self, key: &K, value: &V) -> Result<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let key = codec::encode_key(key)?;
        let value = codec::encode_value(value)?;
        self.put_bytes(key, value)
    }

    /// Queue a typed delete.
    pub fn erase<K: Serialize + ?Sized>(&mut self, key: &K) -> Result<()> {
        let key = codec::encode_key(key)?;
        self.erase_bytes(key)
    }

    /// Queue a put of already-encoded bytes. The value is obfuscated here.
    pub fn put_bytes(&mut self, key: Vec<u8>, mut value: Vec<u8>) -> Result<()> {
        check_not_reserved(&key)?;
        self.obfuscate_key.apply(&mut value);
        self.size_estimate +=
            1 + varint_len(key.len()) + key.len() + varint_len(value.len()) + value.len();
        self.mutations.push(Mutation::put(key, value));
        Ok(())
    }

    /// Queue a delete of an already-encoded key.
    pub fn erase_bytes(&mut self, key: Vec<u8>) -> Result<()> {
        check_not_reserved(&key)?;
        self.size_estimate += 1 + varint_len(key.len()) + key.len();
        self.mutations.push(Mutation::delete(key));
        Ok(())
    }

    /// Drop every pending mutation and reset the estimate.
    pub fn clear(&mut self) {
        self.mutations.clear();
        self.size_estimate = 0;
    }

    /// Running size estimate in bytes.
    pub fn size_estimate(&self) -> usize {
        self.size_estimate
    }

    /// Number of pending mutations.
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub(crate) fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub(crate) fn obfuscate_key(&self) -> &'a ObfuscateKey {
        self.obfuscate_key
    }
}
