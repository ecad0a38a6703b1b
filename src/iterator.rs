//! VEIL - Iterator Adapter
//! Typed, de-obfuscating iteration over the engine's ordered key space.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec;
use crate::engine::{EngineCursor, KvEngine, LsmEngine};
use crate::error::{Result, VeilError};
use crate::obfuscation::{ObfuscateKey, OBFUSCATE_KEY_KEY};

/// Cursor over a [`Store`](crate::store::Store).
///
/// Starts unpositioned; `seek_to_first` or `seek` position it, `next`
/// advances until it becomes invalid. The store's internal obfuscation
/// key entry is never surfaced.
pub struct DbIterator<'a, E: KvEngine = LsmEngine> {
    cursor: E::Cursor,
    obfuscate_key: &'a ObfuscateKey,
}

impl<'a, E: KvEngine> DbIterator<'a, E> {
    pub(crate) fn new(cursor: E::Cursor, obfuscate_key: &'a ObfuscateKey) -> Self {
        Self {
            cursor,
            obfuscate_key,
        }
    }

    fn skip_reserved(&mut self) {
        if self.cursor.valid() && self.cursor.key() == OBFUSCATE_KEY_KEY {
            self.cursor.next();
        }
    }

    /// True while positioned at an entry.
    pub fn valid(&self) -> bool {
        self.cursor.valid()
    }

    /// Position at the first entry.
    pub fn seek_to_first(&mut self) {
        self.cursor.seek_to_first();
        self.skip_reserved();
    }

    /// Position at the first entry whose encoded key is >= `key`.
    pub fn seek<K: Serialize + ?Sized>(&mut self, key: &K) -> Result<()> {
        let key = codec::encode_key(key)?;
        self.seek_bytes(&key);
        Ok(())
    }

    /// Position at the first entry whose raw key is >= `key`.
    pub fn seek_bytes(&mut self, key: &[u8]) {
        self.cursor.seek(key);
        self.skip_reserved();
    }

    /// Advance one entry. Does nothing once the iterator is exhausted.
    pub fn next(&mut self) {
        self.cursor.next();
        self.skip_reserved();
    }

    /// Decode the current key. Fails with [`VeilError::NotPositioned`]
    /// when the iterator is not valid.
    pub fn key<K: DeserializeOwned>(&self) -> Result<K> {
        self.ensure_positioned()?;
        codec::decode(self.cursor.key()).map_err(|e| {
            log::debug!("Iterator key decode failed: {}", e);
            e
        })
    }

    /// De-obfuscate and decode the current value.
    pub fn value<V: DeserializeOwned>(&self) -> Result<V> {
        self.ensure_positioned()?;
        let mut bytes = self.cursor.value().to_vec();
        self.obfuscate_key.apply(&mut bytes);
        codec::decode(&bytes).map_err(|e| {
            log::debug!("Iterator value decode failed: {}", e);
            e
        })
    }

    /// Stored length of the current value, before decoding.
    pub fn value_size(&self) -> usize {
        if self.valid() {
            self.cursor.value().len()
        } else {
            0
        }
    }

    /// Raw encoded bytes of the current key.
    pub fn raw_key(&self) -> &[u8] {
        self.cursor.key()
    }

    /// First engine error hit while iterating, if any.
    pub fn status(&self) -> Result<()> {
        self.cursor.status()
    }

    fn ensure_positioned(&self) -> Result<()> {
        if self.valid() {
            Ok(())
        } else {
            Err(VeilError::NotPositioned)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::{ReadOptions, WriteOptions};
    use crate::types::Mutation;

    fn engine_with(entries: &[(Vec<u8>, Vec<u8>)]) -> LsmEngine {
        let engine = LsmEngine::open(Config::in_memory()).unwrap();
        let mutations: Vec<Mutation> = entries
            .iter()
            .map(|(k, v)| Mutation::put(k.clone(), v.clone()))
            .collect();
        engine.write(&WriteOptions::default(), &mutations).unwrap();
        engine
    }

    #[test]
    fn test_reserved_key_is_skipped() {
        let engine = engine_with(&[
            (OBFUSCATE_KEY_KEY.to_vec(), vec![0u8; 8]),
            (codec::encode_key(&1u32).unwrap(), codec::encode_value(&10u32).unwrap()),
        ]);
        let key = ObfuscateKey::zero();
        let mut it: DbIterator<'_> =
            DbIterator::new(engine.new_cursor(&ReadOptions::default()).unwrap(), &key);

        it.seek_to_first();
        assert!(it.valid());
        assert_eq!(it.key::<u32>().unwrap(), 1);
        it.next();
        assert!(!it.valid());

        it.seek_bytes(b"");
        assert_eq!(it.key::<u32>().unwrap(), 1);
    }

    #[test]
    fn test_value_is_deobfuscated() {
        let mask = ObfuscateKey::from_bytes(&[9, 8, 7, 6, 5, 4, 3, 2]).unwrap();
        let mut stored = codec::encode_value(&"secret").unwrap();
        mask.apply(&mut stored);
        let engine = engine_with(&[(codec::encode_key(&"k").unwrap(), stored.clone())]);

        let mut it: DbIterator<'_> =
            DbIterator::new(engine.new_cursor(&ReadOptions::default()).unwrap(), &mask);
        it.seek(&"k").unwrap();
        assert_eq!(it.value::<String>().unwrap(), "secret");
        assert_eq!(it.value_size(), stored.len());
    }

    #[test]
    fn test_decode_failure_is_an_error() {
        let engine = engine_with(&[(b"raw".to_vec(), vec![1, 2, 3])]);
        let key = ObfuscateKey::zero();
        let mut it: DbIterator<'_> =
            DbIterator::new(engine.new_cursor(&ReadOptions::default()).unwrap(), &key);
        it.seek_to_first();
        assert!(it.value::<u64>().unwrap_err().is_decode());
        assert_eq!(it.raw_key(), b"raw");
    }

    #[test]
    fn test_unpositioned_accessors() {
        let engine = engine_with(&[]);
        let key = ObfuscateKey::zero();
        let it: DbIterator<'_> =
            DbIterator::new(engine.new_cursor(&ReadOptions::default()).unwrap(), &key);
        assert!(!it.valid());
        assert!(matches!(it.key::<u32>(), Err(VeilError::NotPositioned)));
        assert!(matches!(it.value::<u32>(), Err(VeilError::NotPositioned)));
        assert_eq!(it.value_size(), 0);
        assert!(it.status().is_ok());
    }
}
