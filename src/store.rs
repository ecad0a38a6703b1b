//! VEIL - Store Facade
//! Typed reads, writes, batches, and iteration over a [`KvEngine`].
//!
//! ## Read Path
//! encode key -> engine get -> de-obfuscate -> decode
//!
//! ## Write Path
//! encode key/value -> [`WriteBatch`] (obfuscate + estimate) -> engine write
//!
//! Engine failures are logged and returned. Stored bytes that fail to
//! decode are reported as absent by `read`.

use std::ptr;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::batch::WriteBatch;
use crate::codec;
use crate::config::Config;
use crate::engine::metrics::EngineMetrics;
use crate::engine::{KvEngine, LsmEngine, ReadOptions, WriteOptions};
use crate::error::{Result, VeilError};
use crate::iterator::DbIterator;
use crate::obfuscation::{self, ObfuscateKey, OBFUSCATE_KEY_KEY};

/// A typed key-value store with optional value obfuscation.
///
/// Batches and iterators borrow the store and cannot outlive it.
pub struct Store<E: KvEngine = LsmEngine> {
    engine: E,
    name: String,
    /// Point reads.
    read_options: ReadOptions,
    /// Full scans: checksummed, kept out of the value cache.
    iter_options: ReadOptions,
    /// Buffered commits.
    write_options: WriteOptions,
    /// Durable commits.
    sync_options: WriteOptions,
    obfuscate_key: ObfuscateKey,
}

impl Store<LsmEngine> {
    /// Open or create a store backed by the built-in LSM engine.
    ///
    /// ## Steps
    /// 1. Size the engine from `config.cache_size`
    /// 2. Wipe existing data if `config.wipe` is set
    /// 3. Open the engine, replaying its WAL
    /// 4. Load or create the obfuscation key
    pub fn open(config: Config) -> Result<Self> {
        let name = if config.in_memory {
            "memory".to_string()
        } else {
            config.data_dir.display().to_string()
        };
        let obfuscate = config.obfuscate;
        let engine = LsmEngine::open(config).map_err(|e| {
            log::error!("Failed to open store {}: {}", name, e);
            e
        })?;
        Self::build(engine, obfuscate, name)
    }

    /// Operation counters of the underlying engine.
    pub fn metrics(&self) -> &EngineMetrics {
        self.engine.metrics()
    }
}

impl<E: KvEngine> Store<E> {
    /// Wrap an already opened engine.
    pub fn with_engine(engine: E, obfuscate: bool) -> Result<Self> {
        Self::build(engine, obfuscate, "custom".to_string())
    }

    fn build(engine: E, obfuscate: bool, name: String) -> Result<Self> {
        let obfuscate_key = obfuscation::create_or_load(&engine, obfuscate).map_err(|e| {
            log::error!("Failed to load obfuscation key for {}: {}", name, e);
            e
        })?;
        log::info!("Using obfuscation key {} for {}", obfuscate_key.to_hex(), name);

        Ok(Self {
            engine,
            name,
            read_options: ReadOptions {
                verify_checksums: true,
                fill_cache: true,
            },
            iter_options: ReadOptions {
                verify_checksums: true,
                fill_cache: false,
            },
            write_options: WriteOptions { sync: false },
            sync_options: WriteOptions { sync: true },
            obfuscate_key,
        })
    }

    fn engine_failure(&self, op: &str, e: VeilError) -> VeilError {
        log::error!("{} failed on {}: {}", op, self.name, e);
        e
    }

    /// Read and decode the value stored under `key`.
    ///
    /// Returns `Ok(None)` when the key is absent or the stored bytes do not
    /// decode as `V`.
    pub fn read<K, V>(&self, key: &K) -> Result<Option<V>>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        let key = codec::encode_key(key)?;
        let Some(mut bytes) = self
            .engine
            .get(&self.read_options, &key)
            .map_err(|e| self.engine_failure("read", e))?
        else {
            return Ok(None);
        };

        self.obfuscate_key.apply(&mut bytes);
        match codec::decode(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log::debug!("Treating undecodable value as absent: {}", e);
                Ok(None)
            }
        }
    }

    /// Store `value` under `key` as a single-entry batch.
    pub fn write<K, V>(&self, key: &K, value: &V, sync: bool) -> Result<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let mut batch = self.batch();
        batch.write(key, value)?;
        self.write_batch(&batch, sync)
    }

    /// Returns true if `key` is present.
    pub fn exists<K: Serialize + ?Sized>(&self, key: &K) -> Result<bool> {
        let key = codec::encode_key(key)?;
        let value = self
            .engine
            .get(&self.read_options, &key)
            .map_err(|e| self.engine_failure("exists", e))?;
        Ok(value.is_some())
    }

    /// Delete `key` as a single-entry batch.
    pub fn erase<K: Serialize + ?Sized>(&self, key: &K, sync: bool) -> Result<()> {
        let mut batch = self.batch();
        batch.erase(key)?;
        self.write_batch(&batch, sync)
    }

    /// Start an empty batch bound to this store.
    pub fn batch(&self) -> WriteBatch<'_> {
        WriteBatch::new(&self.obfuscate_key)
    }

    /// Commit every mutation in `batch` atomically.
    ///
    /// With `sync` the call returns once the batch is durable. The batch is
    /// left untouched and can be cleared and reused.
    pub fn write_batch(&self, batch: &WriteBatch<'_>, sync: bool) -> Result<()> {
        if !ptr::eq(batch.obfuscate_key(), &self.obfuscate_key) {
            return Err(VeilError::ForeignBatch);
        }
        let options = if sync {
            &self.sync_options
        } else {
            &self.write_options
        };
        log::trace!(
            "Committing {} mutations (~{} bytes, sync={})",
            batch.len(),
            batch.size_estimate(),
            sync
        );
        self.engine
            .write(options, batch.mutations())
            .map_err(|e| self.engine_failure("write_batch", e))
    }

    /// Kept for callers that flush explicitly; commits already reach the
    /// engine, so there is nothing to do.
    pub fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Make every buffered write durable.
    pub fn sync(&self) -> Result<()> {
        self.engine
            .write(&self.sync_options, &[])
            .map_err(|e| self.engine_failure("sync", e))
    }

    /// Create an unpositioned iterator over a snapshot of the store.
    pub fn iter(&self) -> Result<DbIterator<'_, E>> {
        let cursor = self
            .engine
            .new_cursor(&self.iter_options)
            .map_err(|e| self.engine_failure("iter", e))?;
        Ok(DbIterator::new(cursor, &self.obfuscate_key))
    }

    /// Returns true if the store holds no application entries.
    pub fn is_empty(&self) -> Result<bool> {
        let found = self
            .engine
            .has_key_besides(&self.iter_options, OBFUSCATE_KEY_KEY)
            .map_err(|e| self.engine_failure("is_empty", e))?;
        Ok(!found)
    }

    /// Approximate stored bytes for keys in `[begin, end)`.
    pub fn estimate_size<K: Serialize + ?Sized>(&self, begin: &K, end: &K) -> Result<u64> {
        let begin = codec::encode_key(begin)?;
        let end = codec::encode_key(end)?;
        self.engine
            .approximate_size(&begin, &end)
            .map_err(|e| self.engine_failure("estimate_size", e))
    }

    /// Ask the engine to compact `[begin, end]`. Failures are logged only.
    pub fn compact_range<K: Serialize + ?Sized>(&self, begin: &K, end: &K) {
        if let Err(e) = self.try_compact_range(begin, end) {
            log::warn!("Compaction on {} skipped: {}", self.name, e);
        }
    }

    fn try_compact_range<K: Serialize + ?Sized>(&self, begin: &K, end: &K) -> Result<()> {
        let begin = codec::encode_key(begin)?;
        let end = codec::encode_key(end)?;
        self.engine.compact_range(Some(&begin), Some(&end))
    }

    /// Approximate bytes of memory held by the engine.
    pub fn memory_usage(&self) -> usize {
        self.engine.memory_usage()
    }

    /// Returns true if stored values are XOR-masked.
    pub fn is_obfuscated(&self) -> bool {
        !self.obfuscate_key.is_zero()
    }

    /// Data directory for on-disk stores, `"memory"` for in-memory ones.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }
}
