//! VEIL - Storage Engine Module
//! The ordered byte store underneath the typed adapter.
//!
//! [`KvEngine`] and [`EngineCursor`] describe the capabilities the store
//! facade consumes; [`LsmEngine`] is the built-in LSM implementation
//! (MemTable + WAL + immutable tables + size-tiered compaction).

pub mod cache;
pub mod compaction;
pub mod cursor;
pub mod memtable;
pub mod metrics;
pub mod record;
pub mod sstable;
pub mod wal;

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::Config;
use crate::error::{Result, VeilError};
use crate::types::{Key, Mutation, Value};

use self::cache::ValueCache;
use self::compaction::{expand_overlapping, merge_tables, CompactionStrategy, SizeTieredCompaction, TableInfo};
use self::cursor::Source;
use self::memtable::{Lookup, MemTable};
use self::metrics::EngineMetrics;
use self::sstable::SSTable;
use self::wal::WriteAheadLog;

pub use self::cursor::LsmCursor;

/// Options for point reads and cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Verify record checksums on every read.
    pub verify_checksums: bool,
    /// Keep values read from tables in the value cache.
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: false,
            fill_cache: true,
        }
    }
}

/// Options for batch commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Block until the batch is durable on disk.
    pub sync: bool,
}

/// A positioned cursor over an engine's ordered key space.
///
/// `key` and `value` are only meaningful while `valid()` is true.
pub trait EngineCursor {
    /// True if positioned at an entry.
    fn valid(&self) -> bool;

    /// Position at the first entry.
    fn seek_to_first(&mut self);

    /// Position at the first entry whose key is >= `key`.
    fn seek(&mut self, key: &[u8]);

    /// Advance one entry. No-op when not valid.
    fn next(&mut self);

    /// Key of the current entry.
    fn key(&self) -> &[u8];

    /// Raw value of the current entry.
    fn value(&self) -> &[u8];

    /// First error hit while reading, if any.
    fn status(&self) -> Result<()>;
}

/// Ordered byte-oriented key-value engine consumed by the store facade.
pub trait KvEngine: Send + Sync {
    /// Cursor type returned by [`KvEngine::new_cursor`].
    type Cursor: EngineCursor;

    /// Point lookup. `Ok(None)` means the key is absent.
    fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Value>>;

    /// Atomically apply `mutations` in order. Either all become visible or none.
    fn write(&self, options: &WriteOptions, mutations: &[Mutation]) -> Result<()>;

    /// Create a cursor over a consistent snapshot.
    fn new_cursor(&self, options: &ReadOptions) -> Result<Self::Cursor>;

    /// True if any live key other than `except` exists. Stops at the
    /// first one found.
    fn has_key_besides(&self, options: &ReadOptions, except: &[u8]) -> Result<bool> {
        let mut cursor = self.new_cursor(options)?;
        cursor.seek_to_first();
        while cursor.valid() && cursor.key() == except {
            cursor.next();
        }
        cursor.status()?;
        Ok(cursor.valid())
    }

    /// Approximate stored bytes for keys in `[start, end)`.
    fn approximate_size(&self, start: &[u8], end: &[u8]) -> Result<u64>;

    /// Compact the key range `[start, end]`; `None` bounds are open.
    fn compact_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<()>;

    /// Approximate bytes of memory held by the engine.
    fn memory_usage(&self) -> usize;
}

/// Mutable engine state guarded by one lock.
struct EngineState {
    /// In-memory sorted buffer for recent writes.
    memtable: MemTable,
    /// Tables ordered oldest first.
    tables: Vec<Arc<SSTable>>,
    /// Id for the next table written.
    next_table_id: u64,
}

/// The built-in LSM storage engine.
///
/// ## Concurrency Model
/// - Writers serialize on the WAL mutex, then take the state write lock
/// - Readers and cursors only take the state read lock
pub struct LsmEngine {
    /// Engine configuration.
    config: Config,
    /// Data directory, `None` in in-memory mode.
    dir: Option<PathBuf>,
    /// Write-ahead log, `None` in in-memory mode. Also serializes writers.
    wal: Mutex<Option<WriteAheadLog>>,
    state: RwLock<EngineState>,
    cache: Arc<ValueCache>,
    strategy: SizeTieredCompaction,
    metrics: EngineMetrics,
}

impl LsmEngine {
    const WAL_FILENAME: &'static str = "veil.wal";
    const COMPACTION_THRESHOLD: usize = 4;
    const COMPACTION_SIZE_RATIO: u64 = 10;

    /// Open or create an engine as described by `config`.
    ///
    /// On startup:
    /// 1. Wipe the data directory if requested
    /// 2. Load existing tables, oldest first
    /// 3. Replay the WAL into the MemTable
    pub fn open(config: Config) -> Result<Self> {
        let metrics = EngineMetrics::new();
        let cache = Arc::new(ValueCache::new(config.block_cache_size()));
        let strategy = SizeTieredCompaction::new(
            Self::COMPACTION_THRESHOLD,
            Self::COMPACTION_SIZE_RATIO,
            config.memtable_max_size() as u64,
        );

        if config.in_memory {
            log::info!("Opening in-memory store");
            return Ok(Self {
                config,
                dir: None,
                wal: Mutex::new(None),
                state: RwLock::new(EngineState {
                    memtable: MemTable::new(),
                    tables: Vec::new(),
                    next_table_id: 1,
                }),
                cache,
                strategy,
                metrics,
            });
        }

        if config.wipe {
            Self::wipe(&config.data_dir)?;
        }
        config.ensure_dirs()?;

        let dir = config.data_dir.clone();
        let tables = Self::load_tables(&dir)?;
        let next_table_id = tables.last().map_or(1, |t| t.id() + 1);

        let wal_path = dir.join(Self::WAL_FILENAME);
        let (memtable, stats) = WriteAheadLog::recover(&wal_path)?;
        let wal = WriteAheadLog::open(wal_path)?;
        metrics.record_recovery(stats.batches);

        log::info!(
            "Opened store at {:?} ({} tables, {} WAL batches / {} mutations recovered)",
            dir,
            tables.len(),
            stats.batches,
            stats.mutations
        );

        Ok(Self {
            config,
            dir: Some(dir),
            wal: Mutex::new(Some(wal)),
            state: RwLock::new(EngineState {
                memtable,
                tables,
                next_table_id,
            }),
            cache,
            strategy,
            metrics,
        })
    }

    fn wipe(dir: &Path) -> Result<()> {
        match fs::remove_dir_all(dir) {
            Ok(()) => {
                log::info!("Wiped store data in {:?}", dir);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_tables(dir: &Path) -> Result<Vec<Arc<SSTable>>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(".tmp") {
                log::warn!("Removing unfinished table file {:?}", path);
                fs::remove_file(&path)?;
            } else if let Some(id) = sstable::parse_file_name(name) {
                found.push((id, path));
            }
        }
        found.sort_by_key(|(id, _)| *id);

        found
            .into_iter()
            .map(|(id, path)| SSTable::open(id, path).map(Arc::new))
            .collect()
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the engine metrics.
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Number of tables currently live.
    pub fn table_count(&self) -> Result<usize> {
        Ok(self.read_state()?.tables.len())
    }

    /// Approximate MemTable size in bytes.
    pub fn memtable_size(&self) -> Result<usize> {
        Ok(self.read_state()?.memtable.size())
    }

    /// Flush the MemTable to a new table now, regardless of its size.
    pub fn flush_memtable(&self) -> Result<()> {
        let mut wal = self.lock_wal()?;
        let mut state = self.write_state()?;
        self.flush_locked(wal.as_mut(), &mut state)
    }

    fn lock_wal(&self) -> Result<MutexGuard<'_, Option<WriteAheadLog>>> {
        self.wal
            .lock()
            .map_err(|e| VeilError::LockPoisoned(format!("WAL lock poisoned: {}", e)))
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, EngineState>> {
        self.state
            .read()
            .map_err(|e| VeilError::LockPoisoned(format!("state lock poisoned: {}", e)))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, EngineState>> {
        self.state
            .write()
            .map_err(|e| VeilError::LockPoisoned(format!("state lock poisoned: {}", e)))
    }

    /// Write the MemTable out as a table and truncate the WAL.
    /// Caller holds the WAL mutex and the state write lock.
    fn flush_locked(&self, wal: Option<&mut WriteAheadLog>, state: &mut EngineState) -> Result<()> {
        if state.memtable.is_empty() {
            return Ok(());
        }

        // With no older tables a tombstone has nothing left to shadow.
        let entries = state.memtable.to_sorted_vec(!state.tables.is_empty());

        if !entries.is_empty() {
            let id = state.next_table_id;
            state.next_table_id += 1;
            let count = entries.len();
            let table = SSTable::build(id, self.dir.as_deref(), entries)?;
            log::info!(
                "Flushed MemTable to table {} ({} entries, {} bytes)",
                id,
                count,
                table.file_size()
            );
            state.tables.push(Arc::new(table));
        }
        state.memtable.clear();
        if let Some(wal) = wal {
            wal.truncate()?;
        }
        self.metrics.record_flush();

        self.maybe_compact(state)
    }

    fn maybe_compact(&self, state: &mut EngineState) -> Result<()> {
        let infos: Vec<TableInfo> = state.tables.iter().map(|t| TableInfo::from_table(t)).collect();
        if let Some(selected) = self.strategy.select_compaction(&infos) {
            log::debug!("{} selected {} tables", self.strategy.name(), selected.len());
            let positions = expand_overlapping(&infos, selected);
            self.compact_tables(state, &positions)?;
        }
        Ok(())
    }

    /// Merge the tables at `positions` (ascending) into one.
    fn compact_tables(&self, state: &mut EngineState, positions: &[usize]) -> Result<()> {
        if positions.is_empty() {
            return Ok(());
        }

        let drop_tombstones = positions.len() == state.tables.len();
        let inputs = positions
            .iter()
            .map(|&p| state.tables[p].entries(true))
            .collect::<Result<Vec<_>>>()?;
        let merged = merge_tables(inputs, drop_tombstones);

        let output = if merged.is_empty() {
            None
        } else {
            let id = state.next_table_id;
            state.next_table_id += 1;
            Some(Arc::new(SSTable::build(id, self.dir.as_deref(), merged)?))
        };

        let mut kept = Vec::with_capacity(state.tables.len());
        let mut removed = Vec::with_capacity(positions.len());
        for (i, table) in state.tables.drain(..).enumerate() {
            if positions.contains(&i) {
                removed.push(table);
            } else {
                kept.push(table);
            }
        }
        // Unselected tables share no keys with the output, so its position is free.
        kept.extend(output);
        state.tables = kept;

        for table in &removed {
            if let Err(e) = table.remove_file() {
                log::warn!("Failed to remove compacted table {}: {}", table.id(), e);
            }
        }
        self.metrics.record_compaction();
        log::info!(
            "Compacted {} tables into {} ({} live tables)",
            removed.len(),
            state.tables.last().map_or(0, |t| t.id()),
            state.tables.len()
        );
        Ok(())
    }
}

impl KvEngine for LsmEngine {
    type Cursor = LsmCursor;

    /// Search order: MemTable, then tables newest to oldest.
    fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Value>> {
        let state = self.read_state()?;
        let value = match state.memtable.lookup(key) {
            Some(Lookup::Found(value)) => Some(value.clone()),
            Some(Lookup::Deleted) => None,
            None => {
                let mut found = None;
                for table in state.tables.iter().rev() {
                    if let Some(entry) =
                        table.get(key, options.verify_checksums, &self.cache, options.fill_cache)?
                    {
                        found = entry;
                        break;
                    }
                }
                found
            }
        };
        self.metrics.record_get(value.as_ref().map(|v| v.len()));
        Ok(value)
    }

    /// The write path: WAL (disk) -> MemTable (memory).
    /// A batch that fails to reach the WAL is never applied.
    fn write(&self, options: &WriteOptions, mutations: &[Mutation]) -> Result<()> {
        let mut wal = self.lock_wal()?;
        let sync = options.sync || self.config.sync_writes;

        if let Some(writer) = wal.as_mut() {
            if mutations.is_empty() {
                if sync {
                    writer.sync()?;
                }
            } else {
                writer.append_batch(mutations, sync)?;
            }
        }

        let mut state = self.write_state()?;
        let summary = state.memtable.apply_batch(mutations);
        self.metrics.record_batch(&summary, sync && wal.is_some());

        if state.memtable.size() >= self.config.memtable_max_size() {
            // The batch is already durable in the WAL; a failed flush leaves
            // it in the MemTable and is retried on the next write.
            if let Err(e) = self.flush_locked(wal.as_mut(), &mut state) {
                log::error!("MemTable flush failed: {}", e);
            }
        }
        Ok(())
    }

    fn new_cursor(&self, options: &ReadOptions) -> Result<LsmCursor> {
        let state = self.read_state()?;
        let mut merged: BTreeMap<Key, Option<Source>> = BTreeMap::new();

        for table in &state.tables {
            for (key, handle) in table.handles() {
                let source = (!handle.tombstone).then(|| Source::Table(Arc::clone(table), *handle));
                merged.insert(key.clone(), source);
            }
        }
        for (key, value) in state.memtable.iter() {
            merged.insert(key.clone(), value.map(|v| Source::Memory(Arc::clone(v))));
        }

        let entries = merged
            .into_iter()
            .filter_map(|(key, source)| source.map(|s| (key, s)))
            .collect();
        self.metrics.record_cursor();
        Ok(LsmCursor::new(entries, *options, Arc::clone(&self.cache)))
    }

    /// Walks the MemTable, then tables newest first, without building a
    /// snapshot. A table key counts only if nothing newer shadows it.
    fn has_key_besides(&self, _options: &ReadOptions, except: &[u8]) -> Result<bool> {
        let state = self.read_state()?;
        if state.memtable.has_live_key_besides(except) {
            return Ok(true);
        }
        for (i, table) in state.tables.iter().enumerate().rev() {
            let newer = &state.tables[i + 1..];
            let live = table.handles().iter().any(|(key, handle)| {
                !handle.tombstone
                    && key.as_slice() != except
                    && !state.memtable.contains_key(key)
                    && !newer.iter().any(|t| t.handles().contains_key(key))
            });
            if live {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Counts bytes in tables only; unflushed MemTable data is not included.
    fn approximate_size(&self, start: &[u8], end: &[u8]) -> Result<u64> {
        let state = self.read_state()?;
        Ok(state
            .tables
            .iter()
            .map(|t| t.approximate_size(start, end))
            .sum())
    }

    fn compact_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let mut wal = self.lock_wal()?;
        let mut state = self.write_state()?;
        self.flush_locked(wal.as_mut(), &mut state)?;

        let infos: Vec<TableInfo> = state.tables.iter().map(|t| TableInfo::from_table(t)).collect();
        let selected: Vec<usize> = state
            .tables
            .iter()
            .enumerate()
            .filter(|(_, t)| t.overlaps(start, end))
            .map(|(i, _)| i)
            .collect();
        if selected.is_empty() {
            return Ok(());
        }
        let positions = expand_overlapping(&infos, selected);
        self.compact_tables(&mut state, &positions)
    }

    fn memory_usage(&self) -> usize {
        let memtable = self.read_state().map(|s| s.memtable.size()).unwrap_or(0);
        memtable + self.cache.usage()
    }
}
