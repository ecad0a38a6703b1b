//! VEIL - Integration Tests
//! End-to-end tests through the public store API:
//! open → write → read → batch → iterate → reopen → recovery.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};

use veil::engine::{KvEngine, LsmCursor, LsmEngine, ReadOptions, WriteOptions};
use veil::types::{Mutation, Value};
use veil::{Config, Store, VeilError};

mod common {
    use super::*;

    /// Config pointing at a temporary directory.
    pub fn temp_config(dir: &Path, obfuscate: bool) -> Config {
        Config::new(dir).with_obfuscation(obfuscate)
    }

    /// Engine wrapper that fails on demand.
    pub struct FlakyEngine {
        pub inner: LsmEngine,
        pub fail_reads: AtomicBool,
        pub fail_writes: AtomicBool,
    }

    impl FlakyEngine {
        pub fn new() -> Self {
            Self {
                inner: LsmEngine::open(Config::in_memory()).unwrap(),
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
            }
        }

        fn check(flag: &AtomicBool) -> veil::Result<()> {
            if flag.load(Ordering::SeqCst) {
                Err(VeilError::Engine("injected failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl KvEngine for FlakyEngine {
        type Cursor = LsmCursor;

        fn get(&self, options: &ReadOptions, key: &[u8]) -> veil::Result<Option<Value>> {
            Self::check(&self.fail_reads)?;
            self.inner.get(options, key)
        }

        fn write(&self, options: &WriteOptions, mutations: &[Mutation]) -> veil::Result<()> {
            Self::check(&self.fail_writes)?;
            self.inner.write(options, mutations)
        }

        fn new_cursor(&self, options: &ReadOptions) -> veil::Result<LsmCursor> {
            Self::check(&self.fail_reads)?;
            self.inner.new_cursor(options)
        }

        fn approximate_size(&self, start: &[u8], end: &[u8]) -> veil::Result<u64> {
            self.inner.approximate_size(start, end)
        }

        fn compact_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> veil::Result<()> {
            Self::check(&self.fail_writes)?;
            self.inner.compact_range(start, end)
        }

        fn memory_usage(&self) -> usize {
            self.inner.memory_usage()
        }
    }
}

use common::FlakyEngine;

#[test]
fn test_example_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(common::temp_config(dir.path(), true)).unwrap();
    assert!(store.is_obfuscated());

    store.write(&"a", &42u32, false).unwrap();
    store.write(&"b", &99u32, false).unwrap();
    assert_eq!(store.read::<_, u32>(&"a").unwrap(), Some(42));

    store.erase(&"a", false).unwrap();
    assert!(!store.exists(&"a").unwrap());

    let mut it = store.iter().unwrap();
    it.seek_to_first();
    let mut seen = Vec::new();
    while it.valid() {
        seen.push((it.key::<String>().unwrap(), it.value::<u32>().unwrap()));
        it.next();
    }
    it.status().unwrap();
    assert_eq!(seen, vec![("b".to_string(), 99)]);
}

#[test]
fn test_obfuscation_key_survives_flag_off() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Store::open(common::temp_config(dir.path(), true)).unwrap();
        store.write(&"k", &"masked value", true).unwrap();
    }
    let store = Store::open(common::temp_config(dir.path(), false)).unwrap();
    assert!(store.is_obfuscated());
    assert_eq!(
        store.read::<_, String>(&"k").unwrap().as_deref(),
        Some("masked value")
    );
}

#[test]
fn test_zero_key_survives_flag_on() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Store::open(common::temp_config(dir.path(), false)).unwrap();
        store.write(&"k", &"plain value", true).unwrap();
    }
    let store = Store::open(common::temp_config(dir.path(), true)).unwrap();
    assert!(!store.is_obfuscated());
    assert_eq!(
        store.read::<_, String>(&"k").unwrap().as_deref(),
        Some("plain value")
    );
}

#[test]
fn test_existing_data_without_key_stays_plain() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = LsmEngine::open(Config::new(dir.path())).unwrap();
        let key = veil::codec::encode_key(&"legacy").unwrap();
        let value = veil::codec::encode_value(&7u64).unwrap();
        engine
            .write(&WriteOptions { sync: true }, &[Mutation::put(key, value)])
            .unwrap();
    }
    let store = Store::open(common::temp_config(dir.path(), true)).unwrap();
    assert!(!store.is_obfuscated());
    assert_eq!(store.read::<_, u64>(&"legacy").unwrap(), Some(7));
}

#[test]
fn test_reserved_key_write_keeps_values_intact() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Store::open(common::temp_config(dir.path(), true)).unwrap();
        store.write(&"a", &42u64, true).unwrap();
        let err = store
            .write(&(0u8, *b"obfuscate_key"), &7u64, true)
            .unwrap_err();
        assert!(matches!(err, VeilError::ReservedKey));
        assert!(matches!(
            store.erase(&(0u8, *b"obfuscate_key"), true),
            Err(VeilError::ReservedKey)
        ));
    }
    let store = Store::open(common::temp_config(dir.path(), true)).unwrap();
    assert!(store.is_obfuscated());
    assert_eq!(store.read::<_, u64>(&"a").unwrap(), Some(42));
}

#[test]
fn test_decode_failure_reads_as_absent() {
    let store = Store::open(Config::in_memory().with_obfuscation(true)).unwrap();
    store.write(&"k", &1u8, false).unwrap();
    assert_eq!(store.read::<_, String>(&"k").unwrap(), None);
    assert_eq!(store.read::<_, u64>(&"k").unwrap(), None);
    assert_eq!(store.read::<_, u8>(&"k").unwrap(), Some(1));

    // Bytes written straight into the engine bypass the mask.
    let key = veil::codec::encode_key(&"raw").unwrap();
    store
        .engine()
        .write(&WriteOptions::default(), &[Mutation::put(key, vec![0xff; 3])])
        .unwrap();
    assert_eq!(store.read::<_, String>(&"raw").unwrap(), None);
    assert!(store.exists(&"raw").unwrap());
}

#[test]
fn test_iterator_numeric_order() {
    let store = Store::open(Config::in_memory()).unwrap();
    for k in [256u32, 3, 1, 70_000] {
        store.write(&k, &(k * 2), false).unwrap();
    }

    let mut it = store.iter().unwrap();
    it.seek_to_first();
    let mut keys = Vec::new();
    while it.valid() {
        let k: u32 = it.key().unwrap();
        assert_eq!(it.value::<u32>().unwrap(), k * 2);
        keys.push(k);
        it.next();
    }
    assert_eq!(keys, vec![1, 3, 256, 70_000]);
    assert!(!it.valid());

    it.seek(&2u32).unwrap();
    assert_eq!(it.key::<u32>().unwrap(), 3);
    it.seek(&100_000u32).unwrap();
    assert!(!it.valid());
}

#[test]
fn test_iterator_is_a_snapshot() {
    let store = Store::open(Config::in_memory()).unwrap();
    store.write(&1u32, &"one", false).unwrap();
    let mut it = store.iter().unwrap();
    store.write(&2u32, &"two", false).unwrap();
    store.erase(&1u32, false).unwrap();

    it.seek_to_first();
    assert_eq!(it.key::<u32>().unwrap(), 1);
    it.next();
    assert!(!it.valid());
}

#[test]
fn test_structured_values() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: u64,
        owner: String,
        balance: i64,
        tags: Vec<String>,
    }

    let store = Store::open(Config::in_memory().with_obfuscation(true)).unwrap();
    let account = Account {
        id: 7,
        owner: "alice".to_string(),
        balance: -250,
        tags: vec!["savings".to_string()],
    };
    store.write(&("account", 7u64), &account, false).unwrap();
    assert_eq!(
        store.read::<_, Account>(&("account", 7u64)).unwrap(),
        Some(account)
    );
}

#[test]
fn test_batch_reuse_after_clear() {
    let store = Store::open(Config::in_memory()).unwrap();
    let mut batch = store.batch();

    batch.write(&"a", &1u16).unwrap();
    batch.write(&"b", &2u16).unwrap();
    assert!(batch.size_estimate() > 0);
    store.write_batch(&batch, false).unwrap();

    batch.clear();
    assert_eq!(batch.size_estimate(), 0);
    batch.erase(&"a").unwrap();
    batch.write(&"c", &3u16).unwrap();
    store.write_batch(&batch, true).unwrap();

    assert_eq!(store.read::<_, u16>(&"a").unwrap(), None);
    assert_eq!(store.read::<_, u16>(&"b").unwrap(), Some(2));
    assert_eq!(store.read::<_, u16>(&"c").unwrap(), Some(3));
}

#[test]
fn test_last_write_in_batch_wins() {
    let store = Store::open(Config::in_memory()).unwrap();
    let mut batch = store.batch();
    batch.write(&"k", &"first").unwrap();
    batch.erase(&"k").unwrap();
    batch.write(&"k", &"last").unwrap();
    store.write_batch(&batch, false).unwrap();
    assert_eq!(store.read::<_, String>(&"k").unwrap().as_deref(), Some("last"));
}

#[test]
fn test_foreign_batch_is_rejected() {
    let a = Store::open(Config::in_memory().with_obfuscation(true)).unwrap();
    let b = Store::open(Config::in_memory().with_obfuscation(true)).unwrap();
    let mut batch = a.batch();
    batch.write(&"k", &"v").unwrap();
    assert!(matches!(b.write_batch(&batch, false), Err(VeilError::ForeignBatch)));
    a.write_batch(&batch, false).unwrap();
    assert!(a.exists(&"k").unwrap());
}

#[test]
fn test_failed_commit_applies_nothing() {
    let store = Store::with_engine(FlakyEngine::new(), true).unwrap();
    store.write(&"keep", &1u32, false).unwrap();

    let mut batch = store.batch();
    for i in 0..10u32 {
        batch.write(&i, &i).unwrap();
    }
    batch.erase(&"keep").unwrap();

    store.engine().fail_writes.store(true, Ordering::SeqCst);
    assert!(store.write_batch(&batch, true).is_err());
    assert!(store.write(&"other", &1u32, false).is_err());
    assert!(store.sync().is_err());

    store.engine().fail_writes.store(false, Ordering::SeqCst);
    for i in 0..10u32 {
        assert!(!store.exists(&i).unwrap());
    }
    assert_eq!(store.read::<_, u32>(&"keep").unwrap(), Some(1));

    store.write_batch(&batch, true).unwrap();
    for i in 0..10u32 {
        assert_eq!(store.read::<_, u32>(&i).unwrap(), Some(i));
    }
    assert!(!store.exists(&"keep").unwrap());
}

#[test]
fn test_engine_read_failure_propagates() {
    let store = Store::with_engine(FlakyEngine::new(), false).unwrap();
    store.write(&"k", &"v", false).unwrap();

    store.engine().fail_reads.store(true, Ordering::SeqCst);
    assert!(store.read::<_, String>(&"k").is_err());
    assert!(store.exists(&"k").is_err());
    assert!(store.iter().is_err());
    assert!(store.is_empty().is_err());
}

#[test]
fn test_compact_range_failure_is_swallowed() {
    let store = Store::with_engine(FlakyEngine::new(), false).unwrap();
    store.write(&1u32, &"v", false).unwrap();
    store.engine().fail_writes.store(true, Ordering::SeqCst);
    store.compact_range(&0u32, &10u32);
    store.engine().fail_writes.store(false, Ordering::SeqCst);
    assert!(store.exists(&1u32).unwrap());
}

#[test]
fn test_open_fails_when_sentinel_read_fails() {
    let engine = FlakyEngine::new();
    engine.fail_reads.store(true, Ordering::SeqCst);
    assert!(Store::with_engine(engine, true).is_err());
}

#[test]
fn test_torn_wal_batch_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let wal_path = dir.path().join("veil.wal");
    let committed_len;
    {
        let store = Store::open(common::temp_config(dir.path(), true)).unwrap();
        store.write(&"first", &1u32, true).unwrap();
        committed_len = std::fs::metadata(&wal_path).unwrap().len();

        let mut batch = store.batch();
        batch.write(&"second", &2u32).unwrap();
        batch.write(&"third", &3u32).unwrap();
        store.write_batch(&batch, true).unwrap();
    }

    // Cut the second batch in half, as a crash mid-append would.
    let full_len = std::fs::metadata(&wal_path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
    file.set_len(committed_len + (full_len - committed_len) / 2).unwrap();
    drop(file);

    let store = Store::open(common::temp_config(dir.path(), true)).unwrap();
    assert_eq!(store.read::<_, u32>(&"first").unwrap(), Some(1));
    assert!(!store.exists(&"second").unwrap());
    assert!(!store.exists(&"third").unwrap());

    // The store keeps working after recovery.
    store.write(&"fourth", &4u32, true).unwrap();
    drop(store);
    let store = Store::open(common::temp_config(dir.path(), false)).unwrap();
    assert_eq!(store.read::<_, u32>(&"fourth").unwrap(), Some(4));
}

#[test]
fn test_sync_makes_buffered_writes_durable() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Store::open(common::temp_config(dir.path(), true)).unwrap();
        for i in 0..50u32 {
            store.write(&i, &format!("value-{}", i), false).unwrap();
        }
        store.sync().unwrap();
        assert!(store.flush().is_ok());
    }
    let store = Store::open(common::temp_config(dir.path(), true)).unwrap();
    for i in 0..50u32 {
        assert_eq!(
            store.read::<_, String>(&i).unwrap(),
            Some(format!("value-{}", i))
        );
    }
}

#[test]
fn test_estimate_size_and_compaction_persist() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Store::open(common::temp_config(dir.path(), true)).unwrap();
        for i in 0..200u32 {
            store.write(&i, &vec![i as u8; 100], false).unwrap();
        }
        // Unflushed data is not counted.
        assert_eq!(store.estimate_size(&0u32, &1000u32).unwrap(), 0);

        store.compact_range(&0u32, &1000u32);
        let all = store.estimate_size(&0u32, &1000u32).unwrap();
        let half = store.estimate_size(&0u32, &100u32).unwrap();
        assert!(all > 200 * 100);
        assert!(half > 0 && half < all);

        for i in 0..100u32 {
            store.erase(&i, false).unwrap();
        }
        store.compact_range(&0u32, &1000u32);
        assert_eq!(store.estimate_size(&0u32, &100u32).unwrap(), 0);
    }
    let store = Store::open(common::temp_config(dir.path(), false)).unwrap();
    assert!(store.is_obfuscated());
    assert!(!store.exists(&50u32).unwrap());
    assert_eq!(store.read::<_, Vec<u8>>(&150u32).unwrap(), Some(vec![150u8; 100]));
    assert_eq!(store.engine().table_count().unwrap(), 1);
}

#[test]
fn test_large_values_flush_to_tables() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(common::temp_config(dir.path(), true).with_cache_size(0)).unwrap();
    let big = vec![0xabu8; 20_000];
    for i in 0..10u32 {
        store.write(&i, &big, false).unwrap();
    }
    assert!(store.engine().table_count().unwrap() >= 1);
    for i in 0..10u32 {
        assert_eq!(store.read::<_, Vec<u8>>(&i).unwrap().as_ref(), Some(&big));
    }
}

#[test]
fn test_wipe_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Store::open(common::temp_config(dir.path(), false)).unwrap();
        store.write(&"old", &1u8, true).unwrap();
    }
    // The old zero key is wiped with the data, so obfuscation can start now.
    let store = Store::open(common::temp_config(dir.path(), true).with_wipe(true)).unwrap();
    assert!(store.is_empty().unwrap());
    assert!(!store.exists(&"old").unwrap());
    assert!(store.is_obfuscated());
}

#[test]
fn test_in_memory_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::in_memory().with_obfuscation(true);
    config.data_dir = dir.path().join("never-created");

    let store = Store::open(config).unwrap();
    assert_eq!(store.name(), "memory");
    assert!(store.is_empty().unwrap());
    store.write(&"k", &"v", true).unwrap();
    assert_eq!(store.read::<_, String>(&"k").unwrap().as_deref(), Some("v"));
    assert!(!dir.path().join("never-created").exists());
}

#[test]
fn test_concurrent_readers_and_writers() {
    let store = Arc::new(Store::open(Config::in_memory().with_obfuscation(true)).unwrap());

    let writers: Vec<_> = (0..4u32)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..100u32 {
                    let key = t * 1000 + i;
                    store.write(&key, &key.to_string(), false).unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..20 {
                    let mut it = store.iter().unwrap();
                    it.seek_to_first();
                    let mut last: Option<u32> = None;
                    while it.valid() {
                        let k: u32 = it.key().unwrap();
                        assert!(last.map_or(true, |l| l < k));
                        last = Some(k);
                        it.next();
                    }
                }
            })
        })
        .collect();

    for h in writers.into_iter().chain(readers) {
        h.join().unwrap();
    }

    for t in 0..4u32 {
        for i in 0..100u32 {
            let key = t * 1000 + i;
            assert_eq!(store.read::<_, String>(&key).unwrap(), Some(key.to_string()));
        }
    }
    assert_eq!(store.metrics().snapshot().puts, 401);
}
