//! VEIL - Typed Key-Value Store
//!
//! A typed adapter over an ordered byte-oriented key-value engine.
//! Keys and values are serialized with serde, stored values can be masked
//! with a per-store XOR key, and writes are grouped into atomic batches.
//!
//! ## Features
//! - **Typed Codec**: serde + bincode, big-endian so integer keys sort numerically
//! - **Obfuscation**: persisted 8-byte XOR mask over stored values (not encryption)
//! - **Write Batches**: atomic commits with a running size estimate
//! - **Iteration**: ordered, snapshot-consistent, typed cursors
//! - **LSM Engine**: WAL, MemTable, immutable tables, value cache, size-tiered compaction
//!
//! ## Example
//! ```no_run
//! use veil::{Config, Store};
//!
//! let store = Store::open(Config::new("./data").with_obfuscation(true)).unwrap();
//!
//! store.write(&"a", &42u32, false).unwrap();
//! assert_eq!(store.read::<_, u32>(&"a").unwrap(), Some(42));
//!
//! let mut batch = store.batch();
//! batch.write(&"b", &99u32).unwrap();
//! batch.erase(&"a").unwrap();
//! store.write_batch(&batch, true).unwrap();
//!
//! let mut it = store.iter().unwrap();
//! it.seek_to_first();
//! while it.valid() {
//!     let key: String = it.key().unwrap();
//!     let value: u32 = it.value().unwrap();
//!     println!("{} -> {}", key, value);
//!     it.next();
//! }
//! ```

pub mod batch;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod iterator;
pub mod obfuscation;
pub mod store;
pub mod types;

pub use batch::WriteBatch;
pub use config::Config;
pub use error::{Result, VeilError};
pub use iterator::DbIterator;
pub use obfuscation::ObfuscateKey;
pub use store::Store;
