//! VEIL - Engine Metrics
//! Lock-free operation counters, readable as a plain snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::memtable::BatchSummary;

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub puts: u64,
    pub deletes: u64,
    /// Committed batches, empty sync batches included.
    pub batches: u64,
    /// Batches committed with fsync.
    pub synced_batches: u64,
    pub gets: u64,
    /// Lookups that found no live value.
    pub get_misses: u64,
    pub cursors: u64,
    pub flushes: u64,
    pub compactions: u64,
    /// Key and value bytes committed.
    pub bytes_written: u64,
    /// Value bytes returned by lookups.
    pub bytes_read: u64,
    /// Batches replayed from the WAL at open.
    pub wal_recoveries: u64,
}

impl MetricsSnapshot {
    /// Mutations plus lookups.
    pub fn total_ops(&self) -> u64 {
        self.puts + self.deletes + self.gets
    }

    /// Fraction of lookups that found a value, 0.0 with no lookups.
    pub fn hit_ratio(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            (self.gets - self.get_misses) as f64 / self.gets as f64
        }
    }
}

/// Counters updated by [`LsmEngine`](super::LsmEngine).
///
/// `Ordering::Relaxed` throughout: the values are observational and
/// never order other memory accesses.
#[derive(Debug)]
pub struct EngineMetrics {
    puts: AtomicU64,
    deletes: AtomicU64,
    batches: AtomicU64,
    synced_batches: AtomicU64,
    gets: AtomicU64,
    get_misses: AtomicU64,
    cursors: AtomicU64,
    flushes: AtomicU64,
    compactions: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    wal_recoveries: AtomicU64,
    opened_at: Instant,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            puts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            synced_batches: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            get_misses: AtomicU64::new(0),
            cursors: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            wal_recoveries: AtomicU64::new(0),
            opened_at: Instant::now(),
        }
    }

    pub fn record_batch(&self, summary: &BatchSummary, synced: bool) {
        bump(&self.batches, 1);
        if synced {
            bump(&self.synced_batches, 1);
        }
        bump(&self.puts, summary.puts as u64);
        bump(&self.deletes, summary.deletes as u64);
        bump(&self.bytes_written, summary.bytes as u64);
    }

    /// `value_size` is `None` for a miss.
    pub fn record_get(&self, value_size: Option<usize>) {
        bump(&self.gets, 1);
        match value_size {
            Some(size) => bump(&self.bytes_read, size as u64),
            None => bump(&self.get_misses, 1),
        }
    }

    pub fn record_cursor(&self) {
        bump(&self.cursors, 1);
    }

    pub fn record_flush(&self) {
        bump(&self.flushes, 1);
    }

    pub fn record_compaction(&self) {
        bump(&self.compactions, 1);
    }

    pub fn record_recovery(&self, batches: usize) {
        bump(&self.wal_recoveries, batches as u64);
    }

    /// Seconds since the engine was opened.
    pub fn uptime_secs(&self) -> f64 {
        self.opened_at.elapsed().as_secs_f64()
    }

    /// Read every counter. Counters are loaded one by one, so a snapshot
    /// taken during writes may mix values from adjacent batches.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            puts: load(&self.puts),
            deletes: load(&self.deletes),
            batches: load(&self.batches),
            synced_batches: load(&self.synced_batches),
            gets: load(&self.gets),
            get_misses: load(&self.get_misses),
            cursors: load(&self.cursors),
            flushes: load(&self.flushes),
            compactions: load(&self.compactions),
            bytes_written: load(&self.bytes_written),
            bytes_read: load(&self.bytes_read),
            wal_recoveries: load(&self.wal_recoveries),
        }
    }

    /// Human-readable summary for the shell's `info` command.
    pub fn report(&self) -> String {
        let s = self.snapshot();
        format!(
            "Writes:\n\
               puts:         {}\n\
               deletes:      {}\n\
               batches:      {} ({} synced)\n\
             Reads:\n\
               gets:         {} ({:.1}% hit)\n\
               cursors:      {}\n\
             Storage:\n\
               flushes:      {}\n\
               compactions:  {}\n\
             I/O:\n\
               written:      {} bytes\n\
               read:         {} bytes\n\
             Recovery:\n\
               wal batches:  {}\n\
             Uptime: {:.2}s",
            s.puts,
            s.deletes,
            s.batches,
            s.synced_batches,
            s.gets,
            s.hit_ratio() * 100.0,
            s.cursors,
            s.flushes,
            s.compactions,
            s.bytes_written,
            s.bytes_read,
            s.wal_recoveries,
            self.uptime_secs(),
        )
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
