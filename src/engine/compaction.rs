//! VEIL - Compaction Strategy
//! Implements size-tiered compaction to merge overlapping tables
//! and reclaim space from tombstoned deletions.
//!
//! ## Size-Tiered Strategy
//! - Group tables by size tier (base, base * ratio, base * ratio^2, ...)
//! - When N tables accumulate in a tier, merge them into one
//! - Simpler than leveled compaction, good for write-heavy workloads
//!
//! ## Ordering
//! Tables are kept oldest first. A selection is always widened to every
//! table whose key span touches it, so the tables left out share no keys
//! with the merged output and precedence between them cannot change.

use std::collections::BTreeMap;

use crate::types::{Key, Value};

use super::sstable::SSTable;

/// Trait defining a compaction strategy.
pub trait CompactionStrategy {
    /// Select which tables should be compacted together.
    /// Returns positions into `tables`.
    fn select_compaction(&self, tables: &[TableInfo]) -> Option<Vec<usize>>;

    /// Returns the human-readable name of this strategy.
    fn name(&self) -> &str;
}

/// Metadata about a table.
#[derive(Debug, Clone)]
pub struct TableInfo {
    /// Table id.
    pub id: u64,
    /// Size in bytes.
    pub size: u64,
    /// Smallest key in the table.
    pub min_key: Key,
    /// Largest key in the table.
    pub max_key: Key,
}

impl TableInfo {
    /// Describe an open table.
    pub fn from_table(table: &SSTable) -> Self {
        Self {
            id: table.id(),
            size: table.file_size(),
            min_key: table.min_key().cloned().unwrap_or_default(),
            max_key: table.max_key().cloned().unwrap_or_default(),
        }
    }

    /// Check if two tables have overlapping key ranges.
    pub fn overlaps(&self, other: &TableInfo) -> bool {
        self.min_key <= other.max_key && self.max_key >= other.min_key
    }
}

/// Size-tiered compaction strategy.
///
/// ## Algorithm
/// - Tier 0 holds tables up to `base_size`, each next tier is `size_ratio` times larger
/// - When a tier has >= `threshold` tables, compact them together
pub struct SizeTieredCompaction {
    /// Number of tables per tier before triggering compaction.
    threshold: usize,
    /// Size multiplier between tiers.
    size_ratio: u64,
    /// Upper bound of tier 0 in bytes.
    base_size: u64,
}

impl SizeTieredCompaction {
    /// Create a new size-tiered compaction strategy.
    ///
    /// # Arguments
    /// * `threshold` - Number of tables to accumulate before compacting (typically 4)
    /// * `size_ratio` - Multiplier between tiers (typically 10)
    /// * `base_size` - Upper size bound of the first tier (typically the memtable size)
    pub fn new(threshold: usize, size_ratio: u64, base_size: u64) -> Self {
        Self {
            threshold: threshold.max(2),
            size_ratio: size_ratio.max(2),
            base_size: base_size.max(1),
        }
    }

    /// Get the tier level for a given table size.
    fn tier_for_size(&self, size: u64) -> usize {
        let mut tier = 0;
        let mut upper_bound = self.base_size;

        while size > upper_bound {
            tier += 1;
            upper_bound = upper_bound.saturating_mul(self.size_ratio);
        }
        tier
    }
}

impl CompactionStrategy for SizeTieredCompaction {
    fn select_compaction(&self, tables: &[TableInfo]) -> Option<Vec<usize>> {
        if tables.is_empty() {
            return None;
        }

        // Group tables by tier
        let mut tiers: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (idx, table) in tables.iter().enumerate() {
            let tier = self.tier_for_size(table.size);
            tiers.entry(tier).or_default().push(idx);
        }

        // Find the first tier with >= threshold tables
        tiers
            .into_values()
            .find(|positions| positions.len() >= self.threshold)
    }

    fn name(&self) -> &str {
        "SizeTieredCompaction"
    }
}

/// Widen `selected` until no unselected table overlaps any selected one.
/// Returns sorted positions.
pub fn expand_overlapping(tables: &[TableInfo], selected: Vec<usize>) -> Vec<usize> {
    let mut chosen = vec![false; tables.len()];
    for idx in selected {
        if idx < tables.len() {
            chosen[idx] = true;
        }
    }

    loop {
        let mut grew = false;
        for i in 0..tables.len() {
            if chosen[i] {
                continue;
            }
            let touches = tables
                .iter()
                .enumerate()
                .any(|(j, other)| chosen[j] && tables[i].overlaps(other));
            if touches {
                chosen[i] = true;
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }

    chosen
        .iter()
        .enumerate()
        .filter_map(|(i, &c)| c.then_some(i))
        .collect()
}

/// Merge the contents of several tables into one sorted run.
///
/// ## Algorithm
/// 1. Insert entries oldest table first (later tables override earlier)
/// 2. Optionally drop tombstones, only safe when no older table survives
///
/// ## Returns
/// Sorted `(key, value)` pairs; `None` values are tombstones.
pub fn merge_tables(
    tables: Vec<Vec<(Key, Option<Value>)>>,
    drop_tombstones: bool,
) -> Vec<(Key, Option<Value>)> {
    let mut merged = BTreeMap::new();

    for table in tables {
        for (key, value) in table {
            merged.insert(key, value);
        }
    }

    merged
        .into_iter()
        .filter(|(_k, v)| !(drop_tombstones && v.is_none()))
        .collect()
}
