//! Per-partition offset watermarks
//!
//! A Kafka commit is cumulative: committing offset N settles every earlier
//! offset of the partition. Workers finish out of order and a failed message
//! is never acknowledged, so the committable position is the lowest offset
//! that has not been acknowledged yet, not the latest acknowledged one.
//!
//! ```text
//! delivered:  5  6  7  8
//! acked:         ✓     ✓      → commit stays at 5
//! ack 5:      ✓  ✓     ✓      → commit 7
//! ```

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// Tracks delivered and acknowledged offsets for every partition
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: Mutex<HashMap<i32, BTreeMap<i64, bool>>>,
}

impl OffsetTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivered offset as outstanding
    ///
    /// An offset at or below one already tracked means the partition was
    /// rewound (rebalance or seek), so its earlier state is discarded.
    pub fn track(&self, partition: i32, offset: i64) {
        let mut partitions = self.partitions.lock();
        let outstanding = partitions.entry(partition).or_default();
        if outstanding
            .last_key_value()
            .is_some_and(|(&last, _)| offset <= last)
        {
            outstanding.clear();
        }
        outstanding.insert(offset, false);
    }

    /// Mark an offset acknowledged
    ///
    /// Returns the offset to commit when the partition's low watermark moved,
    /// i.e. one past the last offset of the contiguous acknowledged prefix.
    /// Untracked offsets are ignored.
    pub fn settle(&self, partition: i32, offset: i64) -> Option<i64> {
        let mut partitions = self.partitions.lock();
        let outstanding = partitions.get_mut(&partition)?;
        *outstanding.get_mut(&offset)? = true;

        let mut committed = None;
        while let Some(entry) = outstanding.first_entry() {
            if !*entry.get() {
                break;
            }
            committed = Some(*entry.key() + 1);
            entry.remove();
        }
        committed
    }

    /// Offsets delivered but not yet committable on a partition
    pub fn pending(&self, partition: i32) -> usize {
        self.partitions
            .lock()
            .get(&partition)
            .map_or(0, BTreeMap::len)
    }
}
