//! Load progress counters, shared across the pipeline threads.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters incremented as the mapper chews through its input.
#[derive(Debug, Default)]
pub struct Progress {
    /// Edges handed to the processor.
    pub edge_count: AtomicU64,
    /// Map entries produced (forward + index + inverse).
    pub map_entry_count: AtomicU64,
    /// Malformed edges dropped under `ignore_errors`.
    pub error_count: AtomicU64,
    /// Shard files written.
    pub shard_file_count: AtomicU64,
}

impl Progress {
    pub fn new() -> Progress {
        Progress::default()
    }

    pub fn edges(&self) -> u64 {
        self.edge_count.load(Ordering::Relaxed)
    }

    pub fn map_entries(&self) -> u64 {
        self.map_entry_count.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn shard_files(&self) -> u64 {
        self.shard_file_count.load(Ordering::Relaxed)
    }
}
