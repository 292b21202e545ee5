//! Loader configuration.

use crate::error::{LoaderError, Result};
use std::path::PathBuf;

/// Sentinel meaning "keep each edge's own namespace".
pub const NAMESPACE_ANY: u64 = u64::MAX;

/// Sub-directory of `tmp_dir` holding the per-shard map files.
pub const MAP_SHARD_DIR: &str = "map_shards";

/// Sub-directory of `tmp_dir` used for arena overflow files.
pub const BUFFER_DIR: &str = "buffers";

/// Configuration for one bulk-load run.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Number of map shards; predicates are hash-partitioned across them.
    pub map_shards: usize,
    /// Per-shard arena byte threshold that triggers a sorted spill.
    pub map_buf_size: usize,
    /// Byte density of partition keys inside each map file header.
    pub partition_buf_size: usize,
    /// Scratch directory for shard files and arena overflow.
    pub tmp_dir: PathBuf,
    /// Force every edge into this namespace, or [`NAMESPACE_ANY`] to keep
    /// the namespace each edge carries.
    pub namespace: u64,
    /// Count malformed edges and keep going instead of aborting.
    pub ignore_errors: bool,
    /// Encryption key handed to the storage engine when opening scratch
    /// stores; never interpreted by the loader itself.
    pub encryption_key: Option<Vec<u8>>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        LoaderOptions {
            map_shards: 8,
            map_buf_size: 64 << 20,
            partition_buf_size: 4 << 20,
            tmp_dir: std::env::temp_dir().join("quarry-load"),
            namespace: NAMESPACE_ANY,
            ignore_errors: false,
            encryption_key: None,
        }
    }
}

impl LoaderOptions {
    /// Validate the options; called once at start-up, failures are fatal.
    pub fn validate(&self) -> Result<()> {
        if self.map_shards == 0 {
            return Err(LoaderError::config("map_shards must be at least 1"));
        }
        if self.map_buf_size == 0 {
            return Err(LoaderError::config("map_buf_size must be non-zero"));
        }
        if self.partition_buf_size == 0 {
            return Err(LoaderError::config("partition_buf_size must be non-zero"));
        }
        if let Some(key) = &self.encryption_key {
            if ![16, 24, 32].contains(&key.len()) {
                return Err(LoaderError::config(format!(
                    "encryption_key must be 16, 24 or 32 bytes, got {}",
                    key.len()
                )));
            }
        }
        Ok(())
    }

    /// Directory for one shard's map files.
    pub fn shard_dir(&self, shard: usize) -> PathBuf {
        self.tmp_dir.join(MAP_SHARD_DIR).join(format!("{shard:03}"))
    }

    /// Directory for arena overflow files.
    pub fn buffer_dir(&self) -> PathBuf {
        self.tmp_dir.join(BUFFER_DIR)
    }
}
