//! The store contract consumed by the loader and the index rebuilder, plus
//! an in-memory implementation.
//!
//! The production posting store is an external LSM engine; this module pins
//! down the slice of its API the core depends on: versioned entries carrying
//! a one-byte `user_meta`, a batched writer, a prefix-scoped snapshot scan at
//! a managed read timestamp, and crash-safe prefix drops.
//!
//! [`MemStore`] implements the contract over an ordered map so the rebuilder
//! can stage deltas in a throwaway store and every test can run against a
//! real implementation.

use crate::error::{Error, Result};
use crate::keys::{self, predicate_prefix};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// `user_meta` for a delta batch of postings.
pub const USER_META_DELTA: u8 = 0x01;

/// `user_meta` for a materialized (rolled-up) posting list.
///
/// Both values are a convention shared with the storage engine and must be
/// stable across releases that share data.
pub const USER_META_COMPLETE_POSTING: u8 = 0x02;

/// One write into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub user_meta: u8,
    pub version: u64,
}

/// One stored version of a key, as returned by a snapshot scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub version: u64,
    pub user_meta: u8,
    pub value: Vec<u8>,
}

/// A key with its visible version history, newest first.
#[derive(Debug, Clone)]
pub struct KeyVersions {
    pub key: Vec<u8>,
    pub versions: Vec<Version>,
}

/// The LSM capability set the core consumes.
pub trait Store: Send + Sync {
    /// Apply a batch of entries, each at its own explicit version.
    fn set_entries(&self, entries: Vec<Entry>) -> Result<()>;

    /// Write a single entry at an explicit version.
    fn set_entry_at(&self, key: Vec<u8>, value: Vec<u8>, user_meta: u8, version: u64) -> Result<()> {
        self.set_entries(vec![Entry {
            key,
            value,
            user_meta,
            version,
        }])
    }

    /// Snapshot scan: every key starting with `prefix`, in ascending key
    /// order, with the versions visible at `read_ts` (newest first).
    fn scan_prefix_at(&self, prefix: &[u8], read_ts: u64) -> Result<Vec<KeyVersions>>;

    /// Delete every version of every key under any of `prefixes`.
    fn drop_prefix(&self, prefixes: &[Vec<u8>]) -> Result<()>;

    /// Like [`Store::drop_prefix`] but also blocks concurrent writers for
    /// the duration. Implementations without that distinction fall back to
    /// the plain drop.
    fn drop_prefix_blocking(&self, prefixes: &[Vec<u8>]) -> Result<()> {
        self.drop_prefix(prefixes)
    }

    /// Highest version ever written.
    fn max_version(&self) -> u64;
}

/// Batched writer: the single serialization point in front of a store.
///
/// Buffers entries up to a byte budget and writes them in one call, so the
/// store sees ordered, coalesced writes. Callers must invoke
/// [`BatchWriter::flush`] before dropping; unflushed entries are lost.
pub struct BatchWriter<'a> {
    store: &'a dyn Store,
    buf: Vec<Entry>,
    buf_bytes: usize,
    max_bytes: usize,
}

impl<'a> BatchWriter<'a> {
    /// Default flush threshold.
    pub const DEFAULT_MAX_BYTES: usize = 4 << 20;

    pub fn new(store: &'a dyn Store) -> BatchWriter<'a> {
        BatchWriter {
            store,
            buf: Vec::new(),
            buf_bytes: 0,
            max_bytes: Self::DEFAULT_MAX_BYTES,
        }
    }

    /// Queue a batch of entries, flushing if the buffer crosses the budget.
    pub fn write(&mut self, entries: Vec<Entry>) -> Result<()> {
        for e in entries {
            self.buf_bytes += e.key.len() + e.value.len();
            self.buf.push(e);
        }
        if self.buf_bytes >= self.max_bytes {
            self.flush()?;
        }
        Ok(())
    }

    /// Queue one entry at an explicit version.
    pub fn set_entry_at(&mut self, key: Vec<u8>, value: Vec<u8>, user_meta: u8, version: u64) -> Result<()> {
        self.write(vec![Entry {
            key,
            value,
            user_meta,
            version,
        }])
    }

    /// Write out everything queued.
    pub fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buf);
        self.buf_bytes = 0;
        self.store.set_entries(batch)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Clone)]
struct Cell {
    user_meta: u8,
    value: Vec<u8>,
}

/// Ordered, versioned in-memory store implementing the [`Store`] contract.
///
/// Used as the rebuilder's throwaway staging store and as the primary store
/// in tests. Optionally anchored to a directory so callers can tie its
/// lifetime to a temp dir; nothing is persisted.
pub struct MemStore {
    cells: RwLock<BTreeMap<Vec<u8>, BTreeMap<u64, Cell>>>,
    max_version: AtomicU64,
    pruned: AtomicU64,
    dir: Option<PathBuf>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore {
            cells: RwLock::new(BTreeMap::new()),
            max_version: AtomicU64::new(0),
            pruned: AtomicU64::new(0),
            dir: None,
        }
    }

    /// Open a store anchored at `dir`, creating the directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<MemStore> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(MemStore {
            dir: Some(dir),
            ..MemStore::new()
        })
    }

    /// The anchor directory, if the store was opened against one.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Declare versions below `ts` pruned; reads older than this fail with
    /// `ReadTsTooOld`.
    pub fn set_pruned_ts(&self, ts: u64) {
        self.pruned.store(ts, Ordering::SeqCst);
    }

    /// Every entry in the store, sorted by `(key, version)`. Test surface
    /// for byte-identical comparisons.
    pub fn dump(&self) -> Vec<Entry> {
        let cells = self.cells.read();
        let mut out = Vec::new();
        for (key, versions) in cells.iter() {
            for (&version, cell) in versions.iter() {
                out.push(Entry {
                    key: key.clone(),
                    value: cell.value.clone(),
                    user_meta: cell.user_meta,
                    version,
                });
            }
        }
        out
    }
}

impl Default for MemStore {
    fn default() -> Self {
        MemStore::new()
    }
}

/// Smallest byte string strictly greater than every string starting with
/// `prefix`, or `None` when the prefix is all 0xff.
fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}

impl Store for MemStore {
    fn set_entries(&self, entries: Vec<Entry>) -> Result<()> {
        let mut cells = self.cells.write();
        for e in entries {
            if e.version == 0 {
                return Err(Error::storage("entry version must be non-zero"));
            }
            self.max_version.fetch_max(e.version, Ordering::SeqCst);
            cells.entry(e.key).or_default().insert(
                e.version,
                Cell {
                    user_meta: e.user_meta,
                    value: e.value,
                },
            );
        }
        Ok(())
    }

    fn scan_prefix_at(&self, prefix: &[u8], read_ts: u64) -> Result<Vec<KeyVersions>> {
        let pruned = self.pruned.load(Ordering::SeqCst);
        if read_ts < pruned {
            return Err(Error::ReadTsTooOld {
                read_ts,
                pruned,
            });
        }
        let cells = self.cells.read();
        let range: Box<dyn Iterator<Item = (&Vec<u8>, &BTreeMap<u64, Cell>)>> =
            match prefix_end(prefix) {
                Some(end) => Box::new(cells.range(prefix.to_vec()..end)),
                None => Box::new(cells.range(prefix.to_vec()..)),
            };
        let mut out = Vec::new();
        for (key, versions) in range {
            let visible: Vec<Version> = versions
                .range(..=read_ts)
                .rev()
                .map(|(&version, cell)| Version {
                    version,
                    user_meta: cell.user_meta,
                    value: cell.value.clone(),
                })
                .collect();
            if !visible.is_empty() {
                out.push(KeyVersions {
                    key: key.clone(),
                    versions: visible,
                });
            }
        }
        Ok(out)
    }

    fn drop_prefix(&self, prefixes: &[Vec<u8>]) -> Result<()> {
        let mut cells = self.cells.write();
        for prefix in prefixes {
            let doomed: Vec<Vec<u8>> = match prefix_end(prefix) {
                Some(end) => cells.range(prefix.clone()..end).map(|(k, _)| k.clone()).collect(),
                None => cells.range(prefix.clone()..).map(|(k, _)| k.clone()).collect(),
            };
            for key in doomed {
                cells.remove(&key);
            }
        }
        Ok(())
    }

    fn max_version(&self) -> u64 {
        self.max_version.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Drop helpers
// ============================================================================

/// Delete every key (live and split) for one predicate.
pub fn drop_predicate(store: &dyn Store, attr: &[u8]) -> Result<()> {
    let prefix = predicate_prefix(attr);
    let split = keys::as_split(prefix.clone());
    tracing::info!(
        attr = %String::from_utf8_lossy(keys::attr_name(attr)),
        "dropping predicate"
    );
    store.drop_prefix_blocking(&[prefix, split])
}

/// Delete all data for a namespace, leaving other namespaces untouched.
///
/// Keys are length-prefixed, so a namespace is not a single byte range;
/// the affected predicates are enumerated first.
pub fn drop_namespace_data(store: &dyn Store, namespace: u64) -> Result<()> {
    let everything = store.scan_prefix_at(&[], u64::MAX)?;
    let mut prefixes = Vec::new();
    let mut last_attr: Option<Vec<u8>> = None;
    for kv in everything {
        let Ok(pk) = keys::parse(&kv.key) else { continue };
        if keys::attr_namespace(&pk.attr)? != namespace {
            continue;
        }
        if last_attr.as_deref() == Some(pk.attr.as_slice()) {
            continue;
        }
        prefixes.push(predicate_prefix(&pk.attr));
        prefixes.push(keys::as_split(predicate_prefix(&pk.attr)));
        last_attr = Some(pk.attr);
    }
    if prefixes.is_empty() {
        return Ok(());
    }
    store.drop_prefix_blocking(&prefixes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{data_key, namespace_attr};

    fn entry(key: &[u8], value: &[u8], version: u64) -> Entry {
        Entry {
            key: key.to_vec(),
            value: value.to_vec(),
            user_meta: USER_META_DELTA,
            version,
        }
    }

    #[test]
    fn test_scan_respects_read_ts_and_orders_versions() {
        let store = MemStore::new();
        store.set_entries(vec![
            entry(b"ka", b"v1", 1),
            entry(b"ka", b"v3", 3),
            entry(b"kb", b"v5", 5),
        ])
        .unwrap();

        let scan = store.scan_prefix_at(b"k", 3).unwrap();
        assert_eq!(scan.len(), 1);
        assert_eq!(scan[0].key, b"ka");
        let versions: Vec<u64> = scan[0].versions.iter().map(|v| v.version).collect();
        assert_eq!(versions, vec![3, 1]);

        let scan = store.scan_prefix_at(b"k", 10).unwrap();
        assert_eq!(scan.len(), 2);
    }

    #[test]
    fn test_scan_prefix_is_exact() {
        let store = MemStore::new();
        store.set_entries(vec![entry(b"abc", b"x", 1), entry(b"abd", b"y", 1)]).unwrap();
        let scan = store.scan_prefix_at(b"abc", 10).unwrap();
        assert_eq!(scan.len(), 1);
        assert_eq!(scan[0].key, b"abc");
    }

    #[test]
    fn test_drop_prefix_isolation() {
        let store = MemStore::new();
        let a = namespace_attr(0, "p");
        let b = namespace_attr(0, "q");
        store
            .set_entries(vec![
                entry(&data_key(&a, 1), b"pa", 1),
                entry(&data_key(&b, 1), b"qa", 1),
            ])
            .unwrap();
        let before = store.scan_prefix_at(&predicate_prefix(&b), 10).unwrap();

        store.drop_prefix(&[predicate_prefix(&a)]).unwrap();
        assert!(store.scan_prefix_at(&predicate_prefix(&a), 10).unwrap().is_empty());

        let after = store.scan_prefix_at(&predicate_prefix(&b), 10).unwrap();
        assert_eq!(after.len(), before.len());
        assert_eq!(after[0].versions, before[0].versions);
    }

    #[test]
    fn test_drop_predicate_takes_split_twin() {
        let store = MemStore::new();
        let a = namespace_attr(0, "p");
        let split_key = keys::as_split(data_key(&a, 1));
        store
            .set_entries(vec![
                entry(&data_key(&a, 1), b"live", 1),
                entry(&split_key, b"split", 1),
            ])
            .unwrap();
        drop_predicate(&store, &a).unwrap();
        assert!(store.dump().is_empty());
    }

    #[test]
    fn test_drop_namespace_keeps_other_namespaces(){
        let store = MemStore::new();
        let ns0 = namespace_attr(0, "p");
        let ns7 = namespace_attr(7, "p");
        store
            .set_entries(vec![
                entry(&data_key(&ns0, 1), b"a", 1),
                entry(&data_key(&ns7, 1), b"b", 1),
            ])
            .unwrap();
        drop_namespace_data(&store, 0).unwrap();
        let left = store.dump();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].key, data_key(&ns7, 1));
    }

    #[test]
    fn test_batch_writer_flushes_on_budget() {
        let store = MemStore::new();
        let mut writer = BatchWriter::new(&store);
        writer.max_bytes = 8;
        writer.set_entry_at(b"aaaa".to_vec(), b"bbbb".to_vec(), 0x01, 1).unwrap();
        // Budget crossed: already visible without an explicit flush.
        assert_eq!(store.dump().len(), 1);
        writer.set_entry_at(b"c".to_vec(), b"d".to_vec(), 0x01, 2).unwrap();
        writer.flush().unwrap();
        assert_eq!(store.dump().len(), 2);
    }

    #[test]
    fn test_read_ts_too_old() {
        let store = MemStore::new();
        store.set_entries(vec![entry(b"k", b"v", 9)]).unwrap();
        store.set_pruned_ts(5);
        assert!(store.scan_prefix_at(b"k", 9).is_ok());
        let err = store.scan_prefix_at(b"k", 4).unwrap_err();
        assert!(matches!(err, Error::ReadTsTooOld { .. }));
    }

    #[test]
    fn test_zero_version_rejected() {
        let store = MemStore::new();
        assert!(store.set_entries(vec![entry(b"k", b"v", 0)]).is_err());
    }

    #[test]
    fn test_open_anchors_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemStore::open(tmp.path().join("staging")).unwrap();
        assert!(store.dir().unwrap().exists());
    }
}
