//! Index rebuild orchestration.
//!
//! A schema change descriptor decides, per index kind, whether the index is
//! left alone, deleted, or deleted and rebuilt. Rebuilds run in two passes
//! against a throwaway store inside a temp directory:
//!
//! 1. **Deltas**: stream the predicate's data keys at `start_ts`,
//!    reconstruct each posting list, run the per-key generator into a
//!    staging transaction, and flush its deltas into the throwaway store,
//!    every delta at its own monotonically counted version.
//! 2. **Rollup**: stream the throwaway store at the final counter value
//!    and materialize each delta list into a complete posting list.
//!
//! Rollups are staged alongside the deltas and committed to the primary
//! store in a final step, all at the single version `start_ts`: readers
//! below `start_ts` keep seeing the pre-rebuild index, readers at or above
//! it see the new one, and a cancellation before the commit leaves the
//! primary store byte-identical (the temp directory is removed either way).
//!
//! Transient errors from the generator are retried with exponential backoff
//! from a 10 ms base, bounded, with cancellation checked between attempts.

use crate::cancel::CancelToken;
use crate::error::{IndexerError, Result};
use crate::stream::{orchestrate, StreamConfig};
use crate::txn::{is_indexable, Txn};
use quarry_db_core::keys::{
    self, as_split, count_prefix, data_key, data_prefix, index_prefix_for_tokenizer,
};
use quarry_db_core::posting::{Op, Posting, PostingList, VALUE_EDGE_UID};
use quarry_db_core::storage::{
    BatchWriter, Entry, MemStore, Store, USER_META_COMPLETE_POSTING, USER_META_DELTA,
};
use quarry_db_core::tok::{get_tokenizer, get_tokenizers};
use quarry_db_core::util::fingerprint64;
use quarry_db_core::{Error as CoreError, SchemaUpdate};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const RETRY_BASE: Duration = Duration::from_millis(10);
const RETRY_MAX_ATTEMPTS: u32 = 16;

/// What to do with one index kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOp {
    /// Index should be left alone.
    Noop,
    /// Index should be deleted.
    Delete,
    /// Index should be deleted and rebuilt.
    Rebuild,
}

/// Tokenized-index decision plus the tokenizers it affects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokRebuildInfo {
    pub op: IndexOp,
    pub tokenizers_to_delete: Vec<String>,
    pub tokenizers_to_rebuild: Vec<String>,
}

impl TokRebuildInfo {
    fn noop() -> TokRebuildInfo {
        TokRebuildInfo {
            op: IndexOp::Noop,
            tokenizers_to_delete: Vec::new(),
            tokenizers_to_rebuild: Vec::new(),
        }
    }
}

/// Descriptor of one schema change driving a rebuild.
#[derive(Debug, Clone)]
pub struct IndexRebuild {
    /// Namespaced attribute whose indexes change.
    pub attr: Vec<u8>,
    /// Logical timestamp the new index becomes visible at.
    pub start_ts: u64,
    /// Schema before the change; `None` for a brand-new predicate.
    pub old_schema: Option<SchemaUpdate>,
    /// Schema after the change.
    pub current_schema: SchemaUpdate,
}

impl IndexRebuild {
    fn old(&self) -> SchemaUpdate {
        self.old_schema.clone().unwrap_or_else(SchemaUpdate::initial)
    }

    /// Tokenized-index decision table.
    pub fn needs_tok_index_rebuild(&self) -> TokRebuildInfo {
        let old = self.old();
        let curr_indexed = self.current_schema.is_indexed();
        let prev_indexed = old.is_indexed();

        if !curr_indexed && !prev_indexed {
            return TokRebuildInfo::noop();
        }
        if !curr_indexed {
            return TokRebuildInfo {
                op: IndexOp::Delete,
                tokenizers_to_delete: old.tokenizers.clone(),
                tokenizers_to_rebuild: Vec::new(),
            };
        }
        if self.current_schema.value_type != old.value_type {
            // Token bytes depend on the value type: everything goes.
            return TokRebuildInfo {
                op: IndexOp::Rebuild,
                tokenizers_to_delete: old.tokenizers.clone(),
                tokenizers_to_rebuild: self.current_schema.tokenizers.clone(),
            };
        }

        let added: Vec<String> = self
            .current_schema
            .tokenizers
            .iter()
            .filter(|t| !old.tokenizers.contains(t))
            .cloned()
            .collect();
        let removed: Vec<String> = old
            .tokenizers
            .iter()
            .filter(|t| !self.current_schema.tokenizers.contains(t))
            .cloned()
            .collect();
        if added.is_empty() && removed.is_empty() {
            return TokRebuildInfo::noop();
        }
        TokRebuildInfo {
            op: IndexOp::Rebuild,
            tokenizers_to_delete: removed,
            tokenizers_to_rebuild: added,
        }
    }

    /// Count-index decision table.
    pub fn needs_count_index_rebuild(&self) -> IndexOp {
        let old = self.old();
        if self.current_schema.count == old.count {
            return IndexOp::Noop;
        }
        if !self.current_schema.count {
            return IndexOp::Delete;
        }
        IndexOp::Rebuild
    }

    /// True when the predicate turned from scalar into list. List→scalar
    /// is rejected at schema validation and double-checked here.
    pub fn needs_list_type_rebuild(&self) -> Result<bool> {
        let Some(old) = &self.old_schema else {
            return Ok(false);
        };
        if self.current_schema.list && !old.list {
            return Ok(true);
        }
        if old.list && !self.current_schema.list {
            return Err(IndexerError::Core(CoreError::schema(format!(
                "type can't be changed from list to scalar for attr {:?} without dropping it first",
                String::from_utf8_lossy(keys::attr_name(&self.attr))
            ))));
        }
        Ok(false)
    }

    /// True when any index kind must be rebuilt.
    pub fn needs_index_rebuild(&self) -> bool {
        self.needs_tok_index_rebuild().op == IndexOp::Rebuild
            || self.needs_count_index_rebuild() == IndexOp::Rebuild
    }

    /// The schema servable while the rebuild runs: the current schema minus
    /// the tokenizers being deleted, with `count` off while the count index
    /// is being rebuilt.
    pub fn query_schema(&self) -> SchemaUpdate {
        let mut interim = self.current_schema.clone();
        let info = self.needs_tok_index_rebuild();
        interim
            .tokenizers
            .retain(|t| !info.tokenizers_to_delete.contains(t) && !info.tokenizers_to_rebuild.contains(t));
        if self.needs_count_index_rebuild() == IndexOp::Rebuild {
            interim.count = false;
        }
        interim
    }

    /// Byte prefixes the drop phase removes, split twins included.
    pub fn prefixes_to_drop(&self) -> Result<Vec<Vec<u8>>> {
        let mut prefixes = Vec::new();
        let info = self.needs_tok_index_rebuild();
        if info.op != IndexOp::Noop {
            for name in info.tokenizers_to_delete.iter().chain(&info.tokenizers_to_rebuild) {
                let tokenizer = get_tokenizer(name).ok_or_else(|| {
                    IndexerError::Core(CoreError::schema(format!("unknown tokenizer {name:?}")))
                })?;
                let prefix = index_prefix_for_tokenizer(&self.attr, tokenizer.id());
                prefixes.push(as_split(prefix.clone()));
                prefixes.push(prefix);
            }
        }
        if self.needs_count_index_rebuild() != IndexOp::Noop {
            let prefix = count_prefix(&self.attr);
            prefixes.push(as_split(prefix.clone()));
            prefixes.push(prefix);
        }
        Ok(prefixes)
    }

    /// Drop phase: blocking range delete of every affected prefix.
    pub fn drop_indexes(&self, primary: &dyn Store) -> Result<()> {
        let prefixes = self.prefixes_to_drop()?;
        if prefixes.is_empty() {
            return Ok(());
        }
        tracing::info!(
            attr = %String::from_utf8_lossy(keys::attr_name(&self.attr)),
            prefixes = prefixes.len(),
            "deleting indexes"
        );
        primary
            .drop_prefix_blocking(&prefixes)
            .map_err(IndexerError::Core)
    }

    /// Data-shape migration (scalar → list), run before index rebuilds.
    pub fn build_data(
        &self,
        primary: &dyn Store,
        tmp_parent: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        if !self.needs_list_type_rebuild()? {
            return Ok(());
        }
        tracing::info!(
            attr = %String::from_utf8_lossy(keys::attr_name(&self.attr)),
            "rebuilding value uids for list transition"
        );
        let attr = self.attr.clone();
        self.rebuilder(tmp_parent).run(primary, cancel, move |uid, list, txn| {
            let Some(sentinel) = list.find(VALUE_EDGE_UID) else {
                return Ok(());
            };
            let value = sentinel
                .value
                .clone()
                .ok_or_else(|| CoreError::parse("value edge without a payload"))?;
            // Retire the sentinel, re-insert under the fingerprinted uid.
            let key = data_key(&attr, uid);
            txn.add_mutation(&key, Posting::reference(VALUE_EDGE_UID).deleted());
            txn.add_mutation(&key, Posting::value(fingerprint64(&value), value));
            Ok(())
        })
    }

    /// Rebuild whichever indexes the decision tables call for.
    pub fn build_indexes(
        &self,
        primary: &dyn Store,
        tmp_parent: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.rebuild_tok_index(primary, tmp_parent, cancel)?;
        self.rebuild_count_index(primary, tmp_parent, cancel)
    }

    fn rebuild_tok_index(
        &self,
        primary: &dyn Store,
        tmp_parent: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        let info = self.needs_tok_index_rebuild();
        if info.op != IndexOp::Rebuild || info.tokenizers_to_rebuild.is_empty() {
            return Ok(());
        }
        tracing::info!(
            attr = %String::from_utf8_lossy(keys::attr_name(&self.attr)),
            tokenizers = ?info.tokenizers_to_rebuild,
            "rebuilding tokenized index"
        );
        let tokenizers = get_tokenizers(&info.tokenizers_to_rebuild)?;
        let value_type = self.current_schema.value_type;
        let attr = self.attr.clone();
        self.rebuilder(tmp_parent).run(primary, cancel, move |uid, list, txn| {
            for posting in &list.postings {
                if !is_indexable(posting) {
                    continue;
                }
                let value = posting.value.as_deref().expect("indexable implies value");
                txn.add_index_mutations(&attr, uid, value, Op::Set, &tokenizers, value_type)?;
            }
            Ok(())
        })
    }

    fn rebuild_count_index(
        &self,
        primary: &dyn Store,
        tmp_parent: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        if self.needs_count_index_rebuild() != IndexOp::Rebuild {
            return Ok(());
        }
        tracing::info!(
            attr = %String::from_utf8_lossy(keys::attr_name(&self.attr)),
            "rebuilding count index"
        );
        let attr = self.attr.clone();
        self.rebuilder(tmp_parent).run(primary, cancel, move |uid, list, txn| {
            let size = list.len();
            if size == 0 {
                return Ok(());
            }
            txn.add_count_mutation(&attr, uid, size as u32, Op::Set);
            Ok(())
        })
    }

    fn rebuilder<'a>(&'a self, tmp_parent: &'a Path) -> Rebuilder<'a> {
        Rebuilder {
            attr: &self.attr,
            prefix: data_prefix(&self.attr),
            start_ts: self.start_ts,
            tmp_parent,
        }
    }
}

/// Top-level rebuild driver: validate the shape transition, drop obsolete
/// prefixes, migrate data, rebuild indexes.
pub fn run_rebuild(
    rb: &IndexRebuild,
    primary: &dyn Store,
    tmp_parent: &Path,
    cancel: &CancelToken,
) -> Result<()> {
    // Surfaces the list→scalar violation before anything is dropped.
    rb.needs_list_type_rebuild()?;
    rb.drop_indexes(primary)?;
    rb.build_data(primary, tmp_parent, cancel)?;
    rb.build_indexes(primary, tmp_parent, cancel)
}

// ============================================================================
// Two-pass rebuilder
// ============================================================================

struct Rebuilder<'a> {
    attr: &'a [u8],
    prefix: Vec<u8>,
    start_ts: u64,
    tmp_parent: &'a Path,
}

impl Rebuilder<'_> {
    /// Run the delta → rollup pipeline with `per_key` as the generator.
    fn run<F>(&self, primary: &dyn Store, cancel: &CancelToken, per_key: F) -> Result<()>
    where
        F: Fn(u64, &PostingList, &mut Txn) -> Result<()> + Send + Sync,
    {
        let attr_name = String::from_utf8_lossy(keys::attr_name(self.attr)).into_owned();
        if self.start_ts == 0 {
            tracing::info!(attr = %attr_name, "start_ts is 0, no indexing work");
            return Ok(());
        }

        std::fs::create_dir_all(self.tmp_parent)?;
        let tmp_dir = tempfile::Builder::new()
            .prefix("quarry_index_")
            .tempdir_in(self.tmp_parent)?;
        tracing::debug!(attr = %attr_name, tmp = %tmp_dir.path().display(), "rebuild staging");

        let delta_store = MemStore::open(tmp_dir.path().join("delta"))?;
        let rollup_store = MemStore::open(tmp_dir.path().join("rollup"))?;

        // Counter starts at 1 so the pass-2 stream timestamp is non-zero
        // even when pass 1 finds no keys. Every delta gets a distinct,
        // monotonic version.
        let counter = AtomicU64::new(1);

        // Pass 1: data keys → per-key deltas in the throwaway store.
        orchestrate(
            primary,
            &delta_store,
            StreamConfig {
                prefix: &self.prefix,
                read_ts: self.start_ts,
                pool_size: None,
                log_prefix: "rebuild:deltas",
            },
            cancel,
            |key, versions| {
                let parsed = keys::parse(key).map_err(IndexerError::Core)?;
                let list = PostingList::from_versions(versions).map_err(IndexerError::Core)?;
                let txn = retry_transient(cancel, || {
                    let mut txn = Txn::new(self.start_ts);
                    per_key(parsed.uid(), &list, &mut txn)?;
                    Ok(txn)
                })?;
                let entries = txn
                    .into_deltas()
                    .into_iter()
                    .map(|(key, value)| Entry {
                        key,
                        value,
                        user_meta: USER_META_DELTA,
                        version: counter.fetch_add(1, Ordering::SeqCst) + 1,
                    })
                    .collect();
                Ok(entries)
            },
        )?;

        // Pass 2: roll every delta list up into a materialized posting
        // list, staged at the single visibility timestamp.
        let final_counter = counter.load(Ordering::SeqCst).max(2);
        orchestrate(
            &delta_store,
            &rollup_store,
            StreamConfig {
                prefix: &[],
                read_ts: final_counter,
                pool_size: None,
                log_prefix: "rebuild:rollup",
            },
            cancel,
            |key, versions| {
                let mut list = PostingList::from_versions(versions).map_err(IndexerError::Core)?;
                if list.is_empty() {
                    return Ok(Vec::new());
                }
                // Staging versions depend on worker scheduling; the
                // committed postings all carry the visibility timestamp so
                // identical inputs produce byte-identical rollups.
                for posting in &mut list.postings {
                    posting.ts = self.start_ts;
                }
                Ok(vec![Entry {
                    key: key.to_vec(),
                    value: list.rollup(),
                    user_meta: USER_META_COMPLETE_POSTING,
                    version: self.start_ts,
                }])
            },
        )?;

        // Commit: the staged rollups move to the primary store in one
        // uncancellable step, so a cancellation anywhere above leaves the
        // primary untouched.
        cancel.check()?;
        let rollups = rollup_store.dump();
        let written = rollups.len();
        let mut writer = BatchWriter::new(primary);
        for entry in rollups {
            writer.write(vec![entry]).map_err(IndexerError::Core)?;
        }
        writer.flush().map_err(IndexerError::Core)?;
        tracing::info!(attr = %attr_name, keys = written, ts = self.start_ts, "rebuild committed");
        Ok(())
    }
}

/// Retry `attempt` while it reports the transient signal, sleeping with
/// exponential backoff from [`RETRY_BASE`] and honoring cancellation
/// between attempts.
fn retry_transient<T, F>(cancel: &CancelToken, attempt: F) -> Result<T>
where
    F: Fn() -> Result<T>,
{
    retry_transient_with(cancel, RETRY_MAX_ATTEMPTS, RETRY_BASE, attempt)
}

fn retry_transient_with<T, F>(
    cancel: &CancelToken,
    max_attempts: u32,
    base: Duration,
    attempt: F,
) -> Result<T>
where
    F: Fn() -> Result<T>,
{
    let mut delay = base;
    for _ in 0..max_attempts {
        cancel.check()?;
        match attempt() {
            Err(IndexerError::Core(CoreError::RetryTransient)) => {
                std::thread::sleep(delay);
                delay = (delay * 2).min(Duration::from_secs(1));
            }
            other => return other,
        }
    }
    Err(IndexerError::RetryExhausted {
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_db_core::schema::Directive;
    use quarry_db_core::value::TypeId;
    use std::sync::atomic::AtomicU32;

    fn schema(indexed: bool, tokenizers: &[&str], count: bool) -> SchemaUpdate {
        SchemaUpdate {
            value_type: TypeId::Str,
            directive: if indexed { Directive::Index } else { Directive::None },
            tokenizers: tokenizers.iter().map(|s| s.to_string()).collect(),
            list: false,
            count,
            inverse: None,
        }
    }

    fn rb(old: Option<SchemaUpdate>, current: SchemaUpdate) -> IndexRebuild {
        IndexRebuild {
            attr: keys::namespace_attr(0, "Article.title"),
            start_ts: 100,
            old_schema: old,
            current_schema: current,
        }
    }

    #[test]
    fn test_decision_table_noop_cases() {
        let r = rb(Some(schema(false, &[], false)), schema(false, &[], false));
        assert_eq!(r.needs_tok_index_rebuild().op, IndexOp::Noop);
        assert_eq!(r.needs_count_index_rebuild(), IndexOp::Noop);
        assert!(!r.needs_index_rebuild());

        let r = rb(
            Some(schema(true, &["term"], false)),
            schema(true, &["term"], false),
        );
        assert_eq!(r.needs_tok_index_rebuild().op, IndexOp::Noop);
    }

    #[test]
    fn test_decision_table_delete_when_unindexed() {
        let r = rb(Some(schema(true, &["term"], false)), schema(false, &[], false));
        let info = r.needs_tok_index_rebuild();
        assert_eq!(info.op, IndexOp::Delete);
        assert_eq!(info.tokenizers_to_delete, vec!["term".to_string()]);
    }

    #[test]
    fn test_decision_table_value_type_change_rebuilds_all() {
        let mut current = schema(true, &["term", "exact"], false);
        current.value_type = TypeId::Default;
        let r = rb(Some(schema(true, &["term"], false)), current);
        let info = r.needs_tok_index_rebuild();
        assert_eq!(info.op, IndexOp::Rebuild);
        assert_eq!(info.tokenizers_to_delete, vec!["term".to_string()]);
        assert_eq!(
            info.tokenizers_to_rebuild,
            vec!["term".to_string(), "exact".to_string()]
        );
    }

    #[test]
    fn test_decision_table_tokenizer_diff() {
        let r = rb(
            Some(schema(true, &["term"], false)),
            schema(true, &["term", "exact"], false),
        );
        let info = r.needs_tok_index_rebuild();
        assert_eq!(info.op, IndexOp::Rebuild);
        assert!(info.tokenizers_to_delete.is_empty());
        assert_eq!(info.tokenizers_to_rebuild, vec!["exact".to_string()]);

        let r = rb(
            Some(schema(true, &["term", "exact"], false)),
            schema(true, &["exact"], false),
        );
        let info = r.needs_tok_index_rebuild();
        assert_eq!(info.tokenizers_to_delete, vec!["term".to_string()]);
        assert!(info.tokenizers_to_rebuild.is_empty());
    }

    #[test]
    fn test_decision_table_fresh_index() {
        let r = rb(None, schema(true, &["term"], false));
        let info = r.needs_tok_index_rebuild();
        assert_eq!(info.op, IndexOp::Rebuild);
        assert!(info.tokenizers_to_delete.is_empty());
        assert_eq!(info.tokenizers_to_rebuild, vec!["term".to_string()]);
    }

    #[test]
    fn test_count_decision_table() {
        assert_eq!(
            rb(Some(schema(false, &[], true)), schema(false, &[], true)).needs_count_index_rebuild(),
            IndexOp::Noop
        );
        assert_eq!(
            rb(Some(schema(false, &[], true)), schema(false, &[], false)).needs_count_index_rebuild(),
            IndexOp::Delete
        );
        assert_eq!(
            rb(Some(schema(false, &[], false)), schema(false, &[], true)).needs_count_index_rebuild(),
            IndexOp::Rebuild
        );
    }

    #[test]
    fn test_query_schema_hides_rebuilding_tokenizers() {
        let r = rb(
            Some(schema(true, &["term"], false)),
            schema(true, &["term", "exact"], true),
        );
        let interim = r.query_schema();
        assert_eq!(interim.tokenizers, vec!["term".to_string()]);
        assert!(!interim.count);
    }

    #[test]
    fn test_prefixes_include_split_twins() {
        let r = rb(None, schema(true, &["term"], true));
        let prefixes = r.prefixes_to_drop().unwrap();
        // term (live + split) and count (live + split).
        assert_eq!(prefixes.len(), 4);
        let live: Vec<_> = prefixes.iter().filter(|p| p[0] == keys::DEFAULT_PREFIX).collect();
        let split: Vec<_> = prefixes.iter().filter(|p| p[0] == keys::SPLIT_PREFIX).collect();
        assert_eq!(live.len(), 2);
        assert_eq!(split.len(), 2);
    }

    #[test]
    fn test_list_to_scalar_is_an_error() {
        let mut old = schema(false, &[], false);
        old.list = true;
        let r = rb(Some(old), schema(false, &[], false));
        assert!(r.needs_list_type_rebuild().is_err());
        assert!(run_rebuild(&r, &MemStore::new(), Path::new("/tmp"), &CancelToken::new()).is_err());
    }

    #[test]
    fn test_retry_transient_backs_off_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let result = retry_transient(&CancelToken::new(), || {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(IndexerError::Core(CoreError::RetryTransient))
            } else {
                Ok(42)
            }
        })
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_transient_honors_cancellation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = retry_transient(&cancel, || Ok(())).unwrap_err();
        assert!(err.is_canceled());
    }

    #[test]
    fn test_retry_transient_exhausts() {
        let err = retry_transient_with(
            &CancelToken::new(),
            3,
            Duration::from_millis(1),
            || -> Result<()> { Err(IndexerError::Core(CoreError::RetryTransient)) },
        )
        .unwrap_err();
        assert!(matches!(err, IndexerError::RetryExhausted { attempts: 3 }));
    }
}
