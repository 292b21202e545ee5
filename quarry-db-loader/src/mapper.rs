//! The shard mapper: expands parsed edges into map entries and spills
//! sorted shard files.
//!
//! One processor thread drains edge batches off a bounded channel and owns
//! every UID, schema and arena decision. Each predicate routes to a shard by
//! hash; each shard buffers marshalled map entries in a disk-spillable
//! arena. When a shard's arena crosses `map_buf_size`, it is swapped for a
//! fresh one and handed to a detached spill worker that sorts it and writes
//! a compressed map file. At most one spill runs per shard: before swapping,
//! the processor waits for the shard's previous spill to finish, which is
//! also the pipeline's backpressure.
//!
//! On input exhaustion every non-empty arena spills and the mapper waits
//! for all in-flight workers.

use crate::arena::Arena;
use crate::edge::{Edge, EdgeObject};
use crate::error::{LoaderError, Result};
use crate::map_entry;
use crate::map_file::write_map_file;
use crate::options::{LoaderOptions, NAMESPACE_ANY};
use crate::progress::Progress;
use crate::xidmap::XidMap;
use quarry_db_core::keys::{data_key, index_key, namespace_attr};
use quarry_db_core::posting::{Posting, VALUE_EDGE_UID};
use quarry_db_core::tok::get_tokenizer;
use quarry_db_core::util::fingerprint64;
use quarry_db_core::value::convert;
use quarry_db_core::{Error as CoreError, SchemaStore};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Edges per producer batch.
pub const BATCH_SIZE: usize = 1000;

/// Bound of the producer → processor channel, in batches.
const CHANNEL_BOUND: usize = 16;

struct ShardState {
    arena: Arena,
    /// In-flight spill worker; joined before the next swap of this shard.
    pending: Option<JoinHandle<Result<()>>>,
}

/// The mapper pipeline state.
pub struct Mapper {
    opts: LoaderOptions,
    schema: Arc<SchemaStore>,
    xids: Arc<XidMap>,
    progress: Arc<Progress>,
    shards: Vec<ShardState>,
    /// Map-file counter, shared across shards: globally monotonic only.
    file_id: Arc<AtomicU32>,
}

impl Mapper {
    pub fn new(opts: LoaderOptions, schema: Arc<SchemaStore>) -> Result<Mapper> {
        opts.validate()?;
        let shards = (0..opts.map_shards)
            .map(|_| ShardState {
                arena: new_arena(&opts),
                pending: None,
            })
            .collect();
        Ok(Mapper {
            opts,
            schema,
            xids: Arc::new(XidMap::new()),
            progress: Arc::new(Progress::new()),
            shards,
            file_id: Arc::new(AtomicU32::new(0)),
        })
    }

    /// The shared UID allocator.
    pub fn xids(&self) -> &Arc<XidMap> {
        &self.xids
    }

    /// Shared progress counters.
    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    /// Shard that owns `attr`.
    pub fn shard_for(&self, attr: &[u8]) -> usize {
        fingerprint64(attr) as usize % self.opts.map_shards
    }

    /// Drain edge batches until the channel closes, then flush every shard
    /// and wait for all spills.
    pub fn run(&mut self, batches: Receiver<Vec<Edge>>) -> Result<()> {
        for batch in batches {
            for edge in &batch {
                self.progress.edge_count.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.process_edge(edge) {
                    if self.opts.ignore_errors && e.is_ignorable() {
                        self.progress.error_count.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(error = %e, "dropping malformed edge");
                        continue;
                    }
                    return Err(e);
                }
            }
            self.spill_full_shards()?;
        }
        self.finish()
    }

    /// Convenience for one-shot callers: spawns the producer thread and
    /// feeds `edges` through the pipeline in [`BATCH_SIZE`] batches.
    pub fn map_edges<I>(&mut self, edges: I) -> Result<()>
    where
        I: IntoIterator<Item = Edge> + Send + 'static,
        I::IntoIter: Send,
    {
        let (tx, rx) = sync_channel::<Vec<Edge>>(CHANNEL_BOUND);
        let producer = std::thread::Builder::new()
            .name("edge-producer".into())
            .spawn(move || {
                let mut batch = Vec::with_capacity(BATCH_SIZE);
                for edge in edges {
                    batch.push(edge);
                    if batch.len() == BATCH_SIZE {
                        if tx.send(std::mem::take(&mut batch)).is_err() {
                            return;
                        }
                        batch.reserve(BATCH_SIZE);
                    }
                }
                if !batch.is_empty() {
                    let _ = tx.send(batch);
                }
            })?;
        let result = self.run(rx);
        producer
            .join()
            .map_err(|_| LoaderError::parse("edge producer panicked"))?;
        result
    }

    // ------------------------------------------------------------------
    // Edge expansion
    // ------------------------------------------------------------------

    fn process_edge(&mut self, edge: &Edge) -> Result<()> {
        let ns = if self.opts.namespace != NAMESPACE_ANY {
            // Forced namespace overrides whatever the edge carries.
            self.opts.namespace
        } else {
            edge.namespace
        };
        if edge.subject.is_empty() || edge.predicate.is_empty() {
            return Err(LoaderError::parse(format!(
                "edge with empty subject or predicate: {edge:?}"
            )));
        }

        let sid = self.uid(&edge.subject, ns)?;

        // Blank-node subjects of the form `_:Type.local` qualify the
        // predicate with their type segment.
        let typ = edge.subject_type();
        let pred = if typ.is_empty() {
            edge.predicate.clone()
        } else {
            format!("{typ}.{}", edge.predicate)
        };
        let attr = namespace_attr(ns, &pred);
        let sch = self.schema.ensure_initial(&attr);
        let shard = self.shard_for(&attr);

        match &edge.object {
            EdgeObject::Id(object_xid) => {
                let oid = self.uid(object_xid, ns)?;
                self.add_map_entry(&data_key(&attr, sid), &Posting::reference(oid), shard)?;

                if let Some(inverse) = &sch.inverse {
                    let inv_attr = namespace_attr(ns, inverse);
                    self.schema.ensure_initial(&inv_attr);
                    let inv_shard = self.shard_for(&inv_attr);
                    self.add_map_entry(
                        &data_key(&inv_attr, oid),
                        &Posting::reference(sid),
                        inv_shard,
                    )?;
                }
            }
            EdgeObject::Value(value) => {
                let payload = value.marshal();
                let uid = if sch.list {
                    fingerprint64(&payload)
                } else {
                    VALUE_EDGE_UID
                };
                self.add_map_entry(&data_key(&attr, sid), &Posting::value(uid, payload), shard)?;

                if sch.is_indexed() {
                    let converted = convert(value, sch.value_type).map_err(LoaderError::Core)?;
                    for name in &sch.tokenizers {
                        let tokenizer = get_tokenizer(name).ok_or_else(|| {
                            LoaderError::Core(CoreError::schema(format!(
                                "unknown tokenizer {name:?}"
                            )))
                        })?;
                        for token in tokenizer.tokens(&converted)? {
                            self.add_map_entry(
                                &index_key(&attr, tokenizer.id(), &token),
                                &Posting::reference(sid),
                                shard,
                            )?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn uid(&self, xid: &str, ns: u64) -> Result<u64> {
        if xid.is_empty() {
            return Err(LoaderError::parse("empty external id"));
        }
        let (uid, _) = self.xids.assign(xid, ns);
        if uid == 0 {
            return Err(LoaderError::InvalidUid(xid.to_owned()));
        }
        Ok(uid)
    }

    fn add_map_entry(&mut self, key: &[u8], posting: &Posting, shard: usize) -> Result<()> {
        self.progress.map_entry_count.fetch_add(1, Ordering::Relaxed);
        let n = map_entry::size(key, posting);
        let dst = self.shards[shard].arena.allocate(n)?;
        map_entry::marshal(dst, key, posting);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Spilling
    // ------------------------------------------------------------------

    fn spill_full_shards(&mut self) -> Result<()> {
        for idx in 0..self.shards.len() {
            if self.shards[idx].arena.len_no_padding() >= self.opts.map_buf_size {
                self.rotate(idx)?;
            }
        }
        Ok(())
    }

    /// Swap the shard's arena for a fresh one and spill the old one on a
    /// detached worker. Blocks until the shard's previous spill (if any)
    /// has completed, so there is one spill per shard at a time.
    fn rotate(&mut self, idx: usize) -> Result<()> {
        if let Some(handle) = self.shards[idx].pending.take() {
            join_spill(handle, idx)?;
        }

        let mut arena = std::mem::replace(&mut self.shards[idx].arena, new_arena(&self.opts));
        let path = self.next_file_path(idx);
        let partition_buf_size = self.opts.partition_buf_size;
        let progress = Arc::clone(&self.progress);

        let handle = std::thread::Builder::new()
            .name(format!("map-spill-{idx}"))
            .spawn(move || {
                write_map_file(&mut arena, &path, partition_buf_size)?;
                arena.release();
                progress.shard_file_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })?;
        self.shards[idx].pending = Some(handle);
        Ok(())
    }

    fn next_file_path(&self, shard: usize) -> PathBuf {
        let file_num = self.file_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.opts.shard_dir(shard).join(format!("{file_num:06}.map.gz"))
    }

    /// Flush every non-empty arena and wait for all in-flight spills.
    fn finish(&mut self) -> Result<()> {
        for idx in 0..self.shards.len() {
            if !self.shards[idx].arena.is_empty() {
                self.rotate(idx)?;
            } else {
                self.shards[idx].arena.release();
            }
        }
        for idx in 0..self.shards.len() {
            if let Some(handle) = self.shards[idx].pending.take() {
                join_spill(handle, idx)?;
            }
        }
        tracing::info!(
            edges = self.progress.edges(),
            map_entries = self.progress.map_entries(),
            errors = self.progress.errors(),
            shard_files = self.progress.shard_files(),
            "mapping complete"
        );
        Ok(())
    }
}

fn new_arena(opts: &LoaderOptions) -> Arena {
    // Let the arena hold up to twice the spill threshold in memory before
    // overflowing to disk; the threshold check happens between batches, so
    // a shard can briefly run past map_buf_size.
    Arena::new().with_max_size(2 * opts.map_buf_size, opts.buffer_dir())
}

fn join_spill(handle: JoinHandle<Result<()>>, shard: usize) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(LoaderError::SpillFailed {
            shard,
            message: "spill worker panicked".into(),
        }),
    }
}
