//! Prefix-scoped parallel stream over a store.
//!
//! A producer walks a snapshot of every key under a prefix at a read
//! timestamp and feeds `(key, versions)` work items through a bounded
//! channel to a worker pool. Each worker runs the caller's `key_to_list`
//! callback, which turns one key's version history into derived KV entries;
//! a single sink thread drains the derived batches into a batched writer on
//! the output store, so the store sees ordered, coalesced writes.
//!
//! The pool size comes from [`quarry_db_core::divide_and_rule`] over the
//! key count unless the caller pins it. Cancellation is checked per work
//! item; the first error (from a worker, the sink, or cancellation) aborts
//! the stream.

use crate::cancel::CancelToken;
use crate::error::{IndexerError, Result};
use quarry_db_core::storage::{BatchWriter, Entry, KeyVersions, Store, Version};
use quarry_db_core::util::divide_and_rule;
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Mutex;

/// Stream parameters.
pub struct StreamConfig<'a> {
    /// Key prefix to scan.
    pub prefix: &'a [u8],
    /// Snapshot read timestamp.
    pub read_ts: u64,
    /// Worker pool size; `None` derives it from the key count.
    pub pool_size: Option<usize>,
    /// Log label for progress lines.
    pub log_prefix: &'a str,
}

/// Run the stream: scan `source`, transform per key, write to `sink`.
///
/// `key_to_list` must be pure per key; it runs concurrently across keys
/// and its output order across keys is not preserved.
pub fn orchestrate<F>(
    source: &dyn Store,
    sink: &dyn Store,
    config: StreamConfig<'_>,
    cancel: &CancelToken,
    key_to_list: F,
) -> Result<()>
where
    F: Fn(&[u8], &[Version]) -> Result<Vec<Entry>> + Send + Sync,
{
    cancel.check()?;
    let items = source.scan_prefix_at(config.prefix, config.read_ts)?;
    if items.is_empty() {
        tracing::debug!(log = config.log_prefix, "stream found no keys");
        return Ok(());
    }

    let (pool, width) = match config.pool_size {
        Some(n) => (n.max(1), items.len().div_ceil(n.max(1))),
        None => divide_and_rule(items.len()),
    };
    let pool = pool.min(items.len());
    tracing::debug!(
        log = config.log_prefix,
        keys = items.len(),
        pool,
        width,
        "stream starting"
    );

    let (work_tx, work_rx) = sync_channel::<KeyVersions>(pool * 2);
    let work_rx = Mutex::new(work_rx);
    let (out_tx, out_rx) = sync_channel::<Vec<Entry>>(pool * 2);

    std::thread::scope(|scope| -> Result<()> {
        let sink_handle = scope.spawn(|| drain_into(sink, out_rx));

        let mut workers = Vec::with_capacity(pool);
        for _ in 0..pool {
            let out_tx = out_tx.clone();
            let work_rx = &work_rx;
            let key_to_list = &key_to_list;
            workers.push(scope.spawn(move || -> Result<()> {
                loop {
                    let item = {
                        let guard = work_rx.lock().expect("work channel lock poisoned");
                        guard.recv()
                    };
                    let Ok(kv) = item else { return Ok(()) };
                    cancel.check()?;
                    let derived = key_to_list(&kv.key, &kv.versions)?;
                    if !derived.is_empty() && out_tx.send(derived).is_err() {
                        // Sink died; its own error surfaces below.
                        return Ok(());
                    }
                }
            }));
        }
        drop(out_tx);

        // Producer: the scan snapshot feeds the pool. A send fails only if
        // every worker exited, which means one of them carries the error.
        let mut send_failed = false;
        for kv in items {
            if cancel.is_canceled() || work_tx.send(kv).is_err() {
                send_failed = true;
                break;
            }
        }
        drop(work_tx);

        let mut first_err: Option<IndexerError> = None;
        for worker in workers {
            match worker.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => first_err = first_err.or(Some(e)),
                Err(_) => first_err = first_err.or(Some(IndexerError::WorkerPanic)),
            }
        }
        match sink_handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => first_err = first_err.or(Some(e)),
            Err(_) => first_err = first_err.or(Some(IndexerError::WorkerPanic)),
        }

        if let Some(e) = first_err {
            return Err(e);
        }
        cancel.check()?;
        debug_assert!(!send_failed || cancel.is_canceled());
        Ok(())
    })
}

fn drain_into(sink: &dyn Store, batches: Receiver<Vec<Entry>>) -> Result<()> {
    let mut writer = BatchWriter::new(sink);
    for batch in batches {
        writer.write(batch).map_err(IndexerError::Core)?;
    }
    writer.flush().map_err(IndexerError::Core)
}
