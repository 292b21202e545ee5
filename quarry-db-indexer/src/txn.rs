//! Per-key staging transactions for index derivation.
//!
//! While the rebuild streams the primary key range, each source key gets
//! its own short-lived [`Txn`]. The generators below push index and count
//! mutations into it; the accumulated deltas are then flushed as
//! `user_meta = DELTA` entries into the staging store, one encoded posting
//! batch per derived key. Keys come out in sorted order, so delta flushes
//! are deterministic.

use crate::error::Result;
use quarry_db_core::keys::{count_key, index_key};
use quarry_db_core::posting::{Op, Posting, PostingList, PostingType};
use quarry_db_core::tok::Tokenizer;
use quarry_db_core::value::{convert, TypeId, Value};
use std::collections::BTreeMap;

/// Delta staging for the mutations derived from one source key.
pub struct Txn {
    read_ts: u64,
    deltas: BTreeMap<Vec<u8>, PostingList>,
}

impl Txn {
    pub fn new(read_ts: u64) -> Txn {
        Txn {
            read_ts,
            deltas: BTreeMap::new(),
        }
    }

    pub fn read_ts(&self) -> u64 {
        self.read_ts
    }

    /// Append one mutation to the delta list of `key`. Ops are preserved;
    /// resolution happens at rollup.
    pub fn add_mutation(&mut self, key: &[u8], posting: Posting) {
        self.deltas
            .entry(key.to_vec())
            .or_default()
            .postings
            .push(posting);
    }

    /// Number of keys with staged deltas.
    pub fn delta_count(&self) -> usize {
        self.deltas.len()
    }

    /// Drain the staged deltas as `(key, encoded posting batch)` pairs in
    /// key order.
    pub fn into_deltas(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.deltas
            .into_iter()
            .map(|(key, list)| (key, list.encode()))
            .collect()
    }

    /// Stage index mutations for one posting's value: convert to the
    /// schema type, tokenize with every tokenizer, and add a token → uid
    /// edge per token.
    pub fn add_index_mutations(
        &mut self,
        attr: &[u8],
        uid: u64,
        value_bytes: &[u8],
        op: Op,
        tokenizers: &[&'static dyn Tokenizer],
        value_type: TypeId,
    ) -> Result<()> {
        let value = Value::unmarshal(value_bytes)?;
        let converted = convert(&value, value_type)?;
        for tokenizer in tokenizers {
            for token in tokenizer.tokens(&converted)? {
                let mut posting = Posting::reference(uid);
                posting.op = op;
                self.add_mutation(&index_key(attr, tokenizer.id(), &token), posting);
            }
        }
        Ok(())
    }

    /// Stage one count-index mutation: uid under the `(attr, count)` key.
    pub fn add_count_mutation(&mut self, attr: &[u8], uid: u64, count: u32, op: Op) {
        let mut posting = Posting::reference(uid);
        posting.op = op;
        self.add_mutation(&count_key(attr, count), posting);
    }

    /// Stage the pair of count mutations for a cardinality change: drop the
    /// uid from the old count bucket, add it to the new one.
    pub fn update_count(&mut self, attr: &[u8], uid: u64, before: u32, after: u32) {
        if before == after {
            return;
        }
        if before > 0 {
            self.add_count_mutation(attr, uid, before, Op::Del);
        }
        if after > 0 {
            self.add_count_mutation(attr, uid, after, Op::Set);
        }
    }
}

/// True when a posting carries an indexable value.
pub fn is_indexable(posting: &Posting) -> bool {
    posting.ptype == PostingType::Value && posting.value.is_some()
}
