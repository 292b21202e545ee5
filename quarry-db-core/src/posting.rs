//! Postings and posting lists.
//!
//! A posting is a single record inside a posting list: either a REF to
//! another UID or a typed VALUE. A posting list is the time-versioned,
//! uid-sorted set of postings stored under one key.
//!
//! ## Wire format
//!
//! Posting (all integers big-endian):
//!
//! ```text
//! [uid: u64][flags: u8][ts: u64][vlen: uvarint][value bytes]
//! ```
//!
//! `flags` bit 0 is the posting type (0 = REF, 1 = VALUE), bit 1 is the op
//! (0 = SET, 1 = DEL). REF postings carry `vlen = 0`.
//!
//! Posting list: `[count: u32 BE]` followed by `count` postings. The same
//! encoding serves both materialized lists (`user_meta = COMPLETE_POSTING`)
//! and delta batches (`user_meta = DELTA`); a delta batch simply keeps its
//! DEL postings instead of resolving them.

use crate::error::{Error, Result};
use crate::storage::{Version, USER_META_COMPLETE_POSTING, USER_META_DELTA};
use crate::util::{get_uvarint, put_uvarint, uvarint_len};
use crate::value::is_star_all;

/// Sentinel UID for the single value edge of a non-list predicate.
pub const VALUE_EDGE_UID: u64 = u64::MAX;

const FLAG_VALUE: u8 = 1 << 0;
const FLAG_DEL: u8 = 1 << 1;

/// REF or VALUE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingType {
    Ref,
    Value,
}

/// SET or DEL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Set,
    Del,
}

/// One record inside a posting list.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub uid: u64,
    /// Tagged value payload; always absent for REF postings.
    pub value: Option<Vec<u8>>,
    pub ptype: PostingType,
    pub op: Op,
    pub ts: u64,
}

impl Posting {
    /// A REF posting to `uid`.
    pub fn reference(uid: u64) -> Posting {
        Posting {
            uid,
            value: None,
            ptype: PostingType::Ref,
            op: Op::Set,
            ts: 0,
        }
    }

    /// A VALUE posting with the given uid and tagged payload.
    pub fn value(uid: u64, payload: Vec<u8>) -> Posting {
        Posting {
            uid,
            value: Some(payload),
            ptype: PostingType::Value,
            op: Op::Set,
            ts: 0,
        }
    }

    /// Flip the op to DEL.
    pub fn deleted(mut self) -> Posting {
        self.op = Op::Del;
        self
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        let vlen = self.value.as_ref().map_or(0, Vec::len);
        8 + 1 + 8 + uvarint_len(vlen as u64) + vlen
    }

    /// Append the wire encoding to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.uid.to_be_bytes());
        let mut flags = 0u8;
        if self.ptype == PostingType::Value {
            flags |= FLAG_VALUE;
        }
        if self.op == Op::Del {
            flags |= FLAG_DEL;
        }
        out.push(flags);
        out.extend_from_slice(&self.ts.to_be_bytes());
        match &self.value {
            Some(v) => {
                put_uvarint(out, v.len() as u64);
                out.extend_from_slice(v);
            }
            None => put_uvarint(out, 0),
        }
    }

    /// Wire encoding as a fresh buffer.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        self.write_to(&mut out);
        out
    }

    /// Decode one posting from the front of `buf`; returns it and the bytes
    /// consumed.
    pub fn read_from(buf: &[u8]) -> Result<(Posting, usize)> {
        if buf.len() < 17 {
            return Err(Error::parse(format!(
                "posting header needs 17 bytes, got {}",
                buf.len()
            )));
        }
        let uid = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        let flags = buf[8];
        if flags & !(FLAG_VALUE | FLAG_DEL) != 0 {
            return Err(Error::parse(format!("unknown posting flags {flags:#04x}")));
        }
        let ts = u64::from_be_bytes(buf[9..17].try_into().unwrap());
        let (vlen, n) = get_uvarint(&buf[17..])
            .ok_or_else(|| Error::parse("posting value length truncated"))?;
        let start = 17 + n;
        let end = start + vlen as usize;
        if buf.len() < end {
            return Err(Error::parse(format!(
                "posting value truncated: need {} bytes, got {}",
                end,
                buf.len()
            )));
        }
        let value = if vlen > 0 {
            Some(buf[start..end].to_vec())
        } else {
            None
        };
        Ok((
            Posting {
                uid,
                value,
                ptype: if flags & FLAG_VALUE != 0 {
                    PostingType::Value
                } else {
                    PostingType::Ref
                },
                op: if flags & FLAG_DEL != 0 { Op::Del } else { Op::Set },
                ts,
            },
            end,
        ))
    }
}

/// A decoded posting list, sorted by `(uid, value)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostingList {
    pub postings: Vec<Posting>,
}

impl PostingList {
    /// Encode as `[count][postings...]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.postings.iter().map(Posting::size).sum::<usize>());
        out.extend_from_slice(&(self.postings.len() as u32).to_be_bytes());
        for p in &self.postings {
            p.write_to(&mut out);
        }
        out
    }

    /// Decode a buffer produced by [`PostingList::encode`].
    pub fn decode(buf: &[u8]) -> Result<PostingList> {
        if buf.len() < 4 {
            return Err(Error::parse("posting list shorter than its count"));
        }
        let count = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let mut postings = Vec::with_capacity(count as usize);
        let mut off = 4;
        for _ in 0..count {
            let (p, n) = Posting::read_from(&buf[off..])?;
            postings.push(p);
            off += n;
        }
        if off != buf.len() {
            return Err(Error::parse(format!(
                "{} trailing bytes after posting list",
                buf.len() - off
            )));
        }
        Ok(PostingList { postings })
    }

    /// Reconstruct the list visible at a read timestamp from a key's version
    /// history, newest first: the newest COMPLETE_POSTING entry is the base,
    /// and any DELTA entries above it are applied oldest-first.
    pub fn from_versions(versions: &[Version]) -> Result<PostingList> {
        debug_assert!(versions.windows(2).all(|w| w[0].version >= w[1].version));
        let mut deltas: Vec<&Version> = Vec::new();
        let mut base = PostingList::default();
        for v in versions {
            match v.user_meta {
                USER_META_COMPLETE_POSTING => {
                    base = PostingList::decode(&v.value)?;
                    break;
                }
                USER_META_DELTA => deltas.push(v),
                m => {
                    return Err(Error::parse(format!(
                        "unknown user_meta {m:#04x} in posting history"
                    )))
                }
            }
        }
        for v in deltas.iter().rev() {
            let batch = PostingList::decode(&v.value)?;
            for mut p in batch.postings {
                p.ts = v.version;
                base.apply(p);
            }
        }
        Ok(base)
    }

    /// Apply one mutation.
    ///
    /// DEL with the wildcard payload clears the list. The value-edge
    /// sentinel uid replaces by uid alone (non-list predicates hold at most
    /// one value edge); everything else is deduplicated against the
    /// identical `(uid, value)` pair.
    pub fn apply(&mut self, p: Posting) {
        match p.op {
            Op::Del => {
                if p.value.as_deref().is_some_and(is_star_all) {
                    self.postings.clear();
                    return;
                }
                self.postings.retain(|q| {
                    q.uid != p.uid || (p.value.is_some() && p.uid != VALUE_EDGE_UID && q.value != p.value)
                });
            }
            Op::Set => {
                self.postings.retain(|q| {
                    q.uid != p.uid || (p.uid != VALUE_EDGE_UID && q.value != p.value)
                });
                let at = self
                    .postings
                    .partition_point(|q| (q.uid, &q.value) < (p.uid, &p.value));
                self.postings.insert(at, p);
            }
        }
    }

    /// Live posting for `uid`, if any.
    pub fn find(&self, uid: u64) -> Option<&Posting> {
        self.postings.iter().find(|p| p.uid == uid)
    }

    /// Number of live postings.
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    /// True when no posting is live.
    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    /// Materialize into the compact rollup encoding: SET postings only,
    /// sorted by `(uid, value)`.
    pub fn rollup(&self) -> Vec<u8> {
        debug_assert!(self.postings.iter().all(|p| p.op == Op::Set));
        self.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Value, STAR_ALL};

    fn val(s: &str) -> Vec<u8> {
        Value::Str(s.into()).marshal()
    }

    #[test]
    fn test_posting_round_trip() {
        for p in [
            Posting::reference(42),
            Posting::value(VALUE_EDGE_UID, val("hello")),
            Posting::value(7, val("x")).deleted(),
        ] {
            let bytes = p.marshal();
            assert_eq!(bytes.len(), p.size());
            let (q, n) = Posting::read_from(&bytes).unwrap();
            assert_eq!(n, bytes.len());
            assert_eq!(q, p);
        }
    }

    #[test]
    fn test_list_round_trip() {
        let list = PostingList {
            postings: vec![Posting::reference(1), Posting::reference(2)],
        };
        assert_eq!(PostingList::decode(&list.encode()).unwrap(), list);
        assert!(PostingList::decode(&list.encode()[..5]).is_err());
    }

    #[test]
    fn test_apply_set_dedupes_identical_pair() {
        let mut list = PostingList::default();
        list.apply(Posting::reference(5));
        list.apply(Posting::reference(5));
        list.apply(Posting::reference(3));
        assert_eq!(list.len(), 2);
        assert_eq!(list.postings[0].uid, 3);
    }

    #[test]
    fn test_apply_value_edge_replaces_by_uid() {
        let mut list = PostingList::default();
        list.apply(Posting::value(VALUE_EDGE_UID, val("old")));
        list.apply(Posting::value(VALUE_EDGE_UID, val("new")));
        assert_eq!(list.len(), 1);
        assert_eq!(list.postings[0].value, Some(val("new")));
    }

    #[test]
    fn test_apply_list_values_coexist() {
        let mut list = PostingList::default();
        list.apply(Posting::value(10, val("a")));
        list.apply(Posting::value(11, val("b")));
        list.apply(Posting::value(10, val("a"))); // identical pair collapses
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_apply_del_and_wildcard() {
        let mut list = PostingList::default();
        list.apply(Posting::reference(1));
        list.apply(Posting::reference(2));
        list.apply(Posting::reference(1).deleted());
        assert_eq!(list.len(), 1);

        list.apply(Posting::value(VALUE_EDGE_UID, val(STAR_ALL)).deleted());
        assert!(list.is_empty());
    }

    #[test]
    fn test_from_versions_merges_base_and_deltas() {
        let base = PostingList {
            postings: vec![Posting::reference(1), Posting::reference(2)],
        };
        let delta1 = PostingList {
            postings: vec![Posting::reference(2).deleted()],
        };
        let delta2 = PostingList {
            postings: vec![Posting::reference(9)],
        };
        let versions = vec![
            Version {
                version: 12,
                user_meta: USER_META_DELTA,
                value: delta2.encode(),
            },
            Version {
                version: 11,
                user_meta: USER_META_DELTA,
                value: delta1.encode(),
            },
            Version {
                version: 10,
                user_meta: USER_META_COMPLETE_POSTING,
                value: base.encode(),
            },
        ];
        let merged = PostingList::from_versions(&versions).unwrap();
        let uids: Vec<u64> = merged.postings.iter().map(|p| p.uid).collect();
        assert_eq!(uids, vec![1, 9]);
        assert_eq!(merged.find(9).unwrap().ts, 12);
    }

    #[test]
    fn test_from_versions_ignores_history_below_base() {
        let old = PostingList {
            postings: vec![Posting::reference(100)],
        };
        let base = PostingList {
            postings: vec![Posting::reference(1)],
        };
        let versions = vec![
            Version {
                version: 20,
                user_meta: USER_META_COMPLETE_POSTING,
                value: base.encode(),
            },
            Version {
                version: 5,
                user_meta: USER_META_DELTA,
                value: old.encode(),
            },
        ];
        let merged = PostingList::from_versions(&versions).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.postings[0].uid, 1);
    }
}
