//! The map-entry record: the loader's unit of intermediate state.
//!
//! Fixed 16-byte header then the variable parts:
//!
//! ```text
//! [uid: u64 BE][key_len: u32 BE][posting_len: u32 BE][key bytes][posting bytes]
//! ```
//!
//! REF postings carry everything they need in the uid field, so they
//! marshal with `posting_len = 0`; only VALUE postings serialize a payload.
//! Entries sort by `(key, uid)`, which is the order the reducer's k-way
//! merge expects.

use crate::error::{LoaderError, Result};
use quarry_db_core::posting::{Posting, PostingType};
use std::cmp::Ordering;

/// Header bytes preceding the key.
pub const HEADER_SIZE: usize = 16;

/// Exact number of bytes [`marshal`] writes for this entry.
pub fn size(key: &[u8], posting: &Posting) -> usize {
    HEADER_SIZE + key.len() + posting_len(posting)
}

fn posting_len(posting: &Posting) -> usize {
    match posting.ptype {
        PostingType::Ref => 0,
        PostingType::Value => posting.size(),
    }
}

/// Serialize into `dst`, which must be exactly [`size`] bytes.
pub fn marshal(dst: &mut [u8], key: &[u8], posting: &Posting) {
    debug_assert_eq!(dst.len(), size(key, posting));
    dst[0..8].copy_from_slice(&posting.uid.to_be_bytes());
    dst[8..12].copy_from_slice(&(key.len() as u32).to_be_bytes());
    let plen = posting_len(posting);
    dst[12..16].copy_from_slice(&(plen as u32).to_be_bytes());
    let mut pos = HEADER_SIZE;
    dst[pos..pos + key.len()].copy_from_slice(key);
    pos += key.len();
    if plen > 0 {
        let mut buf = Vec::with_capacity(plen);
        posting.write_to(&mut buf);
        dst[pos..pos + plen].copy_from_slice(&buf);
    }
}

/// Zero-copy view over one marshalled map entry.
#[derive(Debug, Clone, Copy)]
pub struct MapEntry<'a>(pub &'a [u8]);

impl<'a> MapEntry<'a> {
    pub fn uid(&self) -> u64 {
        u64::from_be_bytes(self.0[0..8].try_into().unwrap())
    }

    pub fn key(&self) -> &'a [u8] {
        let klen = u32::from_be_bytes(self.0[8..12].try_into().unwrap()) as usize;
        &self.0[HEADER_SIZE..HEADER_SIZE + klen]
    }

    pub fn posting_bytes(&self) -> &'a [u8] {
        let klen = u32::from_be_bytes(self.0[8..12].try_into().unwrap()) as usize;
        let plen = u32::from_be_bytes(self.0[12..16].try_into().unwrap()) as usize;
        &self.0[HEADER_SIZE + klen..HEADER_SIZE + klen + plen]
    }

    /// Decode the posting payload: the serialized VALUE posting, or a REF
    /// posting reconstructed from the uid field.
    pub fn posting(&self) -> Result<Posting> {
        let bytes = self.posting_bytes();
        if bytes.is_empty() {
            return Ok(Posting::reference(self.uid()));
        }
        let (posting, consumed) = Posting::read_from(bytes)?;
        if consumed != bytes.len() {
            return Err(LoaderError::parse(format!(
                "{} trailing bytes after map-entry posting",
                bytes.len() - consumed
            )));
        }
        Ok(posting)
    }

    /// Validate the framing of a raw record.
    pub fn check(bytes: &'a [u8]) -> Result<MapEntry<'a>> {
        if bytes.len() < HEADER_SIZE {
            return Err(LoaderError::parse(format!(
                "map entry shorter than its header: {} bytes",
                bytes.len()
            )));
        }
        let klen = u32::from_be_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let plen = u32::from_be_bytes(bytes[12..16].try_into().unwrap()) as usize;
        if bytes.len() != HEADER_SIZE + klen + plen {
            return Err(LoaderError::parse(format!(
                "map entry length {} does not match header ({klen} + {plen})",
                bytes.len()
            )));
        }
        Ok(MapEntry(bytes))
    }
}

/// Sort order of the shard files: key bytes ascending, then uid ascending.
pub fn compare(a: &[u8], b: &[u8]) -> Ordering {
    let (ea, eb) = (MapEntry(a), MapEntry(b));
    ea.key().cmp(eb.key()).then_with(|| ea.uid().cmp(&eb.uid()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_db_core::keys::{data_key, namespace_attr};
    use quarry_db_core::posting::VALUE_EDGE_UID;
    use quarry_db_core::Value;

    fn marshal_owned(key: &[u8], posting: &Posting) -> Vec<u8> {
        let mut buf = vec![0u8; size(key, posting)];
        marshal(&mut buf, key, posting);
        buf
    }

    #[test]
    fn test_ref_entry_round_trip() {
        let attr = namespace_attr(0, "knows");
        let key = data_key(&attr, 1);
        let posting = Posting::reference(2);
        let bytes = marshal_owned(&key, &posting);
        assert_eq!(bytes.len(), size(&key, &posting));

        let entry = MapEntry::check(&bytes).unwrap();
        assert_eq!(entry.uid(), 2);
        assert_eq!(entry.key(), key.as_slice());
        assert!(entry.posting_bytes().is_empty());
        assert_eq!(entry.posting().unwrap(), posting);
    }

    #[test]
    fn test_value_entry_round_trip() {
        let attr = namespace_attr(0, "Article.title");
        let key = data_key(&attr, 9);
        let posting = Posting::value(VALUE_EDGE_UID, Value::Str("Hello".into()).marshal());
        let bytes = marshal_owned(&key, &posting);

        let entry = MapEntry::check(&bytes).unwrap();
        assert_eq!(entry.uid(), VALUE_EDGE_UID);
        assert_eq!(entry.posting().unwrap(), posting);
    }

    #[test]
    fn test_compare_orders_by_key_then_uid() {
        let attr = namespace_attr(0, "p");
        let e = |uid: u64, key_uid: u64| {
            marshal_owned(&data_key(&attr, key_uid), &Posting::reference(uid))
        };
        let same_key_small_uid = e(1, 5);
        let same_key_big_uid = e(9, 5);
        let later_key = e(1, 6);

        assert_eq!(compare(&same_key_small_uid, &same_key_big_uid), Ordering::Less);
        assert_eq!(compare(&same_key_big_uid, &later_key), Ordering::Less);
        assert_eq!(compare(&same_key_small_uid, &same_key_small_uid), Ordering::Equal);
    }

    #[test]
    fn test_check_rejects_bad_framing() {
        assert!(MapEntry::check(&[0u8; 3]).is_err());
        let attr = namespace_attr(0, "p");
        let mut bytes = marshal_owned(&data_key(&attr, 1), &Posting::reference(2));
        bytes.push(0);
        assert!(MapEntry::check(&bytes).is_err());
    }
}
