//! Read-back side of the fixed-size table format.
//!
//! The reader discovers the restart index from the final 4 bytes of the
//! table, then iterates records from the front, reconstructing each full key
//! as `base_key[..plen] || suffix`. The base key changes at every restart
//! point, where records store their key uncompressed.
//!
//! Verification surface for table invariants; the query path proper lives
//! with the LSM engine.

use crate::builder::{Header, HEADER_SIZE};
use crate::error::{Result, TableError};

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Byte offset of the record within the table.
    pub offset: usize,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Block-relative offset of the preceding record.
    pub prev: u16,
}

/// A parsed table.
pub struct TableReader<'a> {
    buf: &'a [u8],
    restarts: Vec<u32>,
}

impl<'a> TableReader<'a> {
    /// Parse the trailing restart index of a finished table.
    pub fn new(buf: &'a [u8]) -> Result<TableReader<'a>> {
        if buf.len() < 4 + HEADER_SIZE {
            return Err(TableError::Corrupt(format!(
                "table too small: {} bytes",
                buf.len()
            )));
        }
        let count =
            u32::from_be_bytes(buf[buf.len() - 4..].try_into().unwrap()) as usize;
        let index_len = 4 * count + 4;
        if count == 0 || index_len + HEADER_SIZE > buf.len() {
            return Err(TableError::Corrupt(format!(
                "restart count {count} does not fit a {}-byte table",
                buf.len()
            )));
        }
        let index_start = buf.len() - index_len;
        let mut restarts = Vec::with_capacity(count);
        for i in 0..count {
            let off = index_start + 4 * i;
            restarts.push(u32::from_be_bytes(buf[off..off + 4].try_into().unwrap()));
        }
        if restarts.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TableError::Corrupt("restart offsets not ascending".into()));
        }
        if *restarts.last().unwrap() as usize > index_start {
            return Err(TableError::Corrupt(
                "end-of-stream marker beyond the restart index".into(),
            ));
        }
        Ok(TableReader { buf, restarts })
    }

    /// Restart offsets, ascending; the final one is the end-of-stream marker.
    pub fn restarts(&self) -> &[u32] {
        &self.restarts
    }

    /// Decode every record up to the terminator.
    pub fn records(&self) -> Result<Vec<Record>> {
        let end = *self.restarts.last().unwrap() as usize;
        let mut out = Vec::new();
        let mut base_key: Vec<u8> = Vec::new();
        let mut pos = 0usize;
        while pos < end {
            let offset = pos;
            if pos + HEADER_SIZE > self.buf.len() {
                return Err(TableError::Corrupt("record header truncated".into()));
            }
            let h = Header::decode(&self.buf[pos..pos + HEADER_SIZE]);
            pos += HEADER_SIZE;
            if h.is_terminator() {
                if pos != end {
                    return Err(TableError::Corrupt(
                        "terminator before the end-of-stream marker".into(),
                    ));
                }
                break;
            }
            let (plen, klen, vlen) = (h.plen as usize, h.klen as usize, h.vlen as usize);
            if pos + klen + vlen > self.buf.len() {
                return Err(TableError::Corrupt("record body truncated".into()));
            }
            if plen > base_key.len() {
                return Err(TableError::Corrupt(format!(
                    "prefix length {plen} exceeds base key {}",
                    base_key.len()
                )));
            }
            let suffix = &self.buf[pos..pos + klen];
            pos += klen;
            let value = self.buf[pos..pos + vlen].to_vec();
            pos += vlen;

            let mut key = Vec::with_capacity(plen + klen);
            key.extend_from_slice(&base_key[..plen]);
            key.extend_from_slice(suffix);
            if self.restarts.contains(&(offset as u32)) {
                base_key = key.clone();
            }
            out.push(Record {
                offset,
                key,
                value,
                prev: h.prev,
            });
        }
        Ok(out)
    }

    /// Prefix length stored by the record at `offset`.
    pub fn plen_at(&self, offset: usize) -> Result<u16> {
        if offset + HEADER_SIZE > self.buf.len() {
            return Err(TableError::Corrupt("offset beyond table".into()));
        }
        Ok(Header::decode(&self.buf[offset..offset + HEADER_SIZE]).plen)
    }
}
