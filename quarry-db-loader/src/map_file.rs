//! Map shard file format.
//!
//! ```text
//! Frame:  [u32 BE header_len][MapHeader bytes][records...]
//! Record: [uvarint record_len][map-entry bytes]
//! ```
//!
//! `MapHeader` is protobuf wire format (field 1, length-delimited,
//! repeated) holding the partition keys: the first key crossing each
//! `partition_buf_size`-byte boundary, deduplicated against its
//! predecessor. They let the reducer split a file into key ranges for
//! k-way merging without reading whole files.
//!
//! The entire frame is wrapped in Snappy framed compression. Files are
//! named `NNNNNN.map.gz` under the shard directory; the counter behind
//! `NNNNNN` is shared by all shards, so numbering is globally monotonic
//! only; a shard's own files are ordered but not dense.

use crate::arena::Arena;
use crate::error::{LoaderError, Result};
use crate::map_entry::MapEntry;
use quarry_db_core::util::{get_uvarint, put_uvarint};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

const HEADER_FIELD_TAG: u8 = 0x0a; // field 1, wire type 2 (length-delimited)

/// Partition-key header of one map file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapHeader {
    pub partition_keys: Vec<Vec<u8>>,
}

impl MapHeader {
    /// Encode in protobuf wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for key in &self.partition_keys {
            out.push(HEADER_FIELD_TAG);
            put_uvarint(&mut out, key.len() as u64);
            out.extend_from_slice(key);
        }
        out
    }

    /// Decode the wire format produced by [`MapHeader::encode`].
    pub fn decode(mut buf: &[u8]) -> Result<MapHeader> {
        let mut partition_keys = Vec::new();
        while !buf.is_empty() {
            if buf[0] != HEADER_FIELD_TAG {
                return Err(LoaderError::parse(format!(
                    "unexpected map header tag {:#04x}",
                    buf[0]
                )));
            }
            let (len, n) = get_uvarint(&buf[1..])
                .ok_or_else(|| LoaderError::parse("map header length truncated"))?;
            let start = 1 + n;
            let end = start + len as usize;
            if buf.len() < end {
                return Err(LoaderError::parse("map header key truncated"));
            }
            partition_keys.push(buf[start..end].to_vec());
            buf = &buf[end..];
        }
        Ok(MapHeader { partition_keys })
    }
}

/// Sort a shard arena and stream it into `path` as a compressed map file.
///
/// The arena must hold marshalled map entries; it is sorted by the
/// `(key, uid)` comparator here, immediately before writing. The write
/// order is flush, close (finishing the Snappy frame), then fsync.
pub fn write_map_file(arena: &mut Arena, path: &Path, partition_buf_size: usize) -> Result<()> {
    arena.sort_records(crate::map_entry::compare)?;

    // Partition keys: first key crossing each partition_buf_size boundary,
    // deduplicated against the previous partition key.
    let mut header = MapHeader::default();
    let mut buf_size = 0usize;
    arena.iterate(|record| {
        buf_size += 4 + record.len();
        if buf_size < partition_buf_size {
            return Ok(());
        }
        let key = MapEntry(record).key();
        if header.partition_keys.last().map(Vec::as_slice) == Some(key) {
            // Already the latest partition key; wait for the next key.
            return Ok(());
        }
        header.partition_keys.push(key.to_vec());
        buf_size = 0;
        Ok(())
    })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut w = snap::write::FrameEncoder::new(BufWriter::new(file));

    let header_bytes = header.encode();
    w.write_all(&(header_bytes.len() as u32).to_be_bytes())?;
    w.write_all(&header_bytes)?;

    let mut len_buf = Vec::with_capacity(10);
    arena.iterate(|record| {
        len_buf.clear();
        put_uvarint(&mut len_buf, record.len() as u64);
        w.write_all(&len_buf)?;
        w.write_all(record)?;
        Ok(())
    })?;

    let mut inner = w
        .into_inner()
        .map_err(|e| LoaderError::Io(e.into_error()))?;
    inner.flush()?;
    let file = inner
        .into_inner()
        .map_err(|e| LoaderError::Io(e.into_error()))?;
    file.sync_all()?;

    tracing::debug!(
        path = %path.display(),
        records = arena.record_count(),
        partition_keys = header.partition_keys.len(),
        "map shard file written"
    );
    Ok(())
}

/// A decompressed map file: header plus raw records, in file order.
///
/// Consumers stream these; the eager form here is the reducer-facing
/// verification surface.
pub struct MapFile {
    pub header: MapHeader,
    pub records: Vec<Vec<u8>>,
}

/// Read a map file back.
pub fn read_map_file(path: &Path) -> Result<MapFile> {
    let mut decoder = snap::read::FrameDecoder::new(File::open(path)?);
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw)?;

    if raw.len() < 4 {
        return Err(LoaderError::parse("map file shorter than its header length"));
    }
    let header_len = u32::from_be_bytes(raw[0..4].try_into().unwrap()) as usize;
    if raw.len() < 4 + header_len {
        return Err(LoaderError::parse("map file header truncated"));
    }
    let header = MapHeader::decode(&raw[4..4 + header_len])?;

    let mut records = Vec::new();
    let mut pos = 4 + header_len;
    while pos < raw.len() {
        let (len, n) = get_uvarint(&raw[pos..])
            .ok_or_else(|| LoaderError::parse("map record length truncated"))?;
        pos += n;
        let end = pos + len as usize;
        if raw.len() < end {
            return Err(LoaderError::parse("map record truncated"));
        }
        MapEntry::check(&raw[pos..end])?;
        records.push(raw[pos..end].to_vec());
        pos = end;
    }
    Ok(MapFile { header, records })
}
