//! Append-only byte arena with overflow-to-disk and in-place record sort.
//!
//! Records are stored back to back as `[len: u32 BE][bytes]` so the arena
//! can re-walk itself without external bookkeeping. Once the resident size
//! crosses the configured ceiling, the buffered tail is appended to an
//! anonymous temp file and the in-memory buffer restarts empty; the arena
//! presents file + memory as one contiguous record sequence.
//!
//! Sorting compacts everything back into memory first (records must survive
//! the grow/spill seams, so the sort works over an offset index and rebuilds
//! the buffer), and is stable: records with equal keys keep their insertion
//! order, which downstream relies on to preserve posting order within
//! identical keys.

use crate::error::Result;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LEN_PREFIX: usize = 4;

/// Disk-spillable arena of length-prefixed records.
pub struct Arena {
    mem: Vec<u8>,
    /// Resident-byte ceiling; `None` never spills.
    max_size: Option<usize>,
    /// Directory for overflow files; anonymous temp files vanish on drop.
    spill_dir: Option<PathBuf>,
    file: Option<File>,
    file_bytes: usize,
    /// Payload bytes across file + memory, length prefixes excluded.
    payload_bytes: usize,
    records: usize,
}

impl Arena {
    /// An unbounded, memory-only arena.
    pub fn new() -> Arena {
        Arena {
            mem: Vec::new(),
            max_size: None,
            spill_dir: None,
            file: None,
            file_bytes: 0,
            payload_bytes: 0,
            records: 0,
        }
    }

    /// Cap resident memory at `max` bytes, spilling overflow into temp
    /// files under `dir`.
    pub fn with_max_size(mut self, max: usize, dir: impl AsRef<Path>) -> Arena {
        self.max_size = Some(max.max(1));
        self.spill_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Bytes of record payload stored, prefixes excluded.
    pub fn len_no_padding(&self) -> usize {
        self.payload_bytes
    }

    /// Number of records stored.
    pub fn record_count(&self) -> usize {
        self.records
    }

    /// True when nothing was allocated.
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Reserve an `n`-byte record and return its writable region. The
    /// region stays valid for the duration of the borrow; sequential
    /// allocations are adjacent in iteration order.
    pub fn allocate(&mut self, n: usize) -> Result<&mut [u8]> {
        if let (Some(max), Some(_)) = (self.max_size, self.spill_dir.as_ref()) {
            if self.mem.len() >= max {
                self.spill()?;
            }
        }
        self.mem.extend_from_slice(&(n as u32).to_be_bytes());
        let start = self.mem.len();
        self.mem.resize(start + n, 0);
        self.payload_bytes += n;
        self.records += 1;
        Ok(&mut self.mem[start..])
    }

    fn spill(&mut self) -> Result<()> {
        let dir = self.spill_dir.as_ref().expect("spill without a dir");
        if self.file.is_none() {
            std::fs::create_dir_all(dir)?;
            self.file = Some(tempfile::tempfile_in(dir)?);
        }
        let file = self.file.as_mut().expect("just created");
        file.write_all(&self.mem)?;
        self.file_bytes += self.mem.len();
        tracing::debug!(bytes = self.mem.len(), total = self.file_bytes, "arena spilled to disk");
        self.mem.clear();
        Ok(())
    }

    /// Pull any spilled prefix back so `mem` holds the full record stream.
    fn compact(&mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        let mut all = Vec::with_capacity(self.file_bytes + self.mem.len());
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut all)?;
        all.extend_from_slice(&self.mem);
        self.mem = all;
        self.file_bytes = 0;
        Ok(())
    }

    /// Sort records in place by `cmp` over their payload bytes. Stable.
    pub fn sort_records<F>(&mut self, mut cmp: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        self.compact()?;
        let offsets = self.offsets()?;
        let mut index: Vec<(usize, usize)> = offsets;
        let mem = std::mem::take(&mut self.mem);
        index.sort_by(|&(a, alen), &(b, blen)| {
            cmp(&mem[a..a + alen], &mem[b..b + blen])
        });
        let mut sorted = Vec::with_capacity(mem.len());
        for (start, len) in index {
            sorted.extend_from_slice(&(len as u32).to_be_bytes());
            sorted.extend_from_slice(&mem[start..start + len]);
        }
        self.mem = sorted;
        Ok(())
    }

    /// Visit every record payload in arena order.
    pub fn iterate<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        self.compact()?;
        for (start, len) in self.offsets()? {
            f(&self.mem[start..start + len])?;
        }
        Ok(())
    }

    /// Payload offsets `(start, len)` of every record in `mem`.
    fn offsets(&self) -> Result<Vec<(usize, usize)>> {
        let mut out = Vec::with_capacity(self.records);
        let mut pos = 0usize;
        while pos < self.mem.len() {
            let len = u32::from_be_bytes(self.mem[pos..pos + LEN_PREFIX].try_into().unwrap()) as usize;
            pos += LEN_PREFIX;
            debug_assert!(pos + len <= self.mem.len(), "record overruns arena");
            out.push((pos, len));
            pos += len;
        }
        debug_assert_eq!(out.len(), self.records);
        Ok(out)
    }

    /// Free memory and close the overflow file.
    pub fn release(&mut self) {
        self.mem = Vec::new();
        self.file = None;
        self.file_bytes = 0;
        self.payload_bytes = 0;
        self.records = 0;
    }
}

impl Default for Arena {
    fn default() -> Self {
        Arena::new()
    }
}
