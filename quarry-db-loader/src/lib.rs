//! # Quarry DB Loader
//!
//! The offline bulk-load pipeline: consumes parsed edges, deduplicates
//! external identifiers into UIDs, expands every edge into forward, inverse
//! and tokenized-index postings, and spills sorted, Snappy-compressed map
//! files per predicate shard. A separate reduce stage (not in this crate)
//! merges the shard files into the posting store.
//!
//! The pipeline is a one-shot offline job: no cancellation, and I/O errors
//! during spill are fatal.

pub mod arena;
pub mod edge;
pub mod error;
pub mod map_entry;
pub mod map_file;
pub mod mapper;
pub mod options;
pub mod progress;
pub mod xidmap;

pub use arena::Arena;
pub use edge::{Edge, EdgeObject};
pub use error::{LoaderError, Result};
pub use map_file::{read_map_file, write_map_file, MapFile, MapHeader};
pub use mapper::{Mapper, BATCH_SIZE};
pub use options::{LoaderOptions, NAMESPACE_ANY};
pub use progress::Progress;
pub use xidmap::XidMap;
