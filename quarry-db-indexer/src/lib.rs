//! # Quarry DB Indexer
//!
//! Rebuilds secondary indexes of the posting store after schema changes.
//! The decision tables in [`rebuild`] work out what a change to a
//! predicate's schema means per index kind (tokenized, count, value-uid
//! shape); drops run as blocking prefix deletes; rebuilds stream the
//! primary key range into a throwaway staging store and commit the rolled
//! up posting lists at a single logical timestamp, so the swap from old to
//! new index is atomic from any reader's point of view.

pub mod cancel;
pub mod error;
pub mod rebuild;
pub mod stream;
pub mod txn;

pub use cancel::CancelToken;
pub use error::{IndexerError, Result};
pub use rebuild::{run_rebuild, IndexOp, IndexRebuild, TokRebuildInfo};
pub use stream::{orchestrate, StreamConfig};
pub use txn::Txn;
