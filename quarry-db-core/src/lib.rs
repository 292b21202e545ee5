//! # Quarry DB Core
//!
//! Shared foundation of the Quarry storage layer:
//!
//! - Typed byte keys for data, index, reverse, count and schema records
//! - Typed values with a tagged binary encoding
//! - The posting / posting-list model and its wire format
//! - The tokenizer registry backing the secondary index
//! - Predicate schemas and the copy-on-write schema store
//! - The store contract consumed from the LSM engine, with an in-memory
//!   implementation for staging and tests
//!
//! ## Design principles
//!
//! 1. **No process globals**: stores, schema registries and options are
//!    values owned by an engine and passed down; tests instantiate isolated
//!    ones.
//! 2. **Byte-exact formats**: every codec round-trips and documents its
//!    layout next to the code.
//! 3. **Runtime-agnostic**: plain threads and channels at the edges, no
//!    async runtime underneath.

pub mod engine;
pub mod error;
pub mod keys;
pub mod posting;
pub mod schema;
pub mod storage;
pub mod tok;
pub mod util;
pub mod value;

pub use engine::Engine;
pub use error::{Error, Result};
pub use keys::{KeyKind, ParsedKey, GALAXY_NAMESPACE};
pub use posting::{Op, Posting, PostingList, PostingType, VALUE_EDGE_UID};
pub use schema::{Directive, SchemaStore, SchemaUpdate};
pub use storage::{
    drop_namespace_data, drop_predicate, BatchWriter, Entry, KeyVersions, MemStore, Store, Version,
    USER_META_COMPLETE_POSTING, USER_META_DELTA,
};
pub use tok::{get_tokenizer, get_tokenizers, Tokenizer};
pub use util::{divide_and_rule, fingerprint64, timestamp};
pub use value::{convert, is_star_all, TypeId, Value};
