//! Pluggable tokenizers for the secondary index.
//!
//! A tokenizer turns a typed value into the set of tokens it is indexed
//! under. Each tokenizer owns a single identifier byte which is embedded in
//! its index-key prefix, so dropping or rebuilding one tokenizer's index is a
//! prefix-range operation (see [`crate::keys::index_prefix_for_tokenizer`]).
//!
//! Identifier bytes are part of the on-disk format and must never be reused.

use crate::error::{Error, Result};
use crate::value::Value;
use xxhash_rust::xxh3::xxh3_64;

/// Identifier byte of the `term` tokenizer.
pub const ID_TERM: u8 = 0x54;
/// Identifier byte of the `exact` tokenizer.
pub const ID_EXACT: u8 = 0x45;
/// Identifier byte of the `int` tokenizer.
pub const ID_INT: u8 = 0x49;
/// Identifier byte of the `bool` tokenizer.
pub const ID_BOOL: u8 = 0x42;
/// Identifier byte of the `hash` tokenizer.
pub const ID_HASH: u8 = 0x48;

/// A value → tokens extractor.
pub trait Tokenizer: Send + Sync {
    /// Name as referenced by schema definitions.
    fn name(&self) -> &'static str;

    /// Identifier byte embedded in this tokenizer's index-key prefix.
    fn id(&self) -> u8;

    /// Extract tokens from a value already converted to the schema type.
    fn tokens(&self, value: &Value) -> Result<Vec<Vec<u8>>>;
}

struct TermTokenizer;

impl Tokenizer for TermTokenizer {
    fn name(&self) -> &'static str {
        "term"
    }

    fn id(&self) -> u8 {
        ID_TERM
    }

    fn tokens(&self, value: &Value) -> Result<Vec<Vec<u8>>> {
        let s = expect_str(self, value)?;
        let mut toks: Vec<Vec<u8>> = s
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.as_bytes().to_vec())
            .collect();
        toks.sort();
        toks.dedup();
        Ok(toks)
    }
}

struct ExactTokenizer;

impl Tokenizer for ExactTokenizer {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn id(&self) -> u8 {
        ID_EXACT
    }

    fn tokens(&self, value: &Value) -> Result<Vec<Vec<u8>>> {
        let s = expect_str(self, value)?;
        Ok(vec![s.as_bytes().to_vec()])
    }
}

struct IntTokenizer;

impl Tokenizer for IntTokenizer {
    fn name(&self) -> &'static str {
        "int"
    }

    fn id(&self) -> u8 {
        ID_INT
    }

    fn tokens(&self, value: &Value) -> Result<Vec<Vec<u8>>> {
        match value {
            // Flip the sign bit so the byte order of tokens matches the
            // numeric order of the values.
            Value::Int(i) => Ok(vec![(*i as u64 ^ (1 << 63)).to_be_bytes().to_vec()]),
            _ => Err(wrong_type(self, value)),
        }
    }
}

struct BoolTokenizer;

impl Tokenizer for BoolTokenizer {
    fn name(&self) -> &'static str {
        "bool"
    }

    fn id(&self) -> u8 {
        ID_BOOL
    }

    fn tokens(&self, value: &Value) -> Result<Vec<Vec<u8>>> {
        match value {
            Value::Bool(b) => Ok(vec![vec![*b as u8]]),
            _ => Err(wrong_type(self, value)),
        }
    }
}

struct HashTokenizer;

impl Tokenizer for HashTokenizer {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn id(&self) -> u8 {
        ID_HASH
    }

    fn tokens(&self, value: &Value) -> Result<Vec<Vec<u8>>> {
        Ok(vec![xxh3_64(&value.marshal()).to_be_bytes().to_vec()])
    }
}

static TOKENIZERS: &[&(dyn Tokenizer)] = &[
    &TermTokenizer,
    &ExactTokenizer,
    &IntTokenizer,
    &BoolTokenizer,
    &HashTokenizer,
];

/// Look up a tokenizer by schema name.
pub fn get_tokenizer(name: &str) -> Option<&'static dyn Tokenizer> {
    TOKENIZERS.iter().copied().find(|t| t.name() == name)
}

/// Resolve a list of schema names, failing on the first unknown one.
pub fn get_tokenizers(names: &[String]) -> Result<Vec<&'static dyn Tokenizer>> {
    names
        .iter()
        .map(|n| {
            get_tokenizer(n).ok_or_else(|| Error::schema(format!("unknown tokenizer {n:?}")))
        })
        .collect()
}

fn expect_str<'a>(t: &dyn Tokenizer, value: &'a Value) -> Result<&'a str> {
    value.as_str().ok_or_else(|| wrong_type(t, value))
}

fn wrong_type(t: &dyn Tokenizer, value: &Value) -> Error {
    Error::schema(format!(
        "tokenizer {:?} cannot index a {} value",
        t.name(),
        value.type_id().name()
    ))
}
