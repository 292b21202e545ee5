//! Predicate schema records and the copy-on-write schema store.
//!
//! The store is read-mostly: readers grab an `Arc` of the whole map and
//! never block writers; writers clone-and-swap under a lock. Initial schema
//! creation is at-most-once per `(namespace, predicate)`: concurrent
//! `ensure_initial` calls agree on a single winner.

use crate::error::{Error, Result};
use crate::keys::attr_name;
use crate::value::TypeId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether a predicate carries a tokenized index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Directive {
    #[default]
    None,
    Index,
}

/// Schema of one namespaced predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaUpdate {
    /// Declared value type.
    pub value_type: TypeId,
    /// Index directive; tokenizers below only apply when this is `Index`.
    pub directive: Directive,
    /// Tokenizer names, resolved through [`crate::tok::get_tokenizer`].
    pub tokenizers: Vec<String>,
    /// Multiple values per subject.
    pub list: bool,
    /// Maintain the cardinality (count) index.
    pub count: bool,
    /// Name of the inverse predicate, if one is declared.
    pub inverse: Option<String>,
}

impl SchemaUpdate {
    /// The initial schema assigned to a predicate first seen during a bulk
    /// load: an untyped, unindexed scalar.
    pub fn initial() -> SchemaUpdate {
        SchemaUpdate {
            value_type: TypeId::Default,
            directive: Directive::None,
            tokenizers: Vec::new(),
            list: false,
            count: false,
            inverse: None,
        }
    }

    /// True when the tokenized index is on.
    pub fn is_indexed(&self) -> bool {
        self.directive == Directive::Index
    }
}

/// Validate a schema transition. The only hard prohibition is list→scalar,
/// which would leave fingerprinted value uids dangling.
pub fn validate_update(attr: &[u8], old: Option<&SchemaUpdate>, new: &SchemaUpdate) -> Result<()> {
    if let Some(old) = old {
        if old.list && !new.list {
            return Err(Error::schema(format!(
                "type can't be changed from list to scalar for attr {:?} without dropping it first",
                String::from_utf8_lossy(attr_name(attr))
            )));
        }
    }
    if new.is_indexed() && new.tokenizers.is_empty() {
        return Err(Error::schema("indexed predicate declares no tokenizers"));
    }
    Ok(())
}

type SchemaMap = FxHashMap<Vec<u8>, Arc<SchemaUpdate>>;

/// Copy-on-write registry of predicate schemas, keyed by namespaced attr
/// bytes.
#[derive(Default)]
pub struct SchemaStore {
    inner: RwLock<Arc<SchemaMap>>,
}

impl SchemaStore {
    pub fn new() -> SchemaStore {
        SchemaStore::default()
    }

    /// Schema for `attr`, if any.
    pub fn get(&self, attr: &[u8]) -> Option<Arc<SchemaUpdate>> {
        self.inner.read().get(attr).cloned()
    }

    /// Install `update` for `attr`, validating the transition.
    pub fn set(&self, attr: &[u8], update: SchemaUpdate) -> Result<()> {
        let mut guard = self.inner.write();
        validate_update(attr, guard.get(attr).map(Arc::as_ref), &update)?;
        let mut next: SchemaMap = (**guard).clone();
        next.insert(attr.to_vec(), Arc::new(update));
        *guard = Arc::new(next);
        Ok(())
    }

    /// Create the initial schema for `attr` unless one exists. Returns the
    /// schema in effect afterwards; at-most-once per attr.
    pub fn ensure_initial(&self, attr: &[u8]) -> Arc<SchemaUpdate> {
        if let Some(existing) = self.get(attr) {
            return existing;
        }
        let mut guard = self.inner.write();
        if let Some(existing) = guard.get(attr) {
            return existing.clone();
        }
        let created = Arc::new(SchemaUpdate::initial());
        let mut next: SchemaMap = (**guard).clone();
        next.insert(attr.to_vec(), created.clone());
        *guard = Arc::new(next);
        tracing::debug!(
            attr = %String::from_utf8_lossy(attr_name(attr)),
            "initial schema created"
        );
        created
    }

    /// Remove the schema for `attr`.
    pub fn delete(&self, attr: &[u8]) {
        let mut guard = self.inner.write();
        if guard.contains_key(attr) {
            let mut next: SchemaMap = (**guard).clone();
            next.remove(attr);
            *guard = Arc::new(next);
        }
    }

    /// Number of registered predicates.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when no predicate is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::namespace_attr;

    fn attr() -> Vec<u8> {
        namespace_attr(0, "Article.title")
    }

    fn indexed(tokenizers: &[&str]) -> SchemaUpdate {
        SchemaUpdate {
            value_type: TypeId::Str,
            directive: Directive::Index,
            tokenizers: tokenizers.iter().map(|s| s.to_string()).collect(),
            list: false,
            count: false,
            inverse: None,
        }
    }

    #[test]
    fn test_ensure_initial_is_at_most_once() {
        let store = SchemaStore::new();
        let a = store.ensure_initial(&attr());
        let b = store.ensure_initial(&attr());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_set_and_get() {
        let store = SchemaStore::new();
        store.set(&attr(), indexed(&["term"])).unwrap();
        let s = store.get(&attr()).unwrap();
        assert!(s.is_indexed());
        assert_eq!(s.tokenizers, vec!["term".to_string()]);
        assert!(store.get(&namespace_attr(1, "Article.title")).is_none());
    }

    #[test]
    fn test_list_to_scalar_forbidden() {
        let store = SchemaStore::new();
        let mut list_schema = indexed(&["term"]);
        list_schema.list = true;
        store.set(&attr(), list_schema).unwrap();

        let scalar = indexed(&["term"]);
        let err = store.set(&attr(), scalar).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_scalar_to_list_allowed() {
        let store = SchemaStore::new();
        store.set(&attr(), indexed(&["term"])).unwrap();
        let mut list_schema = indexed(&["term"]);
        list_schema.list = true;
        store.set(&attr(), list_schema).unwrap();
        assert!(store.get(&attr()).unwrap().list);
    }

    #[test]
    fn test_indexed_without_tokenizers_rejected() {
        let store = SchemaStore::new();
        assert!(store.set(&attr(), indexed(&[])).is_err());
    }

    #[test]
    fn test_schema_serializes_to_json() {
        let s = indexed(&["term", "exact"]);
        let json = serde_json::to_string(&s).unwrap();
        let back: SchemaUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
