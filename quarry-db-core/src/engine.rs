//! The engine value: ownership root for what used to be process globals.
//!
//! The primary posting store and the schema registry are owned here and
//! passed down to every subsystem explicitly. Tests instantiate isolated
//! engines; nothing in the workspace reaches for a global.

use crate::schema::SchemaStore;
use crate::storage::{MemStore, Store};
use std::sync::Arc;

/// Owns the shared state of one database instance.
pub struct Engine {
    store: Arc<dyn Store>,
    schema: Arc<SchemaStore>,
}

impl Engine {
    /// Wrap an already-opened posting store.
    pub fn new(store: Arc<dyn Store>) -> Engine {
        Engine {
            store,
            schema: Arc::new(SchemaStore::new()),
        }
    }

    /// A fully in-memory engine, for staging and tests.
    pub fn in_memory() -> Engine {
        Engine::new(Arc::new(MemStore::new()))
    }

    /// The posting store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The schema registry.
    pub fn schema(&self) -> &Arc<SchemaStore> {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::namespace_attr;

    #[test]
    fn test_engines_are_isolated() {
        let a = Engine::in_memory();
        let b = Engine::in_memory();
        a.schema().ensure_initial(&namespace_attr(0, "p"));
        assert_eq!(a.schema().len(), 1);
        assert!(b.schema().is_empty());
    }
}
