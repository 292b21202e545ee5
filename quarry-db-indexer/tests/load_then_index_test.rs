//! Full-pipeline test: map edges with the loader, reduce the shard files
//! into a primary store, then rebuild an index over the loaded data.
//!
//! The reduce step here is a miniature stand-in for the real reducer: it
//! k-way merges nothing; it just groups each shard file's sorted records
//! by key and materializes posting lists.

use quarry_db_core::keys::{index_prefix_for_tokenizer, namespace_attr};
use quarry_db_core::posting::PostingList;
use quarry_db_core::schema::{Directive, SchemaUpdate};
use quarry_db_core::storage::{Store, USER_META_COMPLETE_POSTING};
use quarry_db_core::tok::ID_TERM;
use quarry_db_core::value::{TypeId, Value};
use quarry_db_core::Engine;
use quarry_db_indexer::{run_rebuild, CancelToken, IndexRebuild};
use quarry_db_loader::map_entry::MapEntry;
use quarry_db_loader::{read_map_file, Edge, LoaderOptions, Mapper};
use std::collections::BTreeMap;
use std::sync::Arc;

const LOAD_TS: u64 = 10;
const REBUILD_TS: u64 = 50;

/// Group sorted map-entries by key and write one materialized posting list
/// per key.
fn reduce_into(store: &dyn Store, opts: &LoaderOptions) {
    let mut by_key: BTreeMap<Vec<u8>, PostingList> = BTreeMap::new();
    for shard in 0..opts.map_shards {
        let Ok(dir) = std::fs::read_dir(opts.shard_dir(shard)) else { continue };
        for file in dir {
            let map_file = read_map_file(&file.unwrap().path()).unwrap();
            for record in &map_file.records {
                let entry = MapEntry(record);
                let posting = entry.posting().unwrap();
                by_key.entry(entry.key().to_vec()).or_default().apply(posting);
            }
        }
    }
    for (key, list) in by_key {
        store
            .set_entry_at(key, list.encode(), USER_META_COMPLETE_POSTING, LOAD_TS)
            .unwrap();
    }
}

#[test]
fn test_load_reduce_then_rebuild_term_index() {
    let tmp = tempfile::tempdir().unwrap();
    let opts = LoaderOptions {
        map_shards: 4,
        tmp_dir: tmp.path().join("load"),
        ..LoaderOptions::default()
    };

    // One isolated engine owns the primary store and the schema registry.
    let engine = Engine::in_memory();

    // Load with no index configured: term arrives later via schema change.
    // The blank-node subjects qualify the bare `title` predicate, so the
    // loaded attr is `Article.title`.
    let attr = namespace_attr(0, "Article.title");
    let base_schema = SchemaUpdate {
        value_type: TypeId::Str,
        directive: Directive::None,
        tokenizers: vec![],
        list: false,
        count: false,
        inverse: None,
    };
    engine.schema().set(&attr, base_schema.clone()).unwrap();

    let mut mapper = Mapper::new(opts.clone(), Arc::clone(engine.schema())).unwrap();
    let edges: Vec<Edge> = (0..25)
        .map(|i| {
            Edge::literal(
                &format!("_:Article.a{i}"),
                "title",
                Value::Str(format!("common token{i}")),
                0,
            )
        })
        .collect();
    mapper.map_edges(edges).unwrap();

    let primary = engine.store().as_ref();
    reduce_into(primary, &opts);
    assert_eq!(
        primary.scan_prefix_at(&[], LOAD_TS).unwrap().len(),
        25,
        "one materialized posting list per subject"
    );

    // Schema change: index with the term tokenizer.
    let mut indexed = base_schema.clone();
    indexed.directive = Directive::Index;
    indexed.tokenizers = vec!["term".into()];
    let rb = IndexRebuild {
        attr: attr.clone(),
        start_ts: REBUILD_TS,
        old_schema: Some(base_schema),
        current_schema: indexed,
    };
    run_rebuild(&rb, primary, &tmp.path().join("rebuild"), &CancelToken::new()).unwrap();

    // "common" appears in every title: its posting list holds all 25 uids.
    let prefix = index_prefix_for_tokenizer(&attr, ID_TERM);
    let index_keys = primary.scan_prefix_at(&prefix, REBUILD_TS).unwrap();
    assert_eq!(index_keys.len(), 1 + 25, "one shared token plus one per title");

    let common = index_keys
        .iter()
        .find(|kv| kv.key.ends_with(b"common"))
        .expect("shared token indexed");
    let list = PostingList::decode(&common.versions[0].value).unwrap();
    assert_eq!(list.len(), 25);
}
