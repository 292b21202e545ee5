//! External-identifier → UID allocation.
//!
//! XIDs that parse as non-zero u64 literals (decimal or `0x` hex) are taken
//! verbatim and the allocation watermark jumps past them, so explicitly
//! numbered nodes and freshly assigned ones never collide. Everything else
//! is interned: the namespaced XID bytes route (by xxh3) to one of a fixed
//! set of shards, each a mutex-guarded radix trie. The tries own their key
//! storage outright; an interned XID never borrows from the parser's line
//! buffers.
//!
//! UIDs are strictly positive and monotonic for new inputs; equal inputs
//! always map to the same UID. UID 0 is never returned.

use parking_lot::Mutex;
use quarry_db_core::keys::namespace_attr;
use std::sync::atomic::{AtomicU64, Ordering};
use xxhash_rust::xxh3::xxh3_64;

const SHARD_COUNT: usize = 32;

/// Concurrent XID → UID map.
pub struct XidMap {
    shards: Vec<Mutex<Trie>>,
    next_uid: AtomicU64,
}

impl XidMap {
    pub fn new() -> XidMap {
        XidMap {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Trie::new())).collect(),
            next_uid: AtomicU64::new(1),
        }
    }

    /// Resolve `xid` within `namespace` to a UID.
    ///
    /// Returns `(uid, is_new)`; `is_new` is true only when this call
    /// allocated a fresh UID. Idempotent and thread-safe.
    pub fn assign(&self, xid: &str, namespace: u64) -> (u64, bool) {
        if let Some(uid) = parse_uid_literal(xid) {
            self.bump_past(uid);
            return (uid, false);
        }
        // XIDs from different namespaces may collide textually; the interned
        // key carries the namespace prefix.
        let key = namespace_attr(namespace, xid);
        let shard = (xxh3_64(&key) as usize) % SHARD_COUNT;
        self.shards[shard]
            .lock()
            .get_or_insert(&key, || self.next_uid.fetch_add(1, Ordering::SeqCst))
    }

    /// Ensure future allocations are strictly greater than `uid`.
    pub fn bump_past(&self, uid: u64) {
        self.next_uid.fetch_max(uid.saturating_add(1), Ordering::SeqCst);
    }

    /// Number of interned (non-numeric) XIDs.
    pub fn interned_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}

impl Default for XidMap {
    fn default() -> Self {
        XidMap::new()
    }
}

/// Parse an explicitly numeric XID. Accepts decimal and `0x`-prefixed hex;
/// zero is not a valid UID and falls through to interning.
fn parse_uid_literal(xid: &str) -> Option<u64> {
    let parsed = match xid.strip_prefix("0x").or_else(|| xid.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => xid.parse::<u64>().ok(),
    };
    parsed.filter(|&u| u != 0)
}

// ============================================================================
// Radix trie
// ============================================================================

/// Compressed byte trie. Nodes own their fragments; values are UIDs.
struct Trie {
    root: Node,
    len: usize,
}

struct Node {
    fragment: Vec<u8>,
    uid: u64, // 0 = no value at this node
    children: Vec<Node>,
}

impl Node {
    fn leaf(fragment: Vec<u8>, uid: u64) -> Node {
        Node {
            fragment,
            uid,
            children: Vec::new(),
        }
    }

    fn child_index(&self, first: u8) -> Option<usize> {
        self.children
            .iter()
            .position(|c| c.fragment.first() == Some(&first))
    }
}

impl Trie {
    fn new() -> Trie {
        Trie {
            root: Node::leaf(Vec::new(), 0),
            len: 0,
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    /// Existing UID for `key`, or the UID produced by `alloc`, inserted.
    fn get_or_insert<F>(&mut self, key: &[u8], alloc: F) -> (u64, bool)
    where
        F: FnOnce() -> u64,
    {
        let mut node = &mut self.root;
        let mut rest = key;
        loop {
            if rest.is_empty() {
                if node.uid != 0 {
                    return (node.uid, false);
                }
                node.uid = alloc();
                self.len += 1;
                return (node.uid, true);
            }
            let Some(ci) = node.child_index(rest[0]) else {
                let uid = alloc();
                node.children.push(Node::leaf(rest.to_vec(), uid));
                self.len += 1;
                return (uid, true);
            };
            let shared = common_prefix(&node.children[ci].fragment, rest);
            if shared == node.children[ci].fragment.len() {
                node = &mut node.children[ci];
                rest = &rest[shared..];
                continue;
            }
            // Split the child at the divergence point.
            let child = &mut node.children[ci];
            let tail = child.fragment.split_off(shared);
            let demoted = Node {
                fragment: tail,
                uid: std::mem::replace(&mut child.uid, 0),
                children: std::mem::take(&mut child.children),
            };
            child.children.push(demoted);
            if rest.len() == shared {
                child.uid = alloc();
                self.len += 1;
                return (child.uid, true);
            }
            let uid = alloc();
            child.children.push(Node::leaf(rest[shared..].to_vec(), uid));
            self.len += 1;
            return (uid, true);
        }
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_assign_is_idempotent() {
        let m = XidMap::new();
        let (a, new_a) = m.assign("_:Person.alice", 0);
        let (b, new_b) = m.assign("_:Person.alice", 0);
        assert_eq!(a, b);
        assert!(new_a);
        assert!(!new_b);
        assert_ne!(a, 0);
    }

    #[test]
    fn test_distinct_xids_get_distinct_uids() {
        let m = XidMap::new();
        let mut seen = HashSet::new();
        for i in 0..1000 {
            let (uid, is_new) = m.assign(&format!("node-{i}"), 0);
            assert!(is_new);
            assert!(uid != 0);
            assert!(seen.insert(uid), "duplicate uid {uid}");
        }
        assert_eq!(m.interned_count(), 1000);
    }

    #[test]
    fn test_fresh_allocator_starts_at_one() {
        let m = XidMap::new();
        let (alice, _) = m.assign("_:Person.alice", 0);
        let (bob, _) = m.assign("_:Person.bob", 0);
        assert_eq!(alice, 1);
        assert_eq!(bob, 2);
    }

    #[test]
    fn test_numeric_xids_pass_through_and_bump() {
        let m = XidMap::new();
        let (uid, is_new) = m.assign("500", 0);
        assert_eq!(uid, 500);
        assert!(!is_new);
        let (uid, _) = m.assign("0xff", 0);
        assert_eq!(uid, 255);
        // Fresh allocations land past the highest literal seen.
        let (uid, is_new) = m.assign("_:n", 0);
        assert!(is_new);
        assert!(uid > 500);
    }

    #[test]
    fn test_zero_literal_is_interned_not_passed_through() {
        let m = XidMap::new();
        let (uid, is_new) = m.assign("0", 0);
        assert!(is_new);
        assert_ne!(uid, 0);
    }

    #[test]
    fn test_namespaces_isolate_xids() {
        let m = XidMap::new();
        let (a, _) = m.assign("_:x", 0);
        let (b, _) = m.assign("_:x", 7);
        assert_ne!(a, b);
    }

    #[test]
    fn test_trie_split_on_shared_prefixes() {
        let m = XidMap::new();
        // Force fragment splits: keys share long prefixes.
        let keys = ["abcdef", "abcxyz", "abc", "abcdefgh", "ab"];
        let uids: Vec<u64> = keys.iter().map(|k| m.assign(k, 0).0).collect();
        let unique: HashSet<_> = uids.iter().collect();
        assert_eq!(unique.len(), keys.len());
        // Re-assignment returns identical uids.
        for (k, &uid) in keys.iter().zip(&uids) {
            assert_eq!(m.assign(k, 0).0, uid);
        }
    }

    #[test]
    fn test_concurrent_assign_agrees() {
        let m = Arc::new(XidMap::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let m = Arc::clone(&m);
            handles.push(std::thread::spawn(move || {
                (0..500)
                    .map(|i| m.assign(&format!("shared-{i}"), 0).0)
                    .collect::<Vec<u64>>()
            }));
        }
        let results: Vec<Vec<u64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results[1..] {
            assert_eq!(r, &results[0]);
        }
        assert_eq!(m.interned_count(), 500);
    }
}
