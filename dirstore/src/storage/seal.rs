//! Seals: remembered positions that skip the tree search.
//!
//! A seal records the coord of a unit together with the block id and the
//! version its node had at the time. Validating it looks the node up in the
//! cache only, locks it, and compares versions. Any mutation or dirty
//! marking of the node gives it a new version, so a matching version means
//! the coord still names the same unit.
//!
//! Versions are drawn from one store-wide counter and a node gets a fresh
//! one whenever it is created or reloaded. A recycled block id therefore
//! never carries an old version, and a seal taken on the previous occupant
//! of the block fails validation.

use tracing::{debug, warn};

use crate::storage::coord::Coord;
use crate::storage::key::Key;
use crate::storage::node::Node;
use crate::storage::page::BlockId;
use crate::storage::store::{LockMode, LockRequest, NodeGuard, NodeStore};

/// The seal cannot be used; search the tree again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repeat;

#[derive(Debug, Clone, Copy)]
struct SealState {
    version: u64,
    node: BlockId,
    coord: Coord,
    key: Key,
}

/// A versioned reference to a unit.
#[derive(Debug, Clone, Default)]
pub struct Seal {
    state: Option<SealState>,
}

/// A seal that passed validation: the locked node and the coord inside it.
#[derive(Debug)]
pub struct Validated {
    pub guard: NodeGuard,
    pub coord: Coord,
}

impl Seal {
    #[must_use]
    pub const fn new() -> Self {
        Self { state: None }
    }

    /// Remember `coord` in `node`, which the caller holds locked.
    pub fn init(&mut self, node: &Node, coord: &Coord, key: &Key) {
        self.state = Some(SealState {
            version: node.version(),
            node: node.id(),
            coord: *coord,
            key: *key,
        });
    }

    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.state.is_some()
    }

    /// Block the seal points into.
    #[must_use]
    pub fn node(&self) -> Option<BlockId> {
        self.state.map(|s| s.node)
    }

    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.state.map(|s| s.version)
    }

    /// Clear the seal. Clearing an unset seal does nothing.
    pub fn done(&mut self) {
        self.state = None;
    }

    /// Get the sealed coord back without searching.
    ///
    /// Returns [`Repeat`] if the seal is unset, the node is not cached, the
    /// lock cannot be taken, or the node changed since [`Seal::init`]. When
    /// the store verifies seals, the unit at the coord must also still hold
    /// `expected`.
    pub fn validate(
        &self,
        store: &NodeStore,
        expected: &Key,
        mode: LockMode,
        request: LockRequest,
    ) -> Result<Validated, Repeat> {
        let state = self.state.ok_or(Repeat)?;
        let Some(node) = store.lookup(state.node) else {
            debug!(node = state.node, "seal node not cached");
            return Err(Repeat);
        };
        let guard = store.lock(&node, mode, request).map_err(|e| {
            debug!(node = state.node, error = %e, "seal node not lockable");
            Repeat
        })?;
        if guard.version() != state.version {
            debug!(
                node = state.node,
                sealed = state.version,
                current = guard.version(),
                "stale seal"
            );
            return Err(Repeat);
        }

        if store.config().verify_seals {
            let found = state.coord.unit_key(&guard);
            if state.key != *expected || found != Some(*expected) {
                warn!(
                    node = state.node,
                    expected = ?expected,
                    sealed = ?state.key,
                    found = ?found,
                    "seal names the wrong unit"
                );
                return Err(Repeat);
            }
        }

        Ok(Validated {
            guard,
            coord: state.coord,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::storage::item::NewEntry;
    use crate::storage::key::{KeyFormat, build_entry_key};
    use crate::storage::store::SharedNode;

    const FORMAT: KeyFormat = KeyFormat::Large;

    fn store() -> NodeStore {
        NodeStore::new(
            StoreConfig::default()
                .with_node_size(1024)
                .with_verify_seals(true),
        )
    }

    fn dir_leaf(store: &NodeStore, dir: u64, names: &[&str]) -> SharedNode {
        let node = store.create_node();
        let mut guard = store
            .lock(&node, LockMode::Write, LockRequest::Blocking)
            .expect("lock");
        let mut entries: Vec<NewEntry<'_>> = names
            .iter()
            .map(|n| NewEntry::new(FORMAT, dir, n.as_bytes(), Key::stat_data(dir, 1)))
            .collect();
        entries.sort_by_key(|e| e.key);
        guard
            .node_mut()
            .expect("write")
            .create_dir_item(0, &entries, store.versions())
            .expect("create");
        drop(guard);
        node
    }

    fn seal_at(store: &NodeStore, node: &SharedNode, key: &Key) -> (Seal, Coord) {
        let guard = store
            .lock(node, LockMode::Read, LockRequest::Blocking)
            .expect("lock");
        let (found, coord) = guard.lookup(key);
        assert!(found);
        let mut seal = Seal::new();
        seal.init(&guard, &coord, key);
        (seal, coord)
    }

    #[test]
    fn test_unset_seal_repeats() {
        let store = store();
        let mut seal = Seal::new();
        assert!(!seal.is_set());
        assert_eq!(
            seal.validate(&store, &Key::MIN, LockMode::Read, LockRequest::Blocking)
                .map(|_| ())
                .unwrap_err(),
            Repeat
        );
        seal.done();
        seal.done();
        assert!(!seal.is_set());
    }

    #[test]
    fn test_validate_returns_sealed_coord() {
        let store = store();
        let node = dir_leaf(&store, 7, &["a", "x", "z"]);
        let key = build_entry_key(FORMAT, 7, b"x");
        let (seal, coord) = seal_at(&store, &node, &key);
        assert!(seal.is_set());

        let validated = seal
            .validate(&store, &key, LockMode::Read, LockRequest::Blocking)
            .expect("valid");
        assert_eq!(validated.coord, coord);
        assert_eq!(validated.guard.id(), seal.node().expect("set"));
    }

    #[test]
    fn test_unrelated_node_does_not_invalidate() {
        let store = store();
        let node = dir_leaf(&store, 7, &["a", "x"]);
        let other = dir_leaf(&store, 8, &["a", "b"]);
        let key = build_entry_key(FORMAT, 7, b"x");
        let (seal, _) = seal_at(&store, &node, &key);

        let mut guard = store
            .lock(&other, LockMode::Write, LockRequest::Blocking)
            .expect("lock");
        guard
            .node_mut()
            .expect("write")
            .cut_units(0, 0..=0, store.versions())
            .expect("cut");
        drop(guard);

        assert!(seal
            .validate(&store, &key, LockMode::Write, LockRequest::Blocking)
            .is_ok());
    }

    #[test]
    fn test_mutation_of_sealed_node_invalidates() {
        let store = store();
        let node = dir_leaf(&store, 7, &["a", "x", "z"]);
        let key = build_entry_key(FORMAT, 7, b"x");
        let (seal, _) = seal_at(&store, &node, &key);

        let mut guard = store
            .lock(&node, LockMode::Write, LockRequest::Blocking)
            .expect("lock");
        // "z" sorts after "x": the sealed coord itself is untouched
        guard
            .node_mut()
            .expect("write")
            .cut_units(0, 2..=2, store.versions())
            .expect("cut");
        drop(guard);

        assert!(seal
            .validate(&store, &key, LockMode::Read, LockRequest::Blocking)
            .is_err());
    }

    #[test]
    fn test_dirty_marking_invalidates() {
        let store = store();
        let node = dir_leaf(&store, 7, &["x"]);
        let key = build_entry_key(FORMAT, 7, b"x");
        let (seal, _) = seal_at(&store, &node, &key);
        store.mark_dirty(&mut node.write());
        assert!(seal
            .validate(&store, &key, LockMode::Read, LockRequest::Blocking)
            .is_err());
    }

    #[test]
    fn test_evicted_node_repeats() {
        let store = store();
        let node = dir_leaf(&store, 7, &["x"]);
        let id = node.read().id();
        let key = build_entry_key(FORMAT, 7, b"x");
        let (seal, _) = seal_at(&store, &node, &key);
        drop(node);

        store.evict(id).expect("evict");
        assert!(seal
            .validate(&store, &key, LockMode::Read, LockRequest::Blocking)
            .is_err());

        // reloading gives the node a new version
        store.load(id).expect("reload");
        assert!(seal
            .validate(&store, &key, LockMode::Read, LockRequest::Blocking)
            .is_err());
    }

    #[test]
    fn test_busy_node_repeats_without_blocking() {
        let store = store();
        let node = dir_leaf(&store, 7, &["x"]);
        let key = build_entry_key(FORMAT, 7, b"x");
        let (seal, _) = seal_at(&store, &node, &key);

        let _held = store
            .lock(&node, LockMode::Write, LockRequest::Blocking)
            .expect("lock");
        assert!(seal
            .validate(&store, &key, LockMode::Read, LockRequest::NonBlocking)
            .is_err());
    }

    #[test]
    fn test_wrong_expected_key_repeats() {
        let store = store();
        let node = dir_leaf(&store, 7, &["x", "y"]);
        let key = build_entry_key(FORMAT, 7, b"x");
        let (seal, _) = seal_at(&store, &node, &key);
        let other = build_entry_key(FORMAT, 7, b"y");
        assert!(seal
            .validate(&store, &other, LockMode::Read, LockRequest::Blocking)
            .is_err());
    }
}
