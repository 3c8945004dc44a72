//! A seal survives changes to other nodes and goes stale when its own node
//! changes.

use std::sync::Arc;

use crate::storage::directory::Directory;
use crate::storage::key::{Key, KeyFormat};
use crate::storage::seal::Repeat;
use crate::storage::store::{LockMode, LockRequest};
use crate::testing::{TEST_DIR, new_store, target};

#[test]
fn test_seal_isolation() {
    let store = new_store(4096, KeyFormat::Large);
    let dir = Directory::create(Arc::clone(&store), TEST_DIR, Key::stat_data(0, 1)).unwrap();
    let other = Directory::create(Arc::clone(&store), Key::stat_data(1, 8), Key::stat_data(0, 1))
        .unwrap();
    assert_ne!(dir.leaves(), other.leaves());

    dir.add_entry(b"X", target(1)).unwrap();
    dir.add_entry(b"Y", target(2)).unwrap();
    assert_eq!(dir.find_entry(b"X").unwrap(), Some(target(1)));
    let seal = dir.seal(b"X").unwrap();
    let x_key = crate::storage::key::build_entry_key(KeyFormat::Large, TEST_DIR.objectid(), b"X");

    // a different directory's leaf changes
    other.add_entry(b"unrelated", target(3)).unwrap();
    let validated = seal
        .validate(&store, &x_key, LockMode::Read, LockRequest::Blocking)
        .unwrap();
    assert_eq!(validated.guard.id(), dir.leaves()[0]);
    drop(validated);
    let (hits, misses) = dir.seal_stats();
    assert_eq!(dir.find_entry(b"X").unwrap(), Some(target(1)));
    assert_eq!(dir.seal_stats(), (hits + 1, misses));

    // an unrelated entry in the same leaf goes away, through its own seal
    dir.remove_entry(b"Y").unwrap();
    assert_eq!(dir.seal_stats(), (hits + 2, misses));
    assert_eq!(
        seal.validate(&store, &x_key, LockMode::Read, LockRequest::Blocking)
            .map(|_| ())
            .unwrap_err(),
        Repeat
    );
    assert_eq!(dir.find_entry(b"X").unwrap(), Some(target(1)));
    assert_eq!(dir.seal_stats(), (hits + 2, misses + 1));
}

#[test]
fn test_seal_goes_stale_when_node_is_evicted() {
    let store = new_store(4096, KeyFormat::Short);
    let dir = Directory::create(Arc::clone(&store), TEST_DIR, Key::stat_data(0, 1)).unwrap();
    dir.add_entry(b"kept", target(1)).unwrap();
    let leaf = dir.leaves()[0];

    store.evict(leaf).unwrap();
    let (hits, misses) = dir.seal_stats();
    assert_eq!(dir.find_entry(b"kept").unwrap(), Some(target(1)));
    assert_eq!(dir.seal_stats(), (hits, misses + 1));
    // the search reloaded the leaf and sealed it again
    assert_eq!(dir.find_entry(b"kept").unwrap(), Some(target(1)));
    assert_eq!(dir.seal_stats(), (hits + 1, misses + 1));
}
