use std::collections::HashSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::StoreConfig;
use crate::storage::{Directory, Key, KeyFormat, NodeStore};

/// Directory used by tests, and its parent.
pub const TEST_DIR: Key = Key::stat_data(1, 7);
pub const TEST_PARENT: Key = Key::stat_data(0, 1);

/// Create a store with seal verification on.
pub fn new_store(node_size: usize, key_format: KeyFormat) -> Arc<NodeStore> {
    let config = StoreConfig::default()
        .with_node_size(node_size)
        .with_key_format(key_format)
        .with_verify_seals(true);
    Arc::new(NodeStore::new(config))
}

/// Create [`TEST_DIR`] in a fresh store.
pub fn new_directory(node_size: usize, key_format: KeyFormat) -> Directory {
    Directory::create(new_store(node_size, key_format), TEST_DIR, TEST_PARENT).unwrap()
}

/// Target of the `n`th test entry.
pub const fn target(n: u64) -> Key {
    Key::stat_data(TEST_DIR.objectid(), 1000 + n)
}

/// `count` distinct names of 3 to 20 bytes, none containing NUL.
pub fn random_names(seed: u64, count: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(count);
    while names.len() < count {
        let len = rng.random_range(3..=20);
        let name: Vec<u8> = (0..len).map(|_| rng.random_range(1..=u8::MAX)).collect();
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    names
}
