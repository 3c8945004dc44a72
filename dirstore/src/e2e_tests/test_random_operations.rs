//! Random adds and removes checked against a map of what the directory
//! should hold.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::directory::{DirError, Directory};
use crate::storage::item::ItemKind;
use crate::storage::key::{Key, KeyFormat, build_entry_key};
use crate::storage::store::{LockMode, LockRequest};
use crate::testing::{TEST_DIR, TEST_PARENT, new_directory, random_names, target};

/// Every leaf decodes cleanly and keys ascend across leaves.
fn check_leaves(dir: &Directory) {
    let store = dir.store();
    let mut last: Option<Key> = None;
    for id in dir.leaves() {
        let node = store.load(id).unwrap();
        let guard = store.lock(&node, LockMode::Read, LockRequest::Blocking).unwrap();
        let page = guard.write_to_page().unwrap();
        crate::storage::node::Node::from_page(id, &page, 0).unwrap();
        for item in guard.items() {
            assert_eq!(item.kind, ItemKind::CompoundDir);
            let view = item.as_cde(guard.key_format());
            view.check().unwrap();
            for unit in 0..view.nr_units() {
                let key = view.unit_key(unit);
                assert!(last.is_none_or(|last| last <= key));
                last = Some(key);
            }
        }
    }
}

fn run(format: KeyFormat, node_size: usize, seed: u64) {
    let dir = new_directory(node_size, format);
    let names = random_names(seed, 120);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut model: BTreeMap<Vec<u8>, Key> = BTreeMap::new();
    model.insert(b".".to_vec(), TEST_DIR);
    model.insert(b"..".to_vec(), TEST_PARENT);

    for step in 0..600u64 {
        let name = &names[rng.random_range(0..names.len())];
        if rng.random_bool(0.6) {
            let result = dir.add_entry(name, target(step));
            if model.contains_key(name) {
                assert_eq!(result, Err(DirError::AlreadyExists));
            } else {
                result.unwrap();
                model.insert(name.clone(), target(step));
            }
        } else {
            let result = dir.remove_entry(name);
            if model.remove(name).is_some() {
                result.unwrap();
            } else {
                assert_eq!(result, Err(DirError::NotFound));
            }
        }
        if step % 100 == 99 {
            check_leaves(&dir);
        }
    }

    for name in &names {
        assert_eq!(dir.find_entry(name).unwrap(), model.get(name).copied());
    }
    let mut entries = dir.entries().unwrap();
    let keys: Vec<Key> = entries
        .iter()
        .map(|(name, _)| build_entry_key(format, TEST_DIR.objectid(), name))
        .collect();
    assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    entries.sort();
    let expected: Vec<(Vec<u8>, Key)> = model.into_iter().collect();
    assert_eq!(entries, expected);
}

#[test]
fn test_random_operations_large_keys() {
    run(KeyFormat::Large, 512, 21);
}

#[test]
fn test_random_operations_short_keys() {
    run(KeyFormat::Short, 1024, 22);
}
