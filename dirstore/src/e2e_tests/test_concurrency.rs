//! Several threads working on one directory at once.

use std::sync::Arc;
use std::thread;

use crate::storage::key::KeyFormat;
use crate::testing::{new_directory, target};

const THREADS: u64 = 4;
const PER_THREAD: u64 = 60;

fn name(thread: u64, i: u64) -> Vec<u8> {
    format!("t{thread}-entry-{i:03}").into_bytes()
}

#[test]
fn test_concurrent_adds_and_finds() {
    let dir = Arc::new(new_directory(512, KeyFormat::Large));

    thread::scope(|s| {
        for t in 0..THREADS {
            let dir = Arc::clone(&dir);
            s.spawn(move || {
                for i in 0..PER_THREAD {
                    dir.add_entry(&name(t, i), target(t * 1000 + i)).unwrap();
                    assert_eq!(
                        dir.find_entry(&name(t, i)).unwrap(),
                        Some(target(t * 1000 + i))
                    );
                }
            });
        }
    });

    let total = usize::try_from(THREADS * PER_THREAD).unwrap();
    assert_eq!(dir.entries().unwrap().len(), total + 2);
    for t in 0..THREADS {
        for i in 0..PER_THREAD {
            assert_eq!(dir.find_entry(&name(t, i)).unwrap(), Some(target(t * 1000 + i)));
        }
    }
}

#[test]
fn test_concurrent_removes() {
    let dir = Arc::new(new_directory(512, KeyFormat::Short));
    for t in 0..THREADS {
        for i in 0..PER_THREAD {
            dir.add_entry(&name(t, i), target(t * 1000 + i)).unwrap();
        }
    }

    thread::scope(|s| {
        for t in 0..THREADS {
            let dir = Arc::clone(&dir);
            s.spawn(move || {
                for i in (0..PER_THREAD).filter(|i| i % 2 == 0) {
                    dir.remove_entry(&name(t, i)).unwrap();
                }
            });
        }
    });

    for t in 0..THREADS {
        for i in 0..PER_THREAD {
            let expected = (i % 2 == 1).then(|| target(t * 1000 + i));
            assert_eq!(dir.find_entry(&name(t, i)).unwrap(), expected);
        }
    }
}
