//! Fill an item with 50 random names, remove every third one and look the
//! rest up by key.

use crate::storage::item::{CdeItem, CdeItemMut, NewEntry, init_item};
use crate::storage::key::{KeyFormat, build_entry_key};
use crate::testing::{random_names, target};

const DIR: u64 = 7;

/// Unit holding `name`, scanning the run of units with its id.
fn find(view: &CdeItem<'_>, name: &[u8]) -> Option<usize> {
    let key = build_entry_key(view.format(), DIR, name);
    let found = view.lookup(&key);
    if !found.found {
        return None;
    }
    (found.pos..view.nr_units())
        .take_while(|&unit| view.unit_key(unit) == key)
        .find(|&unit| view.extract_name(unit).as_ref() == name)
}

fn run(format: KeyFormat, seed: u64) {
    let names = random_names(seed, 50);
    let item_key = build_entry_key(format, DIR, b".");
    let mut body = init_item();

    for (i, name) in names.iter().enumerate() {
        let entry = NewEntry::new(format, DIR, name, target(i as u64));
        let at = CdeItem::new(format, &item_key, &body).lookup(&entry.key).pos;
        CdeItemMut::new(format, &item_key, &mut body)
            .paste(&[entry], at, usize::MAX)
            .unwrap();
    }
    CdeItem::new(format, &item_key, &body).check().unwrap();
    assert_eq!(CdeItem::new(format, &item_key, &body).nr_units(), 50);

    let before = body.len();
    let mut freed = 0;
    for name in names.iter().step_by(3) {
        let unit = find(&CdeItem::new(format, &item_key, &body), name).unwrap();
        let cut = CdeItemMut::new(format, &item_key, &mut body)
            .cut(unit..=unit)
            .unwrap();
        assert_eq!(cut.smallest_removed, build_entry_key(format, DIR, name));
        freed += cut.freed;
    }
    assert_eq!(freed, before - body.len());

    let view = CdeItem::new(format, &item_key, &body);
    view.check().unwrap();
    assert_eq!(view.nr_units(), 33);
    for (i, name) in names.iter().enumerate() {
        let unit = find(&view, name);
        if i % 3 == 0 {
            assert_eq!(unit, None);
        } else {
            let unit = unit.unwrap();
            assert_eq!(view.entry_target(unit), target(i as u64));
        }
    }
}

#[test]
fn test_remove_every_third_large_keys() {
    run(KeyFormat::Large, 1);
}

#[test]
fn test_remove_every_third_short_keys() {
    run(KeyFormat::Short, 2);
}

#[test]
fn test_remove_every_third_in_directory() {
    let dir = crate::testing::new_directory(512, KeyFormat::Large);
    let names = random_names(3, 50);
    for (i, name) in names.iter().enumerate() {
        dir.add_entry(name, target(i as u64)).unwrap();
    }
    assert!(dir.leaves().len() > 1);
    for name in names.iter().step_by(3) {
        dir.remove_entry(name).unwrap();
    }
    for (i, name) in names.iter().enumerate() {
        let expected = (i % 3 != 0).then(|| target(i as u64));
        assert_eq!(dir.find_entry(name).unwrap(), expected);
    }
    assert_eq!(dir.entries().unwrap().len(), 33 + 2);
}
