//! A fresh directory item holds "." and "..", both with short names.

use crate::storage::item::{CdeItem, CdeItemMut, NewEntry, init_item};
use crate::storage::key::{DOT, DOT_DOT, Key, KeyFormat, build_entry_key, is_longname_key};

const DIR: u64 = 7;

#[test]
fn test_dot_entries_in_empty_item() {
    for format in [KeyFormat::Large, KeyFormat::Short] {
        let dir_key = Key::stat_data(1, DIR);
        let parent_key = Key::stat_data(0, 1);
        let item_key = build_entry_key(format, DIR, DOT);

        let mut body = init_item();
        let mut item = CdeItemMut::new(format, &item_key, &mut body);
        item.paste(&[NewEntry::new(format, DIR, DOT, dir_key)], 0, 1024)
            .unwrap();
        item.paste(&[NewEntry::new(format, DIR, DOT_DOT, parent_key)], 1, 1024)
            .unwrap();

        let view = CdeItem::new(format, &item_key, &body);
        assert_eq!(view.nr_units(), 2);
        view.check().unwrap();
        for unit in 0..2 {
            assert!(!is_longname_key(format, &view.unit_key(unit)));
        }
        let per_entry = format.de_id_size() + 2 + format.obj_key_id_size();
        assert_eq!(body.len(), 2 + 2 * per_entry);
        assert_eq!(view.extract_name(0).as_ref(), DOT);
        assert_eq!(view.extract_name(1).as_ref(), DOT_DOT);
        assert_eq!(view.entry_target(0), dir_key);
        assert_eq!(view.entry_target(1), parent_key);
    }
}

#[test]
fn test_new_directory_lists_dot_entries() {
    let dir = crate::testing::new_directory(4096, KeyFormat::Large);
    let entries = dir.entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, DOT);
    assert_eq!(entries[1].0, DOT_DOT);
}
