//! Balancing estimates: nothing moves into zero free space, and what
//! `can_shift` promises `copy_units` delivers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::item::{
    CdeItem, CdeItemMut, NewEntry, ShiftDirection, ShiftTarget, create_item, init_item,
};
use crate::storage::key::{Key, KeyFormat, build_entry_key};
use crate::testing::{random_names, target};

const DIR: u64 = 7;

fn random_item(format: KeyFormat, seed: u64, count: usize) -> (Key, Vec<u8>) {
    let names = random_names(seed, count);
    let mut entries: Vec<NewEntry<'_>> = names
        .iter()
        .enumerate()
        .map(|(i, name)| NewEntry::new(format, DIR, name, target(i as u64)))
        .collect();
    entries.sort_by_key(|e| e.key);
    let key = entries[0].key;
    (key, create_item(format, &entries).unwrap())
}

#[test]
fn test_zero_free_space_moves_nothing() {
    for (seed, format) in [(10, KeyFormat::Large), (11, KeyFormat::Short)] {
        for count in [1, 2, 17, 40] {
            let (key, body) = random_item(format, seed + count as u64, count);
            let view = CdeItem::new(format, &key, &body);
            for direction in [ShiftDirection::Left, ShiftDirection::Right] {
                for shift_target in [ShiftTarget::NewItem, ShiftTarget::MergeInto] {
                    let estimate = view.can_shift(0, direction, count, shift_target);
                    assert_eq!(estimate.units, 0);
                    assert_eq!(estimate.bytes, 0);
                }
            }
        }
    }
}

#[test]
fn test_estimates_fill_exactly() {
    let format = KeyFormat::Large;
    let mut rng = StdRng::seed_from_u64(99);
    let (key, body) = random_item(format, 12, 30);
    let view = CdeItem::new(format, &key, &body);

    for _ in 0..50 {
        let free = rng.random_range(0..body.len());
        let direction = if rng.random_bool(0.5) {
            ShiftDirection::Left
        } else {
            ShiftDirection::Right
        };
        let estimate = view.can_shift(free, direction, 30, ShiftTarget::MergeInto);
        assert!(estimate.bytes <= free);
        if estimate.units == 0 {
            continue;
        }

        let from = match direction {
            ShiftDirection::Left => 0,
            ShiftDirection::Right => 30 - estimate.units,
        };
        let mut target_body = init_item();
        let before = target_body.len();
        let first = view.unit_key(from);
        let grew = CdeItemMut::new(format, &first, &mut target_body)
            .copy_units(&view, from, estimate.units, direction, free)
            .unwrap();
        assert_eq!(grew, estimate.bytes);
        assert_eq!(target_body.len() - before, estimate.bytes);
        CdeItem::new(format, &first, &target_body).check().unwrap();

        // one more unit would not have fit
        if estimate.units < 30 {
            let more = view.can_shift(free, direction, estimate.units + 1, ShiftTarget::MergeInto);
            assert_eq!(more.units, estimate.units);
        }
    }
}

#[test]
fn test_shift_keeps_every_entry() {
    let format = KeyFormat::Short;
    let (key, mut left) = random_item(format, 13, 24);
    let all: Vec<Vec<u8>> = {
        let view = CdeItem::new(format, &key, &left);
        (0..view.nr_units())
            .map(|unit| view.extract_name(unit).into_owned())
            .collect()
    };

    let view = CdeItem::new(format, &key, &left);
    let estimate = view.can_shift(usize::MAX, ShiftDirection::Right, 10, ShiftTarget::NewItem);
    assert_eq!(estimate.units, 10);
    let from = 24 - 10;
    let right_key = view.unit_key(from);
    let mut right = init_item();
    CdeItemMut::new(format, &right_key, &mut right)
        .copy_units(&view, from, 10, ShiftDirection::Right, usize::MAX)
        .unwrap();
    CdeItemMut::new(format, &key, &mut left)
        .cut(from..=23)
        .unwrap();

    let mut names: Vec<Vec<u8>> = Vec::new();
    for (item_key, body) in [(key, &left), (right_key, &right)] {
        let view = CdeItem::new(format, &item_key, body);
        view.check().unwrap();
        names.extend((0..view.nr_units()).map(|unit| view.extract_name(unit).into_owned()));
    }
    assert_eq!(names, all);
    assert!(build_entry_key(format, DIR, &names[13]) < right_key);
}
