//! Directory operations on top of compound directory items.
//!
//! A directory's entries live in leaves found through a [`TreeSearch`].
//! Every operation first tries the seal left behind by the last operation
//! on the same name. A seal that validates hands back the locked leaf and
//! the entry's coord without a search; otherwise the leaf is found through
//! the tree and locked, the entry is located with a binary search, and the
//! seal is renewed once the operation succeeds.
//!
//! # Leaves
//!
//! [`LeafIndex`] maps the smallest key each leaf may hold to the leaf. The
//! leftmost leaf always starts at [`Key::MIN`]. A leaf with no room for a
//! new entry is split by shifting half its units into a fresh node; a leaf
//! emptied by a removal is freed, and a leaf that drops below half full
//! tries to give its units to its left neighbor.
//!
//! # Locking
//!
//! Operations lock one leaf at a time, except that balancing may try-lock
//! the left neighbor of a leaf it already holds. Index changes happen only
//! under the write lock of the leaf they concern, so a leaf that is still
//! indexed for a key after being locked is the right leaf for that key.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::storage::coord::{Between, Coord};
use crate::storage::item::{
    ItemError, ItemKind, NewEntry, estimate_create, estimate_insert, max_name_len,
};
use crate::storage::key::{DOT, DOT_DOT, Key, build_entry_key, is_valid_locality};
use crate::storage::node::{Node, NodeError, item_header_size, max_item_body};
use crate::storage::page::BlockId;
use crate::storage::seal::{Repeat, Seal, Validated};
use crate::storage::store::{LockMode, LockRequest, NodeGuard, NodeStore, StoreError};

/// Attempts at finding and locking a leaf before giving up.
const MAX_RETRIES: usize = 64;

/// Finds the leaf that holds, or would hold, a key.
pub trait TreeSearch: Send + Sync {
    fn find_leaf(&self, key: &Key) -> Option<BlockId>;

    /// Leaf to the left of `leaf`, if any.
    fn left_neighbor(&self, leaf: BlockId) -> Option<BlockId>;

    /// All leaves in key order.
    fn leaves(&self) -> Vec<BlockId>;

    /// Register `leaf` as holding keys from `separator` up to the next
    /// leaf's separator.
    fn insert_leaf(&self, separator: Key, leaf: BlockId);

    fn remove_leaf(&self, leaf: BlockId);

    fn update_separator(&self, leaf: BlockId, separator: Key);
}

/// Sorted `(separator, leaf)` pairs.
#[derive(Debug)]
pub struct LeafIndex {
    leaves: RwLock<Vec<(Key, BlockId)>>,
}

impl LeafIndex {
    /// Index with a single leaf covering every key.
    #[must_use]
    pub fn new(first: BlockId) -> Self {
        Self {
            leaves: RwLock::new(vec![(Key::MIN, first)]),
        }
    }

    /// Separator of `leaf`.
    #[must_use]
    pub fn separator(&self, leaf: BlockId) -> Option<Key> {
        self.leaves
            .read()
            .iter()
            .find(|(_, id)| *id == leaf)
            .map(|(sep, _)| *sep)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.leaves.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves.read().is_empty()
    }
}

impl TreeSearch for LeafIndex {
    fn find_leaf(&self, key: &Key) -> Option<BlockId> {
        let leaves = self.leaves.read();
        let after = leaves.partition_point(|(sep, _)| sep <= key);
        after.checked_sub(1).map(|pos| leaves[pos].1)
    }

    fn left_neighbor(&self, leaf: BlockId) -> Option<BlockId> {
        let leaves = self.leaves.read();
        let pos = leaves.iter().position(|(_, id)| *id == leaf)?;
        pos.checked_sub(1).map(|left| leaves[left].1)
    }

    fn leaves(&self) -> Vec<BlockId> {
        self.leaves.read().iter().map(|(_, id)| *id).collect()
    }

    fn insert_leaf(&self, separator: Key, leaf: BlockId) {
        let mut leaves = self.leaves.write();
        let pos = leaves.partition_point(|(sep, _)| *sep <= separator);
        leaves.insert(pos, (separator, leaf));
    }

    fn remove_leaf(&self, leaf: BlockId) {
        self.leaves.write().retain(|(_, id)| *id != leaf);
    }

    fn update_separator(&self, leaf: BlockId, separator: Key) {
        let mut leaves = self.leaves.write();
        // the leftmost leaf keeps covering everything below the second one
        if let Some(pos) = leaves
            .iter()
            .position(|(_, id)| *id == leaf)
            .filter(|&pos| pos > 0)
        {
            leaves[pos].0 = separator;
            debug_assert!(leaves.windows(2).all(|w| w[0].0 < w[1].0));
        }
    }
}

/// Where a new entry goes in a leaf.
enum Place {
    /// Paste before unit `at` of item `pos`.
    Paste { pos: usize, at: usize },
    /// Create a new item at `pos`.
    Create { pos: usize },
}

/// One directory: its stat-data key, its leaves and the seals of recently
/// used names.
pub struct Directory<T: TreeSearch = LeafIndex> {
    store: Arc<NodeStore>,
    dir: Key,
    tree: T,
    seals: Mutex<HashMap<Vec<u8>, Seal>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Directory<LeafIndex> {
    /// Create directory `dir` in a new leaf holding `"."` and `".."`.
    pub fn create(store: Arc<NodeStore>, dir: Key, parent: Key) -> Result<Self, DirError> {
        check_dir_key(&dir)?;
        let format = store.config().key_format;
        let oid = dir.objectid();
        let leaf = store.create_node();
        let mut guard = store.lock(&leaf, LockMode::Write, LockRequest::Blocking)?;
        let node = guard.node_mut()?;
        let entries = [
            NewEntry::new(format, oid, DOT, dir),
            NewEntry::new(format, oid, DOT_DOT, parent),
        ];
        node.create_dir_item(0, &entries, store.versions())?;
        store.mark_dirty(node);
        let id = node.id();
        drop(guard);

        info!(dir = oid, leaf = id, "created directory");
        Ok(Self::with_tree(store, dir, LeafIndex::new(id)))
    }

    /// Open directory `dir` stored in `leaves`, given in key order. Every
    /// leaf is loaded, which checks its items.
    pub fn open(store: Arc<NodeStore>, dir: Key, leaves: &[BlockId]) -> Result<Self, DirError> {
        check_dir_key(&dir)?;
        let (&first, rest) = leaves.split_first().ok_or(DirError::NoLeaf)?;
        store.load(first)?;
        let index = LeafIndex::new(first);
        for &id in rest {
            let node = store.load(id)?;
            let Some(separator) = node.read().unit_key(0, 0) else {
                debug!(leaf = id, "skipping empty leaf");
                continue;
            };
            index.insert_leaf(separator, id);
        }
        Ok(Self::with_tree(store, dir, index))
    }
}

impl<T: TreeSearch> Directory<T> {
    pub fn with_tree(store: Arc<NodeStore>, dir: Key, tree: T) -> Self {
        Self {
            store,
            dir,
            tree,
            seals: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Stat-data key of the directory.
    #[must_use]
    pub const fn key(&self) -> Key {
        self.dir
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    #[must_use]
    pub const fn tree(&self) -> &T {
        &self.tree
    }

    /// Leaves in key order.
    #[must_use]
    pub fn leaves(&self) -> Vec<BlockId> {
        self.tree.leaves()
    }

    /// Seal hits and misses so far.
    #[must_use]
    pub fn seal_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Copy of the seal kept for `name`.
    #[must_use]
    pub fn seal(&self, name: &[u8]) -> Option<Seal> {
        self.seals.lock().get(name).cloned()
    }

    fn entry_key(&self, name: &[u8]) -> Key {
        build_entry_key(self.store.config().key_format, self.dir.objectid(), name)
    }

    /// Longest name an entry can have.
    #[must_use]
    pub fn max_name_len(&self) -> usize {
        let config = self.store.config();
        max_name_len(
            config.key_format,
            max_item_body(config.key_format, config.node_size),
        )
    }

    fn validate_name(&self, name: &[u8]) -> Result<(), DirError> {
        if name.is_empty() || name.contains(&0) {
            return Err(DirError::InvalidName);
        }
        let max = self.max_name_len();
        if name.len() > max {
            return Err(DirError::NameTooLong {
                len: name.len(),
                max,
            });
        }
        Ok(())
    }

    /// Look `name` up. Returns the stat-data key the entry points at.
    pub fn find_entry(&self, name: &[u8]) -> Result<Option<Key>, DirError> {
        self.validate_name(name)?;
        let key = self.entry_key(name);

        if let Some((_, target)) = self.validate_seal(name, &key, LockMode::Read) {
            return Ok(Some(target));
        }

        let guard = self.lock_leaf(&key, LockMode::Read)?;
        let Some(coord) = find_in_leaf(&guard, &key, name) else {
            return Ok(None);
        };
        let target = entry_at(&guard, &coord, name);
        self.reseal(name, &guard, &coord, &key);
        Ok(target)
    }

    /// Add entry `name` pointing at `target`.
    pub fn add_entry(&self, name: &[u8], target: Key) -> Result<(), DirError> {
        self.validate_name(name)?;
        let key = self.entry_key(name);

        if self.validate_seal(name, &key, LockMode::Read).is_some() {
            return Err(DirError::AlreadyExists);
        }

        let entry = NewEntry::new(
            self.store.config().key_format,
            self.dir.objectid(),
            name,
            target,
        );
        for _ in 0..MAX_RETRIES {
            let mut guard = self.lock_leaf(&key, LockMode::Write)?;
            if find_in_leaf(&guard, &key, name).is_some() {
                return Err(DirError::AlreadyExists);
            }
            let node = guard.node_mut()?;
            if let Some(coord) = self.insert_into(node, &entry)? {
                self.store.mark_dirty(node);
                self.reseal(name, node, &coord, &key);
                return Ok(());
            }
            self.split_leaf(node, &key)?;
        }
        Err(DirError::Busy)
    }

    /// Remove entry `name`. `"."` and `".."` cannot be removed.
    pub fn remove_entry(&self, name: &[u8]) -> Result<(), DirError> {
        self.validate_name(name)?;
        if name == DOT || name == DOT_DOT {
            return Err(DirError::InvalidName);
        }
        let key = self.entry_key(name);

        let (mut guard, coord) = match self.validate_seal(name, &key, LockMode::Write) {
            Some((Validated { guard, coord }, _)) => (guard, coord),
            None => {
                let guard = self.lock_leaf(&key, LockMode::Write)?;
                let coord = find_in_leaf(&guard, &key, name).ok_or(DirError::NotFound)?;
                (guard, coord)
            }
        };

        let node = guard.node_mut()?;
        let unit = coord.unit_pos;
        node.cut_units(coord.item_pos, unit..=unit, self.store.versions())?;
        self.store.mark_dirty(node);
        self.seals.lock().remove(name);
        self.after_remove(node, &coord)
    }

    /// Every `(name, target)` pair in key order.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Key)>, DirError> {
        let probe = self.entry_key(DOT);
        let mut out = Vec::new();
        for id in self.tree.leaves() {
            let node = self.store.load(id)?;
            let guard = self.store.lock(&node, LockMode::Read, LockRequest::Blocking)?;
            let format = guard.key_format();
            for item in guard.items() {
                if !item.holds_entries_like(&probe) {
                    continue;
                }
                let view = item.as_cde(format);
                for unit in 0..view.nr_units() {
                    out.push((view.extract_name(unit).into_owned(), view.entry_target(unit)));
                }
            }
        }
        Ok(out)
    }

    /// Lock the sealed leaf of `name` and return it with the entry's
    /// target. A hit is only counted once the entry is seen at the coord.
    fn validate_seal(&self, name: &[u8], key: &Key, mode: LockMode) -> Option<(Validated, Key)> {
        let seal = self.seals.lock().get(name).cloned()?;
        let found = match seal.validate(&self.store, key, mode, LockRequest::Blocking) {
            Ok(validated) => entry_at(&validated.guard, &validated.coord, name)
                .map(|target| (validated, target)),
            Err(Repeat) => None,
        };
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(dir = self.dir.objectid(), "seal miss");
        }
        found
    }

    fn reseal(&self, name: &[u8], node: &Node, coord: &Coord, key: &Key) {
        self.seals
            .lock()
            .entry(name.to_vec())
            .or_default()
            .init(node, coord, key);
    }

    /// Find and lock the leaf for `key`, retrying while leaves move.
    fn lock_leaf(&self, key: &Key, mode: LockMode) -> Result<NodeGuard, DirError> {
        for _ in 0..MAX_RETRIES {
            let id = self.tree.find_leaf(key).ok_or(DirError::NoLeaf)?;
            let node = match self.store.load(id) {
                Ok(node) => node,
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let guard = self.store.lock(&node, mode, LockRequest::Blocking)?;
            let current = self.store.lookup(id);
            if self.tree.find_leaf(key) == Some(id) && current.is_some_and(|n| guard.locks(&n)) {
                return Ok(guard);
            }
            debug!(leaf = id, "leaf moved while locking");
        }
        Err(DirError::Busy)
    }

    /// Insert `entry` into `node`. Returns `None` if it does not fit.
    fn insert_into(&self, node: &mut Node, entry: &NewEntry<'_>) -> Result<Option<Coord>, DirError> {
        let format = node.key_format();
        let entries = std::slice::from_ref(entry);
        let (_, coord) = node.lookup(&entry.key);
        let is_ours = |node: &Node, pos: usize| {
            node.item(pos)
                .is_some_and(|item| item.holds_entries_like(&entry.key))
        };

        let place = match coord.between {
            Between::AtUnit | Between::BeforeUnit | Between::AfterUnit
                if is_ours(node, coord.item_pos) =>
            {
                let at = match coord.between {
                    Between::AtUnit => run_end(node, &coord),
                    Between::AfterUnit => coord.unit_pos + 1,
                    _ => coord.unit_pos,
                };
                Place::Paste {
                    pos: coord.item_pos,
                    at,
                }
            }
            Between::EmptyNode => Place::Create { pos: 0 },
            Between::BeforeItem if is_ours(node, 0) => Place::Paste { pos: 0, at: 0 },
            Between::BeforeItem => Place::Create { pos: 0 },
            _ => {
                let pos = coord.item_pos + 1;
                if is_ours(node, pos) {
                    Place::Paste { pos, at: 0 }
                } else {
                    Place::Create { pos }
                }
            }
        };

        let needed = match place {
            Place::Paste { .. } => estimate_insert(format, entries),
            Place::Create { .. } => item_header_size(format) + estimate_create(format, entries),
        };
        if needed > node.free_space() {
            return Ok(None);
        }

        let versions = self.store.versions();
        let (pos, at) = match place {
            Place::Paste { pos, at } => {
                node.paste_entries(pos, at, entries, versions)?;
                (pos, at)
            }
            Place::Create { pos } => {
                node.create_dir_item(pos, entries, versions)?;
                (pos, 0)
            }
        };
        Ok(Some(Coord::new(node.id(), pos, at, Between::AtUnit)))
    }

    /// Make room for `key` in the full leaf `node`.
    fn split_leaf(&self, node: &mut Node, key: &Key) -> Result<(), DirError> {
        let Some(last) = node.nr_items().checked_sub(1) else {
            return Err(DirError::NoSpace);
        };
        let n = node.nr_units(last);
        let last_key = node.unit_key(last, n.saturating_sub(1)).ok_or(DirError::NoSpace)?;

        let shared = self.store.create_node();
        let mut guard = self.store.lock(&shared, LockMode::Write, LockRequest::Blocking)?;
        let right = guard.node_mut()?;
        let right_id = right.id();

        let (separator, moved) = if *key > last_key {
            // appending: start an empty leaf at the new key
            (*key, 0)
        } else {
            let moved = node.shift_right(right, (n / 2).max(1), self.store.versions())?;
            let Some(first) = right.unit_key(0, 0) else {
                drop(guard);
                self.store.free(right_id);
                return Err(DirError::NoSpace);
            };
            self.store.mark_dirty(node);
            self.store.mark_dirty(right);
            (first, moved.units)
        };

        self.tree.insert_leaf(separator, right_id);
        debug!(
            dir = self.dir.objectid(),
            leaf = node.id(),
            new_leaf = right_id,
            moved,
            "split leaf"
        );
        Ok(())
    }

    /// Keep the index in step with a leaf that just lost the unit at
    /// `removed`, and hand a thin leaf's units to its left neighbor.
    fn after_remove(&self, node: &mut Node, removed: &Coord) -> Result<(), DirError> {
        let id = node.id();
        let Some(left_id) = self.tree.left_neighbor(id) else {
            return Ok(());
        };
        if node.is_empty() {
            self.release_leaf(id);
            return Ok(());
        }
        if let (0, 0, Some(first)) = (removed.item_pos, removed.unit_pos, node.unit_key(0, 0)) {
            self.tree.update_separator(id, first);
        }
        if node.used_space() * 2 >= node.capacity() {
            return Ok(());
        }

        // never wait for the neighbor while holding this leaf
        let Ok(left) = self.store.load(left_id) else {
            return Ok(());
        };
        let Ok(mut left_guard) = self.store.lock(&left, LockMode::Write, LockRequest::NonBlocking)
        else {
            debug!(leaf = id, left = left_id, "left neighbor busy");
            return Ok(());
        };
        let still_left = self.tree.left_neighbor(id) == Some(left_id)
            && self.store.lookup(left_id).is_some_and(|n| left_guard.locks(&n));
        if !still_left {
            return Ok(());
        }
        let left_node = left_guard.node_mut()?;
        let moved = node.shift_left(left_node, node.nr_units(0), self.store.versions())?;
        if moved.units == 0 {
            return Ok(());
        }
        self.store.mark_dirty(left_node);
        self.store.mark_dirty(node);
        debug!(leaf = id, left = left_id, units = moved.units, "merged into left leaf");

        match node.unit_key(0, 0) {
            Some(first) => self.tree.update_separator(id, first),
            None => self.release_leaf(id),
        }
        Ok(())
    }

    fn release_leaf(&self, id: BlockId) {
        self.tree.remove_leaf(id);
        self.store.free(id);
        debug!(dir = self.dir.objectid(), leaf = id, "released empty leaf");
    }
}

impl<T: TreeSearch> std::fmt::Debug for Directory<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("dir", &self.dir)
            .field("leaves", &self.tree.leaves())
            .finish_non_exhaustive()
    }
}

/// Position right after the run of units sharing the id at `coord`.
fn run_end(node: &Node, coord: &Coord) -> usize {
    let Some(item) = node.item(coord.item_pos) else {
        return coord.unit_pos;
    };
    let view = item.as_cde(node.key_format());
    let id = view.de_id(coord.unit_pos);
    let mut end = coord.unit_pos;
    while end < view.nr_units() && view.de_id(end) == id {
        end += 1;
    }
    end
}

/// Coord of the entry called `name` whose key is `key`. Long names may
/// share a key, so the whole run of equal ids is checked.
fn find_in_leaf(node: &Node, key: &Key, name: &[u8]) -> Option<Coord> {
    let (found, coord) = node.lookup(key);
    if !found {
        return None;
    }
    let item = node.item(coord.item_pos)?;
    if item.kind != ItemKind::CompoundDir {
        return None;
    }
    let view = item.as_cde(node.key_format());
    let id = view.de_id(coord.unit_pos);
    let mut start = coord.unit_pos;
    while start > 0 && view.de_id(start - 1) == id {
        start -= 1;
    }
    (start..view.nr_units())
        .take_while(|&unit| view.de_id(unit) == id)
        .find(|&unit| view.extract_name(unit).as_ref() == name)
        .map(|unit| Coord::new(node.id(), coord.item_pos, unit, Between::AtUnit))
}

/// Target of the entry at `coord` if it is called `name`.
/// Entries of `dir` use its objectid as their locality.
fn check_dir_key(dir: &Key) -> Result<(), DirError> {
    if is_valid_locality(dir.objectid()) {
        Ok(())
    } else {
        Err(DirError::InvalidDirectory(*dir))
    }
}

fn entry_at(node: &Node, coord: &Coord, name: &[u8]) -> Option<Key> {
    if !coord.is_existing_unit(node) {
        return None;
    }
    let item = node.item(coord.item_pos)?;
    if item.kind != ItemKind::CompoundDir {
        return None;
    }
    let view = item.as_cde(node.key_format());
    (view.extract_name(coord.unit_pos).as_ref() == name).then(|| view.entry_target(coord.unit_pos))
}

/// Errors raised by directory operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirError {
    NotFound,
    AlreadyExists,
    /// Empty, containing NUL, or one of `"."` and `".."` where those are
    /// not allowed.
    InvalidName,
    NameTooLong { len: usize, max: usize },
    /// The directory's objectid does not fit into an entry key.
    InvalidDirectory(Key),
    /// A leaf failed to decode and is quarantined.
    Corrupt { node: BlockId, offset: Option<usize> },
    /// The leaf is quarantined.
    ReadOnly(BlockId),
    /// A leaf could not be split to make room.
    NoSpace,
    /// Leaves kept moving while looking for the right one.
    Busy,
    /// The tree has no leaf for the key.
    NoLeaf,
    Store(StoreError),
    Node(NodeError),
    Item(ItemError),
}

impl std::fmt::Display for DirError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such entry"),
            Self::AlreadyExists => write!(f, "entry already exists"),
            Self::InvalidName => write!(f, "invalid entry name"),
            Self::NameTooLong { len, max } => {
                write!(f, "name of {len} bytes exceeds maximum of {max}")
            }
            Self::InvalidDirectory(dir) => {
                write!(f, "directory {dir:?} has an objectid beyond the locality range")
            }
            Self::Corrupt {
                node,
                offset: Some(offset),
            } => write!(f, "leaf {node} corrupt at byte {offset}"),
            Self::Corrupt { node, offset: None } => write!(f, "leaf {node} corrupt"),
            Self::ReadOnly(node) => write!(f, "leaf {node} is read-only"),
            Self::NoSpace => write!(f, "no space left in leaf"),
            Self::Busy => write!(f, "leaves kept moving, giving up"),
            Self::NoLeaf => write!(f, "no leaf for key"),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::Item(e) => write!(f, "item error: {e}"),
        }
    }
}

impl std::error::Error for DirError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::Item(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for DirError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corrupt { node, offset, .. } => Self::Corrupt { node, offset },
            StoreError::ReadOnly(node) => Self::ReadOnly(node),
            other => Self::Store(other),
        }
    }
}

impl From<NodeError> for DirError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

impl From<ItemError> for DirError {
    fn from(e: ItemError) -> Self {
        Self::Item(e)
    }
}

impl From<DirError> for io::Error {
    fn from(e: DirError) -> Self {
        let kind = match &e {
            DirError::NotFound => io::ErrorKind::NotFound,
            DirError::AlreadyExists => io::ErrorKind::AlreadyExists,
            DirError::InvalidName
            | DirError::NameTooLong { .. }
            | DirError::InvalidDirectory(_) => io::ErrorKind::InvalidInput,
            DirError::Corrupt { .. } => io::ErrorKind::InvalidData,
            DirError::ReadOnly(_) => io::ErrorKind::ReadOnlyFilesystem,
            DirError::NoSpace => io::ErrorKind::StorageFull,
            _ => io::ErrorKind::Other,
        };
        Self::new(kind, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::storage::key::{KeyFormat, MAX_LOCALITY};

    const DIR: Key = Key::stat_data(1, 7);
    const PARENT: Key = Key::stat_data(0, 1);

    fn directory(node_size: usize, format: KeyFormat) -> Directory {
        let config = StoreConfig::default()
            .with_node_size(node_size)
            .with_key_format(format)
            .with_verify_seals(true);
        Directory::create(Arc::new(NodeStore::new(config)), DIR, PARENT).expect("create")
    }

    fn target(n: u64) -> Key {
        Key::stat_data(7, 100 + n)
    }

    fn sorted_names(dir: &Directory) -> Vec<Vec<u8>> {
        let mut names: Vec<Vec<u8>> = dir
            .entries()
            .expect("entries")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_create_has_dot_entries() {
        let dir = directory(4096, KeyFormat::Large);
        assert_eq!(dir.find_entry(b".").expect("find"), Some(DIR));
        assert_eq!(dir.find_entry(b"..").expect("find"), Some(PARENT));
        let entries = dir.entries().expect("entries");
        assert_eq!(entries, vec![(b".".to_vec(), DIR), (b"..".to_vec(), PARENT)]);
    }

    #[test]
    fn test_add_find_remove() {
        let dir = directory(4096, KeyFormat::Large);
        let long = "long-name-".repeat(5);
        for (i, name) in ["a", "hello", long.as_str()].iter().enumerate() {
            dir.add_entry(name.as_bytes(), target(i as u64)).expect("add");
        }
        assert_eq!(dir.find_entry(b"hello").expect("find"), Some(target(1)));
        assert_eq!(dir.find_entry(long.as_bytes()).expect("find"), Some(target(2)));
        assert_eq!(dir.find_entry(b"missing").expect("find"), None);

        dir.remove_entry(b"hello").expect("remove");
        assert_eq!(dir.find_entry(b"hello").expect("find"), None);
        assert_eq!(dir.remove_entry(b"hello"), Err(DirError::NotFound));
        assert_eq!(dir.entries().expect("entries").len(), 4);
    }

    #[test]
    fn test_add_existing_name_fails() {
        let dir = directory(4096, KeyFormat::Short);
        dir.add_entry(b"twice", target(1)).expect("add");
        assert_eq!(dir.add_entry(b"twice", target(2)), Err(DirError::AlreadyExists));
        // without a seal as well
        dir.seals.lock().clear();
        assert_eq!(dir.add_entry(b"twice", target(2)), Err(DirError::AlreadyExists));
        assert_eq!(dir.add_entry(b"..", target(2)), Err(DirError::AlreadyExists));
    }

    #[test]
    fn test_invalid_names() {
        let dir = directory(512, KeyFormat::Large);
        assert_eq!(dir.add_entry(b"", target(0)), Err(DirError::InvalidName));
        assert_eq!(dir.add_entry(b"a\0b", target(0)), Err(DirError::InvalidName));
        assert_eq!(dir.remove_entry(b"."), Err(DirError::InvalidName));
        assert_eq!(dir.remove_entry(b".."), Err(DirError::InvalidName));

        let max = dir.max_name_len();
        let longest = "n".repeat(max);
        dir.add_entry(longest.as_bytes(), target(1)).expect("longest name fits");
        let too_long = "n".repeat(max + 1);
        assert_eq!(
            dir.add_entry(too_long.as_bytes(), target(2)),
            Err(DirError::NameTooLong { len: max + 1, max })
        );
        assert_eq!(dir.find_entry(longest.as_bytes()).expect("find"), Some(target(1)));
    }

    #[test]
    fn test_seal_hits_and_misses() {
        let dir = directory(4096, KeyFormat::Large);
        dir.add_entry(b"x", target(1)).expect("add");
        assert!(dir.seal(b"x").is_some_and(|s| s.is_set()));

        assert_eq!(dir.find_entry(b"x").expect("find"), Some(target(1)));
        assert_eq!(dir.seal_stats(), (1, 0));

        dir.add_entry(b"y", target(2)).expect("add");
        assert_eq!(dir.find_entry(b"x").expect("find"), Some(target(1)));
        assert_eq!(dir.seal_stats(), (1, 1));
        // the search renewed the seal
        assert_eq!(dir.find_entry(b"x").expect("find"), Some(target(1)));
        assert_eq!(dir.seal_stats(), (2, 1));

        dir.remove_entry(b"x").expect("remove");
        assert!(dir.seal(b"x").is_none());
    }

    #[test]
    fn test_splits_and_merges_leaves() {
        let dir = directory(512, KeyFormat::Large);
        let names: Vec<String> = (0..60).map(|i| format!("entry-{i:03}")).collect();
        for (i, name) in names.iter().enumerate() {
            dir.add_entry(name.as_bytes(), target(i as u64)).expect("add");
        }
        let grown = dir.leaves().len();
        assert!(grown > 1);
        for (i, name) in names.iter().enumerate() {
            assert_eq!(dir.find_entry(name.as_bytes()).expect("find"), Some(target(i as u64)));
        }

        let mut expected: Vec<Vec<u8>> = names.iter().map(|n| n.clone().into_bytes()).collect();
        expected.push(b".".to_vec());
        expected.push(b"..".to_vec());
        expected.sort();
        assert_eq!(sorted_names(&dir), expected);

        for name in &names {
            dir.remove_entry(name.as_bytes()).expect("remove");
        }
        assert!(dir.leaves().len() < grown);
        assert_eq!(sorted_names(&dir), vec![b".".to_vec(), b"..".to_vec()]);
    }

    #[test]
    fn test_entries_are_in_key_order() {
        let dir = directory(512, KeyFormat::Short);
        for i in 0..40u64 {
            dir.add_entry(format!("f{}", 40 - i).as_bytes(), target(i)).expect("add");
        }
        let format = KeyFormat::Short;
        let keys: Vec<Key> = dir
            .entries()
            .expect("entries")
            .iter()
            .map(|(name, _)| build_entry_key(format, DIR.objectid(), name))
            .collect();
        assert_eq!(keys.len(), 42);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_quarantined_leaf_is_read_only() {
        let dir = directory(4096, KeyFormat::Large);
        dir.add_entry(b"kept", target(1)).expect("add");
        let leaf = dir.leaves()[0];
        dir.store().quarantine(leaf);

        assert_eq!(dir.find_entry(b"kept").expect("find"), Some(target(1)));
        assert_eq!(dir.add_entry(b"new", target(2)), Err(DirError::ReadOnly(leaf)));
        assert_eq!(dir.remove_entry(b"kept"), Err(DirError::ReadOnly(leaf)));
    }

    #[test]
    fn test_corrupt_leaf_fails_the_operation() {
        let dir = directory(4096, KeyFormat::Large);
        dir.add_entry(b"kept", target(1)).expect("add");
        let leaf = dir.leaves()[0];
        dir.store().evict(leaf).expect("evict");
        // low byte of the item's entry count
        dir.store().damage_backing(leaf, 8 + 3 + 1 + 32 + 2, 0xff);

        let err = dir.find_entry(b"kept").unwrap_err();
        assert!(matches!(err, DirError::Corrupt { node, .. } if node == leaf));
        assert!(dir.store().is_quarantined(leaf));
        assert_eq!(io::Error::from(err).kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_io_error_kinds() {
        assert_eq!(io::Error::from(DirError::NotFound).kind(), io::ErrorKind::NotFound);
        assert_eq!(
            io::Error::from(DirError::AlreadyExists).kind(),
            io::ErrorKind::AlreadyExists
        );
        assert_eq!(
            io::Error::from(DirError::NameTooLong { len: 9, max: 8 }).kind(),
            io::ErrorKind::InvalidInput
        );
        assert_eq!(
            io::Error::from(DirError::InvalidDirectory(DIR)).kind(),
            io::ErrorKind::InvalidInput
        );
        assert_eq!(io::Error::from(DirError::Busy).kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_directory_objectid_must_fit_locality() {
        let store = Arc::new(NodeStore::new(StoreConfig::default()));
        let dir = Key::stat_data(1, MAX_LOCALITY + 1);
        assert_eq!(
            Directory::create(Arc::clone(&store), dir, PARENT).unwrap_err(),
            DirError::InvalidDirectory(dir)
        );
        assert_eq!(
            Directory::open(store, dir, &[1]).unwrap_err(),
            DirError::InvalidDirectory(dir)
        );
    }

    #[test]
    fn test_seal_on_another_entry_counts_as_miss() {
        let config = StoreConfig::default().with_verify_seals(false);
        let dir = Directory::create(Arc::new(NodeStore::new(config)), DIR, PARENT).expect("create");
        dir.add_entry(b"x", target(1)).expect("add");
        // a seal that still validates but whose coord holds "x"
        let seal = dir.seal(b"x").expect("seal");
        dir.seals.lock().insert(b"y".to_vec(), seal);

        assert_eq!(dir.find_entry(b"y").expect("find"), None);
        assert_eq!(dir.seal_stats(), (0, 1));
        assert_eq!(dir.find_entry(b"x").expect("find"), Some(target(1)));
        assert_eq!(dir.seal_stats(), (1, 1));
    }

    #[test]
    fn test_leaf_index() {
        let index = LeafIndex::new(1);
        let mid = Key::stat_data(5, 0);
        index.insert_leaf(mid, 2);
        index.insert_leaf(Key::stat_data(9, 0), 3);
        assert_eq!(index.find_leaf(&Key::stat_data(1, 1)), Some(1));
        assert_eq!(index.find_leaf(&mid), Some(2));
        assert_eq!(index.find_leaf(&Key::MAX), Some(3));
        assert_eq!(index.left_neighbor(3), Some(2));
        assert_eq!(index.left_neighbor(1), None);

        index.update_separator(2, Key::stat_data(6, 0));
        assert_eq!(index.find_leaf(&mid), Some(1));
        // the leftmost separator never moves
        index.update_separator(1, Key::stat_data(2, 0));
        assert_eq!(index.separator(1), Some(Key::MIN));

        index.remove_leaf(2);
        assert_eq!(index.leaves(), vec![1, 3]);
        assert_eq!(index.len(), 2);
    }
}
