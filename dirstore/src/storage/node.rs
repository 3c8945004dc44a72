//! Leaf nodes: a fixed-capacity, key-sorted sequence of items.
//!
//! Page image layout (after the page header):
//! - `key_format`: 1 byte
//! - `item_count`: 2 bytes
//! - per item: `kind` (1 byte), key (`key_size` bytes), `body_len`
//!   (2 bytes), then the body
//!
//! Every mutation goes through a method that takes the store's
//! [`VersionCounter`] and stamps the node with a fresh version.

use std::ops::RangeInclusive;

use crate::storage::coord::{Between, Coord};
use crate::storage::item::{
    CdeItemMut, CutResult, FIXED_HEADER_SIZE, Item, ItemError, ItemKind, NewEntry,
    ShiftDirection, ShiftEstimate, ShiftTarget, create_item, estimate_create, estimate_insert,
    init_item, mergeable,
};
use crate::storage::key::{Key, KeyFormat};
use crate::storage::page::{BlockId, Page, PageError, PageHeader, PageType};
use crate::storage::store::VersionCounter;

/// Node header: key format and item count.
pub const NODE_HEADER_SIZE: usize = 3;

/// Offset where the first item header starts.
const DATA_OFFSET: usize = PageHeader::SIZE + NODE_HEADER_SIZE;

/// Per-item overhead in the page image: kind, key and body length.
#[must_use]
pub const fn item_header_size(format: KeyFormat) -> usize {
    1 + format.key_size() + 2
}

/// Largest item body an empty node of `capacity` bytes can hold.
#[must_use]
pub const fn max_item_body(format: KeyFormat, capacity: usize) -> usize {
    capacity.saturating_sub(DATA_OFFSET + item_header_size(format))
}

/// An in-memory leaf node.
#[derive(Debug, Clone)]
pub struct Node {
    id: BlockId,
    version: u64,
    key_format: KeyFormat,
    capacity: usize,
    items: Vec<Item>,
    dirty: bool,
}

impl Node {
    /// Create an empty node.
    #[must_use]
    pub const fn new(id: BlockId, key_format: KeyFormat, capacity: usize, version: u64) -> Self {
        Self {
            id,
            version,
            key_format,
            capacity,
            items: Vec::new(),
            dirty: false,
        }
    }

    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// Version stamped by the last mutation or dirty marking.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub const fn key_format(&self) -> KeyFormat {
        self.key_format
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    #[must_use]
    pub fn item(&self, pos: usize) -> Option<&Item> {
        self.items.get(pos)
    }

    #[must_use]
    pub fn nr_items(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Units of item `pos`, 0 if there is no such item.
    #[must_use]
    pub fn nr_units(&self, pos: usize) -> usize {
        self.items
            .get(pos)
            .map_or(0, |item| item.nr_units(self.key_format))
    }

    /// Key of unit `unit` of item `pos`.
    #[must_use]
    pub fn unit_key(&self, pos: usize, unit: usize) -> Option<Key> {
        let item = self.items.get(pos)?;
        (unit < item.nr_units(self.key_format))
            .then(|| item.kind.unit_key(item, self.key_format, unit))
    }

    /// Bytes taken by headers and items.
    #[must_use]
    pub fn used_space(&self) -> usize {
        DATA_OFFSET
            + self
                .items
                .iter()
                .map(|item| item_header_size(self.key_format) + item.body.len())
                .sum::<usize>()
    }

    #[must_use]
    pub fn free_space(&self) -> usize {
        self.capacity.saturating_sub(self.used_space())
    }

    /// Stamp a fresh version.
    pub fn touch(&mut self, versions: &VersionCounter) {
        self.version = versions.next();
    }

    /// Mark the node dirty. Dirtying counts as a mutation for seals.
    pub fn mark_dirty(&mut self, versions: &VersionCounter) {
        self.dirty = true;
        self.touch(versions);
    }

    pub(crate) const fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Find `key`. Returns whether a unit with exactly this key exists and a
    /// coord naming it, or naming where it would go.
    #[must_use]
    pub fn lookup(&self, key: &Key) -> (bool, Coord) {
        if self.items.is_empty() {
            return (false, Coord::empty(self.id));
        }
        let after = self.items.partition_point(|item| item.key <= *key);
        if after == 0 {
            return (false, Coord::new(self.id, 0, 0, Between::BeforeItem));
        }

        let pos = after - 1;
        let item = &self.items[pos];
        match item.kind {
            ItemKind::CompoundDir if item.holds_entries_like(key) => {
                let view = item.as_cde(self.key_format);
                let found = view.lookup(key);
                if found.found {
                    (true, Coord::new(self.id, pos, found.pos, Between::AtUnit))
                } else if found.pos < view.nr_units() {
                    (false, Coord::new(self.id, pos, found.pos, Between::BeforeUnit))
                } else {
                    let last = view.nr_units().saturating_sub(1);
                    (false, Coord::new(self.id, pos, last, Between::AfterUnit))
                }
            }
            _ if item.key == *key => (true, Coord::new(self.id, pos, 0, Between::AtUnit)),
            _ => {
                let last = self.nr_units(pos).saturating_sub(1);
                (false, Coord::new(self.id, pos, last, Between::AfterItem))
            }
        }
    }

    /// Insert a whole item at `pos`.
    pub fn insert_item(
        &mut self,
        pos: usize,
        item: Item,
        versions: &VersionCounter,
    ) -> Result<(), NodeError> {
        if pos > self.items.len() {
            return Err(NodeError::InvalidPosition {
                pos,
                items: self.items.len(),
            });
        }
        let needed = item_header_size(self.key_format) + item.body.len();
        let available = self.free_space();
        if needed > available {
            return Err(NodeError::NoSpace { needed, available });
        }
        let after_prev = pos == 0 || self.items[pos - 1].key < item.key;
        let before_next = self.items.get(pos).is_none_or(|next| item.key < next.key);
        if !(after_prev && before_next) {
            return Err(NodeError::ItemsOutOfOrder { pos });
        }

        self.items.insert(pos, item);
        self.touch(versions);
        Ok(())
    }

    /// Build a compound directory item from sorted `entries` and insert it
    /// at `pos`.
    pub fn create_dir_item(
        &mut self,
        pos: usize,
        entries: &[NewEntry<'_>],
        versions: &VersionCounter,
    ) -> Result<(), NodeError> {
        let Some(first) = entries.first() else {
            return Err(NodeError::Item(ItemError::InvalidRange {
                from: 0,
                to: 0,
                units: 0,
            }));
        };
        let needed = item_header_size(self.key_format) + estimate_create(self.key_format, entries);
        let available = self.free_space();
        if needed > available {
            return Err(NodeError::NoSpace { needed, available });
        }
        let body = create_item(self.key_format, entries)?;
        self.insert_item(pos, Item::compound_dir(first.key, body), versions)
    }

    pub fn remove_item(&mut self, pos: usize, versions: &VersionCounter) -> Result<Item, NodeError> {
        if pos >= self.items.len() {
            return Err(NodeError::InvalidPosition {
                pos,
                items: self.items.len(),
            });
        }
        let item = self.items.remove(pos);
        self.touch(versions);
        Ok(item)
    }

    fn dir_item_mut(&mut self, pos: usize) -> Result<&mut Item, NodeError> {
        let items = self.items.len();
        match self.items.get_mut(pos) {
            Some(item) if item.kind == ItemKind::CompoundDir => Ok(item),
            Some(_) => Err(NodeError::WrongItemKind { pos }),
            None => Err(NodeError::InvalidPosition { pos, items }),
        }
    }

    /// Paste sorted `entries` before unit `at` of directory item `pos`.
    /// Returns the bytes consumed.
    pub fn paste_entries(
        &mut self,
        pos: usize,
        at: usize,
        entries: &[NewEntry<'_>],
        versions: &VersionCounter,
    ) -> Result<usize, NodeError> {
        let format = self.key_format;
        let budget = self.free_space();
        let needed = estimate_insert(format, entries);
        if needed > budget {
            return Err(NodeError::NoSpace {
                needed,
                available: budget,
            });
        }
        let item = self.dir_item_mut(pos)?;
        let used = item.as_cde_mut(format).paste(entries, at, budget)?;
        if let (0, Some(first)) = (at, entries.first()) {
            item.key = first.key;
        }
        self.touch(versions);
        Ok(used)
    }

    /// Cut units `range` of directory item `pos`. An item left without units
    /// is removed; otherwise the item key follows its new first unit.
    pub fn cut_units(
        &mut self,
        pos: usize,
        range: RangeInclusive<usize>,
        versions: &VersionCounter,
    ) -> Result<CutResult, NodeError> {
        let format = self.key_format;
        let item = self.dir_item_mut(pos)?;
        let result = item.as_cde_mut(format).cut(range)?;
        match result.new_first {
            Some(first) => item.key = first,
            None => {
                self.items.remove(pos);
            }
        }
        self.touch(versions);
        Ok(result)
    }

    /// Units at the end of the last item that may move right without
    /// splitting a run of equal ids.
    fn movable_right(item: &Item, format: KeyFormat, mut units: usize) -> usize {
        let view = item.as_cde(format);
        let n = view.nr_units();
        while units > 0 && units < n && view.de_id(n - units) == view.de_id(n - units - 1) {
            units -= 1;
        }
        units
    }

    fn movable_left(item: &Item, format: KeyFormat, mut units: usize) -> usize {
        let view = item.as_cde(format);
        let n = view.nr_units();
        while units > 0 && units < n && view.de_id(units) == view.de_id(units - 1) {
            units -= 1;
        }
        units
    }

    /// Move up to `want` trailing units of this node's last directory item
    /// to the front of `right`, merging into `right`'s first item when it
    /// belongs to the same directory.
    pub fn shift_right(
        &mut self,
        right: &mut Self,
        want: usize,
        versions: &VersionCounter,
    ) -> Result<ShiftEstimate, NodeError> {
        let format = self.key_format;
        if right.key_format != format {
            return Err(NodeError::FormatMismatch);
        }
        let Some(pos) = self.items.len().checked_sub(1) else {
            return Ok(ShiftEstimate::default());
        };
        let last = &self.items[pos];
        if last.kind != ItemKind::CompoundDir {
            return Ok(ShiftEstimate::default());
        }

        let merge = right
            .items
            .first()
            .is_some_and(|first| first.kind == ItemKind::CompoundDir && mergeable(&first.key, &last.key));
        let (target, overhead) = if merge {
            (ShiftTarget::MergeInto, 0)
        } else {
            (ShiftTarget::NewItem, item_header_size(format))
        };
        let free = right.free_space().saturating_sub(overhead);
        let view = last.as_cde(format);
        let n = view.nr_units();
        let estimate = view.can_shift(free, ShiftDirection::Right, want, target);
        let units = Self::movable_right(last, format, estimate.units);
        if units == 0 {
            return Ok(ShiftEstimate::default());
        }
        let from = n - units;
        let new_first = view.unit_key(from);

        let bytes = if merge {
            let first = &mut right.items[0];
            let grew = first
                .as_cde_mut(format)
                .copy_units(&view, from, units, ShiftDirection::Right, free)?;
            first.key = new_first;
            grew
        } else {
            let mut body = init_item();
            let grew = CdeItemMut::new(format, &new_first, &mut body).copy_units(
                &view,
                from,
                units,
                ShiftDirection::Right,
                free - FIXED_HEADER_SIZE,
            )?;
            right.items.insert(0, Item::compound_dir(new_first, body));
            grew + FIXED_HEADER_SIZE
        };
        right.touch(versions);
        self.cut_units(pos, from..=n - 1, versions)?;
        Ok(ShiftEstimate { units, bytes })
    }

    /// Move up to `want` leading units of this node's first directory item
    /// to the end of `left`, merging into `left`'s last item when it belongs
    /// to the same directory.
    pub fn shift_left(
        &mut self,
        left: &mut Self,
        want: usize,
        versions: &VersionCounter,
    ) -> Result<ShiftEstimate, NodeError> {
        let format = self.key_format;
        if left.key_format != format {
            return Err(NodeError::FormatMismatch);
        }
        let Some(first) = self.items.first() else {
            return Ok(ShiftEstimate::default());
        };
        if first.kind != ItemKind::CompoundDir {
            return Ok(ShiftEstimate::default());
        }

        let merge = left
            .items
            .last()
            .is_some_and(|last| last.kind == ItemKind::CompoundDir && mergeable(&last.key, &first.key));
        let (target, overhead) = if merge {
            (ShiftTarget::MergeInto, 0)
        } else {
            (ShiftTarget::NewItem, item_header_size(format))
        };
        let free = left.free_space().saturating_sub(overhead);
        let view = first.as_cde(format);
        let estimate = view.can_shift(free, ShiftDirection::Left, want, target);
        let units = Self::movable_left(first, format, estimate.units);
        if units == 0 {
            return Ok(ShiftEstimate::default());
        }

        let bytes = if merge {
            let pos = left.items.len() - 1;
            left.items[pos]
                .as_cde_mut(format)
                .copy_units(&view, 0, units, ShiftDirection::Left, free)?
        } else {
            let key = view.unit_key(0);
            let mut body = init_item();
            let grew = CdeItemMut::new(format, &key, &mut body).copy_units(
                &view,
                0,
                units,
                ShiftDirection::Left,
                free - FIXED_HEADER_SIZE,
            )?;
            left.items.push(Item::compound_dir(key, body));
            grew + FIXED_HEADER_SIZE
        };
        left.touch(versions);
        self.cut_units(0, 0..=units - 1, versions)?;
        Ok(ShiftEstimate { units, bytes })
    }

    /// Encode the node into a page image of its capacity.
    pub fn write_to_page(&self) -> Result<Page, NodeError> {
        let mut page = Page::new(self.capacity);
        let header = PageHeader {
            page_type: PageType::Leaf,
            flags: 0,
            checksum: 0,
        };
        page.write_bytes(0, &header.to_bytes());
        page.write_u8(PageHeader::SIZE, self.key_format.as_u8());
        page.write_u16(PageHeader::SIZE + 1, to_u16(self.items.len())?);

        let key_size = self.key_format.key_size();
        let mut offset = DATA_OFFSET;
        for item in &self.items {
            page.write_u8(offset, item.kind as u8);
            offset += 1;
            item.key
                .encode(self.key_format, &mut page.as_bytes_mut()[offset..offset + key_size]);
            offset += key_size;
            page.write_u16(offset, to_u16(item.body.len())?);
            offset += 2;
            page.write_bytes(offset, &item.body);
            offset += item.body.len();
        }

        page.seal_checksum();
        Ok(page)
    }

    /// Decode a page image. Every compound directory item is checked before
    /// the node is returned.
    pub fn from_page(id: BlockId, page: &Page, version: u64) -> Result<Self, NodeError> {
        let header = page.verify()?;
        if header.page_type != PageType::Leaf {
            return Err(NodeError::Page(PageError::InvalidPageType(
                header.page_type as u8,
            )));
        }
        let truncated = |offset| NodeError::Truncated { offset };

        let format_byte = page
            .read_u8(PageHeader::SIZE)
            .ok_or(truncated(PageHeader::SIZE))?;
        let key_format = KeyFormat::try_from(format_byte).map_err(NodeError::InvalidKeyFormat)?;
        let count = page
            .read_u16(PageHeader::SIZE + 1)
            .ok_or(truncated(PageHeader::SIZE + 1))?;

        let key_size = key_format.key_size();
        let mut node = Self::new(id, key_format, page.size(), version);
        let mut offset = DATA_OFFSET;
        for pos in 0..usize::from(count) {
            let item_offset = offset;
            let kind_byte = page.read_u8(offset).ok_or(truncated(offset))?;
            let kind = ItemKind::try_from(kind_byte).map_err(|kind| NodeError::InvalidItemKind {
                offset,
                kind,
            })?;
            offset += 1;
            let key = Key::decode(
                key_format,
                page.read_bytes(offset, key_size).ok_or(truncated(offset))?,
            );
            offset += key_size;
            let len = usize::from(page.read_u16(offset).ok_or(truncated(offset))?);
            offset += 2;
            let body = page.read_bytes(offset, len).ok_or(truncated(offset))?.to_vec();
            offset += len;

            let item = Item { key, kind, body };
            if kind == ItemKind::CompoundDir {
                let view = item.as_cde(key_format);
                view.check()
                    .map_err(|source| NodeError::CorruptItem { item_offset, source })?;
                if view.is_empty() || view.unit_key(0) != key {
                    return Err(NodeError::CorruptItem {
                        item_offset,
                        source: ItemError::Corrupt {
                            offset: 0,
                            reason: "item key does not match its first unit",
                        },
                    });
                }
            }
            if node.items.last().is_some_and(|prev| prev.key >= key) {
                return Err(NodeError::ItemsOutOfOrder { pos });
            }
            node.items.push(item);
        }
        Ok(node)
    }
}

fn to_u16(value: usize) -> Result<u16, NodeError> {
    u16::try_from(value).map_err(|_| NodeError::Item(ItemError::TooLarge(value)))
}

/// Errors raised by node operations and page decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The page image is damaged.
    Page(PageError),
    InvalidKeyFormat(u8),
    InvalidItemKind { offset: usize, kind: u8 },
    /// A field runs past the end of the page.
    Truncated { offset: usize },
    /// An item failed its consistency check.
    CorruptItem { item_offset: usize, source: ItemError },
    ItemsOutOfOrder { pos: usize },
    /// The node cannot hold the requested bytes.
    NoSpace { needed: usize, available: usize },
    /// The operation needs a compound directory item.
    WrongItemKind { pos: usize },
    InvalidPosition { pos: usize, items: usize },
    /// Nodes with different key formats cannot exchange units.
    FormatMismatch,
    Item(ItemError),
}

impl NodeError {
    /// True if the error means the node's contents cannot be trusted.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Page(_)
                | Self::InvalidKeyFormat(_)
                | Self::InvalidItemKind { .. }
                | Self::Truncated { .. }
                | Self::CorruptItem { .. }
                | Self::ItemsOutOfOrder { .. }
        )
    }

    /// Byte offset inside the page the error points at, if any.
    #[must_use]
    pub const fn offset(&self) -> Option<usize> {
        match self {
            Self::InvalidItemKind { offset, .. } | Self::Truncated { offset } => Some(*offset),
            Self::CorruptItem {
                item_offset,
                source: ItemError::Corrupt { offset, .. },
            } => Some(*item_offset + *offset),
            Self::CorruptItem { item_offset, .. } => Some(*item_offset),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Page(e) => write!(f, "page error: {e}"),
            Self::InvalidKeyFormat(v) => write!(f, "invalid key format: {v}"),
            Self::InvalidItemKind { offset, kind } => {
                write!(f, "invalid item kind {kind} at byte {offset}")
            }
            Self::Truncated { offset } => write!(f, "node truncated at byte {offset}"),
            Self::CorruptItem {
                item_offset,
                source,
            } => write!(f, "item at byte {item_offset}: {source}"),
            Self::ItemsOutOfOrder { pos } => write!(f, "items out of order at position {pos}"),
            Self::NoSpace { needed, available } => {
                write!(f, "node full: need {needed} bytes, have {available}")
            }
            Self::WrongItemKind { pos } => {
                write!(f, "item {pos} is not a compound directory item")
            }
            Self::InvalidPosition { pos, items } => {
                write!(f, "invalid item position {pos} in node of {items} items")
            }
            Self::FormatMismatch => write!(f, "nodes use different key formats"),
            Self::Item(e) => write!(f, "item error: {e}"),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Page(e) => Some(e),
            Self::CorruptItem { source, .. } | Self::Item(source) => Some(source),
            _ => None,
        }
    }
}

impl From<PageError> for NodeError {
    fn from(e: PageError) -> Self {
        Self::Page(e)
    }
}

impl From<ItemError> for NodeError {
    fn from(e: ItemError) -> Self {
        Self::Item(e)
    }
}
