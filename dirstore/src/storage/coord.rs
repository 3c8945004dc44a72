//! Coords: positions inside a node.
//!
//! A coord names an item, a unit inside it, and where it sits relative to
//! that unit or item. Coords do not borrow the node they address; every
//! method that needs node contents takes the node explicitly, and the caller
//! keeps the node locked while the coord is in use. Any paste or cut in the
//! node makes coords at or after the mutation point stale.

use std::cmp::Ordering;

use crate::storage::item::ItemKind;
use crate::storage::key::Key;
use crate::storage::node::Node;
use crate::storage::page::BlockId;

/// Where a coord sits relative to the item and unit it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Between {
    BeforeItem,
    BeforeUnit,
    AtUnit,
    AfterUnit,
    AfterItem,
    /// The node has no items.
    EmptyNode,
    Invalid,
}

/// A position inside a node.
#[derive(Debug, Clone, Copy)]
pub struct Coord {
    pub node: BlockId,
    pub item_pos: usize,
    pub unit_pos: usize,
    pub between: Between,
    /// Kind of item `item_pos`, resolved on first use.
    kind: Option<ItemKind>,
}

impl PartialEq for Coord {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
            && self.item_pos == other.item_pos
            && self.unit_pos == other.unit_pos
            && self.between == other.between
    }
}

impl Eq for Coord {}

impl Coord {
    #[must_use]
    pub const fn new(node: BlockId, item_pos: usize, unit_pos: usize, between: Between) -> Self {
        Self {
            node,
            item_pos,
            unit_pos,
            between,
            kind: None,
        }
    }

    #[must_use]
    pub const fn invalid(node: BlockId) -> Self {
        Self::new(node, 0, 0, Between::Invalid)
    }

    #[must_use]
    pub const fn empty(node: BlockId) -> Self {
        Self::new(node, 0, 0, Between::EmptyNode)
    }

    /// At the first unit of the node.
    #[must_use]
    pub fn first_unit(node: &Node) -> Self {
        if node.is_empty() {
            Self::empty(node.id())
        } else {
            Self::new(node.id(), 0, 0, Between::AtUnit)
        }
    }

    /// At the last unit of the node.
    #[must_use]
    pub fn last_unit(node: &Node) -> Self {
        match node.nr_items().checked_sub(1) {
            None => Self::empty(node.id()),
            Some(last) => Self::new(
                node.id(),
                last,
                node.nr_units(last).saturating_sub(1),
                Between::AtUnit,
            ),
        }
    }

    /// Before the first item of the node.
    #[must_use]
    pub fn before_first_item(node: &Node) -> Self {
        if node.is_empty() {
            Self::empty(node.id())
        } else {
            Self::new(node.id(), 0, 0, Between::BeforeItem)
        }
    }

    /// After the last item of the node.
    #[must_use]
    pub fn after_last_item(node: &Node) -> Self {
        match node.nr_items().checked_sub(1) {
            None => Self::empty(node.id()),
            Some(last) => Self::new(
                node.id(),
                last,
                node.nr_units(last).saturating_sub(1),
                Between::AfterItem,
            ),
        }
    }

    #[must_use]
    pub fn is_existing_item(&self, node: &Node) -> bool {
        !matches!(self.between, Between::EmptyNode | Between::Invalid)
            && self.node == node.id()
            && self.item_pos < node.nr_items()
    }

    #[must_use]
    pub fn is_existing_unit(&self, node: &Node) -> bool {
        self.between == Between::AtUnit
            && self.is_existing_item(node)
            && self.unit_pos < node.nr_units(self.item_pos)
    }

    #[must_use]
    pub const fn is_between_items(&self) -> bool {
        matches!(self.between, Between::BeforeItem | Between::AfterItem)
    }

    /// Key of the unit the coord sits at.
    #[must_use]
    pub fn unit_key(&self, node: &Node) -> Option<Key> {
        if self.is_existing_unit(node) {
            node.unit_key(self.item_pos, self.unit_pos)
        } else {
            None
        }
    }

    /// Kind of the addressed item. Resolved once and cached until the coord
    /// moves to another item.
    pub fn item_kind(&mut self, node: &Node) -> Option<ItemKind> {
        if self.kind.is_none() && self.is_existing_item(node) {
            self.kind = node.item(self.item_pos).map(|item| item.kind);
        }
        self.kind
    }

    fn set_item(&mut self, item_pos: usize) {
        if item_pos != self.item_pos {
            self.kind = None;
        }
        self.item_pos = item_pos;
    }

    fn last_unit_of(node: &Node, item_pos: usize) -> usize {
        node.nr_units(item_pos).saturating_sub(1)
    }

    /// Step to the next unit, crossing into the next item when needed.
    /// Returns `false` at the end of the node, leaving the coord after the
    /// last item.
    pub fn next_unit(&mut self, node: &Node) -> bool {
        let last_item = node.nr_items().saturating_sub(1);
        match self.between {
            Between::EmptyNode | Between::Invalid => false,
            Between::BeforeUnit | Between::BeforeItem => {
                if self.between == Between::BeforeItem {
                    self.unit_pos = 0;
                }
                self.between = Between::AtUnit;
                true
            }
            Between::AtUnit | Between::AfterUnit => {
                if self.unit_pos + 1 < node.nr_units(self.item_pos) {
                    self.unit_pos += 1;
                    self.between = Between::AtUnit;
                    true
                } else if self.item_pos < last_item {
                    self.set_item(self.item_pos + 1);
                    self.unit_pos = 0;
                    self.between = Between::AtUnit;
                    true
                } else {
                    self.between = Between::AfterItem;
                    false
                }
            }
            Between::AfterItem => {
                if self.item_pos < last_item {
                    self.set_item(self.item_pos + 1);
                    self.unit_pos = 0;
                    self.between = Between::AtUnit;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Step to the previous unit. Returns `false` at the start of the node,
    /// leaving the coord before the first item.
    pub fn prev_unit(&mut self, node: &Node) -> bool {
        match self.between {
            Between::EmptyNode | Between::Invalid => false,
            Between::AfterUnit => {
                self.between = Between::AtUnit;
                true
            }
            Between::AfterItem => {
                self.unit_pos = Self::last_unit_of(node, self.item_pos);
                self.between = Between::AtUnit;
                true
            }
            Between::AtUnit | Between::BeforeUnit | Between::BeforeItem => {
                if self.between != Between::BeforeItem && self.unit_pos > 0 {
                    self.unit_pos -= 1;
                    self.between = Between::AtUnit;
                    true
                } else if self.item_pos > 0 {
                    self.set_item(self.item_pos - 1);
                    self.unit_pos = Self::last_unit_of(node, self.item_pos);
                    self.between = Between::AtUnit;
                    true
                } else {
                    self.unit_pos = 0;
                    self.between = Between::BeforeItem;
                    false
                }
            }
        }
    }

    /// Step to the first unit of the next item.
    pub fn next_item(&mut self, node: &Node) -> bool {
        let last_item = node.nr_items().saturating_sub(1);
        match self.between {
            Between::EmptyNode | Between::Invalid => false,
            Between::BeforeItem => {
                self.unit_pos = 0;
                self.between = Between::AtUnit;
                true
            }
            _ if self.item_pos < last_item => {
                self.set_item(self.item_pos + 1);
                self.unit_pos = 0;
                self.between = Between::AtUnit;
                true
            }
            _ => {
                self.unit_pos = Self::last_unit_of(node, self.item_pos);
                self.between = Between::AfterItem;
                false
            }
        }
    }

    /// Step to the first unit of the previous item.
    pub fn prev_item(&mut self, node: &Node) -> bool {
        match self.between {
            Between::EmptyNode | Between::Invalid => false,
            Between::AfterItem => {
                self.unit_pos = 0;
                self.between = Between::AtUnit;
                true
            }
            _ if self.item_pos > 0 => {
                self.set_item(self.item_pos - 1);
                self.unit_pos = 0;
                self.between = Between::AtUnit;
                true
            }
            _ => {
                self.unit_pos = 0;
                self.between = Between::BeforeItem;
                false
            }
        }
    }

    /// Resolve the position to the nearest existing unit at or to the right.
    /// Returns `false` if there is none.
    pub fn set_to_right(&mut self, node: &Node) -> bool {
        match self.between {
            Between::EmptyNode | Between::Invalid => false,
            Between::AtUnit => self.is_existing_unit(node),
            Between::BeforeUnit | Between::BeforeItem | Between::AfterUnit | Between::AfterItem => {
                self.next_unit(node)
            }
        }
    }

    /// Resolve the position to the nearest existing unit at or to the left.
    /// Returns `false` if there is none.
    pub fn set_to_left(&mut self, node: &Node) -> bool {
        match self.between {
            Between::EmptyNode | Between::Invalid => false,
            Between::AtUnit => self.is_existing_unit(node),
            Between::AfterUnit | Between::AfterItem | Between::BeforeUnit | Between::BeforeItem => {
                self.prev_unit(node)
            }
        }
    }

    /// Sort position: item, then unit, then the betweenness rank.
    fn rank(&self) -> (usize, usize, u8) {
        match self.between {
            Between::BeforeItem => (self.item_pos, 0, 0),
            Between::BeforeUnit => (self.item_pos, self.unit_pos, 1),
            Between::AtUnit => (self.item_pos, self.unit_pos, 2),
            Between::AfterUnit => (self.item_pos, self.unit_pos, 3),
            Between::AfterItem => (self.item_pos, usize::MAX, 4),
            Between::EmptyNode | Between::Invalid => (0, 0, 0),
        }
    }

    /// Order two coords of the same node. `None` for coords in different
    /// nodes or without a position.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        let positioned = |c: &Self| !matches!(c.between, Between::EmptyNode | Between::Invalid);
        if self.node != other.node || !positioned(self) || !positioned(other) {
            return None;
        }
        Some(self.rank().cmp(&other.rank()))
    }
}
