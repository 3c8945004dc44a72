//! Items stored inside nodes.
//!
//! The set of item kinds is closed: compound directory items, which this
//! crate interprets, and opaque items, which it only carries around as a
//! single unit. Per-kind behaviour dispatches through [`ItemKind`].

pub mod cde;

use std::fmt;

use crate::storage::key::{Key, KeyFormat};

pub use cde::{
    CdeItem, CdeItemMut, CutResult, FIXED_HEADER_SIZE, Lookup, NewEntry, ShiftDirection,
    ShiftEstimate, ShiftTarget, create_item, estimate_create, estimate_insert, init_item,
    max_name_len, mergeable,
};

/// Item kind discriminant, stored in the item header on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ItemKind {
    /// Sorted set of directory entries of one directory.
    CompoundDir = 1,
    /// Any other item. Always exactly one unit.
    Opaque = 2,
}

impl TryFrom<u8> for ItemKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::CompoundDir),
            2 => Ok(Self::Opaque),
            _ => Err(value),
        }
    }
}

impl ItemKind {
    /// Number of units in `item`.
    #[must_use]
    pub fn nr_units(self, item: &Item, format: KeyFormat) -> usize {
        match self {
            Self::CompoundDir => item.as_cde(format).nr_units(),
            Self::Opaque => 1,
        }
    }

    /// Key of unit `idx` of `item`.
    #[must_use]
    pub fn unit_key(self, item: &Item, format: KeyFormat, idx: usize) -> Key {
        match self {
            Self::CompoundDir => item.as_cde(format).unit_key(idx),
            Self::Opaque => item.key,
        }
    }

    /// Largest key this item could ever hold.
    #[must_use]
    pub fn max_key_inside(self, item: &Item, format: KeyFormat) -> Key {
        match self {
            Self::CompoundDir => item.as_cde(format).max_key_inside(),
            Self::Opaque => item.key,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompoundDir => write!(f, "compound-dir"),
            Self::Opaque => write!(f, "opaque"),
        }
    }
}

/// An item as held by a node: its key (the key of its first unit), its kind
/// and its raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: Key,
    pub kind: ItemKind,
    pub body: Vec<u8>,
}

impl Item {
    /// Create an opaque item.
    #[must_use]
    pub const fn opaque(key: Key, body: Vec<u8>) -> Self {
        Self {
            key,
            kind: ItemKind::Opaque,
            body,
        }
    }

    /// Create a compound directory item from an encoded body.
    #[must_use]
    pub const fn compound_dir(key: Key, body: Vec<u8>) -> Self {
        Self {
            key,
            kind: ItemKind::CompoundDir,
            body,
        }
    }

    /// View the body as a compound directory item.
    #[must_use]
    pub fn as_cde(&self, format: KeyFormat) -> CdeItem<'_> {
        debug_assert_eq!(self.kind, ItemKind::CompoundDir);
        CdeItem::new(format, &self.key, &self.body)
    }

    /// Mutable view of the body as a compound directory item.
    pub fn as_cde_mut(&mut self, format: KeyFormat) -> CdeItemMut<'_> {
        debug_assert_eq!(self.kind, ItemKind::CompoundDir);
        CdeItemMut::new(format, &self.key, &mut self.body)
    }

    /// True if this is a compound directory item of the directory whose
    /// entries share `key`'s locality and type.
    #[must_use]
    pub const fn holds_entries_like(&self, key: &Key) -> bool {
        matches!(self.kind, ItemKind::CompoundDir) && self.key.same_prefix(key)
    }

    #[must_use]
    pub fn nr_units(&self, format: KeyFormat) -> usize {
        self.kind.nr_units(self, format)
    }
}

/// Errors raised by item codecs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    /// The operation needs more bytes than the caller can give.
    InsufficientSpace { needed: usize, available: usize },
    /// A unit range or position outside the item.
    InvalidRange { from: usize, to: usize, units: usize },
    /// Units would end up out of key order.
    OutOfOrder { pos: usize },
    /// Source and target items belong to different directories.
    NotMergeable,
    /// The item grew past what a 16-bit offset can address.
    TooLarge(usize),
    /// The encoded item violates a structural invariant.
    Corrupt { offset: usize, reason: &'static str },
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientSpace { needed, available } => {
                write!(f, "insufficient space: need {needed} bytes, have {available}")
            }
            Self::InvalidRange { from, to, units } => {
                write!(f, "invalid unit range {from}..={to} for item of {units} units")
            }
            Self::OutOfOrder { pos } => write!(f, "units out of order at position {pos}"),
            Self::NotMergeable => write!(f, "items are not mergeable"),
            Self::TooLarge(len) => write!(f, "item too large: {len} bytes"),
            Self::Corrupt { offset, reason } => {
                write!(f, "corrupt item at byte {offset}: {reason}")
            }
        }
    }
}

impl std::error::Error for ItemError {}
