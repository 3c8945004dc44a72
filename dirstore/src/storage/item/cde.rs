//! Compound directory item codec.
//!
//! One item holds a sorted run of entries of a single directory:
//!
//! ```text
//! +-------------+---------------------------+---------------------------+
//! | entry_count | header[0..entry_count]    | body[0..entry_count]      |
//! | (u16)       | { DirEntryId, offset u16 }| { ObjectKeyId, [name NUL] }|
//! +-------------+---------------------------+---------------------------+
//! ```
//!
//! `offset` is the byte offset of a body from the start of the item. Bodies
//! are stored in header order with no gaps, so the body of entry `i` ends
//! where body `i + 1` starts, and the last one ends at the item's end.
//! Headers are sorted by `DirEntryId`; equal ids are allowed (colliding long
//! names).
//!
//! # Invariants
//!
//! - `FIXED_HEADER_SIZE + count * header_size + Σ body_size == item length`
//! - `offset[0] == FIXED_HEADER_SIZE + count * header_size`
//! - `offset[i + 1] == offset[i] + body_size(i)`
//!
//! Every mutation keeps these, and [`CdeItem::check`] verifies them on data
//! read from disk.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::ops::{Range, RangeInclusive};

use crate::storage::item::ItemError;
use crate::storage::key::{
    DirEntryId, Key, KeyFormat, KeyType, ObjectKeyId, build_entry_key, extract_name_from_key,
    is_longname_key,
};

/// Size of the `entry_count` field.
pub const FIXED_HEADER_SIZE: usize = 2;

/// Size of the body offset stored in each header.
const OFFSET_SIZE: usize = 2;

const fn header_size(format: KeyFormat) -> usize {
    format.de_id_size() + OFFSET_SIZE
}

fn read_u16(bytes: &[u8], at: usize) -> usize {
    usize::from(u16::from_le_bytes([bytes[at], bytes[at + 1]]))
}

fn write_u16(bytes: &mut [u8], at: usize, value: usize) -> Result<(), ItemError> {
    let value = u16::try_from(value).map_err(|_| ItemError::TooLarge(value))?;
    bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// An entry to be inserted.
#[derive(Debug, Clone, Copy)]
pub struct NewEntry<'a> {
    /// Entry key, built from the directory and the name.
    pub key: Key,
    pub name: &'a [u8],
    /// Stat-data key of the object the entry points at.
    pub target: Key,
}

impl<'a> NewEntry<'a> {
    #[must_use]
    pub fn new(format: KeyFormat, dir: u64, name: &'a [u8], target: Key) -> Self {
        Self {
            key: build_entry_key(format, dir, name),
            name,
            target,
        }
    }

    /// Bytes this entry's body takes.
    #[must_use]
    pub const fn body_size(&self, format: KeyFormat) -> usize {
        let mut size = format.obj_key_id_size();
        if is_longname_key(format, &self.key) {
            size += self.name.len() + 1;
        }
        size
    }

    fn encode_body(&self, format: KeyFormat, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + format.obj_key_id_size(), 0);
        ObjectKeyId::from_key(&self.target).encode(format, &mut out[start..]);
        if is_longname_key(format, &self.key) {
            out.extend_from_slice(self.name);
            out.push(0);
        }
    }
}

/// Result of a binary search: `pos` is the first unit not less than the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub found: bool,
    pub pos: usize,
}

/// Which neighbor units move to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftDirection {
    /// Leading units move to the end of the left neighbor.
    Left,
    /// Trailing units move to the start of the right neighbor.
    Right,
}

/// Whether shifted units start a new item or join an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftTarget {
    /// The target needs a new item, which also pays for the fixed header.
    NewItem,
    /// The target already has a mergeable item.
    MergeInto,
}

/// What [`CdeItem::can_shift`] allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShiftEstimate {
    pub units: usize,
    pub bytes: usize,
}

/// What [`CdeItemMut::cut`] removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutResult {
    /// Bytes by which the item shrank.
    pub freed: usize,
    pub smallest_removed: Key,
    /// Key of the new first unit, `None` if the item is now empty.
    pub new_first: Option<Key>,
}

/// An empty item: just the entry count.
#[must_use]
pub fn init_item() -> Vec<u8> {
    vec![0; FIXED_HEADER_SIZE]
}

/// Bytes [`CdeItemMut::paste`] consumes for `entries`.
#[must_use]
pub fn estimate_insert(format: KeyFormat, entries: &[NewEntry<'_>]) -> usize {
    entries
        .iter()
        .map(|e| header_size(format) + e.body_size(format))
        .sum()
}

/// Length of a new item holding exactly `entries`.
#[must_use]
pub fn estimate_create(format: KeyFormat, entries: &[NewEntry<'_>]) -> usize {
    FIXED_HEADER_SIZE + estimate_insert(format, entries)
}

/// Build a new item from entries sorted by key.
pub fn create_item(format: KeyFormat, entries: &[NewEntry<'_>]) -> Result<Vec<u8>, ItemError> {
    let mut body = init_item();
    if let Some(first) = entries.first() {
        let budget = estimate_insert(format, entries);
        CdeItemMut::new(format, &first.key, &mut body).paste(entries, 0, budget)?;
    }
    Ok(body)
}

/// True if items keyed `a` and `b` can be merged into one.
#[must_use]
pub fn mergeable(a: &Key, b: &Key) -> bool {
    a.same_prefix(b) && a.key_type() == Some(KeyType::FileName)
}

/// Longest name whose entry fits in an item of at most `item_space` bytes.
#[must_use]
pub const fn max_name_len(format: KeyFormat, item_space: usize) -> usize {
    // fixed header, one unit header, the target, the NUL
    item_space.saturating_sub(
        FIXED_HEADER_SIZE + header_size(format) + format.obj_key_id_size() + 1,
    )
}

/// Read-only view of an encoded item.
///
/// The view trusts the encoding; run [`CdeItem::check`] on bytes that did
/// not come from this codec.
#[derive(Debug, Clone, Copy)]
pub struct CdeItem<'a> {
    format: KeyFormat,
    locality: u64,
    bytes: &'a [u8],
}

impl<'a> CdeItem<'a> {
    /// View `bytes` as the item keyed `item_key`. The locality shared by all
    /// entries is taken from the item key once.
    #[must_use]
    pub const fn new(format: KeyFormat, item_key: &Key, bytes: &'a [u8]) -> Self {
        Self {
            format,
            locality: item_key.locality(),
            bytes,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nr_units() == 0
    }

    #[must_use]
    pub const fn format(&self) -> KeyFormat {
        self.format
    }

    #[must_use]
    pub const fn locality(&self) -> u64 {
        self.locality
    }

    #[must_use]
    pub fn nr_units(&self) -> usize {
        read_u16(self.bytes, 0)
    }

    const fn header_at(&self, idx: usize) -> usize {
        FIXED_HEADER_SIZE + idx * header_size(self.format)
    }

    fn stored_offset(&self, idx: usize) -> usize {
        read_u16(self.bytes, self.header_at(idx) + self.format.de_id_size())
    }

    /// Start of body `idx`. `idx == nr_units` yields the item length.
    fn body_offset(&self, idx: usize) -> usize {
        if idx == self.nr_units() {
            self.bytes.len()
        } else {
            self.stored_offset(idx)
        }
    }

    fn body(&self, idx: usize) -> &'a [u8] {
        &self.bytes[self.body_offset(idx)..self.body_offset(idx + 1)]
    }

    #[must_use]
    pub fn de_id(&self, idx: usize) -> DirEntryId {
        let at = self.header_at(idx);
        DirEntryId::decode(self.format, &self.bytes[at..at + self.format.de_id_size()])
    }

    /// Full key of unit `idx`.
    #[must_use]
    pub fn unit_key(&self, idx: usize) -> Key {
        self.de_id(idx).to_key(self.locality)
    }

    /// Stat-data key of the object entry `idx` points at.
    #[must_use]
    pub fn entry_target(&self, idx: usize) -> Key {
        let body = self.body(idx);
        ObjectKeyId::decode(self.format, &body[..self.format.obj_key_id_size()]).to_key()
    }

    /// Name of entry `idx`: rebuilt from the key for short names, borrowed
    /// from the body for long ones.
    #[must_use]
    pub fn extract_name(&self, idx: usize) -> Cow<'a, [u8]> {
        let key = self.unit_key(idx);
        match extract_name_from_key(self.format, &key) {
            Some(name) => Cow::Owned(name),
            None => {
                let body = self.body(idx);
                Cow::Borrowed(&body[self.format.obj_key_id_size()..body.len() - 1])
            }
        }
    }

    /// Find the first unit whose key is not less than `key`.
    #[must_use]
    pub fn lookup(&self, key: &Key) -> Lookup {
        let n = self.nr_units();
        let prefix = (self.locality, KeyType::FileName as u8);
        match (key.locality(), key.type_bits()).cmp(&prefix) {
            Ordering::Less => return Lookup { found: false, pos: 0 },
            Ordering::Greater => return Lookup { found: false, pos: n },
            Ordering::Equal => {}
        }

        let (mut lo, mut hi) = (0, n);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.de_id(mid).cmp_key(key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let found = lo < n && self.de_id(lo).cmp_key(key) == Ordering::Equal;
        Lookup { found, pos: lo }
    }

    /// Bytes (headers and bodies) taken by the units in `range`.
    #[must_use]
    pub fn units_size(&self, range: Range<usize>) -> usize {
        range.len() * header_size(self.format)
            + self.body_offset(range.end)
            - self.body_offset(range.start)
    }

    /// How many of at most `want` units can move in `direction` into a
    /// target with `free_space` bytes, and how many bytes they take there.
    ///
    /// The answer is exact and grows monotonically with `free_space`.
    #[must_use]
    pub fn can_shift(
        &self,
        free_space: usize,
        direction: ShiftDirection,
        want: usize,
        target: ShiftTarget,
    ) -> ShiftEstimate {
        let n = self.nr_units();
        let fixed = match target {
            ShiftTarget::NewItem => FIXED_HEADER_SIZE,
            ShiftTarget::MergeInto => 0,
        };

        let mut best = ShiftEstimate::default();
        for units in 1..=want.min(n) {
            let range = match direction {
                ShiftDirection::Left => 0..units,
                ShiftDirection::Right => n - units..n,
            };
            let bytes = fixed + self.units_size(range);
            if bytes > free_space {
                break;
            }
            best = ShiftEstimate { units, bytes };
        }
        best
    }

    /// Upper bound of every key this item may hold: the rest of the
    /// directory's key space.
    #[must_use]
    pub const fn max_key_inside(&self) -> Key {
        Key::new(self.locality, KeyType::FileName, u64::MAX, u64::MAX, u64::MAX)
    }

    /// Verify the structural invariants of the encoding.
    pub fn check(&self) -> Result<(), ItemError> {
        let len = self.bytes.len();
        if len < FIXED_HEADER_SIZE {
            return Err(corrupt(0, "item shorter than its header"));
        }
        let n = self.nr_units();
        let headers_end = self.header_at(n);
        if headers_end > len {
            return Err(corrupt(0, "header table runs past item end"));
        }
        if n == 0 && len != FIXED_HEADER_SIZE {
            return Err(corrupt(FIXED_HEADER_SIZE, "trailing bytes in empty item"));
        }

        let oid = self.format.obj_key_id_size();
        let mut expected = headers_end;
        let mut prev: Option<DirEntryId> = None;
        for i in 0..n {
            let at = self.header_at(i);
            let offset = self.stored_offset(i);
            if offset != expected {
                return Err(corrupt(at, "body offset out of place"));
            }
            let id = self.de_id(i);
            if prev.is_some_and(|p| p > id) {
                return Err(corrupt(at, "entries out of order"));
            }
            let end = if i + 1 < n {
                self.stored_offset(i + 1)
            } else {
                len
            };
            if end < offset || end > len {
                return Err(corrupt(at, "body offset out of range"));
            }

            let key = id.to_key(self.locality);
            let body_len = end - offset;
            if is_longname_key(self.format, &key) {
                if body_len < oid + 2 {
                    return Err(corrupt(offset, "long name body too short"));
                }
                if self.bytes[end - 1] != 0 {
                    return Err(corrupt(end - 1, "long name not NUL-terminated"));
                }
                let name = &self.bytes[offset + oid..end - 1];
                if name.contains(&0) {
                    return Err(corrupt(offset + oid, "NUL inside long name"));
                }
                if build_entry_key(self.format, self.locality, name) != key {
                    return Err(corrupt(offset + oid, "stored name does not match its key"));
                }
            } else if body_len != oid {
                return Err(corrupt(offset, "short name body has wrong size"));
            }

            expected = end;
            prev = Some(id);
        }
        Ok(())
    }
}

const fn corrupt(offset: usize, reason: &'static str) -> ItemError {
    ItemError::Corrupt { offset, reason }
}

/// Mutable view of an encoded item. The caller holds the only reference to
/// the buffer for the duration of each call.
#[derive(Debug)]
pub struct CdeItemMut<'a> {
    format: KeyFormat,
    locality: u64,
    bytes: &'a mut Vec<u8>,
}

impl<'a> CdeItemMut<'a> {
    pub const fn new(format: KeyFormat, item_key: &Key, bytes: &'a mut Vec<u8>) -> Self {
        Self {
            format,
            locality: item_key.locality(),
            bytes,
        }
    }

    #[must_use]
    pub fn as_view(&self) -> CdeItem<'_> {
        CdeItem {
            format: self.format,
            locality: self.locality,
            bytes: self.bytes.as_slice(),
        }
    }

    /// Insert `entries` (sorted by key) before unit `at`.
    ///
    /// `budget` is the free space the caller can give the item; the paste
    /// consumes exactly [`estimate_insert`] bytes. Returns the bytes used.
    pub fn paste(
        &mut self,
        entries: &[NewEntry<'_>],
        at: usize,
        budget: usize,
    ) -> Result<usize, ItemError> {
        let needed = estimate_insert(self.format, entries);
        if needed > budget {
            return Err(ItemError::InsufficientSpace {
                needed,
                available: budget,
            });
        }
        let prefix = Key::new(self.locality, KeyType::FileName, 0, 0, 0);
        if entries.iter().any(|e| !e.key.same_prefix(&prefix)) {
            return Err(ItemError::NotMergeable);
        }

        let ids: Vec<DirEntryId> = entries.iter().map(|e| DirEntryId::from_key(&e.key)).collect();
        let mut bodies = Vec::with_capacity(needed);
        let mut starts = Vec::with_capacity(entries.len());
        for entry in entries {
            starts.push(bodies.len());
            entry.encode_body(self.format, &mut bodies);
        }

        let used = self.insert_units(at, &ids, &bodies, &starts)?;
        debug_assert_eq!(used, needed, "paste consumed a different size than estimated");
        Ok(used)
    }

    /// Remove units `from..=to` and compact the tables.
    pub fn cut(&mut self, range: RangeInclusive<usize>) -> Result<CutResult, ItemError> {
        let (from, to) = (*range.start(), *range.end());
        let view = self.as_view();
        let n = view.nr_units();
        if from > to || to >= n {
            return Err(ItemError::InvalidRange { from, to, units: n });
        }

        let smallest_removed = view.unit_key(from);
        let count = to - from + 1;
        let header_bytes = count * header_size(self.format);
        let body_start = view.body_offset(from);
        let body_bytes = view.body_offset(to + 1) - body_start;

        let header_start = view.header_at(from);

        self.close_gap(body_start, body_bytes);
        self.close_gap(header_start, header_bytes);
        write_u16(self.bytes, 0, n - count)?;
        for i in 0..n - count {
            let old = self.as_view().stored_offset(i);
            let offset = if i < from {
                old - header_bytes
            } else {
                old - header_bytes - body_bytes
            };
            self.set_offset(i, offset)?;
        }

        let view = self.as_view();
        Ok(CutResult {
            freed: header_bytes + body_bytes,
            smallest_removed,
            new_first: (!view.is_empty()).then(|| view.unit_key(0)),
        })
    }

    /// Copy `count` units of `source` starting at `from` into this item:
    /// appended for a left shift, prepended for a right shift. All offsets
    /// of this item are rebased. Returns the bytes this item grew by.
    pub fn copy_units(
        &mut self,
        source: &CdeItem<'_>,
        from: usize,
        count: usize,
        direction: ShiftDirection,
        free_space: usize,
    ) -> Result<usize, ItemError> {
        if source.format != self.format || source.locality != self.locality {
            return Err(ItemError::NotMergeable);
        }
        if count == 0 {
            return Ok(0);
        }
        let n = source.nr_units();
        if from + count > n {
            return Err(ItemError::InvalidRange {
                from,
                to: from + count - 1,
                units: n,
            });
        }
        let needed = source.units_size(from..from + count);
        if needed > free_space {
            return Err(ItemError::InsufficientSpace {
                needed,
                available: free_space,
            });
        }

        let ids: Vec<DirEntryId> = (from..from + count).map(|i| source.de_id(i)).collect();
        let base = source.body_offset(from);
        let bodies = &source.bytes[base..source.body_offset(from + count)];
        let starts: Vec<usize> = (from..from + count)
            .map(|i| source.body_offset(i) - base)
            .collect();

        let at = match direction {
            ShiftDirection::Left => self.as_view().nr_units(),
            ShiftDirection::Right => 0,
        };
        self.insert_units(at, &ids, bodies, &starts)
    }

    /// Open gaps in both tables at `at`, write the new headers and bodies,
    /// and rebase every offset. `starts[i]` is where body `i` begins inside
    /// `bodies`.
    fn insert_units(
        &mut self,
        at: usize,
        ids: &[DirEntryId],
        bodies: &[u8],
        starts: &[usize],
    ) -> Result<usize, ItemError> {
        let view = self.as_view();
        let n = view.nr_units();
        if at > n {
            return Err(ItemError::InvalidRange {
                from: at,
                to: at,
                units: n,
            });
        }
        let (Some(first), Some(last)) = (ids.first(), ids.last()) else {
            return Ok(0);
        };
        if (at > 0 && view.de_id(at - 1) > *first)
            || (at < n && *last > view.de_id(at))
            || ids.windows(2).any(|w| w[0] > w[1])
        {
            return Err(ItemError::OutOfOrder { pos: at });
        }

        let count = ids.len();
        let de_size = self.format.de_id_size();
        let h = header_size(self.format);
        let header_bytes = count * h;
        let new_len = self.bytes.len() + header_bytes + bodies.len();
        if new_len > usize::from(u16::MAX) {
            return Err(ItemError::TooLarge(new_len));
        }
        let body_split = view.body_offset(at);
        let header_split = view.header_at(at);

        // bodies first: they sit after the header table
        self.open_gap(body_split, bodies.len());
        self.bytes[body_split..body_split + bodies.len()].copy_from_slice(bodies);
        self.open_gap(header_split, header_bytes);
        for (i, id) in ids.iter().enumerate() {
            let h_at = header_split + i * h;
            id.encode(self.format, &mut self.bytes[h_at..h_at + de_size]);
        }
        write_u16(self.bytes, 0, n + count)?;

        for i in 0..n + count {
            let offset = if i < at {
                self.as_view().stored_offset(i) + header_bytes
            } else if i < at + count {
                body_split + header_bytes + starts[i - at]
            } else {
                self.as_view().stored_offset(i) + header_bytes + bodies.len()
            };
            self.set_offset(i, offset)?;
        }
        Ok(header_bytes + bodies.len())
    }

    fn set_offset(&mut self, idx: usize, offset: usize) -> Result<(), ItemError> {
        let at = self.as_view().header_at(idx) + self.format.de_id_size();
        write_u16(self.bytes, at, offset)
    }

    fn open_gap(&mut self, at: usize, size: usize) {
        let old_len = self.bytes.len();
        self.bytes.resize(old_len + size, 0);
        self.bytes.copy_within(at..old_len, at + size);
    }

    fn close_gap(&mut self, at: usize, size: usize) {
        let len = self.bytes.len();
        self.bytes.copy_within(at + size..len, at);
        self.bytes.truncate(len - size);
    }
}
