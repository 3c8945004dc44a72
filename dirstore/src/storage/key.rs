//! Keys and their compressed per-entry forms.
//!
//! A [`Key`] is four 64-bit elements compared element by element:
//!
//! ```text
//! +---------------------------+----------+----------+--------+
//! | locality << 4 | key_type  | ordering | objectid | offset |
//! +---------------------------+----------+----------+--------+
//! ```
//!
//! Every entry of one directory shares the first element (the directory's
//! objectid as locality, `KeyType::FileName` as type), so items store only
//! the remaining elements per entry as a [`DirEntryId`]. The target of an
//! entry is stored as an [`ObjectKeyId`], which keeps the locality but drops
//! the offset (always 0 for stat-data keys).
//!
//! With [`KeyFormat::Short`] the ordering element is always 0 and is never
//! written to disk.
//!
//! All multi-byte integers are little-endian.

use std::cmp::Ordering;
use std::fmt;

/// Bits reserved for the key type in the first element.
const KEY_TYPE_BITS: u32 = 4;

/// Mask for the key type in the first element.
const KEY_TYPE_MASK: u64 = (1 << KEY_TYPE_BITS) - 1;

/// Largest locality that fits in the first element.
pub const MAX_LOCALITY: u64 = u64::MAX >> KEY_TYPE_BITS;

/// True if `locality` fits into a key without losing bits.
#[must_use]
pub const fn is_valid_locality(locality: u64) -> bool {
    locality <= MAX_LOCALITY
}

/// Set in the first packed element of an entry key whose name did not fit
/// into the key. The offset then holds a hash of the unpacked tail.
pub const LONGNAME_MARK: u64 = 0x0100_0000_0000_0000;

/// Name of the entry pointing at the directory itself.
pub const DOT: &[u8] = b".";

/// Name of the entry pointing at the parent directory.
pub const DOT_DOT: &[u8] = b"..";

/// Minor key type, stored in the low bits of the first element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum KeyType {
    /// Directory entry key.
    FileName = 0,
    /// Stat-data key of an object (the target of a directory entry).
    StatData = 1,
}

impl TryFrom<u8> for KeyType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::FileName),
            1 => Ok(Self::StatData),
            _ => Err(value),
        }
    }
}

/// On-disk key layout of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyFormat {
    /// Four elements, ordering stored.
    #[default]
    Large,
    /// Three elements, ordering implied to be 0.
    Short,
}

impl KeyFormat {
    /// Size of a full key on disk.
    #[must_use]
    pub const fn key_size(self) -> usize {
        match self {
            Self::Large => 32,
            Self::Short => 24,
        }
    }

    /// Size of an [`ObjectKeyId`] on disk.
    #[must_use]
    pub const fn obj_key_id_size(self) -> usize {
        match self {
            Self::Large => 24,
            Self::Short => 16,
        }
    }

    /// Size of a [`DirEntryId`] on disk: the three (or two) tail key
    /// elements at full width, so no id bits are dropped.
    #[must_use]
    pub const fn de_id_size(self) -> usize {
        match self {
            Self::Large => 24,
            Self::Short => 16,
        }
    }

    /// Longest name that is reconstructed from its key alone.
    #[must_use]
    pub const fn max_short_name_len(self) -> usize {
        match self {
            Self::Large => 23,
            Self::Short => 15,
        }
    }

    /// Format tag stored in node headers.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Large => 0,
            Self::Short => 1,
        }
    }
}

impl TryFrom<u8> for KeyFormat {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Large),
            1 => Ok(Self::Short),
            _ => Err(value),
        }
    }
}

impl fmt::Display for KeyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Large => write!(f, "large"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// A totally ordered tree key.
///
/// Field order matters: the derived `Ord` compares `el0` (locality and
/// type), then ordering, objectid and offset.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    el0: u64,
    ordering: u64,
    objectid: u64,
    offset: u64,
}

impl Key {
    /// The smallest possible key.
    pub const MIN: Self = Self {
        el0: 0,
        ordering: 0,
        objectid: 0,
        offset: 0,
    };

    /// The largest possible key.
    pub const MAX: Self = Self {
        el0: u64::MAX,
        ordering: u64::MAX,
        objectid: u64::MAX,
        offset: u64::MAX,
    };

    /// Build a key from its fields. `locality` must not exceed
    /// [`MAX_LOCALITY`]; callers taking localities from outside check it
    /// with [`is_valid_locality`] first.
    #[must_use]
    pub const fn new(
        locality: u64,
        key_type: KeyType,
        ordering: u64,
        objectid: u64,
        offset: u64,
    ) -> Self {
        debug_assert!(is_valid_locality(locality), "locality out of range");
        Self {
            el0: ((locality & MAX_LOCALITY) << KEY_TYPE_BITS) | key_type as u64,
            ordering,
            objectid,
            offset,
        }
    }

    /// Stat-data key of an object: the value a directory entry points at.
    #[must_use]
    pub const fn stat_data(locality: u64, objectid: u64) -> Self {
        Self::new(locality, KeyType::StatData, 0, objectid, 0)
    }

    #[must_use]
    pub const fn locality(&self) -> u64 {
        self.el0 >> KEY_TYPE_BITS
    }

    /// The raw type bits. Use [`Key::key_type`] for the decoded form.
    #[must_use]
    pub const fn type_bits(&self) -> u8 {
        (self.el0 & KEY_TYPE_MASK) as u8
    }

    #[must_use]
    pub fn key_type(&self) -> Option<KeyType> {
        KeyType::try_from(self.type_bits()).ok()
    }

    #[must_use]
    pub const fn ordering(&self) -> u64 {
        self.ordering
    }

    #[must_use]
    pub const fn objectid(&self) -> u64 {
        self.objectid
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// True if both keys belong to the same locality and type, which is what
    /// lets their tails be compared on their own.
    #[must_use]
    pub const fn same_prefix(&self, other: &Self) -> bool {
        self.el0 == other.el0
    }

    /// Write the key in `format` into `out`, which must be exactly
    /// `format.key_size()` bytes.
    pub fn encode(&self, format: KeyFormat, out: &mut [u8]) {
        debug_assert_eq!(out.len(), format.key_size());
        write_u64(out, 0, self.el0);
        match format {
            KeyFormat::Large => {
                write_u64(out, 8, self.ordering);
                write_u64(out, 16, self.objectid);
                write_u64(out, 24, self.offset);
            }
            KeyFormat::Short => {
                write_u64(out, 8, self.objectid);
                write_u64(out, 16, self.offset);
            }
        }
    }

    /// Read a key written by [`Key::encode`].
    #[must_use]
    pub fn decode(format: KeyFormat, bytes: &[u8]) -> Self {
        match format {
            KeyFormat::Large => Self {
                el0: read_u64(bytes, 0),
                ordering: read_u64(bytes, 8),
                objectid: read_u64(bytes, 16),
                offset: read_u64(bytes, 24),
            },
            KeyFormat::Short => Self {
                el0: read_u64(bytes, 0),
                ordering: 0,
                objectid: read_u64(bytes, 8),
                offset: read_u64(bytes, 16),
            },
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:x}:{:x}:{:x}:{:x}:{:x})",
            self.locality(),
            self.type_bits(),
            self.ordering,
            self.objectid,
            self.offset
        )
    }
}

/// Compact identity of an entry's target: locality and objectid (and
/// ordering with large keys). The offset of a stat-data key is always 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectKeyId {
    el0: u64,
    ordering: u64,
    objectid: u64,
}

impl ObjectKeyId {
    /// Compress the key of an object.
    #[must_use]
    pub const fn from_key(key: &Key) -> Self {
        Self {
            el0: key.el0,
            ordering: key.ordering,
            objectid: key.objectid,
        }
    }

    /// Rebuild the object's stat-data key.
    #[must_use]
    pub const fn to_key(&self) -> Key {
        Key {
            el0: self.el0,
            ordering: self.ordering,
            objectid: self.objectid,
            offset: 0,
        }
    }

    pub fn encode(&self, format: KeyFormat, out: &mut [u8]) {
        debug_assert_eq!(out.len(), format.obj_key_id_size());
        write_u64(out, 0, self.el0);
        match format {
            KeyFormat::Large => {
                write_u64(out, 8, self.ordering);
                write_u64(out, 16, self.objectid);
            }
            KeyFormat::Short => {
                debug_assert_eq!(self.ordering, 0, "short keys carry no ordering");
                write_u64(out, 8, self.objectid);
            }
        }
    }

    #[must_use]
    pub fn decode(format: KeyFormat, bytes: &[u8]) -> Self {
        match format {
            KeyFormat::Large => Self {
                el0: read_u64(bytes, 0),
                ordering: read_u64(bytes, 8),
                objectid: read_u64(bytes, 16),
            },
            KeyFormat::Short => Self {
                el0: read_u64(bytes, 0),
                ordering: 0,
                objectid: read_u64(bytes, 8),
            },
        }
    }
}

/// Compact per-entry sort key: the entry key without its first element.
///
/// The derived `Ord` matches the order of the reconstructed keys for entries
/// of the same directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirEntryId {
    ordering: u64,
    objectid: u64,
    offset: u64,
}

impl DirEntryId {
    /// Compress an entry key.
    #[must_use]
    pub const fn from_key(key: &Key) -> Self {
        Self {
            ordering: key.ordering,
            objectid: key.objectid,
            offset: key.offset,
        }
    }

    /// Rebuild the entry key given the locality shared by the whole item.
    #[must_use]
    pub const fn to_key(&self, locality: u64) -> Key {
        Key {
            el0: Key::new(locality, KeyType::FileName, 0, 0, 0).el0,
            ordering: self.ordering,
            objectid: self.objectid,
            offset: self.offset,
        }
    }

    /// Compare against a full key without rebuilding it. Only the tail
    /// elements are compared; the caller has already matched the prefix.
    #[must_use]
    pub fn cmp_key(&self, key: &Key) -> Ordering {
        self.ordering
            .cmp(&key.ordering)
            .then(self.objectid.cmp(&key.objectid))
            .then(self.offset.cmp(&key.offset))
    }

    pub fn encode(&self, format: KeyFormat, out: &mut [u8]) {
        debug_assert_eq!(out.len(), format.de_id_size());
        match format {
            KeyFormat::Large => {
                write_u64(out, 0, self.ordering);
                write_u64(out, 8, self.objectid);
                write_u64(out, 16, self.offset);
            }
            KeyFormat::Short => {
                write_u64(out, 0, self.objectid);
                write_u64(out, 8, self.offset);
            }
        }
    }

    #[must_use]
    pub fn decode(format: KeyFormat, bytes: &[u8]) -> Self {
        match format {
            KeyFormat::Large => Self {
                ordering: read_u64(bytes, 0),
                objectid: read_u64(bytes, 8),
                offset: read_u64(bytes, 16),
            },
            KeyFormat::Short => Self {
                ordering: 0,
                objectid: read_u64(bytes, 0),
                offset: read_u64(bytes, 8),
            },
        }
    }
}

/// Build the key of entry `name` in the directory whose objectid is `dir`.
///
/// `"."` gets an all-zero tail so it sorts first. Other names are packed
/// into the tail elements as big-endian byte strings, so short names sort
/// like their bytes. Names longer than [`KeyFormat::max_short_name_len`]
/// keep their first bytes packed, set [`LONGNAME_MARK`] and hash the rest.
#[must_use]
pub fn build_entry_key(format: KeyFormat, dir: u64, name: &[u8]) -> Key {
    if name == DOT {
        return Key::new(dir, KeyType::FileName, 0, 0, 0);
    }

    let len = name.len();
    match format {
        KeyFormat::Large => {
            let mut ordering = pack_string(name, 1);
            let mut objectid = 0;
            let mut offset = 0;
            if len > 7 {
                objectid = pack_string(&name[7..], 0);
                if len > 15 {
                    if len <= 23 {
                        offset = pack_string(&name[15..], 0);
                    } else {
                        ordering |= LONGNAME_MARK;
                        offset = hash_name(&name[15..]);
                    }
                }
            }
            Key::new(dir, KeyType::FileName, ordering, objectid, offset)
        }
        KeyFormat::Short => {
            let mut objectid = pack_string(name, 1);
            let mut offset = 0;
            if len > 7 {
                if len <= 15 {
                    offset = pack_string(&name[7..], 0);
                } else {
                    objectid |= LONGNAME_MARK;
                    offset = hash_name(&name[7..]);
                }
            }
            Key::new(dir, KeyType::FileName, 0, objectid, offset)
        }
    }
}

/// Compressed sort key of entry `name` in directory `dir`.
#[must_use]
pub fn build_de_id(format: KeyFormat, dir: u64, name: &[u8]) -> DirEntryId {
    DirEntryId::from_key(&build_entry_key(format, dir, name))
}

/// True if a name of `len` bytes has to be stored next to its entry.
#[must_use]
pub const fn is_longname(format: KeyFormat, len: usize) -> bool {
    len > format.max_short_name_len()
}

/// True if `key` was built from a name that did not fit into it.
#[must_use]
pub const fn is_longname_key(format: KeyFormat, key: &Key) -> bool {
    let packed = match format {
        KeyFormat::Large => key.ordering,
        KeyFormat::Short => key.objectid,
    };
    packed & LONGNAME_MARK != 0
}

/// True for the key of the `"."` entry.
#[must_use]
pub const fn is_dot_key(key: &Key) -> bool {
    key.type_bits() == KeyType::FileName as u8
        && key.ordering == 0
        && key.objectid == 0
        && key.offset == 0
}

/// Recover a short name from its entry key. Returns `None` for long-name
/// keys, whose names are stored in the item.
#[must_use]
pub fn extract_name_from_key(format: KeyFormat, key: &Key) -> Option<Vec<u8>> {
    if is_longname_key(format, key) {
        return None;
    }
    if is_dot_key(key) {
        return Some(DOT.to_vec());
    }

    let mut name = Vec::with_capacity(format.max_short_name_len());
    if format == KeyFormat::Large {
        unpack_string(key.ordering, &mut name);
    }
    unpack_string(key.objectid, &mut name);
    unpack_string(key.offset, &mut name);
    Some(name)
}

/// Pack up to `8 - start` leading bytes of `name` into the low bytes of a
/// u64, most significant first, leaving the top `start` bytes zero.
fn pack_string(name: &[u8], start: usize) -> u64 {
    let width = 8 - start;
    let take = name.len().min(width);
    if take == 0 {
        return 0;
    }
    let packed = name[..take]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    packed << ((width - take) * 8)
}

/// Append the non-zero bytes of `value`, most significant first.
fn unpack_string(mut value: u64, out: &mut Vec<u8>) {
    while value != 0 {
        #[allow(clippy::cast_possible_truncation)]
        let byte = (value >> 56) as u8;
        if byte != 0 {
            out.push(byte);
        }
        value <<= 8;
    }
}

/// r5 hash of a name tail.
fn hash_name(tail: &[u8]) -> u64 {
    tail.iter().fold(0u64, |acc, &c| {
        let c = u64::from(c);
        acc.wrapping_add(c << 4)
            .wrapping_add(c >> 4)
            .wrapping_mul(11)
    })
}

/// Read a little-endian u64. Panics if `bytes` is too short; callers check
/// bounds first.
pub(crate) fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

pub(crate) fn write_u64(bytes: &mut [u8], at: usize, value: u64) {
    bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
}
