//! Page images of nodes.
//!
//! A node is written out as one page of the store's node size. Pages carry
//! a small header with a CRC32 over the whole page so that damaged images
//! are caught before any item is decoded.

/// Identifier of a node: its block number in the store.
pub type BlockId = u64;

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest supported page size. Item offsets are 16-bit.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Page type identifiers stored in page headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Leaf node holding items.
    Leaf = 0x01,
}

impl TryFrom<u8> for PageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Leaf),
            _ => Err(value),
        }
    }
}

/// Header present at the start of every page.
///
/// Layout:
/// - `page_type`: 1 byte
/// - `flags`: 1 byte
/// - `checksum`: 4 bytes (CRC32)
/// - `reserved`: 2 bytes
#[derive(Debug, Copy, Clone)]
pub struct PageHeader {
    pub page_type: PageType,
    pub flags: u8,
    pub checksum: u32,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 8;

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.page_type as u8;
        buf[1] = self.flags;
        buf[2..6].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PageError> {
        if bytes.len() < Self::SIZE {
            return Err(PageError::Truncated(bytes.len()));
        }
        let page_type = PageType::try_from(bytes[0]).map_err(PageError::InvalidPageType)?;
        let flags = bytes[1];
        let checksum = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);

        Ok(Self {
            page_type,
            flags,
            checksum,
        })
    }
}

/// A raw page buffer of the store's node size.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a zeroed page of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Wrap raw bytes read from an image.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: bytes.into_boxed_slice(),
        }
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Read `len` bytes at `offset`, or `None` past the end of the page.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.data.get(offset..offset.checked_add(len)?)
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    #[must_use]
    pub fn read_u8(&self, offset: usize) -> Option<u8> {
        self.data.get(offset).copied()
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    /// Read a little-endian u16 at `offset`.
    #[must_use]
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        let bytes = self.read_bytes(offset, 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    /// CRC32 of the page with the checksum field (bytes 2-5) taken as zero.
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[0..2]);
        hasher.update(&[0u8; 4]);
        hasher.update(&self.data[6..]);
        hasher.finalize()
    }

    /// Store the checksum of the current contents in the header.
    pub fn seal_checksum(&mut self) {
        let checksum = self.compute_checksum();
        self.data[2..6].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Parse the header and compare its checksum with the contents.
    pub fn verify(&self) -> Result<PageHeader, PageError> {
        if self.data.len() < MIN_PAGE_SIZE {
            return Err(PageError::Truncated(self.data.len()));
        }
        let header = PageHeader::from_bytes(&self.data)?;
        let actual = self.compute_checksum();
        if header.checksum != actual {
            return Err(PageError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }
        Ok(header)
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("size", &self.data.len())
            .field("first_16_bytes", &&self.data[..self.data.len().min(16)])
            .finish_non_exhaustive()
    }
}

/// Errors related to page images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    /// Invalid page type byte.
    InvalidPageType(u8),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// The image is shorter than a page.
    Truncated(usize),
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageType(v) => write!(f, "invalid page type: 0x{v:02x}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            Self::Truncated(len) => write!(f, "page truncated to {len} bytes"),
        }
    }
}

impl std::error::Error for PageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_header_roundtrip() {
        let header = PageHeader {
            page_type: PageType::Leaf,
            flags: 0x42,
            checksum: 0xDEAD_BEEF,
        };

        let bytes = header.to_bytes();
        let restored = PageHeader::from_bytes(&bytes).expect("should parse");

        assert_eq!(restored.page_type, PageType::Leaf);
        assert_eq!(restored.flags, 0x42);
        assert_eq!(restored.checksum, 0xDEAD_BEEF);
    }

    #[test]
    fn test_page_read_write() {
        let mut page = Page::new(MIN_PAGE_SIZE);

        page.write_u8(0, 0xFF);
        assert_eq!(page.read_u8(0), Some(0xFF));

        page.write_u16(100, 0x1234);
        assert_eq!(page.read_u16(100), Some(0x1234));

        page.write_bytes(500, b"hello");
        assert_eq!(page.read_bytes(500, 5), Some(b"hello".as_slice()));
        assert_eq!(page.read_bytes(510, 5), None);
        assert_eq!(page.read_u16(MIN_PAGE_SIZE - 1), None);
    }

    #[test]
    fn test_checksum_detects_damage() {
        let mut page = Page::new(1024);
        page.write_bytes(0, &PageHeader {
            page_type: PageType::Leaf,
            flags: 0,
            checksum: 0,
        }
        .to_bytes());
        page.write_bytes(64, b"payload");
        page.seal_checksum();
        assert!(page.verify().is_ok());

        page.write_u8(70, b'X');
        assert!(matches!(
            page.verify(),
            Err(PageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_page_type_conversion() {
        assert_eq!(PageType::try_from(0x01), Ok(PageType::Leaf));
        assert!(PageType::try_from(0xFF).is_err());
        assert!(matches!(
            Page::new(16).verify(),
            Err(PageError::Truncated(16))
        ));
    }
}
