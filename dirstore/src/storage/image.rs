//! Directory image files.
//!
//! An image holds one directory: a fixed header followed by the page image
//! of every leaf in key order.
//!
//! Header layout (little-endian):
//! - magic: 8 bytes (`DIRSTORE`)
//! - format version: 2 bytes
//! - key format: 1 byte
//! - reserved: 1 byte
//! - node size: 4 bytes
//! - leaf count: 4 bytes
//! - directory stat-data key: locality, objectid (8 bytes each)

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::StoreConfig;
use crate::storage::directory::{DirError, Directory};
use crate::storage::key::{Key, KeyFormat};
use crate::storage::page::{BlockId, MAX_PAGE_SIZE, MIN_PAGE_SIZE, Page};
use crate::storage::store::{NodeStore, StoreError};

const MAGIC: &[u8; 8] = b"DIRSTORE";
const FORMAT_VERSION: u16 = 1;

/// Size of the image header.
pub const HEADER_SIZE: usize = 36;

/// Write `dir` to a new image file at `path`.
pub fn write_image(path: &Path, dir: &Directory) -> Result<(), ImageError> {
    let store = dir.store();
    let config = store.config();
    let leaves = dir.leaves();

    let mut header = [0u8; HEADER_SIZE];
    header[0..8].copy_from_slice(MAGIC);
    header[8..10].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    header[10] = config.key_format.as_u8();
    let node_size = u32::try_from(config.node_size).map_err(|_| ImageError::BadHeader)?;
    header[12..16].copy_from_slice(&node_size.to_le_bytes());
    let count = u32::try_from(leaves.len()).map_err(|_| ImageError::BadHeader)?;
    header[16..20].copy_from_slice(&count.to_le_bytes());
    header[20..28].copy_from_slice(&dir.key().locality().to_le_bytes());
    header[28..36].copy_from_slice(&dir.key().objectid().to_le_bytes());

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(ImageError::Io)?;
    file.write_all(&header).map_err(ImageError::Io)?;
    for &id in &leaves {
        let page = store.page_image(id)?;
        file.write_all(page.as_bytes()).map_err(ImageError::Io)?;
    }
    file.sync_all().map_err(ImageError::Io)?;

    info!(path = %path.display(), leaves = leaves.len(), "wrote image");
    Ok(())
}

/// Read the directory stored in the image at `path`. Node size and key
/// format come from the image; the rest of `base` is kept.
///
/// Every leaf is decoded and checked. A leaf that fails the checks is
/// quarantined and fails the whole read.
pub fn read_image(path: &Path, base: StoreConfig) -> Result<Directory, ImageError> {
    let mut file = File::open(path).map_err(ImageError::Io)?;
    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header).map_err(ImageError::Io)?;

    if &header[0..8] != MAGIC {
        return Err(ImageError::BadMagic);
    }
    let version = u16::from_le_bytes([header[8], header[9]]);
    if version != FORMAT_VERSION {
        return Err(ImageError::UnsupportedVersion(version));
    }
    let key_format = KeyFormat::try_from(header[10]).map_err(|_| ImageError::BadHeader)?;
    let node_size = usize::try_from(read_u32(&header, 12)).map_err(|_| ImageError::BadHeader)?;
    if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&node_size) {
        return Err(ImageError::BadHeader);
    }
    let count = read_u32(&header, 16);
    let dir = Key::stat_data(read_u64(&header, 20), read_u64(&header, 28));

    let config = base.with_node_size(node_size).with_key_format(key_format);
    let store = Arc::new(NodeStore::new(config));
    let mut leaves: Vec<BlockId> = Vec::new();
    for id in 1..=BlockId::from(count) {
        let mut bytes = vec![0u8; node_size];
        file.read_exact(&mut bytes).map_err(ImageError::Io)?;
        store.install_page(id, Page::from_bytes(bytes));
        leaves.push(id);
    }

    let dir = Directory::open(store, dir, &leaves)?;
    info!(path = %path.display(), leaves = leaves.len(), "read image");
    Ok(dir)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Errors raised reading or writing images.
#[derive(Debug)]
pub enum ImageError {
    Io(std::io::Error),
    /// The file does not start with the image magic.
    BadMagic,
    UnsupportedVersion(u16),
    /// A header field is out of range.
    BadHeader,
    Store(StoreError),
    Dir(DirError),
}

impl std::fmt::Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::BadMagic => write!(f, "not a directory image"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported image version {v}"),
            Self::BadHeader => write!(f, "invalid image header"),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Dir(e) => write!(f, "directory error: {e}"),
        }
    }
}

impl std::error::Error for ImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Dir(e) => Some(e),
            Self::BadMagic | Self::UnsupportedVersion(_) | Self::BadHeader => None,
        }
    }
}

impl From<StoreError> for ImageError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<DirError> for ImageError {
    fn from(e: DirError) -> Self {
        Self::Dir(e)
    }
}
