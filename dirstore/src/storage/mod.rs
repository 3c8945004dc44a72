//! Directory storage engine.
//!
//! Directory entries are packed into compound directory items that live in
//! fixed-size leaf nodes.
//!
//! # Layers
//!
//! - [`key`]: keys, the key formats, and the compressed ids stored in items
//! - [`item`]: the compound directory item codec
//! - [`node`]: leaf nodes and their page images
//! - [`coord`]: positions inside a node
//! - [`store`]: the node cache, versions and node locks
//! - [`seal`]: remembered coords, validated by node version
//! - [`directory`]: find, add and remove entries by name
//! - [`image`]: directory image files
//!
//! # Usage
//!
//! ```ignore
//! use dirstore::config::StoreConfig;
//! use dirstore::storage::{Directory, Key, NodeStore};
//!
//! let store = Arc::new(NodeStore::new(StoreConfig::default()));
//! let dir = Directory::create(store, Key::stat_data(1, 7), Key::stat_data(0, 1))?;
//! dir.add_entry(b"notes.txt", Key::stat_data(7, 42))?;
//! assert_eq!(dir.find_entry(b"notes.txt")?, Some(Key::stat_data(7, 42)));
//! ```

pub mod coord;
pub mod directory;
pub mod image;
pub mod item;
pub mod key;
pub mod node;
pub mod page;
pub mod seal;
pub mod store;

pub use coord::{Between, Coord};
pub use directory::{DirError, Directory, LeafIndex, TreeSearch};
pub use image::{ImageError, read_image, write_image};
pub use item::{CdeItem, CdeItemMut, Item, ItemError, ItemKind, NewEntry};
pub use key::{DirEntryId, Key, KeyFormat, KeyType, ObjectKeyId};
pub use node::{Node, NodeError};
pub use page::{BlockId, Page, PageError};
pub use seal::{Repeat, Seal, Validated};
pub use store::{LockMode, LockRequest, NodeGuard, NodeStore, StoreError, VersionCounter};
