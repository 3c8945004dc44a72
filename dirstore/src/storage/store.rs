//! In-memory node store.
//!
//! Nodes live in a cache as `Arc<RwLock<Node>>`. Evicted nodes are kept as
//! page images in a backing map and decoded again on [`NodeStore::load`].
//! Lock guards own a clone of the node's `Arc`, so a node stays pinned in
//! memory for as long as anyone holds a guard on it.
//!
//! Node versions come from one store-wide [`VersionCounter`]. A node gets a
//! fresh version when it is created, reloaded, mutated or marked dirty, so a
//! version never repeats even when a block id is recycled.

use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use tracing::{debug, error};

use crate::config::StoreConfig;
use crate::storage::node::{Node, NodeError};
use crate::storage::page::{BlockId, Page};

/// A cached node.
pub type SharedNode = Arc<RwLock<Node>>;

/// Store-wide source of node versions. Starts at 1; 0 never names a real
/// node state.
#[derive(Debug)]
pub struct VersionCounter(AtomicU64);

impl VersionCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Take the next version. Every call returns a larger value.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// The version the next call to [`VersionCounter::next`] will return.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for VersionCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock mode for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

/// How hard to try for a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRequest {
    /// Wait until the lock is available.
    Blocking,
    /// Fail at once if the lock is held in a conflicting mode.
    NonBlocking,
    /// Blocking request from a balancing path. `parking_lot` locks are
    /// eventually fair, so this waits like `Blocking`.
    HighPriority,
}

/// A held node lock.
pub enum NodeGuard {
    Read(ArcRwLockReadGuard<RawRwLock, Node>),
    Write(ArcRwLockWriteGuard<RawRwLock, Node>),
}

impl NodeGuard {
    #[must_use]
    pub const fn mode(&self) -> LockMode {
        match self {
            Self::Read(_) => LockMode::Read,
            Self::Write(_) => LockMode::Write,
        }
    }

    /// Mutable access; only write guards have it.
    pub fn node_mut(&mut self) -> Result<&mut Node, StoreError> {
        match self {
            Self::Write(guard) => Ok(&mut **guard),
            Self::Read(guard) => Err(StoreError::NotWriteLocked(guard.id())),
        }
    }

    /// True if this guard locks `node`.
    #[must_use]
    pub fn locks(&self, node: &SharedNode) -> bool {
        match self {
            Self::Read(guard) => Arc::ptr_eq(ArcRwLockReadGuard::rwlock(guard), node),
            Self::Write(guard) => Arc::ptr_eq(ArcRwLockWriteGuard::rwlock(guard), node),
        }
    }
}

impl Deref for NodeGuard {
    type Target = Node;

    fn deref(&self) -> &Node {
        match self {
            Self::Read(guard) => &**guard,
            Self::Write(guard) => &**guard,
        }
    }
}

impl std::fmt::Debug for NodeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeGuard")
            .field("node", &self.id())
            .field("mode", &self.mode())
            .finish()
    }
}

/// Node cache, backing images and block allocation.
#[derive(Debug)]
pub struct NodeStore {
    config: StoreConfig,
    versions: VersionCounter,
    cache: Mutex<HashMap<BlockId, SharedNode>>,
    backing: Mutex<HashMap<BlockId, Page>>,
    free_blocks: Mutex<Vec<BlockId>>,
    quarantined: Mutex<HashSet<BlockId>>,
    next_block: AtomicU64,
}

impl NodeStore {
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            versions: VersionCounter::new(),
            cache: Mutex::new(HashMap::new()),
            backing: Mutex::new(HashMap::new()),
            free_blocks: Mutex::new(Vec::new()),
            quarantined: Mutex::new(HashSet::new()),
            next_block: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub const fn versions(&self) -> &VersionCounter {
        &self.versions
    }

    fn allocate(&self) -> BlockId {
        self.free_blocks
            .lock()
            .pop()
            .unwrap_or_else(|| self.next_block.fetch_add(1, Ordering::Relaxed))
    }

    /// Create an empty node with a fresh block id and version.
    pub fn create_node(&self) -> SharedNode {
        let id = self.allocate();
        let node = Node::new(
            id,
            self.config.key_format,
            self.config.node_size,
            self.versions.next(),
        );
        let shared = Arc::new(RwLock::new(node));
        self.cache.lock().insert(id, Arc::clone(&shared));
        debug!(node = id, "created node");
        shared
    }

    /// Find a node in the cache. Never decodes a backing image.
    #[must_use]
    pub fn lookup(&self, id: BlockId) -> Option<SharedNode> {
        self.cache.lock().get(&id).cloned()
    }

    /// Version of a cached node.
    #[must_use]
    pub fn current_version(&self, id: BlockId) -> Option<u64> {
        self.lookup(id).map(|node| node.read().version())
    }

    /// Get a node from the cache, decoding its backing image on a miss. A
    /// node whose image fails to decode is quarantined.
    pub fn load(&self, id: BlockId) -> Result<SharedNode, StoreError> {
        let mut cache = self.cache.lock();
        if let Some(node) = cache.get(&id) {
            return Ok(Arc::clone(node));
        }

        let backing = self.backing.lock();
        let page = backing.get(&id).ok_or(StoreError::NotFound(id))?;
        match Node::from_page(id, page, self.versions.next()) {
            Ok(node) => {
                let shared = Arc::new(RwLock::new(node));
                cache.insert(id, Arc::clone(&shared));
                debug!(node = id, "loaded node");
                Ok(shared)
            }
            Err(source) => {
                let offset = source.offset();
                error!(node = id, ?offset, error = %source, "corrupt node");
                self.quarantine(id);
                Err(StoreError::Corrupt {
                    node: id,
                    offset,
                    source,
                })
            }
        }
    }

    /// Lock a node. Write locks on quarantined nodes are refused.
    pub fn lock(
        &self,
        node: &SharedNode,
        mode: LockMode,
        request: LockRequest,
    ) -> Result<NodeGuard, StoreError> {
        let guard = match (mode, request) {
            (LockMode::Read, LockRequest::NonBlocking) => node
                .try_read_arc()
                .map(NodeGuard::Read)
                .ok_or(StoreError::WouldBlock)?,
            (LockMode::Read, _) => NodeGuard::Read(node.read_arc()),
            (LockMode::Write, LockRequest::NonBlocking) => node
                .try_write_arc()
                .map(NodeGuard::Write)
                .ok_or(StoreError::WouldBlock)?,
            (LockMode::Write, _) => NodeGuard::Write(node.write_arc()),
        };
        if mode == LockMode::Write && self.is_quarantined(guard.id()) {
            return Err(StoreError::ReadOnly(guard.id()));
        }
        Ok(guard)
    }

    /// Mark a node dirty, which also gives it a new version.
    pub fn mark_dirty(&self, node: &mut Node) {
        node.mark_dirty(&self.versions);
    }

    /// Give a node a new version without dirtying it.
    pub fn bump_version(&self, node: &mut Node) {
        node.touch(&self.versions);
    }

    /// Write a cached node to its backing image and drop it from the cache.
    /// Fails if anyone else holds the node.
    pub fn evict(&self, id: BlockId) -> Result<(), StoreError> {
        let mut cache = self.cache.lock();
        let Some(node) = cache.get(&id) else {
            return Ok(());
        };
        if Arc::strong_count(node) > 1 {
            return Err(StoreError::Pinned(id));
        }
        let page = {
            let mut node = node.write();
            let page = node.write_to_page()?;
            node.clear_dirty();
            page
        };
        self.backing.lock().insert(id, page);
        cache.remove(&id);
        debug!(node = id, "evicted node");
        Ok(())
    }

    /// Release a block. Holders of the old node keep a detached copy that no
    /// lookup returns any more.
    pub fn free(&self, id: BlockId) {
        self.cache.lock().remove(&id);
        self.backing.lock().remove(&id);
        self.quarantined.lock().remove(&id);
        self.free_blocks.lock().push(id);
        debug!(node = id, "freed node");
    }

    /// Page image of a node, from the cache or the backing map.
    pub fn page_image(&self, id: BlockId) -> Result<Page, StoreError> {
        if let Some(node) = self.lookup(id) {
            return Ok(node.read().write_to_page()?);
        }
        self.backing
            .lock()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    /// Install a page image read from outside the store. The block is
    /// decoded on the next [`NodeStore::load`].
    pub fn install_page(&self, id: BlockId, page: Page) {
        self.backing.lock().insert(id, page);
        self.next_block.fetch_max(id + 1, Ordering::Relaxed);
    }

    /// Flag a node as damaged; it can still be read but not written.
    pub fn quarantine(&self, id: BlockId) {
        self.quarantined.lock().insert(id);
    }

    #[must_use]
    pub fn is_quarantined(&self, id: BlockId) -> bool {
        self.quarantined.lock().contains(&id)
    }

    /// Overwrite one byte of a backing image and fix up its checksum, so the
    /// damage is only caught by item checks.
    #[cfg(test)]
    pub(crate) fn damage_backing(&self, id: BlockId, offset: usize, value: u8) {
        if let Some(page) = self.backing.lock().get_mut(&id) {
            page.write_u8(offset, value);
            page.seal_checksum();
        }
    }
}

/// Errors raised by the node store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No node with this block id.
    NotFound(BlockId),
    /// The node is held and cannot be evicted.
    Pinned(BlockId),
    /// A non-blocking lock request found the node locked.
    WouldBlock,
    /// The node is quarantined.
    ReadOnly(BlockId),
    /// The guard is a read guard.
    NotWriteLocked(BlockId),
    /// The node's image failed to decode.
    Corrupt {
        node: BlockId,
        offset: Option<usize>,
        source: NodeError,
    },
    Node(NodeError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "node {id} not found"),
            Self::Pinned(id) => write!(f, "node {id} is pinned"),
            Self::WouldBlock => write!(f, "node is locked"),
            Self::ReadOnly(id) => write!(f, "node {id} is quarantined (read-only)"),
            Self::NotWriteLocked(id) => write!(f, "node {id} is not write-locked"),
            Self::Corrupt {
                node,
                offset: Some(offset),
                source,
            } => write!(f, "node {node} corrupt at byte {offset}: {source}"),
            Self::Corrupt {
                node,
                offset: None,
                source,
            } => write!(f, "node {node} corrupt: {source}"),
            Self::Node(e) => write!(f, "node error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Corrupt { source, .. } | Self::Node(source) => Some(source),
            _ => None,
        }
    }
}

impl From<NodeError> for StoreError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}
