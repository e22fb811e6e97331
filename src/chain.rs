use crate::types::{Hash, HASH_SIZE};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Signed block header as received from the chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedHeader {
    pub block_hash: Hash,
    pub parent: Hash,
    pub height: u32,
    pub signature: Vec<u8>,
}

/// Immutable node in the chain index. Nodes carry a parent-only link, so
/// the index map holds the single owning reference and no cycle can form.
#[derive(Debug)]
pub struct BlockNode {
    parent: Option<Arc<BlockNode>>,
    hash: Hash,
    height: u32,
}

impl BlockNode {
    /// Build a node for `header` chained onto `parent`; a parentless node
    /// is genesis at height 0
    pub fn new(header: &SignedHeader, parent: Option<Arc<BlockNode>>) -> Self {
        let height = match &parent {
            Some(parent) => parent.height + 1,
            None => 0,
        };
        Self {
            parent,
            hash: header.block_hash,
            height,
        }
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn parent(&self) -> Option<&Arc<BlockNode>> {
        self.parent.as_ref()
    }

    /// Walk parent links to the ancestor at `height`; absent if `height`
    /// is above this node. Runs in O(self.height - height).
    pub fn ancestor(self: &Arc<Self>, height: u32) -> Option<Arc<BlockNode>> {
        if height > self.height {
            return None;
        }

        let mut ancestor = self.clone();
        while ancestor.height != height {
            ancestor = ancestor.parent.clone()?;
        }
        Some(ancestor)
    }

    /// Canonical on-disk ordering key: big-endian u32 height followed by
    /// the first HASH_SIZE-4 bytes of the hash; the final four bytes of
    /// the HASH_SIZE+4 width are reserved
    pub fn index_key(&self) -> Vec<u8> {
        let mut key = vec![0u8; HASH_SIZE + 4];
        key[..4].copy_from_slice(&self.height.to_be_bytes());
        key[4..HASH_SIZE].copy_from_slice(&self.hash[..HASH_SIZE - 4]);
        key
    }
}

/// In-memory chain index: block hash to node, with parent pointers for
/// ancestor queries
pub struct BlockIndex {
    index: RwLock<HashMap<Hash, Arc<BlockNode>>>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Insert by hash; last writer wins on a duplicate hash
    pub fn add_block(&self, node: Arc<BlockNode>) {
        self.index.write().insert(node.hash, node);
    }

    pub fn has_block(&self, hash: &Hash) -> bool {
        self.index.read().contains_key(hash)
    }

    pub fn lookup_node(&self, hash: &Hash) -> Option<Arc<BlockNode>> {
        self.index.read().get(hash).cloned()
    }
}

impl Default for BlockIndex {
    fn default() -> Self {
        Self::new()
    }
}
