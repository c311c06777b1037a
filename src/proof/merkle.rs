//! Fixed-Depth Merkle Tree
//!
//! Binary Merkle tree of a fixed height over pre-hashed leaves (one leaf per
//! transaction, indexed by its position in the block). Absent leaves and
//! subtrees hash to a per-level constant, so a block with three transactions
//! and a block with three thousand share the same proof size.
//!
//! Proofs travel as raw bytes: `depth` concatenated 32-byte sibling hashes,
//! ordered leaf to root.

use sha2::{Digest, Sha256};

use crate::core::hash::Hash32;

/// Domain separator for internal nodes.
const MERKLE_NODE_DOMAIN: &[u8] = b"PLASMA_MERKLE_NODE_V1";

/// Domain separator for the empty leaf.
const MERKLE_EMPTY_DOMAIN: &[u8] = b"PLASMA_MERKLE_EMPTY_V1";

/// Default tree height used by the child chain.
pub const DEFAULT_DEPTH: usize = 16;

/// Largest supported height (leaf index must fit a u64 shift).
pub const MAX_DEPTH: usize = 32;

/// Hash of an absent leaf.
fn empty_leaf() -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(MERKLE_EMPTY_DOMAIN);
    hasher.finalize().into()
}

/// Hashes of empty subtrees, index = level (0 = leaf).
fn empty_subtrees(depth: usize) -> Vec<Hash32> {
    let mut zeros = Vec::with_capacity(depth + 1);
    let mut current = empty_leaf();
    zeros.push(current);
    for _ in 0..depth {
        current = hash_nodes(&current, &current);
        zeros.push(current);
    }
    zeros
}

/// Membership proof: sibling hashes from leaf to root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    /// Position of the proven leaf.
    pub leaf_index: u64,
    /// Sibling hashes, leaf level first.
    pub siblings: Vec<Hash32>,
}

impl MerkleProof {
    /// Encode siblings as the wire proof.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.siblings.concat()
    }

    /// Parse wire proof bytes. Returns None unless the length is exactly
    /// `depth * 32`.
    pub fn from_bytes(leaf_index: u64, bytes: &[u8], depth: usize) -> Option<Self> {
        if depth == 0 || depth > MAX_DEPTH || bytes.len() != depth * 32 {
            return None;
        }
        let siblings = bytes
            .chunks_exact(32)
            .map(|chunk| {
                let mut node = [0u8; 32];
                node.copy_from_slice(chunk);
                node
            })
            .collect();
        Some(Self {
            leaf_index,
            siblings,
        })
    }

    /// Fold the proof over `leaf` and return the implied root.
    pub fn compute_root(&self, leaf: &Hash32) -> Hash32 {
        let mut current = *leaf;
        let mut index = self.leaf_index;

        for sibling in &self.siblings {
            current = if index % 2 == 0 {
                hash_nodes(&current, sibling)
            } else {
                hash_nodes(sibling, &current)
            };
            index /= 2;
        }

        current
    }

    /// Check the proof against `root`.
    ///
    /// A leaf index that does not fit the tree height is rejected.
    pub fn verify(&self, root: &Hash32, leaf: &Hash32) -> bool {
        let depth = self.siblings.len();
        if depth == 0 || depth > MAX_DEPTH || self.leaf_index >= 1u64 << depth {
            return false;
        }
        self.compute_root(leaf) == *root
    }
}

/// Fixed-height Merkle tree over pre-hashed leaves.
#[derive(Clone, Debug)]
pub struct FixedMerkleTree {
    depth: usize,
    /// Populated nodes per level (leaves at index 0, root at `depth`).
    levels: Vec<Vec<Hash32>>,
    /// Empty-subtree hash per level.
    zeros: Vec<Hash32>,
}

impl FixedMerkleTree {
    /// Build a tree of height `depth` from leaf hashes.
    ///
    /// Returns None if the leaves do not fit.
    pub fn new(depth: usize, leaves: Vec<Hash32>) -> Option<Self> {
        if depth == 0 || depth > MAX_DEPTH || leaves.len() as u64 > 1u64 << depth {
            return None;
        }

        let zeros = empty_subtrees(depth);
        let mut levels = Vec::with_capacity(depth + 1);
        let mut current = leaves;

        for level in 0..depth {
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for chunk in current.chunks(2) {
                let left = &chunk[0];
                let right = chunk.get(1).unwrap_or(&zeros[level]);
                next.push(hash_nodes(left, right));
            }
            levels.push(current);
            current = next;
        }
        levels.push(current);

        Some(Self {
            depth,
            levels,
            zeros,
        })
    }

    /// Tree height.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of populated leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Root hash. The empty tree has the empty-subtree root.
    pub fn root(&self) -> Hash32 {
        self.levels[self.depth]
            .first()
            .copied()
            .unwrap_or(self.zeros[self.depth])
    }

    /// Generate a membership proof for the leaf at `index`.
    ///
    /// Returns None if index is out of bounds.
    pub fn generate_proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut current_index = index;

        for level in 0..self.depth {
            let sibling_index = current_index ^ 1;
            let sibling = self.levels[level]
                .get(sibling_index)
                .copied()
                .unwrap_or(self.zeros[level]);
            siblings.push(sibling);
            current_index /= 2;
        }

        Some(MerkleProof {
            leaf_index: index as u64,
            siblings,
        })
    }
}

/// Hash two child nodes with domain separation.
fn hash_nodes(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(MERKLE_NODE_DOMAIN);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}
