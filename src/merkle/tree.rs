//! The Merkle Prefix Tree
//!
//! Append-only storage of the authenticated mapping. Insertion descends by
//! index bits, invalidating cached hashes along the way; lookups collect the
//! pruned sibling hashes for an authentication path; `recompute_root_hash`
//! refills caches post-order. `Clone` deep-copies the node graph together
//! with every valid cache.

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::crypto::commitment::Commit;
use crate::crypto::hasher::{Hash, TreeHasher};

use super::node::{EmptyNode, InteriorNode, Node, UserLeaf};
use super::proof::{AuthenticationPath, ProofNode};
use super::{index_bit, prefix_index, MAX_DEPTH};

/// Tree-layer errors
#[derive(Debug, Error)]
pub enum TreeError {
    /// Two distinct keys mapped to the same 256-bit index. With an honest
    /// VRF this is unreachable; it guards the split recursion.
    #[error("leaf index collision inserting {key:?}")]
    IndexCollision { key: String },
}

/// The privacy-preserving binary prefix tree.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    nonce: Hash,
    hasher: TreeHasher,
    root: InteriorNode,
    root_hash: Option<Hash>,
}

impl MerkleTree {
    /// An empty tree with a fresh random nonce. The nonce domain-separates
    /// this tree's hashes for its whole lifetime and is carried by clones.
    pub fn new(hasher: TreeHasher) -> Self {
        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        Self::with_nonce(nonce, hasher)
    }

    /// An empty tree with a caller-provided nonce. Used when restoring a
    /// persisted tree and by deterministic tests.
    pub fn with_nonce(nonce: Hash, hasher: TreeHasher) -> Self {
        Self {
            nonce,
            hasher,
            root: InteriorNode::empty_branch(0, [0u8; 32]),
            root_hash: None,
        }
    }

    pub fn nonce(&self) -> &Hash {
        &self.nonce
    }

    pub fn hasher(&self) -> TreeHasher {
        self.hasher
    }

    /// Bind `key` to `payload` at `index` under a fresh commitment.
    ///
    /// Re-inserting an existing index replaces the payload and commitment in
    /// place; the leaf hash still changes because the new salt is fresh.
    pub fn set(&mut self, index: Hash, key: &str, payload: &[u8]) -> Result<(), TreeError> {
        let commitment = Commit::commit(self.hasher, key.as_bytes(), payload);
        self.set_with_commitment(index, key, payload, commitment)
    }

    /// Bind with a caller-provided commitment. The restore path uses this to
    /// reproduce persisted leaf hashes bit-exactly.
    pub fn set_with_commitment(
        &mut self,
        index: Hash,
        key: &str,
        payload: &[u8],
        commitment: Commit,
    ) -> Result<(), TreeError> {
        self.root_hash = None;
        let leaf = UserLeaf {
            level: 0,
            index,
            key: key.to_string(),
            payload: payload.to_vec(),
            commitment,
        };
        Self::insert_into(&mut self.root, leaf)
    }

    fn insert_into(node: &mut InteriorNode, mut leaf: UserLeaf) -> Result<(), TreeError> {
        let level = node.level;
        let go_right = index_bit(&leaf.index, level);
        let (child, cache) = if go_right {
            (&mut node.right, &mut node.right_hash)
        } else {
            (&mut node.left, &mut node.left_hash)
        };
        *cache = None;

        match child {
            Node::Empty(_) => {
                leaf.level = level + 1;
                *child = Node::Leaf(Box::new(leaf));
                Ok(())
            }
            Node::Leaf(existing) if existing.index == leaf.index => {
                existing.payload = leaf.payload;
                existing.commitment = leaf.commitment;
                Ok(())
            }
            Node::Leaf(_) => {
                let placeholder = Node::Empty(EmptyNode {
                    level: 0,
                    index: [0u8; 32],
                });
                let existing = match std::mem::replace(child, placeholder) {
                    Node::Leaf(boxed) => *boxed,
                    _ => unreachable!(),
                };
                let branch = Self::split_leaves(level + 1, existing, leaf)?;
                *child = Node::Interior(Box::new(branch));
                Ok(())
            }
            Node::Interior(next) => Self::insert_into(next, leaf),
        }
    }

    /// Replace a displaced leaf with an interior node at `level` holding both
    /// leaves, branching further for every additional bit the two indices
    /// share.
    fn split_leaves(
        level: u32,
        mut existing: UserLeaf,
        mut incoming: UserLeaf,
    ) -> Result<InteriorNode, TreeError> {
        if level >= MAX_DEPTH {
            return Err(TreeError::IndexCollision { key: incoming.key });
        }
        let mut branch = InteriorNode::empty_branch(level, prefix_index(&incoming.index, level));
        let existing_bit = index_bit(&existing.index, level);
        let incoming_bit = index_bit(&incoming.index, level);

        if existing_bit == incoming_bit {
            let sub = Node::Interior(Box::new(Self::split_leaves(level + 1, existing, incoming)?));
            if incoming_bit {
                branch.right = sub;
            } else {
                branch.left = sub;
            }
        } else {
            existing.level = level + 1;
            incoming.level = level + 1;
            let (left, right) = if incoming_bit {
                (existing, incoming)
            } else {
                (incoming, existing)
            };
            branch.left = Node::Leaf(Box::new(left));
            branch.right = Node::Leaf(Box::new(right));
        }
        Ok(branch)
    }

    /// Authentication path for `lookup_index`: the pruned sibling hashes
    /// root-first, plus the terminal node. The caller fills in the VRF proof.
    ///
    /// A terminal leaf with a different index proves absence without
    /// revealing the neighbor: its payload and salt are suppressed, keeping
    /// only the commitment value the hash needs.
    pub fn get(&self, lookup_index: &Hash) -> AuthenticationPath {
        let mut pruned_siblings = Vec::new();
        let mut current = &self.root;

        loop {
            let go_right = index_bit(lookup_index, current.level);
            let (child, sibling, sibling_cache) = if go_right {
                (&current.right, &current.left, current.left_hash)
            } else {
                (&current.left, &current.right, current.right_hash)
            };
            pruned_siblings
                .push(sibling_cache.unwrap_or_else(|| sibling.hash(self.hasher, &self.nonce)));

            let leaf = match child {
                Node::Interior(next) => {
                    current = &**next;
                    continue;
                }
                Node::Leaf(leaf) if leaf.index == *lookup_index => ProofNode {
                    level: leaf.level,
                    index: leaf.index,
                    value: Some(leaf.payload.clone()),
                    commitment: Some(leaf.commitment.clone()),
                    is_empty: false,
                },
                Node::Leaf(leaf) => ProofNode {
                    level: leaf.level,
                    index: leaf.index,
                    value: None,
                    commitment: Some(leaf.commitment.without_salt()),
                    is_empty: false,
                },
                Node::Empty(empty) => ProofNode {
                    level: empty.level,
                    index: empty.index,
                    value: None,
                    commitment: None,
                    is_empty: true,
                },
            };

            return AuthenticationPath {
                tree_nonce: self.nonce,
                lookup_index: *lookup_index,
                vrf_proof: Vec::new(),
                pruned_siblings,
                leaf,
            };
        }
    }

    /// Post-order refill of every invalidated cache; returns the tree hash.
    pub fn recompute_root_hash(&mut self) -> Hash {
        let hasher = self.hasher;
        let nonce = self.nonce;
        let hash = Self::fill_interior(&mut self.root, hasher, &nonce);
        self.root_hash = Some(hash);
        hash
    }

    /// The tree hash as of the last recomputation.
    pub fn root_hash(&self) -> Option<Hash> {
        self.root_hash
    }

    fn fill_interior(node: &mut InteriorNode, hasher: TreeHasher, nonce: &Hash) -> Hash {
        let left = match node.left_hash {
            Some(h) => h,
            None => {
                let h = Self::fill_node(&mut node.left, hasher, nonce);
                node.left_hash = Some(h);
                h
            }
        };
        let right = match node.right_hash {
            Some(h) => h,
            None => {
                let h = Self::fill_node(&mut node.right, hasher, nonce);
                node.right_hash = Some(h);
                h
            }
        };
        hasher.hash_interior(&left, &right)
    }

    fn fill_node(node: &mut Node, hasher: TreeHasher, nonce: &Hash) -> Hash {
        match node {
            Node::Interior(next) => Self::fill_interior(next, hasher, nonce),
            other => other.hash(hasher, nonce),
        }
    }

    /// Every user leaf, in left-to-right order. Used by the VRF-rotation
    /// reshuffle and by persistence.
    pub fn leaves(&self) -> Vec<&UserLeaf> {
        let mut out = Vec::new();
        Self::collect_leaves(&self.root, &mut out);
        out
    }

    fn collect_leaves<'a>(node: &'a InteriorNode, out: &mut Vec<&'a UserLeaf>) {
        for child in [&node.left, &node.right] {
            match child {
                Node::Leaf(leaf) => out.push(leaf),
                Node::Interior(next) => Self::collect_leaves(next, out),
                Node::Empty(_) => {}
            }
        }
    }
}
