//! Tree Hashing
//!
//! Domain-separated SHA3-256 digests for the Merkle prefix tree. Empty
//! leaves, user leaves, and interior nodes hash distinct single-byte
//! prefixes, and every leaf digest binds the per-tree nonce, the leaf index,
//! and the level encoded as a little-endian u32. Interior nodes hash the
//! plain concatenation of their children.

use sha3::{Digest, Sha3_256};

/// Size in bytes of every digest, index, nonce, and salt.
pub const HASH_SIZE: usize = 32;

/// A 32-byte digest.
pub type Hash = [u8; HASH_SIZE];

/// Identifier of the default registered hasher.
pub const DEFAULT_HASH_ID: &str = "sha3-256";

/// Domain prefix for empty-branch digests.
const EMPTY_PREFIX: u8 = b'E';
/// Domain prefix for user-leaf digests.
const LEAF_PREFIX: u8 = b'L';

/// SHA3-256 over the concatenation of `parts`.
fn sha3_256(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha3_256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// A tree hasher: the digest function together with its registered id.
///
/// The hasher in use is injected through the PAD constructor and recorded in
/// the published policies so clients hash with the same algorithm.
#[derive(Clone, Copy)]
pub struct TreeHasher {
    id: &'static str,
    digest: fn(&[&[u8]]) -> Hash,
}

impl TreeHasher {
    /// Registered identifier, as written into policies.
    pub fn id(&self) -> &'static str {
        self.id
    }

    /// Digest of arbitrary concatenated input (used for STR chaining and
    /// commitment values).
    pub fn digest(&self, parts: &[&[u8]]) -> Hash {
        (self.digest)(parts)
    }

    /// Digest of an empty branch: `H('E' || nonce || index || u32_le(level))`.
    pub fn hash_empty(&self, nonce: &[u8], index: &Hash, level: u32) -> Hash {
        self.digest(&[&[EMPTY_PREFIX], nonce, index, &level.to_le_bytes()])
    }

    /// Digest of a user leaf:
    /// `H('L' || nonce || index || u32_le(level) || commit_value)`.
    pub fn hash_leaf(&self, nonce: &[u8], index: &Hash, level: u32, commit_value: &Hash) -> Hash {
        self.digest(&[&[LEAF_PREFIX], nonce, index, &level.to_le_bytes(), commit_value])
    }

    /// Digest of an interior node: `H(left || right)`.
    pub fn hash_interior(&self, left: &Hash, right: &Hash) -> Hash {
        self.digest(&[left, right])
    }
}

impl std::fmt::Debug for TreeHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TreeHasher({})", self.id)
    }
}

impl PartialEq for TreeHasher {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TreeHasher {}

impl Default for TreeHasher {
    fn default() -> Self {
        SHA3_256_HASHER
    }
}

const SHA3_256_HASHER: TreeHasher = TreeHasher {
    id: DEFAULT_HASH_ID,
    digest: sha3_256,
};

/// The registry table used when parsing configuration.
const REGISTERED_HASHERS: &[TreeHasher] = &[SHA3_256_HASHER];

/// Look up a registered hasher by id.
pub fn lookup_hasher(id: &str) -> Option<TreeHasher> {
    REGISTERED_HASHERS.iter().copied().find(|h| h.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_registered_hasher() {
        assert!(lookup_hasher("sha3-256").is_some());
        assert!(lookup_hasher("md5").is_none());
        assert_eq!(TreeHasher::default().id(), DEFAULT_HASH_ID);
    }

    #[test]
    fn test_digest_is_32_bytes_and_stable() {
        let h = TreeHasher::default();
        let a = h.digest(&[b"hello"]);
        let b = h.digest(&[b"hel", b"lo"]);
        assert_eq!(a.len(), HASH_SIZE);
        // Concatenation boundaries must not affect the digest
        assert_eq!(a, b);
    }

    #[test]
    fn test_domain_separation() {
        let h = TreeHasher::default();
        let nonce = [7u8; 32];
        let index = [1u8; 32];
        let commit = [2u8; 32];

        let empty = h.hash_empty(&nonce, &index, 3);
        let leaf = h.hash_leaf(&nonce, &index, 3, &commit);
        assert_ne!(empty, leaf);

        // Level is bound into the digest
        assert_ne!(h.hash_empty(&nonce, &index, 3), h.hash_empty(&nonce, &index, 4));
        // Nonce is bound into the digest
        assert_ne!(empty, h.hash_empty(&[8u8; 32], &index, 3));
    }

    #[test]
    fn test_interior_order_matters() {
        let h = TreeHasher::default();
        let left = [3u8; 32];
        let right = [4u8; 32];
        assert_ne!(h.hash_interior(&left, &right), h.hash_interior(&right, &left));
    }
}
