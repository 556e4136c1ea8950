//! Salted Commitments
//!
//! A commitment binds a `(key, payload)` pair without revealing the payload:
//! `value = H(salt || key || payload)` with a fresh 32-byte salt. Revealing
//! the salt opens the commitment; a commitment carried inside a
//! proof-of-absence path has its salt suppressed and cannot be opened.

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

use super::hasher::{Hash, TreeHasher, HASH_SIZE};

/// Size in bytes of a commitment salt.
pub const SALT_SIZE: usize = HASH_SIZE;

/// A salted commitment to a `(key, payload)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    salt: Option<[u8; SALT_SIZE]>,
    value: Hash,
}

impl Commit {
    /// Commit to `(key, payload)` with a fresh random salt.
    pub fn commit(hasher: TreeHasher, key: &[u8], payload: &[u8]) -> Self {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        Self::with_salt(hasher, salt, key, payload)
    }

    /// Commit with a caller-provided salt. Used when restoring a persisted
    /// tree, where reproducing the stored leaf hashes requires the original
    /// salts.
    pub fn with_salt(hasher: TreeHasher, salt: [u8; SALT_SIZE], key: &[u8], payload: &[u8]) -> Self {
        let value = hasher.digest(&[&salt, key, payload]);
        Self {
            salt: Some(salt),
            value,
        }
    }

    /// An unopenable commitment carrying only the committed value. This is
    /// what a proof-of-absence path discloses about a neighboring leaf.
    pub fn opaque(value: Hash) -> Self {
        Self { salt: None, value }
    }

    /// Reassemble a commitment from wire fields without recomputing the
    /// value. `verify` still recomputes from the salt, so a mismatched pair
    /// fails to open.
    pub fn from_raw_parts(salt: [u8; SALT_SIZE], value: Hash) -> Self {
        Self {
            salt: Some(salt),
            value,
        }
    }

    /// The committed value.
    pub fn value(&self) -> &Hash {
        &self.value
    }

    /// The salt, when this commitment is openable.
    pub fn salt(&self) -> Option<&[u8; SALT_SIZE]> {
        self.salt.as_ref()
    }

    /// A copy with the salt suppressed.
    pub fn without_salt(&self) -> Self {
        Self::opaque(self.value)
    }

    /// Open the commitment against `(key, payload)`. Comparison is
    /// constant-time. Returns `false` when the salt is absent.
    pub fn verify(&self, hasher: TreeHasher, key: &[u8], payload: &[u8]) -> bool {
        let Some(salt) = self.salt.as_ref() else {
            return false;
        };
        let recomputed = hasher.digest(&[salt, key, payload]);
        self.value.ct_eq(&recomputed).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_and_open() {
        let hasher = TreeHasher::default();
        let c = Commit::commit(hasher, b"alice", b"key material");
        assert!(c.verify(hasher, b"alice", b"key material"));
        assert!(!c.verify(hasher, b"alice", b"other material"));
        assert!(!c.verify(hasher, b"bob", b"key material"));
    }

    #[test]
    fn test_fresh_salt_changes_value() {
        let hasher = TreeHasher::default();
        let a = Commit::commit(hasher, b"alice", b"v");
        let b = Commit::commit(hasher, b"alice", b"v");
        assert_ne!(a.value(), b.value());
    }

    #[test]
    fn test_opaque_cannot_open() {
        let hasher = TreeHasher::default();
        let c = Commit::commit(hasher, b"alice", b"v");
        let stripped = c.without_salt();
        assert_eq!(stripped.value(), c.value());
        assert!(stripped.salt().is_none());
        assert!(!stripped.verify(hasher, b"alice", b"v"));
    }

    #[test]
    fn test_with_salt_is_deterministic() {
        let hasher = TreeHasher::default();
        let salt = [9u8; SALT_SIZE];
        let a = Commit::with_salt(hasher, salt, b"alice", b"v");
        let b = Commit::with_salt(hasher, salt, b"alice", b"v");
        assert_eq!(a, b);
    }
}
