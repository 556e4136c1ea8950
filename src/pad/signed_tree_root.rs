//! Signed Tree Roots
//!
//! An STR is the directory's immutable commitment to one epoch: the tree
//! hash, the policies in effect, and a hash link to the previous STR's
//! signature. The epoch-0 STR links to 32 random bytes instead.

use std::sync::Arc;

use crate::crypto::hasher::{Hash, TreeHasher};
use crate::crypto::sign::{KeyPair, SIGNATURE_SIZE};
use crate::merkle::MerkleTree;

use super::policies::Policies;

/// Canonical STR layout covered by the signature:
/// `u64_be(epoch) || [u64_be(previous_epoch) if epoch > 0] || tree_hash ||
///  previous_str_hash || ad`.
pub fn serialize_str(
    epoch: u64,
    previous_epoch: u64,
    tree_hash: &Hash,
    previous_str_hash: &Hash,
    ad: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + 64 + ad.len());
    out.extend_from_slice(&epoch.to_be_bytes());
    if epoch > 0 {
        out.extend_from_slice(&previous_epoch.to_be_bytes());
    }
    out.extend_from_slice(tree_hash);
    out.extend_from_slice(previous_str_hash);
    out.extend_from_slice(ad);
    out
}

/// A signed commitment to the tree at one epoch.
#[derive(Debug, Clone)]
pub struct SignedTreeRoot {
    pub epoch: u64,
    pub previous_epoch: u64,
    pub tree_hash: Hash,
    pub previous_str_hash: Hash,
    pub policies: Policies,
    pub signature: [u8; SIGNATURE_SIZE],
    tree: Arc<MerkleTree>,
}

impl SignedTreeRoot {
    /// Build and sign a new STR over the given snapshot.
    pub(crate) fn create(
        signer: &KeyPair,
        policies: Policies,
        tree: Arc<MerkleTree>,
        tree_hash: Hash,
        epoch: u64,
        previous_epoch: u64,
        previous_str_hash: Hash,
    ) -> Self {
        let bytes = serialize_str(
            epoch,
            previous_epoch,
            &tree_hash,
            &previous_str_hash,
            &policies.ad_bytes(),
        );
        let signature = signer.sign(&bytes);
        Self {
            epoch,
            previous_epoch,
            tree_hash,
            previous_str_hash,
            policies,
            signature,
            tree,
        }
    }

    /// Rebuild an STR from persisted parts, keeping its original signature.
    pub(crate) fn from_parts(
        policies: Policies,
        tree: Arc<MerkleTree>,
        tree_hash: Hash,
        epoch: u64,
        previous_epoch: u64,
        previous_str_hash: Hash,
        signature: [u8; SIGNATURE_SIZE],
    ) -> Self {
        Self {
            epoch,
            previous_epoch,
            tree_hash,
            previous_str_hash,
            policies,
            signature,
            tree,
        }
    }

    /// The canonical bytes the signature covers.
    pub fn serialize(&self) -> Vec<u8> {
        serialize_str(
            self.epoch,
            self.previous_epoch,
            &self.tree_hash,
            &self.previous_str_hash,
            &self.policies.ad_bytes(),
        )
    }

    /// Whether this STR directly extends `previous`: consecutive epochs and
    /// `previous_str_hash == H(previous.signature)`.
    pub fn verify_hash_chain(&self, previous: &SignedTreeRoot, hasher: TreeHasher) -> bool {
        self.epoch == previous.epoch + 1
            && self.previous_str_hash == hasher.digest(&[&previous.signature])
    }

    /// The immutable snapshot this STR commits to.
    pub fn tree(&self) -> &Arc<MerkleTree> {
        &self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hasher::DEFAULT_HASH_ID;
    use crate::crypto::vrf;
    use rand::rngs::OsRng;

    fn test_policies() -> Policies {
        Policies::new(DEFAULT_HASH_ID, vrf::SecretKey::generate(&mut OsRng))
    }

    fn empty_snapshot(hasher: TreeHasher) -> (Arc<MerkleTree>, Hash) {
        let mut tree = MerkleTree::new(hasher);
        let hash = tree.recompute_root_hash();
        (Arc::new(tree), hash)
    }

    #[test]
    fn test_signature_covers_serialization() {
        let signer = KeyPair::generate(&mut OsRng);
        let hasher = TreeHasher::default();
        let (tree, tree_hash) = empty_snapshot(hasher);
        let str0 = SignedTreeRoot::create(
            &signer,
            test_policies(),
            tree,
            tree_hash,
            0,
            0,
            [9u8; 32],
        );
        assert!(signer.public().verify(&str0.serialize(), &str0.signature));
    }

    #[test]
    fn test_epoch_zero_omits_previous_epoch() {
        let signer = KeyPair::generate(&mut OsRng);
        let hasher = TreeHasher::default();
        let (tree, tree_hash) = empty_snapshot(hasher);
        let policies = test_policies();
        let ad_len = policies.ad_bytes().len();
        let str0 = SignedTreeRoot::create(&signer, policies, tree, tree_hash, 0, 0, [0u8; 32]);
        assert_eq!(str0.serialize().len(), 8 + 32 + 32 + ad_len);
    }

    #[test]
    fn test_hash_chain() {
        let signer = KeyPair::generate(&mut OsRng);
        let hasher = TreeHasher::default();
        let (tree, tree_hash) = empty_snapshot(hasher);
        let policies = test_policies();

        let str0 = SignedTreeRoot::create(
            &signer,
            policies.clone(),
            Arc::clone(&tree),
            tree_hash,
            0,
            0,
            [9u8; 32],
        );
        let str1 = SignedTreeRoot::create(
            &signer,
            policies.clone(),
            Arc::clone(&tree),
            tree_hash,
            1,
            0,
            hasher.digest(&[&str0.signature]),
        );
        assert!(str1.verify_hash_chain(&str0, hasher));
        // Broken link
        let str1_bad = SignedTreeRoot::create(
            &signer,
            policies,
            tree,
            tree_hash,
            1,
            0,
            [0u8; 32],
        );
        assert!(!str1_bad.verify_hash_chain(&str0, hasher));
        // Non-consecutive epochs
        assert!(!str0.verify_hash_chain(&str0, hasher));
    }
}
