//! Authentication Paths
//!
//! The sibling hashes along a root-to-leaf walk plus the terminal node,
//! sufficient for a client to recompute the signed tree hash. Verification
//! reports the first failure it detects and never partially succeeds.

use thiserror::Error;

use crate::crypto::hasher::{Hash, TreeHasher};
use crate::crypto::Commit;

use super::{index_bit, prefix_bits_equal};

/// What an authentication path proves about the looked-up index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofType {
    Inclusion,
    Absence,
}

/// Proof verification errors, in the order they are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProofError {
    #[error("lookup index does not share the terminal leaf's prefix")]
    BadIndex,

    #[error("proof payload does not match the expected value")]
    BadMapping,

    #[error("commitment does not open to the expected value")]
    BadCommitment,

    #[error("malformed proof of inclusion")]
    BadProofOfInclusion,

    #[error("malformed proof of absence")]
    BadProofOfAbsence,

    #[error("recomputed root differs from the signed tree hash")]
    UnequalTreeHashes,
}

/// The terminal node of an authentication path.
///
/// For an inclusion proof, `value` and the commitment salt are present. For
/// an absence proof that terminates at a neighboring leaf, both are
/// suppressed and only the commitment value remains; for an empty branch the
/// commitment is absent entirely.
#[derive(Debug, Clone)]
pub struct ProofNode {
    pub level: u32,
    pub index: Hash,
    pub value: Option<Vec<u8>>,
    pub commitment: Option<Commit>,
    pub is_empty: bool,
}

/// An authentication path for one lookup.
#[derive(Debug, Clone)]
pub struct AuthenticationPath {
    pub tree_nonce: Hash,
    pub lookup_index: Hash,
    /// Proof that `lookup_index` is the VRF output for the username.
    pub vrf_proof: Vec<u8>,
    /// Hashes of the not-taken siblings, root-first; `pruned_siblings[d]` is
    /// the sibling hanging off the interior node at level `d`.
    pub pruned_siblings: Vec<Hash>,
    pub leaf: ProofNode,
}

impl AuthenticationPath {
    pub fn proof_type(&self) -> ProofType {
        if !self.leaf.is_empty && self.leaf.index == self.lookup_index {
            ProofType::Inclusion
        } else {
            ProofType::Absence
        }
    }

    /// Recompute the root hash from the terminal node and the pruned
    /// siblings, folding upward by the bits of the leaf index.
    pub fn root_hash(&self, hasher: TreeHasher) -> Result<Hash, ProofError> {
        let mut hash = if self.leaf.is_empty {
            hasher.hash_empty(&self.tree_nonce, &self.leaf.index, self.leaf.level)
        } else {
            let commitment = self
                .leaf
                .commitment
                .as_ref()
                .ok_or(ProofError::BadProofOfInclusion)?;
            hasher.hash_leaf(
                &self.tree_nonce,
                &self.leaf.index,
                self.leaf.level,
                commitment.value(),
            )
        };

        for depth in (0..self.leaf.level).rev() {
            let sibling = &self.pruned_siblings[depth as usize];
            hash = if index_bit(&self.leaf.index, depth) {
                hasher.hash_interior(sibling, &hash)
            } else {
                hasher.hash_interior(&hash, sibling)
            };
        }
        Ok(hash)
    }

    /// Verify this path against the signed `tree_hash`.
    ///
    /// `expected` is the payload the caller believes is bound to `key`, or
    /// `None` when the caller expects the name to be unbound. Returns the
    /// proof type on success and the first detected failure otherwise.
    pub fn verify(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        tree_hash: &Hash,
        hasher: TreeHasher,
    ) -> Result<ProofType, ProofError> {
        let ptype = self.proof_type();

        match ptype {
            ProofType::Absence => {
                if !prefix_bits_equal(&self.lookup_index, &self.leaf.index, self.leaf.level) {
                    return Err(ProofError::BadIndex);
                }
                if self.leaf.value.is_some() {
                    return Err(ProofError::BadProofOfAbsence);
                }
                // A neighboring leaf must still carry its commitment value;
                // an empty branch must not carry one.
                if self.leaf.is_empty != self.leaf.commitment.is_none() {
                    return Err(ProofError::BadProofOfAbsence);
                }
            }
            ProofType::Inclusion => {
                let value = self
                    .leaf
                    .value
                    .as_deref()
                    .ok_or(ProofError::BadProofOfInclusion)?;
                let Some(expected) = expected else {
                    // The caller expected the name unbound.
                    return Err(ProofError::BadProofOfAbsence);
                };
                if value != expected {
                    return Err(ProofError::BadMapping);
                }
                let commitment = self
                    .leaf
                    .commitment
                    .as_ref()
                    .ok_or(ProofError::BadProofOfInclusion)?;
                if !commitment.verify(hasher, key, value) {
                    return Err(ProofError::BadCommitment);
                }
            }
        }

        if self.pruned_siblings.len() != self.leaf.level as usize {
            return Err(match ptype {
                ProofType::Inclusion => ProofError::BadProofOfInclusion,
                ProofType::Absence => ProofError::BadProofOfAbsence,
            });
        }

        if self.root_hash(hasher)? != *tree_hash {
            return Err(ProofError::UnequalTreeHashes);
        }

        Ok(ptype)
    }
}
