//! Persistent Authenticated Dictionary
//!
//! The PAD owns the mutable pending tree (next epoch's draft) and a bounded
//! history of immutable snapshots, one per retained epoch. Every epoch cut
//! recomputes the tree hash, deep-clones the tree, signs a new STR chained
//! to the previous one, and evicts the oldest half of the history when the
//! retention capacity is reached. Rotating the VRF key reshuffles every leaf
//! into a fresh tree under the new indices before the cut.
//!
//! This module contains:
//! - The PAD state machine (`Pad`)
//! - Signed tree roots and their canonical serialization
//! - Temporary bindings
//! - The policies record signed into each STR

pub mod policies;
pub mod signed_tree_root;
pub mod temporary_binding;

// Re-exports for convenience
pub use policies::{serialize_ad, Policies};
pub use signed_tree_root::{serialize_str, SignedTreeRoot};
pub use temporary_binding::{serialize_tb, TemporaryBinding};

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tracing::info;

use crate::crypto::commitment::Commit;
use crate::crypto::hasher::{Hash, TreeHasher};
use crate::crypto::sign::{KeyPair, PublicKey, SIGNATURE_SIZE};
use crate::merkle::{AuthenticationPath, MerkleTree, TreeError};

/// PAD-layer errors
#[derive(Debug, Error)]
pub enum PadError {
    #[error("no retained STR for epoch {0}")]
    StrNotFound(u64),

    #[error("history capacity must be at least 2, got {0}")]
    InvalidCapacity(usize),

    #[error("persisted epoch record is inconsistent: {0}")]
    RestoreMismatch(&'static str),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// One persisted leaf, as needed to rebuild a committed tree bit-exactly.
#[derive(Debug, Clone)]
pub struct RestoredLeaf {
    pub index: Hash,
    pub key: String,
    pub payload: Vec<u8>,
    pub salt: [u8; 32],
}

/// Everything needed to resume a PAD from its most recent committed epoch.
///
/// The policy fields record what was in effect at the persisted epoch; on
/// restore the configured keys remain authoritative, and the STR signature
/// check rejects any divergence.
#[derive(Debug, Clone)]
pub struct RestoredEpoch {
    pub epoch: u64,
    pub previous_epoch: u64,
    pub previous_str_hash: Hash,
    pub tree_hash: Hash,
    pub signature: [u8; SIGNATURE_SIZE],
    pub tree_nonce: Hash,
    pub leaves: Vec<RestoredLeaf>,
    pub hash_id: String,
    pub vrf_public: [u8; 32],
}

/// The persistent authenticated dictionary.
pub struct Pad {
    signer: KeyPair,
    policies: Policies,
    hasher: TreeHasher,
    pending_tree: MerkleTree,
    snapshots: HashMap<u64, Arc<SignedTreeRoot>>,
    loaded_epochs: Vec<u64>,
    latest_str: Arc<SignedTreeRoot>,
    policies_for_next_epoch: Option<Policies>,
    capacity: usize,
}

impl Pad {
    /// A fresh PAD at epoch 0 with an empty tree.
    pub fn new(
        policies: Policies,
        signer: KeyPair,
        capacity: usize,
        hasher: TreeHasher,
    ) -> Result<Self, PadError> {
        if capacity < 2 {
            return Err(PadError::InvalidCapacity(capacity));
        }

        let mut pending_tree = MerkleTree::new(hasher);
        let tree_hash = pending_tree.recompute_root_hash();
        let snapshot = Arc::new(pending_tree.clone());

        // Epoch 0 links to random bytes instead of a predecessor.
        let mut previous_str_hash = [0u8; 32];
        OsRng.fill_bytes(&mut previous_str_hash);

        let str0 = Arc::new(SignedTreeRoot::create(
            &signer,
            policies.clone(),
            snapshot,
            tree_hash,
            0,
            0,
            previous_str_hash,
        ));

        let mut snapshots = HashMap::new();
        snapshots.insert(0, Arc::clone(&str0));

        Ok(Self {
            signer,
            policies,
            hasher,
            pending_tree,
            snapshots,
            loaded_epochs: vec![0],
            latest_str: str0,
            policies_for_next_epoch: None,
            capacity,
        })
    }

    /// Resume from a persisted epoch: rebuild the committed tree from its
    /// stored leaves and verify it against the stored hash and signature.
    pub fn restore(
        policies: Policies,
        signer: KeyPair,
        capacity: usize,
        hasher: TreeHasher,
        record: RestoredEpoch,
    ) -> Result<Self, PadError> {
        if capacity < 2 {
            return Err(PadError::InvalidCapacity(capacity));
        }

        let mut tree = MerkleTree::with_nonce(record.tree_nonce, hasher);
        for leaf in &record.leaves {
            let commitment = Commit::with_salt(hasher, leaf.salt, leaf.key.as_bytes(), &leaf.payload);
            tree.set_with_commitment(leaf.index, &leaf.key, &leaf.payload, commitment)?;
        }
        let tree_hash = tree.recompute_root_hash();
        if tree_hash != record.tree_hash {
            return Err(PadError::RestoreMismatch("tree hash"));
        }

        let snapshot = Arc::new(tree.clone());
        let latest = Arc::new(SignedTreeRoot::from_parts(
            policies.clone(),
            snapshot,
            tree_hash,
            record.epoch,
            record.previous_epoch,
            record.previous_str_hash,
            record.signature,
        ));
        if !signer.public().verify(&latest.serialize(), &latest.signature) {
            return Err(PadError::RestoreMismatch("signature"));
        }

        let mut snapshots = HashMap::new();
        snapshots.insert(record.epoch, Arc::clone(&latest));

        Ok(Self {
            signer,
            policies,
            hasher,
            pending_tree: tree,
            snapshots,
            loaded_epochs: vec![record.epoch],
            latest_str: latest,
            policies_for_next_epoch: None,
            capacity,
        })
    }

    /// Bind `username` to `payload` in the pending tree, at the index the
    /// VRF assigns to the username.
    pub fn set(&mut self, username: &str, payload: &[u8]) -> Result<(), PadError> {
        let (index, _) = self.policies.vrf_secret.prove(username.as_bytes());
        self.pending_tree.set(index, username, payload)?;
        Ok(())
    }

    /// Queue new policies to take effect at the next epoch cut.
    pub fn set_policies(&mut self, policies: Policies) {
        self.policies_for_next_epoch = Some(policies);
    }

    /// Cut the next epoch. `new_policies` overrides any queued policies;
    /// either may rotate the VRF key, which reshuffles the pending tree
    /// before the snapshot is taken so the new STR commits the new indices.
    pub fn update(&mut self, new_policies: Option<Policies>) -> Result<Arc<SignedTreeRoot>, PadError> {
        if self.loaded_epochs.len() == self.capacity {
            self.evict_oldest();
        }

        let epoch = self.latest_str.epoch + 1;
        let policies = new_policies.or_else(|| self.policies_for_next_epoch.take());

        if let Some(policies) = policies {
            if self.policies.rotates_vrf_key(&policies) {
                self.reshuffle(&policies)?;
            }
            self.policies = policies;
        }

        let tree_hash = self.pending_tree.recompute_root_hash();
        let snapshot = Arc::new(self.pending_tree.clone());
        let previous_str_hash = self.hasher.digest(&[&self.latest_str.signature]);

        let str_next = Arc::new(SignedTreeRoot::create(
            &self.signer,
            self.policies.clone(),
            snapshot,
            tree_hash,
            epoch,
            self.latest_str.epoch,
            previous_str_hash,
        ));

        self.snapshots.insert(epoch, Arc::clone(&str_next));
        self.loaded_epochs.push(epoch);
        self.latest_str = Arc::clone(&str_next);

        info!(
            target: "keydex::pad",
            epoch,
            tree_hash = %hex::encode(tree_hash),
            "cut new epoch"
        );
        Ok(str_next)
    }

    /// Drop the oldest half of the retained history.
    fn evict_oldest(&mut self) {
        let drop_count = self.capacity / 2;
        for epoch in self.loaded_epochs.drain(..drop_count) {
            self.snapshots.remove(&epoch);
        }
    }

    /// Re-key every leaf under the incoming VRF key into a fresh tree.
    fn reshuffle(&mut self, next: &Policies) -> Result<(), PadError> {
        let entries: Vec<(String, Vec<u8>)> = self
            .pending_tree
            .leaves()
            .into_iter()
            .map(|leaf| (leaf.key.clone(), leaf.payload.clone()))
            .collect();

        let mut fresh = MerkleTree::new(self.hasher);
        for (key, payload) in &entries {
            let (index, _) = next.vrf_secret.prove(key.as_bytes());
            fresh.set(index, key, payload)?;
        }
        info!(target: "keydex::pad", leaves = entries.len(), "reshuffled tree for VRF rotation");
        self.pending_tree = fresh;
        Ok(())
    }

    /// Authentication path for `username` in the latest committed epoch.
    pub fn lookup(&self, username: &str) -> Result<AuthenticationPath, PadError> {
        self.lookup_in_epoch(username, self.latest_str.epoch)
    }

    /// Authentication path for `username` in a retained epoch, under the VRF
    /// key in effect at that epoch's STR.
    pub fn lookup_in_epoch(&self, username: &str, epoch: u64) -> Result<AuthenticationPath, PadError> {
        let str_at = self.get_str(epoch).ok_or(PadError::StrNotFound(epoch))?;
        let (index, proof) = str_at.policies.vrf_secret.prove(username.as_bytes());
        let mut ap = str_at.tree().get(&index);
        ap.vrf_proof = proof.to_vec();
        Ok(ap)
    }

    /// The STR for `epoch`: the latest one for any epoch at or beyond it, a
    /// retained snapshot otherwise.
    pub fn get_str(&self, epoch: u64) -> Option<&Arc<SignedTreeRoot>> {
        if epoch >= self.latest_str.epoch {
            Some(&self.latest_str)
        } else {
            self.snapshots.get(&epoch)
        }
    }

    /// Issue a temporary binding for `(username, payload)` and insert the
    /// entry into the pending tree.
    pub fn tb(&mut self, username: &str, payload: &[u8]) -> Result<TemporaryBinding, PadError> {
        let (index, _) = self.policies.vrf_secret.prove(username.as_bytes());
        let tb = TemporaryBinding::create(&self.signer, &self.latest_str.signature, index, payload);
        self.pending_tree.set(index, username, payload)?;
        Ok(tb)
    }

    pub fn latest_str(&self) -> &Arc<SignedTreeRoot> {
        &self.latest_str
    }

    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    pub fn signer_public(&self) -> PublicKey {
        self.signer.public()
    }

    pub fn hasher(&self) -> TreeHasher {
        self.hasher
    }

    /// Retained epochs, oldest first.
    pub fn retained_epochs(&self) -> &[u64] {
        &self.loaded_epochs
    }

    /// Snapshot of the latest committed epoch for persistence.
    pub fn export_latest(&self) -> RestoredEpoch {
        let latest = &self.latest_str;
        let leaves = latest
            .tree()
            .leaves()
            .into_iter()
            .map(|leaf| RestoredLeaf {
                index: leaf.index,
                key: leaf.key.clone(),
                payload: leaf.payload.clone(),
                // Committed leaves always carry their salt; only proof
                // nodes suppress it.
                salt: leaf.commitment.salt().copied().unwrap_or([0u8; 32]),
            })
            .collect();
        RestoredEpoch {
            epoch: latest.epoch,
            previous_epoch: latest.previous_epoch,
            previous_str_hash: latest.previous_str_hash,
            tree_hash: latest.tree_hash,
            signature: latest.signature,
            tree_nonce: *latest.tree().nonce(),
            leaves,
            hash_id: latest.policies.hash_id.clone(),
            vrf_public: latest.policies.vrf_public().to_bytes(),
        }
    }
}
