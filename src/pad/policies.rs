//! Directory Policies
//!
//! The cryptographic context carried inside every STR as associated data:
//! the hash algorithm in use and the VRF public key. The VRF *private* key
//! rides alongside on the server because rotating it is what a policy change
//! means, but it never enters the serialized form the STR signs.
//!
//! Operational parameters (epoch deadline, listen address, log settings)
//! are server configuration and stay outside the signed policies.

use crate::crypto::hasher::{lookup_hasher, TreeHasher};
use crate::crypto::vrf;

/// Server policies, signed into each STR as associated data.
#[derive(Debug, Clone)]
pub struct Policies {
    /// Registered identifier of the tree hasher.
    pub hash_id: String,
    /// The VRF key in effect. Only its public half is published.
    pub vrf_secret: vrf::SecretKey,
}

impl Policies {
    pub fn new(hash_id: impl Into<String>, vrf_secret: vrf::SecretKey) -> Self {
        Self {
            hash_id: hash_id.into(),
            vrf_secret,
        }
    }

    /// The published VRF key.
    pub fn vrf_public(&self) -> vrf::PublicKey {
        self.vrf_secret.public()
    }

    /// The tree hasher these policies declare, when registered.
    pub fn hasher(&self) -> Option<TreeHasher> {
        lookup_hasher(&self.hash_id)
    }

    /// Whether switching to `next` rotates the VRF key (compared in constant
    /// time). A rotation forces a whole-tree reshuffle.
    pub fn rotates_vrf_key(&self, next: &Policies) -> bool {
        !self.vrf_secret.ct_eq(&next.vrf_secret)
    }

    /// Canonical associated-data bytes covered by the STR signature.
    pub fn ad_bytes(&self) -> Vec<u8> {
        serialize_ad(&self.hash_id, &self.vrf_public().to_bytes())
    }
}

/// Canonical associated-data layout:
/// `[version=1] || u32_be(len(hash_id)) || hash_id || vrf_public(32)`.
///
/// Clients rebuild these bytes from the published fields when checking an
/// STR signature.
pub fn serialize_ad(hash_id: &str, vrf_public: &[u8; 32]) -> Vec<u8> {
    let id = hash_id.as_bytes();
    let mut out = Vec::with_capacity(1 + 4 + id.len() + vrf::KEY_SIZE);
    out.push(1u8);
    out.extend_from_slice(&(id.len() as u32).to_be_bytes());
    out.extend_from_slice(id);
    out.extend_from_slice(vrf_public);
    out
}
