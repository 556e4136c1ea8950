//! Cryptographic Primitives
//!
//! This module contains:
//! - Domain-separated tree hashing (SHA3-256)
//! - Salted commitments with constant-time opening
//! - Ed25519 signing for STRs and temporary bindings
//! - The VRF that maps usernames to pseudorandom tree indices

pub mod commitment;
pub mod hasher;
pub mod sign;
pub mod vrf;

// Re-exports for convenience
pub use commitment::Commit;
pub use hasher::{lookup_hasher, Hash, TreeHasher, DEFAULT_HASH_ID, HASH_SIZE};
pub use sign::{KeyPair, PublicKey, SIGNATURE_SIZE};
