//! keydex - Key Transparency Directory
//!
//! A transparency system for end-user public keys: the server publishes a
//! succession of signed commitments (STRs) to a directory mapping usernames
//! to opaque key material, and any party can obtain a cryptographic proof
//! that a name was, or was not, bound to a value at a given epoch.
//!
//! ## Components
//!
//! 1. **Crypto** - domain-separated hashing, salted commitments, Ed25519
//!    signing, and the VRF that hides usernames behind pseudorandom indices
//! 2. **Merkle** - the privacy-preserving prefix tree and its
//!    authentication paths
//! 3. **PAD** - the persistent authenticated dictionary: pending tree,
//!    bounded snapshot history, STR hash chain, temporary bindings
//! 4. **Directory** - request handling and proof assembly
//! 5. **Protocol** - the wire schema and the client-side verifier
//! 6. **Storage / API** - optional epoch persistence and the HTTP surface

pub mod api;
pub mod common;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod logging;
pub mod merkle;
pub mod pad;
pub mod protocol;
pub mod storage;

// Re-exports: errors
pub use common::error::{KeydexError, Result};

// Re-exports: the directory service
pub use directory::Directory;

// Re-exports: core crypto
pub use crypto::{
    hasher::{lookup_hasher, Hash, TreeHasher, DEFAULT_HASH_ID},
    sign::{KeyPair, PublicKey},
    vrf, Commit,
};

// Re-exports: tree and proofs
pub use merkle::{AuthenticationPath, MerkleTree, ProofError, ProofType};

// Re-exports: PAD
pub use pad::{Pad, PadError, Policies, SignedTreeRoot, TemporaryBinding};

// Re-exports: protocol
pub use protocol::{client::ClientVerifier, ErrorCode, Request, Response};

// Re-exports: configuration
pub use config::{ConfigError, KeydexConfig};
