//! Ed25519 Signing
//!
//! The directory signs STRs and temporary bindings with a long-lived Ed25519
//! key. Clients pin the corresponding public key and verify strictly.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{CryptoRng, RngCore};
use thiserror::Error;

/// Size in bytes of an Ed25519 signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Size in bytes of a serialized key (either half).
pub const KEY_SIZE: usize = 32;

/// Key decoding errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid key encoding: {0}")]
    InvalidEncoding(String),
}

/// The directory's signing keypair.
pub struct KeyPair {
    inner: SigningKey,
}

impl KeyPair {
    /// Generate a fresh keypair from a cryptographically secure RNG.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            inner: SigningKey::generate(rng),
        }
    }

    /// Rebuild a keypair from its 32-byte secret.
    pub fn from_bytes(bytes: &[u8; KEY_SIZE]) -> Self {
        Self {
            inner: SigningKey::from_bytes(bytes),
        }
    }

    /// Decode a keypair from a hex-encoded secret (configuration format).
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str).map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;
        let bytes: [u8; KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidLength {
                expected: KEY_SIZE,
                got: bytes.len(),
            })?;
        Ok(Self::from_bytes(&bytes))
    }

    /// The 32-byte secret, for configuration output.
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.inner.to_bytes()
    }

    /// Sign a message, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.inner.sign(message).to_bytes()
    }

    /// The verifying half of the pair.
    pub fn public(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.verifying_key(),
        }
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            inner: SigningKey::from_bytes(&self.inner.to_bytes()),
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair({})", hex::encode(self.public().to_bytes()))
    }
}

/// A pinned directory public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Decode a public key from its 32-byte form.
    pub fn from_bytes(bytes: &[u8; KEY_SIZE]) -> Result<Self, KeyError> {
        let inner = VerifyingKey::from_bytes(bytes)
            .map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Decode a public key from hex.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str).map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;
        let bytes: [u8; KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidLength {
                expected: KEY_SIZE,
                got: bytes.len(),
            })?;
        Self::from_bytes(&bytes)
    }

    /// The 32-byte encoding.
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.inner.to_bytes()
    }

    /// Verify a signature over `message`. Total: malformed signatures
    /// return `false`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(sig_bytes) = <[u8; SIGNATURE_SIZE]>::try_from(signature) else {
            return false;
        };
        let sig = Signature::from_bytes(&sig_bytes);
        self.inner.verify(message, &sig).is_ok()
    }
}
