//! Verifiable Random Function
//!
//! ECVRF over ristretto255 with SHA3 hashing. The directory maps each
//! username to a pseudorandom 32-byte tree index; the accompanying 96-byte
//! proof lets any holder of the VRF public key check that the index is the
//! unique output for that username.
//!
//! Construction (Fiat-Shamir over a Schnorr-style relation):
//! - `H = hash_to_curve(pk, message)` via SHA3-512 and
//!   `RistrettoPoint::from_uniform_bytes`
//! - `Gamma = x * H`, with nonce `k` derived deterministically from
//!   `(x, H, message)`
//! - challenge `c = H512(pk || H || Gamma || k*B || k*H)` reduced to a
//!   scalar, response `s = k + c * x`
//! - proof `= Gamma || c || s`, index `= SHA3-256(domain || Gamma)`
//!
//! `verify` is total: malformed points, non-canonical scalars, and
//! wrong-length proofs all return `false`.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::VartimeMultiscalarMul;
use rand::{CryptoRng, RngCore};
use sha3::{Digest, Sha3_256, Sha3_512};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroize;

/// Size in bytes of a serialized key (either half).
pub const KEY_SIZE: usize = 32;

/// Size in bytes of a VRF output index.
pub const INDEX_SIZE: usize = 32;

/// Size in bytes of a VRF proof: `Gamma || c || s`.
pub const PROOF_SIZE: usize = 96;

/// Domain separators for the SHA3 derivations.
const DOM_HASH_TO_CURVE: &[u8] = b"keydex.vrf.h2c.v1";
const DOM_NONCE: &[u8] = b"keydex.vrf.nonce.v1";
const DOM_CHALLENGE: &[u8] = b"keydex.vrf.chal.v1";
const DOM_OUTPUT: &[u8] = b"keydex.vrf.out.v1";

/// VRF key decoding errors
#[derive(Debug, Error)]
pub enum VrfError {
    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid key encoding: {0}")]
    InvalidEncoding(String),

    #[error("key bytes are not a canonical scalar")]
    InvalidScalar,

    #[error("key bytes are not a valid curve point")]
    InvalidPoint,
}

/// The private half of a VRF keypair.
pub struct SecretKey {
    scalar: Scalar,
    public: PublicKey,
}

/// The public half of a VRF keypair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    point: RistrettoPoint,
    compressed: CompressedRistretto,
}

impl SecretKey {
    /// Generate a fresh keypair from a cryptographically secure RNG.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);
        let scalar = Scalar::from_bytes_mod_order_wide(&wide);
        wide.zeroize();
        Self::from_scalar(scalar)
    }

    fn from_scalar(scalar: Scalar) -> Self {
        let point = RistrettoPoint::mul_base(&scalar);
        Self {
            scalar,
            public: PublicKey {
                point,
                compressed: point.compress(),
            },
        }
    }

    /// Rebuild a secret key from its canonical 32-byte scalar.
    pub fn from_bytes(bytes: &[u8; KEY_SIZE]) -> Result<Self, VrfError> {
        let scalar: Option<Scalar> = Scalar::from_canonical_bytes(*bytes).into();
        let scalar = scalar.ok_or(VrfError::InvalidScalar)?;
        Ok(Self::from_scalar(scalar))
    }

    /// Decode a secret key from hex (configuration format).
    pub fn from_hex(hex_str: &str) -> Result<Self, VrfError> {
        let bytes = hex::decode(hex_str).map_err(|e| VrfError::InvalidEncoding(e.to_string()))?;
        let bytes: [u8; KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| VrfError::InvalidLength {
                expected: KEY_SIZE,
                got: bytes.len(),
            })?;
        Self::from_bytes(&bytes)
    }

    /// The canonical 32-byte scalar, for configuration output.
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.scalar.to_bytes()
    }

    /// The public half of the pair.
    pub fn public(&self) -> PublicKey {
        self.public
    }

    /// Constant-time equality of the private scalars. Used to detect a key
    /// rotation, which forces a whole-tree reshuffle.
    pub fn ct_eq(&self, other: &SecretKey) -> bool {
        self.scalar.to_bytes().ct_eq(&other.scalar.to_bytes()).into()
    }

    /// Evaluate the VRF: returns the 32-byte index for `message` and the
    /// 96-byte proof. Deterministic for a given `(key, message)` pair.
    pub fn prove(&self, message: &[u8]) -> ([u8; INDEX_SIZE], [u8; PROOF_SIZE]) {
        let h_point = hash_to_curve(self.public.compressed.as_bytes(), message);
        let gamma = h_point * self.scalar;

        // Deterministic nonce bound to the secret, the curve point, and the
        // message, so no two messages ever share a nonce.
        let mut nonce_hasher = Sha3_512::new();
        nonce_hasher.update(DOM_NONCE);
        nonce_hasher.update(self.scalar.to_bytes());
        nonce_hasher.update(h_point.compress().as_bytes());
        nonce_hasher.update(message);
        let k = Scalar::from_bytes_mod_order_wide(&wide_digest(nonce_hasher));

        let u = RistrettoPoint::mul_base(&k);
        let v = h_point * k;
        let c = challenge(&self.public.compressed, &h_point, &gamma, &u, &v);
        let s = k + c * self.scalar;

        let mut proof = [0u8; PROOF_SIZE];
        proof[..32].copy_from_slice(gamma.compress().as_bytes());
        proof[32..64].copy_from_slice(&c.to_bytes());
        proof[64..].copy_from_slice(&s.to_bytes());

        (output_index(&gamma), proof)
    }
}

impl Clone for SecretKey {
    fn clone(&self) -> Self {
        Self {
            scalar: self.scalar,
            public: self.public,
        }
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.scalar.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey({})", hex::encode(self.public.to_bytes()))
    }
}

impl PublicKey {
    /// Decode a public key from its 32-byte compressed form.
    pub fn from_bytes(bytes: &[u8; KEY_SIZE]) -> Result<Self, VrfError> {
        let compressed = CompressedRistretto(*bytes);
        let point = compressed.decompress().ok_or(VrfError::InvalidPoint)?;
        Ok(Self { point, compressed })
    }

    /// Decode a public key from hex.
    pub fn from_hex(hex_str: &str) -> Result<Self, VrfError> {
        let bytes = hex::decode(hex_str).map_err(|e| VrfError::InvalidEncoding(e.to_string()))?;
        let bytes: [u8; KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| VrfError::InvalidLength {
                expected: KEY_SIZE,
                got: bytes.len(),
            })?;
        Self::from_bytes(&bytes)
    }

    /// The 32-byte compressed encoding.
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.compressed.to_bytes()
    }

    /// Check that `index` is the VRF output for `message` under this key,
    /// attested by `proof`. Total function.
    pub fn verify(&self, message: &[u8], index: &[u8; INDEX_SIZE], proof: &[u8]) -> bool {
        if proof.len() != PROOF_SIZE {
            return false;
        }

        let mut gamma_bytes = [0u8; 32];
        gamma_bytes.copy_from_slice(&proof[..32]);
        let gamma_compressed = CompressedRistretto(gamma_bytes);
        let Some(gamma) = gamma_compressed.decompress() else {
            return false;
        };

        let mut c_bytes = [0u8; 32];
        c_bytes.copy_from_slice(&proof[32..64]);
        let c: Option<Scalar> = Scalar::from_canonical_bytes(c_bytes).into();
        let Some(c) = c else {
            return false;
        };

        let mut s_bytes = [0u8; 32];
        s_bytes.copy_from_slice(&proof[64..]);
        let s: Option<Scalar> = Scalar::from_canonical_bytes(s_bytes).into();
        let Some(s) = s else {
            return false;
        };

        let h_point = hash_to_curve(self.compressed.as_bytes(), message);

        // u = s*B - c*Y and v = s*H - c*Gamma; both equal the prover's
        // k*B and k*H exactly when s = k + c*x and Gamma = x*H.
        let u = RistrettoPoint::vartime_double_scalar_mul_basepoint(&-c, &self.point, &s);
        let v = RistrettoPoint::vartime_multiscalar_mul([s, -c], [h_point, gamma]);

        let expected_c = challenge(&self.compressed, &h_point, &gamma, &u, &v);
        expected_c == c && output_index(&gamma) == *index
    }
}

/// A finished SHA3-512 state as a fixed 64-byte array.
fn wide_digest(hasher: Sha3_512) -> [u8; 64] {
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    wide
}

/// Map `(public key, message)` onto the curve.
fn hash_to_curve(pk_bytes: &[u8], message: &[u8]) -> RistrettoPoint {
    let mut hasher = Sha3_512::new();
    hasher.update(DOM_HASH_TO_CURVE);
    hasher.update(pk_bytes);
    hasher.update(message);
    RistrettoPoint::from_uniform_bytes(&wide_digest(hasher))
}

/// Fiat-Shamir challenge over the transcript points.
fn challenge(
    pk: &CompressedRistretto,
    h_point: &RistrettoPoint,
    gamma: &RistrettoPoint,
    u: &RistrettoPoint,
    v: &RistrettoPoint,
) -> Scalar {
    let mut hasher = Sha3_512::new();
    hasher.update(DOM_CHALLENGE);
    hasher.update(pk.as_bytes());
    hasher.update(h_point.compress().as_bytes());
    hasher.update(gamma.compress().as_bytes());
    hasher.update(u.compress().as_bytes());
    hasher.update(v.compress().as_bytes());
    Scalar::from_bytes_mod_order_wide(&wide_digest(hasher))
}

/// Derive the published index from the proof point.
fn output_index(gamma: &RistrettoPoint) -> [u8; INDEX_SIZE] {
    let mut hasher = Sha3_256::new();
    hasher.update(DOM_OUTPUT);
    hasher.update(gamma.compress().as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_prove_verify_round_trip() {
        let sk = SecretKey::generate(&mut OsRng);
        let (index, proof) = sk.prove(b"alice");
        assert!(sk.public().verify(b"alice", &index, &proof));
    }

    #[test]
    fn test_deterministic_output() {
        let sk = SecretKey::generate(&mut OsRng);
        let (i1, p1) = sk.prove(b"alice");
        let (i2, p2) = sk.prove(b"alice");
        assert_eq!(i1, i2);
        assert_eq!(p1, p2);

        let (i3, _) = sk.prove(b"bob");
        assert_ne!(i1, i3);
    }

    #[test]
    fn test_rejects_wrong_message() {
        let sk = SecretKey::generate(&mut OsRng);
        let (index, proof) = sk.prove(b"alice");
        assert!(!sk.public().verify(b"bob", &index, &proof));
    }

    #[test]
    fn test_rejects_wrong_index() {
        let sk = SecretKey::generate(&mut OsRng);
        let (mut index, proof) = sk.prove(b"alice");
        index[0] ^= 0x01;
        assert!(!sk.public().verify(b"alice", &index, &proof));
    }

    #[test]
    fn test_rejects_tampered_proof() {
        let sk = SecretKey::generate(&mut OsRng);
        let (index, proof) = sk.prove(b"alice");
        for byte in [0usize, 33, 65, 95] {
            let mut bad = proof;
            bad[byte] ^= 0x01;
            assert!(!sk.public().verify(b"alice", &index, &bad));
        }
    }

    #[test]
    fn test_rejects_wrong_key() {
        let sk = SecretKey::generate(&mut OsRng);
        let other = SecretKey::generate(&mut OsRng);
        let (index, proof) = sk.prove(b"alice");
        assert!(!other.public().verify(b"alice", &index, &proof));
    }

    #[test]
    fn test_rejects_truncated_proof() {
        let sk = SecretKey::generate(&mut OsRng);
        let (index, proof) = sk.prove(b"alice");
        assert!(!sk.public().verify(b"alice", &index, &proof[..64]));
    }

    #[test]
    fn test_key_round_trips() {
        let sk = SecretKey::generate(&mut OsRng);
        let restored = SecretKey::from_bytes(&sk.to_bytes()).unwrap();
        assert!(sk.ct_eq(&restored));
        assert_eq!(sk.public(), restored.public());

        let pk = PublicKey::from_bytes(&sk.public().to_bytes()).unwrap();
        assert_eq!(pk, sk.public());
    }
}
