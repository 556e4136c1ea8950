//! Temporary Bindings
//!
//! A TB is the directory's signed promise, valid for the current epoch, that
//! the next STR will include a given `(index, value)`. The signature covers
//! `previous_str.signature || index || value`; the client checks fulfillment
//! against the authentication path it receives after the next epoch cut.

use crate::crypto::hasher::Hash;
use crate::crypto::sign::{KeyPair, PublicKey, SIGNATURE_SIZE};
use crate::merkle::AuthenticationPath;

/// The bytes a TB signature covers.
pub fn serialize_tb(previous_str_signature: &[u8], index: &Hash, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(previous_str_signature.len() + index.len() + value.len());
    out.extend_from_slice(previous_str_signature);
    out.extend_from_slice(index);
    out.extend_from_slice(value);
    out
}

/// A signed promise of inclusion in the next epoch.
#[derive(Debug, Clone)]
pub struct TemporaryBinding {
    pub index: Hash,
    pub value: Vec<u8>,
    pub signature: [u8; SIGNATURE_SIZE],
}

impl TemporaryBinding {
    pub(crate) fn create(
        signer: &KeyPair,
        previous_str_signature: &[u8],
        index: Hash,
        value: &[u8],
    ) -> Self {
        let signature = signer.sign(&serialize_tb(previous_str_signature, &index, value));
        Self {
            index,
            value: value.to_vec(),
            signature,
        }
    }

    /// Verify the signature under the directory key, given the signature of
    /// the STR that was latest when the TB was issued.
    pub fn verify_signature(&self, public: &PublicKey, previous_str_signature: &[u8]) -> bool {
        public.verify(
            &serialize_tb(previous_str_signature, &self.index, &self.value),
            &self.signature,
        )
    }

    /// Whether `ap` honors this binding: same index, same value at the leaf.
    pub fn fulfilled_by(&self, ap: &AuthenticationPath) -> bool {
        ap.lookup_index == self.index && ap.leaf.value.as_deref() == Some(self.value.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_sign_and_verify() {
        let signer = KeyPair::generate(&mut OsRng);
        let prev_sig = [3u8; 64];
        let tb = TemporaryBinding::create(&signer, &prev_sig, [7u8; 32], b"value");
        assert!(tb.verify_signature(&signer.public(), &prev_sig));
        // Wrong previous signature breaks the binding to the epoch
        assert!(!tb.verify_signature(&signer.public(), &[4u8; 64]));
    }

    #[test]
    fn test_tampered_value_rejected() {
        let signer = KeyPair::generate(&mut OsRng);
        let prev_sig = [3u8; 64];
        let mut tb = TemporaryBinding::create(&signer, &prev_sig, [7u8; 32], b"value");
        tb.value = b"other".to_vec();
        assert!(!tb.verify_signature(&signer.public(), &prev_sig));
    }
}
