//! Wire Protocol
//!
//! The transport-opaque request/response schema. Requests carry a numeric
//! `type` and a typed body; responses carry a numeric `error` code and an
//! optional `directory_response` whose fields depend on the request type.
//! Binary fields travel hex-encoded. Error codes are assigned once and never
//! renumbered.
//!
//! This module contains:
//! - The stable error-code table
//! - Request/response envelopes and message types
//! - Conversions between core types and their wire form
//! - The client-side verifier (`client`)

pub mod client;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::hasher::Hash;
use crate::crypto::Commit;
use crate::merkle::{AuthenticationPath, ProofError, ProofNode};
use crate::pad::policies::serialize_ad;
use crate::pad::{serialize_str, SignedTreeRoot, TemporaryBinding};

/// Request type tags.
pub const TYPE_REGISTRATION: u8 = 0;
pub const TYPE_KEY_LOOKUP: u8 = 1;
pub const TYPE_KEY_LOOKUP_IN_EPOCH: u8 = 2;
pub const TYPE_MONITORING: u8 = 3;

/// Stable numeric codes shared by server responses and client verification
/// outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum ErrorCode {
    /// Request succeeded.
    Success = 0,

    // Verification outcomes
    Passed = 100,
    PassedWithProofOfAbsence = 101,
    BadStr = 150,
    BadHashChain = 151,
    BadIndex = 152,
    BadVrfProof = 153,
    BadCommitment = 154,
    BadProofOfInclusion = 155,
    BadProofOfAbsence = 156,
    BadMapping = 157,
    BadSignature = 158,
    BadEpoch = 159,
    BadBinding = 160,

    // Structural errors
    MalformedClientMessage = 400,
    NameNotFound = 404,
    NameExisted = 409,
    EpochOutOfRange = 416,

    // Internal errors
    InternalServer = 500,
    StrNotFound = 501,
    BadTreeStructure = 502,
}

impl ErrorCode {
    /// Whether this code is an acceptable verification outcome.
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            ErrorCode::Success | ErrorCode::Passed | ErrorCode::PassedWithProofOfAbsence
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::Passed => "passed",
            ErrorCode::PassedWithProofOfAbsence => "passed_with_proof_of_absence",
            ErrorCode::BadStr => "bad_str",
            ErrorCode::BadHashChain => "bad_hash_chain",
            ErrorCode::BadIndex => "bad_index",
            ErrorCode::BadVrfProof => "bad_vrf_proof",
            ErrorCode::BadCommitment => "bad_commitment",
            ErrorCode::BadProofOfInclusion => "bad_proof_of_inclusion",
            ErrorCode::BadProofOfAbsence => "bad_proof_of_absence",
            ErrorCode::BadMapping => "bad_mapping",
            ErrorCode::BadSignature => "bad_signature",
            ErrorCode::BadEpoch => "bad_epoch",
            ErrorCode::BadBinding => "bad_binding",
            ErrorCode::MalformedClientMessage => "malformed_client_message",
            ErrorCode::NameNotFound => "name_not_found",
            ErrorCode::NameExisted => "name_existed",
            ErrorCode::EpochOutOfRange => "epoch_out_of_range",
            ErrorCode::InternalServer => "internal_server",
            ErrorCode::StrNotFound => "str_not_found",
            ErrorCode::BadTreeStructure => "bad_tree_structure",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code as u16
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ErrorCode::Success),
            100 => Ok(ErrorCode::Passed),
            101 => Ok(ErrorCode::PassedWithProofOfAbsence),
            150 => Ok(ErrorCode::BadStr),
            151 => Ok(ErrorCode::BadHashChain),
            152 => Ok(ErrorCode::BadIndex),
            153 => Ok(ErrorCode::BadVrfProof),
            154 => Ok(ErrorCode::BadCommitment),
            155 => Ok(ErrorCode::BadProofOfInclusion),
            156 => Ok(ErrorCode::BadProofOfAbsence),
            157 => Ok(ErrorCode::BadMapping),
            158 => Ok(ErrorCode::BadSignature),
            159 => Ok(ErrorCode::BadEpoch),
            160 => Ok(ErrorCode::BadBinding),
            400 => Ok(ErrorCode::MalformedClientMessage),
            404 => Ok(ErrorCode::NameNotFound),
            409 => Ok(ErrorCode::NameExisted),
            416 => Ok(ErrorCode::EpochOutOfRange),
            500 => Ok(ErrorCode::InternalServer),
            501 => Ok(ErrorCode::StrNotFound),
            502 => Ok(ErrorCode::BadTreeStructure),
            other => Err(format!("unknown error code: {other}")),
        }
    }
}

impl From<ProofError> for ErrorCode {
    fn from(err: ProofError) -> Self {
        match err {
            ProofError::BadIndex => ErrorCode::BadIndex,
            ProofError::BadMapping => ErrorCode::BadMapping,
            ProofError::BadCommitment => ErrorCode::BadCommitment,
            ProofError::BadProofOfInclusion => ErrorCode::BadProofOfInclusion,
            ProofError::BadProofOfAbsence => ErrorCode::BadProofOfAbsence,
            ProofError::UnequalTreeHashes => ErrorCode::BadStr,
        }
    }
}

/// Wire decoding errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid hex field: {0}")]
    InvalidHex(String),

    #[error("invalid field length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

fn decode_hex_array<const N: usize>(field: &str) -> Result<[u8; N], DecodeError> {
    let bytes = hex::decode(field).map_err(|e| DecodeError::InvalidHex(e.to_string()))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| DecodeError::InvalidLength {
            expected: N,
            got: bytes.len(),
        })
}

fn decode_hex_bytes(field: &str) -> Result<Vec<u8>, DecodeError> {
    hex::decode(field).map_err(|e| DecodeError::InvalidHex(e.to_string()))
}

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub username: String,
    /// Hex-encoded key material.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_unsigned_keychange: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_public_lookup: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyLookupRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyLookupInEpochRequest {
    pub username: String,
    pub epoch: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringRequest {
    pub username: String,
    pub start_epoch: u64,
    pub end_epoch: u64,
}

/// A decoded client request.
#[derive(Debug, Clone)]
pub enum Request {
    Registration(RegistrationRequest),
    KeyLookup(KeyLookupRequest),
    KeyLookupInEpoch(KeyLookupInEpochRequest),
    Monitoring(MonitoringRequest),
}

#[derive(Debug, Serialize, Deserialize)]
struct RequestEnvelope {
    #[serde(rename = "type")]
    request_type: u8,
    request: serde_json::Value,
}

impl Request {
    pub fn request_type(&self) -> u8 {
        match self {
            Request::Registration(_) => TYPE_REGISTRATION,
            Request::KeyLookup(_) => TYPE_KEY_LOOKUP,
            Request::KeyLookupInEpoch(_) => TYPE_KEY_LOOKUP_IN_EPOCH,
            Request::Monitoring(_) => TYPE_MONITORING,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Request::Registration(r) => &r.username,
            Request::KeyLookup(r) => &r.username,
            Request::KeyLookupInEpoch(r) => &r.username,
            Request::Monitoring(r) => &r.username,
        }
    }

    /// Decode the type-tagged envelope. Any shape mismatch is a
    /// `MalformedClientMessage`.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ErrorCode> {
        let envelope: RequestEnvelope =
            serde_json::from_value(value).map_err(|_| ErrorCode::MalformedClientMessage)?;
        let body = envelope.request;
        let parsed = match envelope.request_type {
            TYPE_REGISTRATION => serde_json::from_value(body).map(Request::Registration),
            TYPE_KEY_LOOKUP => serde_json::from_value(body).map(Request::KeyLookup),
            TYPE_KEY_LOOKUP_IN_EPOCH => {
                serde_json::from_value(body).map(Request::KeyLookupInEpoch)
            }
            TYPE_MONITORING => serde_json::from_value(body).map(Request::Monitoring),
            _ => return Err(ErrorCode::MalformedClientMessage),
        };
        parsed.map_err(|_| ErrorCode::MalformedClientMessage)
    }

    pub fn from_json(raw: &str) -> Result<Self, ErrorCode> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|_| ErrorCode::MalformedClientMessage)?;
        Self::from_value(value)
    }

    /// Encode into the type-tagged envelope.
    pub fn to_value(&self) -> serde_json::Value {
        let body = match self {
            Request::Registration(r) => serde_json::to_value(r),
            Request::KeyLookup(r) => serde_json::to_value(r),
            Request::KeyLookupInEpoch(r) => serde_json::to_value(r),
            Request::Monitoring(r) => serde_json::to_value(r),
        }
        .unwrap_or(serde_json::Value::Null);
        serde_json::json!({ "type": self.request_type(), "request": body })
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// The response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub error: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_response: Option<DirectoryResponse>,
}

impl Response {
    pub fn error(code: ErrorCode) -> Self {
        Self {
            error: code,
            directory_response: None,
        }
    }
}

/// Proof material returned by the directory; which fields are present
/// depends on the request type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub str: Option<StrMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ap: Option<AuthPathMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tb: Option<TbMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aps: Option<Vec<AuthPathMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strs: Option<Vec<StrMessage>>,
}

/// Published policies, as carried inside an STR message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoliciesMessage {
    pub hash_id: String,
    /// Hex-encoded VRF public key.
    pub vrf_public: String,
}

impl PoliciesMessage {
    /// Rebuild the canonical associated-data bytes the STR signs.
    pub fn ad_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        let vrf_public: [u8; 32] = decode_hex_array(&self.vrf_public)?;
        Ok(serialize_ad(&self.hash_id, &vrf_public))
    }
}

/// An STR on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrMessage {
    pub epoch: u64,
    pub previous_epoch: u64,
    pub tree_hash: String,
    pub previous_str_hash: String,
    pub policies: PoliciesMessage,
    pub signature: String,
}

impl StrMessage {
    /// The canonical bytes the directory signed.
    pub fn serialize_for_signing(&self) -> Result<Vec<u8>, DecodeError> {
        let tree_hash: Hash = decode_hex_array(&self.tree_hash)?;
        let previous_str_hash: Hash = decode_hex_array(&self.previous_str_hash)?;
        Ok(serialize_str(
            self.epoch,
            self.previous_epoch,
            &tree_hash,
            &previous_str_hash,
            &self.policies.ad_bytes()?,
        ))
    }
}

impl From<&SignedTreeRoot> for StrMessage {
    fn from(str_root: &SignedTreeRoot) -> Self {
        Self {
            epoch: str_root.epoch,
            previous_epoch: str_root.previous_epoch,
            tree_hash: hex::encode(str_root.tree_hash),
            previous_str_hash: hex::encode(str_root.previous_str_hash),
            policies: PoliciesMessage {
                hash_id: str_root.policies.hash_id.clone(),
                vrf_public: hex::encode(str_root.policies.vrf_public().to_bytes()),
            },
            signature: hex::encode(str_root.signature),
        }
    }
}

/// A commitment on the wire; the salt is present only in inclusion proofs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    pub value: String,
}

/// The terminal proof node on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafMessage {
    pub level: u32,
    pub index: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub is_empty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment: Option<CommitmentMessage>,
}

/// An authentication path on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPathMessage {
    pub tree_nonce: String,
    pub lookup_index: String,
    pub vrf_proof: String,
    pub pruned_siblings: Vec<String>,
    pub leaf: LeafMessage,
}

impl From<&AuthenticationPath> for AuthPathMessage {
    fn from(ap: &AuthenticationPath) -> Self {
        Self {
            tree_nonce: hex::encode(ap.tree_nonce),
            lookup_index: hex::encode(ap.lookup_index),
            vrf_proof: hex::encode(&ap.vrf_proof),
            pruned_siblings: ap.pruned_siblings.iter().map(hex::encode).collect(),
            leaf: LeafMessage {
                level: ap.leaf.level,
                index: hex::encode(ap.leaf.index),
                value: ap.leaf.value.as_ref().map(hex::encode),
                is_empty: ap.leaf.is_empty,
                commitment: ap.leaf.commitment.as_ref().map(|c| CommitmentMessage {
                    salt: c.salt().map(hex::encode),
                    value: hex::encode(c.value()),
                }),
            },
        }
    }
}

impl AuthPathMessage {
    /// Decode back into the core representation.
    pub fn to_path(&self) -> Result<AuthenticationPath, DecodeError> {
        let commitment = match &self.leaf.commitment {
            None => None,
            Some(c) => {
                let value: Hash = decode_hex_array(&c.value)?;
                Some(match &c.salt {
                    None => Commit::opaque(value),
                    Some(salt_hex) => {
                        let salt: [u8; 32] = decode_hex_array(salt_hex)?;
                        Commit::from_raw_parts(salt, value)
                    }
                })
            }
        };

        let mut pruned_siblings = Vec::with_capacity(self.pruned_siblings.len());
        for sibling in &self.pruned_siblings {
            pruned_siblings.push(decode_hex_array(sibling)?);
        }

        Ok(AuthenticationPath {
            tree_nonce: decode_hex_array(&self.tree_nonce)?,
            lookup_index: decode_hex_array(&self.lookup_index)?,
            vrf_proof: decode_hex_bytes(&self.vrf_proof)?,
            pruned_siblings,
            leaf: ProofNode {
                level: self.leaf.level,
                index: decode_hex_array(&self.leaf.index)?,
                value: self.leaf.value.as_deref().map(decode_hex_bytes).transpose()?,
                commitment,
                is_empty: self.leaf.is_empty,
            },
        })
    }
}

/// A temporary binding on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TbMessage {
    pub index: String,
    pub value: String,
    pub signature: String,
}

impl From<&TemporaryBinding> for TbMessage {
    fn from(tb: &TemporaryBinding) -> Self {
        Self {
            index: hex::encode(tb.index),
            value: hex::encode(&tb.value),
            signature: hex::encode(tb.signature),
        }
    }
}

impl TbMessage {
    pub fn to_binding(&self) -> Result<TemporaryBinding, DecodeError> {
        Ok(TemporaryBinding {
            index: decode_hex_array(&self.index)?,
            value: decode_hex_bytes(&self.value)?,
            signature: decode_hex_array(&self.signature)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_round_trip() {
        for code in [
            ErrorCode::Success,
            ErrorCode::Passed,
            ErrorCode::BadHashChain,
            ErrorCode::NameExisted,
            ErrorCode::StrNotFound,
        ] {
            let n: u16 = code.into();
            assert_eq!(ErrorCode::try_from(n).unwrap(), code);
        }
        assert!(ErrorCode::try_from(9999).is_err());
    }

    #[test]
    fn test_error_code_serializes_as_number() {
        let json = serde_json::to_string(&ErrorCode::NameNotFound).unwrap();
        assert_eq!(json, "404");
        let back: ErrorCode = serde_json::from_str("404").unwrap();
        assert_eq!(back, ErrorCode::NameNotFound);
    }

    #[test]
    fn test_request_envelope_round_trip() {
        let request = Request::Registration(RegistrationRequest {
            username: "alice".into(),
            key: hex::encode(b"key material"),
            allow_unsigned_keychange: None,
            allow_public_lookup: Some(true),
        });
        let value = request.to_value();
        assert_eq!(value["type"], 0);

        let parsed = Request::from_value(value).unwrap();
        assert_eq!(parsed.username(), "alice");
        assert_eq!(parsed.request_type(), TYPE_REGISTRATION);
    }

    #[test]
    fn test_malformed_requests_rejected() {
        assert_eq!(
            Request::from_json("not json").unwrap_err(),
            ErrorCode::MalformedClientMessage
        );
        assert_eq!(
            Request::from_json(r#"{"type": 9, "request": {}}"#).unwrap_err(),
            ErrorCode::MalformedClientMessage
        );
        assert_eq!(
            Request::from_json(r#"{"type": 0, "request": {"nope": 1}}"#).unwrap_err(),
            ErrorCode::MalformedClientMessage
        );
    }

    #[test]
    fn test_monitoring_request_parses() {
        let raw = r#"{"type": 3, "request": {"username": "alice", "start_epoch": 2, "end_epoch": 5}}"#;
        let parsed = Request::from_json(raw).unwrap();
        match parsed {
            Request::Monitoring(m) => {
                assert_eq!(m.start_epoch, 2);
                assert_eq!(m.end_epoch, 5);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
