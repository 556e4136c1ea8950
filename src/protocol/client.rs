//! Client-Side Verification
//!
//! The consistency checks a client runs over every directory response: STR
//! signature and hash-chain continuity against the previously trusted STR,
//! the VRF proof for the lookup index, the authentication path against the
//! signed tree hash, and temporary-binding promises across epoch boundaries.
//! Verification returns the first detected failure; it never throws.

use std::collections::HashMap;

use crate::crypto::hasher::{lookup_hasher, Hash, TreeHasher};
use crate::crypto::sign::{PublicKey, SIGNATURE_SIZE};
use crate::crypto::vrf;
use crate::merkle::{AuthenticationPath, ProofType};
use crate::pad::temporary_binding::serialize_tb;

use super::{
    AuthPathMessage, DirectoryResponse, ErrorCode, Request, Response, StrMessage, TbMessage,
};

/// Decoded fields of a verified STR message.
#[derive(Debug, Clone)]
struct StrFacts {
    epoch: u64,
    previous_epoch: u64,
    tree_hash: Hash,
    previous_str_hash: Hash,
    hasher: TreeHasher,
    vrf_public: vrf::PublicKey,
    signature: [u8; SIGNATURE_SIZE],
}

impl StrFacts {
    fn decode(msg: &StrMessage) -> Result<Self, ErrorCode> {
        let tree_hash = decode_hash(&msg.tree_hash).ok_or(ErrorCode::BadStr)?;
        let previous_str_hash = decode_hash(&msg.previous_str_hash).ok_or(ErrorCode::BadStr)?;
        let signature = decode_signature(&msg.signature).ok_or(ErrorCode::BadStr)?;
        let hasher = lookup_hasher(&msg.policies.hash_id).ok_or(ErrorCode::BadStr)?;
        let vrf_key = decode_hash(&msg.policies.vrf_public)
            .and_then(|bytes| vrf::PublicKey::from_bytes(&bytes).ok())
            .ok_or(ErrorCode::BadStr)?;
        Ok(Self {
            epoch: msg.epoch,
            previous_epoch: msg.previous_epoch,
            tree_hash,
            previous_str_hash,
            hasher,
            vrf_public: vrf_key,
            signature,
        })
    }

    /// Whether `next` directly extends `self`.
    fn extended_by(&self, next: &StrFacts) -> bool {
        next.epoch == self.epoch + 1
            && next.previous_epoch == self.epoch
            && next.previous_str_hash == next.hasher.digest(&[&self.signature])
    }
}

fn decode_hash(field: &str) -> Option<Hash> {
    hex::decode(field).ok()?.as_slice().try_into().ok()
}

fn decode_signature(field: &str) -> Option<[u8; SIGNATURE_SIZE]> {
    hex::decode(field).ok()?.as_slice().try_into().ok()
}

/// A registration promise awaiting the next epoch's proof.
#[derive(Debug, Clone)]
struct PendingTb {
    /// Epoch of the STR whose signature the TB covers.
    issued_epoch: u64,
    index: Hash,
    value: Vec<u8>,
}

/// Client state: a pinned directory signing key, the most recently verified
/// STR, and any temporary bindings still awaiting fulfillment.
pub struct ClientVerifier {
    signing_public: PublicKey,
    saved_str: Option<StrMessage>,
    pending_tbs: HashMap<String, PendingTb>,
}

impl ClientVerifier {
    /// A verifier that trusts the first STR it sees under `signing_public`.
    pub fn new(signing_public: PublicKey) -> Self {
        Self {
            signing_public,
            saved_str: None,
            pending_tbs: HashMap::new(),
        }
    }

    /// A verifier seeded with a previously trusted STR.
    pub fn with_trusted_str(signing_public: PublicKey, saved_str: StrMessage) -> Self {
        Self {
            signing_public,
            saved_str: Some(saved_str),
            pending_tbs: HashMap::new(),
        }
    }

    /// The most recently verified STR.
    pub fn saved_str(&self) -> Option<&StrMessage> {
        self.saved_str.as_ref()
    }

    /// Run the full consistency check for one directory response.
    ///
    /// `expected_value` is the key material the caller believes is bound to
    /// the username (`None` when unknown or when absence is expected). The
    /// returned code is `Passed`, `PassedWithProofOfAbsence`, a verified
    /// structural outcome (`NameNotFound`, `NameExisted`), or the first
    /// verification failure.
    pub fn verify_response(
        &mut self,
        request: &Request,
        expected_value: Option<&[u8]>,
        response: &Response,
    ) -> ErrorCode {
        let result = match request {
            Request::Registration(reg) => {
                // The request itself names the key being registered.
                let own_key = hex::decode(&reg.key).ok();
                let expected = expected_value.or(own_key.as_deref());
                self.verify_registration(&reg.username, expected, response)
            }
            Request::KeyLookup(req) => self.verify_key_lookup(&req.username, expected_value, response),
            Request::KeyLookupInEpoch(req) => {
                self.verify_lookup_in_epoch(&req.username, req.epoch, expected_value, response)
            }
            Request::Monitoring(req) => self.verify_monitoring(
                &req.username,
                req.start_epoch,
                expected_value,
                response,
            ),
        };
        match result {
            Ok(code) | Err(code) => code,
        }
    }

    fn verify_registration(
        &mut self,
        username: &str,
        expected: Option<&[u8]>,
        response: &Response,
    ) -> Result<ErrorCode, ErrorCode> {
        if !matches!(response.error, ErrorCode::Success | ErrorCode::NameExisted) {
            // Structural failure with no proof attached.
            return Ok(response.error);
        }
        let dr = required(response)?;
        let str_msg = dr.str.as_ref().ok_or(ErrorCode::MalformedClientMessage)?;
        let facts = self.check_str(str_msg)?;
        let ap = decode_path(dr.ap.as_ref())?;
        check_vrf(&facts, username, &ap)?;

        match response.error {
            ErrorCode::Success => {
                // Fresh registration: absence as of the last epoch, plus the
                // promise for the next one.
                ap.verify(username.as_bytes(), None, &facts.tree_hash, facts.hasher)
                    .map_err(ErrorCode::from)?;
                match dr.tb.as_ref() {
                    Some(tb_msg) => {
                        self.check_tb(username, tb_msg, &facts, expected)?;
                        Ok(ErrorCode::Passed)
                    }
                    None => Ok(ErrorCode::PassedWithProofOfAbsence),
                }
            }
            ErrorCode::NameExisted => {
                match ap.proof_type() {
                    ProofType::Inclusion => {
                        // The name is committed; check the shown binding is
                        // internally consistent (it may belong to someone
                        // else, so no value expectation applies).
                        let shown = ap.leaf.value.clone();
                        ap.verify(
                            username.as_bytes(),
                            shown.as_deref(),
                            &facts.tree_hash,
                            facts.hasher,
                        )
                        .map_err(ErrorCode::from)?;
                    }
                    ProofType::Absence => {
                        // Registered earlier in the current epoch: absence
                        // proof plus the TB already issued.
                        ap.verify(username.as_bytes(), None, &facts.tree_hash, facts.hasher)
                            .map_err(ErrorCode::from)?;
                        let tb_msg = dr.tb.as_ref().ok_or(ErrorCode::BadProofOfAbsence)?;
                        self.check_tb(username, tb_msg, &facts, None)?;
                    }
                }
                Ok(ErrorCode::NameExisted)
            }
            _ => unreachable!(),
        }
    }

    fn verify_key_lookup(
        &mut self,
        username: &str,
        expected: Option<&[u8]>,
        response: &Response,
    ) -> Result<ErrorCode, ErrorCode> {
        if !matches!(response.error, ErrorCode::Success | ErrorCode::NameNotFound) {
            return Ok(response.error);
        }
        let dr = required(response)?;
        let str_msg = dr.str.as_ref().ok_or(ErrorCode::MalformedClientMessage)?;
        let facts = self.check_str(str_msg)?;
        let ap = decode_path(dr.ap.as_ref())?;
        check_vrf(&facts, username, &ap)?;
        self.check_pending_tb(username, &facts, &ap)?;

        if response.error == ErrorCode::NameNotFound {
            ap.verify(username.as_bytes(), None, &facts.tree_hash, facts.hasher)
                .map_err(ErrorCode::from)?;
            return Ok(ErrorCode::NameNotFound);
        }

        if let Some(tb_msg) = dr.tb.as_ref() {
            // Bound during the current epoch: absence in the committed tree
            // plus the promise.
            ap.verify(username.as_bytes(), None, &facts.tree_hash, facts.hasher)
                .map_err(ErrorCode::from)?;
            self.check_tb(username, tb_msg, &facts, expected)?;
            return Ok(ErrorCode::Passed);
        }

        // Committed binding. Without a prior expectation the leaf's own
        // value anchors the commitment check.
        let shown = ap.leaf.value.clone();
        let expect = expected.or(shown.as_deref());
        ap.verify(username.as_bytes(), expect, &facts.tree_hash, facts.hasher)
            .map_err(ErrorCode::from)?;
        Ok(ErrorCode::Passed)
    }

    fn verify_lookup_in_epoch(
        &mut self,
        username: &str,
        epoch: u64,
        expected: Option<&[u8]>,
        response: &Response,
    ) -> Result<ErrorCode, ErrorCode> {
        if !matches!(response.error, ErrorCode::Success | ErrorCode::NameNotFound) {
            return Ok(response.error);
        }
        let dr = required(response)?;
        let strs = dr.strs.as_ref().ok_or(ErrorCode::MalformedClientMessage)?;
        let facts = self.check_str_range(strs)?;
        let first = facts.first().ok_or(ErrorCode::MalformedClientMessage)?;
        if first.epoch != epoch {
            return Err(ErrorCode::BadEpoch);
        }

        let ap = decode_path(dr.ap.as_ref())?;
        check_vrf(first, username, &ap)?;
        let ptype = ap
            .verify(
                username.as_bytes(),
                if response.error == ErrorCode::NameNotFound {
                    None
                } else {
                    expected.or(ap.leaf.value.as_deref())
                },
                &first.tree_hash,
                first.hasher,
            )
            .map_err(ErrorCode::from)?;

        if response.error == ErrorCode::NameNotFound {
            return Ok(ErrorCode::NameNotFound);
        }
        Ok(match ptype {
            ProofType::Inclusion => ErrorCode::Passed,
            ProofType::Absence => ErrorCode::PassedWithProofOfAbsence,
        })
    }

    fn verify_monitoring(
        &mut self,
        username: &str,
        start_epoch: u64,
        expected: Option<&[u8]>,
        response: &Response,
    ) -> Result<ErrorCode, ErrorCode> {
        if response.error != ErrorCode::Success {
            return Ok(response.error);
        }
        let dr = required(response)?;
        let strs = dr.strs.as_ref().ok_or(ErrorCode::MalformedClientMessage)?;
        let aps = dr.aps.as_ref().ok_or(ErrorCode::MalformedClientMessage)?;
        if strs.len() != aps.len() || strs.is_empty() {
            return Err(ErrorCode::MalformedClientMessage);
        }

        let facts = self.check_str_range(strs)?;
        if facts[0].epoch != start_epoch {
            return Err(ErrorCode::BadEpoch);
        }

        // Monitoring an owned name: every retained epoch must prove the
        // same binding.
        for (epoch_facts, ap_msg) in facts.iter().zip(aps.iter()) {
            let ap = ap_msg.to_path().map_err(|_| ErrorCode::MalformedClientMessage)?;
            check_vrf(epoch_facts, username, &ap)?;
            let expect = expected.or(ap.leaf.value.as_deref());
            let ptype = ap
                .verify(
                    username.as_bytes(),
                    expect,
                    &epoch_facts.tree_hash,
                    epoch_facts.hasher,
                )
                .map_err(ErrorCode::from)?;
            if ptype != ProofType::Inclusion {
                return Err(ErrorCode::BadProofOfInclusion);
            }
        }
        Ok(ErrorCode::Passed)
    }

    /// Verify one STR against the pinned key and the saved state, saving it
    /// on success.
    fn check_str(&mut self, msg: &StrMessage) -> Result<StrFacts, ErrorCode> {
        let facts = self.check_signature(msg)?;

        match self.saved_str.as_ref() {
            // Trust on first use.
            None => self.saved_str = Some(msg.clone()),
            Some(saved) => {
                if msg.epoch == saved.epoch {
                    if msg.signature != saved.signature {
                        return Err(ErrorCode::BadStr);
                    }
                } else if msg.epoch == saved.epoch + 1 {
                    let saved_facts = StrFacts::decode(saved)?;
                    if !saved_facts.extended_by(&facts) {
                        return Err(ErrorCode::BadHashChain);
                    }
                    self.saved_str = Some(msg.clone());
                } else if msg.epoch < saved.epoch {
                    return Err(ErrorCode::BadEpoch);
                } else {
                    // A gap this client cannot audit.
                    return Err(ErrorCode::BadStr);
                }
            }
        }
        Ok(facts)
    }

    /// Signature check only, without touching the saved state.
    fn check_signature(&self, msg: &StrMessage) -> Result<StrFacts, ErrorCode> {
        let facts = StrFacts::decode(msg)?;
        let bytes = msg
            .serialize_for_signing()
            .map_err(|_| ErrorCode::BadStr)?;
        if !self.signing_public.verify(&bytes, &facts.signature) {
            return Err(ErrorCode::BadSignature);
        }
        Ok(facts)
    }

    /// Verify a consecutive STR range: every signature, every link. When the
    /// saved STR appears inside the range, it must match byte-for-byte and
    /// the range's tail becomes the new saved state.
    fn check_str_range(&mut self, strs: &[StrMessage]) -> Result<Vec<StrFacts>, ErrorCode> {
        if strs.is_empty() {
            return Err(ErrorCode::MalformedClientMessage);
        }
        let mut facts = Vec::with_capacity(strs.len());
        for msg in strs {
            facts.push(self.check_signature(msg)?);
        }
        for pair in facts.windows(2) {
            if !pair[0].extended_by(&pair[1]) {
                return Err(ErrorCode::BadHashChain);
            }
        }

        if let Some(saved) = self.saved_str.as_ref() {
            if let Some(position) = strs.iter().position(|m| m.epoch == saved.epoch) {
                if strs[position].signature != saved.signature {
                    return Err(ErrorCode::BadStr);
                }
                // The chain from the saved STR to the tail checked out.
                self.saved_str = Some(strs[strs.len() - 1].clone());
            }
        } else {
            self.saved_str = Some(strs[strs.len() - 1].clone());
        }
        Ok(facts)
    }

    /// Verify a TB's signature and its consistency with the registered
    /// value, then remember it for fulfillment at the next epoch.
    fn check_tb(
        &mut self,
        username: &str,
        tb_msg: &TbMessage,
        facts: &StrFacts,
        expected: Option<&[u8]>,
    ) -> Result<(), ErrorCode> {
        let tb = tb_msg
            .to_binding()
            .map_err(|_| ErrorCode::MalformedClientMessage)?;
        let bytes = serialize_tb(&facts.signature, &tb.index, &tb.value);
        if !self.signing_public.verify(&bytes, &tb.signature) {
            return Err(ErrorCode::BadSignature);
        }
        if let Some(expected) = expected {
            if tb.value != expected {
                return Err(ErrorCode::BadBinding);
            }
        }
        self.pending_tbs.insert(
            username.to_string(),
            PendingTb {
                issued_epoch: facts.epoch,
                index: tb.index,
                value: tb.value,
            },
        );
        Ok(())
    }

    /// Enforce forward consistency of a recorded TB: the first proof seen in
    /// the following epoch must honor the promised `(index, value)`.
    fn check_pending_tb(
        &mut self,
        username: &str,
        facts: &StrFacts,
        ap: &AuthenticationPath,
    ) -> Result<(), ErrorCode> {
        let Some(pending) = self.pending_tbs.get(username) else {
            return Ok(());
        };
        if facts.epoch == pending.issued_epoch + 1 {
            let honored = ap.lookup_index == pending.index
                && ap.leaf.value.as_deref() == Some(pending.value.as_slice());
            self.pending_tbs.remove(username);
            if !honored {
                return Err(ErrorCode::BadBinding);
            }
        } else if facts.epoch > pending.issued_epoch + 1 {
            // Too late to check; the binding's epoch is gone.
            self.pending_tbs.remove(username);
        }
        Ok(())
    }
}

fn required(response: &Response) -> Result<&DirectoryResponse, ErrorCode> {
    response
        .directory_response
        .as_ref()
        .ok_or(ErrorCode::MalformedClientMessage)
}

fn decode_path(msg: Option<&AuthPathMessage>) -> Result<AuthenticationPath, ErrorCode> {
    msg.ok_or(ErrorCode::MalformedClientMessage)?
        .to_path()
        .map_err(|_| ErrorCode::MalformedClientMessage)
}

/// The lookup index must be the VRF output for the username under the key
/// the epoch's policies authorize.
fn check_vrf(facts: &StrFacts, username: &str, ap: &AuthenticationPath) -> Result<(), ErrorCode> {
    if !facts
        .vrf_public
        .verify(username.as_bytes(), &ap.lookup_index, &ap.vrf_proof)
    {
        return Err(ErrorCode::BadVrfProof);
    }
    Ok(())
}
