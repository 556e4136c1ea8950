//! The Directory Service
//!
//! Maps protocol requests onto PAD operations and assembles proof
//! responses. Registrations issue a temporary binding and record it until
//! the next epoch cut; lookups return inclusion or absence proofs against
//! the latest committed snapshot; monitoring walks the retained history.
//!
//! Locking lives one layer up: the API server wraps the directory in a
//! reader-writer lock and takes the shared side for lookups and the
//! exclusive side for registrations, epoch cuts, and policy changes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::crypto::hasher::TreeHasher;
use crate::crypto::sign::{KeyPair, PublicKey};
use crate::logging::log_registration_event;
use crate::merkle::ProofType;
use crate::pad::{Pad, PadError, Policies, RestoredEpoch, SignedTreeRoot, TemporaryBinding};
use crate::protocol::{
    AuthPathMessage, DirectoryResponse, ErrorCode, KeyLookupInEpochRequest, KeyLookupRequest,
    MonitoringRequest, RegistrationRequest, Request, Response, StrMessage, TbMessage,
};

/// The directory: a PAD plus the temporary bindings issued this epoch.
pub struct Directory {
    pad: Pad,
    tbs: HashMap<String, TemporaryBinding>,
}

impl Directory {
    pub fn new(
        policies: Policies,
        signer: KeyPair,
        capacity: usize,
        hasher: TreeHasher,
    ) -> Result<Self, PadError> {
        Ok(Self {
            pad: Pad::new(policies, signer, capacity, hasher)?,
            tbs: HashMap::new(),
        })
    }

    /// Resume from a persisted epoch record.
    pub fn restore(
        policies: Policies,
        signer: KeyPair,
        capacity: usize,
        hasher: TreeHasher,
        record: RestoredEpoch,
    ) -> Result<Self, PadError> {
        Ok(Self {
            pad: Pad::restore(policies, signer, capacity, hasher, record)?,
            tbs: HashMap::new(),
        })
    }

    /// Cut the next epoch. Temporary bindings issued during the closing
    /// epoch are now committed and forgotten.
    pub fn update(&mut self) -> Result<Arc<SignedTreeRoot>, PadError> {
        let str_next = self.pad.update(None)?;
        self.tbs.clear();
        Ok(str_next)
    }

    /// Queue new policies for the next epoch cut.
    pub fn set_policies(&mut self, policies: Policies) {
        self.pad.set_policies(policies);
    }

    pub fn latest_str(&self) -> &Arc<SignedTreeRoot> {
        self.pad.latest_str()
    }

    pub fn signer_public(&self) -> PublicKey {
        self.pad.signer_public()
    }

    /// Snapshot of the latest committed epoch for persistence.
    pub fn export_latest(&self) -> RestoredEpoch {
        self.pad.export_latest()
    }

    /// Dispatch one decoded request. Registration mutates; the rest only
    /// read, but routing through one entry point keeps the protocol mapping
    /// in a single place.
    pub fn handle(&mut self, request: &Request) -> Response {
        match request {
            Request::Registration(req) => self.register(req),
            Request::KeyLookup(req) => self.key_lookup(req),
            Request::KeyLookupInEpoch(req) => self.key_lookup_in_epoch(req),
            Request::Monitoring(req) => self.monitor(req),
        }
    }

    /// Register a fresh name: absence proof for the committed tree, a
    /// pending-tree insertion, and a signed promise for the next epoch.
    pub fn register(&mut self, req: &RegistrationRequest) -> Response {
        if req.username.is_empty() {
            return Response::error(ErrorCode::MalformedClientMessage);
        }
        let Ok(key_bytes) = hex::decode(&req.key) else {
            return Response::error(ErrorCode::MalformedClientMessage);
        };
        if key_bytes.is_empty() {
            return Response::error(ErrorCode::MalformedClientMessage);
        }

        let ap = match self.pad.lookup(&req.username) {
            Ok(ap) => ap,
            Err(err) => return internal_error("registration lookup", err),
        };

        if let Some(existing_tb) = self.tbs.get(&req.username) {
            // Already promised this epoch; hand back the same binding.
            return Response {
                error: ErrorCode::NameExisted,
                directory_response: Some(DirectoryResponse {
                    str: Some(self.latest_str_message()),
                    ap: Some(AuthPathMessage::from(&ap)),
                    tb: Some(TbMessage::from(existing_tb)),
                    ..Default::default()
                }),
            };
        }

        if ap.proof_type() == ProofType::Inclusion {
            return Response {
                error: ErrorCode::NameExisted,
                directory_response: Some(DirectoryResponse {
                    str: Some(self.latest_str_message()),
                    ap: Some(AuthPathMessage::from(&ap)),
                    ..Default::default()
                }),
            };
        }

        let tb = match self.pad.tb(&req.username, &key_bytes) {
            Ok(tb) => tb,
            Err(err) => {
                log_registration_event(&req.username, false, Some(&err.to_string()));
                return internal_error("temporary binding", err);
            }
        };
        let tb_message = TbMessage::from(&tb);
        self.tbs.insert(req.username.clone(), tb);
        log_registration_event(&req.username, true, None);

        Response {
            error: ErrorCode::Success,
            directory_response: Some(DirectoryResponse {
                str: Some(self.latest_str_message()),
                ap: Some(AuthPathMessage::from(&ap)),
                tb: Some(tb_message),
                ..Default::default()
            }),
        }
    }

    /// Look a name up in the latest committed epoch.
    pub fn key_lookup(&self, req: &KeyLookupRequest) -> Response {
        if req.username.is_empty() {
            return Response::error(ErrorCode::MalformedClientMessage);
        }
        let ap = match self.pad.lookup(&req.username) {
            Ok(ap) => ap,
            Err(err) => return internal_error("lookup", err),
        };

        if ap.proof_type() == ProofType::Inclusion {
            return Response {
                error: ErrorCode::Success,
                directory_response: Some(DirectoryResponse {
                    str: Some(self.latest_str_message()),
                    ap: Some(AuthPathMessage::from(&ap)),
                    ..Default::default()
                }),
            };
        }

        // Bound this epoch but not yet committed: absence proof plus the TB.
        if let Some(tb) = self.tbs.get(&req.username) {
            return Response {
                error: ErrorCode::Success,
                directory_response: Some(DirectoryResponse {
                    str: Some(self.latest_str_message()),
                    ap: Some(AuthPathMessage::from(&ap)),
                    tb: Some(TbMessage::from(tb)),
                    ..Default::default()
                }),
            };
        }

        Response {
            error: ErrorCode::NameNotFound,
            directory_response: Some(DirectoryResponse {
                str: Some(self.latest_str_message()),
                ap: Some(AuthPathMessage::from(&ap)),
                ..Default::default()
            }),
        }
    }

    /// Look a name up in a retained past epoch; the response carries the STR
    /// range from that epoch to the latest so the client can audit the
    /// chain.
    pub fn key_lookup_in_epoch(&self, req: &KeyLookupInEpochRequest) -> Response {
        if req.username.is_empty() {
            return Response::error(ErrorCode::MalformedClientMessage);
        }
        let latest_epoch = self.pad.latest_str().epoch;
        if req.epoch > latest_epoch {
            return Response::error(ErrorCode::EpochOutOfRange);
        }

        let ap = match self.pad.lookup_in_epoch(&req.username, req.epoch) {
            Ok(ap) => ap,
            Err(PadError::StrNotFound(_)) => return Response::error(ErrorCode::StrNotFound),
            Err(err) => return internal_error("epoch lookup", err),
        };
        let strs = match self.str_range(req.epoch, latest_epoch) {
            Ok(strs) => strs,
            Err(code) => return Response::error(code),
        };

        let error = if ap.proof_type() == ProofType::Inclusion {
            ErrorCode::Success
        } else {
            ErrorCode::NameNotFound
        };
        Response {
            error,
            directory_response: Some(DirectoryResponse {
                ap: Some(AuthPathMessage::from(&ap)),
                strs: Some(strs),
                ..Default::default()
            }),
        }
    }

    /// Authentication paths for every epoch in `[start, min(end, latest)]`.
    pub fn monitor(&self, req: &MonitoringRequest) -> Response {
        let latest_epoch = self.pad.latest_str().epoch;
        if req.username.is_empty()
            || req.start_epoch > req.end_epoch
            || req.start_epoch > latest_epoch
        {
            return Response::error(ErrorCode::MalformedClientMessage);
        }
        let end_epoch = req.end_epoch.min(latest_epoch);

        let mut aps = Vec::with_capacity((end_epoch - req.start_epoch + 1) as usize);
        for epoch in req.start_epoch..=end_epoch {
            let ap = match self.pad.lookup_in_epoch(&req.username, epoch) {
                Ok(ap) => ap,
                Err(PadError::StrNotFound(_)) => return Response::error(ErrorCode::StrNotFound),
                Err(err) => return internal_error("monitoring lookup", err),
            };
            aps.push(AuthPathMessage::from(&ap));
        }
        let strs = match self.str_range(req.start_epoch, end_epoch) {
            Ok(strs) => strs,
            Err(code) => return Response::error(code),
        };

        Response {
            error: ErrorCode::Success,
            directory_response: Some(DirectoryResponse {
                aps: Some(aps),
                strs: Some(strs),
                ..Default::default()
            }),
        }
    }

    pub fn latest_epoch(&self) -> u64 {
        self.pad.latest_str().epoch
    }

    /// The STR for `epoch` in wire form, when retained.
    pub fn get_str_message(&self, epoch: u64) -> Option<StrMessage> {
        self.pad
            .get_str(epoch)
            .map(|s| StrMessage::from(s.as_ref()))
    }

    fn latest_str_message(&self) -> StrMessage {
        StrMessage::from(self.pad.latest_str().as_ref())
    }

    fn str_range(&self, start: u64, end: u64) -> Result<Vec<StrMessage>, ErrorCode> {
        let mut strs = Vec::with_capacity((end - start + 1) as usize);
        for epoch in start..=end {
            let str_at = self.pad.get_str(epoch).ok_or(ErrorCode::StrNotFound)?;
            strs.push(StrMessage::from(str_at.as_ref()));
        }
        Ok(strs)
    }
}

fn internal_error(context: &str, err: PadError) -> Response {
    warn!(target: "keydex::directory", context, error = %err, "request failed");
    match err {
        PadError::StrNotFound(_) => Response::error(ErrorCode::StrNotFound),
        _ => Response::error(ErrorCode::InternalServer),
    }
}
