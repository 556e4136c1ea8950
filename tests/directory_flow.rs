//! End-to-end directory flows: registration, lookup, monitoring, epoch
//! chains, temporary bindings, VRF rotation, and persistence, all checked
//! through the client-side verifier with fixed-seed RNGs.

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use keydex::crypto::vrf;
use keydex::pad::Pad;
use keydex::protocol::{
    KeyLookupInEpochRequest, KeyLookupRequest, MonitoringRequest, RegistrationRequest,
};
use keydex::storage::{EpochStore, MemoryEpochStore};
use keydex::{
    ClientVerifier, Directory, ErrorCode, KeyPair, Policies, PublicKey, Request, TreeHasher,
    DEFAULT_HASH_ID,
};

fn fixed_keys(seed: u64) -> (KeyPair, vrf::SecretKey) {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let signer = KeyPair::generate(&mut rng);
    let vrf_key = vrf::SecretKey::generate(&mut rng);
    (signer, vrf_key)
}

fn fixed_directory(seed: u64) -> (Directory, PublicKey) {
    let (signer, vrf_key) = fixed_keys(seed);
    let public = signer.public();
    let policies = Policies::new(DEFAULT_HASH_ID, vrf_key);
    let directory = Directory::new(policies, signer, 128, TreeHasher::default()).unwrap();
    (directory, public)
}

fn registration(username: &str, key: &[u8]) -> Request {
    Request::Registration(RegistrationRequest {
        username: username.into(),
        key: hex::encode(key),
        allow_unsigned_keychange: None,
        allow_public_lookup: None,
    })
}

fn lookup(username: &str) -> Request {
    Request::KeyLookup(KeyLookupRequest {
        username: username.into(),
    })
}

#[test]
fn test_single_entry_inclusion_after_update() {
    // S1: one binding, one epoch cut; the proof recomputes the signed hash.
    let (signer, vrf_key) = fixed_keys(1);
    let policies = Policies::new(DEFAULT_HASH_ID, vrf_key);
    let mut pad = Pad::new(policies, signer, 16, TreeHasher::default()).unwrap();

    pad.set("key", b"value").unwrap();
    pad.update(None).unwrap();

    let latest = pad.latest_str();
    let tree_hash = latest.tree_hash;
    assert_eq!(latest.epoch, 1);
    assert_eq!(
        latest.tree().root_hash().unwrap(),
        tree_hash,
        "snapshot hash must equal the signed tree hash"
    );

    let ap = pad.lookup("key").unwrap();
    assert_eq!(
        ap.verify(b"key", Some(b"value"), &tree_hash, pad.hasher())
            .unwrap(),
        keydex::ProofType::Inclusion
    );
    assert_eq!(ap.pruned_siblings.len(), ap.leaf.level as usize);
}

#[test]
fn test_hash_chain_continuity_over_100_epochs() {
    // S4: every link and every signature over a long run.
    let (signer, vrf_key) = fixed_keys(4);
    let public = signer.public();
    let policies = Policies::new(DEFAULT_HASH_ID, vrf_key);
    let mut pad = Pad::new(policies, signer, 256, TreeHasher::default()).unwrap();
    let hasher = pad.hasher();

    let mut strs = vec![std::sync::Arc::clone(pad.latest_str())];
    for i in 0..100 {
        pad.set(&format!("user{i}"), format!("key{i}").as_bytes())
            .unwrap();
        strs.push(pad.update(None).unwrap());
    }

    for pair in strs.windows(2) {
        assert!(pair[1].verify_hash_chain(&pair[0], hasher));
        assert_eq!(
            pair[1].previous_str_hash,
            hasher.digest(&[&pair[0].signature])
        );
    }
    for str_at in &strs {
        assert!(public.verify(&str_at.serialize(), &str_at.signature));
    }
}

#[test]
fn test_registration_and_tb_fulfillment_through_client() {
    // S5: the registration promise is verified now and honored after the
    // next epoch cut.
    let (mut directory, public) = fixed_directory(5);
    let mut client = ClientVerifier::new(public);

    let request = registration("alice", b"alice key");
    let response = match &request {
        Request::Registration(req) => directory.register(req),
        _ => unreachable!(),
    };
    assert_eq!(response.error, ErrorCode::Success);
    assert_eq!(
        client.verify_response(&request, None, &response),
        ErrorCode::Passed
    );

    directory.update().unwrap();

    let request = lookup("alice");
    let response = match &request {
        Request::KeyLookup(req) => directory.key_lookup(req),
        _ => unreachable!(),
    };
    assert_eq!(response.error, ErrorCode::Success);
    // The verifier checks the hash chain to the new epoch and enforces the
    // recorded TB against this proof.
    assert_eq!(
        client.verify_response(&request, Some(b"alice key"), &response),
        ErrorCode::Passed
    );
    assert_eq!(client.saved_str().unwrap().epoch, 1);
}

#[test]
fn test_broken_tb_promise_detected() {
    // A misbehaving server promises one value at registration but commits
    // another; the client catches it at the next epoch.
    use keydex::protocol::{AuthPathMessage, DirectoryResponse, Response, StrMessage, TbMessage};

    let (signer, vrf_key) = fixed_keys(50);
    let public = signer.public();
    let policies = Policies::new(DEFAULT_HASH_ID, vrf_key);
    let mut pad = Pad::new(policies, signer, 16, TreeHasher::default()).unwrap();
    let mut client = ClientVerifier::new(public);

    // Registration response, assembled the way the directory would.
    let ap0 = pad.lookup("alice").unwrap();
    let tb = pad.tb("alice", b"promised key").unwrap();
    let response = Response {
        error: ErrorCode::Success,
        directory_response: Some(DirectoryResponse {
            str: Some(StrMessage::from(pad.latest_str().as_ref())),
            ap: Some(AuthPathMessage::from(&ap0)),
            tb: Some(TbMessage::from(&tb)),
            ..Default::default()
        }),
    };
    let request = registration("alice", b"promised key");
    assert_eq!(
        client.verify_response(&request, None, &response),
        ErrorCode::Passed
    );

    // The server silently commits a different value.
    pad.set("alice", b"different key").unwrap();
    pad.update(None).unwrap();

    let ap1 = pad.lookup("alice").unwrap();
    let response = Response {
        error: ErrorCode::Success,
        directory_response: Some(DirectoryResponse {
            str: Some(StrMessage::from(pad.latest_str().as_ref())),
            ap: Some(AuthPathMessage::from(&ap1)),
            ..Default::default()
        }),
    };
    let request = lookup("alice");
    assert_eq!(
        client.verify_response(&request, None, &response),
        ErrorCode::BadBinding
    );
}

#[test]
fn test_absent_name_verified_through_client() {
    let (mut directory, public) = fixed_directory(6);
    directory.update().unwrap();

    let mut client = ClientVerifier::new(public);
    let request = lookup("ghost");
    let response = match &request {
        Request::KeyLookup(req) => directory.key_lookup(req),
        _ => unreachable!(),
    };
    assert_eq!(response.error, ErrorCode::NameNotFound);
    assert_eq!(
        client.verify_response(&request, None, &response),
        ErrorCode::NameNotFound
    );
}

#[test]
fn test_tampered_proof_rejected_by_client() {
    let (mut directory, public) = fixed_directory(7);
    match registration("alice", b"alice key") {
        Request::Registration(req) => directory.register(&req),
        _ => unreachable!(),
    };
    directory.update().unwrap();

    let request = lookup("alice");
    let mut response = match &request {
        Request::KeyLookup(req) => directory.key_lookup(req),
        _ => unreachable!(),
    };

    // Swap the bound value: the commitment no longer opens.
    let dr = response.directory_response.as_mut().unwrap();
    let ap = dr.ap.as_mut().unwrap();
    ap.leaf.value = Some(hex::encode(b"forged key"));

    let mut client = ClientVerifier::new(public);
    let outcome = client.verify_response(&request, None, &response);
    assert_eq!(outcome, ErrorCode::BadCommitment);
}

#[test]
fn test_forged_str_rejected_by_client() {
    let (mut directory, public) = fixed_directory(8);
    directory.update().unwrap();

    let request = lookup("ghost");
    let mut response = match &request {
        Request::KeyLookup(req) => directory.key_lookup(req),
        _ => unreachable!(),
    };
    let dr = response.directory_response.as_mut().unwrap();
    let str_msg = dr.str.as_mut().unwrap();
    str_msg.tree_hash = hex::encode([0u8; 32]);

    let mut client = ClientVerifier::new(public);
    assert_eq!(
        client.verify_response(&request, None, &response),
        ErrorCode::BadSignature
    );
}

#[test]
fn test_wrong_vrf_proof_rejected_by_client() {
    let (mut directory, public) = fixed_directory(9);
    match registration("alice", b"alice key") {
        Request::Registration(req) => directory.register(&req),
        _ => unreachable!(),
    };
    directory.update().unwrap();

    // Answer a lookup for "alice" but claim it is for "bob".
    let response = directory.key_lookup(&KeyLookupRequest {
        username: "alice".into(),
    });
    let request = lookup("bob");
    let mut client = ClientVerifier::new(public);
    assert_eq!(
        client.verify_response(&request, None, &response),
        ErrorCode::BadVrfProof
    );
}

#[test]
fn test_lookup_in_epoch_with_str_range() {
    let (mut directory, public) = fixed_directory(10);
    match registration("alice", b"v1") {
        Request::Registration(req) => directory.register(&req),
        _ => unreachable!(),
    };
    directory.update().unwrap(); // epoch 1: alice committed
    directory.update().unwrap(); // epoch 2
    directory.update().unwrap(); // epoch 3

    let request = Request::KeyLookupInEpoch(KeyLookupInEpochRequest {
        username: "alice".into(),
        epoch: 1,
    });
    let response = match &request {
        Request::KeyLookupInEpoch(req) => directory.key_lookup_in_epoch(req),
        _ => unreachable!(),
    };
    assert_eq!(response.error, ErrorCode::Success);
    let strs = response
        .directory_response
        .as_ref()
        .unwrap()
        .strs
        .as_ref()
        .unwrap();
    assert_eq!(strs.len(), 3, "range must run from the epoch to the latest");

    let mut client = ClientVerifier::new(public);
    assert_eq!(
        client.verify_response(&request, Some(b"v1"), &response),
        ErrorCode::Passed
    );
    // The verifier adopted the end of the verified chain.
    assert_eq!(client.saved_str().unwrap().epoch, 3);
}

#[test]
fn test_monitoring_through_client() {
    let (mut directory, public) = fixed_directory(11);
    match registration("alice", b"stable key") {
        Request::Registration(req) => directory.register(&req),
        _ => unreachable!(),
    };
    for _ in 0..4 {
        directory.update().unwrap();
    }

    let request = Request::Monitoring(MonitoringRequest {
        username: "alice".into(),
        start_epoch: 1,
        end_epoch: 4,
    });
    let response = match &request {
        Request::Monitoring(req) => directory.monitor(req),
        _ => unreachable!(),
    };
    assert_eq!(response.error, ErrorCode::Success);

    let mut client = ClientVerifier::new(public);
    assert_eq!(
        client.verify_response(&request, Some(b"stable key"), &response),
        ErrorCode::Passed
    );
}

#[test]
fn test_vrf_rotation_preserves_bindings_through_directory() {
    // S6 at the service level: rotate the VRF key via a policy change.
    let (mut directory, public) = fixed_directory(12);
    let names: Vec<String> = (0..20).map(|i| format!("user{i}")).collect();
    for name in &names {
        match registration(name, name.as_bytes()) {
            Request::Registration(req) => directory.register(&req),
            _ => unreachable!(),
        };
    }
    directory.update().unwrap();

    let mut rng = ChaCha20Rng::seed_from_u64(120);
    let rotated = Policies::new(DEFAULT_HASH_ID, vrf::SecretKey::generate(&mut rng));
    directory.set_policies(rotated);
    directory.update().unwrap();

    let mut client = ClientVerifier::new(public);
    for name in &names {
        let request = lookup(name);
        let response = match &request {
            Request::KeyLookup(req) => directory.key_lookup(req),
            _ => unreachable!(),
        };
        assert_eq!(response.error, ErrorCode::Success, "{name} lost its binding");
        assert_eq!(
            client.verify_response(&request, Some(name.as_bytes()), &response),
            ErrorCode::Passed
        );
    }
}

#[test]
fn test_persistence_round_trip_through_store() {
    let (signer, vrf_key) = fixed_keys(13);
    let public = signer.public();
    let policies = Policies::new(DEFAULT_HASH_ID, vrf_key.clone());
    let mut directory = Directory::new(policies, signer, 128, TreeHasher::default()).unwrap();

    for name in ["alice", "bob", "carol"] {
        match registration(name, name.as_bytes()) {
            Request::Registration(req) => directory.register(&req),
            _ => unreachable!(),
        };
    }
    directory.update().unwrap();

    let store = MemoryEpochStore::new();
    store.save_epoch(&directory.export_latest()).unwrap();

    // Simulate a restart: rebuild from config keys plus the stored record.
    let (signer2, _) = fixed_keys(13);
    let restored = Directory::restore(
        Policies::new(DEFAULT_HASH_ID, vrf_key),
        signer2,
        128,
        TreeHasher::default(),
        store.load_latest().unwrap().unwrap(),
    )
    .unwrap();

    assert_eq!(restored.latest_epoch(), 1);
    assert_eq!(
        restored.latest_str().tree_hash,
        directory.latest_str().tree_hash
    );

    let mut client = ClientVerifier::new(public);
    let request = lookup("bob");
    let response = match &request {
        Request::KeyLookup(req) => restored.key_lookup(req),
        _ => unreachable!(),
    };
    assert_eq!(response.error, ErrorCode::Success);
    assert_eq!(
        client.verify_response(&request, Some(b"bob"), &response),
        ErrorCode::Passed
    );
}

#[test]
fn test_client_rejects_unauditable_epoch_gap() {
    // The verifier pins epoch 0 at registration; a bare lookup two epochs
    // later leaves a link it cannot check.
    let (mut directory, public) = fixed_directory(15);
    let mut client = ClientVerifier::new(public);

    let request = registration("alice", b"k");
    let response = match &request {
        Request::Registration(req) => directory.register(req),
        _ => unreachable!(),
    };
    assert_eq!(
        client.verify_response(&request, None, &response),
        ErrorCode::Passed
    );

    directory.update().unwrap();
    directory.update().unwrap();

    let request = lookup("alice");
    let response = match &request {
        Request::KeyLookup(req) => directory.key_lookup(req),
        _ => unreachable!(),
    };
    assert_eq!(
        client.verify_response(&request, None, &response),
        ErrorCode::BadStr
    );
}

#[test]
fn test_client_rejects_replayed_old_str() {
    let (mut directory, public) = fixed_directory(16);
    match registration("alice", b"k") {
        Request::Registration(req) => directory.register(&req),
        _ => unreachable!(),
    };
    directory.update().unwrap();

    let request = lookup("alice");
    let stale_response = match &request {
        Request::KeyLookup(req) => directory.key_lookup(req),
        _ => unreachable!(),
    };
    directory.update().unwrap();
    let fresh_response = match &request {
        Request::KeyLookup(req) => directory.key_lookup(req),
        _ => unreachable!(),
    };

    let mut client = ClientVerifier::new(public);
    assert_eq!(
        client.verify_response(&request, None, &fresh_response),
        ErrorCode::Passed
    );
    // Serving the epoch-1 response again is a rollback.
    assert_eq!(
        client.verify_response(&request, None, &stale_response),
        ErrorCode::BadEpoch
    );
}

#[test]
fn test_client_detects_broken_monitoring_chain() {
    let (mut directory, public) = fixed_directory(17);
    match registration("alice", b"k") {
        Request::Registration(req) => directory.register(&req),
        _ => unreachable!(),
    };
    for _ in 0..3 {
        directory.update().unwrap();
    }

    let request = Request::Monitoring(MonitoringRequest {
        username: "alice".into(),
        start_epoch: 1,
        end_epoch: 3,
    });
    let mut response = match &request {
        Request::Monitoring(req) => directory.monitor(req),
        _ => unreachable!(),
    };

    // Drop the middle epoch: every signature still verifies, but the chain
    // now jumps from epoch 1 to epoch 3.
    let dr = response.directory_response.as_mut().unwrap();
    dr.strs.as_mut().unwrap().remove(1);
    dr.aps.as_mut().unwrap().remove(1);

    let mut client = ClientVerifier::new(public);
    assert_eq!(
        client.verify_response(&request, Some(b"k"), &response),
        ErrorCode::BadHashChain
    );
}

#[test]
fn test_duplicate_registration_verified_through_client() {
    let (mut directory, public) = fixed_directory(14);
    match registration("alice", b"first key") {
        Request::Registration(req) => directory.register(&req),
        _ => unreachable!(),
    };
    directory.update().unwrap();

    let request = registration("alice", b"second key");
    let response = match &request {
        Request::Registration(req) => directory.register(req),
        _ => unreachable!(),
    };
    assert_eq!(response.error, ErrorCode::NameExisted);

    let mut client = ClientVerifier::new(public);
    assert_eq!(
        client.verify_response(&request, None, &response),
        ErrorCode::NameExisted
    );
}
