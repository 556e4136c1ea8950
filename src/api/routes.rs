//! API Route Handlers
//!
//! - `POST /v1/directory` - the type-tagged request envelope
//! - `GET  /v1/str/:epoch` - fetch a single STR
//! - `GET  /api/health` - health check

use axum::{
    extract::{Path, State},
    Json,
};

use crate::logging::log_security_event;
use crate::protocol::{DirectoryResponse, ErrorCode, Request, Response};

use super::server::SharedAppState;

/// POST /v1/directory
///
/// Accepts the wire envelope `{ "type": <0..3>, "request": { ... } }` and
/// returns `{ "error": <code>, "directory_response": { ... } }`.
///
/// Registration takes the directory write lock; lookups and monitoring run
/// under the shared lock.
pub async fn handle_directory(
    State(state): State<SharedAppState>,
    Json(body): Json<serde_json::Value>,
) -> Json<Response> {
    let request = match Request::from_value(body) {
        Ok(request) => request,
        Err(code) => {
            log_security_event(
                "malformed directory request",
                serde_json::json!({ "code": u16::from(code) }),
            );
            return Json(Response::error(code));
        }
    };

    let response = match &request {
        Request::Registration(req) => {
            let mut directory = state.directory.write().await;
            directory.register(req)
        }
        Request::KeyLookup(req) => {
            let directory = state.directory.read().await;
            directory.key_lookup(req)
        }
        Request::KeyLookupInEpoch(req) => {
            let directory = state.directory.read().await;
            directory.key_lookup_in_epoch(req)
        }
        Request::Monitoring(req) => {
            let directory = state.directory.read().await;
            directory.monitor(req)
        }
    };
    Json(response)
}

/// GET /v1/str/:epoch
///
/// Convenience endpoint returning a bare STR for auditors.
pub async fn handle_get_str(
    State(state): State<SharedAppState>,
    Path(epoch): Path<u64>,
) -> Json<Response> {
    let directory = state.directory.read().await;
    if epoch > directory.latest_epoch() {
        return Json(Response::error(ErrorCode::EpochOutOfRange));
    }
    match directory.get_str_message(epoch) {
        Some(str_message) => Json(Response {
            error: ErrorCode::Success,
            directory_response: Some(DirectoryResponse {
                str: Some(str_message),
                ..Default::default()
            }),
        }),
        None => Json(Response::error(ErrorCode::StrNotFound)),
    }
}

/// GET /api/health
///
/// Health check endpoint.
pub async fn handle_health(State(state): State<SharedAppState>) -> Json<serde_json::Value> {
    let directory = state.directory.read().await;
    Json(serde_json::json!({
        "status": "ok",
        "service": "keydex",
        "version": env!("CARGO_PKG_VERSION"),
        "epoch": directory.latest_epoch(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::server::AppState;
    use crate::crypto::vrf;
    use crate::crypto::{KeyPair, TreeHasher, DEFAULT_HASH_ID};
    use crate::directory::Directory;
    use crate::pad::Policies;
    use rand::rngs::OsRng;

    fn test_state() -> SharedAppState {
        let policies = Policies::new(DEFAULT_HASH_ID, vrf::SecretKey::generate(&mut OsRng));
        let signer = KeyPair::generate(&mut OsRng);
        let directory = Directory::new(policies, signer, 10, TreeHasher::default()).unwrap();
        AppState::new(directory, None, 60)
    }

    #[tokio::test]
    async fn test_directory_endpoint_registration_flow() {
        let state = test_state();

        let body = serde_json::json!({
            "type": 0,
            "request": { "username": "alice", "key": hex::encode(b"key material") }
        });
        let Json(response) = handle_directory(State(state.clone()), Json(body)).await;
        assert_eq!(response.error, ErrorCode::Success);
        let dr = response.directory_response.unwrap();
        assert!(dr.str.is_some() && dr.ap.is_some() && dr.tb.is_some());

        let body = serde_json::json!({
            "type": 1,
            "request": { "username": "alice" }
        });
        let Json(response) = handle_directory(State(state), Json(body)).await;
        assert_eq!(response.error, ErrorCode::Success);
    }

    #[tokio::test]
    async fn test_directory_endpoint_rejects_malformed_envelope() {
        let state = test_state();
        let body = serde_json::json!({ "type": 7, "request": {} });
        let Json(response) = handle_directory(State(state.clone()), Json(body)).await;
        assert_eq!(response.error, ErrorCode::MalformedClientMessage);

        let body = serde_json::json!({ "request": { "username": "alice" } });
        let Json(response) = handle_directory(State(state), Json(body)).await;
        assert_eq!(response.error, ErrorCode::MalformedClientMessage);
    }

    #[tokio::test]
    async fn test_str_endpoint_bounds() {
        let state = test_state();
        {
            let mut directory = state.directory.write().await;
            directory.update().unwrap();
        }

        let Json(response) = handle_get_str(State(state.clone()), Path(1)).await;
        assert_eq!(response.error, ErrorCode::Success);
        assert_eq!(response.directory_response.unwrap().str.unwrap().epoch, 1);

        let Json(response) = handle_get_str(State(state), Path(9)).await;
        assert_eq!(response.error, ErrorCode::EpochOutOfRange);
    }

    #[tokio::test]
    async fn test_health_reports_epoch() {
        let state = test_state();
        let Json(health) = handle_health(State(state)).await;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["epoch"], 0);
    }
}
