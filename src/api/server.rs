//! API Server Module
//!
//! Provides the Axum application builder and server startup logic, plus the
//! epoch timer task that periodically cuts a new STR.
//!
//! The directory sits behind a single reader-writer lock: lookups take the
//! shared side, registrations and epoch cuts the exclusive side.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::directory::Directory;
use crate::logging::log_epoch_event;
use crate::storage::EpochStore;

use super::routes;

/// Combined application state for all API endpoints
pub struct AppState {
    /// The directory behind its reader-writer lock
    pub directory: RwLock<Directory>,
    /// Optional epoch persistence
    pub store: Option<Box<dyn EpochStore>>,
    /// Seconds between epoch cuts; SIGUSR2 reloads update this live
    pub epoch_deadline_secs: AtomicU64,
}

/// Shared application state type
pub type SharedAppState = Arc<AppState>;

impl AppState {
    /// Create new application state around a directory
    pub fn new(
        directory: Directory,
        store: Option<Box<dyn EpochStore>>,
        epoch_deadline_secs: u64,
    ) -> SharedAppState {
        Arc::new(Self {
            directory: RwLock::new(directory),
            store,
            epoch_deadline_secs: AtomicU64::new(epoch_deadline_secs),
        })
    }
}

/// Create the API router with all endpoints
pub fn create_router(state: SharedAppState) -> axum::Router {
    use axum::routing::{get, post};

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    axum::Router::new()
        .route("/api/health", get(routes::handle_health))
        .route("/v1/directory", post(routes::handle_directory))
        .route("/v1/str/:epoch", get(routes::handle_get_str))
        .layer(cors)
        .with_state(state)
}

/// Spawn the periodic epoch timer. Each tick takes the write lock, cuts the
/// next epoch, and persists it when a store is configured.
pub fn spawn_epoch_timer(state: SharedAppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let deadline = state.epoch_deadline_secs.load(Ordering::Relaxed).max(1);
            tokio::time::sleep(Duration::from_secs(deadline)).await;

            let started = Instant::now();
            let mut directory = state.directory.write().await;
            match directory.update() {
                Ok(str_next) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    log_epoch_event(
                        str_next.epoch,
                        &hex::encode(str_next.tree_hash),
                        duration_ms,
                    );
                    if let Some(store) = state.store.as_deref() {
                        let record = directory.export_latest();
                        // Only the most recent epoch is needed for resume.
                        if let Err(err) = store
                            .save_epoch(&record)
                            .and_then(|_| store.prune_below(record.epoch))
                        {
                            error!(target: "keydex::storage", error = %err, "failed to persist epoch");
                        }
                    }
                }
                Err(err) => {
                    error!(target: "keydex::epoch", error = %err, "epoch cut failed");
                }
            }
        }
    })
}

/// Start the API server, draining in-flight requests when `shutdown`
/// resolves.
pub async fn start_server(
    state: SharedAppState,
    listen_addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!(target: "keydex::system", %listen_addr, "directory server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
