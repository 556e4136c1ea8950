//! API Layer Module
//!
//! The HTTP surface of the directory: the Axum application state and
//! router, the request handlers, and the epoch timer task.

pub mod routes;
pub mod server;

// Re-exports for convenience
pub use server::{create_router, spawn_epoch_timer, start_server, AppState, SharedAppState};
