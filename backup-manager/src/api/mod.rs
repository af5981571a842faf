//! HTTP API module for the backup manager.

pub mod backup;
pub mod error;
pub mod health;

use crate::events::BroadcastSink;
use crate::manager::BackupManager;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: BackupManager,
    /// Event stream served to WebSocket clients
    pub events: BroadcastSink,
}

/// Create the API router with all endpoints
pub fn create_router_with_state(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        // Backup endpoints
        .route(
            "/entities/{id}/backups",
            get(backup::list_backups).post(backup::create_backup),
        )
        .route("/entities/{id}/backups/cancel", post(backup::cancel_backup))
        .route("/entities/{id}/backups/status", get(backup::backup_status))
        .route("/entities/{id}/backups/{filename}", delete(backup::delete_backup))
        .route(
            "/entities/{id}/backups/{filename}/restore",
            post(backup::restore_backup),
        )
        // WebSocket endpoint
        .route("/ws", get(crate::ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
