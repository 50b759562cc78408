//! API route definitions

use axum::routing::{get, post, put};
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Agent status
        .route("/status", get(handlers::status::status))
        // Sync
        .route("/sync", post(handlers::sync::sync_all))
        .route("/sync/:name", post(handlers::sync::sync_one))
        .route("/history", get(handlers::sync::history))
        // Providers
        .route("/providers", get(handlers::providers::list_providers))
        .route("/providers", put(handlers::providers::replace_providers))
        .route(
            "/providers/:name/enabled",
            put(handlers::providers::set_enabled),
        )
        // Proxy process
        .route("/restart", post(handlers::process::restart))
}
