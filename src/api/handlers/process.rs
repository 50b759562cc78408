//! Proxy process handlers

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::info;

use crate::api::server::AppState;
use crate::error::RuleSyncError;

/// Force a proxy restart
pub async fn restart(State(state): State<AppState>) -> Result<impl IntoResponse, RuleSyncError> {
    info!("Proxy restart requested");
    state.recovery.restart().await?;

    Ok(Json(json!({
        "status": "restarted",
    })))
}
