//! Sync trigger and history handlers

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::info;

use crate::api::server::AppState;
use crate::error::RuleSyncError;

/// Run a full sync pass over all enabled providers
pub async fn sync_all(State(state): State<AppState>) -> Result<impl IntoResponse, RuleSyncError> {
    info!("Manual sync requested");
    let all_succeeded = state.engine.sync_all().await?;

    let record = state.engine.history().last().cloned();
    Ok(Json(json!({
        "success": all_succeeded,
        "record": record,
    })))
}

/// Sync a single provider by name
pub async fn sync_one(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, RuleSyncError> {
    info!(provider = %name, "Manual provider sync requested");
    let succeeded = state.engine.sync_one(&name).await?;

    Ok(Json(json!({
        "provider": name,
        "success": succeeded,
    })))
}

/// Sync history, newest first
pub async fn history(State(state): State<AppState>) -> impl IntoResponse {
    let mut records = state.engine.history();
    records.reverse();
    Json(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::server::test_support::app_state;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sync_one_unknown_provider_is_client_error() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);

        let err = sync_one(State(state), Path("nope".to_string()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RuleSyncError::ProviderNotFound { .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_starts_empty() {
        let dir = TempDir::new().unwrap();
        let response = history(State(app_state(&dir))).await.into_response();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!([]));
    }
}
