//! Agent status endpoint

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

/// Current agent status: proxy presence, sync schedule, and provider counts
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.snapshot();
    let enabled = config.rule_providers.iter().filter(|p| p.enabled).count();

    Json(json!({
        "proxy_state": state.monitor.state(),
        "proxy_running": state.monitor.is_running(),
        "api_url": state.control.base_url(),
        "last_sync": state.config.last_sync(),
        "next_sync_due": state.config.next_sync_due(),
        "update_interval_secs": config.update_interval_secs,
        "providers": config.rule_providers.len(),
        "enabled_providers": enabled,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::server::test_support::app_state;
    use axum::response::IntoResponse;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_status_reports_unknown_proxy_before_first_check() {
        let dir = TempDir::new().unwrap();
        let response = status(State(app_state(&dir))).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["proxy_state"], "unknown");
        assert_eq!(json["proxy_running"], false);
        assert_eq!(json["providers"], 0);
        assert!(json["last_sync"].is_null());
    }
}
