//! Provider management handlers

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::api::server::AppState;
use crate::error::RuleSyncError;
use crate::models::RuleProvider;

/// List configured providers
pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.snapshot().rule_providers)
}

/// Replace the whole provider list
pub async fn replace_providers(
    State(state): State<AppState>,
    Json(providers): Json<Vec<RuleProvider>>,
) -> Result<impl IntoResponse, RuleSyncError> {
    for provider in &providers {
        if provider.name.is_empty() {
            return Err(RuleSyncError::InvalidConfig(
                "provider name must not be empty".to_string(),
            ));
        }
        if provider.url.is_empty() {
            return Err(RuleSyncError::InvalidConfig(format!(
                "provider {} has no URL",
                provider.name
            )));
        }
    }

    info!("Replacing provider list ({} entries)", providers.len());
    state.config.replace_providers(providers)?;
    Ok(Json(state.config.snapshot().rule_providers))
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

/// Enable or disable one provider
pub async fn set_enabled(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<SetEnabledRequest>,
) -> Result<impl IntoResponse, RuleSyncError> {
    state.config.set_provider_enabled(&name, req.enabled)?;
    info!(provider = %name, enabled = req.enabled, "Provider toggled");

    // set_provider_enabled guarantees the provider exists
    let provider = state
        .config
        .provider(&name)
        .ok_or_else(|| RuleSyncError::ProviderNotFound { name })?;
    Ok(Json(provider))
}
