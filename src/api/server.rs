//! API server using Axum

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ConfigStore;
use crate::control::ControlApi;
use crate::error::{Result, RuleSyncError};
use crate::rules::SyncEngine;
use crate::watchdog::{ProcessMonitor, RecoveryManager};

use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub monitor: Arc<ProcessMonitor>,
    pub recovery: Arc<RecoveryManager>,
    pub control: Arc<ControlApi>,
    pub config: ConfigStore,
    pub started_at: Instant,
}

/// API server
pub struct ApiServer {
    port: u16,
    state: AppState,
}

impl ApiServer {
    pub fn new(
        port: u16,
        engine: Arc<SyncEngine>,
        monitor: Arc<ProcessMonitor>,
        recovery: Arc<RecoveryManager>,
        control: Arc<ControlApi>,
        config: ConfigStore,
    ) -> Self {
        let state = AppState {
            engine,
            monitor,
            recovery,
            control,
            config,
            started_at: Instant::now(),
        };

        Self { port, state }
    }

    fn build_router(&self) -> axum::Router {
        routes::create_router(self.state.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server. Binds to loopback only; the API is for the local
    /// dashboard, not the network.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let router = self.build_router();

        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| RuleSyncError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::control::ControlApiConfig;
    use crate::rules::FetcherConfig;
    use crate::watchdog::{MonitorConfig, RecoveryConfig};
    use tempfile::TempDir;

    /// State wired to a throwaway config directory and an unreachable proxy
    pub fn app_state(dir: &TempDir) -> AppState {
        let config = ConfigStore::load(dir.path().join("config.json")).unwrap();
        let control = Arc::new(ControlApi::new(
            "http://127.0.0.1:9",
            "",
            ControlApiConfig::default(),
        ));
        let engine = Arc::new(SyncEngine::new(
            config.clone(),
            FetcherConfig::default(),
            dir.path().join("rules"),
        ));
        let monitor = Arc::new(ProcessMonitor::new(
            control.clone(),
            MonitorConfig::default(),
        ));
        let recovery = Arc::new(RecoveryManager::new(
            control.clone(),
            RecoveryConfig {
                cache_path: dir.path().join("relaunch.json"),
                ..RecoveryConfig::default()
            },
        ));

        AppState {
            engine,
            monitor,
            recovery,
            control,
            config,
            started_at: Instant::now(),
        }
    }
}
