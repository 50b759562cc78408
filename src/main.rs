//! RuleSync Agent - Entry Point
//!
//! Starts the presence monitor, sync scheduler, and status API with graceful
//! shutdown support.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod control;
mod error;
mod models;
mod rules;
mod services;
mod watchdog;

use api::ApiServer;
use config::ConfigStore;
use control::{ControlApi, ControlApiConfig};
use rules::{FetcherConfig, SyncEngine};
use services::{SchedulerHandle, SyncScheduler};
use watchdog::{
    MonitorConfig, MonitorHandle, ProcessMonitor, RecoveryConfig, RecoveryManager,
};

/// Grace period between the proxy appearing and the first sync attempt
const STARTUP_SYNC_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> error::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rulesync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting RuleSync agent");

    // Load configuration
    let config = ConfigStore::load_default()?;
    info!("Configuration loaded from {}", config.path().display());

    // Detect the proxy's control endpoint from its own config files; the
    // persisted endpoint is only a fallback
    if let Some(endpoint) = control::detect_endpoint() {
        info!("Detected proxy control API at {}", endpoint.url);
        config.set_api_endpoint(endpoint.url, endpoint.secret)?;
    } else {
        info!(
            "No proxy control API detected, using configured {}",
            config.snapshot().api_url
        );
    }

    let snapshot = config.snapshot();
    let control = Arc::new(ControlApi::new(
        &snapshot.api_url,
        &snapshot.api_secret,
        ControlApiConfig::default(),
    ));

    let engine = Arc::new(SyncEngine::new(
        config.clone(),
        FetcherConfig::default(),
        config::rules_dir(),
    ));
    let recovery = Arc::new(RecoveryManager::new(
        control.clone(),
        RecoveryConfig::default(),
    ));

    // Presence monitor with the activation callbacks: a full sync pass runs
    // shortly after the proxy appears, followed by a reload and restart so
    // the refreshed bypass list takes effect
    let monitor_config = MonitorConfig {
        check_interval: snapshot.check_interval(),
    };
    // One activation sync per observed proxy session. Without this guard the
    // agent's own post-sync restart would re-trigger the activation sync and
    // restart the proxy again.
    let synced_this_session = Arc::new(AtomicBool::new(false));
    let on_start = {
        let engine = engine.clone();
        let config = config.clone();
        let control = control.clone();
        let recovery = recovery.clone();
        let synced = synced_this_session.clone();
        Box::new(move || {
            if synced.swap(true, Ordering::SeqCst) {
                return;
            }
            let engine = engine.clone();
            let config = config.clone();
            let control = control.clone();
            let recovery = recovery.clone();
            tokio::spawn(async move {
                tokio::time::sleep(STARTUP_SYNC_DELAY).await;
                initial_sync(&engine, &config, &control, &recovery).await;
            });
        })
    };
    let on_stop = {
        let synced = synced_this_session.clone();
        Box::new(move || {
            synced.store(false, Ordering::SeqCst);
            warn!("Proxy stopped, scheduled syncs are paused until it returns");
        })
    };
    let monitor = Arc::new(
        ProcessMonitor::new(control.clone(), monitor_config).on_transitions(on_start, on_stop),
    );

    let scheduler = SyncScheduler::new(
        engine.clone(),
        config.clone(),
        monitor.clone(),
        control.clone(),
        recovery.clone(),
    );

    let api_server = ApiServer::new(
        snapshot.web_port,
        engine.clone(),
        monitor.clone(),
        recovery.clone(),
        control.clone(),
        config.clone(),
    );

    // Create shutdown channels
    let (shutdown_tx, _) = watch::channel(false);

    let (monitor_handle, monitor_shutdown) = MonitorHandle::new();
    let monitor_task = {
        let monitor = monitor.clone();
        tokio::spawn(async move {
            monitor.run(monitor_shutdown).await;
        })
    };

    let (scheduler_handle, scheduler_shutdown) = SchedulerHandle::new();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    let api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!(
        "Agent started - status API on 127.0.0.1:{}",
        snapshot.web_port
    );

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    monitor_handle.shutdown();
    scheduler_handle.shutdown();

    let _ = tokio::join!(monitor_task, scheduler_task, api_task);

    info!("RuleSync agent stopped");
    Ok(())
}

/// First sync pass after the proxy appears
async fn initial_sync(
    engine: &SyncEngine,
    config: &ConfigStore,
    control: &ControlApi,
    recovery: &RecoveryManager,
) {
    // Persist, reload and restart only follow a fully successful pass
    match engine.sync_all().await {
        Ok(true) => {
            info!("Initial sync completed");
            if let Err(e) = config.persist() {
                warn!("Could not persist configuration: {}", e);
            }
            if let Err(e) = control.reload().await {
                warn!("Settings reload failed: {}", e);
            }
            info!("Restarting proxy to apply refreshed rules");
            if let Err(e) = recovery.restart().await {
                error!("Proxy restart failed: {}", e);
            }
        }
        Ok(false) => {
            warn!("Initial sync completed with provider failures, leaving the proxy alone");
        }
        Err(e) => error!("Initial sync failed: {}", e),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
