//! Scheduled sync service
//!
//! Runs a full sync pass on the configured interval. Passes are skipped while
//! the proxy is down; a successful pass ends with a settings reload and a
//! proxy restart so the refreshed bypass list takes effect.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, instrument, warn};

use crate::config::ConfigStore;
use crate::control::ControlApi;
use crate::rules::SyncEngine;
use crate::watchdog::{ProcessMonitor, RecoveryManager};

/// Scheduled sync service
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    config: ConfigStore,
    monitor: Arc<ProcessMonitor>,
    control: Arc<ControlApi>,
    recovery: Arc<RecoveryManager>,
}

impl SyncScheduler {
    pub fn new(
        engine: Arc<SyncEngine>,
        config: ConfigStore,
        monitor: Arc<ProcessMonitor>,
        control: Arc<ControlApi>,
        recovery: Arc<RecoveryManager>,
    ) -> Self {
        Self {
            engine,
            config,
            monitor,
            control,
            recovery,
        }
    }

    /// Run the scheduler
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting sync scheduler with {}s interval",
            self.config.snapshot().update_interval_secs
        );

        // Catch up on a pass that came due while the agent was not running
        if let Some(due) = self.config.next_sync_due() {
            if due <= Utc::now() {
                info!("Scheduled sync overdue since {}, running now", due);
                self.tick().await;
            }
        }

        loop {
            // Interval is re-read each cycle so config edits take effect
            // without a restart
            let mut sync_interval = interval(self.config.snapshot().update_interval());
            sync_interval.tick().await; // Skip immediate tick

            tokio::select! {
                _ = sync_interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Sync scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One scheduled pass
    async fn tick(&self) {
        if !self.monitor.is_running() {
            info!("Proxy is not running, skipping scheduled sync");
            return;
        }

        // Reload and restart only follow a fully successful pass; a partial
        // failure must not bounce the user's proxy
        match self.engine.sync_all().await {
            Ok(true) => info!("Scheduled sync completed"),
            Ok(false) => {
                warn!("Scheduled sync completed with provider failures, leaving the proxy alone");
                return;
            }
            Err(e) => {
                error!("Scheduled sync failed: {}", e);
                return;
            }
        }

        if let Err(e) = self.control.reload().await {
            warn!("Settings reload after sync failed: {}", e);
        }

        // The proxy only reads its settings file at startup
        if let Err(e) = self.recovery.restart().await {
            error!("Proxy restart after sync failed: {}", e);
        }
    }
}

/// Handle for managing the scheduler
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl SchedulerHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for SchedulerHandle {
    fn default() -> Self {
        Self::new().0
    }
}
