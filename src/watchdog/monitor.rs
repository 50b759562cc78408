//! Process presence monitor
//!
//! Polls the OS process table on a fixed interval and edge-detects the
//! proxy's start/stop transitions. When no known process name is found the
//! check falls back to a bounded control-API probe, which covers sandboxed
//! or renamed binaries.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use sysinfo::System;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, instrument};

use crate::control::ControlApi;
use crate::models::ProcessState;
use crate::watchdog::is_known_process;

/// Callback fired on a presence transition
pub type PresenceCallback = Box<dyn Fn() + Send + Sync>;

/// Presence monitor configuration
#[derive(Clone)]
pub struct MonitorConfig {
    /// Interval between presence checks
    pub check_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
        }
    }
}

/// Process presence monitor
pub struct ProcessMonitor {
    control: Arc<ControlApi>,
    config: MonitorConfig,
    state: RwLock<ProcessState>,
    on_start: Option<PresenceCallback>,
    on_stop: Option<PresenceCallback>,
}

impl ProcessMonitor {
    pub fn new(control: Arc<ControlApi>, config: MonitorConfig) -> Self {
        Self {
            control,
            config,
            state: RwLock::new(ProcessState::Unknown),
            on_start: None,
            on_stop: None,
        }
    }

    /// Register the edge-triggered transition callbacks. Must be called
    /// before the monitor is shared and started.
    pub fn on_transitions(mut self, on_start: PresenceCallback, on_stop: PresenceCallback) -> Self {
        self.on_start = Some(on_start);
        self.on_stop = Some(on_stop);
        self
    }

    /// Current state without blocking on a check cycle
    pub fn state(&self) -> ProcessState {
        *self.state.read()
    }

    /// Whether the proxy is currently running
    pub fn is_running(&self) -> bool {
        self.state.read().is_running()
    }

    /// Run the monitor (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting presence monitor with {}s interval",
            self.config.check_interval.as_secs()
        );

        let mut check_interval = interval(self.config.check_interval);

        loop {
            tokio::select! {
                _ = check_interval.tick() => {
                    self.check_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Presence monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One presence check: process-table scan, then API-probe fallback
    pub async fn check_once(&self) {
        let running = if scan_process_table() {
            true
        } else {
            // Sandboxed or renamed binaries never show a known process name
            self.control.probe().await
        };
        self.apply_observation(running);
    }

    /// Fold one liveness observation into the state machine, firing the
    /// transition callbacks exactly once per edge.
    fn apply_observation(&self, running: bool) {
        let previous = {
            let mut state = self.state.write();
            let previous = *state;
            *state = if running {
                ProcessState::Running
            } else {
                ProcessState::Stopped
            };
            previous
        };

        match (previous, running) {
            (ProcessState::Unknown | ProcessState::Stopped, true) => {
                info!("Proxy started");
                if let Some(cb) = &self.on_start {
                    cb();
                }
            }
            (ProcessState::Running, false) => {
                info!("Proxy stopped");
                if let Some(cb) = &self.on_stop {
                    cb();
                }
            }
            _ => debug!("Proxy presence unchanged (running: {})", running),
        }
    }
}

/// Scan the OS process table for any known proxy process name
fn scan_process_table() -> bool {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.processes()
        .values()
        .any(|process| is_known_process(process.name()))
}

/// Guard for managing the monitor lifecycle. Requesting shutdown twice is a
/// no-op, never a double-close fault.
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl MonitorHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for MonitorHandle {
    fn default() -> Self {
        Self::new().0
    }
}
