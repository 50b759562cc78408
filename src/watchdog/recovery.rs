//! Process recovery
//!
//! Forced restart of the proxy: terminate every matching process while
//! remembering how the last one was started, wait for the OS to settle,
//! relaunch through the template or the platform launcher chain, then verify
//! the proxy actually came back. The observed launch template is cached on
//! disk so recovery still works when the proxy was not running at all.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sysinfo::System;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::config_dir;
use crate::control::ControlApi;
use crate::error::{Result, RuleSyncError};
use crate::models::RelaunchTemplate;
use crate::watchdog::{is_known_process, launch, matches_known_process};

/// Recovery timing and cache location
#[derive(Clone)]
pub struct RecoveryConfig {
    /// Pause between termination and relaunch
    pub settle_wait: Duration,
    /// Post-launch verification attempts
    pub verify_attempts: u32,
    /// Pause between verification attempts
    pub verify_interval: Duration,
    /// Where the last observed launch template is cached
    pub cache_path: PathBuf,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            settle_wait: Duration::from_secs(1),
            verify_attempts: 5,
            verify_interval: Duration::from_secs(1),
            cache_path: config_dir().join("relaunch.json"),
        }
    }
}

/// Kills and relaunches the proxy
pub struct RecoveryManager {
    control: Arc<ControlApi>,
    config: RecoveryConfig,
}

impl RecoveryManager {
    pub fn new(control: Arc<ControlApi>, config: RecoveryConfig) -> Self {
        Self { control, config }
    }

    /// Restart the proxy. Termination and launch failures are logged and
    /// never abort the sequence; verification always runs, and its outcome is
    /// the result. `Timeout` is the only failure this returns.
    #[instrument(skip(self))]
    pub async fn restart(&self) -> Result<()> {
        let cached = self.load_cached_template();
        let observed = self.terminate_matching(cached.as_ref());

        sleep(self.config.settle_wait).await;

        // The just-observed template first, the cached one second when it
        // points at a different executable, then the launcher chain
        let mut launched = false;
        if let Some(template) = &observed {
            if launch::spawn_template(template) {
                launched = true;
                self.cache_template(template);
            }
        }
        if !launched {
            if let Some(template) = &cached {
                let same_path = observed.as_ref().map(|o| o.path == template.path);
                if same_path != Some(true) && launch::spawn_template(template) {
                    launched = true;
                }
            }
        }
        if !launched {
            launched = launch::launch_via_fallbacks();
        }
        if !launched {
            // The proxy may still come up through an external launcher, so
            // verification runs regardless
            warn!("No launch strategy accepted the restart request");
        }

        self.verify().await
    }

    /// Kill every process loosely matching a known proxy name. Returns the
    /// launch template of the last match, which on multi-process proxies is
    /// the main binary rather than a helper.
    fn terminate_matching(&self, cached: Option<&RelaunchTemplate>) -> Option<RelaunchTemplate> {
        let mut sys = System::new();
        sys.refresh_processes();

        let mut template = None;
        for process in sys.processes().values() {
            if !matches_known_process(process.name()) {
                continue;
            }

            if let Some(observed) = template_from_process(
                process.exe(),
                process.cmd(),
                cached,
            ) {
                template = Some(observed);
            }

            info!("Terminating {} (pid {})", process.name(), process.pid());
            if !process.kill() {
                warn!("Could not terminate pid {}", process.pid());
            }
        }
        template
    }

    /// Confirm the proxy came back, by process table or control API.
    async fn verify(&self) -> Result<()> {
        for attempt in 1..=self.config.verify_attempts {
            sleep(self.config.verify_interval).await;

            if proxy_process_present() || self.control.probe().await {
                info!("Proxy is back up (attempt {})", attempt);
                return Ok(());
            }
            debug!(
                "Proxy not up yet (attempt {}/{})",
                attempt, self.config.verify_attempts
            );
        }
        warn!("Proxy did not come back after restart");
        Err(RuleSyncError::Timeout)
    }

    fn load_cached_template(&self) -> Option<RelaunchTemplate> {
        let data = std::fs::read_to_string(&self.config.cache_path).ok()?;
        match serde_json::from_str(&data) {
            Ok(template) => Some(template),
            Err(e) => {
                warn!("Ignoring corrupt relaunch cache: {}", e);
                None
            }
        }
    }

    fn cache_template(&self, template: &RelaunchTemplate) {
        let write = || -> Result<()> {
            if let Some(parent) = self.config.cache_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let data = serde_json::to_string_pretty(template)?;
            std::fs::write(&self.config.cache_path, data)?;
            Ok(())
        };
        if let Err(e) = write() {
            warn!("Could not cache relaunch template: {}", e);
        }
    }
}

/// Build a launch template from one observed process. The command line's
/// argv[0] is dropped; when the process hides its arguments entirely, the
/// cached template's arguments are reused for the same executable.
fn template_from_process(
    exe: Option<&std::path::Path>,
    cmd: &[String],
    cached: Option<&RelaunchTemplate>,
) -> Option<RelaunchTemplate> {
    let path = exe?.to_path_buf();

    let args = if cmd.len() > 1 {
        cmd[1..].to_vec()
    } else {
        match cached {
            Some(c) if c.path == path => c.args.clone(),
            _ => Vec::new(),
        }
    };

    Some(RelaunchTemplate::new(path, args))
}

fn proxy_process_present() -> bool {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.processes()
        .values()
        .any(|process| is_known_process(process.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlApiConfig;
    use std::path::Path;
    use tempfile::TempDir;

    fn manager(cache_path: PathBuf) -> RecoveryManager {
        let control = Arc::new(ControlApi::new(
            "http://127.0.0.1:9",
            "",
            ControlApiConfig::default(),
        ));
        RecoveryManager::new(
            control,
            RecoveryConfig {
                cache_path,
                ..RecoveryConfig::default()
            },
        )
    }

    #[test]
    fn test_template_cache_round_trip() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path().join("relaunch.json"));

        assert!(manager.load_cached_template().is_none());

        let template = RelaunchTemplate::new("/opt/clash/mihomo", vec!["-d".to_string()]);
        manager.cache_template(&template);
        assert_eq!(manager.load_cached_template(), Some(template));
    }

    #[test]
    fn test_corrupt_cache_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relaunch.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(manager(path).load_cached_template().is_none());
    }

    #[test]
    fn test_template_from_process_drops_argv0() {
        let template = template_from_process(
            Some(Path::new("/usr/bin/mihomo")),
            &[
                "mihomo".to_string(),
                "-d".to_string(),
                "/etc/mihomo".to_string(),
            ],
            None,
        )
        .unwrap();

        assert_eq!(template.path, Path::new("/usr/bin/mihomo"));
        assert_eq!(template.args, vec!["-d", "/etc/mihomo"]);
    }

    #[test]
    fn test_template_from_process_falls_back_to_cached_args() {
        let cached = RelaunchTemplate::new("/usr/bin/mihomo", vec!["-d".to_string()]);

        // Empty command line, same executable: reuse cached arguments
        let template = template_from_process(
            Some(Path::new("/usr/bin/mihomo")),
            &[],
            Some(&cached),
        )
        .unwrap();
        assert_eq!(template.args, vec!["-d"]);

        // Different executable: no argument reuse
        let template = template_from_process(
            Some(Path::new("/usr/bin/clash")),
            &[],
            Some(&cached),
        )
        .unwrap();
        assert!(template.args.is_empty());

        // No executable path at all: nothing to build a template from
        assert!(template_from_process(None, &[], Some(&cached)).is_none());
    }

    #[tokio::test]
    async fn test_restart_with_nothing_to_launch_times_out() {
        let dir = TempDir::new().unwrap();
        let control = Arc::new(ControlApi::new(
            "http://127.0.0.1:9",
            "",
            ControlApiConfig::default(),
        ));
        let manager = RecoveryManager::new(
            control,
            RecoveryConfig {
                settle_wait: Duration::from_millis(10),
                verify_attempts: 2,
                verify_interval: Duration::from_millis(10),
                cache_path: dir.path().join("relaunch.json"),
            },
        );

        // Empty cache, no live proxy, no launcher that works: verification
        // runs its full window and times out
        let err = manager.restart().await.unwrap_err();
        assert!(matches!(err, RuleSyncError::Timeout));
    }

    #[test]
    fn test_default_config_values() {
        let config = RecoveryConfig::default();
        assert_eq!(config.settle_wait, Duration::from_secs(1));
        assert_eq!(config.verify_attempts, 5);
        assert_eq!(config.verify_interval, Duration::from_secs(1));
    }
}
