//! Persisted agent configuration
//!
//! One JSON document in the agent's config directory. Created with defaults
//! on first run; the store hands out snapshots and persists mutations back
//! to disk.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, RuleSyncError};
use crate::models::RuleProvider;

/// Default scheduled-sync interval (12 hours)
const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 12 * 60 * 60;

/// Default presence-check interval
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 5;

/// Agent configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the proxy's control API
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Bearer secret for the control API (empty = none)
    #[serde(default)]
    pub api_secret: String,
    /// Port for the agent's own status API
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    /// Seconds between scheduled sync passes
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,
    /// Seconds between presence checks
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Timestamp of the last completed sync pass
    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Configured rule sources
    #[serde(default)]
    pub rule_providers: Vec<RuleProvider>,
}

fn default_api_url() -> String {
    crate::control::DEFAULT_API_URL.to_string()
}

fn default_web_port() -> u16 {
    8899
}

fn default_update_interval() -> u64 {
    DEFAULT_UPDATE_INTERVAL_SECS
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_secret: String::new(),
            web_port: default_web_port(),
            update_interval_secs: DEFAULT_UPDATE_INTERVAL_SECS,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            last_sync_time: None,
            rule_providers: Vec::new(),
        }
    }
}

impl Config {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

/// Shared handle to the persisted configuration
#[derive(Debug, Clone)]
pub struct ConfigStore {
    inner: Arc<RwLock<Config>>,
    path: Arc<PathBuf>,
}

impl ConfigStore {
    /// Load the configuration from `path`, creating it with defaults when the
    /// file does not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let config = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let mut config: Config = serde_json::from_str(&data)
                .map_err(|e| RuleSyncError::InvalidConfig(format!("{}: {}", path.display(), e)))?;

            if config.update_interval_secs == 0 {
                info!("Invalid update interval in config, falling back to 12h");
                config.update_interval_secs = DEFAULT_UPDATE_INTERVAL_SECS;
            }
            if config.check_interval_secs == 0 {
                config.check_interval_secs = DEFAULT_CHECK_INTERVAL_SECS;
            }

            config
        } else {
            info!("No configuration found, writing defaults to {}", path.display());
            Config::default()
        };

        let store = Self {
            inner: Arc::new(RwLock::new(config)),
            path: Arc::new(path),
        };
        store.persist()?;
        Ok(store)
    }

    /// Load from the default location (see [`config_dir`]).
    pub fn load_default() -> Result<Self> {
        Self::load(config_dir().join("config.json"))
    }

    /// Copy of the current configuration
    pub fn snapshot(&self) -> Config {
        self.inner.read().clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Enabled providers only, in configured order
    pub fn enabled_providers(&self) -> Vec<RuleProvider> {
        self.inner
            .read()
            .rule_providers
            .iter()
            .filter(|p| p.enabled)
            .cloned()
            .collect()
    }

    /// Look up a provider by name
    pub fn provider(&self, name: &str) -> Option<RuleProvider> {
        self.inner
            .read()
            .rule_providers
            .iter()
            .find(|p| p.name == name)
            .cloned()
    }

    /// Flip a provider's enabled flag and persist. Errors if the name is unknown.
    pub fn set_provider_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        {
            let mut config = self.inner.write();
            let provider = config
                .rule_providers
                .iter_mut()
                .find(|p| p.name == name)
                .ok_or_else(|| RuleSyncError::ProviderNotFound {
                    name: name.to_string(),
                })?;
            provider.enabled = enabled;
        }
        self.persist()
    }

    /// Replace the whole provider list (dashboard config form) and persist.
    pub fn replace_providers(&self, providers: Vec<RuleProvider>) -> Result<()> {
        self.inner.write().rule_providers = providers;
        self.persist()
    }

    /// Record the control API endpoint discovered at startup and persist.
    pub fn set_api_endpoint(&self, url: String, secret: String) -> Result<()> {
        {
            let mut config = self.inner.write();
            config.api_url = url;
            config.api_secret = secret;
        }
        self.persist()
    }

    /// Stamp the last completed sync pass (callers persist separately).
    pub fn mark_synced(&self) {
        self.inner.write().last_sync_time = Some(Utc::now());
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.inner.read().last_sync_time
    }

    /// When the next scheduled pass is due, if a pass has ever completed
    pub fn next_sync_due(&self) -> Option<DateTime<Utc>> {
        let config = self.inner.read();
        let last = config.last_sync_time?;
        Some(last + chrono::Duration::seconds(config.update_interval_secs as i64))
    }

    /// Write the current configuration to disk.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&*self.inner.read())?;
        std::fs::write(self.path.as_ref(), data)?;
        Ok(())
    }
}

/// The agent's config directory: `RULESYNC_CONFIG_DIR` when set, otherwise
/// the platform config dir plus `rulesync`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = env::var("RULESYNC_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rulesync")
}

/// Directory holding one rule file per enabled provider
pub fn rules_dir() -> PathBuf {
    config_dir().join("rules")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderKind;
    use tempfile::TempDir;

    fn sample_provider(name: &str, enabled: bool) -> RuleProvider {
        RuleProvider {
            name: name.to_string(),
            url: format!("https://example.com/{}.txt", name),
            kind: ProviderKind::Domain,
            path: format!("{}.yaml", name),
            enabled,
        }
    }

    #[test]
    fn test_load_creates_default_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let store = ConfigStore::load(&path).unwrap();
        assert!(path.exists());

        let config = store.snapshot();
        assert_eq!(config.api_url, "http://127.0.0.1:9090");
        assert_eq!(config.web_port, 8899);
        assert_eq!(config.update_interval_secs, 12 * 60 * 60);
        assert!(config.rule_providers.is_empty());
    }

    #[test]
    fn test_load_corrects_zero_interval() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"update_interval_secs": 0}"#).unwrap();

        let store = ConfigStore::load(&path).unwrap();
        assert_eq!(store.snapshot().update_interval_secs, 12 * 60 * 60);
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        let err = ConfigStore::load(&path).unwrap_err();
        assert!(matches!(err, RuleSyncError::InvalidConfig(_)));
    }

    #[test]
    fn test_provider_round_trip_and_toggle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let store = ConfigStore::load(&path).unwrap();
        {
            let mut config = store.inner.write();
            config.rule_providers = vec![
                sample_provider("cn_domain", true),
                sample_provider("ads", false),
            ];
        }
        store.persist().unwrap();

        let enabled = store.enabled_providers();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "cn_domain");

        store.set_provider_enabled("ads", true).unwrap();

        // Reload from disk: the flip must have been persisted
        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.enabled_providers().len(), 2);

        let err = store.set_provider_enabled("nope", true).unwrap_err();
        assert!(matches!(err, RuleSyncError::ProviderNotFound { .. }));
    }

    #[test]
    fn test_next_sync_due() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::load(dir.path().join("config.json")).unwrap();

        assert!(store.next_sync_due().is_none());

        store.mark_synced();
        let due = store.next_sync_due().unwrap();
        let last = store.last_sync().unwrap();
        assert_eq!(due - last, chrono::Duration::hours(12));
    }
}
