//! Rule synchronization engine
//!
//! Orchestrates concurrent fetches across all enabled providers, keeps a
//! bounded history of sync outcomes, and triggers the bypass-list merge.
//! Sync passes are strictly serialized; status reads never observe a
//! half-finished pass.

use std::path::PathBuf;

use chrono::Utc;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::config::ConfigStore;
use crate::error::{Result, RuleSyncError};
use crate::models::{ProviderOutcome, RuleProvider, SyncRecord};
use crate::rules::bypass;
use crate::rules::fetcher::{FetcherConfig, RuleFetcher};

/// Retained sync records; the oldest is evicted beyond this
const HISTORY_LIMIT: usize = 10;

/// Single-provider updates younger than this coalesce into the latest record
const COALESCE_WINDOW_SECS: i64 = 60;

/// Rule synchronization engine
pub struct SyncEngine {
    config: ConfigStore,
    fetcher: RuleFetcher,
    rules_dir: PathBuf,
    /// Explicit settings-file location; `None` resolves per merge
    settings_override: Option<PathBuf>,
    history: RwLock<Vec<SyncRecord>>,
    /// Serializes whole sync passes
    pass_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(config: ConfigStore, fetcher_config: FetcherConfig, rules_dir: PathBuf) -> Self {
        Self {
            config,
            fetcher: RuleFetcher::new(fetcher_config),
            rules_dir,
            settings_override: None,
            history: RwLock::new(Vec::new()),
            pass_lock: Mutex::new(()),
        }
    }

    /// Pin the proxy settings file instead of resolving it per merge
    pub fn with_settings_path(mut self, path: PathBuf) -> Self {
        self.settings_override = Some(path);
        self
    }

    /// Run one full sync pass across all enabled providers.
    ///
    /// Returns `Ok(true)` only when every enabled provider succeeded. A
    /// failed bypass merge is logged but does not affect the result.
    #[instrument(skip(self))]
    pub async fn sync_all(&self) -> Result<bool> {
        let _guard = self.pass_lock.lock().await;

        info!("Starting sync pass for all enabled providers");
        tokio::fs::create_dir_all(&self.rules_dir).await?;

        let providers = self.config.enabled_providers();
        let worker_count = providers.len().max(1);

        let results: Vec<(ProviderOutcome, Option<String>)> =
            futures::stream::iter(providers)
                .map(|provider| self.fetch_task(provider))
                .buffer_unordered(worker_count)
                .collect()
                .await;

        let mut outcomes = Vec::with_capacity(results.len());
        let mut contents = Vec::new();
        let mut all_succeeded = true;

        for (outcome, content) in results {
            all_succeeded &= outcome.succeeded;
            outcomes.push(outcome);
            if let Some(content) = content {
                contents.push(content);
            }
        }

        self.config.mark_synced();
        if let Err(e) = self.config.persist() {
            warn!("Failed to persist last-sync time: {}", e);
        }

        self.push_record(SyncRecord::new(outcomes));

        // Merge whenever anything was readable, independent of per-provider
        // failures.
        if !contents.is_empty() {
            self.merge_bypass(&contents.join("\n")).await;
        }

        info!("Sync pass complete (all succeeded: {})", all_succeeded);
        Ok(all_succeeded)
    }

    /// Update a single provider by name.
    ///
    /// Unlike `sync_all`, the bypass list is re-merged only for providers
    /// matching the direct/local naming convention with a domain-like kind.
    #[instrument(skip(self))]
    pub async fn sync_one(&self, name: &str) -> Result<bool> {
        let _guard = self.pass_lock.lock().await;

        let provider = self
            .config
            .provider(name)
            .ok_or_else(|| RuleSyncError::ProviderNotFound {
                name: name.to_string(),
            })?;
        if !provider.enabled {
            return Err(RuleSyncError::ProviderDisabled {
                name: name.to_string(),
            });
        }

        info!("Updating provider {}", provider.name);
        tokio::fs::create_dir_all(&self.rules_dir).await?;

        let output_path = self.rules_dir.join(&provider.path);
        match self.fetcher.fetch(&provider, &output_path).await {
            Ok(()) => {
                if provider.feeds_bypass() {
                    match tokio::fs::read_to_string(&output_path).await {
                        Ok(content) => self.merge_bypass(&content).await,
                        Err(e) => warn!("Could not read back {}: {}", provider.name, e),
                    }
                }
                self.record_single(ProviderOutcome::success(&provider.name));
                Ok(true)
            }
            Err(e) => {
                self.record_single(ProviderOutcome::failure(&provider.name, e.to_string()));
                Err(e)
            }
        }
    }

    /// Read-only copy of the bounded sync history, newest last
    pub fn history(&self) -> Vec<SyncRecord> {
        self.history.read().clone()
    }

    fn fetch_task<'a>(
        &'a self,
        provider: RuleProvider,
    ) -> impl std::future::Future<Output = (ProviderOutcome, Option<String>)> + 'a {
        async move {
            let output_path = self.rules_dir.join(&provider.path);
            match self.fetcher.fetch(&provider, &output_path).await {
                Ok(()) => {
                    // Read back for the bypass merge; a read failure only
                    // loses the merge contribution, not the outcome.
                    let content = match tokio::fs::read_to_string(&output_path).await {
                        Ok(content) => Some(content),
                        Err(e) => {
                            error!("Reading back rules for {} failed: {}", provider.name, e);
                            None
                        }
                    };
                    (ProviderOutcome::success(&provider.name), content)
                }
                Err(e) => {
                    error!("Provider {} failed: {}", provider.name, e);
                    (ProviderOutcome::failure(&provider.name, e.to_string()), None)
                }
            }
        }
    }

    /// Merge combined domain rules into the proxy settings file. Failures
    /// are logged only; they never flip a sync result.
    async fn merge_bypass(&self, combined_rules: &str) {
        let path = match &self.settings_override {
            Some(path) => Some(path.clone()),
            None => bypass::settings_path(),
        };
        let Some(path) = path else {
            warn!("Proxy settings file not found, skipping bypass merge");
            return;
        };

        if let Err(e) = bypass::sync_from_domain_list(&path, combined_rules).await {
            error!("Bypass merge failed: {}", e);
        }
    }

    /// Append a record, evicting the oldest beyond the bound
    fn push_record(&self, record: SyncRecord) {
        let mut history = self.history.write();
        history.push(record);
        if history.len() > HISTORY_LIMIT {
            let excess = history.len() - HISTORY_LIMIT;
            history.drain(..excess);
        }
    }

    /// Record a single-provider outcome, coalescing rapid successive updates
    /// into the latest record (keyed by provider name) when it is younger
    /// than one minute.
    fn record_single(&self, outcome: ProviderOutcome) {
        let mut history = self.history.write();

        if let Some(last) = history.last_mut() {
            let age = Utc::now().signed_duration_since(last.time);
            if age < chrono::Duration::seconds(COALESCE_WINDOW_SECS) {
                last.upsert(outcome);
                return;
            }
        }

        history.push(SyncRecord::new(vec![outcome]));
        if history.len() > HISTORY_LIMIT {
            let excess = history.len() - HISTORY_LIMIT;
            history.drain(..excess);
        }
    }
}
