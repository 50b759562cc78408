//! Rule fetcher
//!
//! Downloads one named rule source over HTTP and normalizes the body into
//! the proxy's rule-file format. Sources hosted on the jsdelivr CDN get a
//! deterministic chain of mirror rewrites; every candidate URL is retried a
//! fixed number of times before the next one is attempted.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Result, RuleSyncError};
use crate::models::RuleProvider;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Markers identifying content already in the proxy's native rule format
const NATIVE_MARKERS: [&str; 4] = ["payload:", "bypass:", "domain:", "ip-cidr:"];

/// Fetcher retry/validation policy
#[derive(Clone)]
pub struct FetcherConfig {
    /// Tries per candidate URL
    pub max_tries: u32,
    /// Fixed delay between tries
    pub retry_delay: Duration,
    /// Bodies shorter than this are treated as invalid content
    pub min_body_bytes: usize,
    /// Overall request timeout
    pub request_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_tries: 3,
            retry_delay: Duration::from_secs(3),
            min_body_bytes: 10,
            request_timeout: Duration::from_secs(45),
        }
    }
}

/// Downloads and normalizes rule files
pub struct RuleFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl RuleFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();

        Self { client, config }
    }

    /// Download `provider`'s rules and write the normalized file to
    /// `output_path`. Fails only after every candidate URL is exhausted,
    /// returning the last observed error with context.
    pub async fn fetch(&self, provider: &RuleProvider, output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let candidates = mirror_candidates(&provider.url);
        let mut last_err: Option<RuleSyncError> = None;

        for (index, url) in candidates.iter().enumerate() {
            info!(
                "Fetching rules for {} from source #{} ({})",
                provider.name,
                index + 1,
                url
            );

            for attempt in 1..=self.config.max_tries {
                match self.download(url).await {
                    Ok(body) => {
                        self.write_rules(provider, output_path, &body).await?;
                        info!(
                            "Fetched rules for {} from source #{}",
                            provider.name,
                            index + 1
                        );
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(
                            "Fetch {} from source #{} failed ({}/{}): {}",
                            provider.name, index + 1, attempt, self.config.max_tries, e
                        );
                        last_err = Some(e);
                        if attempt < self.config.max_tries {
                            tokio::time::sleep(self.config.retry_delay).await;
                        }
                    }
                }
            }

            warn!(
                "All tries exhausted for {} on source #{}, moving on",
                provider.name,
                index + 1
            );
        }

        Err(with_context(
            last_err.unwrap_or_else(|| {
                RuleSyncError::Internal("no candidate URLs".to_string())
            }),
            &format!("downloading {} failed from all sources", provider.name),
        ))
    }

    /// One download try: transport errors, non-200 statuses and too-short
    /// bodies all fail the try.
    async fn download(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("Accept", "text/plain,text/html,application/xml;q=0.9,*/*;q=0.8")
            .header("Connection", "close")
            .send()
            .await
            .map_err(|e| {
                let text = e.to_string();
                // Early connection closes show up as EOF-ish transport
                // errors; retried identically to any other transient failure.
                if text.contains("connection closed") || text.contains("EOF") {
                    RuleSyncError::TransientNetwork(format!("connection closed early: {}", text))
                } else {
                    RuleSyncError::TransientNetwork(text)
                }
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(RuleSyncError::Http(format!("status {}", status.as_u16())));
        }

        let body = response.text().await?;
        if body.len() < self.config.min_body_bytes {
            return Err(RuleSyncError::ContentInvalid(format!(
                "body too small ({} bytes)",
                body.len()
            )));
        }

        Ok(body)
    }

    async fn write_rules(
        &self,
        provider: &RuleProvider,
        output_path: &Path,
        body: &str,
    ) -> Result<()> {
        let content = if has_native_marker(body) {
            body.to_string()
        } else {
            normalize_rules(body, &provider.name)
        };
        tokio::fs::write(output_path, content).await?;
        Ok(())
    }
}

/// Candidate URLs in fixed order: the source itself, then — for jsdelivr
/// sources — the fastgit mirror, the fastly edge domain, and the raw GitHub
/// origin.
pub fn mirror_candidates(url: &str) -> Vec<String> {
    let mut urls = vec![url.to_string()];

    if url.contains("cdn.jsdelivr.net") {
        urls.push(url.replacen("cdn.jsdelivr.net/gh", "raw.fastgit.org", 1));
        urls.push(url.replacen("cdn.jsdelivr.net", "fastly.jsdelivr.net", 1));

        if let Some((_, rest)) = url.split_once("cdn.jsdelivr.net/gh/") {
            urls.push(format!("https://raw.githubusercontent.com/{}", rest));
        }
    }

    urls
}

fn has_native_marker(content: &str) -> bool {
    NATIVE_MARKERS.iter().any(|m| content.contains(m))
}

/// Re-emit a plain rule list as a `payload:` YAML list, one entry per
/// non-empty, non-comment line. An empty result still gets a header plus an
/// explanatory comment rather than an empty file.
fn normalize_rules(content: &str, provider_name: &str) -> String {
    let tokens: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();

    let mut out = String::from("payload:\n");
    if tokens.is_empty() {
        out.push_str(&format!("  # empty rule file - {}\n", provider_name));
    } else {
        for token in tokens {
            out.push_str(&format!("  - '{}'\n", token));
        }
    }
    out
}

/// Wrap an error with context, keeping its taxonomy
fn with_context(err: RuleSyncError, context: &str) -> RuleSyncError {
    match err {
        RuleSyncError::TransientNetwork(msg) => {
            RuleSyncError::TransientNetwork(format!("{}: {}", context, msg))
        }
        RuleSyncError::ContentInvalid(msg) => {
            RuleSyncError::ContentInvalid(format!("{}: {}", context, msg))
        }
        RuleSyncError::Http(msg) => RuleSyncError::Http(format!("{}: {}", context, msg)),
        other => other,
    }
}
