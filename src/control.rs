//! Control API client
//!
//! Thin wrapper around the proxy's local control endpoint. The agent only
//! needs two things from it: a reachability probe (used as a presence
//! fallback and for restart verification) and a reload signal. Endpoint
//! autodetection reads the proxy's own config files with line-oriented
//! extraction; no YAML parser is involved.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, RuleSyncError};
use crate::rules::bypass;

/// Default control endpoint when detection finds nothing
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:9090";

/// Control API client configuration
#[derive(Clone)]
pub struct ControlApiConfig {
    /// Overall client timeout
    pub request_timeout: Duration,
    /// Per-request timeout for reachability probes
    pub probe_timeout: Duration,
}

impl Default for ControlApiConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Client for the proxy's control API
pub struct ControlApi {
    base_url: String,
    secret: String,
    config: ControlApiConfig,
    client: reqwest::Client,
}

impl ControlApi {
    pub fn new(base_url: &str, secret: &str, config: ControlApiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();

        Self {
            base_url: normalize_base_url(base_url),
            secret: secret.to_string(),
            config,
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe the control API. Tries `/version` first, then the root path
    /// (older proxies answer only one of the two). Never errors; unreachable
    /// simply means `false`.
    pub async fn probe(&self) -> bool {
        for endpoint in ["/version", "/"] {
            let url = format!("{}{}", self.base_url, endpoint);
            let mut request = self
                .client
                .get(&url)
                .timeout(self.config.probe_timeout);
            if !self.secret.is_empty() {
                request = request.bearer_auth(&self.secret);
            }

            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Control API reachable via {}", endpoint);
                    return true;
                }
                Ok(resp) => {
                    debug!("Control API {} returned status {}", endpoint, resp.status());
                }
                Err(e) => {
                    debug!("Control API {} unreachable: {}", endpoint, e);
                }
            }
        }
        false
    }

    /// Signal a configuration reload. The proxy picks up its settings file on
    /// restart, so this only has to confirm the file is in place; no remote
    /// call is made.
    pub async fn reload(&self) -> Result<()> {
        let path = bypass::settings_path()
            .ok_or_else(|| RuleSyncError::NotFound("proxy settings file".to_string()))?;
        info!("Proxy settings refreshed at {}", path.display());
        Ok(())
    }
}

/// Normalize to a scheme-qualified base URL without a trailing slash,
/// defaulting to http:// when no scheme is given. Unparseable input is kept
/// as-is so the probe can fail against it visibly.
fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    match url::Url::parse(&candidate) {
        Ok(parsed) => parsed.as_str().trim_end_matches('/').to_string(),
        Err(e) => {
            warn!("Control API address {} did not parse: {}", candidate, e);
            candidate
        }
    }
}

/// Detected control endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedEndpoint {
    pub url: String,
    pub secret: String,
}

/// Autodetect the control endpoint from the proxy's config files. Returns
/// `None` when no candidate file yields a loopback controller address.
pub fn detect_endpoint() -> Option<DetectedEndpoint> {
    for path in candidate_config_paths() {
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };
        if let Some(endpoint) = parse_endpoint(&contents) {
            info!(
                "Detected control API {} from {}",
                endpoint.url,
                path.display()
            );
            return Some(endpoint);
        }
        warn!("No controller address in {}", path.display());
    }
    None
}

fn candidate_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config").join("clash").join("config.yaml"));
        paths.push(home.join(".config").join("clash").join("config.yml"));
    }
    for var in ["APPDATA", "LOCALAPPDATA"] {
        if let Ok(base) = std::env::var(var) {
            paths.push(
                PathBuf::from(base)
                    .join("Clash for Windows")
                    .join("config.yaml"),
            );
        }
    }
    paths
}

/// Line-oriented extraction of `external-controller:` and `secret:` from a
/// proxy config document.
fn parse_endpoint(contents: &str) -> Option<DetectedEndpoint> {
    let controller = extract_value(contents, "external-controller:")?;
    let (host, port) = parse_loopback_addr(&controller)?;

    let secret = extract_value(contents, "secret:").unwrap_or_default();

    Some(DetectedEndpoint {
        url: format!("http://{}:{}", host, port),
        secret,
    })
}

/// First top-level `key: value` line, with quotes and trailing comments stripped
fn extract_value(contents: &str, key: &str) -> Option<String> {
    for line in contents.lines() {
        let Some(rest) = line.strip_prefix(key) else {
            continue;
        };
        let value = rest.split('#').next().unwrap_or("").trim();
        let value = value.trim_matches(|c| c == '\'' || c == '"');
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

/// Only loopback controllers are accepted; the agent never talks to a remote
/// control API.
fn parse_loopback_addr(addr: &str) -> Option<(String, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    let host = match host {
        "127.0.0.1" | "localhost" => host,
        "" | "0.0.0.0" => "127.0.0.1",
        _ => return None,
    };
    Some((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("127.0.0.1:9090"), "http://127.0.0.1:9090");
        assert_eq!(
            normalize_base_url("http://127.0.0.1:9090/"),
            "http://127.0.0.1:9090"
        );
        assert_eq!(
            normalize_base_url("localhost:9090"),
            "http://localhost:9090"
        );
    }

    #[test]
    fn test_parse_endpoint_with_secret() {
        let contents = "\
port: 7890
external-controller: 127.0.0.1:9090
secret: 'abc123'  # api token
";
        let endpoint = parse_endpoint(contents).unwrap();
        assert_eq!(endpoint.url, "http://127.0.0.1:9090");
        assert_eq!(endpoint.secret, "abc123");
    }

    #[test]
    fn test_parse_endpoint_wildcard_bind_maps_to_loopback() {
        let contents = "external-controller: 0.0.0.0:9090\n";
        let endpoint = parse_endpoint(contents).unwrap();
        assert_eq!(endpoint.url, "http://127.0.0.1:9090");
        assert_eq!(endpoint.secret, "");
    }

    #[test]
    fn test_parse_endpoint_rejects_remote_controller() {
        let contents = "external-controller: 192.168.1.10:9090\n";
        assert!(parse_endpoint(contents).is_none());
    }

    #[tokio::test]
    async fn test_probe_success_on_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/version"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"version":"1.18"}"#))
            .mount(&server)
            .await;

        let api = ControlApi::new(&server.uri(), "", ControlApiConfig::default());
        assert!(api.probe().await);
    }

    #[tokio::test]
    async fn test_probe_falls_back_to_root() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/version"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let api = ControlApi::new(&server.uri(), "", ControlApiConfig::default());
        assert!(api.probe().await);
    }

    #[tokio::test]
    async fn test_probe_unreachable_is_false() {
        // Port 9 is discard; nothing listens there in the test environment.
        let api = ControlApi::new("http://127.0.0.1:9", "", ControlApiConfig::default());
        assert!(!api.probe().await);
    }
}
