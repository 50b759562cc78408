//! Bypass list merger
//!
//! The proxy keeps its own settings document with a fenced `bypassText: |`
//! block listing destinations that should be reached directly. This module
//! rewrites only that block, merging a fixed set of network-local exclusions
//! with the synchronized domain rules, and preserves every byte outside it.
//!
//! The document is modeled as a sequence of top-level blocks (a header line
//! plus its indented/blank continuation lines); every block except the bypass
//! one is opaque.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Result, RuleSyncError};

/// Header of the block this module owns
const BYPASS_KEY: &str = "bypassText:";

/// Network-local exclusions always present in the merged list
pub const STATIC_BYPASS_RULES: [&str; 13] = [
    "localhost",
    "127.*",
    "10.*",
    "172.16.*",
    "172.17.*",
    "172.18.*",
    "172.19.*",
    "172.20.*",
    "172.21.*",
    "172.22.*",
    "172.23.*",
    "192.168.*",
    "<local>",
];

/// One top-level block: a header line plus everything indented beneath it.
/// Both parts keep their original bytes, line endings included.
#[derive(Debug, Clone)]
struct Block {
    /// Raw header line with its line ending; empty for a headerless leading
    /// block of blank/indented lines
    header: String,
    /// Raw continuation lines
    body: String,
}

impl Block {
    fn is_bypass(&self) -> bool {
        self.header.starts_with(BYPASS_KEY)
    }
}

/// A settings document split into opaque top-level blocks
#[derive(Debug, Clone)]
pub struct SettingsDocument {
    blocks: Vec<Block>,
}

impl SettingsDocument {
    /// Split `text` into top-level blocks. A line starting at column zero
    /// opens a new block; blank and indented lines continue the current one.
    pub fn parse(text: &str) -> Self {
        let mut blocks: Vec<Block> = Vec::new();

        for line in text.split_inclusive('\n') {
            let bare = line.trim_end_matches(['\n', '\r']);
            let is_top_level =
                !bare.is_empty() && !bare.starts_with(' ') && !bare.starts_with('\t');

            if is_top_level {
                blocks.push(Block {
                    header: line.to_string(),
                    body: String::new(),
                });
            } else if let Some(last) = blocks.last_mut() {
                last.body.push_str(line);
            } else {
                // Leading blank/indented lines become a headerless block
                blocks.push(Block {
                    header: String::new(),
                    body: line.to_string(),
                });
            }
        }

        Self { blocks }
    }

    /// Reassemble the document. Parsing followed by rendering reproduces the
    /// input byte for byte.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            out.push_str(&block.header);
            out.push_str(&block.body);
        }
        out
    }

    /// Replace the interior of the bypass block with `body` (unindented),
    /// indenting every line by one level under the preserved header.
    pub fn replace_bypass(&mut self, body: &str) -> Result<()> {
        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.is_bypass())
            .ok_or_else(|| RuleSyncError::NotFound("bypassText block".to_string()))?;

        // Header must be followed by exactly one newline before the content
        if !block.header.ends_with('\n') {
            block.header.push('\n');
        }

        let mut indented = String::new();
        for line in body.lines() {
            if line.is_empty() {
                continue;
            }
            indented.push_str("  ");
            indented.push_str(line);
            indented.push('\n');
        }
        block.body = indented;
        Ok(())
    }

    /// Interior lines of the bypass block, dedented, or `NotFound`
    pub fn bypass_body(&self) -> Result<String> {
        let block = self
            .blocks
            .iter()
            .find(|b| b.is_bypass())
            .ok_or_else(|| RuleSyncError::NotFound("bypassText block".to_string()))?;

        let mut out = String::new();
        for line in block.body.lines() {
            out.push_str(line.strip_prefix("  ").unwrap_or(line));
            out.push('\n');
        }
        Ok(out)
    }
}

/// Parse a domain rule text in either supported shape: a native `payload:`
/// list with quoted `- 'item'` entries, or one bare hostname per line. Blank
/// lines and `#` comments are skipped.
pub fn parse_domain_rules(rules_text: &str) -> Vec<String> {
    let mut domains = Vec::new();
    let mut in_payload = false;

    for line in rules_text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with("payload:") {
            in_payload = true;
            continue;
        }

        // Outside a payload section, lines carrying a key are other YAML
        // structure, not rules.
        if !in_payload && line.contains(':') {
            continue;
        }

        if let Some(item) = line.strip_prefix('-') {
            let item = item.trim().trim_matches(|c| c == '\'' || c == '"');
            if !item.is_empty() {
                domains.push(item.to_string());
            }
        } else {
            domains.push(line.to_string());
        }
    }

    domains
}

/// Build the replacement bypass body: the `bypass:` list header, the 13
/// static exclusions, then every synchronized domain.
fn build_bypass_body(domains: &[String]) -> String {
    let mut lines = Vec::with_capacity(1 + STATIC_BYPASS_RULES.len() + domains.len());
    lines.push("bypass:".to_string());
    for rule in STATIC_BYPASS_RULES {
        lines.push(format!("  - {}", rule));
    }
    for domain in domains {
        lines.push(format!("  - {}", domain));
    }
    lines.join("\n")
}

/// Header-then-indented-content shape check on the rendered document
fn structure_ok(rendered: &str) -> bool {
    let mut lines = rendered.lines();
    while let Some(line) = lines.next() {
        if line.starts_with(BYPASS_KEY) {
            return matches!(lines.next(), Some(next) if next.starts_with("  ") && !next.trim().is_empty());
        }
    }
    false
}

/// Merge `domain_rules` into the settings file at `path`.
///
/// Fails with `NotFound` when the document has no bypass block (the merger
/// never creates the section). A failed post-replace shape check triggers one
/// corrective rewrite; if that also fails the best-effort output is still
/// written.
pub async fn sync_from_domain_list(path: &Path, domain_rules: &str) -> Result<()> {
    let settings = tokio::fs::read_to_string(path).await?;

    let domains = parse_domain_rules(domain_rules);
    info!(
        "Merging {} synchronized domains with {} static exclusions",
        domains.len(),
        STATIC_BYPASS_RULES.len()
    );

    let mut doc = SettingsDocument::parse(&settings);
    doc.replace_bypass(&build_bypass_body(&domains))?;

    let mut rendered = doc.render();
    if !structure_ok(&rendered) {
        warn!("Merged settings failed the shape check, attempting correction");
        let marker = format!("{} |\nbypass:", BYPASS_KEY);
        let fixed = format!("{} |\n  bypass:", BYPASS_KEY);
        rendered = rendered.replacen(&marker, &fixed, 1);
        if !structure_ok(&rendered) {
            warn!("Correction failed, writing best-effort output");
        }
    }

    tokio::fs::write(path, rendered).await?;
    info!("Bypass list updated in {}", path.display());
    Ok(())
}

/// Domains currently present in a settings document's bypass block (static
/// exclusions included)
pub fn extract_bypass_entries(settings: &str) -> Result<Vec<String>> {
    let doc = SettingsDocument::parse(settings);
    let body = doc.bypass_body()?;

    let mut entries = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if let Some(item) = line.strip_prefix('-') {
            let item = item.trim().trim_matches(|c| c == '\'' || c == '"');
            if !item.is_empty() {
                entries.push(item.to_string());
            }
        }
    }
    Ok(entries)
}

/// Locate the proxy's settings document. `RULESYNC_SETTINGS_PATH` overrides
/// detection; otherwise the platform candidate paths are probed in order.
pub fn settings_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("RULESYNC_SETTINGS_PATH") {
        let path = PathBuf::from(path);
        return path.exists().then_some(path);
    }

    let mut candidates = Vec::new();
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".config").join("clash").join("cfw-settings.yaml"));
    }
    if let Ok(appdata) = std::env::var("APPDATA") {
        candidates.push(
            PathBuf::from(appdata)
                .join("Clash for Windows")
                .join("cfw-settings.yaml"),
        );
    }

    candidates.into_iter().find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE_SETTINGS: &str = "\
# managed by the proxy
startAtLogin: false
bypassText: |
  bypass:
    - localhost
    - old.example.com
mixinText: |
  mixin:
    script:
      code: ''
proxyPort: 7890
";

    #[test]
    fn test_parse_render_is_byte_identical() {
        let doc = SettingsDocument::parse(SAMPLE_SETTINGS);
        assert_eq!(doc.render(), SAMPLE_SETTINGS);

        // No trailing newline either
        let trimmed = SAMPLE_SETTINGS.trim_end();
        let doc = SettingsDocument::parse(trimmed);
        assert_eq!(doc.render(), trimmed);
    }

    #[test]
    fn test_parse_render_with_leading_blank_lines() {
        let text = "\n\n# comment\nkey: value\n  nested: true\n";
        let doc = SettingsDocument::parse(text);
        assert_eq!(doc.render(), text);
    }

    #[test]
    fn test_replace_bypass_preserves_other_blocks() {
        let mut doc = SettingsDocument::parse(SAMPLE_SETTINGS);
        doc.replace_bypass("bypass:\n  - 127.*").unwrap();
        let rendered = doc.render();

        assert!(rendered.contains("bypassText: |\n  bypass:\n    - 127.*\n"));
        assert!(!rendered.contains("old.example.com"));
        // Bytes outside the block untouched
        assert!(rendered.starts_with("# managed by the proxy\nstartAtLogin: false\n"));
        assert!(rendered.contains("mixinText: |\n  mixin:\n    script:\n      code: ''\nproxyPort: 7890\n"));
    }

    #[test]
    fn test_replace_bypass_missing_block_is_not_found() {
        let mut doc = SettingsDocument::parse("proxyPort: 7890\n");
        let err = doc.replace_bypass("bypass:").unwrap_err();
        assert!(matches!(err, RuleSyncError::NotFound(_)));
    }

    #[test]
    fn test_parse_domain_rules_payload_shape() {
        let text = "\
# comment
payload:
  - 'example.com'
  - \"foo.cn\"
  - bar.org
";
        assert_eq!(
            parse_domain_rules(text),
            vec!["example.com", "foo.cn", "bar.org"]
        );
    }

    #[test]
    fn test_parse_domain_rules_flat_shape() {
        let text = "example.com\n\n# skip me\nfoo.cn\n";
        assert_eq!(parse_domain_rules(text), vec!["example.com", "foo.cn"]);
    }

    #[test]
    fn test_parse_domain_rules_skips_foreign_keys() {
        let text = "behavior: domain\ninterval: 86400\npayload:\n  - 'a.com'\n";
        assert_eq!(parse_domain_rules(text), vec!["a.com"]);
    }

    #[tokio::test]
    async fn test_merge_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfw-settings.yaml");
        tokio::fs::write(&path, SAMPLE_SETTINGS).await.unwrap();

        let rules = "payload:\n  - 'b.example.com'\n  - 'a.example.com'\n";
        sync_from_domain_list(&path, rules).await.unwrap();

        let merged = tokio::fs::read_to_string(&path).await.unwrap();
        let entries = extract_bypass_entries(&merged).unwrap();

        let mut expected: Vec<String> =
            STATIC_BYPASS_RULES.iter().map(|s| s.to_string()).collect();
        expected.push("b.example.com".to_string());
        expected.push("a.example.com".to_string());
        assert_eq!(entries, expected);

        // Merge is idempotent with respect to re-extraction
        sync_from_domain_list(&path, rules).await.unwrap();
        let again = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(extract_bypass_entries(&again).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_merge_without_block_fails_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfw-settings.yaml");
        tokio::fs::write(&path, "proxyPort: 7890\n").await.unwrap();

        let err = sync_from_domain_list(&path, "a.com\n").await.unwrap_err();
        assert!(matches!(err, RuleSyncError::NotFound(_)));
    }

    #[test]
    fn test_structure_check() {
        assert!(structure_ok("bypassText: |\n  bypass:\n    - localhost\n"));
        assert!(!structure_ok("bypassText: |\nbypass:\n"));
        assert!(!structure_ok("other: |\n  bypass:\n"));
    }
}
