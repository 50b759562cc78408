//! Rule provider model

use serde::{Deserialize, Serialize};

/// What a rule source contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Domain,
    #[serde(alias = "ip-cidr")]
    Ipcidr,
    Mixed,
}

impl ProviderKind {
    /// Kinds whose content can feed the bypass list (domain-shaped entries)
    pub fn is_domain_like(&self) -> bool {
        matches!(self, ProviderKind::Domain | ProviderKind::Mixed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Domain => "domain",
            ProviderKind::Ipcidr => "ipcidr",
            ProviderKind::Mixed => "mixed",
        }
    }
}

/// One configured named source of routing rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleProvider {
    /// Unique key
    pub name: String,
    /// Source URL
    pub url: String,
    /// Content kind
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// Output file name, relative to the rules directory
    pub path: String,
    /// Disabled providers are skipped by every sync pass
    pub enabled: bool,
}

impl RuleProvider {
    /// Whether a single-provider sync of this source also re-merges the
    /// bypass list. Matches the direct/local naming convention and requires a
    /// domain-like kind; intentionally narrower than the full-pass merge.
    pub fn feeds_bypass(&self) -> bool {
        (self.name == "cn_domain" || self.name.contains("direct")) && self.kind.is_domain_like()
    }
}
