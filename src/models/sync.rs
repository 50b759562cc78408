//! Sync pass outcome models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one provider's fetch within a sync pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub name: String,
    pub succeeded: bool,
    pub message: String,
}

impl ProviderOutcome {
    pub fn success(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            succeeded: true,
            message: "updated".to_string(),
        }
    }

    pub fn failure(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            succeeded: false,
            message: message.into(),
        }
    }
}

/// One sync pass: timestamp plus the outcome of every attempted provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    pub time: DateTime<Utc>,
    pub outcomes: Vec<ProviderOutcome>,
}

impl SyncRecord {
    pub fn new(outcomes: Vec<ProviderOutcome>) -> Self {
        Self {
            time: Utc::now(),
            outcomes,
        }
    }

    /// Add or replace the outcome for a provider, keyed by name
    pub fn upsert(&mut self, outcome: ProviderOutcome) {
        if let Some(existing) = self.outcomes.iter_mut().find(|o| o.name == outcome.name) {
            *existing = outcome;
        } else {
            self.outcomes.push(outcome);
        }
    }
}
