//! Process presence and relaunch models

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Observed liveness of the proxy process.
///
/// `Unknown` exists only before the first presence check; after that the
/// state moves strictly between `Stopped` and `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Unknown,
    Stopped,
    Running,
}

impl ProcessState {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running)
    }
}

/// Executable path and argument vector needed to start a new proxy instance
/// equivalent to one previously observed. Persisted as a small JSON file so
/// it survives agent restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaunchTemplate {
    pub path: PathBuf,
    pub args: Vec<String>,
}

impl RelaunchTemplate {
    pub fn new(path: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            path: path.into(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_state_is_running() {
        assert!(ProcessState::Running.is_running());
        assert!(!ProcessState::Stopped.is_running());
        assert!(!ProcessState::Unknown.is_running());
    }

    #[test]
    fn test_relaunch_template_round_trip() {
        let template = RelaunchTemplate::new(
            "/opt/clash/clash-verge",
            vec!["clash-verge".to_string(), "-d".to_string(), "/etc/clash".to_string()],
        );
        let json = serde_json::to_string(&template).unwrap();
        let back: RelaunchTemplate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, template);
    }
}
