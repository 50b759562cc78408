//! Proxy process supervision: presence monitoring and recovery

pub mod launch;
pub mod monitor;
pub mod recovery;

pub use monitor::{MonitorConfig, MonitorHandle, ProcessMonitor};
pub use recovery::{RecoveryConfig, RecoveryManager};

/// Process names the proxy is known to run under
pub const KNOWN_PROCESS_NAMES: [&str; 7] = [
    "clash",
    "clash-windows",
    "clash-win64",
    "clash for windows",
    "clash.meta",
    "clash-verge",
    "mihomo",
];

/// Exact match against the known-names list, ignoring case and a trailing
/// `.exe`. Used by the presence monitor.
pub fn is_known_process(name: &str) -> bool {
    let name = name.to_lowercase();
    let name = name.strip_suffix(".exe").unwrap_or(&name);
    KNOWN_PROCESS_NAMES.contains(&name)
}

/// Loose substring match. Used by recovery, which must also catch renamed
/// or suffixed binaries it is about to terminate.
pub fn matches_known_process(name: &str) -> bool {
    let name = name.to_lowercase();
    KNOWN_PROCESS_NAMES.iter().any(|known| name.contains(known))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_handles_case_and_exe_suffix() {
        assert!(is_known_process("clash"));
        assert!(is_known_process("Clash.Meta.exe"));
        assert!(is_known_process("Clash for Windows"));
        assert!(!is_known_process("clashd"));
        assert!(!is_known_process("firefox"));
    }

    #[test]
    fn test_loose_match_catches_suffixed_names() {
        assert!(matches_known_process("clash-verge-service"));
        assert!(matches_known_process("mihomo-alpha"));
        assert!(!matches_known_process("flash"));
    }
}
