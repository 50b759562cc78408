//! Relaunch strategies
//!
//! Starting the proxy again after a kill is best-effort: the preferred route
//! is the exact executable observed before termination, and when that is not
//! available a platform-specific chain of launchers is walked until one of
//! them accepts the request. A launcher accepting the request does not mean
//! the proxy came up; recovery verifies that separately.

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::error::{Result, RuleSyncError};
use crate::models::RelaunchTemplate;
#[cfg(not(windows))]
use crate::watchdog::KNOWN_PROCESS_NAMES;

/// Spawn a previously observed executable with its original arguments.
pub fn spawn_template(template: &RelaunchTemplate) -> bool {
    if !template.path.exists() {
        debug!(
            "Cached executable {} no longer exists",
            template.path.display()
        );
        return false;
    }

    match spawn_detached(Command::new(&template.path).args(&template.args)) {
        Ok(()) => {
            info!("Relaunched proxy from {}", template.path.display());
            true
        }
        Err(e) => {
            warn!("Failed to start {}: {}", template.path.display(), e);
            false
        }
    }
}

/// Walk the platform launcher chain. Returns true as soon as one launcher
/// accepts the request.
pub fn launch_via_fallbacks() -> bool {
    for (description, attempt) in strategies() {
        debug!("Trying launcher: {}", description);
        if attempt() {
            info!("Proxy launch requested via {}", description);
            return true;
        }
    }
    warn!("All launch strategies failed");
    false
}

fn spawn_detached(command: &mut Command) -> Result<()> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| RuleSyncError::ProcessControl(e.to_string()))?;
    Ok(())
}

type Strategy = (&'static str, fn() -> bool);

#[cfg(windows)]
fn strategies() -> Vec<Strategy> {
    vec![
        ("apps folder", launch_apps_folder),
        ("start menu shortcut", launch_start_menu_shortcut),
        ("desktop shortcut", launch_desktop_shortcut),
        ("shell start", launch_shell_start),
    ]
}

#[cfg(not(windows))]
fn strategies() -> Vec<Strategy> {
    vec![
        ("executable on PATH", launch_from_path),
        ("common install location", launch_from_known_locations),
    ]
}

#[cfg(windows)]
fn launch_apps_folder() -> bool {
    spawn_detached(
        Command::new("explorer.exe").arg(r"shell:AppsFolder\Clash for Windows"),
    )
    .is_ok()
}

#[cfg(windows)]
fn launch_start_menu_shortcut() -> bool {
    let Ok(appdata) = std::env::var("APPDATA") else {
        return false;
    };
    let shortcut = Path::new(&appdata)
        .join(r"Microsoft\Windows\Start Menu\Programs\Clash for Windows")
        .join("Clash for Windows.lnk");
    open_shortcut(&shortcut)
}

#[cfg(windows)]
fn launch_desktop_shortcut() -> bool {
    let Ok(profile) = std::env::var("USERPROFILE") else {
        return false;
    };
    let shortcut = Path::new(&profile)
        .join("Desktop")
        .join("Clash for Windows.lnk");
    open_shortcut(&shortcut)
}

#[cfg(windows)]
fn open_shortcut(shortcut: &Path) -> bool {
    if !shortcut.exists() {
        debug!("Shortcut {} not found", shortcut.display());
        return false;
    }
    spawn_detached(Command::new("cmd").args(["/c", "start", ""]).arg(shortcut)).is_ok()
}

#[cfg(windows)]
fn launch_shell_start() -> bool {
    spawn_detached(Command::new("cmd").args(["/c", "start", "", "Clash for Windows"])).is_ok()
}

#[cfg(not(windows))]
fn launch_from_path() -> bool {
    for name in KNOWN_PROCESS_NAMES {
        if name.contains(' ') {
            continue;
        }
        if spawn_detached(&mut Command::new(name)).is_ok() {
            debug!("Started {} from PATH", name);
            return true;
        }
    }
    false
}

#[cfg(not(windows))]
fn launch_from_known_locations() -> bool {
    const PREFIXES: [&str; 3] = ["/usr/local/bin", "/usr/bin", "/opt/clash"];

    for prefix in PREFIXES {
        for name in KNOWN_PROCESS_NAMES {
            if name.contains(' ') {
                continue;
            }
            let candidate = Path::new(prefix).join(name);
            if candidate.exists() && spawn_detached(&mut Command::new(&candidate)).is_ok() {
                debug!("Started {}", candidate.display());
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_spawn_template_rejects_missing_executable() {
        let dir = TempDir::new().unwrap();
        let template = RelaunchTemplate::new(dir.path().join("gone"), vec![]);
        assert!(!spawn_template(&template));
    }

    #[test]
    fn test_strategy_chain_is_nonempty() {
        assert!(!strategies().is_empty());
    }

    #[test]
    fn test_spawn_failure_maps_to_process_control() {
        let dir = TempDir::new().unwrap();
        // A directory is never executable
        let err = spawn_detached(&mut Command::new(dir.path())).unwrap_err();
        assert!(matches!(err, RuleSyncError::ProcessControl(_)));
    }
}
