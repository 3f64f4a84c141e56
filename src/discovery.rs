//! Locating the vendor command-line client

use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[cfg(windows)]
const BINARY_NAMES: &[&str] = &["vpncli.exe", "vpn.exe"];
#[cfg(not(windows))]
const BINARY_NAMES: &[&str] = &["vpn"];

/// Install locations used by Cisco Secure Client and its AnyConnect predecessor
fn known_locations() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/cisco/secureclient/bin/vpn"),
            PathBuf::from("/opt/cisco/anyconnect/bin/vpn"),
        ]
    }

    #[cfg(windows)]
    {
        vec![
            PathBuf::from(r"C:\Program Files (x86)\Cisco\Cisco Secure Client\vpncli.exe"),
            PathBuf::from(
                r"C:\Program Files (x86)\Cisco\Cisco AnyConnect Secure Mobility Client\vpncli.exe",
            ),
        ]
    }

    #[cfg(not(any(target_os = "macos", windows)))]
    {
        vec![
            PathBuf::from("/opt/cisco/secureclient/bin/vpn"),
            PathBuf::from("/opt/cisco/anyconnect/bin/vpn"),
        ]
    }
}

fn search_path(path_var: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    let path_var = path_var?;
    env::split_paths(path_var)
        .flat_map(|dir| BINARY_NAMES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

fn resolve(
    configured: &Path,
    locations: &[PathBuf],
    path_var: Option<&std::ffi::OsStr>,
) -> Option<PathBuf> {
    if configured.is_file() {
        return Some(configured.to_path_buf());
    }
    debug!("Configured client {} not found", configured.display());

    if let Some(found) = locations.iter().find(|p| p.is_file()) {
        return Some(found.clone());
    }
    search_path(path_var)
}

/// The configured binary if it exists, else a known install location, else
/// the first match on `PATH`.
pub fn detect_client_binary(configured: &Path) -> Option<PathBuf> {
    let path_var = env::var_os("PATH");
    let found = resolve(configured, &known_locations(), path_var.as_deref());
    if let Some(path) = &found {
        if path != configured {
            info!("Using VPN client at {}", path.display());
        }
    }
    found
}
