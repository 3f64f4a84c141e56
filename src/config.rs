//! Configuration handling for vpnctl
//!
//! Loaded once at start-up and passed by value into the orchestrator and the
//! vault. Lookup order: explicit `--config` path, `~/.vpnctl/config.toml`,
//! then built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("Could not determine home directory")]
    NoHomeDir,
}

const DEFAULT_DIR_NAME: &str = ".vpnctl";
const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vpn: VpnConfig,
    pub storage: StorageConfig,
    pub keyring: KeyringConfig,
    pub credential: CredentialConfig,
    pub logging: LoggingConfig,
    pub update: UpdateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VpnConfig {
    /// Vendor command-line client (`vpn status`, `vpn connect ...`)
    pub binary_path: PathBuf,
    /// Vendor GUI application launched after a successful connect
    pub gui_path: PathBuf,
    /// Extra connect attempts after an unsuccessful one
    pub connection_retry: u32,
    pub retry_backoff_secs: u64,
    pub status_timeout_secs: u64,
    /// Command-line substring identifying stale client processes
    pub client_process_pattern: String,
    pub gui_process_name: String,
    /// Processes that are never signalled, matched against the full command line
    pub protected_processes: Vec<String>,
    pub kill_settle_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to `~/.vpnctl` when unset
    pub data_dir: Option<PathBuf>,
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyringConfig {
    pub service_name: String,
    /// Exactly 32 bytes. When unset a random key is kept in `<data_dir>/vault.key`.
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    pub validity_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub releases_url: String,
}

impl Default for VpnConfig {
    fn default() -> Self {
        let (binary_path, gui_path) = default_client_paths();
        Self {
            client_process_pattern: binary_path.to_string_lossy().to_string(),
            binary_path,
            gui_path,
            connection_retry: 1,
            retry_backoff_secs: 2,
            status_timeout_secs: 5,
            gui_process_name: "Cisco Secure Client".to_string(),
            protected_processes: vec!["vpnagentd".to_string()],
            kill_settle_millis: 2000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database: "vpnctl.db".to_string(),
        }
    }
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            service_name: "vpnctl".to_string(),
            encryption_key: None,
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self { validity_days: 180 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: "vpnctl.log".to_string(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            releases_url: "https://api.github.com/repos/goo-apps/vpnctl/releases".to_string(),
        }
    }
}

#[cfg(target_os = "macos")]
fn default_client_paths() -> (PathBuf, PathBuf) {
    (
        PathBuf::from("/opt/cisco/secureclient/bin/vpn"),
        PathBuf::from("/Applications/Cisco/Cisco Secure Client.app/"),
    )
}

#[cfg(target_os = "windows")]
fn default_client_paths() -> (PathBuf, PathBuf) {
    (
        PathBuf::from(r"C:\Program Files (x86)\Cisco\Cisco Secure Client\vpncli.exe"),
        PathBuf::from(r"C:\Program Files (x86)\Cisco\Cisco Secure Client\UI\csc_ui.exe"),
    )
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_client_paths() -> (PathBuf, PathBuf) {
    (
        PathBuf::from("/opt/cisco/secureclient/bin/vpn"),
        PathBuf::from("/opt/cisco/secureclient/bin/vpnui"),
    )
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration for this invocation.
    ///
    /// An explicit path must exist; the default path is optional.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let default_path = default_config_path()?;
        if default_path.exists() {
            return Self::load(&default_path);
        }
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vpn.binary_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("vpn.binary_path is empty".into()));
        }
        if self.vpn.status_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "vpn.status_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.vpn.client_process_pattern.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "vpn.client_process_pattern is empty".into(),
            ));
        }
        if self.keyring.service_name.is_empty() {
            return Err(ConfigError::Invalid("keyring.service_name is empty".into()));
        }
        if let Some(key) = &self.keyring.encryption_key {
            if key.len() != 32 {
                return Err(ConfigError::Invalid(format!(
                    "keyring.encryption_key must be 32 bytes, got {}",
                    key.len()
                )));
            }
        }
        if self.credential.validity_days <= 0 {
            return Err(ConfigError::Invalid(
                "credential.validity_days must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Per-user hidden directory holding the database, log and fallback vault.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::home_dir()
                .ok_or(ConfigError::NoHomeDir)?
                .join(DEFAULT_DIR_NAME)),
        }
    }

    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join(&self.storage.database))
    }

    pub fn log_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join(&self.logging.file))
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.vpn.status_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.vpn.retry_backoff_secs)
    }

    pub fn kill_settle(&self) -> Duration {
        Duration::from_millis(self.vpn.kill_settle_millis)
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(dirs::home_dir()
        .ok_or(ConfigError::NoHomeDir)?
        .join(DEFAULT_DIR_NAME)
        .join(DEFAULT_CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.vpn.status_timeout_secs, 5);
        assert_eq!(config.credential.validity_days, 180);
        assert_eq!(config.vpn.protected_processes, vec!["vpnagentd".to_string()]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.vpn.connection_retry = 3;
        config.storage.data_dir = Some(dir.path().to_path_buf());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.vpn.connection_retry, 3);
        assert_eq!(loaded.data_dir().unwrap(), dir.path());
        assert_eq!(loaded.database_path().unwrap(), dir.path().join("vpnctl.db"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[vpn]\nconnection_retry = 0\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.vpn.connection_retry, 0);
        assert_eq!(config.keyring.service_name, "vpnctl");
        assert_eq!(config.vpn.gui_process_name, "Cisco Secure Client");
    }

    #[test]
    fn test_rejects_short_encryption_key() {
        let mut config = Config::default();
        config.keyring.encryption_key = Some("too-short".to_string());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn test_rejects_zero_status_timeout() {
        let mut config = Config::default();
        config.vpn.status_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let dir = TempDir::new().unwrap();
        let result = Config::resolve(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }

    #[test]
    fn test_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[vpn\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::ParseError(_))));
    }
}
