//! Secret stores behind the vault
//!
//! The OS keyring is preferred. When it is unavailable (no Secret Service on
//! a headless Linux box, locked keychain) the record goes to an encrypted file
//! in the per-user data directory instead.

use super::VaultError;
use super::crypto::{self, KEY_LEN};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Secret storage keyed by (service, account)
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when nothing is stored; errors are reserved for failures
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, VaultError>;
    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), VaultError>;
    /// Returns whether anything was removed
    fn delete(&self, service: &str, account: &str) -> Result<bool, VaultError>;
}

/// OS keyring (macOS Keychain, Windows Credential Manager, Linux keyutils/Secret Service)
pub struct KeyringStore;

impl KeyringStore {
    pub fn new() -> Self {
        Self
    }

    fn entry(service: &str, account: &str) -> Result<keyring::Entry, VaultError> {
        keyring::Entry::new(service, account)
            .map_err(|e| VaultError::StoreUnavailable(e.to_string()))
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringStore {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, VaultError> {
        match Self::entry(service, account)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::BadEncoding(_)) => Err(VaultError::Unreadable(
                "keyring entry is not valid UTF-8".to_string(),
            )),
            Err(e) => Err(VaultError::StoreUnavailable(e.to_string())),
        }
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), VaultError> {
        Self::entry(service, account)?
            .set_password(secret)
            .map_err(|e| VaultError::StoreUnavailable(e.to_string()))
    }

    fn delete(&self, service: &str, account: &str) -> Result<bool, VaultError> {
        match Self::entry(service, account)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(VaultError::StoreUnavailable(e.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct FileRecord {
    service: String,
    account: String,
    secret: String,
}

/// Single-record encrypted file, owner read/write only
pub struct EncryptedFileStore {
    path: PathBuf,
    key: [u8; KEY_LEN],
}

impl EncryptedFileStore {
    pub fn new(path: impl Into<PathBuf>, key: [u8; KEY_LEN]) -> Self {
        Self {
            path: path.into(),
            key,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretStore for EncryptedFileStore {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, VaultError> {
        let sealed = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let json = crypto::decrypt(&sealed, &self.key)
            .map_err(|e| VaultError::Unreadable(format!("{}: {}", self.path.display(), e)))?;
        let record: FileRecord = serde_json::from_str(&json)
            .map_err(|e| VaultError::Unreadable(format!("{}: {}", self.path.display(), e)))?;

        if record.service != service || record.account != account {
            debug!(
                "Vault file holds {}/{}, not {}/{}",
                record.service, record.account, service, account
            );
            return Ok(None);
        }
        Ok(Some(record.secret))
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), VaultError> {
        let record = FileRecord {
            service: service.to_string(),
            account: account.to_string(),
            secret: secret.to_string(),
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| VaultError::Unreadable(e.to_string()))?;
        let sealed = crypto::encrypt(&json, &self.key)?;
        write_private(&self.path, sealed.as_bytes())?;
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> Result<bool, VaultError> {
        // Only remove the file when it belongs to this entry
        match self.get(service, account) {
            Ok(Some(_)) | Err(VaultError::Unreadable(_)) => {}
            Ok(None) => return Ok(false),
            Err(e) => return Err(e),
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keyring first, encrypted file when the keyring cannot be reached
pub struct FallbackStore {
    primary: Box<dyn SecretStore>,
    fallback: Box<dyn SecretStore>,
}

impl FallbackStore {
    pub fn new(primary: Box<dyn SecretStore>, fallback: Box<dyn SecretStore>) -> Self {
        Self { primary, fallback }
    }
}

impl SecretStore for FallbackStore {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, VaultError> {
        match self.primary.get(service, account) {
            Ok(Some(secret)) => Ok(Some(secret)),
            Ok(None) => self.fallback.get(service, account),
            Err(VaultError::StoreUnavailable(reason)) => {
                warn!("Secure store unavailable ({}), using encrypted file", reason);
                self.fallback.get(service, account)
            }
            Err(e) => Err(e),
        }
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), VaultError> {
        match self.primary.set(service, account, secret) {
            Ok(()) => Ok(()),
            Err(VaultError::StoreUnavailable(reason)) => {
                warn!("Secure store unavailable ({}), using encrypted file", reason);
                self.fallback.set(service, account, secret)
            }
            Err(e) => Err(e),
        }
    }

    fn delete(&self, service: &str, account: &str) -> Result<bool, VaultError> {
        let from_primary = match self.primary.delete(service, account) {
            Ok(removed) => removed,
            Err(VaultError::StoreUnavailable(reason)) => {
                warn!("Secure store unavailable ({}), skipping", reason);
                false
            }
            Err(e) => return Err(e),
        };
        let from_fallback = self.fallback.delete(service, account)?;
        Ok(from_primary || from_fallback)
    }
}

/// Write a file readable only by the owner, creating its directory if needed
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        create_private_dir(parent)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}
