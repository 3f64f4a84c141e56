//! Credential vault
//!
//! Holds one credential record for the vendor client. The record is kept in
//! the OS keyring (or the encrypted file fallback) as newline-separated
//! fields with the password sealed by [`crypto::encrypt`]. The expiry date
//! lives in the state store; once it is reached a lookup behaves as a miss
//! and the user is prompted again.

pub mod crypto;
pub mod prompt;
pub mod store;

use crate::background::Background;
use crate::config::Config;
use crate::profile::Profile;
use crate::state::{StateError, StateStore};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{Duration, Local, NaiveDate};
use crypto::{CryptoError, KEY_LEN};
use prompt::{CredentialPrompt, TerminalPrompt};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use store::{EncryptedFileStore, FallbackStore, KeyringStore, SecretStore};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Secure store unavailable: {0}")]
    StoreUnavailable(String),
    #[error(
        "Stored credential is unreadable ({0}). Run 'vpnctl credential update' to register it again"
    )]
    Unreadable(String),
    #[error("Credential field '{0}' must not contain a line break")]
    InvalidField(&'static str),
    #[error("Username must not be empty")]
    EmptyUsername,
    #[error("Failed to read from terminal: {0}")]
    PromptError(#[source] std::io::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("State error: {0}")]
    StateError(#[from] StateError),
    #[error("Encryption error: {0}")]
    CryptoError(#[from] CryptoError),
}

const PUSH_ANSWER: &str = "push";
const SECOND_FACTOR_ANSWER: &str = "y";
const RECORD_FIELDS: usize = 4;
const USERNAME_ATTEMPTS: usize = 3;
const KEY_FILE: &str = "vault.key";
const VAULT_FILE: &str = "vault.enc";

/// Credential for the vendor client. The password is plaintext in memory only.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
    /// Answer to the second-factor method prompt (`dev` only)
    pub push: String,
    /// Answer to the banner acceptance prompt
    pub second_factor: String,
    pub expires_on: NaiveDate,
}

impl Credential {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        expires_on: NaiveDate,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            push: PUSH_ANSWER.to_string(),
            second_factor: SECOND_FACTOR_ANSWER.to_string(),
            expires_on,
        }
    }

    /// Every field ends up on its own line of the stored record and of the
    /// answer script, so none may contain a line break.
    pub fn validate(&self) -> Result<(), VaultError> {
        let fields = [
            ("username", &self.username),
            ("password", &self.password),
            ("push", &self.push),
            ("second_factor", &self.second_factor),
        ];
        for (name, value) in fields {
            if value.contains('\n') || value.contains('\r') {
                return Err(VaultError::InvalidField(name));
            }
        }
        Ok(())
    }

    pub fn masked_password(&self) -> String {
        "*".repeat(self.password.chars().count().clamp(4, 12))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("push", &self.push)
            .field("second_factor", &self.second_factor)
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Serialize a credential for the secret store, sealing the password
pub fn encode_record(credential: &Credential, key: &[u8; KEY_LEN]) -> Result<String, VaultError> {
    credential.validate()?;
    let sealed = crypto::encrypt(&credential.password, key)?;
    Ok([
        credential.username.as_str(),
        sealed.as_str(),
        credential.push.as_str(),
        credential.second_factor.as_str(),
    ]
    .join("\n"))
}

/// Parse a stored record. Any format or decryption problem is `Unreadable`.
pub fn decode_record(
    record: &str,
    key: &[u8; KEY_LEN],
    expires_on: NaiveDate,
) -> Result<Credential, VaultError> {
    let fields: Vec<&str> = record.split('\n').collect();
    if fields.len() != RECORD_FIELDS {
        return Err(VaultError::Unreadable(format!(
            "expected {} fields, found {}",
            RECORD_FIELDS,
            fields.len()
        )));
    }
    let password =
        crypto::decrypt(fields[1], key).map_err(|e| VaultError::Unreadable(e.to_string()))?;

    Ok(Credential {
        username: fields[0].to_string(),
        password,
        push: fields[2].to_string(),
        second_factor: fields[3].to_string(),
        expires_on,
    })
}

/// Resolve the vault key: configured value, else `<data_dir>/vault.key`,
/// generated on first use.
pub fn load_or_create_key(
    configured: Option<&str>,
    data_dir: &Path,
) -> Result<[u8; KEY_LEN], VaultError> {
    if let Some(key) = configured {
        return key
            .as_bytes()
            .try_into()
            .map_err(|_| VaultError::CryptoError(CryptoError::KeyError));
    }

    let path = data_dir.join(KEY_FILE);
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let bytes = BASE64
                .decode(content.trim())
                .map_err(|_| VaultError::Unreadable(format!("{} is corrupt", path.display())))?;
            bytes
                .try_into()
                .map_err(|_| VaultError::Unreadable(format!("{} has wrong length", path.display())))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let key = crypto::generate_key()?;
            store::write_private(&path, BASE64.encode(key).as_bytes())?;
            info!("Generated vault key at {}", path.display());
            Ok(key)
        }
        Err(e) => Err(e.into()),
    }
}

pub struct CredentialVault {
    store: Arc<dyn SecretStore>,
    state: StateStore,
    prompt: Box<dyn CredentialPrompt>,
    key: [u8; KEY_LEN],
    service: String,
    validity_days: i64,
    background: Background,
}

impl CredentialVault {
    pub fn new(
        store: Arc<dyn SecretStore>,
        state: StateStore,
        prompt: Box<dyn CredentialPrompt>,
        key: [u8; KEY_LEN],
        background: Background,
    ) -> Self {
        Self {
            store,
            state,
            prompt,
            key,
            service: "vpnctl".to_string(),
            validity_days: 180,
            background,
        }
    }

    /// Keyring first, encrypted file under the data directory as fallback,
    /// terminal prompt for misses.
    pub fn from_config(
        config: &Config,
        state: StateStore,
        background: Background,
    ) -> Result<Self, VaultError> {
        let data_dir = config
            .data_dir()
            .map_err(|e| VaultError::StoreUnavailable(e.to_string()))?;
        let key = load_or_create_key(config.keyring.encryption_key.as_deref(), &data_dir)?;
        let store = FallbackStore::new(
            Box::new(KeyringStore::new()),
            Box::new(EncryptedFileStore::new(data_dir.join(VAULT_FILE), key)),
        );

        Ok(Self::new(Arc::new(store), state, Box::new(TerminalPrompt), key, background)
            .with_service(&config.keyring.service_name)
            .with_validity_days(config.credential.validity_days))
    }

    pub fn with_service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    pub fn with_validity_days(mut self, days: i64) -> Self {
        self.validity_days = days;
        self
    }

    fn account(&self) -> &str {
        &self.service
    }

    fn expiry_from(&self, today: NaiveDate) -> NaiveDate {
        today + Duration::days(self.validity_days)
    }

    /// Cached credential if present and unexpired.
    ///
    /// A missing or expired expiry record and an unreachable store are
    /// misses. An undecodable record is an error.
    pub fn fetch(&self) -> Result<Option<Credential>, VaultError> {
        self.fetch_on(Local::now().date_naive())
    }

    fn fetch_on(&self, today: NaiveDate) -> Result<Option<Credential>, VaultError> {
        let expires_on = match self.state.get_expiry(self.account()) {
            Ok(Some(date)) => date,
            Ok(None) => {
                debug!("No credential expiry recorded");
                return Ok(None);
            }
            Err(e) => {
                warn!("Could not read credential expiry: {}", e);
                return Ok(None);
            }
        };
        if today >= expires_on {
            info!("Stored credential expired on {}", expires_on);
            return Ok(None);
        }

        let record = match self.store.get(&self.service, self.account()) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("No credential in secure store");
                return Ok(None);
            }
            Err(VaultError::StoreUnavailable(reason)) => {
                warn!("Secure store unavailable: {}", reason);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        decode_record(&record, &self.key, expires_on).map(Some)
    }

    /// Cached credential, or prompt for a new one. After a prompt the
    /// credential and its expiry are persisted in the background.
    pub fn get_or_prompt(&self, profile: Profile) -> Result<Credential, VaultError> {
        if let Some(credential) = self.fetch()? {
            debug!("Using stored credential for {}", profile);
            return Ok(credential);
        }

        let credential = self.prompt_new(Some(profile))?;
        self.persist_in_background(&credential)?;
        Ok(credential)
    }

    /// Prompt for a credential without storing it
    pub fn prompt_new(&self, profile: Option<Profile>) -> Result<Credential, VaultError> {
        match profile {
            Some(profile) => println!("Enter your credentials for the {} VPN", profile),
            None => println!("Enter your VPN credentials"),
        }

        let mut username = String::new();
        for _ in 0..USERNAME_ATTEMPTS {
            username = self
                .prompt
                .read_line("Username: ")
                .map_err(VaultError::PromptError)?
                .trim()
                .to_string();
            if !username.is_empty() {
                break;
            }
            println!("Username cannot be empty.");
        }
        if username.is_empty() {
            return Err(VaultError::EmptyUsername);
        }

        let password = self
            .prompt
            .read_secret("Password: ")
            .map_err(VaultError::PromptError)?;

        let credential = Credential::new(
            username,
            password,
            self.expiry_from(Local::now().date_naive()),
        );
        credential.validate()?;
        Ok(credential)
    }

    fn persist_in_background(&self, credential: &Credential) -> Result<(), VaultError> {
        let record = encode_record(credential, &self.key)?;
        let store = Arc::clone(&self.store);
        let state = self.state.clone();
        let service = self.service.clone();
        let expires_on = credential.expires_on;

        self.background
            .spawn_blocking("Credential persistence", move || -> Result<(), VaultError> {
                store.set(&service, &service, &record)?;
                state.set_expiry(&service, expires_on)?;
                Ok(())
            });
        Ok(())
    }

    /// Write the credential and its expiry, waiting for both
    pub fn store(&self, credential: &Credential) -> Result<(), VaultError> {
        let record = encode_record(credential, &self.key)?;
        self.store.set(&self.service, self.account(), &record)?;
        self.state.set_expiry(self.account(), credential.expires_on)?;
        info!("Credential stored, valid until {}", credential.expires_on);
        Ok(())
    }

    /// Prompt for a fresh credential and store it synchronously
    pub fn update(&self) -> Result<Credential, VaultError> {
        let credential = self.prompt_new(None)?;
        self.store(&credential)?;
        Ok(credential)
    }

    /// Delete the stored credential and its expiry. Returns whether anything
    /// was removed.
    pub fn remove(&self) -> Result<bool, VaultError> {
        let deleted = self.store.delete(&self.service, self.account())?;
        let cleared = self.state.clear_expiry(self.account())?;
        if deleted || cleared {
            warn!("Stored VPN credential removed from the secure store");
        } else {
            warn!("No stored VPN credential to remove");
        }
        Ok(deleted || cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::prompt::testing::ScriptedPrompt;
    use super::store::testing::MemoryStore;
    use super::*;
    use tempfile::TempDir;

    const KEY: [u8; KEY_LEN] = [3u8; KEY_LEN];

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Harness {
        _dir: TempDir,
        store: Arc<MemoryStore>,
        state: StateStore,
        background: Background,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let state = StateStore::init(dir.path().join("vpnctl.db")).unwrap();
            Self {
                _dir: dir,
                store: Arc::new(MemoryStore::new()),
                state,
                background: Background::new(),
            }
        }

        fn vault(&self, answers: &[&str]) -> CredentialVault {
            CredentialVault::new(
                self.store.clone(),
                self.state.clone(),
                Box::new(ScriptedPrompt::new(answers)),
                KEY,
                self.background.clone(),
            )
        }
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let credential = Credential::new("alice", "hunter2", date(2026, 1, 1));
        let printed = format!("{:?}", credential);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_record_round_trip_seals_password() {
        let credential = Credential::new("alice", "hunter2", date(2026, 1, 1));
        let record = encode_record(&credential, &KEY).unwrap();

        assert!(record.starts_with("alice\n"));
        assert!(!record.contains("hunter2"));
        assert!(record.ends_with("\npush\ny"));

        let decoded = decode_record(&record, &KEY, date(2026, 1, 1)).unwrap();
        assert_eq!(decoded, credential);
    }

    #[test]
    fn test_newline_in_field_is_rejected() {
        let credential = Credential::new("alice\nbob", "pw", date(2026, 1, 1));
        assert!(matches!(
            encode_record(&credential, &KEY),
            Err(VaultError::InvalidField("username"))
        ));

        let credential = Credential::new("alice", "p\nw", date(2026, 1, 1));
        assert!(matches!(
            credential.validate(),
            Err(VaultError::InvalidField("password"))
        ));
    }

    #[test]
    fn test_decode_wrong_key_is_unreadable() {
        let credential = Credential::new("alice", "hunter2", date(2026, 1, 1));
        let record = encode_record(&credential, &KEY).unwrap();
        let result = decode_record(&record, &[4u8; KEY_LEN], date(2026, 1, 1));
        assert!(matches!(result, Err(VaultError::Unreadable(_))));
    }

    #[test]
    fn test_decode_bad_format_is_unreadable() {
        let result = decode_record("only-a-username", &KEY, date(2026, 1, 1));
        assert!(matches!(result, Err(VaultError::Unreadable(_))));
    }

    #[test]
    fn test_store_then_fetch() {
        let harness = Harness::new();
        let vault = harness.vault(&[]);
        let credential = Credential::new("alice", "hunter2", date(2099, 1, 1));

        vault.store(&credential).unwrap();
        assert_eq!(vault.fetch().unwrap(), Some(credential));
    }

    #[test]
    fn test_expired_credential_is_a_miss() {
        let harness = Harness::new();
        let vault = harness.vault(&[]);
        let credential = Credential::new("alice", "hunter2", date(2026, 1, 10));
        vault.store(&credential).unwrap();

        assert!(vault.fetch_on(date(2026, 1, 9)).unwrap().is_some());
        assert!(vault.fetch_on(date(2026, 1, 10)).unwrap().is_none());
        assert!(vault.fetch_on(date(2026, 6, 1)).unwrap().is_none());
    }

    #[test]
    fn test_missing_expiry_is_a_miss() {
        let harness = Harness::new();
        let vault = harness.vault(&[]);
        let credential = Credential::new("alice", "hunter2", date(2099, 1, 1));
        harness
            .store
            .put_raw("vpnctl", "vpnctl", &encode_record(&credential, &KEY).unwrap());

        assert!(vault.fetch().unwrap().is_none());
    }

    #[test]
    fn test_unreadable_record_is_surfaced() {
        let harness = Harness::new();
        let vault = harness.vault(&[]);
        harness.state.set_expiry("vpnctl", date(2099, 1, 1)).unwrap();
        harness.store.put_raw("vpnctl", "vpnctl", "alice\ngarbage\npush\ny");

        assert!(matches!(vault.fetch(), Err(VaultError::Unreadable(_))));
    }

    #[test]
    fn test_unavailable_store_is_a_miss() {
        let harness = Harness::new();
        let vault = harness.vault(&[]);
        harness.state.set_expiry("vpnctl", date(2099, 1, 1)).unwrap();
        harness.store.set_unavailable(true);

        assert!(vault.fetch().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_or_prompt_persists_in_background() {
        let harness = Harness::new();
        let vault = harness.vault(&["alice", "hunter2"]);

        let credential = vault.get_or_prompt(Profile::Dev).unwrap();
        assert_eq!(credential.username, "alice");
        assert_eq!(credential.password, "hunter2");
        assert_eq!(
            credential.expires_on,
            Local::now().date_naive() + Duration::days(180)
        );

        harness.background.drain().await;

        let stored = harness.store.raw("vpnctl", "vpnctl").unwrap();
        assert!(!stored.contains("hunter2"));
        assert_eq!(
            harness.state.get_expiry("vpnctl").unwrap(),
            Some(credential.expires_on)
        );

        // Second call is served from the store without prompting
        let again = harness.vault(&[]).get_or_prompt(Profile::Dev).unwrap();
        assert_eq!(again, credential);
    }

    #[tokio::test]
    async fn test_empty_username_is_asked_again() {
        let harness = Harness::new();
        let prompt = ScriptedPrompt::new(&["", "  ", "bob", "pw"]);
        let vault = CredentialVault::new(
            harness.store.clone(),
            harness.state.clone(),
            Box::new(prompt),
            KEY,
            harness.background.clone(),
        );

        let credential = vault.get_or_prompt(Profile::Intra).unwrap();
        assert_eq!(credential.username, "bob");
        harness.background.drain().await;
    }

    #[test]
    fn test_username_never_given() {
        let harness = Harness::new();
        let vault = harness.vault(&["", "", ""]);
        assert!(matches!(
            vault.prompt_new(Some(Profile::Intra)),
            Err(VaultError::EmptyUsername)
        ));
    }

    #[test]
    fn test_prompt_eof_is_error() {
        let harness = Harness::new();
        let vault = harness.vault(&["alice"]);
        assert!(matches!(
            vault.prompt_new(Some(Profile::Intra)),
            Err(VaultError::PromptError(_))
        ));
    }

    #[test]
    fn test_update_stores_synchronously() {
        let harness = Harness::new();
        let vault = harness.vault(&["carol", "s3cret"]);

        let credential = vault.update().unwrap();
        assert_eq!(vault.fetch().unwrap(), Some(credential));
    }

    #[test]
    fn test_remove_clears_secret_and_expiry() {
        let harness = Harness::new();
        let vault = harness.vault(&[]);
        vault
            .store(&Credential::new("alice", "hunter2", date(2099, 1, 1)))
            .unwrap();

        assert!(vault.remove().unwrap());
        assert!(harness.store.raw("vpnctl", "vpnctl").is_none());
        assert_eq!(harness.state.get_expiry("vpnctl").unwrap(), None);
        assert!(!vault.remove().unwrap());
    }

    #[test]
    fn test_custom_service_name() {
        let harness = Harness::new();
        let vault = harness.vault(&[]).with_service("corp-vpn");
        vault
            .store(&Credential::new("alice", "hunter2", date(2099, 1, 1)))
            .unwrap();

        assert!(harness.store.raw("corp-vpn", "corp-vpn").is_some());
        assert!(harness.state.get_expiry("corp-vpn").unwrap().is_some());
    }

    #[test]
    fn test_key_file_generated_once() {
        let dir = TempDir::new().unwrap();
        let first = load_or_create_key(None, dir.path()).unwrap();
        let second = load_or_create_key(None, dir.path()).unwrap();
        assert_eq!(first, second);
        assert!(dir.path().join(KEY_FILE).exists());
    }

    #[test]
    fn test_configured_key_is_used() {
        let dir = TempDir::new().unwrap();
        let key = load_or_create_key(Some("0123456789abcdef0123456789abcdef"), dir.path()).unwrap();
        assert_eq!(&key, b"0123456789abcdef0123456789abcdef");
        assert!(!dir.path().join(KEY_FILE).exists());

        assert!(load_or_create_key(Some("short"), dir.path()).is_err());
    }

    #[test]
    fn test_masked_password() {
        let credential = Credential::new("alice", "pw", date(2026, 1, 1));
        assert_eq!(credential.masked_password(), "****");
        assert!(!credential.masked_password().contains("pw"));
    }
}
