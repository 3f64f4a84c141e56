//! Session state store
//!
//! A small SQLite file with three tables, each with a uniqueness constraint
//! so every write is an upsert:
//!
//! - `vpn_profile`: last-connected timestamp per profile
//! - `credential_expiry`: expiry date per vault account
//! - `latest_version`: cached release version strings
//!
//! A connection is opened per operation and dropped when it returns. Separate
//! CLI invocations can race on the same file; upserts make the last writer
//! win without any cross-process locking.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Corrupt value in {table}: {value}")]
    CorruptValue { table: &'static str, value: String },
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const EXPIRY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create the database file and schema. Called once at start-up; a
    /// failure here is fatal for the invocation.
    pub fn init(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let store = Self::new(path);
        store.open()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection, StateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        init_schema(&conn)?;
        Ok(conn)
    }

    pub fn upsert_last_connected(
        &self,
        profile: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO vpn_profile (profile, last_connected_at) VALUES (?1, ?2)
             ON CONFLICT(profile) DO UPDATE SET last_connected_at = excluded.last_connected_at",
            params![profile, format_timestamp(at)],
        )?;
        Ok(())
    }

    /// Profile with the most recent connect, `None` on a first-ever run
    pub fn get_last_connected(&self) -> Result<Option<String>, StateError> {
        let conn = self.open()?;
        let profile = conn
            .query_row(
                "SELECT profile FROM vpn_profile ORDER BY last_connected_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(profile)
    }

    pub fn last_connected_at(&self, profile: &str) -> Result<Option<DateTime<Utc>>, StateError> {
        let conn = self.open()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT last_connected_at FROM vpn_profile WHERE profile = ?1",
                params![profile],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|v| {
                DateTime::parse_from_rfc3339(&v)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|_| StateError::CorruptValue {
                        table: "vpn_profile",
                        value: v.clone(),
                    })
            })
            .transpose()
    }

    pub fn upsert_version(&self, version: &str) -> Result<(), StateError> {
        self.upsert_version_at(version, Utc::now())
    }

    pub fn upsert_version_at(&self, version: &str, at: DateTime<Utc>) -> Result<(), StateError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO latest_version (version, checked_at) VALUES (?1, ?2)
             ON CONFLICT(version) DO UPDATE SET checked_at = excluded.checked_at",
            params![version, format_timestamp(at)],
        )?;
        Ok(())
    }

    pub fn get_latest_version(&self) -> Result<Option<String>, StateError> {
        let conn = self.open()?;
        let version = conn
            .query_row(
                "SELECT version FROM latest_version ORDER BY checked_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version)
    }

    pub fn set_expiry(&self, account: &str, expires_on: NaiveDate) -> Result<(), StateError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO credential_expiry (account, expiry_date, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(account) DO UPDATE SET
                expiry_date = excluded.expiry_date,
                updated_at = excluded.updated_at",
            params![
                account,
                expires_on.format(EXPIRY_FORMAT).to_string(),
                format_timestamp(Utc::now())
            ],
        )?;
        Ok(())
    }

    pub fn get_expiry(&self, account: &str) -> Result<Option<NaiveDate>, StateError> {
        let conn = self.open()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT expiry_date FROM credential_expiry WHERE account = ?1",
                params![account],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|v| {
                NaiveDate::parse_from_str(&v, EXPIRY_FORMAT).map_err(|_| StateError::CorruptValue {
                    table: "credential_expiry",
                    value: v.clone(),
                })
            })
            .transpose()
    }

    pub fn clear_expiry(&self, account: &str) -> Result<bool, StateError> {
        let conn = self.open()?;
        let removed = conn.execute(
            "DELETE FROM credential_expiry WHERE account = ?1",
            params![account],
        )?;
        Ok(removed > 0)
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn init_schema(conn: &Connection) -> Result<(), StateError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS vpn_profile (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            profile TEXT UNIQUE NOT NULL,
            last_connected_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS credential_expiry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account TEXT UNIQUE NOT NULL,
            expiry_date TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS latest_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version TEXT UNIQUE NOT NULL,
            checked_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> StateStore {
        StateStore::init(dir.path().join("state").join("vpnctl.db")).unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    fn profile_rows(store: &StateStore, profile: &str) -> i64 {
        let conn = Connection::open(store.path()).unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM vpn_profile WHERE profile = ?1",
            params![profile],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_init_creates_parent_dir() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.path().exists());
    }

    #[test]
    fn test_no_rows_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert_eq!(store.get_last_connected().unwrap(), None);
        assert_eq!(store.get_latest_version().unwrap(), None);
        assert_eq!(store.get_expiry("vpnctl").unwrap(), None);
    }

    #[test]
    fn test_upsert_is_idempotent_and_keeps_latest() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.upsert_last_connected("intra", ts(0)).unwrap();
        store.upsert_last_connected("intra", ts(60)).unwrap();

        assert_eq!(profile_rows(&store, "intra"), 1);
        assert_eq!(store.last_connected_at("intra").unwrap(), Some(ts(60)));
    }

    #[test]
    fn test_most_recent_profile_wins() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.upsert_last_connected("intra", ts(10)).unwrap();
        store.upsert_last_connected("dev", ts(20)).unwrap();
        assert_eq!(store.get_last_connected().unwrap().as_deref(), Some("dev"));

        store.upsert_last_connected("intra", ts(30)).unwrap();
        assert_eq!(store.get_last_connected().unwrap().as_deref(), Some("intra"));
    }

    #[test]
    fn test_sub_second_ordering() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let base = ts(0);

        store.upsert_last_connected("dev", base).unwrap();
        store
            .upsert_last_connected("intra", base + chrono::Duration::milliseconds(5))
            .unwrap();
        assert_eq!(store.get_last_connected().unwrap().as_deref(), Some("intra"));
    }

    #[test]
    fn test_version_cache() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.upsert_version_at("v1.0.0", ts(0)).unwrap();
        store.upsert_version_at("v1.1.0", ts(10)).unwrap();
        assert_eq!(store.get_latest_version().unwrap().as_deref(), Some("v1.1.0"));

        store.upsert_version_at("v1.0.0", ts(20)).unwrap();
        assert_eq!(store.get_latest_version().unwrap().as_deref(), Some("v1.0.0"));
    }

    #[test]
    fn test_expiry_set_update_clear() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let first = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let second = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();

        store.set_expiry("vpnctl", first).unwrap();
        store.set_expiry("vpnctl", second).unwrap();
        assert_eq!(store.get_expiry("vpnctl").unwrap(), Some(second));

        assert!(store.clear_expiry("vpnctl").unwrap());
        assert!(!store.clear_expiry("vpnctl").unwrap());
        assert_eq!(store.get_expiry("vpnctl").unwrap(), None);
    }

    #[test]
    fn test_corrupt_expiry_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let conn = Connection::open(store.path()).unwrap();
        conn.execute(
            "INSERT INTO credential_expiry (account, expiry_date, updated_at) VALUES ('vpnctl', 'soon', 'x')",
            [],
        )
        .unwrap();

        assert!(matches!(
            store.get_expiry("vpnctl"),
            Err(StateError::CorruptValue { .. })
        ));
    }
}
