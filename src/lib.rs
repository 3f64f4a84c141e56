//! vpnctl - Cisco Secure Client session orchestrator
//!
//! Connects to a small fixed set of VPN profiles by driving the vendor's
//! `vpn` command-line client, with credentials held in the OS keyring.
//!
//! # Architecture
//!
//! - `config`: Configuration file handling (TOML)
//! - `profile`: The closed set of VPN profiles
//! - `vault`: Credential storage, encryption at rest, interactive prompt
//! - `state`: SQLite session state (last profile, credential expiry, versions)
//! - `process`: Process lookup and protected-name-aware sweeps
//! - `client`: The vendor client as a subprocess and its output markers
//! - `orchestrator`: Connect / disconnect / kill / status flows
//! - `background`: Detached persistence drained before exit
//! - `discovery`: Locating the vendor binary
//! - `updater`: Release check
//! - `logging`: Console and file logging
//!
//! # Usage
//!
//! ```bash
//! vpnctl connect intra
//! vpnctl status
//! vpnctl disconnect
//! ```

pub mod background;
pub mod client;
pub mod config;
pub mod discovery;
pub mod logging;
pub mod orchestrator;
pub mod process;
pub mod profile;
pub mod state;
pub mod updater;
pub mod vault;

pub use config::Config;
pub use orchestrator::{ConnectOutcome, Orchestrator};
pub use profile::Profile;
pub use vault::{Credential, CredentialVault};
