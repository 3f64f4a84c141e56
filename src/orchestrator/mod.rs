//! Connection orchestrator
//!
//! Drives one connect attempt at a time through the vendor client:
//!
//! 1. Probe status (bounded by the status timeout)
//! 2. If a tunnel is up, compare against the last-connected profile: same
//!    profile is a no-op, a different one is torn down first
//! 3. Force-kill lingering GUI processes, then let them settle
//! 4. Write the answer script and run `connect`, draining its output
//! 5. Interpret the output: established, agent lock, or failed
//!
//! A failed attempt is retried up to `connection_retry` times with a fixed
//! backoff. An agent lock is reported once and never retried, it needs a
//! person to restart the vendor client.

pub mod script;

use crate::background::Background;
use crate::client::output::{self, ConnectVerdict, LinkState};
use crate::client::{ClientError, VpnClient};
use crate::config::Config;
use crate::process::{self, ProcessError, ProcessTable, SweepMode, SweepReport};
use crate::profile::Profile;
use crate::state::StateStore;
use crate::vault::Credential;
use chrono::Utc;
use script::{AnswerScript, ScriptFileError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("VPN client error: {0}")]
    Client(#[from] ClientError),
    #[error("{0}")]
    Process(#[from] ProcessError),
    #[error("{0}")]
    Script(#[from] ScriptFileError),
}

const AGENT_LOCK_HELP: &str =
    "Detected Cisco VPN agent lock. Please manually restart Cisco Secure Client and try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Nothing was run
    UnknownProfile(String),
    /// The requested profile is already the live session
    AlreadyConnected(Profile),
    Connected { profile: Profile, attempts: u32 },
    AgentLocked,
    GaveUp { attempts: u32 },
}

/// Orchestrator knobs, taken from [`Config`] once at start-up
#[derive(Debug, Clone)]
pub struct Settings {
    pub status_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub client_process_pattern: String,
    pub gui_process_name: String,
    pub protected_processes: Vec<String>,
    pub kill_settle: Duration,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            status_timeout: config.status_timeout(),
            max_retries: config.vpn.connection_retry,
            retry_backoff: config.retry_backoff(),
            client_process_pattern: config.vpn.client_process_pattern.clone(),
            gui_process_name: config.vpn.gui_process_name.clone(),
            protected_processes: config.vpn.protected_processes.clone(),
            kill_settle: config.kill_settle(),
        }
    }
}

pub struct Orchestrator {
    client: Box<dyn VpnClient>,
    processes: Arc<dyn ProcessTable>,
    state: StateStore,
    settings: Settings,
    background: Background,
}

impl Orchestrator {
    pub fn new(
        client: Box<dyn VpnClient>,
        processes: Arc<dyn ProcessTable>,
        state: StateStore,
        settings: Settings,
        background: Background,
    ) -> Self {
        Self {
            client,
            processes,
            state,
            settings,
            background,
        }
    }

    /// Connect to `profile_name` with `credential`.
    ///
    /// Unknown profiles, duplicate connects, agent locks and exhausted
    /// retries are outcomes, not errors. Status-probe timeouts, client start
    /// failures and answer-script failures abort with an error.
    pub async fn connect(
        &self,
        profile_name: &str,
        credential: &Credential,
    ) -> Result<ConnectOutcome, OrchestratorError> {
        let profile: Profile = match profile_name.parse() {
            Ok(profile) => profile,
            Err(e) => {
                error!("{}", e);
                return Ok(ConnectOutcome::UnknownProfile(profile_name.to_string()));
            }
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            info!("Connecting to {} (attempt {})", profile, attempt);

            if self.resolve_existing_session(profile).await? {
                return Ok(ConnectOutcome::AlreadyConnected(profile));
            }

            self.clear_stale_gui().await;

            let verdict = self.run_connect(profile, credential).await?;
            match verdict {
                ConnectVerdict::Established => {
                    info!("VPN connected to {}", profile);
                    self.record_session(profile);
                    self.launch_gui_best_effort().await;
                    return Ok(ConnectOutcome::Connected {
                        profile,
                        attempts: attempt,
                    });
                }
                ConnectVerdict::AgentLocked => {
                    warn!("{}", AGENT_LOCK_HELP);
                    println!("{}", AGENT_LOCK_HELP);
                    return Ok(ConnectOutcome::AgentLocked);
                }
                ConnectVerdict::Failed if attempt > self.settings.max_retries => {
                    error!(
                        "Could not connect to {} after {} attempt(s), giving up",
                        profile, attempt
                    );
                    return Ok(ConnectOutcome::GaveUp { attempts: attempt });
                }
                ConnectVerdict::Failed => {
                    warn!(
                        "Connect attempt {} to {} failed, retrying in {:?}",
                        attempt, profile, self.settings.retry_backoff
                    );
                    tokio::time::sleep(self.settings.retry_backoff).await;
                }
            }
        }
    }

    /// Returns true when `profile` is already the live session. A live
    /// session on another profile is torn down.
    async fn resolve_existing_session(&self, profile: Profile) -> Result<bool, OrchestratorError> {
        info!("Checking current VPN connection status...");
        let status = match self
            .client
            .status(false, self.settings.status_timeout)
            .await
        {
            Ok(output) => output,
            // The client exits non-zero in some idle states, its text still counts
            Err(ClientError::ExitFailure { output, .. }) => output,
            Err(e) => return Err(e.into()),
        };

        if output::interpret_status(&status) != LinkState::Connected {
            debug!("No active VPN session");
            return Ok(false);
        }

        let last = self.last_connected().await;
        info!(
            "Last connected VPN profile: {}",
            last.as_deref().unwrap_or("<none>")
        );
        if last.as_deref() == Some(profile.name()) {
            info!(
                "VPN already connected to profile {}, nothing to do",
                profile
            );
            return Ok(true);
        }

        info!(
            "VPN connected to profile {}, switching to {}",
            last.as_deref().unwrap_or("<unknown>"),
            profile
        );
        self.teardown().await;
        Ok(false)
    }

    async fn last_connected(&self) -> Option<String> {
        let state = self.state.clone();
        match tokio::task::spawn_blocking(move || state.get_last_connected()).await {
            Ok(Ok(last)) => last,
            Ok(Err(e)) => {
                warn!("Could not read last connected profile: {}", e);
                None
            }
            Err(e) => {
                warn!("Could not read last connected profile: {}", e);
                None
            }
        }
    }

    /// Disconnect the current session and stop the GUI. Failures are logged.
    async fn teardown(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("VPN disconnect failed: {}", e);
        }
        let report = self
            .sweep(&self.settings.gui_process_name, SweepMode::Graceful)
            .await;
        if let Err(e) = report.into_result() {
            warn!("{}", e);
        }
    }

    /// Force-kill lingering GUI processes that would otherwise hold the agent lock
    async fn clear_stale_gui(&self) {
        let report = self
            .sweep(&self.settings.gui_process_name, SweepMode::Force)
            .await;
        if !report.signalled.is_empty() && !self.settings.kill_settle.is_zero() {
            tokio::time::sleep(self.settings.kill_settle).await;
        }
        if let Err(e) = report.into_result() {
            error!("Failed to stop stale client processes before connect: {}", e);
        }
    }

    async fn run_connect(
        &self,
        profile: Profile,
        credential: &Credential,
    ) -> Result<ConnectVerdict, OrchestratorError> {
        let answers = AnswerScript::write(credential, profile)?;
        debug!("Answer script at {}", answers.path().display());

        let run = self.client.connect(profile.target(), answers.path()).await?;
        drop(answers);

        if !run.success {
            warn!("VPN client exited with code {:?}", run.code);
        }
        Ok(output::interpret_connect(&run.stdout, run.success))
    }

    fn record_session(&self, profile: Profile) {
        let state = self.state.clone();
        self.background
            .spawn_blocking("Session state update", move || {
                state.upsert_last_connected(profile.name(), Utc::now())
            });
    }

    async fn launch_gui_best_effort(&self) {
        if let Err(e) = self.client.launch_gui().await {
            error!("Launching VPN client GUI failed: {}", e);
        }
    }

    async fn sweep(&self, pattern: &str, mode: SweepMode) -> SweepReport {
        let table = Arc::clone(&self.processes);
        let pattern = pattern.to_string();
        let protected = self.settings.protected_processes.clone();

        let result = tokio::task::spawn_blocking(move || {
            process::sweep(table.as_ref(), &pattern, &protected, mode)
        })
        .await;
        match result {
            Ok(report) => report,
            Err(e) => SweepReport {
                failures: vec![format!("process sweep failed: {}", e)],
                ..SweepReport::default()
            },
        }
    }

    /// Disconnect, then stop GUI and client processes. The disconnect
    /// subcommand is best-effort; stop failures are aggregated.
    pub async fn disconnect(&self) -> Result<SweepReport, OrchestratorError> {
        info!("Attempting to disconnect VPN...");
        match self.client.disconnect().await {
            Ok(output) => debug!("disconnect: {}", output.trim()),
            Err(e) => warn!("VPN disconnect failed: {}", e),
        }
        let report = self.kill().await?;
        info!("VPN disconnected");
        Ok(report)
    }

    /// Stop GUI and client processes without asking the client to disconnect
    pub async fn kill(&self) -> Result<SweepReport, OrchestratorError> {
        let mut report = self
            .sweep(&self.settings.gui_process_name, SweepMode::Graceful)
            .await;
        report.merge(
            self.sweep(&self.settings.client_process_pattern, SweepMode::Graceful)
                .await,
        );
        info!(
            "Stopped {} process(es), skipped {}",
            report.signalled.len(),
            report.skipped.len()
        );
        Ok(report.into_result()?)
    }

    /// Print the client's brief status output verbatim
    pub async fn status(&self) -> Result<String, OrchestratorError> {
        info!("Checking VPN status...");
        match self.client.status(true, self.settings.status_timeout).await {
            Ok(output) => {
                println!("{}", output);
                Ok(output)
            }
            Err(e) => {
                if let ClientError::ExitFailure { output, .. } = &e {
                    println!("{}", output);
                }
                Err(e.into())
            }
        }
    }

    pub async fn launch_gui(&self) -> Result<(), OrchestratorError> {
        Ok(self.client.launch_gui().await?)
    }
}
