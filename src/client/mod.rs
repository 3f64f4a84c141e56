//! Vendor VPN client collaborator
//!
//! The Cisco Secure Client command-line tool is driven as a black box:
//! `status [-s]`, `disconnect` and `connect <target> -s` with the answer
//! script on stdin. Everything the orchestrator knows about the tunnel comes
//! from this tool's text output, interpreted in [`output`].

pub mod output;
pub mod supervise;

pub use supervise::ConnectRun;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to start {binary}: {source}")]
    SpawnError {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{command}' timed out after {secs}s")]
    Timeout { command: String, secs: u64 },
    #[error("'{command}' exited with {status}: {output}")]
    ExitFailure {
        command: String,
        status: String,
        output: String,
    },
    #[error("Failed to set up client output streams: {0}")]
    StreamSetup(String),
    #[error("Failed waiting for client: {0}")]
    WaitError(#[source] std::io::Error),
    #[error("Failed to open answer script: {0}")]
    ScriptError(#[source] std::io::Error),
}

#[async_trait]
pub trait VpnClient: Send + Sync {
    /// Combined output of `status` (or `status -s` when `brief`), bounded by `limit`
    async fn status(&self, brief: bool, limit: Duration) -> Result<String, ClientError>;
    async fn disconnect(&self) -> Result<String, ClientError>;
    /// Run `connect <target> -s` with `script` on stdin until the client exits
    async fn connect(&self, target: &str, script: &Path) -> Result<ConnectRun, ClientError>;
    async fn launch_gui(&self) -> Result<(), ClientError>;
}

/// Drives the installed vendor binaries as subprocesses
pub struct CliVpnClient {
    binary: PathBuf,
    gui: PathBuf,
}

impl CliVpnClient {
    pub fn new(binary: impl Into<PathBuf>, gui: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            gui: gui.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);
        cmd
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.binary.display(), args.join(" "))
    }

    fn spawn_error(&self, source: std::io::Error) -> ClientError {
        ClientError::SpawnError {
            binary: self.binary.display().to_string(),
            source,
        }
    }
}

fn combined_output(output: &std::process::Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

#[async_trait]
impl VpnClient for CliVpnClient {
    async fn status(&self, brief: bool, limit: Duration) -> Result<String, ClientError> {
        let args: &[&str] = if brief { &["status", "-s"] } else { &["status"] };
        debug!("Running {}", self.describe(args));

        let child = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // Dropping the future on timeout drops the child, which kills it
        let output = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| ClientError::Timeout {
                command: self.describe(args),
                secs: limit.as_secs(),
            })?
            .map_err(ClientError::WaitError)?;

        let text = combined_output(&output);
        if !output.status.success() {
            return Err(ClientError::ExitFailure {
                command: self.describe(args),
                status: output.status.to_string(),
                output: text,
            });
        }
        Ok(text)
    }

    async fn disconnect(&self) -> Result<String, ClientError> {
        let args = ["disconnect"];
        info!("Running {}", self.describe(&args));

        let output = self
            .command(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        let text = combined_output(&output);
        if !output.status.success() {
            return Err(ClientError::ExitFailure {
                command: self.describe(&args),
                status: output.status.to_string(),
                output: text,
            });
        }
        Ok(text)
    }

    async fn connect(&self, target: &str, script: &Path) -> Result<ConnectRun, ClientError> {
        let args = ["connect", target, "-s"];
        info!("Running {}", self.describe(&args));

        let stdin = std::fs::File::open(script).map_err(ClientError::ScriptError)?;
        let child = self
            .command(&args)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        supervise::supervise(child).await
    }

    async fn launch_gui(&self) -> Result<(), ClientError> {
        info!("Launching {}", self.gui.display());

        #[cfg(target_os = "macos")]
        let mut cmd = {
            let mut cmd = Command::new("open");
            cmd.arg(&self.gui);
            cmd
        };

        #[cfg(not(target_os = "macos"))]
        let mut cmd = Command::new(&self.gui);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ClientError::SpawnError {
                binary: self.gui.display().to_string(),
                source: e,
            })?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Stand-in for the vendor binary: a shell script answering each subcommand
    fn fake_binary(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("vpn");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_status_returns_combined_output() {
        let dir = TempDir::new().unwrap();
        let binary = fake_binary(&dir, "echo \"  >> state: Connected\"; echo warn >&2");
        let client = CliVpnClient::new(binary, "/nonexistent");

        let output = client.status(true, Duration::from_secs(5)).await.unwrap();
        assert!(output.contains("state: Connected"));
        assert!(output.contains("warn"));
    }

    #[tokio::test]
    async fn test_status_timeout_is_distinct() {
        let dir = TempDir::new().unwrap();
        let binary = fake_binary(&dir, "sleep 5");
        let client = CliVpnClient::new(binary, "/nonexistent");

        let err = client
            .status(false, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_status_non_zero_exit_is_distinct() {
        let dir = TempDir::new().unwrap();
        let binary = fake_binary(&dir, "echo broken; exit 2");
        let client = CliVpnClient::new(binary, "/nonexistent");

        match client.status(false, Duration::from_secs(5)).await {
            Err(ClientError::ExitFailure { output, .. }) => assert!(output.contains("broken")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let client = CliVpnClient::new("/nonexistent/vpn", "/nonexistent");
        assert!(matches!(
            client.status(false, Duration::from_secs(1)).await,
            Err(ClientError::SpawnError { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_feeds_script_and_collects_output() {
        let dir = TempDir::new().unwrap();
        let binary = fake_binary(
            &dir,
            "echo \"target $2\"; read user; read pass; echo \"user $user\"; echo \"  >> state: Connected\"",
        );
        let script = dir.path().join("answers");
        std::fs::write(&script, "alice\nhunter2\ny\n").unwrap();
        let client = CliVpnClient::new(binary, "/nonexistent");

        let run = client.connect("INTRA", &script).await.unwrap();
        assert!(run.success);
        assert_eq!(
            run.stdout,
            vec![
                "target INTRA".to_string(),
                "user alice".to_string(),
                "  >> state: Connected".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnect_runs_subcommand() {
        let dir = TempDir::new().unwrap();
        let record = dir.path().join("args");
        let binary = fake_binary(
            &dir,
            &format!(
                "echo \"$@\" > {}; echo \"  >> state: Disconnected\"",
                record.display()
            ),
        );
        let client = CliVpnClient::new(binary, "/nonexistent");

        let output = client.disconnect().await.unwrap();
        assert!(output.contains("state: Disconnected"));
        assert_eq!(std::fs::read_to_string(&record).unwrap(), "disconnect\n");
    }

    #[tokio::test]
    async fn test_disconnect_non_zero_exit() {
        let dir = TempDir::new().unwrap();
        let binary = fake_binary(&dir, "echo \"  >> error: not connected\" >&2; exit 1");
        let client = CliVpnClient::new(binary, "/nonexistent");

        match client.disconnect().await {
            Err(ClientError::ExitFailure { output, .. }) => {
                assert!(output.contains("not connected"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(not(target_os = "macos"))]
    #[tokio::test]
    async fn test_launch_gui_starts_detached() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("launched");
        let gui = dir.path().join("gui");
        std::fs::write(&gui, format!("#!/bin/sh
touch {}
", marker.display())).unwrap();
        std::fs::set_permissions(&gui, std::fs::Permissions::from_mode(0o755)).unwrap();
        let client = CliVpnClient::new("/nonexistent/vpn", &gui);

        client.launch_gui().await.unwrap();
        for _ in 0..100 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(marker.exists());
    }

    #[cfg(not(target_os = "macos"))]
    #[tokio::test]
    async fn test_launch_missing_gui_is_spawn_error() {
        let client = CliVpnClient::new("/nonexistent/vpn", "/nonexistent/gui");
        assert!(matches!(
            client.launch_gui().await,
            Err(ClientError::SpawnError { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_missing_script() {
        let dir = TempDir::new().unwrap();
        let binary = fake_binary(&dir, "true");
        let client = CliVpnClient::new(binary, "/nonexistent");

        assert!(matches!(
            client.connect("INTRA", &dir.path().join("absent")).await,
            Err(ClientError::ScriptError(_))
        ));
    }
}
