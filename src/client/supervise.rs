//! Draining a running client's output streams
//!
//! stdout is echoed to the console and buffered; stderr goes to the error
//! log. The buffered lines are handed back only after the stdout task has
//! seen end-of-stream, which can lag the process exit.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::ClientError;

/// Exit status and every stdout line of a finished client run
#[derive(Debug, Clone)]
pub struct ConnectRun {
    pub success: bool,
    /// `None` when the client was killed by a signal
    pub code: Option<i32>,
    pub stdout: Vec<String>,
}

fn drain_stdout<R>(stream: R) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        let mut buffered = Vec::new();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    println!("[VPN stdout] {}", line);
                    buffered.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Error reading client stdout: {}", e);
                    break;
                }
            }
        }
        debug!("Client stdout closed after {} lines", buffered.len());
        buffered
    })
}

fn drain_stderr<R>(stream: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => error!("[VPN stderr] {}", line),
                Ok(None) => break,
                Err(e) => {
                    error!("Error reading client stderr: {}", e);
                    break;
                }
            }
        }
    })
}

/// Wait for `child` while draining both of its output pipes.
///
/// The child must have been spawned with piped stdout and stderr.
pub async fn supervise(mut child: Child) -> Result<ConnectRun, ClientError> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ClientError::StreamSetup("stdout is not piped".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ClientError::StreamSetup("stderr is not piped".to_string()))?;

    let stdout_task = drain_stdout(stdout);
    let stderr_task = drain_stderr(stderr);

    let status = child.wait().await.map_err(ClientError::WaitError)?;

    let stdout = stdout_task
        .await
        .map_err(|e| ClientError::StreamSetup(format!("stdout reader failed: {}", e)))?;
    if let Err(e) = stderr_task.await {
        error!("stderr reader failed: {}", e);
    }

    Ok(ConnectRun {
        success: status.success(),
        code: status.code(),
        stdout,
    })
}
