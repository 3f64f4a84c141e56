//! Process table access and stale-process sweeps
//!
//! The vendor client leaves GUI and helper processes behind that hold the
//! agent lock. Sweeps find candidates by command-line substring and inspect
//! every candidate's full command line before signalling it, so protected
//! processes (the always-running agent daemon) are never touched.

pub mod system;

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Process {0} not found")]
    NotFound(u32),
    #[error("Failed to signal process {pid}: {message}")]
    SignalError { pid: u32, message: String },
    #[error("Not all processes could be stopped:\n{}", .0.join("\n"))]
    Partial(Vec<String>),
    #[error("Unsupported platform")]
    UnsupportedPlatform,
}

/// Platform-agnostic view of the OS process table
pub trait ProcessTable: Send + Sync {
    /// PIDs whose command line contains `pattern`. No match is an empty list.
    fn find_pids(&self, pattern: &str) -> Result<Vec<u32>, ProcessError>;
    /// Full command line of `pid`
    fn command_line(&self, pid: u32) -> Result<String, ProcessError>;
    /// Graceful interrupt so the target can clean up
    fn signal_terminate(&self, pid: u32) -> Result<(), ProcessError>;
    /// Forceful kill, used for the GUI helper
    fn force_kill(&self, pid: u32) -> Result<(), ProcessError>;
}

/// Get the process table for the current platform
pub fn system_process_table() -> Result<Box<dyn ProcessTable>, ProcessError> {
    if !sysinfo::IS_SUPPORTED_SYSTEM {
        return Err(ProcessError::UnsupportedPlatform);
    }
    Ok(Box::new(system::SystemProcessTable::new()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    Graceful,
    Force,
}

/// Outcome of a sweep over every process matching a pattern
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub signalled: Vec<u32>,
    pub skipped: Vec<u32>,
    pub failures: Vec<String>,
}

impl SweepReport {
    pub fn merge(&mut self, other: SweepReport) {
        self.signalled.extend(other.signalled);
        self.skipped.extend(other.skipped);
        self.failures.extend(other.failures);
    }

    /// Collapse per-PID failures into one error listing all of them.
    pub fn into_result(self) -> Result<SweepReport, ProcessError> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(ProcessError::Partial(self.failures))
        }
    }
}

pub fn is_protected(command_line: &str, protected: &[String]) -> bool {
    protected
        .iter()
        .any(|name| !name.is_empty() && command_line.contains(name.as_str()))
}

/// Signal every process matching `pattern` except protected ones.
///
/// Lookup and signal failures are logged and collected; one inaccessible
/// process never stops the rest of the sweep. A candidate whose command line
/// cannot be read is skipped rather than signalled blind.
pub fn sweep(
    table: &dyn ProcessTable,
    pattern: &str,
    protected: &[String],
    mode: SweepMode,
) -> SweepReport {
    let mut report = SweepReport::default();

    let pids = match table.find_pids(pattern) {
        Ok(pids) => pids,
        Err(e) => {
            warn!("{}", e);
            report.failures.push(e.to_string());
            return report;
        }
    };

    let own_pid = std::process::id();
    for pid in pids {
        if pid == own_pid {
            continue;
        }

        let command_line = match table.command_line(pid) {
            Ok(line) => line,
            Err(e) => {
                warn!("Could not inspect process {}: {}", pid, e);
                report.skipped.push(pid);
                continue;
            }
        };

        if is_protected(&command_line, protected) {
            info!("Skipping protected process (PID {}): {}", pid, command_line);
            report.skipped.push(pid);
            continue;
        }

        let result = match mode {
            SweepMode::Graceful => table.signal_terminate(pid),
            SweepMode::Force => table.force_kill(pid),
        };
        match result {
            Ok(()) => {
                info!("Stopped '{}' (PID {})", pattern, pid);
                report.signalled.push(pid);
            }
            Err(e) => {
                warn!("{}", e);
                report.failures.push(e.to_string());
            }
        }
    }

    report
}
