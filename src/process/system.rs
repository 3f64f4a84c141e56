//! Process table backed by a `sysinfo` snapshot

use super::{ProcessError, ProcessTable};
use std::sync::{Mutex, MutexGuard};
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};
use tracing::debug;

/// Lookups refresh the snapshot; command lines and signals are served from
/// it, re-reading a single PID only when it is not in the snapshot yet.
pub struct SystemProcessTable {
    system: Mutex<System>,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn refresh_kind() -> ProcessRefreshKind {
        ProcessRefreshKind::nothing()
            .with_cmd(UpdateKind::Always)
            .with_exe(UpdateKind::OnlyIfNotSet)
    }

    fn snapshot(&self) -> MutexGuard<'_, System> {
        self.system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot locked with `pid` present, if it is still running
    fn with_process<T>(
        &self,
        pid: u32,
        f: impl FnOnce(&Process) -> T,
    ) -> Result<T, ProcessError> {
        let mut system = self.snapshot();
        let target = Pid::from_u32(pid);
        if system.process(target).is_none() {
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[target]),
                true,
                Self::refresh_kind(),
            );
        }
        system
            .process(target)
            .map(f)
            .ok_or(ProcessError::NotFound(pid))
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments joined by spaces, or the executable path when the arguments
/// are not readable
fn command_line_of(process: &Process) -> Option<String> {
    let cmd = process.cmd();
    if !cmd.is_empty() {
        let joined = cmd
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        return Some(joined);
    }
    process
        .exe()
        .map(|path| path.to_string_lossy().into_owned())
}

impl ProcessTable for SystemProcessTable {
    fn find_pids(&self, pattern: &str) -> Result<Vec<u32>, ProcessError> {
        let mut system = self.snapshot();
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, Self::refresh_kind());

        let own_pid = std::process::id();
        let mut pids: Vec<u32> = system
            .processes()
            .iter()
            .filter(|(_, process)| {
                command_line_of(process).is_some_and(|line| line.contains(pattern))
            })
            .map(|(pid, _)| pid.as_u32())
            .filter(|pid| *pid != own_pid)
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn command_line(&self, pid: u32) -> Result<String, ProcessError> {
        self.with_process(pid, command_line_of)?
            .ok_or(ProcessError::NotFound(pid))
    }

    fn signal_terminate(&self, pid: u32) -> Result<(), ProcessError> {
        let sent = self.with_process(pid, |process| match process.kill_with(Signal::Interrupt) {
            Some(sent) => sent,
            None => {
                debug!("Interrupt unsupported here, killing PID {}", pid);
                process.kill()
            }
        })?;
        if sent {
            Ok(())
        } else {
            Err(ProcessError::SignalError {
                pid,
                message: "interrupt was not delivered".to_string(),
            })
        }
    }

    fn force_kill(&self, pid: u32) -> Result<(), ProcessError> {
        if self.with_process(pid, Process::kill)? {
            Ok(())
        } else {
            Err(ProcessError::SignalError {
                pid,
                message: "kill was not delivered".to_string(),
            })
        }
    }
}
