//! Interpretation of the vendor client's text output
//!
//! The client has no machine-readable status. These markers were observed on
//! real installs; unknown output never counts as success.

/// Present in `vpn status` output while a tunnel is up. Case-sensitive, so
/// "Disconnected" does not match.
pub const CONNECTED_MARKER: &str = "Connected";

/// Printed by `vpn connect` when the agent is wedged and needs a restart
pub const AGENT_LOCK_MARKER: &str = "Connect capability is unavailable";

/// Printed by `vpn connect` once the tunnel is established
const ESTABLISHED_MARKERS: [&str; 2] = ["state: Connected", ">> notice: VPN session established"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    NotConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectVerdict {
    Established,
    /// Needs a manual restart of the vendor client, never retried
    AgentLocked,
    /// Anything else, including output we do not recognise
    Failed,
}

pub fn interpret_status(output: &str) -> LinkState {
    if output.contains(CONNECTED_MARKER) {
        LinkState::Connected
    } else {
        LinkState::NotConnected
    }
}

pub fn interpret_connect<S: AsRef<str>>(lines: &[S], exit_success: bool) -> ConnectVerdict {
    if lines
        .iter()
        .any(|line| line.as_ref().contains(AGENT_LOCK_MARKER))
    {
        return ConnectVerdict::AgentLocked;
    }
    let established = lines.iter().any(|line| {
        ESTABLISHED_MARKERS
            .iter()
            .any(|marker| line.as_ref().contains(marker))
    });
    if exit_success && established {
        ConnectVerdict::Established
    } else {
        ConnectVerdict::Failed
    }
}
