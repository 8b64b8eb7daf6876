//! Peer connection state tracking.

use serde::{Deserialize, Serialize};

/// `RTCPeerConnectionState` as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    None,
    Connected,
    /// Start the disconnect grace timer.
    ArmGrace,
    /// Go to the reconnection path now.
    Escalate,
    Closed,
}

/// Decides how connection state changes affect negotiation.
///
/// `disconnected` is given a grace window to recover, `failed` escalates
/// at once, `closed` is sticky until the next attempt resets the monitor.
#[derive(Debug)]
pub struct ConnectionMonitor {
    state: PeerConnectionState,
    grace_armed: bool,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self { state: PeerConnectionState::New, grace_armed: false }
    }

    pub fn state(&self) -> PeerConnectionState {
        self.state
    }

    pub fn on_state(&mut self, next: PeerConnectionState) -> MonitorAction {
        if self.state == PeerConnectionState::Closed {
            return MonitorAction::None;
        }
        let previous = std::mem::replace(&mut self.state, next);

        match next {
            PeerConnectionState::Connected if previous != PeerConnectionState::Connected => {
                self.grace_armed = false;
                MonitorAction::Connected
            }
            PeerConnectionState::Disconnected if !self.grace_armed => {
                self.grace_armed = true;
                MonitorAction::ArmGrace
            }
            PeerConnectionState::Failed if previous != PeerConnectionState::Failed => {
                self.grace_armed = false;
                MonitorAction::Escalate
            }
            PeerConnectionState::Closed => {
                self.grace_armed = false;
                MonitorAction::Closed
            }
            _ => MonitorAction::None,
        }
    }

    /// Grace timer fired. True if the connection never came back.
    pub fn on_grace_expired(&mut self) -> bool {
        if !self.grace_armed {
            return false;
        }
        self.grace_armed = false;
        self.state == PeerConnectionState::Disconnected
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
