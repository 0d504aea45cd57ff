use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected with continuous receive armed.
    Receiving,
}

impl LinkState {
    pub fn is_connected(self) -> bool {
        matches!(self, LinkState::Connected | LinkState::Receiving)
    }
}

/// Why a connected period ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    Local,
    /// The peer closed its side (zero-byte read).
    PeerClosed,
    /// The peer reset or aborted the connection.
    PeerReset,
    /// Any other receive failure.
    Fault,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::Local => "local",
            DisconnectReason::PeerClosed => "peer_closed",
            DisconnectReason::PeerReset => "peer_reset",
            DisconnectReason::Fault => "fault",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
