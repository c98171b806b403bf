use serde::Serialize;
use std::fmt;

/// Lifecycle of one agent session.
///
/// `Connecting` covers the handshake window and never enters the registry.
/// `Active` carries traffic in both directions. `Draining` refuses new
/// outbound frames while the buffer flushes. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Active,
    Draining,
    Closed,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Active => "active",
            ConnectionStatus::Draining => "draining",
            ConnectionStatus::Closed => "closed",
        }
    }

    /// Whether moving from `self` to `next` is a legal edge of the state machine.
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;

        matches!(
            (self, next),
            (Connecting, Active)
                | (Connecting, Closed)
                | (Active, Draining)
                | (Active, Closed)
                | (Draining, Closed)
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
