use serde::{Deserialize, Serialize};

/// Connectivity of the realtime channel, as reported to the session
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No channel, e.g. no server configured or no game attached
    Offline,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Closed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}
