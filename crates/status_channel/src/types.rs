//! Resource status and connection state types

use serde::{Deserialize, Serialize};

/// Online state of one lab resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub resource_id: String,
    pub is_online: bool,
    /// Epoch milliseconds of the resource's last connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<i64>,
}

/// Channel connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connection lost; attempt `attempt` is waiting for the backoff timer.
    RetryScheduled { attempt: u32 },
    /// Retry budget exhausted; only an explicit `connect()` leaves this state.
    GaveUp,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::RetryScheduled { attempt } => {
                write!(f, "disconnected (retry {attempt} scheduled)")
            }
            ConnectionState::GaveUp => write!(f, "disconnected (gave up)"),
        }
    }
}
