use serde::{Deserialize, Serialize};
use std::fmt;

use super::stats::SessionStats;
use super::transcript::TranscriptLine;

/// Connection state of a voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Closing,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Why a running session ended
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Requested,
    TransportClosed,
    TransportError(String),
    DeviceError(String),
}

impl StopReason {
    pub fn error(&self) -> Option<String> {
        match self {
            StopReason::Requested | StopReason::TransportClosed => None,
            StopReason::TransportError(e) => Some(format!("transport: {}", e)),
            StopReason::DeviceError(e) => Some(format!("device: {}", e)),
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => f.write_str("stop requested"),
            StopReason::TransportClosed => f.write_str("transport closed"),
            StopReason::TransportError(e) => write!(f, "transport error: {}", e),
            StopReason::DeviceError(e) => write!(f, "device error: {}", e),
        }
    }
}

/// Read-only view of a session published to observers
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub muted: bool,
    pub stats: SessionStats,
    pub transcript: Vec<TranscriptLine>,
}
