//! Error types for realtime voice sessions

use thiserror::Error;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the session lifecycle controller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The user (or host policy) declined microphone access
    #[error("Microphone permission denied")]
    PermissionDenied,

    /// Connect failure, inbound error/close, or a failed send
    #[error("Transport error: {0}")]
    Transport(String),

    /// Input or output audio device could not be created or failed at runtime
    #[error("Audio device error: {0}")]
    Device(String),

    /// Inbound audio payload could not be decoded
    #[error("Invalid audio frame: {0}")]
    InvalidFrame(String),

    /// Stop was requested before the session finished connecting
    #[error("Session stopped before it connected")]
    Cancelled,
}

impl SessionError {
    /// Whether the error ends a running session
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::InvalidFrame(_))
    }
}

impl From<base64::DecodeError> for SessionError {
    fn from(err: base64::DecodeError) -> Self {
        SessionError::InvalidFrame(err.to_string())
    }
}

impl From<hound::Error> for SessionError {
    fn from(err: hound::Error) -> Self {
        SessionError::Device(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}
