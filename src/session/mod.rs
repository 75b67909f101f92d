//! Realtime voice session management
//!
//! This module provides the `VoiceSession` abstraction that manages:
//! - Microphone capture and outbound framing (with mute)
//! - The transport session to the realtime endpoint
//! - Gapless playback of inbound audio and interruption handling
//! - A capped transcript log and session statistics

mod capture;
mod config;
mod session;
mod state;
mod stats;
mod transcript;

pub use capture::CapturePipeline;
pub use config::SessionConfig;
pub use session::{PendingStart, VoiceSession};
pub use state::{SessionSnapshot, SessionState, StopReason};
pub use stats::SessionStats;
pub use transcript::{Speaker, TranscriptLine, TranscriptLog};
