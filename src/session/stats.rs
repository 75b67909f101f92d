use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// Statistics about a voice session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    /// Connection state when the stats were taken
    pub state: SessionState,

    /// When the last start was requested
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since `started_at`
    pub duration_secs: f64,

    /// Microphone frames delivered by the capture device
    pub frames_captured: u64,

    /// Frames handed to the transport
    pub frames_sent: u64,

    /// Frames dropped because the session was muted
    pub frames_dropped_muted: u64,

    /// Inbound messages carrying audio
    pub audio_frames_received: u64,

    /// Inbound audio frames placed on the playback timeline
    pub audio_frames_scheduled: u64,

    /// Inbound audio frames that could not be decoded
    pub invalid_frames: u64,

    /// Interruptions signalled by the server
    pub interruptions: u64,

    /// Plain-text model parts received (not shown in the transcript)
    pub model_text_parts: u64,

    /// Transcript lines received (including ones rotated out)
    pub transcript_lines: u64,

    /// Diagnostic for the last abnormal end
    pub last_error: Option<String>,
}

impl SessionStats {
    /// Stats with `duration_secs` computed at `now`
    pub fn at(&self, now: DateTime<Utc>) -> Self {
        let mut stats = self.clone();
        stats.duration_secs = self
            .started_at
            .map(|start| now.signed_duration_since(start).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        stats
    }
}
