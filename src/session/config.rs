use serde::{Deserialize, Serialize};

use crate::audio::CaptureConfig;
use crate::config::{Config, VoiceConfig};
use crate::transport::SessionSetup;

/// Configuration for a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "voice-5f0c...")
    pub session_id: String,

    /// Microphone context rate; the realtime endpoint expects 16kHz
    pub input_sample_rate: u32,

    /// Output context rate; the realtime endpoint produces 24kHz
    pub output_sample_rate: u32,

    /// Samples per captured frame
    pub frame_size: usize,

    /// Gain applied to inbound audio
    pub playback_gain: f32,

    /// Model, voice and transcript settings
    pub voice: VoiceConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(format!("voice-{}", uuid::Uuid::new_v4()), &Config::default())
    }
}

impl SessionConfig {
    pub fn from_config(session_id: impl Into<String>, config: &Config) -> Self {
        Self {
            session_id: session_id.into(),
            input_sample_rate: config.audio.input_sample_rate,
            output_sample_rate: config.audio.output_sample_rate,
            frame_size: config.audio.frame_size,
            playback_gain: config.audio.playback_gain,
            voice: config.voice.clone(),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.input_sample_rate,
            frame_size: self.frame_size,
        }
    }

    pub fn setup(&self) -> SessionSetup {
        SessionSetup::from_config(self.session_id.clone(), &self.voice)
    }
}
