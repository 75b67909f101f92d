use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::audio::{AudioHostKind, MicrophonePermission, DEFAULT_FRAME_SIZE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::transport::TransportKind;

const SYSTEM_INSTRUCTION: &str = "You are RhinoBot Voice, a helpful assistant for xrhino developers. \
Keep responses short and conversational.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub voice: VoiceConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "rhino-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub host: AudioHostKind,
    /// Microphone context rate (outbound frames)
    pub input_sample_rate: u32,
    /// Output context rate (inbound frames)
    pub output_sample_rate: u32,
    /// Samples per captured frame
    pub frame_size: usize,
    pub playback_gain: f32,
    /// WAV file used as the microphone by the file host (silence if unset)
    pub input_file: Option<String>,
    /// Where the file host writes rendered playback
    pub output_file: Option<String>,
    pub loop_input: bool,
    pub microphone_permission: MicrophonePermission,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            host: AudioHostKind::File,
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            playback_gain: 1.0,
            input_file: None,
            output_file: None,
            loop_input: false,
            microphone_permission: MicrophonePermission::Granted,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
    /// Transcript lines kept for display
    pub transcript_capacity: usize,
    pub user_label: String,
    pub assistant_label: String,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice_name: "Fenrir".to_string(),
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            transcript_capacity: 5,
            user_label: "You".to_string(),
            assistant_label: "Rhino".to_string(),
            input_transcription: true,
            output_transcription: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub gemini: GeminiConfig,
    pub nats: NatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub endpoint: String,
    /// Inline key; prefer `api_key_env`
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            api_key: None,
            api_key_env: "API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    pub subject_prefix: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            subject_prefix: "voice".to_string(),
        }
    }
}

impl Config {
    /// Load `path` (any extension the config crate knows, optional) layered
    /// with `RHINO__SECTION__KEY` environment variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("RHINO").separator("__"))
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.frame_size == 0 {
            anyhow::bail!("audio.frame_size must be greater than 0");
        }
        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            anyhow::bail!("audio sample rates must be greater than 0");
        }
        if self.voice.transcript_capacity == 0 {
            anyhow::bail!("voice.transcript_capacity must be greater than 0");
        }
        Ok(())
    }
}
