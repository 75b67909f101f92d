//! Transport sessions to the realtime voice endpoint
//!
//! A transport accepts outbound audio frames (fire-and-forget, in order) and
//! reports server events on a channel:
//! - `gemini`: direct WebSocket connection to the Gemini Live endpoint
//! - `nats`: relay through NATS subjects
//! - `scripted`: replays a prepared event sequence (tests)

pub mod gemini;
pub mod messages;
pub mod nats;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::audio::OutboundFrame;
use crate::config::{TransportConfig, VoiceConfig};
use crate::error::SessionResult;

pub use gemini::GeminiLiveConnector;
pub use messages::{ClientMessage, ServerMessage};
pub use nats::NatsConnector;
pub use scripted::{ScriptHandle, ScriptedConnector};

/// Upper bound on opening a remote session
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// How long `close()` lets a writer drain its queue before aborting it
pub const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Wait for a writer task to finish, aborting it once `limit` passes
///
/// A stalled socket can block the writer forever; close must still return.
pub(crate) async fn join_writer(name: &str, mut writer: JoinHandle<()>, limit: Duration) {
    match tokio::time::timeout(limit, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("{} writer task failed: {}", name, e),
        Err(_) => {
            warn!("{} writer did not drain within {:?}, aborting", name, limit);
            writer.abort();
        }
    }
}

/// Event delivered by a transport session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The remote side confirmed the session
    Open,
    Message(ServerMessage),
    Close,
    Error(String),
}

/// What the remote endpoint is asked to be
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSetup {
    pub session_id: String,
    pub model: String,
    pub voice_name: String,
    pub system_instruction: Option<String>,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

impl SessionSetup {
    pub fn from_config(session_id: impl Into<String>, voice: &VoiceConfig) -> Self {
        Self {
            session_id: session_id.into(),
            model: voice.model.clone(),
            voice_name: voice.voice_name.clone(),
            system_instruction: Some(voice.system_instruction.clone()).filter(|s| !s.is_empty()),
            input_transcription: voice.input_transcription,
            output_transcription: voice.output_transcription,
        }
    }

    /// The `setup` message opening a session
    pub fn to_message(&self) -> ClientMessage {
        use messages::{
            AudioTranscriptionConfig, Content, GenerationConfig, Part, PrebuiltVoiceConfig, Setup,
            SpeechConfig,
        };

        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };

        ClientMessage::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: messages::VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice_name.clone(),
                        },
                    },
                }),
            },
            system_instruction: self.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part {
                    inline_data: None,
                    text: Some(text.clone()),
                }],
            }),
            input_audio_transcription: self
                .input_transcription
                .then(AudioTranscriptionConfig::default),
            output_audio_transcription: self
                .output_transcription
                .then(AudioTranscriptionConfig::default),
        })
    }
}

/// Outbound half of a transport session
#[async_trait]
pub trait Transport: Send {
    /// Queue a frame for sending; never blocks on delivery
    fn send_realtime_input(&mut self, frame: OutboundFrame) -> SessionResult<()>;

    /// Shut the remote session down
    async fn close(&mut self) -> SessionResult<()>;

    /// Get transport name for logging
    fn name(&self) -> &str;
}

/// A connected transport: sender plus inbound event stream
pub struct TransportSession {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens transport sessions
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self, setup: &SessionSetup) -> SessionResult<TransportSession>;

    fn name(&self) -> &str;
}

/// Transport type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Gemini,
    Nats,
}

/// Transport connector factory
pub struct TransportFactory;

impl TransportFactory {
    /// Create the connector described by configuration
    pub fn create(config: &TransportConfig) -> anyhow::Result<Arc<dyn TransportConnector>> {
        match config.kind {
            TransportKind::Gemini => {
                let connector = GeminiLiveConnector::from_config(&config.gemini)?;
                Ok(Arc::new(connector))
            }
            TransportKind::Nats => Ok(Arc::new(NatsConnector::new(
                config.nats.url.clone(),
                config.nats.subject_prefix.clone(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SessionSetup {
        SessionSetup {
            session_id: "s1".to_string(),
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice_name: "Fenrir".to_string(),
            system_instruction: Some("Be brief.".to_string()),
            input_transcription: true,
            output_transcription: true,
        }
    }

    #[test]
    fn test_setup_message_prefixes_model() {
        let value = serde_json::to_value(setup().to_message()).unwrap();
        assert_eq!(
            value["setup"]["model"],
            "models/gemini-2.5-flash-native-audio-preview-09-2025"
        );
        assert_eq!(value["setup"]["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(value["setup"]["outputAudioTranscription"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_join_writer_aborts_stalled_task() {
        let writer = tokio::spawn(std::future::pending::<()>());
        let abort = writer.abort_handle();

        let limit = Duration::from_millis(20);
        let joined =
            tokio::time::timeout(Duration::from_secs(2), join_writer("stalled", writer, limit)).await;

        assert!(joined.is_ok());
        for _ in 0..100 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
    }

    #[tokio::test]
    async fn test_join_writer_waits_for_drain() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        let drained = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&drained);
        let writer = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        for n in 0..3 {
            tx.send(n).unwrap();
        }
        drop(tx);
        join_writer("draining", writer, Duration::from_secs(2)).await;

        assert_eq!(drained.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn test_setup_message_without_transcription() {
        let mut setup = setup();
        setup.input_transcription = false;
        setup.output_transcription = false;
        setup.system_instruction = None;

        let value = serde_json::to_value(setup.to_message()).unwrap();
        assert!(value["setup"].get("inputAudioTranscription").is_none());
        assert!(value["setup"].get("systemInstruction").is_none());
    }
}
