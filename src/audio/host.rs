use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use super::backend::{AudioHost, CaptureConfig, CaptureDevice, OutputDevice, SourceId};
use super::file::FileCaptureDevice;
use super::render::RenderOutput;
use super::virtual_host::VirtualAudioHost;
use crate::config::AudioConfig;
use crate::error::{SessionError, SessionResult};

/// Outcome of a microphone permission prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MicrophonePermission {
    #[default]
    Granted,
    Denied,
}

/// Audio host type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioHostKind {
    /// WAV file in, rendered WAV file out
    #[default]
    File,
    /// In-memory host with a manual clock
    Virtual,
}

/// Headless host: the microphone is a WAV file (or silence) and playback is
/// rendered on a real-time clock, optionally to a WAV file
pub struct FileAudioHost {
    input_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
    loop_input: bool,
    permission: MicrophonePermission,
}

impl FileAudioHost {
    pub fn new(
        input_file: Option<PathBuf>,
        output_file: Option<PathBuf>,
        loop_input: bool,
        permission: MicrophonePermission,
    ) -> Self {
        Self {
            input_file,
            output_file,
            loop_input,
            permission,
        }
    }
}

#[async_trait]
impl AudioHost for FileAudioHost {
    fn open_output(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> SessionResult<Box<dyn OutputDevice>> {
        if let Some(dir) = self.output_file.as_ref().and_then(|p| p.parent()) {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    SessionError::Device(format!("Failed to create {}: {}", dir.display(), e))
                })?;
            }
        }
        Ok(Box::new(RenderOutput::new(
            sample_rate,
            ended,
            self.output_file.clone(),
        )))
    }

    async fn request_microphone(&self, config: &CaptureConfig) -> SessionResult<Box<dyn CaptureDevice>> {
        if self.permission == MicrophonePermission::Denied {
            info!("Microphone permission denied by host policy");
            return Err(SessionError::PermissionDenied);
        }

        let device = match &self.input_file {
            Some(path) => FileCaptureDevice::open(path, config.clone(), self.loop_input)?,
            None => FileCaptureDevice::silent(config.clone()),
        };
        Ok(Box::new(device))
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Audio host factory
pub struct AudioHostFactory;

impl AudioHostFactory {
    /// Create the audio host described by configuration
    pub fn create(config: &AudioConfig) -> Arc<dyn AudioHost> {
        match config.host {
            AudioHostKind::File => Arc::new(FileAudioHost::new(
                config.input_file.as_deref().map(expand_path),
                config.output_file.as_deref().map(expand_path),
                config.loop_input,
                config.microphone_permission,
            )),
            AudioHostKind::Virtual => {
                let host = VirtualAudioHost::new();
                if config.microphone_permission == MicrophonePermission::Denied {
                    Arc::new(host.deny_microphone())
                } else {
                    Arc::new(host)
                }
            }
        }
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_denied_permission() {
        let host = FileAudioHost::new(None, None, false, MicrophonePermission::Denied);
        let result = host.request_microphone(&CaptureConfig::default()).await;
        assert!(matches!(result, Err(SessionError::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_missing_input_file_is_device_error() {
        let host = FileAudioHost::new(
            Some(PathBuf::from("/nonexistent/input.wav")),
            None,
            false,
            MicrophonePermission::Granted,
        );
        let result = host.request_microphone(&CaptureConfig::default()).await;
        assert!(matches!(result, Err(SessionError::Device(_))));
    }

    #[tokio::test]
    async fn test_silent_capture_delivers_zero_frames() {
        let host = FileAudioHost::new(None, None, false, MicrophonePermission::Granted);
        let config = CaptureConfig {
            sample_rate: 16000,
            frame_size: 160,
        };
        let mut device = host.request_microphone(&config).await.unwrap();
        let mut rx = device.start().await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.samples.len(), 160);
        assert!(frame.samples.iter().all(|&s| s == 0.0));

        device.stop().await.unwrap();
        assert!(!device.is_capturing());
    }
}
