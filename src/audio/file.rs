use anyhow::{Context, Result};
use async_trait::async_trait;
use hound::WavReader;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{CaptureBuffer, CaptureConfig, CaptureDevice};
use super::pcm::pcm16_to_float;
use crate::error::{SessionError, SessionResult};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            anyhow::bail!(
                "Expected 16-bit integer PCM, got {}-bit {:?}",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds = samples.len() as f64 /
            (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples at `target_rate`
    ///
    /// Channels are averaged; the rate is reduced by decimation, so the
    /// source rate must be an integer multiple of the target.
    pub fn to_mono(&self, target_rate: u32) -> Result<Vec<i16>> {
        let channels = self.channels.max(1) as usize;
        let mono: Vec<i16> = self
            .samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect();

        if self.sample_rate == target_rate {
            return Ok(mono);
        }

        if self.sample_rate < target_rate || self.sample_rate % target_rate != 0 {
            anyhow::bail!(
                "Cannot convert {}Hz to {}Hz by decimation",
                self.sample_rate,
                target_rate
            );
        }

        let ratio = (self.sample_rate / target_rate) as usize;
        Ok(mono.into_iter().step_by(ratio).collect())
    }
}

/// Capture device that plays a WAV file in real time
///
/// Frames are paced at the capture rate. When the file runs out the device
/// either loops or keeps delivering silence, like an idle microphone.
pub struct FileCaptureDevice {
    name: String,
    config: CaptureConfig,
    samples: Vec<f32>,
    loop_input: bool,
    task: Option<JoinHandle<()>>,
}

impl FileCaptureDevice {
    pub fn open(path: impl AsRef<Path>, config: CaptureConfig, loop_input: bool) -> SessionResult<Self> {
        let path = path.as_ref();
        let audio = AudioFile::open(path).map_err(|e| SessionError::Device(format!("{:#}", e)))?;
        let mono = audio
            .to_mono(config.sample_rate)
            .map_err(|e| SessionError::Device(format!("{:#}", e)))?;

        Ok(Self {
            name: format!("file:{}", path.display()),
            config,
            samples: pcm16_to_float(&mono),
            loop_input,
            task: None,
        })
    }

    /// Silent input of unlimited length
    pub fn silent(config: CaptureConfig) -> Self {
        Self {
            name: "silence".to_string(),
            config,
            samples: Vec::new(),
            loop_input: false,
            task: None,
        }
    }

    fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.config.frame_size as f64 / self.config.sample_rate as f64)
    }
}

#[async_trait]
impl CaptureDevice for FileCaptureDevice {
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<CaptureBuffer>> {
        if self.task.is_some() {
            return Err(SessionError::Device("Already capturing".to_string()));
        }

        info!(
            "Starting file capture from {} ({}Hz, {} samples/frame)",
            self.name, self.config.sample_rate, self.config.frame_size
        );

        let (tx, rx) = mpsc::channel(16);
        let samples = self.samples.clone();
        let frame_size = self.config.frame_size;
        let sample_rate = self.config.sample_rate;
        let loop_input = self.loop_input;
        let mut ticker = tokio::time::interval(self.frame_duration());

        let task = tokio::spawn(async move {
            let mut position = 0usize;
            loop {
                ticker.tick().await;

                let mut frame = Vec::with_capacity(frame_size);
                while frame.len() < frame_size {
                    if position >= samples.len() {
                        if loop_input && !samples.is_empty() {
                            position = 0;
                        } else {
                            frame.resize(frame_size, 0.0);
                            break;
                        }
                    }
                    let take = (frame_size - frame.len()).min(samples.len() - position);
                    frame.extend_from_slice(&samples[position..position + take]);
                    position += take;
                }

                let buffer = CaptureBuffer {
                    samples: frame,
                    sample_rate,
                };
                if tx.send(buffer).await.is_err() {
                    debug!("Capture receiver dropped");
                    break;
                }
            }
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> SessionResult<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            info!("File capture stopped: {}", self.name);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
