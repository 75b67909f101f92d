use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

use super::pcm::{PlaybackBuffer, DEFAULT_FRAME_SIZE, INPUT_SAMPLE_RATE};
use crate::error::SessionResult;

/// One block of microphone samples (mono, f32 in [-1.0, 1.0])
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureBuffer {
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

/// Configuration for microphone capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture sample rate (the input device context runs at this rate)
    pub sample_rate: u32,
    /// Samples per delivered frame
    pub frame_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE, // 16kHz for the realtime endpoint
            frame_size: DEFAULT_FRAME_SIZE,
        }
    }
}

/// Handle for a buffer scheduled on an output device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// Microphone capture device
///
/// Implementations:
/// - File: plays a WAV file as if it were a microphone (headless runs)
/// - Virtual: frames pushed by tests
#[async_trait]
pub trait CaptureDevice: Send {
    /// Connect the capture processing node
    ///
    /// Returns a channel receiver that will receive fixed-size frames
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<CaptureBuffer>>;

    /// Disconnect processing and release the microphone
    async fn stop(&mut self) -> SessionResult<()>;

    /// Check if the device is currently delivering frames
    fn is_capturing(&self) -> bool;

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// Output device context with its own playback clock
///
/// Sources are started at absolute times on `current_time()`'s clock.
/// When a source finishes (or is stopped) the device reports its id on the
/// `ended` channel it was opened with.
pub trait OutputDevice: Send {
    fn sample_rate(&self) -> u32;

    /// Current device clock in seconds
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to start at `when` seconds on the device clock
    fn start_source(&mut self, id: SourceId, buffer: PlaybackBuffer, when: f64) -> SessionResult<()>;

    /// Stop a source immediately, even mid-playback
    fn stop_source(&mut self, id: SourceId);

    /// Release the device context
    fn close(&mut self) -> SessionResult<()>;
}

/// Factory for the devices a session needs
#[async_trait]
pub trait AudioHost: Send + Sync {
    /// Create an output device context at `sample_rate`
    fn open_output(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> SessionResult<Box<dyn OutputDevice>>;

    /// Ask for microphone access and create the input device context
    ///
    /// Fails with `SessionError::PermissionDenied` when access is declined
    async fn request_microphone(&self, config: &CaptureConfig) -> SessionResult<Box<dyn CaptureDevice>>;

    /// Get host name for logging
    fn name(&self) -> &str;
}
