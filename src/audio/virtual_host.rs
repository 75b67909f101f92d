// Deterministic audio host for tests and dry runs
//
// The output clock only moves when told to, capture frames are pushed by
// the caller, and every scheduled source is recorded for inspection.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::backend::{AudioHost, CaptureBuffer, CaptureConfig, CaptureDevice, OutputDevice, SourceId};
use super::pcm::PlaybackBuffer;
use crate::error::{SessionError, SessionResult};

/// Manually driven device clock (seconds)
#[derive(Debug, Clone, Default)]
pub struct VirtualClock(Arc<AtomicU64>);

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, seconds: f64) {
        self.0.store(seconds.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

/// A source as seen by the virtual output device
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledRecord {
    pub id: SourceId,
    /// Scheduled start on the device clock
    pub start: f64,
    pub duration: f64,
    /// Forcibly stopped before finishing
    pub stopped: bool,
}

#[derive(Default)]
struct HostState {
    deny_microphone: bool,
    output_failure: Option<String>,
    outputs_opened: usize,
    outputs_open: usize,
    microphones_held: usize,
    capture_tx: Option<mpsc::Sender<CaptureBuffer>>,
    ended_tx: Option<mpsc::UnboundedSender<SourceId>>,
    records: Vec<ScheduledRecord>,
}

/// In-memory audio host
#[derive(Clone, Default)]
pub struct VirtualAudioHost {
    clock: VirtualClock,
    state: Arc<Mutex<HostState>>,
}

impl VirtualAudioHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decline every microphone request
    pub fn deny_microphone(self) -> Self {
        self.lock().deny_microphone = true;
        self
    }

    /// Fail every output device creation with `message`
    pub fn fail_output(self, message: &str) -> Self {
        self.lock().output_failure = Some(message.to_string());
        self
    }

    pub fn clock(&self) -> VirtualClock {
        self.clock.clone()
    }

    /// Deliver one captured frame; false if capture is not connected
    pub fn push_capture(&self, samples: Vec<f32>) -> bool {
        let tx = self.lock().capture_tx.clone();
        match tx {
            Some(tx) => tx
                .try_send(CaptureBuffer {
                    samples,
                    sample_rate: crate::audio::INPUT_SAMPLE_RATE,
                })
                .is_ok(),
            None => false,
        }
    }

    /// Report that a source played to the end
    pub fn finish_source(&self, id: SourceId) -> bool {
        let tx = self.lock().ended_tx.clone();
        tx.map(|tx| tx.send(id).is_ok()).unwrap_or(false)
    }

    pub fn scheduled(&self) -> Vec<ScheduledRecord> {
        self.lock().records.clone()
    }

    /// Output contexts created and not yet closed
    pub fn live_outputs(&self) -> usize {
        self.lock().outputs_open
    }

    pub fn outputs_opened(&self) -> usize {
        self.lock().outputs_opened
    }

    pub fn microphone_held(&self) -> bool {
        self.lock().microphones_held > 0
    }

    pub fn capture_connected(&self) -> bool {
        self.lock().capture_tx.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AudioHost for VirtualAudioHost {
    fn open_output(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> SessionResult<Box<dyn OutputDevice>> {
        let mut state = self.lock();
        if let Some(message) = &state.output_failure {
            return Err(SessionError::Device(message.clone()));
        }
        state.outputs_opened += 1;
        state.outputs_open += 1;
        state.ended_tx = Some(ended);
        debug!("Virtual output opened ({}Hz)", sample_rate);

        Ok(Box::new(VirtualOutput {
            sample_rate,
            clock: self.clock.clone(),
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }

    async fn request_microphone(&self, config: &CaptureConfig) -> SessionResult<Box<dyn CaptureDevice>> {
        let mut state = self.lock();
        if state.deny_microphone {
            info!("Virtual microphone request denied");
            return Err(SessionError::PermissionDenied);
        }
        state.microphones_held += 1;

        Ok(Box::new(VirtualCapture {
            config: config.clone(),
            state: Arc::clone(&self.state),
            capturing: false,
            released: false,
        }))
    }

    fn name(&self) -> &str {
        "virtual"
    }
}

struct VirtualOutput {
    sample_rate: u32,
    clock: VirtualClock,
    state: Arc<Mutex<HostState>>,
    closed: bool,
}

impl VirtualOutput {
    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl OutputDevice for VirtualOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn start_source(&mut self, id: SourceId, buffer: PlaybackBuffer, when: f64) -> SessionResult<()> {
        if self.closed {
            return Err(SessionError::Device("Output context is closed".to_string()));
        }
        self.lock().records.push(ScheduledRecord {
            id,
            start: when,
            duration: buffer.duration_secs(),
            stopped: false,
        });
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        let mut state = self.lock();
        if let Some(record) = state.records.iter_mut().find(|r| r.id == id) {
            record.stopped = true;
        }
        // Stopped sources still report their end
        if let Some(tx) = &state.ended_tx {
            let _ = tx.send(id);
        }
    }

    fn close(&mut self) -> SessionResult<()> {
        if !self.closed {
            self.closed = true;
            let mut state = self.lock();
            state.outputs_open -= 1;
            state.ended_tx = None;
        }
        Ok(())
    }
}

impl Drop for VirtualOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct VirtualCapture {
    config: CaptureConfig,
    state: Arc<Mutex<HostState>>,
    capturing: bool,
    released: bool,
}

impl VirtualCapture {
    fn release(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.capture_tx = None;
        if !self.released {
            self.released = true;
            state.microphones_held -= 1;
        }
        self.capturing = false;
    }
}

#[async_trait]
impl CaptureDevice for VirtualCapture {
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<CaptureBuffer>> {
        if self.released {
            return Err(SessionError::Device("Microphone already released".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .capture_tx = Some(tx);
        self.capturing = true;
        debug!("Virtual capture connected ({} samples/frame)", self.config.frame_size);
        Ok(rx)
    }

    async fn stop(&mut self) -> SessionResult<()> {
        self.release();
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "virtual microphone"
    }
}

impl Drop for VirtualCapture {
    fn drop(&mut self) {
        if !self.released {
            self.release();
        }
    }
}
