use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::capture::CapturePipeline;
use super::config::SessionConfig;
use super::state::{SessionSnapshot, SessionState, StopReason};
use super::stats::SessionStats;
use super::transcript::{Speaker, TranscriptLine, TranscriptLog};
use crate::audio::{AudioHost, CaptureBuffer, CaptureDevice, OutputDevice, SourceId};
use crate::error::{SessionError, SessionResult};
use crate::playback::PlaybackScheduler;
use crate::transport::{ServerMessage, Transport, TransportConnector, TransportEvent};

/// Output channels for inbound audio (the realtime endpoint sends mono)
const OUTPUT_CHANNELS: u16 = 1;

/// A realtime duplex voice session
///
/// The handle is cheap to share behind an `Arc`. While connected, a single
/// driver task owns the devices and the transport and serializes every
/// event, so playback scheduling never races with interruption handling.
pub struct VoiceSession {
    /// Session configuration
    config: SessionConfig,

    /// Creates the output context and microphone
    host: Arc<dyn AudioHost>,

    /// Opens the transport session
    connector: Arc<dyn TransportConnector>,

    /// Shared with the capture pipeline; read on every frame
    muted: Arc<AtomicBool>,

    /// Latest state, stats and transcript
    snapshot: Arc<watch::Sender<SessionSnapshot>>,

    /// Running driver, if any
    driver: Mutex<Option<DriverHandle>>,
}

struct DriverHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        host: Arc<dyn AudioHost>,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        info!(
            "Creating voice session {} (audio: {}, transport: {})",
            config.session_id,
            host.name(),
            connector.name()
        );

        let (snapshot, _) = watch::channel(SessionSnapshot::default());

        Self {
            config,
            host,
            connector,
            muted: Arc::new(AtomicBool::new(false)),
            snapshot: Arc::new(snapshot),
            driver: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Acquire devices, open the transport and start the session
    ///
    /// Order is output context, microphone, then transport. If any step
    /// fails, everything acquired so far is released and the session
    /// returns to Idle. Calling start while not Idle does nothing.
    pub async fn start(&self) -> SessionResult<()> {
        self.launch().await.wait().await
    }

    /// Publish Connecting and spawn the driver without waiting for it
    ///
    /// Acquisition runs inside the driver task, so `stop()` can cancel it
    /// at any await. The returned handle resolves once the transport is
    /// opening or the start has failed.
    pub async fn launch(&self) -> PendingStart {
        let mut driver = self.driver.lock().await;

        if let Some(handle) = driver.as_ref() {
            if !handle.task.is_finished() {
                warn!("Session {} already started ({})", self.id(), self.state());
                return PendingStart { ready: None };
            }
        }
        // Reap a driver that ended on its own
        if let Some(handle) = driver.take() {
            if let Err(e) = handle.task.await {
                error!("Session driver panicked: {}", e);
            }
        }

        info!("Starting voice session {}", self.id());

        let muted = self.is_muted();
        self.snapshot.send_replace(SessionSnapshot {
            state: SessionState::Connecting,
            muted,
            stats: SessionStats {
                state: SessionState::Connecting,
                started_at: Some(Utc::now()),
                ..SessionStats::default()
            },
            transcript: Vec::new(),
        });

        let launch = Launch {
            config: self.config.clone(),
            host: Arc::clone(&self.host),
            connector: Arc::clone(&self.connector),
            muted: Arc::clone(&self.muted),
            snapshot: Arc::clone(&self.snapshot),
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(launch.run(stop_rx, ready_tx));

        *driver = Some(DriverHandle {
            stop_tx: Some(stop_tx),
            task,
        });

        PendingStart {
            ready: Some(ready_rx),
        }
    }

    /// Stop the session and release everything it holds
    ///
    /// Safe to call in any state and any number of times.
    pub async fn stop(&self) -> SessionResult<SessionStats> {
        let mut driver = self.driver.lock().await;

        match driver.take() {
            Some(mut handle) => {
                info!("Stopping voice session {}", self.id());
                if let Some(stop_tx) = handle.stop_tx.take() {
                    // The driver may already be tearing down on its own
                    let _ = stop_tx.send(());
                }
                if let Err(e) = handle.task.await {
                    error!("Session driver panicked: {}", e);
                    self.snapshot.send_modify(|s| {
                        s.state = SessionState::Idle;
                        s.stats.state = SessionState::Idle;
                        s.stats.last_error = Some(format!("driver panicked: {}", e));
                    });
                }
            }
            None => debug!("Session {} is not running", self.id()),
        }

        Ok(self.stats())
    }

    /// Flip the mute flag; returns the new value
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.muted.fetch_xor(true, Ordering::SeqCst);
        self.snapshot.send_modify(|s| s.muted = muted);
        info!("Session {} {}", self.id(), if muted { "muted" } else { "unmuted" });
        muted
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        self.snapshot.send_modify(|s| s.muted = muted);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    /// Most recent transcript lines, oldest first
    pub fn transcript(&self) -> Vec<TranscriptLine> {
        self.snapshot.borrow().transcript.clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.snapshot.borrow().stats.at(Utc::now())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch state, stats and transcript changes
    pub fn subscribe_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Wait until the session reaches `state`
    pub async fn wait_for_state(&self, state: SessionState) {
        let mut rx = self.snapshot.subscribe();
        loop {
            if rx.borrow_and_update().state == state {
                return;
            }
            // The sender lives as long as `self`
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

fn release_output(output: &mut dyn OutputDevice) {
    if let Err(e) = output.close() {
        warn!("Failed to close output context: {}", e);
    }
}

/// A start that has been launched but not yet resolved
pub struct PendingStart {
    ready: Option<oneshot::Receiver<SessionResult<()>>>,
}

impl PendingStart {
    /// Wait for acquisition to finish
    ///
    /// Fails with `SessionError::Cancelled` when `stop()` won the race.
    pub async fn wait(self) -> SessionResult<()> {
        match self.ready {
            Some(ready) => ready.await.unwrap_or_else(|_| {
                Err(SessionError::Device("session driver exited during start".to_string()))
            }),
            None => Ok(()),
        }
    }
}

/// Everything the driver task needs to acquire a session
struct Launch {
    config: SessionConfig,
    host: Arc<dyn AudioHost>,
    connector: Arc<dyn TransportConnector>,
    muted: Arc<AtomicBool>,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
}

impl Launch {
    async fn run(
        self,
        mut stop_rx: oneshot::Receiver<()>,
        ready_tx: oneshot::Sender<SessionResult<()>>,
    ) {
        match self.acquire(&mut stop_rx).await {
            Ok(driver) => {
                let _ = ready_tx.send(Ok(()));
                driver.run(stop_rx).await;
            }
            Err(e) => {
                let cancelled = e == SessionError::Cancelled;
                if cancelled {
                    info!("Session {} stopped while connecting", self.config.session_id);
                } else {
                    warn!("Session {} failed to start: {}", self.config.session_id, e);
                }
                self.snapshot.send_modify(|s| {
                    s.state = SessionState::Idle;
                    s.stats.state = SessionState::Idle;
                    s.stats.last_error = (!cancelled).then(|| e.to_string());
                });
                let _ = ready_tx.send(Err(e));
            }
        }
    }

    /// Output context, microphone, then transport; stop aborts any await
    async fn acquire(&self, stop_rx: &mut oneshot::Receiver<()>) -> SessionResult<SessionDriver> {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let mut output = self.host.open_output(self.config.output_sample_rate, ended_tx)?;
        debug!("Output context ready ({}Hz)", output.sample_rate());

        let capture_config = self.config.capture_config();
        let requested = tokio::select! {
            result = self.host.request_microphone(&capture_config) => Some(result),
            _ = &mut *stop_rx => None,
        };
        let mut capture = match requested {
            Some(Ok(capture)) => capture,
            failed => {
                release_output(output.as_mut());
                return Err(failed.and_then(Result::err).unwrap_or(SessionError::Cancelled));
            }
        };
        info!("Microphone granted: {}", capture.name());

        let setup = self.config.setup();
        let connected = tokio::select! {
            result = self.connector.connect(&setup) => Some(result),
            _ = &mut *stop_rx => None,
        };
        let session = match connected {
            Some(Ok(session)) => session,
            failed => {
                if let Err(stop_err) = capture.stop().await {
                    warn!("Failed to release microphone: {}", stop_err);
                }
                release_output(output.as_mut());
                return Err(failed.and_then(Result::err).unwrap_or(SessionError::Cancelled));
            }
        };
        info!("Transport connecting via {}", session.transport.name());

        let voice = &self.config.voice;
        Ok(SessionDriver {
            session_id: self.config.session_id.clone(),
            output,
            ended_rx,
            capture,
            capture_rx: None,
            transport: session.transport,
            events: session.events,
            scheduler: PlaybackScheduler::new(
                self.config.output_sample_rate,
                OUTPUT_CHANNELS,
                self.config.playback_gain,
            ),
            pipeline: CapturePipeline::new(self.config.input_sample_rate, Arc::clone(&self.muted)),
            transcript: TranscriptLog::new(
                voice.transcript_capacity,
                voice.user_label.clone(),
                voice.assistant_label.clone(),
            ),
            snapshot: Arc::clone(&self.snapshot),
        })
    }
}

/// One step of the driver loop
enum Step {
    Stop,
    Transport(Option<TransportEvent>),
    Capture(Option<CaptureBuffer>),
    Ended(SourceId),
}

/// Owns everything a connected session holds
struct SessionDriver {
    session_id: String,
    output: Box<dyn OutputDevice>,
    ended_rx: mpsc::UnboundedReceiver<SourceId>,
    capture: Box<dyn CaptureDevice>,
    capture_rx: Option<mpsc::Receiver<CaptureBuffer>>,
    transport: Box<dyn Transport>,
    events: mpsc::Receiver<TransportEvent>,
    scheduler: PlaybackScheduler,
    pipeline: CapturePipeline,
    transcript: TranscriptLog,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
}

async fn next_capture(rx: &mut Option<mpsc::Receiver<CaptureBuffer>>) -> Option<CaptureBuffer> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl SessionDriver {
    async fn run(mut self, mut stop_rx: oneshot::Receiver<()>) {
        let reason = loop {
            let step = tokio::select! {
                _ = &mut stop_rx => Step::Stop,
                event = self.events.recv() => Step::Transport(event),
                frame = next_capture(&mut self.capture_rx) => Step::Capture(frame),
                Some(id) = self.ended_rx.recv() => Step::Ended(id),
            };

            let outcome = match step {
                Step::Stop => Err(StopReason::Requested),
                Step::Transport(Some(TransportEvent::Open)) => self.on_open().await,
                Step::Transport(Some(TransportEvent::Message(message))) => self.on_message(message),
                Step::Transport(Some(TransportEvent::Close)) | Step::Transport(None) => {
                    Err(StopReason::TransportClosed)
                }
                Step::Transport(Some(TransportEvent::Error(e))) => Err(StopReason::TransportError(e)),
                Step::Capture(Some(buffer)) => self.on_capture(buffer),
                Step::Capture(None) => Err(StopReason::DeviceError("capture stream ended".to_string())),
                Step::Ended(id) => {
                    self.scheduler.on_source_ended(id);
                    Ok(())
                }
            };

            if let Err(reason) = outcome {
                break reason;
            }
        };

        self.teardown(reason).await;
    }

    /// Transport confirmed: connect capture and go Active
    async fn on_open(&mut self) -> Result<(), StopReason> {
        if self.capture_rx.is_some() {
            debug!("Ignoring repeated open for {}", self.session_id);
            return Ok(());
        }

        let rx = self
            .capture
            .start()
            .await
            .map_err(|e| StopReason::DeviceError(e.to_string()))?;
        self.capture_rx = Some(rx);

        info!("Voice session {} active", self.session_id);
        self.set_state(SessionState::Active);
        Ok(())
    }

    fn on_capture(&mut self, buffer: CaptureBuffer) -> Result<(), StopReason> {
        if let Some(frame) = self.pipeline.process(&buffer) {
            self.transport
                .send_realtime_input(frame)
                .map_err(|e| StopReason::TransportError(e.to_string()))?;
        }

        let pipeline = &self.pipeline;
        self.snapshot.send_modify(|s| {
            s.stats.frames_captured = pipeline.frames_captured();
            s.stats.frames_sent = pipeline.frames_sent();
            s.stats.frames_dropped_muted = pipeline.frames_dropped();
        });
        Ok(())
    }

    /// Audio first, then interruption, then transcriptions
    fn on_message(&mut self, message: ServerMessage) -> Result<(), StopReason> {
        let mut stats = self.snapshot.borrow().stats.clone();
        let mut transcript_changed = false;

        if let Some(audio) = message.audio_data() {
            stats.audio_frames_received += 1;
            match self.scheduler.schedule(self.output.as_mut(), audio) {
                Ok(Some(_)) => stats.audio_frames_scheduled += 1,
                Ok(None) => {}
                Err(e @ SessionError::InvalidFrame(_)) => {
                    warn!("Dropping inbound audio: {}", e);
                    stats.invalid_frames += 1;
                }
                Err(e) => return Err(StopReason::DeviceError(e.to_string())),
            }
        }

        if message.is_interrupted() {
            self.scheduler.interrupt(self.output.as_mut());
            stats.interruptions += 1;
        }

        if let Some(text) = message.input_text() {
            let line = self.transcript.push(Speaker::User, text);
            info!("{}", line);
            stats.transcript_lines += 1;
            transcript_changed = true;
        }

        if let Some(text) = message.output_text() {
            let line = self.transcript.push(Speaker::Assistant, text);
            info!("{}", line);
            stats.transcript_lines += 1;
            transcript_changed = true;
        }

        for text in message.model_text() {
            debug!("Model text: {}", text);
            stats.model_text_parts += 1;
        }

        let transcript = transcript_changed.then(|| self.transcript.lines());
        self.snapshot.send_modify(|s| {
            s.stats = stats;
            if let Some(lines) = transcript {
                s.transcript = lines;
            }
        });
        Ok(())
    }

    fn set_state(&self, state: SessionState) {
        self.snapshot.send_modify(|s| {
            s.state = state;
            s.stats.state = state;
        });
    }

    /// Release capture, then playback, then the transport
    async fn teardown(mut self, reason: StopReason) {
        match &reason {
            StopReason::Requested | StopReason::TransportClosed => {
                info!("Closing voice session {}: {}", self.session_id, reason)
            }
            _ => warn!("Closing voice session {}: {}", self.session_id, reason),
        }
        self.set_state(SessionState::Closing);

        self.capture_rx = None;
        if let Err(e) = self.capture.stop().await {
            warn!("Failed to stop capture: {}", e);
        }

        self.scheduler.clear(self.output.as_mut());
        release_output(self.output.as_mut());

        if let Err(e) = self.transport.close().await {
            warn!("Failed to close transport: {}", e);
        }

        let pipeline = &self.pipeline;
        self.snapshot.send_modify(|s| {
            s.state = SessionState::Idle;
            s.stats.state = SessionState::Idle;
            s.stats.frames_captured = pipeline.frames_captured();
            s.stats.frames_sent = pipeline.frames_sent();
            s.stats.frames_dropped_muted = pipeline.frames_dropped();
            s.stats.last_error = reason.error();
        });

        info!("Voice session {} idle", self.session_id);
    }
}
