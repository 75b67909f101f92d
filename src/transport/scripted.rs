// Scripted transport for tests
//
// The connector hands out a session whose inbound events come from a
// prepared script plus anything pushed through the `ScriptHandle`, and
// records every outbound frame.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

use super::{
    ServerMessage, SessionSetup, Transport, TransportConnector, TransportEvent, TransportSession,
};
use crate::audio::OutboundFrame;
use crate::error::{SessionError, SessionResult};

#[derive(Default)]
struct ScriptState {
    events_tx: Option<mpsc::Sender<TransportEvent>>,
    sent: Vec<OutboundFrame>,
    setups: Vec<SessionSetup>,
    connect_failure: Option<String>,
    connect_gate: Option<Arc<Semaphore>>,
    connect_attempts: usize,
    send_failure: Option<String>,
    closed: bool,
}

fn lock(state: &Mutex<ScriptState>) -> MutexGuard<'_, ScriptState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Connector replaying scripted events
pub struct ScriptedConnector {
    script: Vec<TransportEvent>,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedConnector {
    pub fn new() -> (Self, ScriptHandle) {
        let state = Arc::new(Mutex::new(ScriptState::default()));
        (
            Self {
                script: Vec::new(),
                state: Arc::clone(&state),
            },
            ScriptHandle { state },
        )
    }

    /// Events delivered as soon as a session connects
    pub fn with_script(mut self, events: Vec<TransportEvent>) -> Self {
        self.script = events;
        self
    }

    /// Fail every connect attempt
    pub fn fail_connect(self, message: &str) -> Self {
        lock(&self.state).connect_failure = Some(message.to_string());
        self
    }

    /// Park connect attempts until `ScriptHandle::release_connect`
    ///
    /// Never releasing models a peer that accepts and then goes silent.
    pub fn hold_connect(self) -> Self {
        lock(&self.state).connect_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }
}

#[async_trait]
impl TransportConnector for ScriptedConnector {
    async fn connect(&self, setup: &SessionSetup) -> SessionResult<TransportSession> {
        let gate = {
            let mut state = lock(&self.state);
            state.connect_attempts += 1;
            state.connect_gate.clone()
        };
        if let Some(gate) = gate {
            debug!("Scripted connect for {} held", setup.session_id);
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let mut state = lock(&self.state);
        if let Some(message) = &state.connect_failure {
            return Err(SessionError::Transport(message.clone()));
        }

        let (tx, rx) = mpsc::channel(256);
        for event in &self.script {
            tx.try_send(event.clone())
                .map_err(|e| SessionError::Transport(e.to_string()))?;
        }

        state.events_tx = Some(tx);
        state.setups.push(setup.clone());
        state.closed = false;
        debug!("Scripted transport connected for {}", setup.session_id);

        Ok(TransportSession {
            transport: Box::new(ScriptedTransport {
                state: Arc::clone(&self.state),
            }),
            events: rx,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn send_realtime_input(&mut self, frame: OutboundFrame) -> SessionResult<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(SessionError::Transport("Transport is closed".to_string()));
        }
        if let Some(message) = &state.send_failure {
            return Err(SessionError::Transport(message.clone()));
        }
        state.sent.push(frame);
        Ok(())
    }

    async fn close(&mut self) -> SessionResult<()> {
        let mut state = lock(&self.state);
        state.closed = true;
        state.events_tx = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Test-side control of a scripted transport
#[derive(Clone)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptHandle {
    /// Push an inbound event; false if no session is connected
    pub fn emit(&self, event: TransportEvent) -> bool {
        let tx = lock(&self.state).events_tx.clone();
        tx.map(|tx| tx.try_send(event).is_ok()).unwrap_or(false)
    }

    pub fn open(&self) -> bool {
        self.emit(TransportEvent::Open)
    }

    pub fn message(&self, message: ServerMessage) -> bool {
        self.emit(TransportEvent::Message(message))
    }

    pub fn close(&self) -> bool {
        self.emit(TransportEvent::Close)
    }

    pub fn error(&self, message: &str) -> bool {
        self.emit(TransportEvent::Error(message.to_string()))
    }

    /// Make subsequent sends fail
    pub fn fail_sends(&self, message: &str) {
        lock(&self.state).send_failure = Some(message.to_string());
    }

    pub fn sent_frames(&self) -> Vec<OutboundFrame> {
        lock(&self.state).sent.clone()
    }

    pub fn setups(&self) -> Vec<SessionSetup> {
        lock(&self.state).setups.clone()
    }

    /// Whether the session side closed the transport explicitly
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Let one held connect attempt proceed
    pub fn release_connect(&self) {
        if let Some(gate) = &lock(&self.state).connect_gate {
            gate.add_permits(1);
        }
    }

    pub fn connect_attempts(&self) -> usize {
        lock(&self.state).connect_attempts
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).events_tx.is_some()
    }
}
