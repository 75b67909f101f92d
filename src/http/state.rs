use crate::audio::AudioHost;
use crate::config::Config;
use crate::session::{SessionConfig, VoiceSession};
use crate::transport::TransportConnector;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Known sessions (session_id → session); stopped sessions stay queryable
    pub sessions: Arc<RwLock<HashMap<String, Arc<VoiceSession>>>>,

    /// Service configuration sessions are derived from
    pub config: Arc<Config>,

    /// Devices for new sessions
    pub audio_host: Arc<dyn AudioHost>,

    /// Transport for new sessions
    pub connector: Arc<dyn TransportConnector>,
}

impl AppState {
    pub fn new(
        config: Config,
        audio_host: Arc<dyn AudioHost>,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
            audio_host,
            connector,
        }
    }

    /// Build a session handle wired to this state's devices and transport
    pub fn new_session(&self, session_id: String) -> VoiceSession {
        VoiceSession::new(
            SessionConfig::from_config(session_id, &self.config),
            Arc::clone(&self.audio_host),
            Arc::clone(&self.connector),
        )
    }
}
