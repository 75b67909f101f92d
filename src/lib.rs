pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod playback;
pub mod session;
pub mod transport;

pub use audio::{
    AudioFile, AudioHost, AudioHostFactory, CaptureBuffer, CaptureDevice, FileAudioHost,
    OutboundFrame, OutputDevice, PlaybackBuffer, SourceId, VirtualAudioHost,
};
pub use config::Config;
pub use error::{SessionError, SessionResult};
pub use http::{create_router, AppState};
pub use playback::{PlaybackScheduler, ScheduledPlayback};
pub use session::{
    PendingStart, SessionConfig, SessionSnapshot, SessionState, SessionStats, Speaker,
    TranscriptLine, VoiceSession,
};
pub use transport::{
    ServerMessage, TransportConnector, TransportEvent, TransportFactory, TransportSession,
};
