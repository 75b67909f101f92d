pub mod backend;
pub mod file;
pub mod host;
pub mod pcm;
pub mod render;
pub mod virtual_host;

pub use backend::{AudioHost, CaptureBuffer, CaptureConfig, CaptureDevice, OutputDevice, SourceId};
pub use file::{AudioFile, FileCaptureDevice};
pub use host::{AudioHostFactory, AudioHostKind, FileAudioHost, MicrophonePermission};
pub use pcm::{
    decode_inbound, OutboundFrame, PlaybackBuffer, DEFAULT_FRAME_SIZE, INPUT_SAMPLE_RATE,
    OUTPUT_SAMPLE_RATE,
};
pub use render::RenderOutput;
pub use virtual_host::{ScheduledRecord, VirtualAudioHost, VirtualClock};
