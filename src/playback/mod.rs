//! Gapless playback of inbound audio
//!
//! Inbound frames arrive at network cadence; the scheduler places them
//! back to back on the output device clock and cuts everything in flight
//! when the remote side signals an interruption.

mod scheduler;

pub use scheduler::{PlaybackScheduler, ScheduledPlayback};
