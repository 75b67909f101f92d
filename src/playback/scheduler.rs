use std::collections::HashSet;
use tracing::{debug, info};

use crate::audio::{decode_inbound, OutputDevice, SourceId};
use crate::error::SessionResult;

/// Where a frame was placed on the device clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledPlayback {
    pub id: SourceId,
    /// Start time in seconds on the output clock
    pub start: f64,
    /// Playback length in seconds
    pub duration: f64,
}

impl ScheduledPlayback {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Playback timeline and in-flight source set for one session
#[derive(Debug)]
pub struct PlaybackScheduler {
    /// Start offset for the next inbound frame
    next_start_time: f64,
    /// Sources scheduled and not yet finished
    in_flight: HashSet<SourceId>,
    next_id: u64,
    sample_rate: u32,
    channels: u16,
    gain: f32,
}

impl PlaybackScheduler {
    pub fn new(sample_rate: u32, channels: u16, gain: f32) -> Self {
        Self {
            next_start_time: 0.0,
            in_flight: HashSet::new(),
            next_id: 0,
            sample_rate,
            channels,
            gain,
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, id: SourceId) -> bool {
        self.in_flight.contains(&id)
    }

    /// Decode an inbound payload and schedule it right after the previous one
    ///
    /// The start is `max(next_start_time, clock)`, so a late frame plays
    /// immediately instead of at a stale offset. Empty payloads are ignored.
    pub fn schedule(
        &mut self,
        output: &mut dyn OutputDevice,
        payload: &str,
    ) -> SessionResult<Option<ScheduledPlayback>> {
        if payload.is_empty() {
            return Ok(None);
        }

        let mut buffer = decode_inbound(payload, self.sample_rate, self.channels)?;
        if buffer.is_empty() {
            return Ok(None);
        }
        buffer.apply_gain(self.gain);

        let now = output.current_time();
        let start = self.next_start_time.max(now);
        let duration = buffer.duration_secs();
        let id = SourceId(self.next_id);

        output.start_source(id, buffer, start)?;

        self.next_id += 1;
        self.next_start_time = start + duration;
        self.in_flight.insert(id);

        debug!(
            "Scheduled {} at {:.3}s for {:.3}s (clock {:.3}s, {} in flight)",
            id,
            start,
            duration,
            now,
            self.in_flight.len()
        );

        Ok(Some(ScheduledPlayback { id, start, duration }))
    }

    /// A source finished playing; unknown ids (already cut) are ignored
    pub fn on_source_ended(&mut self, id: SourceId) -> bool {
        let removed = self.in_flight.remove(&id);
        if !removed {
            debug!("Ignoring end of {} (not in flight)", id);
        }
        removed
    }

    /// Cut every in-flight source and reset the timeline to zero
    pub fn interrupt(&mut self, output: &mut dyn OutputDevice) -> usize {
        let mut stopped: Vec<SourceId> = self.in_flight.drain().collect();
        stopped.sort();
        for id in &stopped {
            output.stop_source(*id);
        }
        self.next_start_time = 0.0;

        info!("Playback interrupted: {} sources stopped", stopped.len());
        stopped.len()
    }

    /// Stop everything without logging an interruption (session teardown)
    pub fn clear(&mut self, output: &mut dyn OutputDevice) {
        for id in self.in_flight.drain() {
            output.stop_source(id);
        }
        self.next_start_time = 0.0;
    }
}
