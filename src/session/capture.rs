use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::audio::{CaptureBuffer, OutboundFrame};

/// Turns microphone frames into outbound wire frames
///
/// Muted frames are counted and dropped; capture itself keeps running.
/// Sequence numbers count sent frames only, so unmuting continues the
/// numbering without a gap.
#[derive(Debug)]
pub struct CapturePipeline {
    muted: Arc<AtomicBool>,
    sample_rate: u32,
    next_sequence: u64,
    frames_captured: u64,
    frames_dropped: u64,
}

impl CapturePipeline {
    pub fn new(sample_rate: u32, muted: Arc<AtomicBool>) -> Self {
        Self {
            muted,
            sample_rate,
            next_sequence: 0,
            frames_captured: 0,
            frames_dropped: 0,
        }
    }

    /// Convert one captured frame; None while muted
    pub fn process(&mut self, buffer: &CaptureBuffer) -> Option<OutboundFrame> {
        self.frames_captured += 1;

        if self.muted.load(Ordering::SeqCst) {
            self.frames_dropped += 1;
            debug!("Muted: dropped capture frame ({} samples)", buffer.samples.len());
            return None;
        }

        let frame = OutboundFrame::from_float(self.next_sequence, &buffer.samples, self.sample_rate);
        self.next_sequence += 1;
        Some(frame)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    pub fn frames_sent(&self) -> u64 {
        self.next_sequence
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(value: f32) -> CaptureBuffer {
        CaptureBuffer {
            samples: vec![value; 4],
            sample_rate: 16000,
        }
    }

    #[test]
    fn test_frames_are_encoded_in_order() {
        let mut pipeline = CapturePipeline::new(16000, Arc::new(AtomicBool::new(false)));

        let first = pipeline.process(&buffer(0.5)).unwrap();
        let second = pipeline.process(&buffer(-0.5)).unwrap();

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(first.mime_type, "audio/pcm;rate=16000");
        assert_eq!(first.samples().unwrap(), vec![16384; 4]);
        assert_eq!(second.samples().unwrap(), vec![-16384; 4]);
    }

    #[test]
    fn test_mute_drops_without_sequence_gap() {
        let muted = Arc::new(AtomicBool::new(false));
        let mut pipeline = CapturePipeline::new(16000, Arc::clone(&muted));

        assert_eq!(pipeline.process(&buffer(0.1)).unwrap().sequence, 0);

        muted.store(true, Ordering::SeqCst);
        assert!(pipeline.process(&buffer(0.1)).is_none());
        assert!(pipeline.process(&buffer(0.1)).is_none());

        muted.store(false, Ordering::SeqCst);
        assert_eq!(pipeline.process(&buffer(0.1)).unwrap().sequence, 1);

        assert_eq!(pipeline.frames_captured(), 4);
        assert_eq!(pipeline.frames_sent(), 2);
        assert_eq!(pipeline.frames_dropped(), 2);
    }
}
