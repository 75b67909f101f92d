use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{OutputDevice, SourceId};
use super::pcm::{float_to_pcm16, PlaybackBuffer};
use crate::error::{SessionError, SessionResult};

/// A source placed on the render timeline
struct RenderedSource {
    start_frame: usize,
    samples: Vec<f32>,
    timer: JoinHandle<()>,
}

/// Headless output device
///
/// Keeps a real-time clock starting at zero when the context is opened and
/// mixes scheduled buffers into an in-memory timeline at their start offset.
/// End notifications fire when a buffer's playback window elapses. On close
/// the timeline is optionally written out as a 16-bit mono WAV file.
pub struct RenderOutput {
    sample_rate: u32,
    opened_at: Instant,
    ended: mpsc::UnboundedSender<SourceId>,
    sources: HashMap<SourceId, RenderedSource>,
    timeline: Vec<f32>,
    output_path: Option<PathBuf>,
    closed: bool,
}

impl RenderOutput {
    pub fn new(
        sample_rate: u32,
        ended: mpsc::UnboundedSender<SourceId>,
        output_path: Option<PathBuf>,
    ) -> Self {
        info!(
            "Render output opened ({}Hz, file: {})",
            sample_rate,
            output_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string())
        );

        Self {
            sample_rate,
            opened_at: Instant::now(),
            ended,
            sources: HashMap::new(),
            timeline: Vec::new(),
            output_path,
            closed: false,
        }
    }

    /// Rendered samples so far
    pub fn timeline(&self) -> &[f32] {
        &self.timeline
    }

    fn frame_at(&self, time: f64) -> usize {
        (time.max(0.0) * self.sample_rate as f64).round() as usize
    }

    fn prune_finished(&mut self) {
        self.sources.retain(|_, source| !source.timer.is_finished());
    }

    fn write_wav(&self, path: &PathBuf) -> SessionResult<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(path, spec)?;
        for sample in float_to_pcm16(&self.timeline) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;

        info!(
            "Rendered {:.1}s of playback to {}",
            self.timeline.len() as f64 / self.sample_rate as f64,
            path.display()
        );
        Ok(())
    }
}

impl OutputDevice for RenderOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.opened_at.elapsed().as_secs_f64()
    }

    fn start_source(&mut self, id: SourceId, buffer: PlaybackBuffer, when: f64) -> SessionResult<()> {
        if self.closed {
            return Err(SessionError::Device("Output context is closed".to_string()));
        }
        self.prune_finished();

        // Mono timeline: fold interleaved channels down
        let channels = buffer.channels.max(1) as usize;
        let samples: Vec<f32> = buffer
            .samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        let start_frame = self.frame_at(when);
        let end_frame = start_frame + samples.len();
        if self.timeline.len() < end_frame {
            self.timeline.resize(end_frame, 0.0);
        }
        for (slot, sample) in self.timeline[start_frame..end_frame].iter_mut().zip(&samples) {
            *slot += sample;
        }

        let ends_in = (when + buffer.duration_secs() - self.current_time()).max(0.0);
        let ended = self.ended.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(ends_in)).await;
            let _ = ended.send(id);
        });

        debug!(
            "Rendered {} at {:.3}s ({} samples)",
            id,
            when,
            samples.len()
        );

        self.sources.insert(
            id,
            RenderedSource {
                start_frame,
                samples,
                timer,
            },
        );
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        let Some(source) = self.sources.remove(&id) else {
            return;
        };
        source.timer.abort();

        // Remove the part of this source that has not played yet
        let cut_from = self.frame_at(self.current_time()).max(source.start_frame);
        let offset = cut_from - source.start_frame;
        if offset < source.samples.len() {
            let end = (source.start_frame + source.samples.len()).min(self.timeline.len());
            for (slot, sample) in self.timeline[cut_from..end]
                .iter_mut()
                .zip(&source.samples[offset..])
            {
                *slot -= sample;
            }
        }

        let _ = self.ended.send(id);
    }

    fn close(&mut self) -> SessionResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        for (_, source) in self.sources.drain() {
            source.timer.abort();
        }

        if let Some(path) = self.output_path.clone() {
            self.write_wav(&path)?;
        }

        info!("Render output closed");
        Ok(())
    }
}

impl Drop for RenderOutput {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("Failed to close render output on drop: {}", e);
            }
        }
    }
}
