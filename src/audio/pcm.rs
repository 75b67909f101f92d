// Wire codec for realtime audio frames
//
// Both directions carry raw little-endian int16 PCM, base64 encoded.
// Outbound frames come from the microphone as f32 samples in [-1.0, 1.0];
// inbound frames are decoded back to f32 for the output device.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

/// Capture rate expected by the remote endpoint
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Rate of audio produced by the remote endpoint
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per captured frame
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// MIME descriptor for raw PCM at the given rate
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Convert float samples to int16 by linear scaling (`sample * 32768`).
///
/// Float-to-int casts saturate, so out-of-range input clamps to
/// `i16::MIN..=i16::MAX` instead of wrapping.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| (s * 32768.0) as i16).collect()
}

/// Convert int16 samples back to floats in [-1.0, 1.0)
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub fn bytes_to_pcm16(bytes: &[u8]) -> SessionResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(SessionError::InvalidFrame(format!(
            "odd PCM byte count: {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// Encode int16 samples to the base64 wire representation
pub fn encode_pcm16(samples: &[i16]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16_to_bytes(samples))
}

/// Decode the base64 wire representation to int16 samples
pub fn decode_pcm16(payload: &str) -> SessionResult<Vec<i16>> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload)?;
    bytes_to_pcm16(&bytes)
}

/// One captured frame ready for the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Position in the sequence of frames actually sent this session
    pub sequence: u64,
    /// Base64 of little-endian int16 PCM
    pub data: String,
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

impl OutboundFrame {
    pub fn from_float(sequence: u64, samples: &[f32], sample_rate: u32) -> Self {
        let pcm = float_to_pcm16(samples);
        Self {
            sequence,
            data: encode_pcm16(&pcm),
            mime_type: pcm_mime_type(sample_rate),
        }
    }

    /// Decode the payload back to samples
    pub fn samples(&self) -> SessionResult<Vec<i16>> {
        decode_pcm16(&self.data)
    }
}

/// Decoded inbound audio, ready to be scheduled on an output device
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Interleaved float samples
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PlaybackBuffer {
    pub fn from_pcm16(samples: &[i16], sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: pcm16_to_float(samples),
            sample_rate,
            channels,
        }
    }

    /// Samples per channel
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Playback length in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn apply_gain(&mut self, gain: f32) {
        if (gain - 1.0).abs() < f32::EPSILON {
            return;
        }
        for sample in &mut self.samples {
            *sample = (*sample * gain).clamp(-1.0, 1.0);
        }
    }
}

/// Decode an inbound base64 payload into a playback buffer
pub fn decode_inbound(payload: &str, sample_rate: u32, channels: u16) -> SessionResult<PlaybackBuffer> {
    let pcm = decode_pcm16(payload)?;
    if channels > 1 && pcm.len() % channels as usize != 0 {
        return Err(SessionError::InvalidFrame(format!(
            "{} samples do not divide into {} channels",
            pcm.len(),
            channels
        )));
    }
    Ok(PlaybackBuffer::from_pcm16(&pcm, sample_rate, channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_conversion_scales_linearly() {
        let pcm = float_to_pcm16(&[0.0, 0.5, -0.5, -1.0]);
        assert_eq!(pcm, vec![0, 16384, -16384, -32768]);
    }

    #[test]
    fn test_float_conversion_saturates() {
        // 1.0 * 32768 does not fit in i16
        let pcm = float_to_pcm16(&[1.0, 2.0, -2.0]);
        assert_eq!(pcm, vec![i16::MAX, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_wire_roundtrip_is_bit_identical() {
        let samples: Vec<i16> = vec![i16::MIN, -1, 0, 1, 12345, i16::MAX];
        let encoded = encode_pcm16(&samples);
        assert_eq!(decode_pcm16(&encoded).unwrap(), samples);
    }

    #[test]
    fn test_bytes_are_little_endian() {
        assert_eq!(pcm16_to_bytes(&[0x0102]), vec![0x02, 0x01]);
    }

    #[test]
    fn test_odd_byte_count_is_rejected() {
        let payload = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        let err = decode_pcm16(&payload).unwrap_err();
        assert!(matches!(err, SessionError::InvalidFrame(_)));
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        assert!(matches!(
            decode_pcm16("not base64!!"),
            Err(SessionError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_outbound_frame_mime_type() {
        let frame = OutboundFrame::from_float(7, &[0.25; 4], INPUT_SAMPLE_RATE);
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.samples().unwrap(), vec![8192; 4]);
    }

    #[test]
    fn test_playback_buffer_duration() {
        // 200ms at 24kHz
        let payload = encode_pcm16(&vec![0i16; 4800]);
        let buffer = decode_inbound(&payload, OUTPUT_SAMPLE_RATE, 1).unwrap();
        assert_eq!(buffer.frame_count(), 4800);
        assert!((buffer.duration_secs() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_gain_is_applied_and_clamped() {
        let mut buffer = PlaybackBuffer {
            samples: vec![0.5, -0.8],
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: 1,
        };
        buffer.apply_gain(2.0);
        assert_eq!(buffer.samples, vec![1.0, -1.0]);
    }
}
