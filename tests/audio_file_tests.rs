// Integration tests for WAV-backed audio
//
// Fixtures are written with hound into a temp dir, then read back through
// `AudioFile`, the file capture device and the file audio host.

use anyhow::Result;
use rhino_voice::audio::{
    AudioFile, AudioHost, CaptureConfig, CaptureDevice, FileAudioHost, FileCaptureDevice,
    MicrophonePermission, PlaybackBuffer, SourceId,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

fn fixture(dir: &TempDir, name: &str, sample_rate: u32, channels: u16, samples: &[i16]) -> Result<PathBuf> {
    let path = dir.path().join(name);
    write_wav(&path, sample_rate, channels, samples)?;
    Ok(path)
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = TempDir::new()?;
    let path = fixture(&dir, "tone.wav", 16000, 1, &vec![1200i16; 8000])?;

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 8000);
    assert!((audio.duration_seconds - 0.5).abs() < 1e-9);
    assert!(audio.path.contains("tone.wav"));
    Ok(())
}

#[test]
fn test_stereo_48k_downmix() -> Result<()> {
    let dir = TempDir::new()?;
    // Left 1000, right 3000 => mono 2000
    let interleaved: Vec<i16> = (0..4800).flat_map(|_| [1000i16, 3000i16]).collect();
    let path = fixture(&dir, "stereo.wav", 48000, 2, &interleaved)?;

    let audio = AudioFile::open(&path)?;
    let mono = audio.to_mono(16000)?;

    assert_eq!(mono.len(), 1600);
    assert!(mono.iter().all(|&s| s == 2000));
    Ok(())
}

#[test]
fn test_unsupported_rate_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let path = fixture(&dir, "odd.wav", 22050, 1, &vec![0i16; 100])?;

    let audio = AudioFile::open(&path)?;
    assert!(audio.to_mono(16000).is_err());
    Ok(())
}

#[test]
fn test_missing_file_fails() {
    assert!(AudioFile::open("/nonexistent/prompt.wav").is_err());
}

#[tokio::test]
async fn test_file_capture_frames_then_silence() -> Result<()> {
    let dir = TempDir::new()?;
    let path = fixture(&dir, "prompt.wav", 16000, 1, &vec![16384i16; 6])?;
    let config = CaptureConfig {
        sample_rate: 16000,
        frame_size: 4,
    };

    let mut device = FileCaptureDevice::open(&path, config, false)?;
    let mut rx = device.start().await?;
    assert!(device.is_capturing());

    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await?.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await?.unwrap();
    let third = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await?.unwrap();

    assert_eq!(first.samples, vec![0.5; 4]);
    assert_eq!(second.samples, vec![0.5, 0.5, 0.0, 0.0]);
    assert_eq!(third.samples, vec![0.0; 4]);
    assert_eq!(first.sample_rate, 16000);

    device.stop().await?;
    assert!(!device.is_capturing());
    Ok(())
}

#[tokio::test]
async fn test_file_capture_loops() -> Result<()> {
    let dir = TempDir::new()?;
    let path = fixture(&dir, "loop.wav", 16000, 1, &[16384, -16384, 0])?;
    let config = CaptureConfig {
        sample_rate: 16000,
        frame_size: 4,
    };

    let mut device = FileCaptureDevice::open(&path, config, true)?;
    let mut rx = device.start().await?;

    let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await?.unwrap();
    assert_eq!(frame.samples, vec![0.5, -0.5, 0.0, 0.5]);

    device.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_file_host_renders_playback() -> Result<()> {
    let dir = TempDir::new()?;
    let output_path = dir.path().join("out").join("reply.wav");
    let host = FileAudioHost::new(None, Some(output_path.clone()), false, MicrophonePermission::Granted);

    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let mut output = host.open_output(24000, tx)?;
    let buffer = PlaybackBuffer::from_pcm16(&vec![8192i16; 2400], 24000, 1);
    output.start_source(SourceId(0), buffer, 0.0)?;
    output.close()?;

    let reader = hound::WavReader::open(&output_path)?;
    assert_eq!(reader.spec().sample_rate, 24000);
    let samples: Vec<i16> = reader.into_samples::<i16>().collect::<Result<_, _>>()?;
    assert!(samples.len() >= 2400);
    assert!(samples[..2400].iter().all(|&s| s == 8192));
    Ok(())
}
