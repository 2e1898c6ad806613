//! Audio playback to speakers
//!
//! Playback is blocking and always runs off the caller's task via
//! `spawn_blocking`. A shared stop flag cuts a clip short.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// Decoded mono clip ready for output
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Clip length
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.samples.len() as u64 * 1000 / u64::from(self.sample_rate))
    }
}

/// Plays audio to the default output device
#[derive(Debug, Clone, Default)]
pub struct AudioPlayback {
    stop: Arc<AtomicBool>,
}

impl AudioPlayback {
    /// Create a playback handle with its own stop flag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a playback handle sharing an external stop flag
    #[must_use]
    pub const fn with_stop_flag(stop: Arc<AtomicBool>) -> Self {
        Self { stop }
    }

    /// Ask any in-progress clip to stop
    ///
    /// The halt sticks until [`reset`](Self::reset), so a clip whose worker
    /// has not started yet is skipped too.
    pub fn halt(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Clear a previous halt so the next clip plays
    pub fn reset(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Write `audio` to a transient file, play it, and remove the file
    ///
    /// The file is removed on every exit path, including playback failure.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written, decoded, or played
    pub async fn play_transient(&self, audio: &[u8]) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("npc-response-")
            .suffix(".audio")
            .tempfile()?;
        file.write_all(audio)?;
        file.flush()?;

        let path = file.path().to_path_buf();
        tracing::debug!(path = %path.display(), bytes = audio.len(), "wrote transient response audio");

        let result = self.play_file(path).await;
        drop(file);
        result
    }

    /// Decode and play an audio file on a blocking worker
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub async fn play_file(&self, path: PathBuf) -> Result<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.play_file_blocking(&path))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }

    /// Decode and play an audio file, blocking until done
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub fn play_file_blocking(&self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)?;
        let clip = decode_audio_bytes(&bytes)?;
        self.play_blocking(&clip)
    }

    /// Play a decoded clip, blocking until done or halted
    ///
    /// # Errors
    ///
    /// Returns error if no output device can play the clip
    pub fn play_blocking(&self, clip: &DecodedAudio) -> Result<()> {
        if clip.samples.is_empty() || self.is_halted() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let (config, samples) = output_config_for(&device, clip)?;
        let channels = config.channels as usize;
        let out_rate = config.sample_rate.0;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = out_rate,
            channels,
            "audio playback initialized"
        );

        let total = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));

        let stream_samples = Arc::clone(&samples);
        let stream_position = Arc::clone(&position);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let pos = stream_position.load(Ordering::Relaxed);
                        let sample = stream_samples.get(pos).copied().unwrap_or(0.0);
                        if pos < stream_samples.len() {
                            stream_position.store(pos + 1, Ordering::Relaxed);
                        }
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        // Poll for completion with timeout
        let duration_ms = (total as u64 * 1000) / u64::from(out_rate.max(1));
        let timeout = Duration::from_millis(duration_ms + 500);
        let start = Instant::now();

        while position.load(Ordering::Relaxed) < total {
            if self.stop.load(Ordering::SeqCst) {
                tracing::debug!("playback halted");
                break;
            }
            if start.elapsed() > timeout {
                tracing::warn!("playback timed out");
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        // Let the device drain its last buffer
        std::thread::sleep(Duration::from_millis(100));

        drop(stream);
        tracing::debug!(samples = total, "playback complete");

        Ok(())
    }
}

/// Pick an output config for the clip, resampling when the device can't
/// run at the clip's own rate
fn output_config_for(device: &cpal::Device, clip: &DecodedAudio) -> Result<(StreamConfig, Vec<f32>)> {
    let rate = SampleRate(clip.sample_rate);
    let native = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .min_by_key(cpal::SupportedStreamConfigRange::channels);

    if let Some(range) = native {
        return Ok((range.with_sample_rate(rate).config(), clip.samples.clone()));
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    if fallback.sample_format() != cpal::SampleFormat::F32 {
        return Err(Error::Audio("no f32 output config available".to_string()));
    }

    let config = fallback.config();
    let samples = resample_linear(&clip.samples, clip.sample_rate, config.sample_rate.0);
    Ok((config, samples))
}

/// Decode WAV or MP3 bytes into a mono clip
///
/// # Errors
///
/// Returns error if the bytes are neither valid WAV nor MP3
pub fn decode_audio_bytes(bytes: &[u8]) -> Result<DecodedAudio> {
    if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                let as_f32: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&as_f32, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("no decodable audio frames".to_string()));
    }

    Ok(DecodedAudio { samples, sample_rate })
}

/// Average interleaved channels down to mono
#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resampler
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = ((samples.len() as f64) / ratio).round() as usize;

    (0..out_len)
        .map(|i| {
            let src = i as f64 * ratio;
            let idx = src.floor() as usize;
            let frac = (src - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}
