//! Audio capture from microphone
//!
//! The cpal stream lives on a dedicated thread because streams are not
//! `Send`. The device callback runs the [`UtteranceSegmenter`] and hands
//! closed utterances to a bounded channel without blocking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::segmenter::{Utterance, UtteranceSegmenter};
use crate::config::CaptureConfig;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Captures utterances from the default input device
pub struct AudioCapture {
    config: CaptureConfig,
    recording: Arc<AtomicBool>,
    worker: Option<CaptureWorker>,
}

struct CaptureWorker {
    stop_tx: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl AudioCapture {
    /// Create a capture instance; no device is opened until [`start`](Self::start)
    #[must_use]
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            recording: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Start recording, delivering utterances to `utterances`
    ///
    /// On failure the recording flag is rolled back and no stream is left open.
    ///
    /// # Errors
    ///
    /// Returns error if the input device or stream cannot be opened
    pub fn start(&mut self, utterances: mpsc::Sender<Utterance>) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        self.recording.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();
        let recording = Arc::clone(&self.recording);

        let handle = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || capture_thread(&config, &recording, &utterances, &ready_tx, &stop_rx))
            .map_err(|e| {
                self.recording.store(false, Ordering::SeqCst);
                Error::Audio(format!("failed to spawn capture thread: {e}"))
            })?;

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(Error::Audio("capture thread exited during startup".to_string())));

        if let Err(e) = started {
            self.recording.store(false, Ordering::SeqCst);
            let _ = handle.join();
            tracing::error!(error = %e, "failed to start recording");
            return Err(e);
        }

        self.worker = Some(CaptureWorker { stop_tx, handle });
        tracing::info!("recording started");
        Ok(())
    }

    /// Stop recording
    ///
    /// Any open utterance is flushed to the channel before the stream closes.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.recording.store(false, Ordering::SeqCst);
        let _ = worker.stop_tx.send(());
        if worker.handle.join().is_err() {
            tracing::error!("capture thread panicked");
        }
        tracing::info!("recording stopped");
    }

    /// Check if currently recording
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    config: &CaptureConfig,
    recording: &Arc<AtomicBool>,
    utterances: &mpsc::Sender<Utterance>,
    ready: &std_mpsc::SyncSender<Result<()>>,
    stop: &std_mpsc::Receiver<()>,
) {
    let segmenter = Arc::new(Mutex::new(UtteranceSegmenter::new(
        config.silence_threshold,
        config.frame_size,
    )));

    let stream = match open_stream(config, recording, &segmenter, utterances) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    // Block until asked to stop or the owner goes away
    let _ = stop.recv();

    // Callback already ignores input once the flag is down
    if let Ok(mut seg) = segmenter.lock() {
        if let Some(utterance) = seg.finish() {
            tracing::debug!(samples = utterance.len(), "flushing partial utterance");
            deliver(utterances, utterance);
        }
    }

    drop(stream);
}

fn open_stream(
    config: &CaptureConfig,
    recording: &Arc<AtomicBool>,
    segmenter: &Arc<Mutex<UtteranceSegmenter>>,
    utterances: &mpsc::Sender<Utterance>,
) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(config.sample_rate)
                && c.max_sample_rate() >= SampleRate(config.sample_rate)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let stream_config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(config.sample_rate))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate,
        frame_size = config.frame_size,
        threshold = config.silence_threshold,
        "audio capture initialized"
    );

    let recording = Arc::clone(recording);
    let segmenter = Arc::clone(segmenter);
    let tx = utterances.clone();

    // Fixed blocks are a preference; the segmenter re-frames whatever arrives
    #[allow(clippy::cast_possible_truncation)]
    let frame = config.frame_size as u32;
    let mut fixed = stream_config.clone();
    fixed.buffer_size = BufferSize::Fixed(frame);

    let build = |cfg: &StreamConfig| {
        let recording = Arc::clone(&recording);
        let segmenter = Arc::clone(&segmenter);
        let tx = tx.clone();
        device.build_input_stream(
            cfg,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !recording.load(Ordering::SeqCst) {
                    return;
                }
                if let Ok(mut seg) = segmenter.lock() {
                    for utterance in seg.process(data) {
                        deliver(&tx, utterance);
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
    };

    let stream = build(&fixed)
        .or_else(|e| {
            tracing::debug!(error = %e, "fixed buffer size rejected, using device default");
            build(&stream_config)
        })
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

fn deliver(tx: &mpsc::Sender<Utterance>, utterance: Utterance) {
    let samples = utterance.len();
    match tx.try_send(utterance) {
        Ok(()) => tracing::debug!(samples, "utterance queued"),
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(samples, "utterance queue full, dropping utterance");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(samples, "utterance consumer gone");
        }
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample_i16)?;
        }

        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}
