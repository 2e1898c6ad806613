//! Voice processing module
//!
//! Handles microphone capture, utterance segmentation, speech services,
//! and playback.

mod capture;
mod playback;
pub mod segmenter;
mod stt;
mod tone;
mod tts;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use playback::{AudioPlayback, DecodedAudio, decode_audio_bytes, resample_linear};
pub use segmenter::{Utterance, UtteranceSegmenter};
pub use stt::{Transcriber, WhisperTranscriber};
pub use tone::{TONE_SAMPLE_RATE, sine_tone, write_tone_wav};
pub use tts::{OpenAiSpeech, Synthesizer};
