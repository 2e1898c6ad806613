//! Test tone generation for speaker checks

use std::path::Path;

use crate::Result;

/// Sample rate of generated tone files
pub const TONE_SAMPLE_RATE: u32 = 44100;

/// Generate a sine tone at `frequency` Hz
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn sine_tone(frequency: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
    let len = (seconds.max(0.0) * sample_rate as f32) as usize;
    let step = std::f32::consts::TAU * frequency / sample_rate as f32;
    (0..len).map(|i| (i as f32 * step).sin()).collect()
}

/// Write a mono 16-bit tone WAV to `path`
///
/// # Errors
///
/// Returns error if the file cannot be created or written
pub fn write_tone_wav(path: &Path, frequency: f32, seconds: f32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TONE_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for sample in sine_tone(frequency, seconds, TONE_SAMPLE_RATE) {
        #[allow(clippy::cast_possible_truncation)]
        writer.write_sample((sample * 32767.0) as i16)?;
    }
    writer.finalize()?;

    tracing::info!(path = %path.display(), frequency, seconds, "wrote test tone");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_length_matches_duration() {
        assert_eq!(sine_tone(440.0, 2.0, TONE_SAMPLE_RATE).len(), 88200);
        assert!(sine_tone(440.0, 0.0, TONE_SAMPLE_RATE).is_empty());
    }

    #[test]
    fn written_tone_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_audio.wav");
        write_tone_wav(&path, 440.0, 0.5).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, TONE_SAMPLE_RATE);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.len(), 22050);
    }
}
