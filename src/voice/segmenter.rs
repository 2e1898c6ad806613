//! Utterance segmentation
//!
//! Splits a continuous sample stream into utterances using a peak-amplitude
//! gate evaluated per fixed-size frame. Independent of any audio device.

/// Default peak amplitude above which a frame counts as speech
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 0.01;

/// Default frame length in samples
pub const DEFAULT_FRAME_SIZE: usize = 1024;

/// A closed, non-empty span of captured speech
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    samples: Vec<f32>,
}

impl Utterance {
    /// Wrap samples as an utterance; `None` if there are no samples
    #[must_use]
    pub fn new(samples: Vec<f32>) -> Option<Self> {
        if samples.is_empty() {
            None
        } else {
            Some(Self { samples })
        }
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always false; kept for API symmetry with `len`
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Peak absolute amplitude of a frame
#[must_use]
pub fn peak_amplitude(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
}

/// Frame-based speech gate
#[derive(Debug)]
pub struct UtteranceSegmenter {
    threshold: f32,
    frame_size: usize,
    pending: Vec<f32>,
    buffer: Vec<f32>,
    speaking: bool,
}

impl UtteranceSegmenter {
    /// Create a segmenter
    ///
    /// A `frame_size` of zero is treated as one sample per frame.
    #[must_use]
    pub fn new(threshold: f32, frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            threshold,
            frame_size,
            pending: Vec::with_capacity(frame_size),
            buffer: Vec::new(),
            speaking: false,
        }
    }

    /// Feed samples of any length; returns utterances closed by them
    pub fn process(&mut self, samples: &[f32]) -> Vec<Utterance> {
        let mut closed = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let wanted = self.frame_size - self.pending.len();
            let take = wanted.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_size {
                let frame = std::mem::take(&mut self.pending);
                if let Some(utterance) = self.push_frame(&frame) {
                    closed.push(utterance);
                }
                self.pending = frame;
                self.pending.clear();
            }
        }

        closed
    }

    /// Evaluate one complete frame
    pub fn push_frame(&mut self, frame: &[f32]) -> Option<Utterance> {
        let level = peak_amplitude(frame);

        if level > self.threshold {
            if !self.speaking {
                tracing::debug!(level, "speech detected");
            }
            self.speaking = true;
            self.buffer.extend_from_slice(frame);
            None
        } else if self.speaking {
            self.speaking = false;
            let utterance = Utterance::new(std::mem::take(&mut self.buffer));
            if let Some(u) = &utterance {
                tracing::debug!(samples = u.len(), "speech ended");
            }
            utterance
        } else {
            None
        }
    }

    /// Close any open utterance at stream stop
    ///
    /// An incomplete trailing frame is appended only when an utterance is
    /// already open.
    pub fn finish(&mut self) -> Option<Utterance> {
        if self.speaking {
            self.buffer.append(&mut self.pending);
        }
        self.pending.clear();
        self.speaking = false;
        Utterance::new(std::mem::take(&mut self.buffer))
    }

    /// Drop all buffered audio
    pub fn reset(&mut self) {
        self.pending.clear();
        self.buffer.clear();
        self.speaking = false;
    }

    /// Whether an utterance is currently open
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Samples accumulated in the open utterance
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.frame_size
    }
}

impl Default for UtteranceSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_SILENCE_THRESHOLD, DEFAULT_FRAME_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(level: f32, len: usize) -> Vec<f32> {
        vec![level; len]
    }

    #[test]
    fn peak_uses_absolute_value() {
        assert!((peak_amplitude(&[0.1, -0.4, 0.2]) - 0.4).abs() < f32::EPSILON);
        assert!(peak_amplitude(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn silence_never_opens_an_utterance() {
        let mut seg = UtteranceSegmenter::new(0.01, 4);
        assert!(seg.process(&frame(0.0, 64)).is_empty());
        assert!(!seg.is_speaking());
        assert!(seg.finish().is_none());
    }

    #[test]
    fn speech_then_silence_closes_utterance() {
        let mut seg = UtteranceSegmenter::new(0.01, 4);
        assert!(seg.push_frame(&frame(0.5, 4)).is_none());
        assert!(seg.push_frame(&frame(0.3, 4)).is_none());
        assert!(seg.is_speaking());

        let utterance = seg.push_frame(&frame(0.0, 4)).unwrap();
        assert_eq!(utterance.len(), 8);
        assert!(!seg.is_speaking());
        assert_eq!(seg.buffered(), 0);
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut seg = UtteranceSegmenter::new(0.5, 2);
        assert!(seg.push_frame(&frame(0.5, 2)).is_none());
        assert!(!seg.is_speaking());
    }

    #[test]
    fn process_rechunks_arbitrary_slices() {
        let mut seg = UtteranceSegmenter::new(0.01, 4);
        let mut stream = frame(0.2, 6);
        stream.extend(frame(0.0, 6));

        let closed = seg.process(&stream);
        assert_eq!(closed.len(), 1);
        // frame 1 loud, frame 2 mixed (peak 0.2) loud, frame 3 silent
        assert_eq!(closed[0].len(), 8);
    }

    #[test]
    fn finish_flushes_open_utterance_with_partial_frame() {
        let mut seg = UtteranceSegmenter::new(0.01, 4);
        seg.process(&frame(0.4, 6));
        assert!(seg.is_speaking());

        let flushed = seg.finish().unwrap();
        assert_eq!(flushed.len(), 6);
        assert!(seg.finish().is_none());
    }

    #[test]
    fn empty_utterance_is_unrepresentable() {
        assert!(Utterance::new(Vec::new()).is_none());
    }
}
