//! Utterance segmentation
//!
//! Splits a continuous microphone stream into finalized utterances using
//! local energy detection: speech followed by enough silence closes one.

use super::SAMPLE_RATE;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to keep (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration that closes an utterance (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Longest utterance before it is cut regardless of silence
const MAX_UTTERANCE_SAMPLES: usize = SAMPLE_RATE as usize * 15;

/// State of the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Speech detected, accumulating
    InSpeech,
}

/// Turns audio chunks into complete utterances
pub struct UtteranceSegmenter {
    state: SegmenterState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
    voiced_samples: usize,
}

impl Default for UtteranceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl UtteranceSegmenter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SegmenterState::Idle,
            speech_buffer: Vec::new(),
            silence_counter: 0,
            voiced_samples: 0,
        }
    }

    /// Feed a chunk of samples
    ///
    /// Returns the utterance audio once speech has been followed by enough
    /// silence (or ran too long); the segmenter is then back to idle.
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::InSpeech;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    self.voiced_samples = samples.len();
                    tracing::trace!(energy, "speech detected");
                }
                None
            }
            SegmenterState::InSpeech => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                    self.voiced_samples += samples.len();
                } else {
                    self.silence_counter += samples.len();
                }

                let long_enough = self.voiced_samples > MIN_SPEECH_SAMPLES;

                if (self.silence_counter > SILENCE_SAMPLES && long_enough)
                    || self.speech_buffer.len() >= MAX_UTTERANCE_SAMPLES
                {
                    tracing::debug!(samples = self.speech_buffer.len(), "utterance complete");
                    let utterance = std::mem::take(&mut self.speech_buffer);
                    self.reset();
                    return Some(utterance);
                }

                // too much silence without enough speech: a click or a cough
                if self.silence_counter > SILENCE_SAMPLES * 2 {
                    tracing::trace!("discarding short noise");
                    self.reset();
                }
                None
            }
        }
    }

    /// Drop any partial utterance
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.speech_buffer.clear();
        self.silence_counter = 0;
        self.voiced_samples = 0;
    }

    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
pub(crate) fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_energy(&loud) > 0.4);
    }

    #[test]
    fn short_noise_is_discarded() {
        let mut seg = UtteranceSegmenter::new();
        assert!(seg.push(&[0.5; 800]).is_none());
        assert_eq!(seg.state(), SegmenterState::InSpeech);

        for _ in 0..12 {
            assert!(seg.push(&[0.0; 1600]).is_none());
        }
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn overlong_speech_is_cut() {
        let mut seg = UtteranceSegmenter::new();
        let mut cut = None;
        for _ in 0..200 {
            if let Some(u) = seg.push(&[0.5; 1600]) {
                cut = Some(u);
                break;
            }
        }
        assert!(cut.unwrap().len() >= MAX_UTTERANCE_SAMPLES);
    }
}
