//! Speech scorer seam
//!
//! A scorer maps fixed windows of 16 kHz mono audio to speech
//! probabilities. The ONNX-backed Silero model implements this behind the
//! `onnx` feature; `EnergyScorer` is the deterministic fallback used when
//! no model is available and throughout the test suite.

use crate::Result;

/// Per-window speech probability model over 16 kHz mono audio
pub trait SpeechScorer: Send + Sync {
    /// Score consecutive windows of `window_size` samples; the final
    /// window is zero-padded. Returns one probability per window.
    fn score_windows(&self, audio: &[f32], window_size: usize) -> Result<Vec<f32>>;
}

/// RMS-energy scorer.
///
/// Windows whose RMS reaches `threshold` score 1.0, everything else 0.0.
/// No model weights, fully deterministic.
#[derive(Debug, Clone)]
pub struct EnergyScorer {
    threshold: f32,
}

impl EnergyScorer {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EnergyScorer {
    fn default() -> Self {
        Self { threshold: 0.05 }
    }
}

impl SpeechScorer for EnergyScorer {
    fn score_windows(&self, audio: &[f32], window_size: usize) -> Result<Vec<f32>> {
        let window_size = window_size.max(1);
        Ok(audio
            .chunks(window_size)
            .map(|window| {
                let rms =
                    (window.iter().map(|s| s * s).sum::<f32>() / window_size as f32).sqrt();
                if rms >= self.threshold {
                    1.0
                } else {
                    0.0
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_scorer_separates_speech_from_silence() {
        let scorer = EnergyScorer::default();
        let mut audio = vec![0.0f32; 1024];
        audio.extend((0..1024).map(|i| (i as f32 * 0.3).sin() * 0.5));

        let probs = scorer.score_windows(&audio, 1024).unwrap();
        assert_eq!(probs, vec![0.0, 1.0]);
    }

    #[test]
    fn test_final_window_padding() {
        let scorer = EnergyScorer::default();
        let audio = vec![0.5f32; 1536];
        let probs = scorer.score_windows(&audio, 1024).unwrap();
        assert_eq!(probs.len(), 2);
        assert_eq!(probs[0], 1.0);
    }
}
