//! Model-level VAD options

use serde::{Deserialize, Serialize};

/// Options passed to the underlying speech model and span aggregation.
///
/// Probabilities above `threshold` count as speech. Spans shorter than
/// `min_speech_duration_ms` are discarded; a span only ends after
/// `min_silence_duration_ms` of sustained silence; accepted spans are
/// padded by `speech_pad_ms` on each side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadOptions {
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    #[serde(default = "default_min_speech_duration_ms")]
    pub min_speech_duration_ms: u32,

    #[serde(default = "default_min_silence_duration_ms")]
    pub min_silence_duration_ms: u32,

    /// Window fed to the model; Silero is trained on 512/1024/1536 at 16 kHz
    #[serde(default = "default_window_size_samples")]
    pub window_size_samples: usize,

    #[serde(default = "default_speech_pad_ms")]
    pub speech_pad_ms: u32,
}

fn default_threshold() -> f32 {
    0.5
}
fn default_min_speech_duration_ms() -> u32 {
    250
}
fn default_min_silence_duration_ms() -> u32 {
    2000
}
fn default_window_size_samples() -> usize {
    1024
}
fn default_speech_pad_ms() -> u32 {
    400
}

impl Default for VadOptions {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            min_speech_duration_ms: default_min_speech_duration_ms(),
            min_silence_duration_ms: default_min_silence_duration_ms(),
            window_size_samples: default_window_size_samples(),
            speech_pad_ms: default_speech_pad_ms(),
        }
    }
}

impl VadOptions {
    /// Hysteresis floor: once triggered, speech only ends below this
    pub fn neg_threshold(&self) -> f32 {
        (self.threshold - 0.15).max(0.01)
    }
}
