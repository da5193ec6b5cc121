//! Voice activity detection and stopword gating
//!
//! This crate turns a live audio stream into discrete turn-taking events:
//! - `SpeechScorer`: pluggable per-window speech probability model
//!   (Silero ONNX behind the `onnx` feature, an energy scorer otherwise)
//! - Speech-span aggregation with hysteresis and padding
//! - `PauseGate`: the chunked started/continuing/paused state machine
//! - `StopwordDetector`: lightweight STT over a bounded window
//! - A process-wide model registry with lazy init and explicit teardown

pub mod gate;
pub mod options;
pub mod registry;
pub mod scorer;
pub mod segments;
#[cfg(feature = "onnx")]
pub mod silero;
pub mod stopword;

pub use gate::{GateEvent, GateOptions, PauseGate};
pub use options::VadOptions;
pub use registry::ModelRegistry;
pub use scorer::{EnergyScorer, SpeechScorer};
pub use segments::{speech_duration, speech_spans, SpeechSpan};
#[cfg(feature = "onnx")]
pub use silero::SileroVad;
pub use stopword::{SpeechToText, StopwordDetector, DEFAULT_WINDOW_SECS};

use thiserror::Error;

/// Sample rate every scorer and the stopword window operate at
pub const VAD_SAMPLE_RATE: u32 = 16000;

/// VAD errors
#[derive(Error, Debug)]
pub enum VadError {
    #[error("model error: {0}")]
    Model(String),

    #[error("stt error: {0}")]
    Stt(String),

    #[error("audio error: {0}")]
    Audio(String),
}

pub type Result<T> = std::result::Result<T, VadError>;
