//! Chunked pause gate
//!
//! Buffers a live inbound stream and, every `audio_chunk_duration` seconds
//! of accumulated audio, scores the chunk and steps a two-state machine:
//! idle until a chunk carries enough speech, then speaking until a chunk
//! falls to the speech floor. The aggregated utterance (original sample
//! rate, from start of speech to end of the closing chunk) is handed out
//! with the pause event.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use voicebridge_core::AudioFrame;
use voicebridge_codec::resample_buffer;

use crate::scorer::SpeechScorer;
use crate::segments::speech_duration;
use crate::{Result, VadOptions, VAD_SAMPLE_RATE};

/// Upper bound on the scoring chunk; larger values make barge-in
/// unresponsive because a running reply can only be interrupted at
/// chunk boundaries.
pub const MAX_CHUNK_DURATION: f32 = 2.0;

/// Gate algorithm options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateOptions {
    /// Length of each scoring window in seconds
    #[serde(default = "default_chunk_duration")]
    pub audio_chunk_duration: f32,

    /// Minimum speech within one window to open an utterance
    #[serde(default = "default_started_threshold")]
    pub started_talking_threshold: f32,

    /// Once open, a window at or below this closes the utterance
    #[serde(default = "default_speech_threshold")]
    pub speech_threshold: f32,
}

fn default_chunk_duration() -> f32 {
    0.6
}
fn default_started_threshold() -> f32 {
    0.2
}
fn default_speech_threshold() -> f32 {
    0.1
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            audio_chunk_duration: default_chunk_duration(),
            started_talking_threshold: default_started_threshold(),
            speech_threshold: default_speech_threshold(),
        }
    }
}

impl GateOptions {
    /// Chunk duration clamped to the barge-in bound
    pub fn chunk_duration(&self) -> f32 {
        if self.audio_chunk_duration > MAX_CHUNK_DURATION {
            tracing::warn!(
                "audio_chunk_duration {}s clamped to {}s",
                self.audio_chunk_duration,
                MAX_CHUNK_DURATION
            );
            MAX_CHUNK_DURATION
        } else {
            self.audio_chunk_duration.max(0.05)
        }
    }
}

/// Event produced by one gate decision
#[derive(Debug, Clone, PartialEq)]
pub enum GateEvent {
    /// An utterance opened in this chunk
    StartedTalking,
    /// The open utterance continues
    Continuing,
    /// The utterance closed; all audio from start of speech through the
    /// closing chunk, at the original sample rate
    Paused { utterance: AudioFrame },
}

/// The chunked started/continuing/paused state machine
pub struct PauseGate {
    options: GateOptions,
    vad_options: VadOptions,
    scorer: Arc<dyn SpeechScorer>,
    /// Original inbound sample rate, latched from the first frame
    sample_rate: Option<u32>,
    /// Current scoring chunk (original rate, mono)
    chunk: Vec<i16>,
    /// Aggregated utterance since speech started
    utterance: Vec<i16>,
    started: bool,
}

impl PauseGate {
    pub fn new(
        scorer: Arc<dyn SpeechScorer>,
        options: GateOptions,
        vad_options: VadOptions,
    ) -> Self {
        Self {
            options,
            vad_options,
            scorer,
            sample_rate: None,
            chunk: Vec::new(),
            utterance: Vec::new(),
            started: false,
        }
    }

    /// Whether an utterance is currently open
    pub fn is_talking(&self) -> bool {
        self.started
    }

    /// Feed one inbound frame; returns every event its chunks produced
    pub fn push(&mut self, frame: &AudioFrame) -> Result<Vec<GateEvent>> {
        let rate = *self.sample_rate.get_or_insert(frame.sample_rate);
        let mono = frame.to_mono_f32();
        self.chunk
            .extend(mono.iter().map(|&s| (s * 32767.0) as i16));

        let chunk_samples = (rate as f32 * self.options.chunk_duration()) as usize;
        let mut events = Vec::new();
        while self.chunk.len() >= chunk_samples.max(1) {
            let chunk: Vec<i16> = self.chunk.drain(..chunk_samples.max(1)).collect();
            if let Some(event) = self.decide(rate, chunk)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Score one chunk and step the state machine
    fn decide(&mut self, rate: u32, chunk: Vec<i16>) -> Result<Option<GateEvent>> {
        let audio_16k = to_vad_rate(rate, &chunk);
        let dur = speech_duration(self.scorer.as_ref(), &audio_16k, &self.vad_options)?;
        tracing::trace!("chunk speech duration {:.3}s", dur);

        // equal-to-threshold does not open; equal-to-floor does close
        let opened = !self.started && dur > self.options.started_talking_threshold;
        if opened {
            self.started = true;
        }
        if self.started {
            self.utterance.extend_from_slice(&chunk);
        }

        if self.started && dur <= self.options.speech_threshold {
            let samples = std::mem::take(&mut self.utterance);
            self.started = false;
            return Ok(Some(GateEvent::Paused {
                utterance: AudioFrame::mono(rate, samples),
            }));
        }
        if opened {
            return Ok(Some(GateEvent::StartedTalking));
        }
        if self.started {
            return Ok(Some(GateEvent::Continuing));
        }
        Ok(None)
    }

    /// Drop all buffered audio and return to idle
    pub fn reset(&mut self) {
        self.chunk.clear();
        self.utterance.clear();
        self.started = false;
    }
}

/// Resample a mono PCM chunk to the VAD rate as f32
pub fn to_vad_rate(rate: u32, samples: &[i16]) -> Vec<f32> {
    let audio: Vec<f32> = samples.iter().map(|&s| s as f32 / 32768.0).collect();
    if rate == VAD_SAMPLE_RATE {
        audio
    } else {
        resample_buffer(&audio, rate, VAD_SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::EnergyScorer;

    fn gate() -> PauseGate {
        PauseGate::new(
            Arc::new(EnergyScorer::default()),
            GateOptions::default(),
            VadOptions {
                min_speech_duration_ms: 50,
                min_silence_duration_ms: 100,
                speech_pad_ms: 0,
                window_size_samples: 512,
                ..VadOptions::default()
            },
        )
    }

    fn speech_frame(ms: usize) -> AudioFrame {
        let samples = (0..16 * ms)
            .map(|i| ((i as f32 * 0.3).sin() * 12000.0) as i16)
            .collect();
        AudioFrame::mono(16000, samples)
    }

    fn silence_frame(ms: usize) -> AudioFrame {
        AudioFrame::mono(16000, vec![0; 16 * ms])
    }

    #[test]
    fn test_silence_stays_idle() {
        let mut gate = gate();
        let events = gate.push(&silence_frame(1200)).unwrap();
        assert!(events.is_empty());
        assert!(!gate.is_talking());
    }

    #[test]
    fn test_start_continue_pause_cycle() {
        let mut gate = gate();

        // one full chunk of speech opens the utterance
        let events = gate.push(&speech_frame(600)).unwrap();
        assert_eq!(events, vec![GateEvent::StartedTalking]);
        assert!(gate.is_talking());

        // more speech continues it
        let events = gate.push(&speech_frame(600)).unwrap();
        assert_eq!(events, vec![GateEvent::Continuing]);

        // a silent chunk closes it and hands back the aggregate
        let events = gate.push(&silence_frame(600)).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            GateEvent::Paused { utterance } => {
                assert_eq!(utterance.sample_rate, 16000);
                // two speech chunks plus the closing silent chunk
                assert_eq!(utterance.samples.len(), 3 * 9600);
            }
            other => panic!("expected pause, got {:?}", other),
        }
        assert!(!gate.is_talking());
    }

    #[test]
    fn test_multiple_events_from_one_push() {
        let mut gate = gate();
        let mut frame = speech_frame(600);
        frame.extend(&silence_frame(600)).unwrap();
        let events = gate.push(&frame).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], GateEvent::StartedTalking);
        assert!(matches!(events[1], GateEvent::Paused { .. }));
    }

    #[test]
    fn test_reset_discards_open_utterance() {
        let mut gate = gate();
        gate.push(&speech_frame(600)).unwrap();
        assert!(gate.is_talking());
        gate.reset();
        assert!(!gate.is_talking());
        let events = gate.push(&silence_frame(600)).unwrap();
        assert!(events.is_empty());
    }
}
