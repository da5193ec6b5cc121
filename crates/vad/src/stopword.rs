//! Stopword detection
//!
//! Accumulates recent speech in a bounded 16 kHz window, transcribes it
//! with a lightweight STT model, and matches the normalized text against
//! the configured stopword list. Entries are single tokens or
//! space-separated pairs; a pair matches when both tokens occur inside the
//! window, which is capped at `window_secs` so the pair is always within
//! that span.

use std::sync::Arc;

use crate::{Result, VAD_SAMPLE_RATE};

/// Lightweight speech-to-text seam used for stopword spotting
pub trait SpeechToText: Send + Sync {
    /// Transcribe mono audio at the given rate to plain text
    fn transcribe(&self, sample_rate: u32, audio: &[f32]) -> Result<String>;
}

/// Default window the detector listens over
pub const DEFAULT_WINDOW_SECS: f32 = 2.0;

/// Rolling stopword spotter over the most recent speech
pub struct StopwordDetector {
    stt: Arc<dyn SpeechToText>,
    stop_words: Vec<String>,
    window: Vec<f32>,
    window_samples: usize,
}

impl StopwordDetector {
    pub fn new(stt: Arc<dyn SpeechToText>, stop_words: Vec<String>, window_secs: f32) -> Self {
        let window_samples = (VAD_SAMPLE_RATE as f32 * window_secs.max(0.5)) as usize;
        Self {
            stt,
            stop_words,
            window: Vec::new(),
            window_samples,
        }
    }

    /// Append 16 kHz audio and check the window; returns the matched
    /// configured entry, if any.
    pub fn push(&mut self, audio_16k: &[f32]) -> Result<Option<String>> {
        self.window.extend_from_slice(audio_16k);
        if self.window.len() > self.window_samples {
            let excess = self.window.len() - self.window_samples;
            self.window.drain(..excess);
        }

        let text = self.stt.transcribe(VAD_SAMPLE_RATE, &self.window)?;
        tracing::debug!("stopword stt: {:?}", text);
        Ok(self.match_text(&text))
    }

    /// Match normalized text against the configured entries
    fn match_text(&self, text: &str) -> Option<String> {
        let tokens = normalize(text);
        for entry in &self.stop_words {
            let wanted = normalize(entry);
            if wanted.is_empty() {
                continue;
            }
            if wanted.iter().all(|w| tokens.contains(w)) {
                return Some(entry.clone());
            }
        }
        None
    }

    /// Drop the accumulated window
    pub fn reset(&mut self) {
        self.window.clear();
    }
}

/// Lowercase, strip punctuation, split into tokens
fn normalize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedStt(String);

    impl SpeechToText for FixedStt {
        fn transcribe(&self, _sample_rate: u32, _audio: &[f32]) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn detector(transcript: &str, words: &[&str]) -> StopwordDetector {
        StopwordDetector::new(
            Arc::new(FixedStt(transcript.to_string())),
            words.iter().map(|w| w.to_string()).collect(),
            DEFAULT_WINDOW_SECS,
        )
    }

    #[test]
    fn test_single_token_match() {
        let mut detector = detector("hey Computer, wake up!", &["computer"]);
        let matched = detector.push(&[0.0; 160]).unwrap();
        assert_eq!(matched, Some("computer".to_string()));
    }

    #[test]
    fn test_no_match() {
        let mut detector = detector("just chatting along", &["computer"]);
        assert_eq!(detector.push(&[0.0; 160]).unwrap(), None);
    }

    #[test]
    fn test_pair_requires_both_tokens() {
        let mut detector1 = detector("okay the computer is here", &["ok computer"]);
        assert_eq!(detector1.push(&[0.0; 160]).unwrap(), None);

        let mut detector2 = detector("ok, computer is here", &["ok computer"]);
        assert_eq!(
            detector2.push(&[0.0; 160]).unwrap(),
            Some("ok computer".to_string())
        );
    }

    #[test]
    fn test_punctuation_stripped() {
        let mut detector = detector("COMPUTER!!!", &["computer"]);
        assert!(detector.push(&[0.0; 160]).unwrap().is_some());
    }

    #[test]
    fn test_window_is_bounded() {
        let mut detector = detector("words", &["computer"]);
        for _ in 0..100 {
            detector.push(&[0.0; 16000]).unwrap();
        }
        assert!(detector.window.len() <= detector.window_samples);
    }
}
