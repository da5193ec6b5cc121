//! Speech-span aggregation
//!
//! Turns per-window probabilities into speech spans with hysteresis:
//! a span opens when a window reaches `threshold` and only closes after
//! `min_silence_duration_ms` of windows below the negative threshold.
//! Short spans are discarded, accepted spans padded on both sides.

use crate::scorer::SpeechScorer;
use crate::{Result, VadOptions, VAD_SAMPLE_RATE};

/// A detected speech span in samples at the VAD rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSpan {
    pub start: usize,
    pub end: usize,
}

impl SpeechSpan {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Detect speech spans in 16 kHz mono audio
pub fn speech_spans(
    scorer: &dyn SpeechScorer,
    audio: &[f32],
    options: &VadOptions,
) -> Result<Vec<SpeechSpan>> {
    let window = options.window_size_samples;
    let probs = scorer.score_windows(audio, window)?;

    let rate = VAD_SAMPLE_RATE as usize;
    let min_speech_samples = rate * options.min_speech_duration_ms as usize / 1000;
    let min_silence_samples = rate * options.min_silence_duration_ms as usize / 1000;
    let pad_samples = rate * options.speech_pad_ms as usize / 1000;
    let neg_threshold = options.neg_threshold();

    let mut spans: Vec<SpeechSpan> = Vec::new();
    let mut triggered = false;
    let mut span_start = 0usize;
    // candidate end position while tolerating short silence
    let mut temp_end = 0usize;

    for (i, &prob) in probs.iter().enumerate() {
        let pos = i * window;

        if prob >= options.threshold {
            if temp_end != 0 {
                temp_end = 0;
            }
            if !triggered {
                triggered = true;
                span_start = pos;
            }
            continue;
        }

        if triggered && prob < neg_threshold {
            if temp_end == 0 {
                temp_end = pos;
            }
            if pos - temp_end >= min_silence_samples {
                if temp_end - span_start > min_speech_samples {
                    spans.push(SpeechSpan {
                        start: span_start,
                        end: temp_end,
                    });
                }
                triggered = false;
                temp_end = 0;
            }
        }
    }

    // stream ended mid-speech
    if triggered && audio.len().saturating_sub(span_start) > min_speech_samples {
        spans.push(SpeechSpan {
            start: span_start,
            end: audio.len(),
        });
    }

    pad_spans(&mut spans, pad_samples, audio.len());
    Ok(spans)
}

/// Total detected speech duration in seconds
pub fn speech_duration(
    scorer: &dyn SpeechScorer,
    audio: &[f32],
    options: &VadOptions,
) -> Result<f32> {
    let spans = speech_spans(scorer, audio, options)?;
    let samples: usize = spans.iter().map(|s| s.len()).sum();
    Ok(samples as f32 / VAD_SAMPLE_RATE as f32)
}

/// Pad each span, splitting the gap when neighbors would overlap
fn pad_spans(spans: &mut [SpeechSpan], pad: usize, total_len: usize) {
    let count = spans.len();
    for i in 0..count {
        if i == 0 {
            spans[i].start = spans[i].start.saturating_sub(pad);
        }
        if i + 1 < count {
            let gap = spans[i + 1].start.saturating_sub(spans[i].end);
            if gap < 2 * pad {
                spans[i].end += gap / 2;
                spans[i + 1].start = spans[i + 1].start.saturating_sub(gap - gap / 2);
            } else {
                spans[i].end = (spans[i].end + pad).min(total_len);
                spans[i + 1].start = spans[i + 1].start.saturating_sub(pad);
            }
        } else {
            spans[i].end = (spans[i].end + pad).min(total_len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::EnergyScorer;

    fn options() -> VadOptions {
        VadOptions {
            min_silence_duration_ms: 200,
            min_speech_duration_ms: 100,
            speech_pad_ms: 0,
            window_size_samples: 1600, // 100ms windows
            ..VadOptions::default()
        }
    }

    fn speech(ms: usize) -> Vec<f32> {
        (0..16 * ms).map(|i| (i as f32 * 0.3).sin() * 0.5).collect()
    }

    fn silence(ms: usize) -> Vec<f32> {
        vec![0.0; 16 * ms]
    }

    #[test]
    fn test_single_span() {
        let mut audio = silence(300);
        audio.extend(speech(500));
        audio.extend(silence(400));

        let spans = speech_spans(&EnergyScorer::default(), &audio, &options()).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 4800); // 300ms in
        assert_eq!(spans[0].end, 12800); // speech ends at 800ms
    }

    #[test]
    fn test_short_blip_discarded() {
        let mut audio = silence(300);
        // single 100ms window of speech, below the 100ms minimum (exclusive)
        audio.extend(speech(100));
        audio.extend(silence(500));

        let spans = speech_spans(&EnergyScorer::default(), &audio, &options()).unwrap();
        assert!(spans.is_empty());
    }

    #[test]
    fn test_brief_silence_tolerated() {
        let mut audio = speech(300);
        audio.extend(silence(100)); // below min_silence of 200ms
        audio.extend(speech(300));
        audio.extend(silence(400));

        let spans = speech_spans(&EnergyScorer::default(), &audio, &options()).unwrap();
        assert_eq!(spans.len(), 1);
    }

    #[test]
    fn test_duration_sums_spans() {
        let mut audio = silence(200);
        audio.extend(speech(600));
        audio.extend(silence(400));

        let duration = speech_duration(&EnergyScorer::default(), &audio, &options()).unwrap();
        assert!((duration - 0.6).abs() < 0.11, "duration {}", duration);
    }
}
