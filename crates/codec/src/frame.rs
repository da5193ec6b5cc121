//! Per-session codec state for each media direction
//!
//! `InboundCodec` normalizes peer audio to the handler's declared input
//! format; `OutboundCodec` normalizes handler output to fixed frames at
//! the peer-facing rate. Both keep resampler state across frames and
//! re-initialize it when the source rate changes mid-stream (a rare
//! renegotiation), reporting the change so the session can emit a warning.

use voicebridge_core::{AudioFrame, Channels};

use crate::resampler::StreamResampler;
use crate::reframer::Reframer;
use crate::Result;

/// Result of pushing one inbound frame
#[derive(Debug, Default)]
pub struct InboundOutcome {
    /// Normalized audio ready for the handler, if a chunk completed
    pub frame: Option<AudioFrame>,
    /// The source sample rate changed and codec state was re-initialized
    pub rate_changed: bool,
}

/// Normalizes inbound peer audio to the handler's input format.
///
/// Stereo sources are downmixed by averaging before resampling; mono is
/// duplicated afterwards when the handler declares stereo. A true
/// stereo-to-stereo pass without rate change skips the mono path entirely.
pub struct InboundCodec {
    target_rate: u32,
    target_layout: Channels,
    source_rate: Option<u32>,
    resampler: Option<StreamResampler>,
}

impl InboundCodec {
    pub fn new(target_rate: u32, target_layout: Channels) -> Self {
        Self {
            target_rate,
            target_layout,
            source_rate: None,
            resampler: None,
        }
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Push one peer frame
    pub fn push(&mut self, frame: &AudioFrame) -> Result<InboundOutcome> {
        let mut rate_changed = false;
        match self.source_rate {
            Some(rate) if rate != frame.sample_rate => {
                self.resampler = None;
                self.source_rate = Some(frame.sample_rate);
                rate_changed = true;
            }
            None => self.source_rate = Some(frame.sample_rate),
            _ => {}
        }

        if frame.sample_rate == self.target_rate && frame.channels == self.target_layout {
            return Ok(InboundOutcome {
                frame: Some(frame.clone()),
                rate_changed,
            });
        }

        let mono = frame.to_mono_f32();
        let resampled = if frame.sample_rate == self.target_rate {
            mono
        } else {
            if self.resampler.is_none() {
                self.resampler = Some(StreamResampler::new(frame.sample_rate, self.target_rate)?);
            }
            match self.resampler.as_mut() {
                Some(resampler) => resampler.process(&mono)?,
                None => mono,
            }
        };

        if resampled.is_empty() {
            return Ok(InboundOutcome {
                frame: None,
                rate_changed,
            });
        }

        Ok(InboundOutcome {
            frame: Some(to_layout(self.target_rate, self.target_layout, &resampled)),
            rate_changed,
        })
    }
}

/// Normalizes handler output into fixed frames at the peer-facing format.
pub struct OutboundCodec {
    target_rate: u32,
    target_layout: Channels,
    source_rate: Option<u32>,
    resampler: Option<StreamResampler>,
    reframer: Reframer,
}

impl OutboundCodec {
    pub fn new(target_rate: u32, target_layout: Channels, frame_samples: usize) -> Self {
        Self {
            target_rate,
            target_layout,
            source_rate: None,
            resampler: None,
            reframer: Reframer::new(frame_samples),
        }
    }

    /// Push one handler yield; each yield may carry its own sample rate
    pub fn push(&mut self, frame: &AudioFrame) -> Result<Vec<AudioFrame>> {
        if self.source_rate != Some(frame.sample_rate) {
            self.source_rate = Some(frame.sample_rate);
            self.resampler = if frame.sample_rate == self.target_rate {
                None
            } else {
                Some(StreamResampler::new(frame.sample_rate, self.target_rate)?)
            };
        }

        let mono = frame.to_mono_f32();
        let resampled = match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&mono)?,
            None => mono,
        };

        let pcm: Vec<i16> = resampled
            .iter()
            .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
            .collect();

        Ok(self
            .reframer
            .push(&pcm)
            .into_iter()
            .map(|samples| self.emit(samples))
            .collect())
    }

    /// Drain resampler and re-framer state, zero-padding the final frame
    pub fn flush(&mut self) -> Result<Vec<AudioFrame>> {
        let mut frames = Vec::new();
        if let Some(resampler) = self.resampler.as_mut() {
            let tail = resampler.flush()?;
            let pcm: Vec<i16> = tail
                .iter()
                .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
                .collect();
            frames.extend(
                self.reframer
                    .push(&pcm)
                    .into_iter()
                    .map(|samples| self.emit(samples)),
            );
        }
        if let Some(samples) = self.reframer.flush() {
            frames.push(self.emit(samples));
        }
        Ok(frames)
    }

    /// Pad the carried tail to a frame boundary with silence and drop the
    /// rest of the pipeline state (barge-in path).
    pub fn cut(&mut self) -> Option<AudioFrame> {
        self.resampler = None;
        self.source_rate = None;
        self.reframer.flush().map(|samples| self.emit(samples))
    }

    fn emit(&self, mono: Vec<i16>) -> AudioFrame {
        match self.target_layout {
            Channels::Mono => AudioFrame::mono(self.target_rate, mono),
            Channels::Stereo => {
                let mut interleaved = Vec::with_capacity(mono.len() * 2);
                for sample in mono {
                    interleaved.push(sample);
                    interleaved.push(sample);
                }
                AudioFrame {
                    sample_rate: self.target_rate,
                    channels: Channels::Stereo,
                    samples: interleaved,
                }
            }
        }
    }
}

fn to_layout(rate: u32, layout: Channels, mono: &[f32]) -> AudioFrame {
    match layout {
        Channels::Mono => AudioFrame::from_f32(rate, Channels::Mono, mono),
        Channels::Stereo => {
            let mut interleaved = Vec::with_capacity(mono.len() * 2);
            for &sample in mono {
                interleaved.push(sample);
                interleaved.push(sample);
            }
            AudioFrame::from_f32(rate, Channels::Stereo, &interleaved)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_passthrough() {
        let mut codec = InboundCodec::new(48000, Channels::Mono);
        let frame = AudioFrame::mono(48000, vec![5; 960]);
        let outcome = codec.push(&frame).unwrap();
        assert_eq!(outcome.frame, Some(frame));
        assert!(!outcome.rate_changed);
    }

    #[test]
    fn test_inbound_rate_change_flagged() {
        let mut codec = InboundCodec::new(16000, Channels::Mono);
        codec.push(&AudioFrame::mono(48000, vec![0; 960])).unwrap();
        let outcome = codec.push(&AudioFrame::mono(24000, vec![0; 480])).unwrap();
        assert!(outcome.rate_changed);
    }

    #[test]
    fn test_inbound_stereo_downmix() {
        let mut codec = InboundCodec::new(16000, Channels::Mono);
        let frame = AudioFrame::new(16000, Channels::Stereo, vec![100, 300, -200, 0]).unwrap();
        let outcome = codec.push(&frame).unwrap();
        let out = outcome.frame.unwrap();
        assert_eq!(out.channels, Channels::Mono);
        assert_eq!(out.samples.len(), 2);
        assert!((out.samples[0] - 200).abs() <= 1);
    }

    #[test]
    fn test_outbound_fixed_frames() {
        let mut codec = OutboundCodec::new(24000, Channels::Mono, 480);
        let frames = codec
            .push(&AudioFrame::mono(24000, vec![7; 1000]))
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.samples.len() == 480));

        let tail = codec.flush().unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].samples.len(), 480);
        // 40 real samples, the rest zero padding
        assert_eq!(&tail[0].samples[..40], &[7i16; 40][..]);
        assert!(tail[0].samples[40..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_outbound_cut_pads_to_boundary() {
        let mut codec = OutboundCodec::new(24000, Channels::Mono, 480);
        codec.push(&AudioFrame::mono(24000, vec![3; 100])).unwrap();
        let frame = codec.cut().unwrap();
        assert_eq!(frame.samples.len(), 480);
        assert!(codec.cut().is_none());
    }

    #[test]
    fn test_outbound_stereo_upmix() {
        let mut codec = OutboundCodec::new(16000, Channels::Stereo, 4);
        let frames = codec.push(&AudioFrame::mono(16000, vec![1, 2, 3, 4])).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, vec![1, 1, 2, 2, 3, 3, 4, 4]);
    }
}
