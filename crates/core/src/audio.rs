//! Audio frame type
//!
//! Frames carry interleaved 16-bit PCM plus `{sample_rate, channels}`
//! metadata. Conversion to and from `f32` planes is provided for the
//! resampler and the VAD, which operate on contiguous float buffers.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Channel layout of an audio frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channels {
    Mono,
    Stereo,
}

impl Channels {
    /// Number of interleaved channels
    pub fn count(&self) -> usize {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

impl std::fmt::Display for Channels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channels::Mono => write!(f, "mono"),
            Channels::Stereo => write!(f, "stereo"),
        }
    }
}

/// A chunk of interleaved 16-bit PCM audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel layout
    pub channels: Channels,
    /// Interleaved samples; length is a multiple of `channels.count()`
    pub samples: Vec<i16>,
}

impl AudioFrame {
    /// Create a frame, validating that the sample count matches the layout
    pub fn new(sample_rate: u32, channels: Channels, samples: Vec<i16>) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::InvalidFrame("sample rate must be non-zero".into()));
        }
        if samples.len() % channels.count() != 0 {
            return Err(Error::InvalidFrame(format!(
                "sample count {} is not a multiple of {} channels",
                samples.len(),
                channels.count()
            )));
        }
        Ok(Self {
            sample_rate,
            channels,
            samples,
        })
    }

    /// Create a mono frame without layout validation
    pub fn mono(sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            channels: Channels::Mono,
            samples,
        }
    }

    /// Samples per channel
    pub fn len_per_channel(&self) -> usize {
        self.samples.len() / self.channels.count()
    }

    /// Duration of this frame in seconds
    pub fn duration_secs(&self) -> f32 {
        self.len_per_channel() as f32 / self.sample_rate as f32
    }

    /// Interleaved samples as `f32` in [-1.0, 1.0]
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| s as f32 / 32768.0).collect()
    }

    /// Downmixed mono `f32` samples (stereo averaged, mono passed through)
    pub fn to_mono_f32(&self) -> Vec<f32> {
        match self.channels {
            Channels::Mono => self.to_f32(),
            Channels::Stereo => self
                .samples
                .chunks_exact(2)
                .map(|pair| (pair[0] as f32 + pair[1] as f32) / 2.0 / 32768.0)
                .collect(),
        }
    }

    /// Build a frame from `f32` samples in [-1.0, 1.0]
    pub fn from_f32(sample_rate: u32, channels: Channels, samples: &[f32]) -> Self {
        let pcm = samples
            .iter()
            .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
            .collect();
        Self {
            sample_rate,
            channels,
            samples: pcm,
        }
    }

    /// Append another frame's samples; rates and layouts must match
    pub fn extend(&mut self, other: &AudioFrame) -> Result<()> {
        if other.sample_rate != self.sample_rate || other.channels != self.channels {
            return Err(Error::InvalidFrame(format!(
                "cannot append {}Hz/{} frame to {}Hz/{} stream",
                other.sample_rate, other.channels, self.sample_rate, self.channels
            )));
        }
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_validation() {
        assert!(AudioFrame::new(16000, Channels::Mono, vec![0; 160]).is_ok());
        assert!(AudioFrame::new(16000, Channels::Stereo, vec![0; 161]).is_err());
        assert!(AudioFrame::new(0, Channels::Mono, vec![0; 160]).is_err());
    }

    #[test]
    fn test_duration() {
        let frame = AudioFrame::mono(16000, vec![0; 320]);
        assert!((frame.duration_secs() - 0.02).abs() < 1e-6);

        let stereo = AudioFrame::new(48000, Channels::Stereo, vec![0; 960]).unwrap();
        assert_eq!(stereo.len_per_channel(), 480);
        assert!((stereo.duration_secs() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_downmix_averages() {
        let frame = AudioFrame::new(16000, Channels::Stereo, vec![1000, 3000, -2000, 0]).unwrap();
        let mono = frame.to_mono_f32();
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 2000.0 / 32768.0).abs() < 1e-6);
        assert!((mono[1] + 1000.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_f32_roundtrip() {
        let frame = AudioFrame::mono(24000, vec![0, 16384, -16384, 32767]);
        let restored = AudioFrame::from_f32(24000, Channels::Mono, &frame.to_f32());
        for (a, b) in frame.samples.iter().zip(restored.samples.iter()) {
            assert!((a - b).abs() <= 1);
        }
    }
}
