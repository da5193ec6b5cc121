//! Sample-rate conversion
//!
//! Built on Rubato's FFT resampler. `StreamResampler` carries filter state
//! across frames so a live stream converts without clicks; arbitrary input
//! sizes are buffered through fixed internal chunks. `resample_buffer` is
//! the one-shot variant for whole utterances.

use rubato::{FftFixedIn, Resampler as RubatoResampler};

use crate::{CodecError, Result};

/// Internal processing chunk in input frames
const CHUNK_SIZE: usize = 1024;

/// Streaming mono resampler with persistent state
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    inner: Option<FftFixedIn<f32>>,
    /// Input samples waiting for a full chunk
    fifo: Vec<f32>,
    /// Leading output samples still to be discarded (filter delay)
    delay_remaining: usize,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let (inner, delay) = if from_rate == to_rate {
            (None, 0)
        } else {
            let resampler =
                FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 2, 1)
                    .map_err(|e| CodecError::Resample(e.to_string()))?;
            let delay = resampler.output_delay();
            (Some(resampler), delay)
        };
        Ok(Self {
            from_rate,
            to_rate,
            inner,
            fifo: Vec::new(),
            delay_remaining: delay,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Feed input samples; returns whatever output is ready
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(input.to_vec());
        };

        self.fifo.extend_from_slice(input);
        let mut output = Vec::new();
        while self.fifo.len() >= CHUNK_SIZE {
            let chunk: Vec<f32> = self.fifo.drain(..CHUNK_SIZE).collect();
            let frames = inner
                .process(&[chunk], None)
                .map_err(|e| CodecError::Resample(e.to_string()))?;
            output.extend_from_slice(&frames[0]);
        }

        Ok(self.trim_delay(output))
    }

    /// Drain buffered input, zero-padding the final chunk. One extra
    /// silent chunk pushes the filter-delayed tail out.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        if self.inner.is_none() {
            return Ok(std::mem::take(&mut self.fifo));
        }
        let mut tail = std::mem::take(&mut self.fifo);
        tail.resize(CHUNK_SIZE, 0.0);
        let mut output = self.process(&tail)?;
        output.extend(self.process(&vec![0.0; CHUNK_SIZE])?);
        Ok(output)
    }

    fn trim_delay(&mut self, mut output: Vec<f32>) -> Vec<f32> {
        if self.delay_remaining == 0 {
            return output;
        }
        let drop = self.delay_remaining.min(output.len());
        self.delay_remaining -= drop;
        output.drain(..drop);
        output
    }
}

/// One-shot resample of a whole buffer.
///
/// Short inputs fall back to linear interpolation, the rest goes through
/// the FFT resampler with the filter delay trimmed so the output lines up
/// with the input.
pub fn resample_buffer(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }
    if input.len() < CHUNK_SIZE {
        return resample_linear(input, from_rate, to_rate);
    }

    let expected = (input.len() as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize;
    let mut resampler = match StreamResampler::new(from_rate, to_rate) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("resampler init failed, using linear fallback: {}", e);
            return resample_linear(input, from_rate, to_rate);
        }
    };

    let mut output = match resampler.process(input) {
        Ok(out) => out,
        Err(e) => {
            tracing::warn!("resampling failed, using linear fallback: {}", e);
            return resample_linear(input, from_rate, to_rate);
        }
    };
    if let Ok(tail) = resampler.flush() {
        output.extend(tail);
    }
    output.truncate(expected);
    output
}

/// Linear interpolation fallback for inputs too short for the FFT path
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (input.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f64 / ratio;
        let idx_floor = src_idx.floor() as usize;
        let idx_ceil = (idx_floor + 1).min(input.len().saturating_sub(1));
        let frac = (src_idx - idx_floor as f64) as f32;

        let sample = input[idx_floor] * (1.0 - frac) + input[idx_ceil] * frac;
        output.push(sample);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(rate: u32, freq: f32, secs: f32) -> Vec<f32> {
        let n = (rate as f32 * secs) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_passthrough_when_rates_match() {
        let mut resampler = StreamResampler::new(16000, 16000).unwrap();
        let input = sine(16000, 440.0, 0.01);
        assert_eq!(resampler.process(&input).unwrap(), input);
    }

    #[test]
    fn test_one_shot_length() {
        let input = sine(16000, 440.0, 0.1);
        let output = resample_buffer(&input, 16000, 48000);
        assert_eq!(output.len(), input.len() * 3);
    }

    #[test]
    fn test_roundtrip_preserves_rms_within_one_percent() {
        let input = sine(16000, 440.0, 1.0);
        let up = resample_buffer(&input, 16000, 48000);
        let down = resample_buffer(&up, 48000, 16000);

        let input_rms = rms(&input);
        let output_rms = rms(&down);
        let deviation = (output_rms - input_rms).abs() / input_rms;
        assert!(deviation < 0.01, "RMS deviated by {:.3}%", deviation * 100.0);
    }

    #[test]
    fn test_streaming_matches_duration() {
        let mut resampler = StreamResampler::new(48000, 24000).unwrap();
        let mut total = 0usize;
        // 50 frames of 20ms at 48kHz
        for _ in 0..50 {
            let out = resampler.process(&sine(48000, 200.0, 0.02)).unwrap();
            total += out.len();
        }
        total += resampler.flush().unwrap().len();
        let expected = 24000; // one second at the target rate
        let diff = (total as i64 - expected as i64).unsigned_abs() as usize;
        assert!(diff <= 2 * 1024, "got {} samples, expected ~{}", total, expected);
    }

    #[test]
    fn test_short_input_linear_fallback() {
        let input = sine(16000, 440.0, 0.005); // 80 samples, below one chunk
        let output = resample_buffer(&input, 16000, 8000);
        assert_eq!(output.len(), 40);
    }
}
