//! Opus encode/decode for the WebRTC media path
//!
//! Thin wrappers over audiopus working in 20 ms frames of interleaved
//! 16-bit PCM. Coders keep internal state behind a mutex so the pumps can
//! share them behind an `Arc`.

use audiopus::{
    coder::{Decoder, Encoder},
    packet::Packet,
    Application, Channels as OpusChannels, MutSignals, SampleRate as OpusSampleRate,
};
use parking_lot::Mutex;

use crate::{CodecError, Result};

fn opus_sample_rate(rate: u32) -> Result<OpusSampleRate> {
    match rate {
        8000 => Ok(OpusSampleRate::Hz8000),
        12000 => Ok(OpusSampleRate::Hz12000),
        16000 => Ok(OpusSampleRate::Hz16000),
        24000 => Ok(OpusSampleRate::Hz24000),
        48000 => Ok(OpusSampleRate::Hz48000),
        _ => Err(CodecError::Unsupported(format!(
            "sample rate {} is not an Opus rate (8000/12000/16000/24000/48000)",
            rate
        ))),
    }
}

fn opus_channels(channels: u8) -> Result<OpusChannels> {
    match channels {
        1 => Ok(OpusChannels::Mono),
        2 => Ok(OpusChannels::Stereo),
        _ => Err(CodecError::Unsupported(format!(
            "channel count {} (use 1 or 2)",
            channels
        ))),
    }
}

/// Opus encoder for one outbound track
pub struct OpusEncoder {
    encoder: Mutex<Encoder>,
    sample_rate: u32,
    channels: u8,
    frame_size: usize,
}

impl OpusEncoder {
    pub fn new(sample_rate: u32, channels: u8) -> Result<Self> {
        let encoder = Encoder::new(
            opus_sample_rate(sample_rate)?,
            opus_channels(channels)?,
            Application::Voip,
        )
        .map_err(|e| CodecError::Opus(format!("failed to create encoder: {}", e)))?;

        // 20ms of audio per frame
        let frame_size = (sample_rate as usize * 20) / 1000;

        Ok(Self {
            encoder: Mutex::new(encoder),
            sample_rate,
            channels,
            frame_size,
        })
    }

    /// Encode one 20 ms frame of interleaved PCM
    pub fn encode(&self, pcm: &[i16]) -> Result<Vec<u8>> {
        if pcm.len() != self.frame_size * self.channels as usize {
            return Err(CodecError::InvalidFrame(format!(
                "expected {} samples per opus frame, got {}",
                self.frame_size * self.channels as usize,
                pcm.len()
            )));
        }
        let mut output = vec![0u8; 4000];
        let encoder = self.encoder.lock();
        let encoded_len = encoder
            .encode(pcm, &mut output)
            .map_err(|e| CodecError::Opus(format!("encode error: {}", e)))?;
        output.truncate(encoded_len);
        Ok(output)
    }

    /// Samples per channel in one frame
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }
}

/// Opus decoder for one inbound track
pub struct OpusDecoder {
    decoder: Mutex<Decoder>,
    sample_rate: u32,
    channels: u8,
    frame_size: usize,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32, channels: u8) -> Result<Self> {
        let decoder = Decoder::new(opus_sample_rate(sample_rate)?, opus_channels(channels)?)
            .map_err(|e| CodecError::Opus(format!("failed to create decoder: {}", e)))?;

        let frame_size = (sample_rate as usize * 20) / 1000;

        Ok(Self {
            decoder: Mutex::new(decoder),
            sample_rate,
            channels,
            frame_size,
        })
    }

    /// Decode one packet to interleaved PCM
    pub fn decode(&self, data: &[u8]) -> Result<Vec<i16>> {
        // up to 120ms per packet
        let max_samples = self.frame_size * self.channels as usize * 6;
        let mut output = vec![0i16; max_samples];

        let packet = Packet::try_from(data)
            .map_err(|e| CodecError::Opus(format!("invalid packet: {}", e)))?;

        let mut decoder = self.decoder.lock();
        let signals = MutSignals::try_from(&mut output[..])
            .map_err(|e| CodecError::Opus(format!("signal buffer: {}", e)))?;
        let decoded = decoder
            .decode(Some(packet), signals, false)
            .map_err(|e| CodecError::Opus(format!("decode error: {}", e)))?;

        output.truncate(decoded * self.channels as usize);
        Ok(output)
    }

    /// Generate concealment audio for a lost packet
    pub fn decode_plc(&self) -> Result<Vec<i16>> {
        let max_samples = self.frame_size * self.channels as usize;
        let mut output = vec![0i16; max_samples];

        let mut decoder = self.decoder.lock();
        let signals = MutSignals::try_from(&mut output[..])
            .map_err(|e| CodecError::Opus(format!("signal buffer: {}", e)))?;
        let decoded = decoder
            .decode(None::<Packet>, signals, false)
            .map_err(|e| CodecError::Opus(format!("plc error: {}", e)))?;

        output.truncate(decoded * self.channels as usize);
        Ok(output)
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_frame_size() {
        let encoder = OpusEncoder::new(48000, 1).unwrap();
        assert_eq!(encoder.frame_size(), 960);
        let encoder = OpusEncoder::new(16000, 1).unwrap();
        assert_eq!(encoder.frame_size(), 320);
    }

    #[test]
    fn test_unsupported_rate_rejected() {
        assert!(OpusEncoder::new(44100, 1).is_err());
        assert!(OpusDecoder::new(22050, 1).is_err());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let encoder = OpusEncoder::new(16000, 1).unwrap();
        let decoder = OpusDecoder::new(16000, 1).unwrap();

        let frame_size = encoder.frame_size();
        let pcm: Vec<i16> = (0..frame_size)
            .map(|i| ((i as f32 * 0.1).sin() * 12000.0) as i16)
            .collect();

        let encoded = encoder.encode(&pcm).unwrap();
        assert!(!encoded.is_empty());

        let decoded = decoder.decode(&encoded).unwrap();
        assert_eq!(decoded.len(), frame_size);
    }

    #[test]
    fn test_wrong_frame_size_rejected() {
        let encoder = OpusEncoder::new(16000, 1).unwrap();
        assert!(encoder.encode(&[0i16; 100]).is_err());
    }
}
