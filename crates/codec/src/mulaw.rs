//! G.711 mu-law transcoding
//!
//! The telephone bridge carries 8 kHz mu-law both ways. Encoding follows
//! the standard G.711 segment companding with the 0x84 bias.

const BIAS: i16 = 0x84;
const CLIP: i16 = 32635;

/// Encode one linear PCM sample to mu-law
pub fn mulaw_encode_sample(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0 };
    let mut magnitude = if sample < 0 {
        (sample as i32).unsigned_abs().min(CLIP as u32) as i16
    } else {
        sample.min(CLIP)
    };
    magnitude += BIAS;

    // segment 0 covers biased magnitudes up to 255
    let mut segment: u8 = 0;
    let mut probe = magnitude >> 8;
    while probe != 0 && segment < 7 {
        segment += 1;
        probe >>= 1;
    }

    let mantissa = ((magnitude >> (segment + 3)) & 0x0F) as u8;
    !(sign | (segment << 4) | mantissa)
}

/// Decode one mu-law byte to linear PCM
pub fn mulaw_decode_sample(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let segment = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;

    let mut magnitude = (((mantissa as i16) << 3) + BIAS) << segment;
    magnitude -= BIAS;

    if sign != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Encode a PCM buffer to mu-law bytes
pub fn mulaw_encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| mulaw_encode_sample(s)).collect()
}

/// Decode a mu-law buffer to PCM samples
pub fn mulaw_decode(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| mulaw_decode_sample(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence() {
        let encoded = mulaw_encode_sample(0);
        let decoded = mulaw_decode_sample(encoded);
        assert_eq!(decoded, 0);
    }

    #[test]
    fn test_roundtrip_error_is_bounded() {
        // mu-law is logarithmic: quantization error grows with magnitude
        // but stays within the segment's step size.
        for &sample in &[0i16, 100, -100, 1000, -1000, 8000, -8000, 30000, -30000] {
            let decoded = mulaw_decode_sample(mulaw_encode_sample(sample));
            let err = (decoded as i32 - sample as i32).abs();
            let bound = (sample as i32).abs() / 16 + 64;
            assert!(err <= bound, "sample {} decoded to {} (err {})", sample, decoded, err);
        }
    }

    #[test]
    fn test_sign_preserved() {
        assert!(mulaw_decode_sample(mulaw_encode_sample(5000)) > 0);
        assert!(mulaw_decode_sample(mulaw_encode_sample(-5000)) < 0);
    }

    #[test]
    fn test_buffer_helpers() {
        let samples: Vec<i16> = (-50..50).map(|i| i * 300).collect();
        let decoded = mulaw_decode(&mulaw_encode(&samples));
        assert_eq!(decoded.len(), samples.len());
        for (&original, &restored) in samples.iter().zip(decoded.iter()) {
            let err = (restored as i32 - original as i32).abs();
            let bound = (original as i32).abs() / 16 + 64;
            assert!(
                err <= bound,
                "sample {} decoded to {} (err {})",
                original,
                restored,
                err
            );
        }
    }

    #[test]
    fn test_known_codewords() {
        // standard G.711: linear 0 encodes to 0xFF, the canonical silence byte
        assert_eq!(mulaw_encode_sample(0), 0xFF);
        assert_eq!(mulaw_decode_sample(0xFF), 0);
    }
}
