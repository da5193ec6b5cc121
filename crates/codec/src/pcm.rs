//! PCM byte-stream helpers

/// Aggregates a byte stream into complete 16-bit little-endian samples,
/// carrying odd leftover bytes to the next chunk.
#[derive(Debug, Default)]
pub struct ByteAggregator {
    leftover: Vec<u8>,
}

impl ByteAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push raw bytes; returns every complete sample decoded so far
    pub fn push(&mut self, chunk: &[u8]) -> Vec<i16> {
        let mut current = std::mem::take(&mut self.leftover);
        current.extend_from_slice(chunk);

        let complete = current.len() / 2 * 2;
        self.leftover = current.split_off(complete);

        current
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    /// Bytes still waiting for their other half
    pub fn pending(&self) -> usize {
        self.leftover.len()
    }
}

/// Serialize samples to little-endian bytes
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}
