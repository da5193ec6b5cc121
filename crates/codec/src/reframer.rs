//! Outbound re-framing
//!
//! Aggregates handler output into fixed frames of `frame_samples`
//! interleaved samples. Partial tails carry over to the next push; at
//! stream end (or barge-in) the tail is padded with silence and flushed so
//! the peer always receives whole frames.

/// Fixed-size frame aggregator with tail carry
#[derive(Debug)]
pub struct Reframer {
    frame_samples: usize,
    buf: Vec<i16>,
}

impl Reframer {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples: frame_samples.max(1),
            buf: Vec::new(),
        }
    }

    /// Push samples; returns every completed frame
    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.buf.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.buf.len() >= self.frame_samples {
            frames.push(self.buf.drain(..self.frame_samples).collect());
        }
        frames
    }

    /// Pad the pending tail with silence and emit it, if any
    pub fn flush(&mut self) -> Option<Vec<i16>> {
        if self.buf.is_empty() {
            return None;
        }
        let mut frame = std::mem::take(&mut self.buf);
        frame.resize(self.frame_samples, 0);
        Some(frame)
    }

    /// Samples currently carried
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop any carried tail without emitting it
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_frames() {
        let mut reframer = Reframer::new(4);
        let frames = reframer.push(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(frames, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        assert_eq!(reframer.pending(), 0);
        assert!(reframer.flush().is_none());
    }

    #[test]
    fn test_tail_carry() {
        let mut reframer = Reframer::new(4);
        assert!(reframer.push(&[1, 2, 3]).is_empty());
        let frames = reframer.push(&[4, 5]);
        assert_eq!(frames, vec![vec![1, 2, 3, 4]]);
        assert_eq!(reframer.pending(), 1);
    }

    #[test]
    fn test_flush_pads_with_silence() {
        let mut reframer = Reframer::new(4);
        reframer.push(&[9, 9]);
        assert_eq!(reframer.flush(), Some(vec![9, 9, 0, 0]));
        assert!(reframer.flush().is_none());
    }
}
