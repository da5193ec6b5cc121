//! Video frame type

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pixel layout of a video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    Rgb24,
    Bgr24,
    Yuv420,
}

impl PixelLayout {
    /// Expected byte length for a frame of the given dimensions
    pub fn frame_len(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelLayout::Rgb24 | PixelLayout::Bgr24 => pixels * 3,
            PixelLayout::Yuv420 => pixels * 3 / 2,
        }
    }
}

/// A single uncompressed video frame
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Create a frame, validating the buffer length against the layout
    pub fn new(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Result<Self> {
        let expected = layout.frame_len(width, height);
        if data.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "{}x{} {:?} frame expects {} bytes, got {}",
                width,
                height,
                layout,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            layout,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_len() {
        assert_eq!(PixelLayout::Rgb24.frame_len(4, 2), 24);
        assert_eq!(PixelLayout::Yuv420.frame_len(4, 2), 12);
    }

    #[test]
    fn test_frame_validation() {
        assert!(VideoFrame::new(2, 2, PixelLayout::Bgr24, vec![0; 12]).is_ok());
        assert!(VideoFrame::new(2, 2, PixelLayout::Bgr24, vec![0; 11]).is_err());
    }
}
