//! Pixel-layout conversion
//!
//! Video frames pass through without resizing; only the pixel layout is
//! converted when the peer and the handler disagree. YUV conversion uses
//! the BT.601 full-range coefficients.

use voicebridge_core::{PixelLayout, VideoFrame};

use crate::{CodecError, Result};

/// Convert a frame to the target layout; no-op when it already matches
pub fn convert_layout(frame: &VideoFrame, target: PixelLayout) -> Result<VideoFrame> {
    if frame.layout == target {
        return Ok(frame.clone());
    }

    let data = match (frame.layout, target) {
        (PixelLayout::Rgb24, PixelLayout::Bgr24) | (PixelLayout::Bgr24, PixelLayout::Rgb24) => {
            swap_rb(&frame.data)
        }
        (PixelLayout::Yuv420, PixelLayout::Rgb24) => yuv420_to_rgb(frame, false),
        (PixelLayout::Yuv420, PixelLayout::Bgr24) => yuv420_to_rgb(frame, true),
        (PixelLayout::Rgb24, PixelLayout::Yuv420) => rgb_to_yuv420(frame, false),
        (PixelLayout::Bgr24, PixelLayout::Yuv420) => rgb_to_yuv420(frame, true),
        (from, to) => {
            return Err(CodecError::Unsupported(format!(
                "pixel conversion {:?} -> {:?}",
                from, to
            )))
        }
    };

    VideoFrame::new(frame.width, frame.height, target, data)
        .map_err(|e| CodecError::InvalidFrame(e.to_string()))
}

fn swap_rb(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    for px in out.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    out
}

fn yuv420_to_rgb(frame: &VideoFrame, bgr: bool) -> Vec<u8> {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let y_plane = &frame.data[..w * h];
    let u_plane = &frame.data[w * h..w * h + w * h / 4];
    let v_plane = &frame.data[w * h + w * h / 4..];

    let mut out = vec![0u8; w * h * 3];
    for row in 0..h {
        for col in 0..w {
            let y = y_plane[row * w + col] as f32;
            let chroma_idx = (row / 2) * (w / 2) + col / 2;
            let u = u_plane[chroma_idx] as f32 - 128.0;
            let v = v_plane[chroma_idx] as f32 - 128.0;

            let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
            let g = (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8;
            let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;

            let base = (row * w + col) * 3;
            if bgr {
                out[base] = b;
                out[base + 1] = g;
                out[base + 2] = r;
            } else {
                out[base] = r;
                out[base + 1] = g;
                out[base + 2] = b;
            }
        }
    }
    out
}

fn rgb_to_yuv420(frame: &VideoFrame, bgr: bool) -> Vec<u8> {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let mut out = vec![0u8; w * h * 3 / 2];

    // chroma accumulation over 2x2 blocks
    let mut u_acc = vec![0f32; (w / 2) * (h / 2).max(1)];
    let mut v_acc = vec![0f32; (w / 2) * (h / 2).max(1)];
    let mut counts = vec![0f32; (w / 2) * (h / 2).max(1)];

    for row in 0..h {
        for col in 0..w {
            let base = (row * w + col) * 3;
            let (r, g, b) = if bgr {
                (
                    frame.data[base + 2] as f32,
                    frame.data[base + 1] as f32,
                    frame.data[base] as f32,
                )
            } else {
                (
                    frame.data[base] as f32,
                    frame.data[base + 1] as f32,
                    frame.data[base + 2] as f32,
                )
            };

            let y = 0.299 * r + 0.587 * g + 0.114 * b;
            out[row * w + col] = y.clamp(0.0, 255.0) as u8;

            let chroma_idx = (row / 2) * (w / 2) + col / 2;
            if chroma_idx < u_acc.len() {
                u_acc[chroma_idx] += -0.168736 * r - 0.331264 * g + 0.5 * b + 128.0;
                v_acc[chroma_idx] += 0.5 * r - 0.418688 * g - 0.081312 * b + 128.0;
                counts[chroma_idx] += 1.0;
            }
        }
    }

    let u_offset = w * h;
    let v_offset = w * h + w * h / 4;
    for (i, count) in counts.iter().enumerate() {
        if *count > 0.0 {
            out[u_offset + i] = (u_acc[i] / count).clamp(0.0, 255.0) as u8;
            out[v_offset + i] = (v_acc[i] / count).clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_bgr_swap() {
        let frame = VideoFrame::new(2, 1, PixelLayout::Rgb24, vec![10, 20, 30, 40, 50, 60]).unwrap();
        let converted = convert_layout(&frame, PixelLayout::Bgr24).unwrap();
        assert_eq!(converted.data, vec![30, 20, 10, 60, 50, 40]);
        // and back
        let restored = convert_layout(&converted, PixelLayout::Rgb24).unwrap();
        assert_eq!(restored.data, frame.data);
    }

    #[test]
    fn test_noop_when_layouts_match() {
        let frame = VideoFrame::new(2, 2, PixelLayout::Yuv420, vec![0; 6]).unwrap();
        let out = convert_layout(&frame, PixelLayout::Yuv420).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn test_yuv_gray_roundtrip() {
        // mid-gray has neutral chroma, so the 4:2:0 subsample is lossless
        let w = 4u32;
        let h = 4u32;
        let gray = vec![128u8; (w * h * 3) as usize];
        let rgb = VideoFrame::new(w, h, PixelLayout::Rgb24, gray.clone()).unwrap();
        let yuv = convert_layout(&rgb, PixelLayout::Yuv420).unwrap();
        let back = convert_layout(&yuv, PixelLayout::Rgb24).unwrap();
        for (a, b) in gray.iter().zip(back.data.iter()) {
            assert!((*a as i16 - *b as i16).abs() <= 2);
        }
    }
}
