//! Frame codec: format normalization between peers and handlers
//!
//! This crate converts between peer-negotiated media formats and the
//! formats a handler declares:
//! - Streaming resampler with state that survives across frames
//! - Channel downmix/upmix between mono and stereo
//! - Re-framing of outbound samples into fixed-size frames
//! - G.711 mu-law transcoding for the telephone path
//! - Opus encode/decode for the WebRTC media path
//! - Pixel-layout conversion for video pass-through

pub mod frame;
pub mod mulaw;
pub mod opus;
pub mod pcm;
pub mod reframer;
pub mod resampler;
pub mod video;

pub use frame::{InboundCodec, InboundOutcome, OutboundCodec};
pub use mulaw::{mulaw_decode, mulaw_encode};
pub use opus::{OpusDecoder, OpusEncoder};
pub use pcm::ByteAggregator;
pub use reframer::Reframer;
pub use resampler::{resample_buffer, StreamResampler};
pub use video::convert_layout;

use thiserror::Error;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("resampler error: {0}")]
    Resample(String),

    #[error("opus error: {0}")]
    Opus(String),

    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;
