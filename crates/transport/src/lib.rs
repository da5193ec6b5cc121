//! Peer transports
//!
//! Session plumbing between peers and the handler runtime:
//! - WebRTC: peer negotiation, Opus media tracks, the `text` data channel
//!   as control channel, video RTP relay
//! - WebSocket: `start`/`media`/`stop` framing with base64 mu-law audio,
//!   control messages interleaved on the same socket (telephone bridge)
//! - Shared pumps: bounded inbound frame queue with oldest-drop, outbound
//!   emit loop, stall watchdog

pub mod control;
pub mod pumps;
pub mod webrtc;
pub mod websocket;

pub use control::QueuedControl;
pub use pumps::{FrameQueue, SessionIo};
pub use crate::webrtc::{RtcApi, SessionOffer, WebRtcSession};
pub use websocket::{run_websocket, WebSocketDeps};

use thiserror::Error;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("codec error: {0}")]
    Codec(#[from] voicebridge_codec::CodecError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] voicebridge_pipeline::PipelineError),
}

pub type Result<T> = std::result::Result<T, TransportError>;
