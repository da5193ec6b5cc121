//! Core types for the voicebridge media server
//!
//! This crate provides the foundational types used across all other crates:
//! - Audio and video frame types
//! - Control-channel messages and the sender seam
//! - Opaque handler outputs surfaced through the output hook
//! - Shared error types

pub mod audio;
pub mod control;
pub mod error;
pub mod outputs;
pub mod video;

pub use audio::{AudioFrame, Channels};
pub use control::{ControlMsg, ControlSender};
pub use error::{Error, Result};
pub use outputs::AdditionalOutputs;
pub use video::{PixelLayout, VideoFrame};
