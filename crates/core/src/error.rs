//! Shared error types

use thiserror::Error;

/// Errors shared across the workspace
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("session closed")]
    SessionClosed,

    #[error("handler error: {0}")]
    Handler(String),
}

pub type Result<T> = std::result::Result<T, Error>;
