//! Handler runtime and turn-taking engines
//!
//! This crate owns the contract between inbound frames, user code, and
//! outbound frames:
//! - `StreamHandler`: the per-session handler trait (async), with a
//!   blocking variant bridged through a bounded worker pool
//! - `HandlerContext`: input snapshot, control channel, phone mode
//! - `ReplyOnPause` / `ReplyOnStopwords`: VAD-driven engines that invoke a
//!   user reply generator once per utterance and stream its yields back,
//!   interruptibly
//! - `OutputQueue`: bounded per-session queue for `AdditionalOutputs`

pub mod context;
pub mod engine;
pub mod handler;
pub mod outputs;
pub mod reply_on_pause;
pub mod reply_on_stopwords;

pub use context::{HandlerContext, ARGS_SENTINEL};
pub use engine::{ReplyFn, ReplyItem, ReplyIter};
pub use handler::{
    BlockingHandler, EmitItem, HandlerSpec, StreamHandler, SyncBridge, DEFAULT_WORKER_PERMITS,
};
pub use outputs::OutputQueue;
pub use reply_on_pause::ReplyOnPause;
pub use reply_on_stopwords::ReplyOnStopwords;

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("handler error: {0}")]
    Handler(String),

    #[error("vad error: {0}")]
    Vad(#[from] voicebridge_vad::VadError),

    #[error("codec error: {0}")]
    Codec(#[from] voicebridge_codec::CodecError),

    #[error("channel closed")]
    ChannelClosed,

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
