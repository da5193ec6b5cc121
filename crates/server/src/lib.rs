//! HTTP/WebSocket surface and session management
//!
//! Thin adapter over the transports and the handler runtime: axum routes
//! for signalling, the input/output hooks, and the telephone bridge, plus
//! the session manager that owns admission, lifetime, and per-session
//! state. No business logic lives here.

pub mod routes;
pub mod session;
pub mod state;

pub use routes::create_router;
pub use session::{Session, SessionManager, SessionState};
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("concurrency limit reached ({0})")]
    ConcurrencyLimit(usize),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(#[from] voicebridge_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, ServerError>;
