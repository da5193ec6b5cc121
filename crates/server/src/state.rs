//! Application state
//!
//! Shared across all route handlers: settings, the registered handler
//! template, the session manager, and the WebRTC API instance.

use std::sync::Arc;

use voicebridge_config::Settings;
use voicebridge_pipeline::StreamHandler;
use voicebridge_transport::RtcApi;

use crate::session::SessionManager;
use crate::Result;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// The user-registered handler; copied once per session
    pub handler: Arc<dyn StreamHandler>,
    pub sessions: Arc<SessionManager>,
    pub rtc: Arc<RtcApi>,
}

impl AppState {
    /// Build state for a registered handler
    pub fn new(settings: Settings, handler: Arc<dyn StreamHandler>) -> Result<Self> {
        let sessions = Arc::new(SessionManager::new(
            settings.stream.concurrency_limit,
            settings.stream.time_limit,
            settings.queues.outputs_capacity,
        ));
        sessions.start_sweep_task();

        Ok(Self {
            settings: Arc::new(settings),
            handler,
            sessions,
            rtc: Arc::new(RtcApi::new()?),
        })
    }
}
