//! Session management
//!
//! Owns every live session: admission against the concurrency limit, id
//! assignment, per-session handler instances, input snapshots, output
//! queues, time limits, and teardown. External hooks address sessions by
//! the id returned from signalling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use voicebridge_core::AdditionalOutputs;
use voicebridge_pipeline::{HandlerContext, OutputQueue, StreamHandler};

use crate::ServerError;

/// How long a one-shot output fetch waits for an entry
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Sweep interval for sessions whose peer vanished without teardown
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Coarse session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Negotiating,
    Connected,
    Active,
    Draining,
    Closed,
}

/// One peer-to-server connection plus its handler state
pub struct Session {
    pub id: String,
    pub handler: Arc<dyn StreamHandler>,
    pub ctx: Arc<HandlerContext>,
    pub outputs: Arc<OutputQueue>,
    pub cancel: CancellationToken,
    pub created_at: Instant,
    state: RwLock<SessionState>,
    shut_down: AtomicBool,
}

impl Session {
    fn from_parts(
        id: String,
        handler: Arc<dyn StreamHandler>,
        ctx: Arc<HandlerContext>,
        cancel: CancellationToken,
        outputs_capacity: usize,
    ) -> Self {
        Self {
            id,
            handler,
            ctx,
            outputs: Arc::new(OutputQueue::new(outputs_capacity)),
            cancel,
            created_at: Instant::now(),
            state: RwLock::new(SessionState::Negotiating),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Advance the lifecycle; `Closed` is terminal
    pub fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        if *state != SessionState::Closed {
            *state = next;
        }
    }

    /// Cancel the session and release handler resources exactly once
    pub fn close(&self) {
        self.set_state(SessionState::Draining);
        self.cancel.cancel();
        self.outputs.close();
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            let handler = self.handler.clone();
            tokio::spawn(async move { handler.shutdown().await });
        }
        self.set_state(SessionState::Closed);
    }
}

/// Registry of live sessions
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    concurrency_limit: Option<usize>,
    time_limit: Option<f64>,
    outputs_capacity: usize,
}

impl SessionManager {
    pub fn new(
        concurrency_limit: Option<usize>,
        time_limit: Option<f64>,
        outputs_capacity: usize,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            concurrency_limit,
            time_limit,
            outputs_capacity,
        }
    }

    pub fn concurrency_limit(&self) -> Option<usize> {
        self.concurrency_limit
    }

    /// Admit a new session, copying the registered handler.
    ///
    /// The client's id is adopted when free; a colliding id is NOT adopted
    /// (one client must not be able to attach to another's hooks) and a
    /// fresh one is generated and returned in the signalling response.
    pub fn admit(
        self: &Arc<Self>,
        requested_id: &str,
        template: &Arc<dyn StreamHandler>,
    ) -> Result<Arc<Session>, ServerError> {
        let cancel = CancellationToken::new();
        let ctx = Arc::new(HandlerContext::with_token(cancel.clone()));
        self.admit_prepared(requested_id, template.copy(), ctx, cancel)
    }

    /// Admit a session whose handler and context the transport already
    /// built (the WebSocket path learns its id from the `start` event).
    pub fn admit_prepared(
        self: &Arc<Self>,
        requested_id: &str,
        handler: Arc<dyn StreamHandler>,
        ctx: Arc<HandlerContext>,
        cancel: CancellationToken,
    ) -> Result<Arc<Session>, ServerError> {
        let mut sessions = self.sessions.write();

        if let Some(limit) = self.concurrency_limit {
            if sessions.len() >= limit {
                return Err(ServerError::ConcurrencyLimit(limit));
            }
        }

        let url_safe = requested_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        let id = if requested_id.len() >= 6 && url_safe && !sessions.contains_key(requested_id) {
            requested_id.to_string()
        } else {
            let fresh = uuid::Uuid::new_v4().simple().to_string();
            tracing::debug!(
                "session id {:?} unusable, assigned {}",
                requested_id,
                fresh
            );
            fresh
        };

        let session = Arc::new(Session::from_parts(
            id.clone(),
            handler,
            ctx,
            cancel,
            self.outputs_capacity,
        ));
        sessions.insert(id.clone(), session.clone());
        drop(sessions);

        tracing::info!("session {} admitted ({} active)", id, self.count());

        if let Some(limit) = self.time_limit {
            let manager = Arc::clone(self);
            let id = id.clone();
            let cancel = session.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs_f64(limit)) => {
                        tracing::info!("session {} hit its time limit", id);
                        manager.remove(&id);
                    }
                }
            });
        }

        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Close and forget a session
    pub fn remove(&self, id: &str) {
        let removed = self.sessions.write().remove(id);
        if let Some(session) = removed {
            session.close();
            tracing::info!("session {} closed ({} active)", id, self.count());
        }
    }

    /// Active session count
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Atomically replace a session's input snapshot
    pub fn set_input(&self, id: &str, values: Vec<Value>) -> Result<(), ServerError> {
        let session = self.get(id).ok_or_else(|| ServerError::NotFound(id.into()))?;
        session.ctx.set_args(values);
        Ok(())
    }

    /// Return and remove the oldest queued output entry
    pub async fn fetch_latest_output(&self, id: &str) -> Result<Option<AdditionalOutputs>, ServerError> {
        let session = self.get(id).ok_or_else(|| ServerError::NotFound(id.into()))?;
        let queue = session.outputs.clone();
        match tokio::time::timeout(FETCH_TIMEOUT, queue.pop()).await {
            Ok(entry) => Ok(entry),
            Err(_) => Ok(None),
        }
    }

    /// The session's output queue, for streaming consumers
    pub fn output_queue(&self, id: &str) -> Result<Arc<OutputQueue>, ServerError> {
        let session = self.get(id).ok_or_else(|| ServerError::NotFound(id.into()))?;
        Ok(session.outputs.clone())
    }

    /// Periodically drop sessions whose peer vanished without teardown
    pub fn start_sweep_task(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let stale: Vec<String> = manager
                    .sessions
                    .read()
                    .iter()
                    .filter(|(_, s)| s.cancel.is_cancelled() || s.state() == SessionState::Closed)
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in stale {
                    tracing::debug!("sweeping stale session {}", id);
                    manager.remove(&id);
                }
            }
        });
    }
}
