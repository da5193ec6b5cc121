//! Per-session handler context
//!
//! Holds the state a handler shares with its session: the control-channel
//! sender, the input snapshot posted through the input hook, and the
//! telephone-mode flag. The snapshot is replaced atomically; readers take
//! a stable copy under the lock and release it before running user code.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex as StdMutex};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use voicebridge_core::{ControlMsg, ControlSender};

/// Reserved slot-0 value of the input snapshot; replaced by the media
/// payload when the handler is invoked.
pub const ARGS_SENTINEL: &str = "__webrtc_value__";

/// Shared per-session handler state
pub struct HandlerContext {
    control: RwLock<Option<Arc<dyn ControlSender>>>,
    args: Mutex<Vec<Value>>,
    /// Readiness flag guarded for blocking waiters; async waiters pair the
    /// same flag with `notify`.
    ready: StdMutex<bool>,
    ready_cv: Condvar,
    notify: Notify,
    phone_mode: AtomicBool,
    cancel: CancellationToken,
}

impl Default for HandlerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerContext {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Build a context observing the session's cancellation token
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            control: RwLock::new(None),
            args: Mutex::new(vec![Value::String(ARGS_SENTINEL.to_string())]),
            ready: StdMutex::new(false),
            ready_cv: Condvar::new(),
            notify: Notify::new(),
            phone_mode: AtomicBool::new(false),
            cancel,
        }
    }

    /// The session-wide cancellation token
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// A child token for one unit of work (e.g. a reply turn)
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Attach the control channel once the transport has one
    pub fn set_control(&self, sender: Arc<dyn ControlSender>) {
        *self.control.write() = Some(sender);
    }

    /// Send a control message if a channel is attached; never blocks
    pub fn send(&self, msg: ControlMsg) {
        match self.control.read().as_ref() {
            Some(sender) => sender.send(msg),
            None => tracing::trace!("control channel not ready, dropping {:?}", msg),
        }
    }

    pub fn phone_mode(&self) -> bool {
        self.phone_mode.load(Ordering::Relaxed)
    }

    pub fn set_phone_mode(&self, value: bool) {
        self.phone_mode.store(value, Ordering::Relaxed);
    }

    /// Atomically replace the input snapshot (slot 0 stays reserved)
    pub fn set_args(&self, values: Vec<Value>) {
        {
            let mut args = self.args.lock();
            let mut next = Vec::with_capacity(values.len() + 1);
            next.push(Value::String(ARGS_SENTINEL.to_string()));
            next.extend(values);
            *args = next;
        }
        self.mark_ready();
    }

    /// Stable copy of the current snapshot
    pub fn snapshot(&self) -> Vec<Value> {
        self.args.lock().clone()
    }

    pub fn args_ready(&self) -> bool {
        match self.ready.lock() {
            Ok(flag) => *flag,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Forget the snapshot readiness; the next wait asks the client again
    pub fn reset_args(&self) {
        if let Ok(mut flag) = self.ready.lock() {
            *flag = false;
        }
    }

    /// Suspend until input arguments are available.
    ///
    /// Sends `send_input` so the client posts fresh values. In telephone
    /// mode no inputs are expected: the snapshot becomes `[null]` and this
    /// returns immediately.
    pub async fn wait_for_args(&self) {
        if self.phone_mode() {
            self.set_phone_args();
            return;
        }
        if self.args_ready() {
            return;
        }
        self.send(ControlMsg::SendInput);
        loop {
            let notified = self.notify.notified();
            if self.args_ready() {
                return;
            }
            notified.await;
        }
    }

    /// Blocking variant for handlers running on the worker pool
    pub fn wait_for_args_blocking(&self) {
        if self.phone_mode() {
            self.set_phone_args();
            return;
        }
        if self.args_ready() {
            return;
        }
        self.send(ControlMsg::SendInput);
        if let Ok(guard) = self.ready.lock() {
            let _guard = self.ready_cv.wait_while(guard, |ready| !*ready);
        }
    }

    fn set_phone_args(&self) {
        if !self.args_ready() {
            *self.args.lock() = vec![Value::Null];
            self.mark_ready();
        }
    }

    fn mark_ready(&self) {
        match self.ready.lock() {
            Ok(mut flag) => *flag = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        self.ready_cv.notify_all();
        self.notify.notify_waiters();
    }
}
