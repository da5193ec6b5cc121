//! Session pumps shared by the transports
//!
//! Each session runs three logical loops: the inbound pump feeds the
//! bounded frame queue, the receive loop drains it into the handler, and
//! the outbound pump polls `emit`. The frame queue never blocks the
//! transport: overflow drops the oldest frame and warns the peer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use voicebridge_core::{AudioFrame, ControlMsg};
use voicebridge_pipeline::{EmitItem, HandlerContext, OutputQueue, StreamHandler};

/// How long the receive loop waits before warning about an inbound stall.
/// The session stays alive; cellular callers go silent for long stretches.
pub const INBOUND_STALL: Duration = Duration::from_secs(30);

/// Outbound pump idle sleep when the handler has nothing to send
pub const EMIT_IDLE: Duration = Duration::from_millis(10);

/// Bounded inbound frame queue with oldest-drop overflow
pub struct FrameQueue {
    inner: Mutex<VecDeque<AudioFrame>>,
    capacity: usize,
    notify: Notify,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Push a frame; returns true when the oldest frame was dropped
    pub fn push(&self, frame: AudioFrame) -> bool {
        let dropped = {
            let mut queue = self.inner.lock();
            let dropped = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(frame);
            dropped
        };
        self.notify.notify_waiters();
        dropped
    }

    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.inner.lock().pop_front()
    }

    /// Wait for the next frame, or `None` once cancelled
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<AudioFrame> {
        loop {
            let notified = self.notify.notified();
            if let Some(frame) = self.try_pop() {
                return Some(frame);
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = notified => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Everything the pumps need for one session
#[derive(Clone)]
pub struct SessionIo {
    pub handler: Arc<dyn StreamHandler>,
    pub ctx: Arc<HandlerContext>,
    pub outputs: Arc<OutputQueue>,
    pub cancel: CancellationToken,
}

impl SessionIo {
    /// Drain the frame queue into the handler, warning once per stall
    pub async fn run_receive_loop(&self, queue: Arc<FrameQueue>) {
        let mut stalled = false;
        loop {
            tokio::select! {
                frame = queue.pop(&self.cancel) => {
                    let Some(frame) = frame else { break };
                    stalled = false;
                    if let Err(e) = self.handler.receive(self.ctx.clone(), frame).await {
                        tracing::warn!("handler receive failed: {}", e);
                        self.ctx.send(ControlMsg::Error(e.to_string()));
                    }
                }
                _ = tokio::time::sleep(INBOUND_STALL), if !stalled => {
                    tracing::debug!("no inbound media for {:?}", INBOUND_STALL);
                    self.ctx.send(ControlMsg::Warning(
                        "no inbound media received for 30s".into(),
                    ));
                    stalled = true;
                }
                _ = self.cancel.cancelled() => break,
            }
        }
    }

    /// Push one inbound frame, surfacing the overflow warning
    pub fn enqueue_frame(&self, queue: &FrameQueue, frame: AudioFrame) {
        if queue.push(frame) {
            self.ctx
                .send(ControlMsg::Warning("inbound queue full, dropped oldest frame".into()));
        }
    }

    /// Queue an `AdditionalOutputs` entry and announce it
    pub fn push_outputs(&self, outputs: voicebridge_core::AdditionalOutputs) {
        if self.outputs.push(outputs) {
            self.ctx
                .send(ControlMsg::Warning("output queue full, dropped oldest entry".into()));
        }
        self.ctx.send(ControlMsg::FetchOutput);
    }

    /// Poll the handler for the next media frame, routing side items.
    /// Returns `None` when the session is cancelled.
    pub async fn next_outbound(&self) -> Option<EmitItem> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let item = match self.handler.emit(self.ctx.clone()).await {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!("handler emit failed: {}", e);
                    self.ctx.send(ControlMsg::Error(e.to_string()));
                    tokio::time::sleep(EMIT_IDLE).await;
                    continue;
                }
            };
            match item {
                Some(EmitItem::Outputs(outputs)) => {
                    self.push_outputs(outputs);
                    continue;
                }
                Some(EmitItem::AudioWithOutputs(frame, outputs)) => {
                    self.push_outputs(outputs);
                    return Some(EmitItem::Audio(frame));
                }
                Some(item) => return Some(item),
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        _ = tokio::time::sleep(EMIT_IDLE) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_queue_drops_oldest() {
        let queue = FrameQueue::new(2);
        assert!(!queue.push(AudioFrame::mono(16000, vec![1])));
        assert!(!queue.push(AudioFrame::mono(16000, vec![2])));
        assert!(queue.push(AudioFrame::mono(16000, vec![3])));

        assert_eq!(queue.try_pop().unwrap().samples, vec![2]);
        assert_eq!(queue.try_pop().unwrap().samples, vec![3]);
        assert!(queue.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_pop_returns_none_on_cancel() {
        let queue = Arc::new(FrameQueue::new(4));
        let cancel = CancellationToken::new();
        let popper = queue.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { popper.pop(&token).await });

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }
}
