//! Control-channel senders
//!
//! Both transports route control messages through a bounded queue drained
//! by the connection's writer task, so a slow peer can never block a media
//! pump. A full queue drops the message; the channel is at-least-once and
//! the client tolerates gaps in advisory traffic.

use tokio::sync::mpsc;

use voicebridge_core::{ControlMsg, ControlSender};

/// Queue capacity for control traffic
const CONTROL_QUEUE: usize = 64;

/// mpsc-backed control sender shared by the WebRTC data channel and the
/// WebSocket writer
pub struct QueuedControl {
    tx: mpsc::Sender<String>,
}

impl QueuedControl {
    /// Returns the sender plus the receiver the writer task drains
    pub fn new() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(CONTROL_QUEUE);
        (Self { tx }, rx)
    }
}

impl ControlSender for QueuedControl {
    fn send(&self, msg: ControlMsg) {
        let wire = msg.to_wire();
        if let Err(e) = self.tx.try_send(wire) {
            tracing::debug!("control message dropped: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_reach_receiver_in_order() {
        let (control, mut rx) = QueuedControl::new();
        control.send(ControlMsg::PauseDetected);
        control.send(ControlMsg::ResponseStarting);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.contains("pause_detected"));
        assert!(second.contains("response_starting"));
    }

    #[tokio::test]
    async fn test_overflow_drops_instead_of_blocking() {
        let (control, _rx) = QueuedControl::new();
        for _ in 0..CONTROL_QUEUE * 2 {
            control.send(ControlMsg::Log("flood".into()));
        }
        // reaching here without blocking is the assertion
    }
}
