//! Bounded per-session output queue
//!
//! Handlers emit `AdditionalOutputs` that the client pulls through the
//! output hook. Retention is bounded: when the queue is full the oldest
//! entry is dropped and a `warning` goes out on the control channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use voicebridge_core::AdditionalOutputs;

/// Default queue capacity
pub const DEFAULT_CAPACITY: usize = 128;

/// Bounded FIFO of handler outputs with oldest-drop overflow
pub struct OutputQueue {
    inner: Mutex<VecDeque<AdditionalOutputs>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl Default for OutputQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl OutputQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Push an entry; returns true when the oldest entry was dropped
    pub fn push(&self, outputs: AdditionalOutputs) -> bool {
        let dropped = {
            let mut queue = self.inner.lock();
            let dropped = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(outputs);
            dropped
        };
        self.notify.notify_waiters();
        if dropped {
            tracing::debug!("output queue full, dropped oldest entry");
        }
        dropped
    }

    /// Remove and return the oldest entry, if any
    pub fn try_pop(&self) -> Option<AdditionalOutputs> {
        self.inner.lock().pop_front()
    }

    /// Wait for the next entry; `None` once the queue is closed and empty
    pub async fn pop(&self) -> Option<AdditionalOutputs> {
        loop {
            let notified = self.notify.notified();
            if let Some(outputs) = self.try_pop() {
                return Some(outputs);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Close the queue; pending entries remain poppable
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(i: i64) -> AdditionalOutputs {
        AdditionalOutputs::new(vec![json!(i)])
    }

    #[test]
    fn test_fifo_order() {
        let queue = OutputQueue::new(8);
        queue.push(entry(1));
        queue.push(entry(2));
        assert_eq!(queue.try_pop(), Some(entry(1)));
        assert_eq!(queue.try_pop(), Some(entry(2)));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_overflow_drops_oldest_and_counts() {
        let capacity = 4;
        let pushes = 7;
        let queue = OutputQueue::new(capacity);

        let mut warnings = 0;
        for i in 0..pushes {
            if queue.push(entry(i)) {
                warnings += 1;
            }
        }
        assert_eq!(warnings, pushes as usize - capacity);
        assert_eq!(queue.len(), capacity);

        // exactly the latest `capacity` entries retained
        for i in (pushes - capacity as i64)..pushes {
            assert_eq!(queue.try_pop(), Some(entry(i)));
        }
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = std::sync::Arc::new(OutputQueue::new(4));
        let popper = queue.clone();
        let task = tokio::spawn(async move { popper.pop().await });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.push(entry(42));
        let popped = tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped, Some(entry(42)));
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let queue = OutputQueue::new(4);
        queue.push(entry(1));
        queue.close();
        assert_eq!(queue.pop().await, Some(entry(1)));
        assert_eq!(queue.pop().await, None);
    }
}
