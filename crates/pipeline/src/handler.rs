//! The stream-handler contract
//!
//! A handler owns the media logic of one session: `receive` is called once
//! per normalized inbound frame, `emit` is polled by the outbound pump,
//! `copy` produces the per-session instance, `shutdown` releases
//! resources. Asynchronous handlers implement `StreamHandler` directly;
//! synchronous ones implement `BlockingHandler` and ride the worker pool
//! through `SyncBridge`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use voicebridge_core::{AdditionalOutputs, AudioFrame, Channels, VideoFrame};

use crate::context::HandlerContext;
use crate::{PipelineError, Result};

/// Audio format a handler declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerSpec {
    /// Rate inbound audio is resampled to before `receive`
    pub input_sample_rate: u32,
    /// Rate of outbound frames after re-framing
    pub output_sample_rate: u32,
    /// Samples per outbound frame (per channel)
    pub output_frame_samples: usize,
    /// Layout `receive` expects
    pub expected_layout: Channels,
}

impl Default for HandlerSpec {
    fn default() -> Self {
        Self {
            input_sample_rate: 48000,
            output_sample_rate: 24000,
            output_frame_samples: 480,
            expected_layout: Channels::Mono,
        }
    }
}

/// One item produced by `emit`
#[derive(Debug, Clone)]
pub enum EmitItem {
    Audio(AudioFrame),
    Video(VideoFrame),
    Outputs(AdditionalOutputs),
    AudioWithOutputs(AudioFrame, AdditionalOutputs),
}

/// Per-session stream handler (asynchronous form)
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Declared audio format
    fn spec(&self) -> HandlerSpec;

    /// Invoked once after `copy`, before the first `receive`/`emit`
    async fn start_up(&self, ctx: Arc<HandlerContext>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// One normalized inbound audio frame. Must not block the transport.
    async fn receive(&self, ctx: Arc<HandlerContext>, frame: AudioFrame) -> Result<()>;

    /// Next outbound item; `None` means nothing to send right now
    async fn emit(&self, ctx: Arc<HandlerContext>) -> Result<Option<EmitItem>>;

    /// Fresh handler with identical configuration and no shared state;
    /// called once per new session
    fn copy(&self) -> Arc<dyn StreamHandler>;

    /// Release owned resources; called exactly once, must be idempotent
    async fn shutdown(&self);

    /// Inbound video frame (audio-video handlers)
    async fn video_receive(&self, ctx: Arc<HandlerContext>, frame: VideoFrame) -> Result<()> {
        let _ = (ctx, frame);
        Ok(())
    }

    /// Next outbound video item (audio-video handlers)
    async fn video_emit(&self, ctx: Arc<HandlerContext>) -> Result<Option<EmitItem>> {
        let _ = ctx;
        Ok(None)
    }
}

/// Per-session stream handler (synchronous form)
pub trait BlockingHandler: Send + Sync {
    fn spec(&self) -> HandlerSpec;

    fn start_up(&self, ctx: Arc<HandlerContext>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    fn receive(&self, ctx: Arc<HandlerContext>, frame: AudioFrame) -> Result<()>;

    fn emit(&self, ctx: Arc<HandlerContext>) -> Result<Option<EmitItem>>;

    /// Fresh instance with identical configuration and no shared state
    fn copy(&self) -> Self
    where
        Self: Sized;

    fn shutdown(&self);
}

/// Worker-pool permits shared by one bridged handler
pub const DEFAULT_WORKER_PERMITS: usize = 4;

/// Runs a `BlockingHandler` behind the async contract on the blocking
/// pool, bounded so one session cannot starve the pool.
pub struct SyncBridge<H: BlockingHandler + 'static> {
    inner: Arc<H>,
    permits: Arc<Semaphore>,
}

impl<H: BlockingHandler + 'static> SyncBridge<H> {
    pub fn new(handler: H) -> Self {
        Self {
            inner: Arc::new(handler),
            permits: Arc::new(Semaphore::new(DEFAULT_WORKER_PERMITS)),
        }
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<H>) -> Result<T> + Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::ChannelClosed)?;
        let handler = self.inner.clone();
        tokio::task::spawn_blocking(move || op(handler))
            .await
            .map_err(|e| PipelineError::Handler(format!("worker panicked: {}", e)))?
    }
}

#[async_trait]
impl<H: BlockingHandler + 'static> StreamHandler for SyncBridge<H> {
    fn spec(&self) -> HandlerSpec {
        self.inner.spec()
    }

    async fn start_up(&self, ctx: Arc<HandlerContext>) -> Result<()> {
        self.run_blocking(move |h| h.start_up(ctx)).await
    }

    async fn receive(&self, ctx: Arc<HandlerContext>, frame: AudioFrame) -> Result<()> {
        self.run_blocking(move |h| h.receive(ctx, frame)).await
    }

    async fn emit(&self, ctx: Arc<HandlerContext>) -> Result<Option<EmitItem>> {
        self.run_blocking(move |h| h.emit(ctx)).await
    }

    fn copy(&self) -> Arc<dyn StreamHandler> {
        Arc::new(SyncBridge::new(self.inner.copy()))
    }

    async fn shutdown(&self) {
        let handler = self.inner.clone();
        if tokio::task::spawn_blocking(move || handler.shutdown())
            .await
            .is_err()
        {
            tracing::warn!("handler shutdown panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Echo handler: emits whatever it received, in order
    struct Echo {
        queue: Mutex<VecDeque<AudioFrame>>,
    }

    impl Echo {
        fn new() -> Self {
            Self {
                queue: Mutex::new(VecDeque::new()),
            }
        }
    }

    impl BlockingHandler for Echo {
        fn spec(&self) -> HandlerSpec {
            HandlerSpec::default()
        }

        fn receive(&self, _ctx: Arc<HandlerContext>, frame: AudioFrame) -> Result<()> {
            self.queue.lock().push_back(frame);
            Ok(())
        }

        fn emit(&self, _ctx: Arc<HandlerContext>) -> Result<Option<EmitItem>> {
            Ok(self.queue.lock().pop_front().map(EmitItem::Audio))
        }

        fn copy(&self) -> Self {
            Echo::new()
        }

        fn shutdown(&self) {}
    }

    #[tokio::test]
    async fn test_bridge_echoes_in_order() {
        let bridge = SyncBridge::new(Echo::new());
        let ctx = Arc::new(HandlerContext::new());

        for i in 0..20i16 {
            let frame = AudioFrame::mono(48000, vec![i; 960]);
            bridge.receive(ctx.clone(), frame).await.unwrap();
        }

        for i in 0..20i16 {
            let item = bridge.emit(ctx.clone()).await.unwrap();
            match item {
                Some(EmitItem::Audio(frame)) => {
                    assert_eq!(frame.samples, vec![i; 960]);
                }
                other => panic!("expected audio at {}, got {:?}", i, other),
            }
        }
        assert!(bridge.emit(ctx.clone()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_copy_shares_no_state() {
        let bridge = SyncBridge::new(Echo::new());
        let ctx = Arc::new(HandlerContext::new());
        bridge
            .receive(ctx.clone(), AudioFrame::mono(48000, vec![1; 10]))
            .await
            .unwrap();

        let fresh = bridge.copy();
        assert!(fresh.emit(ctx.clone()).await.unwrap().is_none());
        assert!(bridge.emit(ctx).await.unwrap().is_some());
    }
}
