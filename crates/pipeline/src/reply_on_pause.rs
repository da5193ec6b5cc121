//! Reply-on-pause engine
//!
//! Wraps a user reply generator in the stream-handler contract: inbound
//! audio runs through the pause gate, and when the speaker pauses the
//! generator is invoked exactly once with the aggregated utterance. Its
//! yields stream back through the outbound pump until it finishes or the
//! speaker barges in.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use voicebridge_core::AudioFrame;
use voicebridge_vad::{GateOptions, PauseGate, SpeechScorer, VadOptions};

use crate::context::HandlerContext;
use crate::engine::{ReplyFn, TurnCore};
use crate::handler::{EmitItem, HandlerSpec, StreamHandler};
use crate::Result;

/// VAD-gated reply engine: one generator invocation per detected pause
pub struct ReplyOnPause {
    core: TurnCore,
    gate: Mutex<PauseGate>,
    reply: ReplyFn,
    scorer: Arc<dyn SpeechScorer>,
    gate_options: GateOptions,
    vad_options: VadOptions,
    wait_for_input: bool,
}

impl ReplyOnPause {
    pub fn new(reply: ReplyFn, scorer: Arc<dyn SpeechScorer>) -> Self {
        Self::with_options(
            reply,
            scorer,
            HandlerSpec::default(),
            GateOptions::default(),
            VadOptions::default(),
            false,
        )
    }

    pub fn with_options(
        reply: ReplyFn,
        scorer: Arc<dyn SpeechScorer>,
        spec: HandlerSpec,
        gate_options: GateOptions,
        vad_options: VadOptions,
        wait_for_input: bool,
    ) -> Self {
        let gate = PauseGate::new(scorer.clone(), gate_options.clone(), vad_options.clone());
        Self {
            core: TurnCore::new(spec, reply.clone(), wait_for_input),
            gate: Mutex::new(gate),
            reply,
            scorer,
            gate_options,
            vad_options,
            wait_for_input,
        }
    }
}

#[async_trait]
impl StreamHandler for ReplyOnPause {
    fn spec(&self) -> HandlerSpec {
        self.core.spec()
    }

    async fn start_up(&self, ctx: Arc<HandlerContext>) -> Result<()> {
        self.core.bind(ctx);
        Ok(())
    }

    async fn receive(&self, _ctx: Arc<HandlerContext>, frame: AudioFrame) -> Result<()> {
        let events = self.gate.lock().push(&frame)?;
        self.core.on_gate_events(events);
        Ok(())
    }

    async fn emit(&self, ctx: Arc<HandlerContext>) -> Result<Option<EmitItem>> {
        self.core.emit(&ctx).await
    }

    fn copy(&self) -> Arc<dyn StreamHandler> {
        Arc::new(ReplyOnPause::with_options(
            self.reply.clone(),
            self.scorer.clone(),
            self.core.spec(),
            self.gate_options.clone(),
            self.vad_options.clone(),
            self.wait_for_input,
        ))
    }

    async fn shutdown(&self) {
        self.core.cancel_active();
        self.gate.lock().reset();
    }
}
