//! Reply-on-stopwords engine
//!
//! Like reply-on-pause, but a turn only opens after the stopword detector
//! matches a configured word in the recent audio. Until then inbound
//! chunks feed the detector; once matched, a `stopword` control message
//! goes out and the pause gate takes over, so the audio handed to the
//! generator starts at the match. After each completed turn the stopword
//! must be spoken again.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use voicebridge_core::{AudioFrame, ControlMsg};
use voicebridge_vad::{
    gate::to_vad_rate, GateOptions, PauseGate, SpeechScorer, SpeechToText, StopwordDetector,
    VadOptions, DEFAULT_WINDOW_SECS,
};

use crate::context::HandlerContext;
use crate::engine::{ReplyFn, TurnCore};
use crate::handler::{EmitItem, HandlerSpec, StreamHandler};
use crate::Result;

struct SpotterState {
    detector: StopwordDetector,
    /// Chunk being accumulated for the next detector pass (original rate)
    chunk: Vec<i16>,
    sample_rate: Option<u32>,
    matched: bool,
}

/// Stopword-gated reply engine
pub struct ReplyOnStopwords {
    core: TurnCore,
    gate: Mutex<PauseGate>,
    spotter: Mutex<SpotterState>,
    reply: ReplyFn,
    scorer: Arc<dyn SpeechScorer>,
    stt: Arc<dyn SpeechToText>,
    stop_words: Vec<String>,
    gate_options: GateOptions,
    vad_options: VadOptions,
    wait_for_input: bool,
}

impl ReplyOnStopwords {
    pub fn new(
        reply: ReplyFn,
        scorer: Arc<dyn SpeechScorer>,
        stt: Arc<dyn SpeechToText>,
        stop_words: Vec<String>,
    ) -> Self {
        Self::with_options(
            reply,
            scorer,
            stt,
            stop_words,
            HandlerSpec::default(),
            GateOptions::default(),
            VadOptions::default(),
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_options(
        reply: ReplyFn,
        scorer: Arc<dyn SpeechScorer>,
        stt: Arc<dyn SpeechToText>,
        stop_words: Vec<String>,
        spec: HandlerSpec,
        gate_options: GateOptions,
        vad_options: VadOptions,
        wait_for_input: bool,
    ) -> Self {
        let gate = PauseGate::new(scorer.clone(), gate_options.clone(), vad_options.clone());
        let detector = StopwordDetector::new(stt.clone(), stop_words.clone(), DEFAULT_WINDOW_SECS);
        Self {
            core: TurnCore::new(spec, reply.clone(), wait_for_input),
            gate: Mutex::new(gate),
            spotter: Mutex::new(SpotterState {
                detector,
                chunk: Vec::new(),
                sample_rate: None,
                matched: false,
            }),
            reply,
            scorer,
            stt,
            stop_words,
            gate_options,
            vad_options,
            wait_for_input,
        }
    }

    /// Accumulate audio until a scoring chunk is full, then run the
    /// detector over the recent window. Returns the matched word.
    fn spot(&self, ctx: &Arc<HandlerContext>, frame: &AudioFrame) -> Result<bool> {
        let mut spotter = self.spotter.lock();
        if spotter.matched {
            return Ok(true);
        }

        let rate = *spotter.sample_rate.get_or_insert(frame.sample_rate);
        let mono = frame.to_mono_f32();
        spotter
            .chunk
            .extend(mono.iter().map(|&s| (s * 32767.0) as i16));

        let chunk_samples = (rate as f32 * self.gate_options.chunk_duration()) as usize;
        while spotter.chunk.len() >= chunk_samples.max(1) {
            let chunk: Vec<i16> = spotter.chunk.drain(..chunk_samples.max(1)).collect();
            let audio_16k = to_vad_rate(rate, &chunk);
            if let Some(word) = spotter.detector.push(&audio_16k)? {
                tracing::debug!("stopword matched: {}", word);
                ctx.send(ControlMsg::Stopword(word));
                spotter.matched = true;
                spotter.detector.reset();
                spotter.chunk.clear();
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn reset_spotter(&self) {
        let mut spotter = self.spotter.lock();
        spotter.matched = false;
        spotter.chunk.clear();
        spotter.detector.reset();
    }
}

#[async_trait]
impl StreamHandler for ReplyOnStopwords {
    fn spec(&self) -> HandlerSpec {
        self.core.spec()
    }

    async fn start_up(&self, ctx: Arc<HandlerContext>) -> Result<()> {
        self.core.bind(ctx);
        Ok(())
    }

    async fn receive(&self, ctx: Arc<HandlerContext>, frame: AudioFrame) -> Result<()> {
        if !self.spot(&ctx, &frame)? {
            return Ok(());
        }
        let events = self.gate.lock().push(&frame)?;
        self.core.on_gate_events(events);
        Ok(())
    }

    async fn emit(&self, ctx: Arc<HandlerContext>) -> Result<Option<EmitItem>> {
        let item = self.core.emit(&ctx).await?;
        if self.core.take_completed() {
            // next turn requires the stopword again
            self.reset_spotter();
            self.gate.lock().reset();
        }
        Ok(item)
    }

    fn copy(&self) -> Arc<dyn StreamHandler> {
        Arc::new(ReplyOnStopwords::with_options(
            self.reply.clone(),
            self.scorer.clone(),
            self.stt.clone(),
            self.stop_words.clone(),
            self.core.spec(),
            self.gate_options.clone(),
            self.vad_options.clone(),
            self.wait_for_input,
        ))
    }

    async fn shutdown(&self) {
        self.core.cancel_active();
        self.reset_spotter();
        self.gate.lock().reset();
    }
}
