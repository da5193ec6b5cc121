//! Shared turn lifecycle for the reply engines
//!
//! Both engines drive the same machinery: when the gate closes an
//! utterance, the user reply generator runs on the blocking pool and its
//! yields flow through a re-framer into a bounded channel the outbound
//! pump drains. Cancellation is explicit: a per-turn child token is
//! observed between every yield, and on barge-in the re-framer tail is
//! padded with silence and delivered as at most one final frame. No yield
//! crosses the generator boundary after cancellation completes.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use voicebridge_codec::OutboundCodec;
use voicebridge_core::{
    AdditionalOutputs, AudioFrame, Channels, ControlMsg, VideoFrame,
};

use crate::context::HandlerContext;
use crate::handler::{EmitItem, HandlerSpec};
use crate::Result;
use voicebridge_vad::GateEvent;

/// One item yielded by a user reply generator
#[derive(Debug, Clone)]
pub enum ReplyItem {
    /// Audio at any sample rate; re-framed before delivery
    Audio(AudioFrame),
    Video(VideoFrame),
    Outputs(AdditionalOutputs),
    AudioWithOutputs(AudioFrame, AdditionalOutputs),
}

/// A running iterator of reply items; `Err` surfaces user-code failures
pub type ReplyIter = Box<dyn Iterator<Item = std::result::Result<ReplyItem, String>> + Send>;

/// User reply generator: invoked once per utterance with the aggregated
/// audio and the input snapshot past the media sentinel.
pub type ReplyFn = Arc<dyn Fn(AudioFrame, Vec<Value>) -> ReplyIter + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EngineState {
    Listening,
    UserSpeaking,
    Responding,
}

/// A turn in flight
struct Turn {
    rx: Option<mpsc::Receiver<EmitItem>>,
    tail_rx: Option<oneshot::Receiver<Option<AudioFrame>>>,
    token: CancellationToken,
    first_audio_sent: bool,
    /// Set by the worker when user code raised
    errored: Arc<AtomicBool>,
}

struct CoreState {
    engine: EngineState,
    /// Utterance waiting for its turn to start
    pending: Option<AudioFrame>,
    turn: Option<Turn>,
    /// Tail of a cancelled turn still owed to the peer
    finishing: Option<oneshot::Receiver<Option<AudioFrame>>>,
    /// Set when a turn ends (normally or on error); owners read-and-clear
    completed: bool,
}

/// Turn lifecycle shared by `ReplyOnPause` and `ReplyOnStopwords`
pub(crate) struct TurnCore {
    spec: HandlerSpec,
    reply: ReplyFn,
    wait_for_input: bool,
    ctx: Mutex<Option<Arc<HandlerContext>>>,
    state: Mutex<CoreState>,
}

impl TurnCore {
    pub(crate) fn new(spec: HandlerSpec, reply: ReplyFn, wait_for_input: bool) -> Self {
        Self {
            spec,
            reply,
            wait_for_input,
            ctx: Mutex::new(None),
            state: Mutex::new(CoreState {
                engine: EngineState::Listening,
                pending: None,
                turn: None,
                finishing: None,
                completed: false,
            }),
        }
    }

    pub(crate) fn spec(&self) -> HandlerSpec {
        self.spec
    }

    /// Remember the context so shutdown can reach the control channel
    pub(crate) fn bind(&self, ctx: Arc<HandlerContext>) {
        *self.ctx.lock() = Some(ctx);
    }

    /// Step the engine with the gate's events for one inbound frame
    pub(crate) fn on_gate_events(&self, events: Vec<GateEvent>) {
        for event in events {
            let mut state = self.state.lock();
            match event {
                GateEvent::StartedTalking => {
                    if state.engine == EngineState::Responding {
                        tracing::debug!("barge-in: cancelling running reply");
                        Self::barge_in(&mut state);
                    }
                    state.engine = EngineState::UserSpeaking;
                    tracing::debug!("pause_detected=false");
                }
                GateEvent::Continuing => {}
                GateEvent::Paused { utterance } => {
                    tracing::debug!(
                        "pause detected, utterance of {:.2}s",
                        utterance.duration_secs()
                    );
                    state.pending = Some(utterance);
                }
            }
        }
    }

    /// Whether a turn just finished; reading clears the flag
    pub(crate) fn take_completed(&self) -> bool {
        let mut state = self.state.lock();
        std::mem::take(&mut state.completed)
    }

    /// Outbound poll: delivers cancelled-turn tails, starts pending turns,
    /// then relays the running turn's next item.
    pub(crate) async fn emit(&self, ctx: &Arc<HandlerContext>) -> Result<Option<EmitItem>> {
        if let Some(item) = self.poll_finishing_tail() {
            return Ok(Some(item));
        }

        if let Some(utterance) = self.take_pending() {
            ctx.send(ControlMsg::PauseDetected);
            if self.wait_for_input && !ctx.args_ready() {
                ctx.wait_for_args().await;
            }
            let snapshot = ctx.snapshot();
            let args: Vec<Value> = snapshot.into_iter().skip(1).collect();
            self.start_turn(ctx, utterance, args);
        }

        let mut state = self.state.lock();
        let Some(turn) = state.turn.as_mut() else {
            return Ok(None);
        };
        let Some(rx) = turn.rx.as_mut() else {
            return Ok(None);
        };

        match rx.try_recv() {
            Ok(item) => {
                let announce = matches!(
                    item,
                    EmitItem::Audio(_) | EmitItem::AudioWithOutputs(_, _)
                ) && !turn.first_audio_sent;
                if announce {
                    turn.first_audio_sent = true;
                }
                drop(state);
                if announce {
                    ctx.send(ControlMsg::ResponseStarting);
                }
                Ok(Some(item))
            }
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                // generator finished and every yield was delivered
                let announced = turn.first_audio_sent;
                let errored = turn.errored.load(Ordering::Acquire);
                state.turn = None;
                state.engine = EngineState::Listening;
                state.completed = true;
                drop(state);
                if !announced && !errored {
                    ctx.send(ControlMsg::ResponseStarting);
                }
                if self.wait_for_input {
                    ctx.reset_args();
                }
                Ok(None)
            }
        }
    }

    /// Cancel any running turn; used by teardown. Emits one truncation
    /// warning when a reply was cut off.
    pub(crate) fn cancel_active(&self) {
        let mut state = self.state.lock();
        let was_responding = state.turn.is_some();
        if let Some(turn) = state.turn.take() {
            turn.token.cancel();
        }
        state.pending = None;
        state.finishing = None;
        state.engine = EngineState::Listening;
        drop(state);

        if was_responding {
            if let Some(ctx) = self.ctx.lock().as_ref() {
                ctx.send(ControlMsg::Warning(
                    "stream ended mid-response, reply truncated".into(),
                ));
            }
        }
    }

    fn take_pending(&self) -> Option<AudioFrame> {
        let mut state = self.state.lock();
        if state.turn.is_some() {
            return None;
        }
        state.pending.take()
    }

    fn poll_finishing_tail(&self) -> Option<EmitItem> {
        let mut state = self.state.lock();
        let rx = state.finishing.as_mut()?;
        match rx.try_recv() {
            Ok(Some(frame)) => {
                state.finishing = None;
                Some(EmitItem::Audio(frame))
            }
            Ok(None) | Err(oneshot::error::TryRecvError::Closed) => {
                state.finishing = None;
                None
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
        }
    }

    /// Drop the turn: cancel its token, close its channel (unblocking the
    /// worker) and keep the tail receiver for the silence-padded frame.
    fn barge_in(state: &mut CoreState) {
        if let Some(mut turn) = state.turn.take() {
            turn.token.cancel();
            turn.rx = None;
            state.finishing = turn.tail_rx.take();
        }
    }

    fn start_turn(&self, ctx: &Arc<HandlerContext>, utterance: AudioFrame, args: Vec<Value>) {
        let spec = self.spec;
        let capacity = (spec.output_sample_rate as usize / spec.output_frame_samples.max(1)).max(1);
        let (tx, rx) = mpsc::channel::<EmitItem>(capacity);
        let (tail_tx, tail_rx) = oneshot::channel();
        let token = ctx.child_token();
        let errored = Arc::new(AtomicBool::new(false));

        let reply = self.reply.clone();
        let worker = TurnWorker {
            reply,
            spec,
            tx,
            tail_tx,
            token: token.clone(),
            ctx: ctx.clone(),
            errored: errored.clone(),
        };
        tokio::task::spawn_blocking(move || worker.run(utterance, args));

        let mut state = self.state.lock();
        state.turn = Some(Turn {
            rx: Some(rx),
            tail_rx: Some(tail_rx),
            token,
            first_audio_sent: false,
            errored,
        });
        state.engine = EngineState::Responding;
    }
}

/// Blocking-pool body of one turn
struct TurnWorker {
    reply: ReplyFn,
    spec: HandlerSpec,
    tx: mpsc::Sender<EmitItem>,
    tail_tx: oneshot::Sender<Option<AudioFrame>>,
    token: CancellationToken,
    ctx: Arc<HandlerContext>,
    errored: Arc<AtomicBool>,
}

impl TurnWorker {
    fn run(self, utterance: AudioFrame, args: Vec<Value>) {
        let TurnWorker {
            reply,
            spec,
            tx,
            tail_tx,
            token,
            ctx,
            errored,
        } = self;
        let mut codec = OutboundCodec::new(
            spec.output_sample_rate,
            Channels::Mono,
            spec.output_frame_samples,
        );

        let mut generator = match catch_unwind(AssertUnwindSafe(|| reply(utterance, args))) {
            Ok(generator) => generator,
            Err(_) => {
                errored.store(true, Ordering::Release);
                ctx.send(ControlMsg::Error("reply generator panicked".into()));
                let _ = tail_tx.send(None);
                return;
            }
        };

        loop {
            if token.is_cancelled() {
                let _ = tail_tx.send(codec.cut());
                return;
            }

            let next = catch_unwind(AssertUnwindSafe(|| generator.next()));
            match next {
                Err(_) => {
                    errored.store(true, Ordering::Release);
                    ctx.send(ControlMsg::Error("reply generator panicked".into()));
                    break;
                }
                Ok(None) => {
                    // flush the re-framer tail on normal completion
                    if let Ok(frames) = codec.flush() {
                        for frame in frames {
                            if tx.blocking_send(EmitItem::Audio(frame)).is_err() {
                                let _ = tail_tx.send(codec.cut());
                                return;
                            }
                        }
                    }
                    break;
                }
                Ok(Some(Err(message))) => {
                    tracing::debug!("reply generator error: {}", message);
                    errored.store(true, Ordering::Release);
                    ctx.send(ControlMsg::Error(message));
                    break;
                }
                Ok(Some(Ok(item))) => {
                    let sent = match item {
                        ReplyItem::Audio(frame) => Self::send_audio(&mut codec, &tx, frame),
                        ReplyItem::AudioWithOutputs(frame, outputs) => {
                            tx.blocking_send(EmitItem::Outputs(outputs)).is_ok()
                                && Self::send_audio(&mut codec, &tx, frame)
                        }
                        ReplyItem::Outputs(outputs) => {
                            tx.blocking_send(EmitItem::Outputs(outputs)).is_ok()
                        }
                        ReplyItem::Video(frame) => {
                            tx.blocking_send(EmitItem::Video(frame)).is_ok()
                        }
                    };
                    if !sent {
                        // receiver dropped: barge-in or teardown
                        let _ = tail_tx.send(codec.cut());
                        return;
                    }
                }
            }
        }

        let _ = tail_tx.send(None);
    }

    fn send_audio(codec: &mut OutboundCodec, tx: &mpsc::Sender<EmitItem>, frame: AudioFrame) -> bool {
        match codec.push(&frame) {
            Ok(frames) => {
                for frame in frames {
                    if tx.blocking_send(EmitItem::Audio(frame)).is_err() {
                        return false;
                    }
                }
                true
            }
            Err(e) => {
                tracing::warn!("outbound re-framing failed: {}", e);
                false
            }
        }
    }
}
