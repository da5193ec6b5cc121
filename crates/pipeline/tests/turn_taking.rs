//! End-to-end tests of the reply engines against deterministic models

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use voicebridge_core::{AudioFrame, ControlMsg, ControlSender};
use voicebridge_pipeline::{
    EmitItem, HandlerContext, ReplyItem, ReplyOnPause, ReplyOnStopwords, StreamHandler,
};
use voicebridge_vad::{EnergyScorer, SpeechToText};

/// Control sink recording every message in order
#[derive(Default)]
struct Recorder {
    messages: Mutex<Vec<ControlMsg>>,
}

impl Recorder {
    fn kinds(&self) -> Vec<&'static str> {
        self.messages.lock().iter().map(|m| m.kind()).collect()
    }

    fn position(&self, kind: &str) -> Option<usize> {
        self.messages.lock().iter().position(|m| m.kind() == kind)
    }
}

impl ControlSender for Recorder {
    fn send(&self, msg: ControlMsg) {
        self.messages.lock().push(msg);
    }
}

/// STT stub whose transcript is swapped by the test
struct ScriptedStt {
    text: Mutex<String>,
}

impl ScriptedStt {
    fn new(text: &str) -> Self {
        Self {
            text: Mutex::new(text.to_string()),
        }
    }

    fn set(&self, text: &str) {
        *self.text.lock() = text.to_string();
    }
}

impl SpeechToText for ScriptedStt {
    fn transcribe(&self, _rate: u32, _audio: &[f32]) -> voicebridge_vad::Result<String> {
        Ok(self.text.lock().clone())
    }
}

fn speech_frame(ms: usize) -> AudioFrame {
    let samples = (0..16 * ms)
        .map(|i| ((i as f32 * 0.3).sin() * 12000.0) as i16)
        .collect();
    AudioFrame::mono(16000, samples)
}

fn silence_frame(ms: usize) -> AudioFrame {
    AudioFrame::mono(16000, vec![0; 16 * ms])
}

/// Reply generator yielding `frames` marker frames per invocation, with a
/// per-invocation marker value so turns are distinguishable.
fn marker_reply(
    frames: usize,
    invocations: Arc<AtomicUsize>,
) -> voicebridge_pipeline::ReplyFn {
    Arc::new(move |_utterance: AudioFrame, _args: Vec<Value>| {
        let marker = (invocations.fetch_add(1, Ordering::SeqCst) + 1) as i16 * 11;
        Box::new(
            (0..frames).map(move |_| Ok(ReplyItem::Audio(AudioFrame::mono(24000, vec![marker; 480])))),
        )
    })
}

/// Poll `emit` for up to `budget`, collecting every delivered item
async fn drain(
    handler: &dyn StreamHandler,
    ctx: &Arc<HandlerContext>,
    budget: Duration,
) -> Vec<EmitItem> {
    let mut items = Vec::new();
    let deadline = tokio::time::Instant::now() + budget;
    while tokio::time::Instant::now() < deadline {
        match handler.emit(ctx.clone()).await.unwrap() {
            Some(item) => items.push(item),
            None => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    items
}

fn audio_markers(items: &[EmitItem]) -> Vec<i16> {
    items
        .iter()
        .filter_map(|item| match item {
            EmitItem::Audio(frame) => Some(frame.samples[0]),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn reply_on_pause_single_turn() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let handler = ReplyOnPause::new(
        marker_reply(2, invocations.clone()),
        Arc::new(EnergyScorer::default()),
    );
    let recorder = Arc::new(Recorder::default());
    let ctx = Arc::new(HandlerContext::new());
    ctx.set_control(recorder.clone());
    handler.start_up(ctx.clone()).await.unwrap();

    handler.receive(ctx.clone(), silence_frame(300)).await.unwrap();
    handler.receive(ctx.clone(), speech_frame(800)).await.unwrap();
    handler.receive(ctx.clone(), silence_frame(700)).await.unwrap();

    let items = drain(&handler, &ctx, Duration::from_millis(500)).await;

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    let markers = audio_markers(&items);
    assert_eq!(markers, vec![11, 11], "expected exactly two output frames");

    // ordering: pause_detected strictly before response_starting
    let pause = recorder.position("pause_detected").expect("pause_detected sent");
    let starting = recorder
        .position("response_starting")
        .expect("response_starting sent");
    assert!(pause < starting, "controls out of order: {:?}", recorder.kinds());

    // engine is back to listening: a new utterance produces a second turn
    handler.receive(ctx.clone(), speech_frame(800)).await.unwrap();
    handler.receive(ctx.clone(), silence_frame(1300)).await.unwrap();
    let items = drain(&handler, &ctx, Duration::from_millis(500)).await;
    assert_eq!(audio_markers(&items), vec![22, 22]);
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn barge_in_cancels_running_reply() {
    let invocations = Arc::new(AtomicUsize::new(0));
    // long reply so the generator is still running when the user interrupts
    let handler = ReplyOnPause::new(
        marker_reply(200, invocations.clone()),
        Arc::new(EnergyScorer::default()),
    );
    let recorder = Arc::new(Recorder::default());
    let ctx = Arc::new(HandlerContext::new());
    ctx.set_control(recorder.clone());
    handler.start_up(ctx.clone()).await.unwrap();

    handler.receive(ctx.clone(), silence_frame(300)).await.unwrap();
    handler.receive(ctx.clone(), speech_frame(800)).await.unwrap();
    handler.receive(ctx.clone(), silence_frame(700)).await.unwrap();

    // pull a few frames of the first reply
    let mut first_turn_frames = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while first_turn_frames < 3 && tokio::time::Instant::now() < deadline {
        match handler.emit(ctx.clone()).await.unwrap() {
            Some(EmitItem::Audio(_)) => first_turn_frames += 1,
            Some(_) => {}
            None => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    assert_eq!(first_turn_frames, 3);

    // barge in with a fresh speech burst
    handler.receive(ctx.clone(), speech_frame(800)).await.unwrap();

    // at most one more frame of the first turn (the padded re-framer tail)
    let stragglers = drain(&handler, &ctx, Duration::from_millis(300)).await;
    let old_markers: Vec<i16> = audio_markers(&stragglers)
        .into_iter()
        .filter(|&m| m == 11)
        .collect();
    assert!(
        old_markers.len() <= 1,
        "{} frames leaked past the barge-in",
        old_markers.len()
    );

    // finish the new utterance; the second turn streams normally
    handler.receive(ctx.clone(), silence_frame(1300)).await.unwrap();
    let items = drain(&handler, &ctx, Duration::from_secs(2)).await;
    let markers = audio_markers(&items);
    assert!(markers.contains(&22), "second turn never produced audio");
    assert!(
        !markers.contains(&11),
        "first turn yields delivered after barge-in"
    );
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn stopword_gates_invocation() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let stt = Arc::new(ScriptedStt::new("just rambling along"));
    let handler = ReplyOnStopwords::new(
        marker_reply(1, invocations.clone()),
        Arc::new(EnergyScorer::default()),
        stt.clone(),
        vec!["computer".to_string()],
    );
    let recorder = Arc::new(Recorder::default());
    let ctx = Arc::new(HandlerContext::new());
    ctx.set_control(recorder.clone());
    handler.start_up(ctx.clone()).await.unwrap();

    // two seconds of speech without the word: no invocation
    handler.receive(ctx.clone(), speech_frame(2000)).await.unwrap();
    handler.receive(ctx.clone(), silence_frame(700)).await.unwrap();
    let items = drain(&handler, &ctx, Duration::from_millis(300)).await;
    assert!(items.is_empty());
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert!(recorder.position("stopword").is_none());

    // now the transcript contains the stopword
    stt.set("hey computer please");
    handler.receive(ctx.clone(), speech_frame(2000)).await.unwrap();
    handler.receive(ctx.clone(), silence_frame(1300)).await.unwrap();

    let items = drain(&handler, &ctx, Duration::from_millis(500)).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(audio_markers(&items), vec![11]);

    {
        let messages = recorder.messages.lock();
        let stopword = messages
            .iter()
            .find(|m| m.kind() == "stopword")
            .expect("stopword control sent");
        assert_eq!(*stopword, ControlMsg::Stopword("computer".to_string()));
    }

    // stopword precedes the utterance handoff (pause_detected)
    let sw = recorder.position("stopword").unwrap();
    let pause = recorder.position("pause_detected").unwrap();
    assert!(sw < pause);
}

#[tokio::test(flavor = "multi_thread")]
async fn input_snapshot_visible_to_next_invocation() {
    let seen: Arc<Mutex<Vec<Vec<Value>>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_reply = seen.clone();
    let reply: voicebridge_pipeline::ReplyFn = Arc::new(move |_utterance, args| {
        seen_in_reply.lock().push(args.clone());
        Box::new(std::iter::once(Ok(ReplyItem::Outputs(
            voicebridge_core::AdditionalOutputs::new(args),
        ))))
    });
    let handler = ReplyOnPause::new(reply, Arc::new(EnergyScorer::default()));
    let ctx = Arc::new(HandlerContext::new());
    handler.start_up(ctx.clone()).await.unwrap();

    // first turn before any input is posted
    handler.receive(ctx.clone(), speech_frame(800)).await.unwrap();
    handler.receive(ctx.clone(), silence_frame(1000)).await.unwrap();
    drain(&handler, &ctx, Duration::from_millis(300)).await;
    assert_eq!(seen.lock().len(), 1);
    assert!(seen.lock()[0].is_empty());

    // the input hook posts a value; the NEXT invocation observes it
    ctx.set_args(vec![json!(0.7)]);
    handler.receive(ctx.clone(), speech_frame(800)).await.unwrap();
    handler.receive(ctx.clone(), silence_frame(1300)).await.unwrap();
    let items = drain(&handler, &ctx, Duration::from_millis(300)).await;

    assert_eq!(seen.lock().len(), 2);
    assert_eq!(seen.lock()[1], vec![json!(0.7)]);
    match items.iter().find(|i| matches!(i, EmitItem::Outputs(_))) {
        Some(EmitItem::Outputs(outputs)) => assert_eq!(outputs.args(), &[json!(0.7)]),
        other => panic!("expected outputs item, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn generator_error_returns_engine_to_listening() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let reply: voicebridge_pipeline::ReplyFn = Arc::new(move |_utterance, _args| {
        let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
        if first {
            Box::new(std::iter::once(Err("user code exploded".to_string())))
                as voicebridge_pipeline::engine::ReplyIter
        } else {
            Box::new(std::iter::once(Ok(ReplyItem::Audio(AudioFrame::mono(
                24000,
                vec![5; 480],
            )))))
        }
    });
    let handler = ReplyOnPause::new(reply, Arc::new(EnergyScorer::default()));
    let recorder = Arc::new(Recorder::default());
    let ctx = Arc::new(HandlerContext::new());
    ctx.set_control(recorder.clone());
    handler.start_up(ctx.clone()).await.unwrap();

    handler.receive(ctx.clone(), speech_frame(800)).await.unwrap();
    handler.receive(ctx.clone(), silence_frame(1000)).await.unwrap();
    drain(&handler, &ctx, Duration::from_millis(300)).await;

    assert!(recorder.position("error").is_some(), "error control sent");

    // session stays live: a second utterance still gets a reply
    handler.receive(ctx.clone(), speech_frame(800)).await.unwrap();
    handler.receive(ctx.clone(), silence_frame(1300)).await.unwrap();
    let items = drain(&handler, &ctx, Duration::from_millis(500)).await;
    assert_eq!(audio_markers(&items), vec![5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn phone_mode_wait_for_args_returns_immediately() {
    let ctx = Arc::new(HandlerContext::new());
    ctx.set_phone_mode(true);

    // must not deadlock even though no input hook will ever be called
    let waited = tokio::time::timeout(Duration::from_millis(100), ctx.wait_for_args()).await;
    assert!(waited.is_ok());
    assert_eq!(ctx.snapshot(), vec![Value::Null]);

    let blocking_ctx = ctx.clone();
    let join = tokio::task::spawn_blocking(move || blocking_ctx.wait_for_args_blocking());
    tokio::time::timeout(Duration::from_millis(100), join)
        .await
        .expect("blocking wait returned")
        .unwrap();
}
