//! WebSocket media transport
//!
//! Audio-only send-receive framing used by browsers without WebRTC and by
//! the telephone bridge: the client sends `{"event":"start"}` with its
//! stream id, then a stream of base64 mu-law 8 kHz `media` events, and a
//! terminating `stop`. Control messages ride the same socket as JSON text
//! frames. In phone mode the stream id is the provider's `streamSid` and
//! outbound audio is transcoded back to 8 kHz mu-law.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voicebridge_codec::{mulaw_decode, mulaw_encode, InboundCodec, OutboundCodec};
use voicebridge_config::QueueConfig;
use voicebridge_core::{AudioFrame, Channels, ControlMsg};
use voicebridge_pipeline::{EmitItem, HandlerContext, OutputQueue, StreamHandler};

use crate::control::QueuedControl;
use crate::pumps::{FrameQueue, SessionIo};

/// Telephone-network sample rate
pub const MULAW_RATE: u32 = 8000;

/// Writer queue capacity (media + control frames)
const WRITER_QUEUE: usize = 256;

/// Registration outcome for a `start` event: the session's output queue,
/// or the rejection payload to send before closing.
pub type RegisterFn = Arc<
    dyn Fn(&str, Arc<HandlerContext>, CancellationToken) -> std::result::Result<Arc<OutputQueue>, Value>
        + Send
        + Sync,
>;

/// Session teardown keyed by stream id
pub type CleanupFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything one WebSocket session needs from the host
pub struct WebSocketDeps {
    pub handler: Arc<dyn StreamHandler>,
    pub ctx: Arc<HandlerContext>,
    pub cancel: CancellationToken,
    pub queues: QueueConfig,
    pub phone_mode: bool,
    pub register: RegisterFn,
    pub cleanup: CleanupFn,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum WsEvent {
    Start {
        websocket_id: Option<String>,
        #[serde(rename = "streamSid")]
        stream_sid: Option<String>,
    },
    Media {
        media: MediaPayload,
    },
    Stop,
    Ping,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    payload: String,
}

/// Drive one WebSocket session to completion
pub async fn run_websocket(socket: WebSocket, deps: WebSocketDeps) {
    let (mut sink, mut stream) = socket.split();

    // single writer task; everything outbound funnels through it
    let (writer_tx, mut writer_rx) = mpsc::channel::<Message>(WRITER_QUEUE);
    let writer = tokio::spawn(async move {
        while let Some(msg) = writer_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // control messages become text frames on the same socket
    {
        let (control, mut control_rx) = QueuedControl::new();
        deps.ctx.set_control(Arc::new(control));
        let writer_tx = writer_tx.clone();
        let cancel = deps.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = control_rx.recv() => {
                        let Some(msg) = msg else { break };
                        if writer_tx.send(Message::Text(msg)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    deps.ctx.set_phone_mode(deps.phone_mode);

    let spec = deps.handler.spec();
    let mut inbound = InboundCodec::new(spec.input_sample_rate, spec.expected_layout);
    let queue = Arc::new(FrameQueue::new(deps.queues.inbound_capacity));

    let mut stream_id: Option<String> = None;
    let mut io: Option<SessionIo> = None;

    // start the handler
    {
        let handler = deps.handler.clone();
        let ctx = deps.ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.start_up(ctx.clone()).await {
                tracing::warn!("handler start_up failed: {}", e);
                ctx.send(ControlMsg::Error(e.to_string()));
            }
        });
    }

    loop {
        let message = tokio::select! {
            _ = deps.cancel.cancelled() => break,
            message = stream.next() => message,
        };
        let Some(Ok(message)) = message else { break };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let event: WsEvent = match serde_json::from_str(&text) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("unparseable websocket event: {}", e);
                deps.ctx
                    .send(ControlMsg::Error(format!("invalid message: {}", e)));
                continue;
            }
        };

        match event {
            WsEvent::Start {
                websocket_id,
                stream_sid,
            } => {
                let id = if deps.phone_mode {
                    stream_sid.or(websocket_id)
                } else {
                    websocket_id.or(stream_sid)
                };
                let Some(id) = id else {
                    deps.ctx
                        .send(ControlMsg::Error("start event without a stream id".into()));
                    continue;
                };

                match (deps.register)(&id, deps.ctx.clone(), deps.cancel.clone()) {
                    Ok(outputs) => {
                        let session = SessionIo {
                            handler: deps.handler.clone(),
                            ctx: deps.ctx.clone(),
                            outputs,
                            cancel: deps.cancel.clone(),
                        };
                        {
                            let session = session.clone();
                            let queue = queue.clone();
                            tokio::spawn(async move { session.run_receive_loop(queue).await });
                        }
                        {
                            let session = session.clone();
                            let writer_tx = writer_tx.clone();
                            let phone = deps.phone_mode;
                            let sid = id.clone();
                            tokio::spawn(async move {
                                emit_loop(session, writer_tx, phone, sid).await;
                            });
                        }
                        stream_id = Some(id);
                        io = Some(session);
                    }
                    Err(rejection) => {
                        let _ = writer_tx.send(Message::Text(rejection.to_string())).await;
                        break;
                    }
                }
            }
            WsEvent::Media { media } => {
                let Some(session) = io.as_ref() else {
                    tracing::trace!("media before start, dropping");
                    continue;
                };
                let payload = match BASE64.decode(media.payload.as_bytes()) {
                    Ok(payload) => payload,
                    Err(e) => {
                        session
                            .ctx
                            .send(ControlMsg::Error(format!("bad media payload: {}", e)));
                        continue;
                    }
                };
                let samples = mulaw_decode(&payload);
                let frame = AudioFrame::mono(MULAW_RATE, samples);
                match inbound.push(&frame) {
                    Ok(outcome) => {
                        if let Some(frame) = outcome.frame {
                            session.enqueue_frame(&queue, frame);
                        }
                    }
                    Err(e) => {
                        session
                            .ctx
                            .send(ControlMsg::Error(format!("bad media frame: {}", e)));
                    }
                }
            }
            WsEvent::Stop => break,
            WsEvent::Ping => {
                let _ = writer_tx.send(Message::Text(json!({"event": "pong"}).to_string())).await;
            }
        }
    }

    deps.cancel.cancel();
    if let Some(id) = stream_id.as_deref() {
        (deps.cleanup)(id);
    }
    drop(writer_tx);
    let _ = writer.await;
}

/// Poll the handler and stream mu-law media events back to the peer
async fn emit_loop(
    io: SessionIo,
    writer_tx: mpsc::Sender<Message>,
    phone_mode: bool,
    stream_id: String,
) {
    let spec = io.handler.spec();
    let target_rate = if phone_mode {
        MULAW_RATE
    } else {
        spec.output_sample_rate
    };
    // 20ms frames toward the peer
    let frame_samples = (target_rate / 50).max(1) as usize;
    let mut codec = OutboundCodec::new(target_rate, Channels::Mono, frame_samples);
    let mut pacer = tokio::time::interval(std::time::Duration::from_millis(20));
    pacer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while let Some(item) = io.next_outbound().await {
        let frame = match item {
            EmitItem::Audio(frame) => frame,
            _ => continue,
        };
        let frames = match codec.push(&frame) {
            Ok(frames) => frames,
            Err(e) => {
                io.ctx
                    .send(ControlMsg::Error(format!("bad outbound frame: {}", e)));
                continue;
            }
        };
        for frame in frames {
            pacer.tick().await;
            if !send_media(&writer_tx, &frame, phone_mode, &stream_id).await {
                return;
            }
        }
    }

    if let Ok(frames) = codec.flush() {
        for frame in frames {
            pacer.tick().await;
            if !send_media(&writer_tx, &frame, phone_mode, &stream_id).await {
                return;
            }
        }
    }
}

async fn send_media(
    writer_tx: &mpsc::Sender<Message>,
    frame: &AudioFrame,
    phone_mode: bool,
    stream_id: &str,
) -> bool {
    let payload = BASE64.encode(mulaw_encode(&frame.samples));
    let mut event = json!({
        "event": "media",
        "media": { "payload": payload },
    });
    if phone_mode {
        event["streamSid"] = json!(stream_id);
    }
    writer_tx
        .send(Message::Text(event.to_string()))
        .await
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_event_parsing() {
        let start: WsEvent =
            serde_json::from_str(r#"{"event":"start","websocket_id":"abc123"}"#).unwrap();
        assert!(matches!(
            start,
            WsEvent::Start { websocket_id: Some(ref id), .. } if id == "abc123"
        ));

        let phone: WsEvent =
            serde_json::from_str(r#"{"event":"start","streamSid":"MZ123"}"#).unwrap();
        assert!(matches!(
            phone,
            WsEvent::Start { stream_sid: Some(ref sid), .. } if sid == "MZ123"
        ));

        let media: WsEvent =
            serde_json::from_str(r#"{"event":"media","media":{"payload":"AAAA"}}"#).unwrap();
        assert!(matches!(media, WsEvent::Media { .. }));

        assert!(matches!(
            serde_json::from_str::<WsEvent>(r#"{"event":"stop"}"#).unwrap(),
            WsEvent::Stop
        ));
    }

    #[test]
    fn test_media_payload_roundtrip() {
        let samples: Vec<i16> = (0..160).map(|i| i * 100).collect();
        let payload = BASE64.encode(mulaw_encode(&samples));
        let decoded = mulaw_decode(&BASE64.decode(payload.as_bytes()).unwrap());
        assert_eq!(decoded.len(), samples.len());
        // the transcode must stay within mu-law quantization error, not
        // merely preserve length
        for (&original, &restored) in samples.iter().zip(decoded.iter()) {
            let err = (restored as i32 - original as i32).abs();
            let bound = (original as i32).abs() / 16 + 64;
            assert!(
                err <= bound,
                "sample {} transcoded to {} (err {})",
                original,
                restored,
                err
            );
        }
    }
}
