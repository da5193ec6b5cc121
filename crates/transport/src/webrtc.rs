//! WebRTC peer transport
//!
//! Negotiates one peer connection per session, plumbs Opus audio between
//! the peer and the handler runtime, relays video RTP, and carries the
//! control channel on the `text` data channel. Raw-frame video handlers
//! are driven by embedders directly; the transport relays encoded video
//! without transcoding.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use voicebridge_codec::{InboundCodec, OpusDecoder, OpusEncoder, OutboundCodec};
use voicebridge_config::{QueueConfig, StreamConfig, StreamMode};
use voicebridge_core::{AudioFrame, Channels, ControlMsg};
use voicebridge_pipeline::EmitItem;

use crate::control::QueuedControl;
use crate::pumps::{FrameQueue, SessionIo};
use crate::{Result, TransportError};

/// Peer acceptance deadline; past it the watchdog closes the session
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Clock rate of the negotiated Opus tracks
const OPUS_RATE: u32 = 48000;
/// 20 ms at the Opus clock rate
const OPUS_FRAME: usize = 960;

/// Signalling body of `POST /webrtc/offer`
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SessionOffer {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub webrtc_id: String,
}

/// Shared WebRTC API instance (media engine + interceptors)
pub struct RtcApi {
    api: API,
}

impl RtcApi {
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::NegotiationFailed(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::NegotiationFailed(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }

    /// Accept an SDP offer and wire the session's pumps.
    ///
    /// Returns once the answer is ready; media flows on background tasks
    /// until the session token is cancelled or the peer goes away.
    pub async fn connect(
        &self,
        offer: &SessionOffer,
        io: SessionIo,
        stream: &StreamConfig,
        queues: &QueueConfig,
    ) -> Result<WebRtcSession> {
        let config = RTCConfiguration {
            ice_servers: stream
                .rtc
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ice_transport_policy: match stream.rtc.ice_transport_policy.as_str() {
                "relay" => RTCIceTransportPolicy::Relay,
                _ => RTCIceTransportPolicy::All,
            },
            ..Default::default()
        };

        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?,
        );

        // session teardown closes the peer connection
        {
            let pc = pc.clone();
            let cancel = io.cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                let _ = pc.close().await;
            });
        }

        let (connected_tx, connected_rx) = watch::channel(false);
        {
            let cancel = io.cancel.clone();
            pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                tracing::debug!("peer connection state: {}", state);
                match state {
                    RTCPeerConnectionState::Connected => {
                        let _ = connected_tx.send(true);
                    }
                    RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Closed
                    | RTCPeerConnectionState::Disconnected => {
                        cancel.cancel();
                    }
                    _ => {}
                }
                Box::pin(async {})
            }));
        }

        // inbound frame queue and its receive loop
        let queue = Arc::new(FrameQueue::new(queues.inbound_capacity));
        {
            let io = io.clone();
            let queue = queue.clone();
            tokio::spawn(async move { io.run_receive_loop(queue).await });
        }

        // outbound tracks
        let audio_track = if stream.mode != StreamMode::Send && stream.modality.has_audio() {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: OPUS_RATE,
                    channels: 1,
                    ..Default::default()
                },
                "audio".to_owned(),
                format!("voicebridge-{}", offer.webrtc_id),
            ));
            let sender = pc
                .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| TransportError::NegotiationFailed(e.to_string()))?;
            // drain RTCP so the interceptors keep running
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while let Ok((_, _)) = sender.read(&mut buf).await {}
            });
            Some(track)
        } else {
            None
        };

        let video_track = if stream.mode == StreamMode::SendReceive && stream.modality.has_video()
        {
            let track = Arc::new(TrackLocalStaticRTP::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                "video".to_owned(),
                format!("voicebridge-{}", offer.webrtc_id),
            ));
            let sender = pc
                .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| TransportError::NegotiationFailed(e.to_string()))?;
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while let Ok((_, _)) = sender.read(&mut buf).await {}
            });
            Some(track)
        } else {
            None
        };

        // inbound media
        {
            let io = io.clone();
            let queue = queue.clone();
            let spec = io.handler.spec();
            pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let io = io.clone();
                let queue = queue.clone();
                let video_out = video_track.clone();
                Box::pin(async move {
                    if track.kind() == RTPCodecType::Audio {
                        tokio::spawn(inbound_audio_pump(track, io, queue, spec));
                    } else {
                        tokio::spawn(inbound_video_relay(track, io, video_out));
                    }
                })
            }));
        }

        // control channel rides the client-created `text` data channel
        {
            let io = io.clone();
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let io = io.clone();
                Box::pin(async move {
                    tracing::debug!("data channel established: {}", dc.label());
                    wire_data_channel(dc, io);
                })
            }));
        }

        // outbound audio pump
        if let Some(track) = audio_track {
            let io = io.clone();
            tokio::spawn(async move { outbound_audio_pump(track, io).await });
        }

        // start the handler
        {
            let io = io.clone();
            tokio::spawn(async move {
                if let Err(e) = io.handler.start_up(io.ctx.clone()).await {
                    tracing::warn!("handler start_up failed: {}", e);
                    io.ctx.send(ControlMsg::Error(e.to_string()));
                }
            });
        }

        // negotiate
        let remote = RTCSessionDescription::offer(offer.sdp.clone())
            .map_err(|e| TransportError::NegotiationFailed(e.to_string()))?;
        pc.set_remote_description(remote)
            .await
            .map_err(|e| TransportError::NegotiationFailed(e.to_string()))?;
        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::NegotiationFailed(e.to_string()))?;
        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(answer)
            .await
            .map_err(|e| TransportError::NegotiationFailed(e.to_string()))?;

        if tokio::time::timeout(CONNECT_TIMEOUT, gather_complete.recv())
            .await
            .is_err()
        {
            io.ctx.send(ControlMsg::ConnectionTimeout);
            io.cancel.cancel();
            let _ = pc.close().await;
            return Err(TransportError::Timeout("ICE gathering".into()));
        }

        let answer = pc
            .local_description()
            .await
            .ok_or_else(|| TransportError::NegotiationFailed("no local description".into()))?;

        // the peer has CONNECT_TIMEOUT to actually connect
        {
            let io = io.clone();
            let mut connected = connected_rx;
            let watchdog_pc = pc.clone();
            tokio::spawn(async move {
                let deadline = tokio::time::sleep(CONNECT_TIMEOUT);
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        _ = &mut deadline => {
                            if !*connected.borrow() {
                                tracing::debug!("peer never connected, closing");
                                io.ctx.send(ControlMsg::ConnectionTimeout);
                                io.cancel.cancel();
                                let _ = watchdog_pc.close().await;
                            }
                            return;
                        }
                        changed = connected.changed() => {
                            if changed.is_err() || *connected.borrow() {
                                return;
                            }
                        }
                    }
                }
            });
        }

        Ok(WebRtcSession { pc, answer })
    }
}

/// One negotiated peer connection
pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    pub answer: RTCSessionDescription,
}

impl WebRtcSession {
    pub async fn close(&self) {
        let _ = self.pc.close().await;
    }
}

/// Decode inbound Opus, normalize, feed the frame queue
async fn inbound_audio_pump(
    track: Arc<TrackRemote>,
    io: SessionIo,
    queue: Arc<FrameQueue>,
    spec: voicebridge_pipeline::HandlerSpec,
) {
    // browsers negotiate opus/48000/2 regardless of capture layout
    let decoder = match OpusDecoder::new(OPUS_RATE, 2) {
        Ok(decoder) => decoder,
        Err(e) => {
            tracing::warn!("opus decoder init failed: {}", e);
            io.ctx.send(ControlMsg::Error(e.to_string()));
            return;
        }
    };
    let mut codec = InboundCodec::new(spec.input_sample_rate, spec.expected_layout);

    loop {
        let packet = tokio::select! {
            _ = io.cancel.cancelled() => break,
            result = track.read_rtp() => match result {
                Ok((packet, _)) => packet,
                Err(e) => {
                    tracing::debug!("inbound track ended: {}", e);
                    break;
                }
            },
        };
        if packet.payload.is_empty() {
            continue;
        }

        let samples = match decoder.decode(&packet.payload) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::debug!("dropping undecodable frame: {}", e);
                io.ctx.send(ControlMsg::Error(format!("bad media frame: {}", e)));
                continue;
            }
        };
        let frame = match AudioFrame::new(OPUS_RATE, Channels::Stereo, samples) {
            Ok(frame) => frame,
            Err(e) => {
                io.ctx.send(ControlMsg::Error(format!("bad media frame: {}", e)));
                continue;
            }
        };

        match codec.push(&frame) {
            Ok(outcome) => {
                if outcome.rate_changed {
                    io.ctx.send(ControlMsg::Warning(
                        "inbound sample rate changed, codec re-initialized".into(),
                    ));
                }
                if let Some(frame) = outcome.frame {
                    io.enqueue_frame(&queue, frame);
                }
            }
            Err(e) => {
                io.ctx.send(ControlMsg::Error(format!("bad media frame: {}", e)));
            }
        }
    }
}

/// Forward inbound video RTP to the outbound track without transcoding
async fn inbound_video_relay(
    track: Arc<TrackRemote>,
    io: SessionIo,
    out: Option<Arc<TrackLocalStaticRTP>>,
) {
    loop {
        let packet = tokio::select! {
            _ = io.cancel.cancelled() => break,
            result = track.read_rtp() => match result {
                Ok((packet, _)) => packet,
                Err(e) => {
                    tracing::debug!("inbound video track ended: {}", e);
                    break;
                }
            },
        };
        if let Some(out) = &out {
            if let Err(e) = out.write_rtp(&packet).await {
                tracing::debug!("video relay write failed: {}", e);
                break;
            }
        }
    }
}

/// Re-frame handler output to 20 ms Opus samples and pace them out
async fn outbound_audio_pump(track: Arc<TrackLocalStaticSample>, io: SessionIo) {
    let encoder = match OpusEncoder::new(OPUS_RATE, 1) {
        Ok(encoder) => encoder,
        Err(e) => {
            tracing::warn!("opus encoder init failed: {}", e);
            io.ctx.send(ControlMsg::Error(e.to_string()));
            return;
        }
    };
    let mut codec = OutboundCodec::new(OPUS_RATE, Channels::Mono, OPUS_FRAME);
    let mut pacer = tokio::time::interval(Duration::from_millis(20));
    pacer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while let Some(item) = io.next_outbound().await {
        let frame = match item {
            EmitItem::Audio(frame) => frame,
            EmitItem::Video(_) => {
                tracing::trace!("video emit has no encoder on the webrtc path, skipping");
                continue;
            }
            // next_outbound already routed the output variants
            _ => continue,
        };
        let frames = match codec.push(&frame) {
            Ok(frames) => frames,
            Err(e) => {
                io.ctx.send(ControlMsg::Error(format!("bad outbound frame: {}", e)));
                continue;
            }
        };
        for frame in frames {
            pacer.tick().await;
            if !write_opus(&track, &encoder, &frame, &io).await {
                return;
            }
        }
    }

    // session end: flush the carried tail, zero padded
    if let Ok(frames) = codec.flush() {
        for frame in frames {
            pacer.tick().await;
            if !write_opus(&track, &encoder, &frame, &io).await {
                return;
            }
        }
    }
}

async fn write_opus(
    track: &TrackLocalStaticSample,
    encoder: &OpusEncoder,
    frame: &AudioFrame,
    io: &SessionIo,
) -> bool {
    let payload = match encoder.encode(&frame.samples) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("opus encode failed: {}", e);
            return true;
        }
    };
    let sample = Sample {
        data: payload.into(),
        duration: Duration::from_millis(20),
        ..Default::default()
    };
    if let Err(e) = track.write_sample(&sample).await {
        tracing::debug!("outbound track write failed: {}", e);
        return !io.cancel.is_cancelled();
    }
    true
}

/// Attach the control channel to a fresh data channel
fn wire_data_channel(dc: Arc<RTCDataChannel>, io: SessionIo) {
    let (control, mut rx) = QueuedControl::new();
    io.ctx.set_control(Arc::new(control));

    {
        let dc = dc.clone();
        let cancel = io.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = dc.send_text(msg).await {
                            tracing::debug!("data channel send failed: {}", e);
                            break;
                        }
                    }
                }
            }
        });
    }

    let ctx = io.ctx.clone();
    dc.on_message(Box::new(move |msg| {
        let text = String::from_utf8_lossy(&msg.data).to_string();
        tracing::debug!("data channel message: {}", text);
        ctx.send(ControlMsg::Log(format!("Server received: {}", text)));
        Box::pin(async {})
    }));
}
