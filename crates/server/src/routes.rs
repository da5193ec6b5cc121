//! HTTP endpoints
//!
//! Signalling, hooks, and the telephone bridge. Admission failures are the
//! only errors surfaced synchronously; once a session exists, everything
//! else flows through its control channel.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use voicebridge_config::IceServerConfig;
use voicebridge_pipeline::HandlerContext;
use voicebridge_transport::{run_websocket, SessionIo, SessionOffer, WebSocketDeps};

use crate::session::SessionState;
use crate::state::AppState;
use crate::ServerError;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let server = &state.settings.server;

    let mut router = Router::new()
        .route("/webrtc/offer", post(webrtc_offer))
        .route("/websocket/offer", get(websocket_offer))
        .route("/telephone/handler", get(telephone_handler))
        .route("/telephone/incoming", post(telephone_incoming))
        .route(&server.input_hook_path, post(input_hook))
        .route(&server.output_hook_path, get(output_hook))
        .route("/turn-credentials", get(turn_credentials))
        .route("/health", get(health_check));

    if !server.mount_prefix.is_empty() {
        let prefix = if server.mount_prefix.starts_with('/') {
            server.mount_prefix.clone()
        } else {
            format!("/{}", server.mount_prefix)
        };
        router = Router::new().nest(&prefix, router);
    }

    let mut router = router.layer(TraceLayer::new_for_http());
    if server.cors_enabled {
        let cors = if server.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = server
                .cors_origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            CorsLayer::new().allow_origin(origins)
        };
        router = router.layer(cors);
    }

    router.with_state(state)
}

/// Rejection body for a full server
fn concurrency_rejection(limit: usize) -> Value {
    json!({
        "status": "failed",
        "meta": {
            "error": "concurrency_limit_reached",
            "limit": limit,
        },
    })
}

/// WebRTC signalling: accept an SDP offer, answer it
async fn webrtc_offer(
    State(state): State<AppState>,
    Json(offer): Json<SessionOffer>,
) -> Json<Value> {
    let session = match state.sessions.admit(&offer.webrtc_id, &state.handler) {
        Ok(session) => session,
        Err(ServerError::ConcurrencyLimit(limit)) => {
            return Json(concurrency_rejection(limit));
        }
        Err(e) => {
            return Json(json!({
                "status": "failed",
                "meta": { "error": "negotiation_failed", "detail": e.to_string() },
            }));
        }
    };

    let io = SessionIo {
        handler: session.handler.clone(),
        ctx: session.ctx.clone(),
        outputs: session.outputs.clone(),
        cancel: session.cancel.clone(),
    };

    match state
        .rtc
        .connect(&offer, io, &state.settings.stream, &state.settings.queues)
        .await
    {
        Ok(rtc) => {
            session.set_state(SessionState::Active);
            Json(json!({
                "sdp": rtc.answer.sdp,
                "type": rtc.answer.sdp_type.to_string(),
                "webrtc_id": session.id,
            }))
        }
        Err(e) => {
            tracing::warn!("negotiation failed for {}: {}", session.id, e);
            state.sessions.remove(&session.id);
            Json(json!({
                "status": "failed",
                "meta": { "error": "negotiation_failed", "detail": e.to_string() },
            }))
        }
    }
}

/// Browser WebSocket media session (audio, send-receive)
async fn websocket_offer(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_ws_session(socket, state, false))
}

/// Telephone-provider WebSocket media session (mu-law both ways)
async fn telephone_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_ws_session(socket, state, true))
}

async fn run_ws_session(socket: axum::extract::ws::WebSocket, state: AppState, phone_mode: bool) {
    let handler = state.handler.copy();
    let cancel = CancellationToken::new();
    let ctx = Arc::new(HandlerContext::with_token(cancel.clone()));
    let registered = Arc::new(AtomicBool::new(false));

    let register = {
        let sessions = state.sessions.clone();
        let handler = handler.clone();
        let registered = registered.clone();
        Arc::new(
            move |id: &str, ctx: Arc<HandlerContext>, cancel: CancellationToken| {
                match sessions.admit_prepared(id, handler.clone(), ctx, cancel) {
                    Ok(session) => {
                        session.set_state(SessionState::Active);
                        registered.store(true, Ordering::SeqCst);
                        Ok(session.outputs.clone())
                    }
                    Err(ServerError::ConcurrencyLimit(limit)) => {
                        Err(concurrency_rejection(limit))
                    }
                    Err(e) => Err(json!({
                        "status": "failed",
                        "meta": { "error": "negotiation_failed", "detail": e.to_string() },
                    })),
                }
            },
        )
    };

    let cleanup = {
        let sessions = state.sessions.clone();
        Arc::new(move |id: &str| sessions.remove(id))
    };

    let deps = WebSocketDeps {
        handler: handler.clone(),
        ctx,
        cancel: cancel.clone(),
        queues: state.settings.queues.clone(),
        phone_mode,
        register,
        cleanup,
    };

    run_websocket(socket, deps).await;

    // the socket ended before a session was ever registered; release the
    // handler copy ourselves
    if !registered.load(Ordering::SeqCst) {
        cancel.cancel();
        handler.shutdown().await;
    }
}

/// Provider handoff document for an incoming call
async fn telephone_incoming(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    let prefix = &state.settings.server.mount_prefix;

    let document = format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
            "<Response>",
            "<Say>Connecting to the assistant.</Say>",
            "<Connect><Stream url=\"wss://{}{}/telephone/handler\"/></Connect>",
            "<Say>The call has been disconnected.</Say>",
            "</Response>",
        ),
        host, prefix
    );

    ([(header::CONTENT_TYPE, "application/xml")], document).into_response()
}

/// Replace a session's input snapshot
async fn input_hook(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let id = body
        .get("webrtc_id")
        .and_then(Value::as_str)
        .ok_or(StatusCode::BAD_REQUEST)?
        .to_string();

    // either an explicit `inputs` array, or the rest of the body as one value
    let values = match body.get("inputs") {
        Some(Value::Array(inputs)) => inputs.clone(),
        _ => {
            let mut rest = body.clone();
            if let Some(object) = rest.as_object_mut() {
                object.remove("webrtc_id");
            }
            vec![rest]
        }
    };

    match state.sessions.set_input(&id, values) {
        Ok(()) => Ok(Json(json!({ "status": "ok" }))),
        Err(ServerError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

#[derive(Debug, Deserialize)]
struct OutputParams {
    webrtc_id: String,
}

/// Stream queued outputs as server-sent events until the session closes
async fn output_hook(
    State(state): State<AppState>,
    Query(params): Query<OutputParams>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let queue = state
        .sessions
        .output_queue(&params.webrtc_id)
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let stream = futures::stream::unfold(queue, |queue| async move {
        let entry = queue.pop().await?;
        let data = serde_json::to_string(&entry.into_args()).unwrap_or_else(|_| "[]".to_string());
        Some((Ok(Event::default().data(data)), queue))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// ICE servers with credentials injected from the environment
async fn turn_credentials(State(state): State<AppState>) -> Json<Value> {
    let mut servers: Vec<IceServerConfig> = state.settings.stream.rtc.ice_servers.clone();

    if let Ok(url) = std::env::var("TURN_SERVER") {
        servers.push(IceServerConfig {
            urls: vec![url],
            username: std::env::var("TURN_USERNAME").ok(),
            credential: std::env::var("TURN_PASSWORD").ok(),
        });
    }

    let servers: Vec<Value> = servers
        .into_iter()
        .map(|server| {
            let mut entry = json!({ "urls": server.urls });
            if let Some(username) = server.username {
                entry["username"] = json!(username);
            }
            if let Some(credential) = server.credential {
                entry["credential"] = json!(credential);
            }
            entry
        })
        .collect();

    Json(json!({ "iceServers": servers }))
}

/// Health check
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_rejection_shape() {
        let body = concurrency_rejection(3);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["meta"]["error"], "concurrency_limit_reached");
        assert_eq!(body["meta"]["limit"], 3);
    }
}
