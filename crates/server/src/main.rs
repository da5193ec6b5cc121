//! Voicebridge server entry point
//!
//! Runs the standalone server with a loopback echo handler, which is
//! useful for verifying a deployment end to end. Real deployments embed
//! the library and register their own handler.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voicebridge_config::{load_settings, Settings};
use voicebridge_core::AudioFrame;
use voicebridge_pipeline::{
    BlockingHandler, EmitItem, HandlerContext, HandlerSpec, SyncBridge,
};
use voicebridge_server::{create_router, AppState};

/// Echoes inbound audio back to the peer unchanged
struct EchoHandler {
    queue: Mutex<VecDeque<AudioFrame>>,
}

impl EchoHandler {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl BlockingHandler for EchoHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            input_sample_rate: 48000,
            output_sample_rate: 48000,
            output_frame_samples: 960,
            ..HandlerSpec::default()
        }
    }

    fn receive(
        &self,
        _ctx: Arc<HandlerContext>,
        frame: AudioFrame,
    ) -> voicebridge_pipeline::Result<()> {
        self.queue.lock().push_back(frame);
        Ok(())
    }

    fn emit(&self, _ctx: Arc<HandlerContext>) -> voicebridge_pipeline::Result<Option<EmitItem>> {
        Ok(self.queue.lock().pop_front().map(EmitItem::Audio))
    }

    fn copy(&self) -> Self {
        EchoHandler::new()
    }

    fn shutdown(&self) {
        self.queue.lock().clear();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("VOICEBRIDGE_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load settings ({}), using defaults", e);
            Settings::default()
        }
    };

    init_tracing(&settings);

    tracing::info!("starting voicebridge v{}", env!("CARGO_PKG_VERSION"));

    let handler = Arc::new(SyncBridge::new(EchoHandler::new()));
    let state = AppState::new(settings.clone(), handler)?;
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

/// Initialize tracing from the observability settings
fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("voicebridge={},tower_http=info", settings.observability.log_level).into()
    });

    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
