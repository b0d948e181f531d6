//! Web layer
//!
//! The engine's HTTP boundary: channel catalog and status endpoints, the
//! status-change SSE stream, manual STT control, the per-room subscriber
//! WebSocket and the VOD task endpoints. Handlers stay thin and delegate
//! to the services wired into `AppState`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::hub::SubscriberHub;
use crate::status::StatusService;
use crate::stt::LiveCaptionService;
use crate::supervisor::AutoSttSupervisor;
use crate::vod::VodSttService;

pub mod handlers;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub status: StatusService,
    pub stt: LiveCaptionService,
    pub hub: SubscriberHub,
    pub vod: VodSttService,
    pub supervisor: Arc<AutoSttSupervisor>,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr =
            format!("{}:{}", state.config.web.host, state.config.web.port).parse()?;
        let app = Self::create_router(state);
        Ok(Self { app, addr })
    }

    fn create_router(state: AppState) -> Router {
        let cors = Self::cors_layer(&state.config);

        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/channels", get(handlers::channels::list_channels))
            .route(
                "/api/channels/status",
                get(handlers::channels::channels_status),
            )
            .route(
                "/api/channels/status/stream",
                get(handlers::channels::stream_channel_status),
            )
            .route(
                "/api/channels/:channel_id",
                get(handlers::channels::get_channel),
            )
            .route(
                "/api/channels/:channel_id/stt/start",
                post(handlers::channels::start_channel_stt),
            )
            .route(
                "/api/channels/:channel_id/stt/stop",
                post(handlers::channels::stop_channel_stt),
            )
            .route(
                "/api/channels/:channel_id/stt/status",
                get(handlers::channels::channel_stt_status),
            )
            .route(
                "/api/channels/:channel_id/stt/debug",
                get(handlers::channels::channel_stt_debug),
            )
            .route(
                "/api/meetings/:meeting_id/stt/start",
                post(handlers::vod::start_meeting_stt),
            )
            .route(
                "/api/meetings/:meeting_id/stt/status",
                get(handlers::vod::meeting_stt_status),
            )
            .route(
                "/ws/rooms/:room_id/subtitles",
                get(handlers::subscribe::subscribe_room),
            )
            .layer(cors)
            .with_state(state)
    }

    fn cors_layer(config: &Config) -> CorsLayer {
        let origins: Vec<HeaderValue> = config
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        if origins.is_empty() {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn serve(self) -> Result<()> {
        info!("Web server listening on {}", self.addr);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }
}
