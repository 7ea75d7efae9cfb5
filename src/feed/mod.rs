//! Monitoring feed server
//!
//! Serves the push side of the wire contract so viewers have something to connect
//! to: every [`WireMessage`] handed to [`FeedState::publish`] is broadcast to all
//! connected WebSocket clients.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check with connected client count
//! - `POST /api/alerts` - Publish an externally-originated alert
//! - `WS /api/ws/monitoring` - Metric, alert and heartbeat frames

pub mod sampler;
pub mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::messages::{AlertPayload, WireMessage};

/// Path of the WebSocket endpoint
pub const FEED_PATH: &str = "/api/ws/monitoring";

/// Port the feed listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 8080;

/// Feed server configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Enable CORS for browser dashboards
    pub enable_cors: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            enable_cors: true,
        }
    }
}

/// Shared state of the feed: the broadcast channel and a client counter
#[derive(Debug, Clone)]
pub struct FeedState {
    frames: broadcast::Sender<String>,
    clients: Arc<AtomicUsize>,
}

impl FeedState {
    pub fn new(capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(capacity.max(1));
        Self {
            frames,
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Broadcast a message to every connected client
    ///
    /// Returns the number of clients the frame was handed to.
    pub fn publish(&self, message: &WireMessage) -> Result<usize, serde_json::Error> {
        let frame = serde_json::to_string(message)?;
        let receivers = self.frames.send(frame).unwrap_or(0);
        debug!("published frame to {receivers} clients");
        Ok(receivers)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.frames.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    pub(crate) fn client_connected(&self) -> usize {
        self.clients.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn client_disconnected(&self) -> usize {
        self.clients.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub clients: usize,
}

/// GET /api/health
pub async fn health_check(State(state): State<FeedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        clients: state.client_count(),
    })
}

/// Response to a published alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Clients the alert was handed to
    pub delivered: usize,
}

/// POST /api/alerts
///
/// Broadcasts the alert to every connected viewer.
pub async fn publish_alert(
    State(state): State<FeedState>,
    Json(alert): Json<AlertPayload>,
) -> Result<Json<PublishResponse>, (StatusCode, String)> {
    info!(severity = %alert.severity, "publishing external alert");

    let message = WireMessage::Alert {
        server_id: alert.server_id.clone(),
        data: alert,
    };

    state
        .publish(&message)
        .map(|delivered| Json(PublishResponse { delivered }))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Spawn the feed server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_feed_server(config: FeedConfig, state: FeedState) -> anyhow::Result<SocketAddr> {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    info!("starting feed server on {}", config.bind_addr);

    let mut app = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/alerts", post(publish_alert))
        .route(FEED_PATH, get(websocket::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("feed server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("feed server error: {}", e);
        }
    });

    Ok(addr)
}
