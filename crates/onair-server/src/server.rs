use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use onair_core::ids::SessionId;
use onair_core::messages::Message;
use onair_store::ChannelListener;

use crate::coordinator::{CoordinatorError, DebugInfo, LiveFeed, SessionCoordinator};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Keep-alive comment interval on idle viewer streams.
    pub heartbeat: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            heartbeat: Duration::from_secs(15),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SessionCoordinator>,
    pub heartbeat: Duration,
}

#[derive(Serialize)]
struct DebugResponse {
    ok: bool,
    #[serde(flatten)]
    info: DebugInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/live/start", post(start_handler))
        .route("/api/live/stream", get(stream_handler))
        .route("/api/live/debug", get(debug_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve in the background. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    coordinator: Arc<SessionCoordinator>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState {
        coordinator,
        heartbeat: config.heartbeat,
    };
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "server exited with error");
        }
    });

    info!(port = local_addr.port(), "onair server started");

    Ok(ServerHandle {
        port: local_addr.port(),
        cancel,
        server,
    })
}

/// Handle returned by `start()`; keeps the server task alive.
pub struct ServerHandle {
    pub port: u16,
    cancel: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    ///
    /// Open viewer streams hold the server until their sessions end, so
    /// callers usually bound this with a timeout.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.server.await {
            error!(error = %e, "server task failed");
        }
    }
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "ok": false, "error": message }))).into_response()
}

fn missing_session_id() -> Response {
    json_error(StatusCode::BAD_REQUEST, "Missing sessionId")
}

async fn start_handler(State(state): State<AppState>) -> Response {
    match state.coordinator.start() {
        Ok(session_id) => (
            [(header::CACHE_CONTROL, "no-store")],
            Json(json!({
                "ok": true,
                "sessionId": session_id,
                "mode": state.coordinator.mode(),
            })),
        )
            .into_response(),
        Err(e @ CoordinatorError::AlreadyProducing(_)) => {
            json_error(StatusCode::CONFLICT, &e.to_string())
        }
        Err(e) => {
            error!(error = %e, "failed to start session");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// Backlog replay followed by the live tail, as `msg` events. The stream
/// ends when the session ends; dropping it unsubscribes.
async fn stream_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let Some(session_id) = SessionId::parse_param(query.session_id.as_deref()) else {
        return missing_session_id();
    };

    let (listener, rx) = ChannelListener::channel();
    let feed = state.coordinator.subscribe(&session_id, listener);
    debug!(
        session_id = %session_id,
        backlog = feed.backlog.len(),
        "viewer stream opened"
    );

    Sse::new(viewer_events(feed, rx))
        .keep_alive(KeepAlive::new().interval(state.heartbeat))
        .into_response()
}

fn viewer_events(
    feed: LiveFeed,
    rx: tokio::sync::mpsc::UnboundedReceiver<Message>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let LiveFeed {
        backlog,
        subscription,
    } = feed;
    stream::iter(backlog)
        .chain(UnboundedReceiverStream::new(rx))
        .filter_map(move |message| {
            // The subscription lives exactly as long as the stream.
            let _keep = &subscription;
            let event = match Event::default().event("msg").json_data(&message) {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    error!(idx = message.idx, error = %e, "failed to encode message event");
                    None
                }
            };
            futures::future::ready(event)
        })
}

async fn debug_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let Some(session_id) = SessionId::parse_param(query.session_id.as_deref()) else {
        return missing_session_id();
    };
    let body = DebugResponse {
        ok: true,
        info: state.coordinator.debug_info(&session_id),
    };
    ([(header::CACHE_CONTROL, "no-store")], Json(body)).into_response()
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "sessions": state.coordinator.session_count(),
    }))
}
