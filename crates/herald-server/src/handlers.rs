//! HTTP and WebSocket handlers for the Herald server.
//!
//! Topic lifecycle and statistics are plain JSON endpoints. Streaming clients
//! connect over WebSocket; each connection gets a broker session whose
//! mailbox is drained by a dedicated writer task, so a slow socket never
//! holds up publishers.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use herald_core::{Broker, BrokerError, Session, Subscriber};
use herald_protocol::{ErrorCode, WireFormat};
use herald_transport::websocket::{self, WebSocketConfig};
use herald_transport::{ConnectionId, FrameSink, FrameSource, Inbound};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The broker.
    pub broker: Arc<Broker>,
    /// Server configuration.
    pub config: Config,
    /// Server start time, for uptime reporting.
    pub started: Instant,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            broker: Arc::new(Broker::with_config(config.broker_config())),
            config,
            started: Instant::now(),
        }
    }
}

/// Build the application router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/topics", get(list_topics).post(create_topic))
        .route("/topics/:name", delete(delete_topic))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Herald server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Herald server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Error response with a `{error: {code, message}}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: ErrorCode::BadRequest,
            message: message.into(),
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        let status = match e {
            BrokerError::AlreadyExists(_) => StatusCode::CONFLICT,
            BrokerError::NotFound(_) => StatusCode::NOT_FOUND,
            BrokerError::InvalidRequest(_) | BrokerError::SessionClosed => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

/// Body of `POST /topics`.
#[derive(Debug, Deserialize)]
pub struct CreateTopic {
    pub name: String,
}

async fn create_topic(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateTopic>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    state.broker.create_topic(&body.name)?;
    metrics::set_active_topics(state.broker.registry().len());

    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "created", "topic": body.name })),
    ))
}

async fn delete_topic(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let detached = state.broker.delete_topic(&name)?;
    metrics::set_active_topics(state.broker.registry().len());
    debug!(topic = %name, detached, "Topic deleted over HTTP");

    Ok(Json(json!({ "status": "deleted", "topic": name })))
}

async fn list_topics(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "topics": state.broker.list_topics() }))
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let health = state.broker.health();
    Json(json!({
        "status": "ok",
        "uptimeSeconds": state.started.elapsed().as_secs(),
        "topics": health.topics,
        "subscribers": health.subscribers,
        "connections": health.connections,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.broker.stats()))
}

/// Query parameters of the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// `json` (default) or `msgpack`.
    pub format: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let format = WireFormat::from_query(params.format.as_deref());
    ws.on_upgrade(move |socket| handle_websocket(socket, state, format))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, format: WireFormat) {
    let session = state.broker.connect();
    let id = ConnectionId::new(session.id().to_string());
    debug!(connection = %id, ?format, "WebSocket connected");

    let config = WebSocketConfig {
        max_message_size: state.config.limits.max_message_size,
        format,
    };
    let (sink, source) = websocket::split(socket, id, &config);
    serve_connection(session, sink, source).await;
}

/// Drive one connection until either side goes away.
///
/// Requests are handled inline; replies and events go through the session's
/// mailbox so they reach the client in the order the broker produced them.
pub async fn serve_connection<S, R>(mut session: Session, sink: S, mut source: R)
where
    S: FrameSink + 'static,
    R: FrameSource,
{
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection = source.id().clone();

    if session.subscriber().notify(session.welcome()).is_err() {
        return;
    }
    let mut writer = tokio::spawn(write_loop(Arc::clone(session.subscriber()), sink));

    let writer_finished = loop {
        let inbound = tokio::select! {
            inbound = source.recv() => inbound,
            _ = &mut writer => break true,
        };

        match inbound {
            Ok(Some(Inbound::Request(request))) => {
                let start = Instant::now();
                let action = request.action.name();
                let subscriptions = session.subscriptions_added();
                let reply = session.handle(request);
                metrics::record_request(action, &reply);
                if session.subscriptions_added() > subscriptions {
                    metrics::record_subscription();
                }
                metrics::record_latency(start.elapsed().as_secs_f64());

                if session.subscriber().notify(reply).is_err() {
                    warn!(connection = %connection, "Connection fell behind, closing");
                    break false;
                }
            }
            Ok(Some(Inbound::Malformed(malformed))) => {
                metrics::record_error("malformed");
                if session.reject(malformed).is_err() {
                    break false;
                }
            }
            Ok(None) => break false,
            Err(e) => {
                warn!(connection = %connection, error = %e, "Transport error");
                metrics::record_error("transport");
                break false;
            }
        }
    };

    metrics::record_dropped(session.subscriber().dropped());
    session.close();

    if !writer_finished {
        if let Err(e) = writer.await {
            warn!(connection = %connection, error = %e, "Writer task failed");
        }
    }

    debug!(connection = %connection, "WebSocket disconnected");
}

/// Forward everything queued for a subscriber to the client.
async fn write_loop<S: FrameSink>(subscriber: Arc<Subscriber>, mut sink: S) {
    while let Some(delivery) = subscriber.recv().await {
        let reply = delivery.into_reply();
        match sink.send(&reply).await {
            Ok(bytes) => metrics::record_message(bytes, reply.name()),
            Err(e) => {
                debug!(connection = %sink.id(), error = %e, "Send failed");
                break;
            }
        }
    }

    if let Err(e) = sink.close().await {
        debug!(connection = %sink.id(), error = %e, "Close failed");
    }
}
