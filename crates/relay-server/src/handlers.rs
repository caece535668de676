//! Connection handlers for Relay server.
//!
//! This module handles the connection lifecycle: it turns WebSocket frames
//! into payloads for the dispatcher and drains each connection's outbox
//! through the `out` hooks back onto the socket.

use crate::commands;
use crate::config::Config;
use crate::identity::{AccessList, AddressHasher};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context as _, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use relay_protocol::{encode_text, messages, Payload, PayloadCodec, ProtocolError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tenvis_relay_core::{Connection, ConnectionId, Context, DispatchOutcome, TargetSpec};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Commands, hooks, router, and rate limiter.
    pub ctx: Context,
    /// Server configuration.
    pub config: Config,
    codec: PayloadCodec,
    hasher: AddressHasher,
}

impl AppState {
    /// Create app state and load every command module.
    ///
    /// # Errors
    ///
    /// Returns an error if a command module fails to load.
    pub async fn new(config: Config) -> Result<Self> {
        let ctx = Context::with_config(config.context_config());
        ctx.state().insert(AccessList::new(&config.access));
        commands::load_all(&ctx)
            .await
            .context("Failed to load commands")?;

        let hasher = match &config.access.salt {
            Some(salt) => AddressHasher::new(salt.clone()),
            None => AddressHasher::random(),
        };

        Ok(Self {
            codec: PayloadCodec::new(config.limits.max_payload_size),
            ctx,
            config,
            hasher,
        })
    }

    /// Decode a text frame.
    fn decode_text(&self, text: &str) -> Result<Payload, ProtocolError> {
        self.codec.decode_text(text)
    }

    /// Decode a binary (MessagePack) frame.
    fn decode_binary(&self, data: &[u8]) -> Result<Payload, ProtocolError> {
        self.codec.decode_binary(data)
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone()).await?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if state.ctx.router().len() >= state.config.limits.max_connections {
        warn!(peer = %peer, "Connection limit reached");
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.max_message_size(state.config.limits.max_payload_size)
        .on_upgrade(move |socket| handle_websocket(socket, peer.ip().to_string(), state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, address: String, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let hash = state.hasher.hash(&address);
    let (conn, mut outbox) = Connection::new(ConnectionId::generate(), address, hash);
    state.ctx.router().insert(Arc::clone(&conn));

    debug!(connection = %conn.id(), "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Payloads routed to this connection
            Some(outbound) = outbox.recv() => {
                let Some(payload) = state.ctx.prepare_outbound(&conn, (*outbound).clone()).await else {
                    continue;
                };
                match encode_text(&payload) {
                    Ok(text) => {
                        metrics::record_payload(text.len(), "outbound");
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(connection = %conn.id(), error = %e, "Encode error");
                        metrics::record_error("encode");
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_payload(text.len(), "inbound");
                        match state.decode_text(&text) {
                            Ok(payload) => {
                                handle_payload(&state, &conn, payload).await;
                            }
                            Err(e) => reject(&conn, &e),
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_payload(data.len(), "inbound");
                        match state.decode_binary(&data) {
                            Ok(payload) => {
                                handle_payload(&state, &conn, payload).await;
                            }
                            Err(e) => reject(&conn, &e),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %conn.id(), "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %conn.id(), error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %conn.id(), "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    disconnect(&state.ctx, &conn);
    refresh_channel_gauge(&state.ctx);

    debug!(connection = %conn.id(), "WebSocket disconnected");
}

/// Dispatch one decoded payload.
async fn handle_payload(
    state: &AppState,
    conn: &Arc<Connection>,
    payload: Payload,
) -> DispatchOutcome {
    let start = Instant::now();
    let outcome = state.ctx.handle_inbound(conn, payload).await;
    metrics::record_dispatch(&outcome, start.elapsed().as_secs_f64());
    // Only a handler that ran can have moved someone between channels.
    if outcome == DispatchOutcome::Completed {
        refresh_channel_gauge(&state.ctx);
    }
    outcome
}

/// Publish the occupied channel count. Returns it.
fn refresh_channel_gauge(ctx: &Context) -> usize {
    let channels = ctx.router().stats().channel_count;
    metrics::set_active_channels(channels);
    channels
}

/// Undecodable frames are dropped without a reply.
fn reject(conn: &Connection, error: &ProtocolError) {
    debug!(connection = %conn.id(), error = %error, "Dropping undecodable frame");
    metrics::record_error("decode");
}

/// Forget a connection and tell its channel it left.
pub(crate) fn disconnect(ctx: &Context, conn: &Arc<Connection>) {
    ctx.router().remove(conn.id());

    let state = conn.state();
    if let (Some(channel), Some(nick)) = (state.channel, state.nick) {
        ctx.router()
            .broadcast(messages::online_remove(&nick), &TargetSpec::channel(channel));
    }
}
