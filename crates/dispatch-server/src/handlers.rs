//! Connection gateway and server assembly.
//!
//! Each WebSocket connection must present its identity in a `connect`
//! frame before anything else; the gateway then registers it with the
//! fanout table and the presence registry, and tears both down again on
//! every exit path.

use crate::api;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use bytes::BytesMut;
use dispatch_core::{
    model::generate_connection_id, AssignmentEngine, BookingPool, Fanout, MemoryStore,
    PresenceRegistry, Store, User,
};
use dispatch_protocol::{codec, frames, Frame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Durable store.
    pub store: Arc<dyn Store>,
    /// Notification fanout, passed by handle to everything that emits.
    pub fanout: Arc<Fanout>,
    /// Presence registry.
    pub presence: PresenceRegistry,
    /// Booking pool.
    pub pool: BookingPool,
    /// Assignment engine.
    pub engine: AssignmentEngine,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state over an explicit store.
    #[must_use]
    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Self {
        let fanout = Arc::new(Fanout::new());
        let presence = PresenceRegistry::new(store.clone(), fanout.clone());
        let pool = BookingPool::new(store.clone());
        let engine = AssignmentEngine::new(store.clone(), pool.clone(), config.assignment.policy);

        Self {
            store,
            fanout,
            presence,
            pool,
            engine,
            config,
        }
    }

    /// Create app state with the bundled in-memory store, seeded from
    /// configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let store = MemoryStore::new();
        for user in &config.seed.users {
            store.put_user(user.clone());
        }
        Self::with_store(config, Arc::new(store))
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = Router::new()
        .route(&config.gateway.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/bookings", post(api::create_booking))
        .route("/api/assignments", post(api::assign_driver))
        .route("/api/dashboard-data", get(api::dashboard_data))
        .with_state(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Dispatch server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.gateway.websocket_path
    );

    axum::serve(listener, app).await?;

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
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection: handshake, register, pump, clean up.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = generate_connection_id();
    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Identity handshake. Nothing is registered yet, so early exits here
    // need no cleanup.
    let user = match await_identity(&mut receiver, &mut read_buffer, &state).await {
        Ok(user) => user,
        Err(reason) => {
            debug!(connection = %connection_id, %reason, "Handshake refused");
            metrics::record_error("unauthenticated");
            let refusal = Frame::error(frames::CODE_UNAUTHENTICATED, reason);
            if let Ok(data) = codec::encode(&refusal) {
                let _ = sender.send(Message::Binary(data.to_vec())).await;
            }
            return;
        }
    };

    let mut outbound = state.fanout.register(&connection_id, &user.id, user.role);
    if let Err(e) = state.presence.connection_opened(&user.id).await {
        // The connection stays up; the durable flag will settle on the
        // next presence edge.
        error!(connection = %connection_id, user = %user.id, error = %e, "Presence open failed");
    }

    let connected = Frame::connected(&connection_id, state.config.heartbeat.interval_ms as u32);
    if send_frame(&mut sender, &connected).await.is_err() {
        error!(connection = %connection_id, "Failed to send connected frame");
        cleanup(&state, &connection_id, &user).await;
        return;
    }

    info!(connection = %connection_id, user = %user.id, role = %user.role, "Gateway session open");

    loop {
        tokio::select! {
            biased;

            // Drain this connection's outbound queue.
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                match codec::encode(&frame) {
                    Ok(data) => {
                        if let Frame::Event { event, .. } = frame.as_ref() {
                            metrics::record_event_delivered(event, 1);
                        }
                        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(connection = %connection_id, error = %e, "Outbound encode failed");
                    }
                }
            }

            // Receive from the client.
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        read_buffer.extend_from_slice(&data);
                        if pump_inbound(&mut read_buffer, &mut sender, &connection_id).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        read_buffer.extend_from_slice(text.as_bytes());
                        if pump_inbound(&mut read_buffer, &mut sender, &connection_id).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup runs on every exit path past registration, graceful or not.
    cleanup(&state, &connection_id, &user).await;
    debug!(connection = %connection_id, user = %user.id, "WebSocket disconnected");
}

/// Decode and handle whatever complete frames sit in the read buffer.
///
/// The only client frames in this core after the handshake are
/// keepalives; anything else is logged and ignored.
async fn pump_inbound(
    read_buffer: &mut BytesMut,
    sender: &mut SplitSink<WebSocket, Message>,
    connection_id: &str,
) -> Result<(), ()> {
    loop {
        match codec::decode_from(read_buffer) {
            Ok(Some(Frame::Ping { timestamp })) => {
                if send_frame(sender, &Frame::pong(timestamp)).await.is_err() {
                    return Err(());
                }
            }
            Ok(Some(Frame::Pong { .. })) => {}
            Ok(Some(Frame::Connect { .. })) => {
                debug!(connection = %connection_id, "Connect frame on established session; ignoring");
            }
            Ok(Some(frame)) => {
                warn!(connection = %connection_id, frame_type = ?frame.frame_type(), "Unexpected inbound frame");
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Inbound decode error; closing");
                let _ = send_frame(sender, &Frame::error(frames::CODE_BAD_FRAME, e.to_string()))
                    .await;
                return Err(());
            }
        }
    }
}

/// Wait for the identity handshake and resolve the claimed user.
///
/// Returns the user record, or a refusal reason for the error frame.
async fn await_identity(
    receiver: &mut SplitStream<WebSocket>,
    read_buffer: &mut BytesMut,
    state: &Arc<AppState>,
) -> Result<User, String> {
    let timeout = Duration::from_millis(state.config.gateway.handshake_timeout_ms);

    let user_id = tokio::time::timeout(timeout, read_connect(receiver, read_buffer))
        .await
        .map_err(|_| "handshake timed out".to_string())??;

    if user_id.trim().is_empty() {
        return Err("connect frame carried no userId".to_string());
    }

    match state.store.find_user_by_id(&user_id).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(format!("unknown identity {user_id}")),
        Err(e) => {
            error!(error = %e, "Store lookup failed during handshake");
            Err("identity lookup failed".to_string())
        }
    }
}

/// Read frames until the first `connect` arrives.
async fn read_connect(
    receiver: &mut SplitStream<WebSocket>,
    read_buffer: &mut BytesMut,
) -> Result<String, String> {
    loop {
        while let Ok(Some(frame)) = codec::decode_from(read_buffer) {
            match frame {
                Frame::Connect { user_id } => return Ok(user_id),
                other => {
                    debug!(frame_type = ?other.frame_type(), "Non-connect frame before handshake; ignoring");
                }
            }
        }

        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => read_buffer.extend_from_slice(&data),
            Some(Ok(Message::Text(text))) => read_buffer.extend_from_slice(text.as_bytes()),
            Some(Ok(Message::Close(_))) | None => {
                return Err("connection closed before handshake".to_string())
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(format!("transport error during handshake: {e}")),
        }
    }
}

/// Send an encoded frame to the socket.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &Frame,
) -> Result<(), axum::Error> {
    match codec::encode(frame) {
        Ok(data) => sender.send(Message::Binary(data.to_vec())).await,
        Err(e) => {
            error!(error = %e, "Frame encode failed");
            Ok(())
        }
    }
}

/// Release a connection's registrations. Runs on every exit path.
async fn cleanup(state: &Arc<AppState>, connection_id: &str, user: &User) {
    state.fanout.deregister(connection_id);
    if let Err(e) = state.presence.connection_closed(&user.id).await {
        error!(connection = %connection_id, user = %user.id, error = %e, "Presence close failed");
    }
}
