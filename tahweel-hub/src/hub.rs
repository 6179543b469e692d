//! Hub core: shared state, WebSocket handler, channel fan-out and the
//! role-change HTTP route.
//!
//! The hub accepts WebSocket connections on `/ws`. Each connection must
//! identify with [`ClientEvent::Identify`] before anything else; afterwards
//! it may subscribe to channels and send typing signals, which the hub fans
//! out to every subscriber of the channel with the sender's user id stamped
//! on. The hub keeps no typing state of its own.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use tahweel_proto::codec::{self, CodecError};
use tahweel_proto::{Channel, ClientEvent, ServerEvent, TypingEvent};

use crate::channels::ChannelRegistry;
use crate::config::HubLimits;
use crate::presence::PresenceBook;

/// Errors raised by the hub.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The TCP listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The bound address could not be read back.
    #[error("failed to read local address: {0}")]
    LocalAddr(std::io::Error),

    /// An event could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Writing to a WebSocket failed.
    #[error("WebSocket send error: {0}")]
    Socket(#[from] axum::Error),
}

/// Identifier of one WebSocket connection. Time-ordered (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Generates a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Connection {
    user_id: String,
    sender: mpsc::UnboundedSender<Message>,
}

/// Shared hub state: live connections, channel membership and presence.
///
/// Locks are always taken in the order `connections`, `channels`,
/// `presence`, and never held across an `.await` on I/O. Presence changes
/// and presence snapshots hold every lock they need until their event is
/// queued, which keeps each subscriber's presence stream ordered.
pub struct HubState {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    channels: RwLock<ChannelRegistry>,
    presence: RwLock<PresenceBook>,
    limits: HubLimits,
}

impl Default for HubState {
    fn default() -> Self {
        Self::new()
    }
}

impl HubState {
    /// Creates an empty hub with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(HubLimits::default())
    }

    /// Creates an empty hub that enforces `limits` on every connection.
    #[must_use]
    pub fn with_limits(limits: HubLimits) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            channels: RwLock::new(ChannelRegistry::new()),
            presence: RwLock::new(PresenceBook::new()),
            limits,
        }
    }

    /// Registers an identified connection and announces the user if this is
    /// their first connection.
    ///
    /// The presence lock stays held until the announcement is queued, so a
    /// concurrent presence snapshot is either taken before the book changes
    /// and queued ahead of the announcement, or already contains the user.
    pub async fn connect(
        &self,
        conn: ConnectionId,
        user_id: &str,
        sender: mpsc::UnboundedSender<Message>,
    ) {
        let mut connections = self.connections.write().await;
        connections.insert(
            conn,
            Connection {
                user_id: user_id.to_string(),
                sender,
            },
        );
        let channels = self.channels.read().await;
        let mut presence = self.presence.write().await;
        if presence.connect(user_id) {
            tracing::info!(user_id, "user online");
            let event = ServerEvent::UserOnline {
                user_id: user_id.to_string(),
            };
            fan_out(&connections, &channels, &Channel::Presence, &event);
        }
    }

    /// Removes a connection from every channel and announces the user as
    /// offline if it was their last connection.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let mut connections = self.connections.write().await;
        let Some(connection) = connections.remove(&conn) else {
            return;
        };
        let mut channels = self.channels.write().await;
        let left = channels.leave_all(conn);
        tracing::debug!(conn = %conn, left, "connection left channels");

        let mut presence = self.presence.write().await;
        if presence.disconnect(&connection.user_id) {
            tracing::info!(user_id = %connection.user_id, "user offline");
            let event = ServerEvent::UserOffline {
                user_id: connection.user_id,
            };
            fan_out(&connections, &channels, &Channel::Presence, &event);
        }
    }

    /// Subscribes `conn` to `channel`. Presence subscriptions are always
    /// answered with a fresh snapshot, even when already subscribed.
    pub async fn subscribe(&self, conn: ConnectionId, channel: &Channel) {
        let connections = self.connections.read().await;
        let mut channels = self.channels.write().await;
        let joined = channels.join(channel, conn);
        tracing::debug!(conn = %conn, channel = %channel, joined, "subscribe");

        if *channel == Channel::Presence {
            let presence = self.presence.read().await;
            let snapshot = ServerEvent::PresenceInitial {
                user_ids: presence.snapshot(),
            };
            if let Some(connection) = connections.get(&conn) {
                queue(connection, &snapshot);
            }
        }
    }

    /// Unsubscribes `conn` from `channel`.
    pub async fn unsubscribe(&self, conn: ConnectionId, channel: &Channel) {
        let left = self.channels.write().await.leave(channel, conn);
        tracing::debug!(conn = %conn, channel = %channel, left, "unsubscribe");
    }

    /// Sends `event` to every subscriber of `channel`. Returns how many
    /// connections it was queued for.
    pub async fn broadcast(&self, channel: &Channel, event: &ServerEvent) -> usize {
        let connections = self.connections.read().await;
        let channels = self.channels.read().await;
        fan_out(&connections, &channels, channel, event)
    }

    /// Broadcasts a member role change to the room's subscribers.
    pub async fn announce_role_change(&self, room_id: &str, user_id: &str, role: &str) -> usize {
        tracing::info!(room_id, user_id, role, "member role changed");
        self.broadcast(
            &Channel::room(room_id),
            &ServerEvent::MemberRoleChanged {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                role: role.to_string(),
            },
        )
        .await
    }

    /// Whether `user_id` has at least one identified connection.
    pub async fn is_online(&self, user_id: &str) -> bool {
        self.presence.read().await.is_online(user_id)
    }

    /// Online user ids, sorted.
    pub async fn online_users(&self) -> Vec<String> {
        self.presence.read().await.snapshot()
    }

    /// Number of identified connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a WebSocket Close frame to every connection.
    pub async fn close_all_connections(&self) {
        let connections = self.connections.read().await;
        for (conn, connection) in connections.iter() {
            tracing::info!(conn = %conn, user_id = %connection.user_id, "closing connection");
            let _ = connection.sender.send(Message::Close(None));
        }
    }

    async fn send_to(&self, conn: ConnectionId, event: &ServerEvent) {
        if let Some(connection) = self.connections.read().await.get(&conn) {
            queue(connection, event);
        }
    }

    async fn handle_typing(&self, conn: ConnectionId, user_id: &str, channel: Channel, name: String) {
        if !channel.is_typing() {
            self.reject(conn, format!("{channel} is not a typing channel"))
                .await;
            return;
        }
        if name.chars().count() > self.limits.max_display_name_len {
            tracing::warn!(user_id, len = name.len(), "display name too long");
            self.reject(
                conn,
                format!(
                    "display name too long (max {} characters)",
                    self.limits.max_display_name_len
                ),
            )
            .await;
            return;
        }
        let event = ServerEvent::TypingStart(TypingEvent {
            channel: channel.clone(),
            user_id: user_id.to_string(),
            username: name,
        });
        self.broadcast(&channel, &event).await;
    }

    async fn handle_stop_typing(&self, conn: ConnectionId, user_id: &str, channel: Channel) {
        if !channel.is_typing() {
            self.reject(conn, format!("{channel} is not a typing channel"))
                .await;
            return;
        }
        let event = ServerEvent::TypingStop {
            channel: channel.clone(),
            user_id: user_id.to_string(),
        };
        self.broadcast(&channel, &event).await;
    }

    async fn reject(&self, conn: ConnectionId, reason: String) {
        self.send_to(conn, &ServerEvent::Error { reason }).await;
    }
}

/// Queues `event` for every member of `channel`, returning how many
/// connections accepted it.
fn fan_out(
    connections: &HashMap<ConnectionId, Connection>,
    channels: &ChannelRegistry,
    channel: &Channel,
    event: &ServerEvent,
) -> usize {
    let bytes = match codec::encode_server(event) {
        Ok(b) => Bytes::from(b),
        Err(e) => {
            tracing::error!(error = %e, kind = %event.kind(), "failed to encode event");
            return 0;
        }
    };

    let mut delivered = 0;
    for conn in channels.members(channel) {
        if let Some(connection) = connections.get(&conn)
            && connection.sender.send(Message::Binary(bytes.clone())).is_ok()
        {
            delivered += 1;
        }
    }
    tracing::trace!(channel = %channel, kind = %event.kind(), delivered, "broadcast");
    delivered
}

fn queue(connection: &Connection, event: &ServerEvent) {
    match codec::encode_server(event) {
        Ok(bytes) => {
            let _ = connection.sender.send(Message::Binary(bytes.into()));
        }
        Err(e) => {
            tracing::error!(error = %e, kind = %event.kind(), "failed to encode event");
        }
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Wait for an `Identify` event.
/// 2. Send `Ready` and register the connection (announcing the user online).
/// 3. Process subscriptions and typing signals until the socket closes.
/// 4. Leave every channel and unregister (announcing the user offline).
pub async fn handle_socket(socket: WebSocket, state: Arc<HubState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let user_id = match wait_for_identify(&mut ws_receiver, state.limits.max_frame_size).await {
        Ok(user_id) => user_id,
        Err(Some(reason)) => {
            tracing::warn!(reason = %reason, "identification rejected");
            let _ = send_event(&mut ws_sender, &ServerEvent::Error { reason }).await;
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
        Err(None) => {
            tracing::debug!("connection closed before identification");
            return;
        }
    };

    let conn = ConnectionId::new();
    let ready = ServerEvent::Ready {
        user_id: user_id.clone(),
    };
    if let Err(e) = send_event(&mut ws_sender, &ready).await {
        tracing::warn!(user_id = %user_id, error = %e, "failed to send Ready");
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.connect(conn, &user_id, tx).await;
    tracing::info!(conn = %conn, user_id = %user_id, "connection identified");

    let writer_conn = conn;
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn = %writer_conn, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let reader_user = user_id.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_message(conn, &reader_user, &data, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::debug!(conn = %conn, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.disconnect(conn).await;
    tracing::info!(conn = %conn, user_id = %user_id, "connection closed");
}

/// Waits for the first binary frame, expecting `Identify`.
///
/// Returns the user id, `Err(Some(reason))` for a frame that must be
/// answered with an error, or `Err(None)` if the socket closed.
async fn wait_for_identify(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    max_frame_size: usize,
) -> Result<String, Option<String>> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => {
                return match codec::decode_client_bounded(&data, max_frame_size) {
                    Ok(ClientEvent::Identify { user_id, token }) => {
                        if user_id.is_empty() {
                            return Err(Some("user id must not be empty".to_string()));
                        }
                        tracing::debug!(user_id = %user_id, has_token = token.is_some(), "identify");
                        Ok(user_id)
                    }
                    Ok(other) => Err(Some(format!("expected identify, got {other:?}"))),
                    Err(e) => Err(Some(e.to_string())),
                };
            }
            Message::Close(_) => return Err(None),
            _ => {
                // Skip non-binary frames (ping/pong) during identification.
            }
        }
    }
    Err(None)
}

/// Handles a binary frame from an identified connection.
async fn handle_binary_message(
    conn: ConnectionId,
    user_id: &str,
    data: &[u8],
    state: &Arc<HubState>,
) {
    let event = match codec::decode_client_bounded(data, state.limits.max_frame_size) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(conn = %conn, error = %e, "failed to decode event");
            state.reject(conn, e.to_string()).await;
            return;
        }
    };

    match event {
        ClientEvent::Subscribe { channel } => state.subscribe(conn, &channel).await,
        ClientEvent::Unsubscribe { channel } => state.unsubscribe(conn, &channel).await,
        ClientEvent::Typing {
            channel,
            display_name,
        } => state.handle_typing(conn, user_id, channel, display_name).await,
        ClientEvent::StopTyping { channel } => {
            state.handle_stop_typing(conn, user_id, channel).await;
        }
        ClientEvent::Identify { user_id: again, .. } => {
            tracing::warn!(conn = %conn, user_id, again = %again, "duplicate identify ignored");
        }
    }
}

/// Encodes and sends an event directly on a WebSocket sender.
async fn send_event(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    event: &ServerEvent,
) -> Result<(), HubError> {
    let bytes = codec::encode_server(event)?;
    ws_sender.send(Message::Binary(bytes.into())).await?;
    Ok(())
}

/// Body of `POST /rooms/{room_id}/roles`.
#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct RoleChange {
    /// Member whose role changed.
    pub user_id: String,
    /// The new role.
    pub role: String,
}

/// Response of `POST /rooms/{room_id}/roles`.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct RoleChangeAck {
    /// Number of connections the announcement was queued for.
    pub delivered: usize,
}

/// Starts the hub on the given address with default limits.
///
/// # Errors
///
/// Returns [`HubError`] if the TCP listener cannot bind.
pub async fn start_server(
    addr: &str,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), HubError> {
    start_server_with_state(addr, Arc::new(HubState::new())).await
}

/// Starts the hub with a pre-configured [`HubState`].
///
/// # Errors
///
/// Returns [`HubError`] if the TCP listener cannot bind.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<HubState>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), HubError> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| HubError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    let bound_addr = listener.local_addr().map_err(HubError::LocalAddr)?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "hub server error");
        }
    });

    Ok((bound_addr, handle))
}

/// The hub's HTTP routes.
pub fn router(state: Arc<HubState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/rooms/{room_id}/roles", axum::routing::post(role_handler))
        .with_state(state)
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    State(state): State<Arc<HubState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn role_handler(
    State(state): State<Arc<HubState>>,
    Path(room_id): Path<String>,
    axum::Json(change): axum::Json<RoleChange>,
) -> Result<axum::Json<RoleChangeAck>, (StatusCode, String)> {
    if change.user_id.is_empty() || change.role.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "user_id and role must not be empty".to_string(),
        ));
    }
    let delivered = state
        .announce_role_change(&room_id, &change.user_id, &change.role)
        .await;
    Ok(axum::Json(RoleChangeAck { delivered }))
}
