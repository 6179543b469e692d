//! WebSocket transport to a `tahweel-hub`.
//!
//! [`WsTransport::connect`] opens the socket, identifies the user, waits for
//! the hub's `Ready`, then spawns a reader task (decodes [`ServerEvent`]s and
//! dispatches them to listeners) and a writer task (drains the outgoing
//! queue). `emit` only enqueues, so it never blocks the caller.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use tahweel_proto::codec;
use tahweel_proto::{ClientEvent, EventKind, ServerEvent};

use super::{EventHandler, Listener, ListenerSet, RealtimeTransport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSender = futures_util::stream::SplitSink<WsStream, Message>;
type WsReader = futures_util::stream::SplitStream<WsStream>;

/// Connection parameters for [`WsTransport::connect`].
#[derive(Debug, Clone)]
pub struct WsOptions {
    /// Session token forwarded to the hub in `Identify`.
    pub token: Option<String>,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Timeout for the hub's `Ready` answer.
    pub identify_timeout: Duration,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            token: None,
            connect_timeout: Duration::from_secs(10),
            identify_timeout: Duration::from_secs(5),
        }
    }
}

/// WebSocket implementation of [`RealtimeTransport`].
pub struct WsTransport {
    user_id: String,
    hub_url: String,
    outgoing: mpsc::UnboundedSender<Message>,
    listeners: ListenerSet,
    connected: Arc<watch::Sender<bool>>,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl WsTransport {
    /// Connect to the hub at `hub_url` and identify as `user_id`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the handshake or identification times out.
    /// - [`TransportError::Unreachable`] if nothing is listening at `hub_url`.
    /// - [`TransportError::Rejected`] if the hub refuses the identification.
    /// - [`TransportError::ConnectionClosed`] if the hub hangs up mid-handshake.
    pub async fn connect(
        hub_url: &str,
        user_id: &str,
        options: &WsOptions,
    ) -> Result<Self, TransportError> {
        let (ws_stream, _response) =
            tokio::time::timeout(options.connect_timeout, connect_async(hub_url))
                .await
                .map_err(|_| {
                    tracing::warn!(url = hub_url, "hub WebSocket connect timed out");
                    TransportError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = hub_url, err = %e, "hub WebSocket connect failed");
                    map_ws_connect_error(hub_url, e)
                })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        let identify = codec::encode_client(&ClientEvent::Identify {
            user_id: user_id.to_string(),
            token: options.token.clone(),
        })?;
        ws_sender
            .send(Message::Binary(identify.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "failed to send Identify");
                TransportError::ConnectionClosed
            })?;

        let answer = tokio::time::timeout(options.identify_timeout, ws_reader.next())
            .await
            .map_err(|_| {
                tracing::warn!(url = hub_url, "hub identification timed out");
                TransportError::Timeout
            })?;

        match answer {
            Some(Ok(Message::Binary(data))) => match codec::decode_server(&data)? {
                ServerEvent::Ready { user_id: bound } => {
                    tracing::info!(user_id = %bound, url = hub_url, "identified with hub");
                }
                ServerEvent::Error { reason } => {
                    tracing::warn!(reason = %reason, "hub rejected identification");
                    return Err(TransportError::Rejected(reason));
                }
                other => {
                    tracing::warn!(?other, "unexpected hub event during identification");
                    return Err(TransportError::Rejected(format!(
                        "unexpected {} during identification",
                        other.kind()
                    )));
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                tracing::warn!("hub closed connection during identification");
                return Err(TransportError::ConnectionClosed);
            }
            Some(Ok(_)) => {
                return Err(TransportError::Rejected(
                    "unexpected non-binary frame during identification".to_string(),
                ));
            }
            Some(Err(e)) => {
                tracing::warn!(err = %e, "WebSocket error during identification");
                return Err(TransportError::ConnectionClosed);
            }
        }

        let listeners = ListenerSet::new();
        let connected = Arc::new(watch::Sender::new(true));
        let (tx, rx) = mpsc::unbounded_channel();

        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            listeners.clone(),
            Arc::clone(&connected),
        ));
        let writer_handle = tokio::spawn(writer_loop(ws_sender, rx, Arc::clone(&connected)));

        Ok(Self {
            user_id: user_id.to_string(),
            hub_url: hub_url.to_string(),
            outgoing: tx,
            listeners,
            connected,
            reader_handle,
            writer_handle,
        })
    }

    /// The user id this connection identified as.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The hub URL this transport is connected to.
    #[must_use]
    pub fn hub_url(&self) -> &str {
        &self.hub_url
    }

    /// Close the connection. Listeners stay registered but receive nothing
    /// further.
    pub fn disconnect(&self) {
        if self.connected.send_replace(false) {
            let _ = self.outgoing.send(Message::Close(None));
            tracing::info!(user_id = %self.user_id, "disconnecting from hub");
        }
    }

    /// Resolves once the connection is gone, whether the hub closed it, a
    /// read or write failed, or [`disconnect`](Self::disconnect) was called.
    pub async fn closed(&self) {
        let mut rx = self.connected.subscribe();
        let _ = rx.wait_for(|connected| !connected).await;
    }
}

impl RealtimeTransport for WsTransport {
    fn emit(&self, event: ClientEvent) -> Result<(), TransportError> {
        if !*self.connected.borrow() {
            return Err(TransportError::ConnectionClosed);
        }
        let bytes = codec::encode_client(&event)?;
        self.outgoing
            .send(Message::Binary(bytes.into()))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn listen(&self, kind: EventKind, handler: EventHandler) -> Listener {
        self.listeners.register(kind, handler)
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

/// Reads frames from the hub and dispatches decoded events.
///
/// Malformed frames are logged and skipped; the connection stays up.
async fn reader_loop(
    mut ws_reader: WsReader,
    listeners: ListenerSet,
    connected: Arc<watch::Sender<bool>>,
) {
    while let Some(frame) = ws_reader.next().await {
        match frame {
            Ok(Message::Binary(data)) => match codec::decode_server(&data) {
                Ok(event) => {
                    if let ServerEvent::Error { ref reason } = event {
                        tracing::warn!(reason = %reason, "hub reported an error");
                    }
                    let handled = listeners.dispatch(&event);
                    tracing::trace!(kind = %event.kind(), handled, "dispatched hub event");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed hub frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("hub closed the connection");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "hub WebSocket read error");
                break;
            }
        }
    }
    connected.send_replace(false);
    tracing::debug!("hub reader task exiting");
}

/// Forwards queued frames to the socket until the queue closes or a write fails.
async fn writer_loop(
    mut ws_sender: WsSender,
    mut rx: mpsc::UnboundedReceiver<Message>,
    connected: Arc<watch::Sender<bool>>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = ws_sender.send(msg).await {
            tracing::warn!(err = %e, "hub WebSocket write failed");
            break;
        }
        if closing {
            break;
        }
    }
    connected.send_replace(false);
    tracing::debug!("hub writer task exiting");
}

fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(url.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "hub HTTP error: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "hub connection error: {other}"
        ))),
    }
}
