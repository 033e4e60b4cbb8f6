//! WebSocket relay client and server
//!
//! Frames are JSON text messages (see [`super::protocol`]). The server keeps
//! room membership in a [`RoomRegistry`] and forwards peer messages to the
//! other member of the sender's room.

use super::protocol::SignalingMessage;
use super::relay::{RelayClient, RelayConnection, RelayConnector, RelayEvent};
use super::rooms::{MemberId, RoomRegistry};
use crate::{Error, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

// ============================================================================
// Client
// ============================================================================

/// Sending half of a WebSocket relay connection
pub struct WebSocketRelayClient {
    url: String,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    open: Arc<AtomicBool>,
}

impl WebSocketRelayClient {
    /// Connect to a relay server
    pub async fn connect(url: &str) -> Result<RelayConnection> {
        info!("Connecting to relay at {}", url);

        let (ws_stream, _response) = connect_async(url).await.map_err(|e| {
            Error::SignalingTransport(format!("Failed to connect to {}: {}", url, e))
        })?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let open = Arc::new(AtomicBool::new(true));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<RelayEvent>();

        // Forward queued frames to the socket
        let open_writer = Arc::clone(&open);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = ws_tx.send(msg).await {
                    warn!("Failed to send relay frame: {}", e);
                    open_writer.store(false, Ordering::SeqCst);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        // Decode inbound frames in order
        let open_reader = Arc::clone(&open);
        let url_owned = url.to_string();
        tokio::spawn(async move {
            let reason = loop {
                match ws_rx.next().await {
                    Some(Ok(Message::Text(text))) => match SignalingMessage::from_json(&text) {
                        Ok(msg) => {
                            debug!(event = msg.event_name(), "Relay frame received");
                            if event_tx.send(RelayEvent::Message(msg)).is_err() {
                                break "listener dropped".to_string();
                            }
                        }
                        Err(e) => warn!("Ignoring malformed relay frame: {}", e),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        break "relay closed the connection".to_string();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("relay connection error: {}", e),
                }
            };

            open_reader.store(false, Ordering::SeqCst);
            info!(url = %url_owned, reason = %reason, "Relay connection ended");
            let _ = event_tx.send(RelayEvent::Disconnected(reason));
        });

        let client = Arc::new(Self {
            url: url.to_string(),
            outbound: Mutex::new(Some(out_tx)),
            open,
        });

        Ok(RelayConnection::new(client, event_rx))
    }

    /// Relay URL this client is connected to
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RelayClient for WebSocketRelayClient {
    async fn send(&self, message: SignalingMessage) -> Result<()> {
        let text = message.to_json()?;
        let guard = self.outbound.lock().await;
        let tx = guard
            .as_ref()
            .filter(|_| self.open.load(Ordering::SeqCst))
            .ok_or_else(|| Error::SignalingTransport("relay connection is closed".to_string()))?;

        tx.send(Message::Text(text))
            .map_err(|_| Error::SignalingTransport("relay writer has stopped".to_string()))
    }

    async fn close(&self) -> Result<()> {
        let tx = self.outbound.lock().await.take();
        self.open.store(false, Ordering::SeqCst);
        if let Some(tx) = tx {
            debug!(url = %self.url, "Closing relay connection");
            let _ = tx.send(Message::Close(None));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Connects to a relay server by URL
#[derive(Debug, Clone)]
pub struct WebSocketRelayConnector {
    url: String,
}

impl WebSocketRelayConnector {
    /// Create a connector for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl RelayConnector for WebSocketRelayConnector {
    async fn connect(&self) -> Result<RelayConnection> {
        WebSocketRelayClient::connect(&self.url).await
    }
}

// ============================================================================
// Server
// ============================================================================

#[derive(Default)]
struct ServerState {
    rooms: RoomRegistry,
    members: HashMap<MemberId, mpsc::UnboundedSender<String>>,
}

/// Room relay server
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<Mutex<ServerState>>,
    next_id: Arc<AtomicU64>,
}

impl RelayServer {
    /// Bind the server to `addr` (port 0 picks a free port)
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: Arc::new(Mutex::new(ServerState::default())),
            next_id: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start accepting connections
    pub fn start(self) -> Result<RelayServerHandle> {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let connection_shutdown = shutdown_tx.clone();

        info!("Relay server listening on ws://{}", local_addr);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = self.listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                                info!(member = id, "Accepted relay connection from {}", peer_addr);
                                let state = Arc::clone(&self.state);
                                let shutdown_rx = connection_shutdown.subscribe();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, id, state, shutdown_rx).await {
                                        error!(member = id, "Relay connection error from {}: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => error!("Failed to accept relay connection: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Relay server received shutdown signal");
                        break;
                    }
                }
            }
            info!("Relay server accept loop exited");
        });

        Ok(RelayServerHandle {
            local_addr,
            shutdown_tx,
            task: Some(task),
        })
    }
}

/// Handle for controlling a running relay server
pub struct RelayServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl RelayServerHandle {
    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// WebSocket URL clients should connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Shut down the server and close every connection
    pub async fn shutdown(mut self) {
        info!("Sending shutdown signal to relay server");
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Serve one WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    id: MemberId,
    state: Arc<Mutex<ServerState>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> std::result::Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Channel for frames addressed to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.lock().await.members.insert(id, tx);

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(text) = outbound else { break };
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    error!(member = id, "Failed to send relay frame: {}", e);
                    break;
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => relay_frame(&state, id, &text).await,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(member = id, "Relay connection closed by client");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(member = id, "Relay connection error: {}", e);
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    // Cleanup on disconnect
    let mut state = state.lock().await;
    state.members.remove(&id);
    if let Some(room) = state.rooms.leave(id) {
        info!(member = id, room = %room, "Member left room on disconnect");
    }

    Ok(())
}

/// Route one inbound text frame
async fn relay_frame(state: &Arc<Mutex<ServerState>>, from: MemberId, text: &str) {
    let message = match SignalingMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(member = from, "Dropping malformed relay frame: {}", e);
            return;
        }
    };
    debug!(member = from, event = message.event_name(), "Relay frame received");

    let mut state = state.lock().await;
    for delivery in state.rooms.route(from, message) {
        let text = match delivery.message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode relay frame: {}", e);
                continue;
            }
        };
        if let Some(tx) = state.members.get(&delivery.to) {
            let _ = tx.send(text);
        }
    }
}
