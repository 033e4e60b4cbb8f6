//! In-process relay
//!
//! Routes messages between connections of the same process through a shared
//! `RoomRegistry`. Used for loopback calls and by the integration tests.

use super::relay::{RelayClient, RelayConnection, RelayConnector, RelayEvent};
use super::rooms::{MemberId, RoomRegistry};
use super::protocol::SignalingMessage;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

#[derive(Default)]
struct Hub {
    rooms: RoomRegistry,
    members: HashMap<MemberId, mpsc::UnboundedSender<RelayEvent>>,
}

/// In-process relay hub
#[derive(Clone, Default)]
pub struct InMemoryRelay {
    hub: Arc<Mutex<Hub>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryRelay {
    /// Create an empty relay
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection to this relay
    pub async fn open(&self) -> RelayConnection {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.lock().await.members.insert(id, tx);
        debug!(member = id, "In-memory relay connection opened");

        let client = Arc::new(InMemoryRelayClient {
            id,
            hub: Arc::clone(&self.hub),
            open: AtomicBool::new(true),
        });
        RelayConnection::new(client, rx)
    }

    /// Number of members currently in `room`
    pub async fn member_count(&self, room: &str) -> usize {
        self.hub.lock().await.rooms.member_count(room)
    }

    /// Number of open connections
    pub async fn connection_count(&self) -> usize {
        self.hub.lock().await.members.len()
    }

    /// Drop every connection as if the relay went away
    pub async fn shutdown(&self) {
        let mut hub = self.hub.lock().await;
        let ids: Vec<MemberId> = hub.members.keys().copied().collect();
        for id in ids {
            hub.rooms.leave(id);
            if let Some(tx) = hub.members.remove(&id) {
                let _ = tx.send(RelayEvent::Disconnected("relay shut down".to_string()));
            }
        }
    }
}

#[async_trait]
impl RelayConnector for InMemoryRelay {
    async fn connect(&self) -> Result<RelayConnection> {
        Ok(self.open().await)
    }
}

/// Sending half of an in-memory relay connection
pub struct InMemoryRelayClient {
    id: MemberId,
    hub: Arc<Mutex<Hub>>,
    open: AtomicBool,
}

#[async_trait]
impl RelayClient for InMemoryRelayClient {
    async fn send(&self, message: SignalingMessage) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::SignalingTransport(
                "relay connection is closed".to_string(),
            ));
        }

        let mut hub = self.hub.lock().await;
        if !hub.members.contains_key(&self.id) {
            return Err(Error::SignalingTransport(
                "relay connection was dropped".to_string(),
            ));
        }

        for delivery in hub.rooms.route(self.id, message) {
            match hub.members.get(&delivery.to) {
                Some(tx) => {
                    if tx.send(RelayEvent::Message(delivery.message)).is_err() {
                        debug!(member = delivery.to, "Recipient stopped listening");
                    }
                }
                None => warn!(member = delivery.to, "Recipient no longer connected"),
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut hub = self.hub.lock().await;
        hub.rooms.leave(self.id);
        hub.members.remove(&self.id);
        debug!(member = self.id, "In-memory relay connection closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
