//! Relay client contract
//!
//! The relay is a room-scoped publish channel. A connection yields a sending
//! half (`RelayClient`) and an ordered stream of inbound `RelayEvent`s.

use super::protocol::SignalingMessage;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Inbound event delivered by a relay connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A message from the relay or from the other room member
    Message(SignalingMessage),
    /// The relay connection dropped; no further events follow
    Disconnected(String),
}

/// Sending half of a relay connection
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Publish a message to the relay
    async fn send(&self, message: SignalingMessage) -> Result<()>;

    /// Close the connection; closing twice is a no-op
    async fn close(&self) -> Result<()>;

    /// Check if the connection is still usable
    fn is_open(&self) -> bool;
}

/// An open relay connection
pub struct RelayConnection {
    /// Sending half, shared by the room coordinator and the negotiation loop
    pub client: Arc<dyn RelayClient>,
    /// Inbound events in relay order
    pub events: mpsc::UnboundedReceiver<RelayEvent>,
}

impl RelayConnection {
    /// Bundle a client and its event stream
    pub fn new(client: Arc<dyn RelayClient>, events: mpsc::UnboundedReceiver<RelayEvent>) -> Self {
        Self { client, events }
    }
}

/// Opens relay connections
#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Connect to the relay
    async fn connect(&self) -> Result<RelayConnection>;
}
