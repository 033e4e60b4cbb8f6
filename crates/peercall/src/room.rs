//! Room coordinator: join-by-name and role assignment
//!
//! Roles follow arrival order: the first participant in a room waits for an
//! offer (Callee), the second participant sends it (Caller). The mapping from
//! relay events to arrival order lives in [`JoinReply::from_message`] so that
//! negotiation never looks at the relay vocabulary.

use crate::signaling::{RelayConnection, RelayEvent, SignalingMessage};
use crate::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Negotiation role of the local participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the data channel and sends the offer
    Caller,
    /// Answers the offer
    Callee,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Caller => write!(f, "caller"),
            Role::Callee => write!(f, "callee"),
        }
    }
}

/// Arrival order of the local participant in its room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Room was empty
    First,
    /// One participant was already waiting
    Second,
}

impl Arrival {
    /// Role implied by arrival order
    pub fn role(self) -> Role {
        match self {
            Arrival::First => Role::Callee,
            Arrival::Second => Role::Caller,
        }
    }
}

/// Role assigned after a successful join; immutable once made
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    room: String,
    arrival: Arrival,
}

impl RoleAssignment {
    /// Create an assignment for `room`
    pub fn new(room: impl Into<String>, arrival: Arrival) -> Self {
        Self {
            room: room.into(),
            arrival,
        }
    }

    /// Room name
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Assigned role
    pub fn role(&self) -> Role {
        self.arrival.role()
    }

    /// Whether the other participant is already present
    pub fn peer_present(&self) -> bool {
        self.arrival == Arrival::Second
    }
}

/// Relay reply to a join request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinReply {
    /// Join accepted
    Accepted(Arrival),
    /// Room already has two participants
    Full,
}

impl JoinReply {
    /// Interpret a relay message as a reply to joining `room`
    pub fn from_message(room: &str, message: &SignalingMessage) -> Option<Self> {
        match message {
            SignalingMessage::Created(r) if r == room => Some(JoinReply::Accepted(Arrival::First)),
            SignalingMessage::Joined(r) if r == room => Some(JoinReply::Accepted(Arrival::Second)),
            SignalingMessage::Full(r) if r == room => Some(JoinReply::Full),
            _ => None,
        }
    }
}

/// Source of a room name when none was configured
#[async_trait]
pub trait RoomPrompt: Send + Sync {
    /// Ask the user for a room name; None if the user cancelled
    async fn prompt_room_name(&self) -> Option<String>;
}

/// Prompt that never answers, for non-interactive use
pub struct NoPrompt;

#[async_trait]
impl RoomPrompt for NoPrompt {
    async fn prompt_room_name(&self) -> Option<String> {
        None
    }
}

/// Validate and normalize a room name
pub fn normalize_room_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidRoomName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Joins rooms through the relay and assigns the local role
#[derive(Debug, Clone, Default)]
pub struct RoomCoordinator {
    reply_timeout: Option<Duration>,
}

impl RoomCoordinator {
    /// Create a coordinator that waits indefinitely for the relay reply
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the wait for the relay's reply
    pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Join `room` (or a prompted name) and wait for the relay's verdict
    ///
    /// # Errors
    ///
    /// - `InvalidRoomName` if the resulting name is empty; nothing is sent
    /// - `RoomFull` if the room already has two participants
    /// - `SignalingTransport` if the relay drops before replying
    /// - `Timeout` if a reply timeout is set and expires
    #[instrument(skip(self, relay, prompt))]
    pub async fn join(
        &self,
        relay: &mut RelayConnection,
        room: Option<String>,
        prompt: &dyn RoomPrompt,
    ) -> Result<RoleAssignment> {
        let raw = match room {
            Some(room) => room,
            None => prompt.prompt_room_name().await.unwrap_or_default(),
        };
        let room = normalize_room_name(&raw)?;

        info!(room = %room, "Joining room");
        relay.client.send(SignalingMessage::Join(room.clone())).await?;

        let wait = self.await_reply(relay, &room);
        let reply = match self.reply_timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| Error::Timeout(format!("no reply to join {:?}", room)))??,
            None => wait.await?,
        };

        match reply {
            JoinReply::Accepted(arrival) => {
                let assignment = RoleAssignment::new(room, arrival);
                info!(
                    room = %assignment.room(),
                    role = %assignment.role(),
                    "Role assigned"
                );
                Ok(assignment)
            }
            JoinReply::Full => {
                warn!(room = %room, "Room is full");
                Err(Error::RoomFull(room))
            }
        }
    }

    async fn await_reply(&self, relay: &mut RelayConnection, room: &str) -> Result<JoinReply> {
        loop {
            match relay.events.recv().await {
                Some(RelayEvent::Message(message)) => {
                    if let Some(reply) = JoinReply::from_message(room, &message) {
                        return Ok(reply);
                    }
                    debug!(event = message.event_name(), "Ignoring relay event while joining");
                }
                Some(RelayEvent::Disconnected(reason)) => {
                    return Err(Error::SignalingTransport(reason));
                }
                None => {
                    return Err(Error::SignalingTransport(
                        "relay closed before join completed".to_string(),
                    ));
                }
            }
        }
    }
}
