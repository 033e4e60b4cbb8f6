//! Peer session: the single owned negotiation and transport context
//!
//! A `PeerSession` is created when a call starts and torn down by
//! [`PeerSession::hang_up`]. It exclusively owns the transport, the data
//! channel and the media handles; the relay client is shared with the room
//! coordinator.

mod lifecycle;

pub use lifecycle::TeardownReport;

use crate::media::{MediaSink, MediaStream, MediaTrack};
use crate::negotiation::{CandidateBuffer, NegotiationState};
use crate::room::{Role, RoleAssignment};
use crate::signaling::{IceCandidate, RelayClient, SessionDescription, SignalingMessage};
use crate::transport::{DataChannelHandle, MediaTransport};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Something the user interface should know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Session moved to a new state
    StateChanged(NegotiationState),
    /// Role assigned after joining
    RoleAssigned(Role),
    /// The other participant arrived in the room
    PeerJoined,
    /// Data channel opened
    ChannelOpen,
    /// Text received over the data channel
    Chat(String),
    /// Informational status line
    Status(String),
    /// Session failed; the reason is shown to the user
    Failed(String),
}

/// Sinks for the local preview and the remote video
#[derive(Clone, Default)]
pub struct MediaSinks {
    /// Local preview
    pub local: Option<Arc<dyn MediaSink>>,
    /// Remote video
    pub remote: Option<Arc<dyn MediaSink>>,
}

/// Negotiation and transport context for one room
pub struct PeerSession {
    id: String,
    assignment: Option<RoleAssignment>,
    state: NegotiationState,
    state_entered: Instant,

    relay: Option<Arc<dyn RelayClient>>,
    transport: Option<Box<dyn MediaTransport>>,
    data_channel: Option<Arc<dyn DataChannelHandle>>,

    local_stream: Option<MediaStream>,
    remote_stream: Option<MediaStream>,
    sinks: MediaSinks,

    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    local_candidates: Vec<IceCandidate>,
    trickled: usize,
    gathering_complete: bool,
    remote_candidates: CandidateBuffer,
    ready_sent: bool,
}

impl PeerSession {
    /// Create an idle session around the acquired local stream
    pub fn new(relay: Arc<dyn RelayClient>, local_stream: MediaStream, sinks: MediaSinks) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        if let Some(sink) = &sinks.local {
            sink.attach(&local_stream);
        }
        debug!(session = %id, "Peer session created");

        Self {
            id,
            assignment: None,
            state: NegotiationState::Idle,
            state_entered: Instant::now(),
            relay: Some(relay),
            transport: None,
            data_channel: None,
            local_stream: Some(local_stream),
            remote_stream: None,
            sinks,
            local_description: None,
            remote_description: None,
            local_candidates: Vec::new(),
            trickled: 0,
            gathering_complete: false,
            remote_candidates: CandidateBuffer::new(),
            ready_sent: false,
        }
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// When the current state was entered
    pub fn state_entered(&self) -> Instant {
        self.state_entered
    }

    /// Move to `next` if the transition is legal; returns whether it moved
    pub fn transition(&mut self, next: NegotiationState) -> bool {
        if !self.state.can_transition_to(next) {
            debug!(session = %self.id, from = %self.state, to = %next, "Transition refused");
            return false;
        }
        info!(session = %self.id, from = %self.state, to = %next, "State transition");
        self.state = next;
        self.state_entered = Instant::now();
        true
    }

    /// Record the role assignment; a session is assigned at most once
    pub fn assign(&mut self, assignment: RoleAssignment) -> Result<()> {
        if let Some(existing) = &self.assignment {
            return Err(Error::Negotiation(format!(
                "role already assigned ({} in {})",
                existing.role(),
                existing.room()
            )));
        }
        self.assignment = Some(assignment);
        Ok(())
    }

    /// Assigned role, once joined
    pub fn role(&self) -> Option<Role> {
        self.assignment.as_ref().map(RoleAssignment::role)
    }

    /// Room name, once joined
    pub fn room(&self) -> Option<&str> {
        self.assignment.as_ref().map(RoleAssignment::room)
    }

    /// Publish a message through the relay
    pub async fn send_signal(&self, message: SignalingMessage) -> Result<()> {
        let relay = self
            .relay
            .as_ref()
            .ok_or_else(|| Error::SignalingTransport("relay connection released".to_string()))?;
        debug!(session = %self.id, event = message.event_name(), "Sending signal");
        relay.send(message).await
    }

    /// Take ownership of the transport and start sending the local stream
    pub async fn attach_transport(&mut self, transport: Box<dyn MediaTransport>) -> Result<()> {
        if self.transport.is_some() {
            return Err(Error::Negotiation("transport already attached".to_string()));
        }
        if let Some(stream) = &self.local_stream {
            transport.add_local_stream(stream).await?;
        }
        self.transport = Some(transport);
        Ok(())
    }

    /// The transport
    ///
    /// # Errors
    ///
    /// Returns `SessionClosed` once the transport has been released.
    pub fn transport(&self) -> Result<&dyn MediaTransport> {
        self.transport.as_deref().ok_or(Error::SessionClosed)
    }

    /// Check if a transport is attached
    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// The data channel, if one exists
    pub fn data_channel(&self) -> Option<&Arc<dyn DataChannelHandle>> {
        self.data_channel.as_ref()
    }

    /// Adopt a data channel; refused if one is already owned
    pub fn set_data_channel(&mut self, channel: Arc<dyn DataChannelHandle>) -> bool {
        if self.data_channel.is_some() {
            return false;
        }
        self.data_channel = Some(channel);
        true
    }

    /// Local description, once set
    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    /// Record the local description; it is set at most once
    pub fn record_local_description(&mut self, description: SessionDescription) -> Result<()> {
        if self.local_description.is_some() {
            return Err(Error::Negotiation(
                "local description already set for this negotiation".to_string(),
            ));
        }
        self.local_description = Some(description);
        Ok(())
    }

    /// Remote description, once set
    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    /// Record the remote description and release buffered candidates
    pub fn record_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<Vec<IceCandidate>> {
        if self.remote_description.is_some() {
            return Err(Error::Negotiation(
                "remote description already set for this negotiation".to_string(),
            ));
        }
        self.remote_description = Some(description);
        Ok(self.remote_candidates.mark_remote_ready())
    }

    /// Remote candidate buffer
    pub fn remote_candidates(&mut self) -> &mut CandidateBuffer {
        &mut self.remote_candidates
    }

    /// Append a locally discovered candidate
    pub fn push_local_candidate(&mut self, candidate: IceCandidate) {
        self.local_candidates.push(candidate);
    }

    /// Locally discovered candidates in discovery order
    pub fn local_candidates(&self) -> &[IceCandidate] {
        &self.local_candidates
    }

    /// Local candidates not yet trickled to the peer; marks them as sent
    pub fn take_untrickled(&mut self) -> Vec<IceCandidate> {
        let pending = self.local_candidates[self.trickled..].to_vec();
        self.trickled = self.local_candidates.len();
        pending
    }

    /// Record that local candidate gathering finished
    pub fn mark_gathering_complete(&mut self) {
        self.gathering_complete = true;
    }

    /// Check if local candidate gathering finished
    pub fn gathering_complete(&self) -> bool {
        self.gathering_complete
    }

    /// Mark the ready message as sent; returns false if it already was
    pub fn mark_ready_sent(&mut self) -> bool {
        !std::mem::replace(&mut self.ready_sent, true)
    }

    /// Add a remote track and show the remote stream
    pub fn add_remote_track(&mut self, track: MediaTrack) {
        let stream = self.remote_stream.get_or_insert_with(MediaStream::new);
        stream.add_track(track);
        if let Some(sink) = &self.sinks.remote {
            sink.attach(stream);
        }
    }

    /// Local stream, until released
    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.local_stream.as_ref()
    }

    /// Remote stream, once a remote track arrived
    pub fn remote_stream(&self) -> Option<&MediaStream> {
        self.remote_stream.as_ref()
    }

    /// Check if every owned handle has been released
    pub fn is_released(&self) -> bool {
        self.relay.is_none()
            && self.transport.is_none()
            && self.data_channel.is_none()
            && self.sinks.local.is_none()
            && self.sinks.remote.is_none()
    }
}
