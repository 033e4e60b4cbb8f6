//! Offer/answer and candidate exchange
//!
//! The [`Negotiator`] is the transition function of the call loop. Every
//! input (relay message, transport event, relay loss) is applied to the
//! `PeerSession` to completion before the next one is looked at, so the
//! ordering of description and candidate operations is fixed by the order in
//! which inputs arrive.

use super::NegotiationState;
use crate::config::{CallConfig, IcePolicy};
use crate::room::{Role, RoleAssignment};
use crate::session::{Notification, PeerSession};
use crate::signaling::{IceCandidate, SessionDescription, SignalingMessage};
use crate::transport::{TransportEvent, TransportState};
use crate::{Error, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// What the call loop should do after an input was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Keep processing inputs
    Continue,
    /// Tear the session down
    Teardown(TeardownCause),
}

/// Why a session is being torn down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownCause {
    /// Local user hung up
    LocalHangUp,
    /// Peer sent `bye`
    RemoteBye,
    /// Session failed
    Failed(String),
}

/// Drives a `PeerSession` through the negotiation states
pub struct Negotiator {
    ice_policy: IcePolicy,
    channel_label: String,
    ready_message: String,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl Negotiator {
    /// Create a negotiator that reports to `notifications`
    pub fn new(config: &CallConfig, notifications: mpsc::UnboundedSender<Notification>) -> Self {
        Self {
            ice_policy: config.ice_policy,
            channel_label: config.data_channel_label.clone(),
            ready_message: config.ready_message.clone(),
            notifications,
        }
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notifications.send(notification);
    }

    /// Report a state change made outside the negotiator (teardown)
    pub fn report_state(&self, state: NegotiationState) {
        self.notify(Notification::StateChanged(state));
    }

    /// Apply a state transition and report it
    pub fn transition(&self, session: &mut PeerSession, next: NegotiationState) -> Result<()> {
        if session.state() == next {
            return Ok(());
        }
        if !session.transition(next) {
            return Err(Error::Negotiation(format!(
                "illegal transition {} -> {}",
                session.state(),
                next
            )));
        }
        self.notify(Notification::StateChanged(next));
        Ok(())
    }

    /// Record the role and, as Caller, start negotiating
    ///
    /// The Caller is the second arrival, so the peer is already in the room
    /// and the offer goes out immediately. The Callee waits for `invite`.
    #[instrument(skip(self, session), fields(session = %session.id(), room = %assignment.room(), role = %assignment.role()))]
    pub async fn on_role_assigned(
        &self,
        session: &mut PeerSession,
        assignment: RoleAssignment,
    ) -> Result<Flow> {
        let role = assignment.role();
        session.assign(assignment)?;
        self.notify(Notification::RoleAssigned(role));

        match role {
            Role::Caller => {
                self.notify(Notification::Status("Peer present, sending offer".to_string()));
                self.begin_as_caller(session).await?;
            }
            Role::Callee => {
                self.notify(Notification::Status("Waiting for peer".to_string()));
            }
        }
        Ok(Flow::Continue)
    }

    /// Channel, offer, local description, `invite`; in that order
    async fn begin_as_caller(&self, session: &mut PeerSession) -> Result<()> {
        self.transition(session, NegotiationState::Negotiating(Role::Caller))?;

        let channel = session
            .transport()?
            .create_data_channel(&self.channel_label)
            .await?;
        session.set_data_channel(channel);

        let offer = session.transport()?.create_offer().await?;
        session.transport()?.set_local_description(offer.clone()).await?;
        session.record_local_description(offer.clone())?;

        session.send_signal(SignalingMessage::Invite(offer)).await?;
        info!("Offer sent");
        self.after_local_description_sent(session).await
    }

    /// Apply a relay message
    #[instrument(skip(self, session, message), fields(session = %session.id(), state = %session.state(), event = message.event_name()))]
    pub async fn on_signal(
        &self,
        session: &mut PeerSession,
        message: SignalingMessage,
    ) -> Result<Flow> {
        if session.state().is_terminal() {
            debug!("Session finished, ignoring signal");
            return Ok(Flow::Continue);
        }

        match message {
            SignalingMessage::NewPeer(room) => {
                info!(room = %room, "Peer joined the room");
                self.notify(Notification::PeerJoined);
            }
            SignalingMessage::Invite(description) => {
                self.on_invite(session, description).await?;
            }
            SignalingMessage::Accept(answer) => {
                self.on_answer(session, answer).await?;
            }
            SignalingMessage::IceCandidate(candidate) => {
                self.on_remote_candidate(session, candidate).await?;
            }
            SignalingMessage::Bye(room) => {
                info!(room = %room, "Peer hung up");
                self.notify(Notification::Status("Peer hung up".to_string()));
                return Ok(Flow::Teardown(TeardownCause::RemoteBye));
            }
            other => {
                debug!(event = other.event_name(), "Ignoring relay event after join");
            }
        }
        Ok(Flow::Continue)
    }

    async fn on_invite(&self, session: &mut PeerSession, description: SessionDescription) -> Result<()> {
        // Once a remote description exists, an invite only carries candidates
        if session.remote_description().is_some() {
            let candidates = description.candidates();
            debug!(count = candidates.len(), "Candidate-bearing update");
            for candidate in candidates {
                self.on_remote_candidate(session, candidate).await?;
            }
            return Ok(());
        }

        match (session.state(), session.role()) {
            (NegotiationState::Joining, Some(Role::Callee)) if description.is_offer() => {
                self.answer_offer(session, description).await
            }
            _ if !description.is_offer() => {
                // An answer-typed update that overtook its `ok`
                for candidate in description.candidates() {
                    session.remote_candidates().offer(candidate);
                }
                Ok(())
            }
            (state, role) => {
                warn!(%state, ?role, "Unexpected offer, ignoring");
                Ok(())
            }
        }
    }

    /// Remote description, answer, local description, `ok`; in that order
    async fn answer_offer(&self, session: &mut PeerSession, offer: SessionDescription) -> Result<()> {
        self.transition(session, NegotiationState::Negotiating(Role::Callee))?;

        session.transport()?.set_remote_description(offer.clone()).await?;
        let flushed = session.record_remote_description(offer)?;
        self.apply_candidates(session, flushed).await?;

        let answer = session.transport()?.create_answer().await?;
        session.transport()?.set_local_description(answer.clone()).await?;
        session.record_local_description(answer.clone())?;

        session.send_signal(SignalingMessage::Accept(answer)).await?;
        info!("Answer sent");
        self.after_local_description_sent(session).await
    }

    async fn on_answer(&self, session: &mut PeerSession, answer: SessionDescription) -> Result<()> {
        if session.state() != NegotiationState::Negotiating(Role::Caller) {
            warn!(state = %session.state(), "Unexpected answer, ignoring");
            return Ok(());
        }
        if session.remote_description().is_some() {
            debug!("Answer already applied");
            return Ok(());
        }

        session.transport()?.set_remote_description(answer.clone()).await?;
        let flushed = session.record_remote_description(answer)?;
        self.apply_candidates(session, flushed).await?;

        self.transition(session, NegotiationState::Connected)?;
        Ok(())
    }

    async fn on_remote_candidate(&self, session: &mut PeerSession, candidate: IceCandidate) -> Result<()> {
        if let Some(ready) = session.remote_candidates().offer(candidate) {
            self.apply_candidates(session, vec![ready]).await?;
        }
        Ok(())
    }

    async fn apply_candidates(&self, session: &PeerSession, candidates: Vec<IceCandidate>) -> Result<()> {
        if candidates.is_empty() {
            return Ok(());
        }
        debug!(count = candidates.len(), "Applying remote candidates");
        let transport = session.transport()?;
        for candidate in candidates {
            transport.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    async fn after_local_description_sent(&self, session: &mut PeerSession) -> Result<()> {
        match self.ice_policy {
            IcePolicy::Trickle => self.trickle_pending(session).await,
            IcePolicy::FullDescriptionOnComplete if session.gathering_complete() => {
                self.send_description_update(session).await
            }
            IcePolicy::FullDescriptionOnComplete => Ok(()),
        }
    }

    async fn trickle_pending(&self, session: &mut PeerSession) -> Result<()> {
        for candidate in session.take_untrickled() {
            session
                .send_signal(SignalingMessage::IceCandidate(candidate))
                .await?;
        }
        Ok(())
    }

    /// Re-send the current local description, now carrying candidates
    async fn send_description_update(&self, session: &PeerSession) -> Result<()> {
        let Some(current) = session.transport()?.local_description().await else {
            warn!("No local description to re-send");
            return Ok(());
        };
        debug!(candidates = current.candidates().len(), "Re-sending local description");
        session.send_signal(SignalingMessage::Invite(current)).await
    }

    /// Apply a transport event
    pub async fn on_transport_event(
        &self,
        session: &mut PeerSession,
        event: TransportEvent,
    ) -> Result<Flow> {
        if session.state().is_terminal() {
            return Ok(Flow::Continue);
        }

        match event {
            TransportEvent::IceCandidate(Some(candidate)) => {
                session.push_local_candidate(candidate);
                if self.ice_policy == IcePolicy::Trickle && session.local_description().is_some() {
                    self.trickle_pending(session).await?;
                }
            }
            TransportEvent::IceCandidate(None) => {
                info!(candidates = session.local_candidates().len(), "Local candidate gathering complete");
                session.mark_gathering_complete();
                if self.ice_policy == IcePolicy::FullDescriptionOnComplete
                    && session.local_description().is_some()
                {
                    self.send_description_update(session).await?;
                }
            }
            TransportEvent::RemoteTrack(track) => {
                info!(kind = %track.kind(), track = %track.id(), "Remote track");
                session.add_remote_track(track);
            }
            TransportEvent::RemoteDataChannel(channel) => {
                let label = channel.label();
                let open = channel.is_open();
                if session.role() == Some(Role::Caller) || !session.set_data_channel(channel) {
                    warn!(label = %label, "Ignoring unexpected remote data channel");
                } else {
                    info!(label = %label, "Adopted remote data channel");
                    if open {
                        self.on_channel_open(session).await?;
                    }
                }
            }
            TransportEvent::DataChannelOpen(label) => {
                if session.data_channel().map(|c| c.label()) == Some(label.clone()) {
                    self.on_channel_open(session).await?;
                } else {
                    debug!(label = %label, "Open event for a channel not yet adopted");
                }
            }
            TransportEvent::DataChannelMessage { text, .. } => {
                self.notify(Notification::Chat(text));
            }
            TransportEvent::DataChannelClosed(label) => {
                info!(label = %label, "Data channel closed");
                self.notify(Notification::Status(format!("Data channel '{}' closed", label)));
            }
            TransportEvent::StateChanged(TransportState::Failed) => {
                return Err(Error::Negotiation("peer connectivity failed".to_string()));
            }
            TransportEvent::StateChanged(TransportState::Disconnected) => {
                self.notify(Notification::Status("Peer connection interrupted".to_string()));
            }
            TransportEvent::StateChanged(state) => {
                debug!(?state, "Transport state");
            }
        }
        Ok(Flow::Continue)
    }

    async fn on_channel_open(&self, session: &mut PeerSession) -> Result<()> {
        if session.state() == NegotiationState::Negotiating(Role::Callee) {
            self.transition(session, NegotiationState::Connected)?;
        }
        if !session.mark_ready_sent() {
            return Ok(());
        }

        self.notify(Notification::ChannelOpen);
        if let Some(channel) = session.data_channel() {
            if let Err(e) = channel.send_text(&self.ready_message).await {
                warn!(error = %e, "Failed to send ready message");
            }
        }
        Ok(())
    }

    /// Apply the loss of the relay connection
    pub fn on_relay_disconnected(&self, session: &mut PeerSession, reason: String) -> Result<Flow> {
        match session.state() {
            NegotiationState::Connected => {
                warn!(reason = %reason, "Relay lost, media session continues");
                self.notify(Notification::Status(format!("Signaling lost: {}", reason)));
                Ok(Flow::Continue)
            }
            state if state.is_terminal() => Ok(Flow::Continue),
            _ => Err(Error::SignalingTransport(reason)),
        }
    }

    /// Send a chat message over the data channel
    pub async fn send_chat(&self, session: &PeerSession, text: &str) -> Result<()> {
        let channel = session
            .data_channel()
            .ok_or_else(|| Error::DataChannel("no data channel".to_string()))?;
        if !channel.is_open() {
            return Err(Error::DataChannel("data channel is not open".to_string()));
        }
        channel.send_text(text).await
    }

    /// Move the session to `Failed` and report why
    pub fn fail(&self, session: &mut PeerSession, err: &Error) -> Flow {
        error!(session = %session.id(), state = %session.state(), error = %err, "Session failed");
        if session.transition(NegotiationState::Failed) {
            self.notify(Notification::StateChanged(NegotiationState::Failed));
        }
        self.notify(Notification::Failed(err.to_string()));
        Flow::Teardown(TeardownCause::Failed(err.to_string()))
    }
}
