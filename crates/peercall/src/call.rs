//! Call driver
//!
//! [`Call::start`] runs the setup steps in order (local media, relay, room,
//! transport), then hands the `PeerSession` to a single task that applies
//! relay messages, transport events and user commands one at a time. The
//! returned [`CallHandle`] talks to that task over channels.

use crate::config::CallConfig;
use crate::media::{acquire_local_stream, MediaSource, StaticMediaSource};
use crate::negotiation::{Flow, NegotiationState, Negotiator, TeardownCause};
use crate::room::{NoPrompt, Role, RoleAssignment, RoomCoordinator, RoomPrompt};
use crate::session::{MediaSinks, Notification, PeerSession, TeardownReport};
use crate::signaling::{RelayConnector, RelayEvent, WebSocketRelayConnector};
use crate::transport::{TransportEvent, TransportFactory, WebRtcTransportFactory};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Collaborators a call is built from
#[derive(Clone)]
pub struct CallDeps {
    /// Capture collaborator
    pub media: Arc<dyn MediaSource>,
    /// Relay connection factory
    pub relay: Arc<dyn RelayConnector>,
    /// Transport factory
    pub transports: Arc<dyn TransportFactory>,
    /// Asked for a room name when none is configured
    pub prompt: Arc<dyn RoomPrompt>,
    /// Rendering collaborators
    pub sinks: MediaSinks,
}

impl CallDeps {
    /// WebSocket relay at `config.relay_url`, webrtc-rs transport, synthetic media
    pub fn webrtc(config: &CallConfig) -> Self {
        Self::new(
            Arc::new(WebSocketRelayConnector::new(config.relay_url.clone())),
            Arc::new(WebRtcTransportFactory),
        )
        .with_media(Arc::new(StaticMediaSource::new().with_synthetic_samples()))
    }

    /// Custom relay and transport; synthetic media, no prompt, no sinks
    pub fn new(relay: Arc<dyn RelayConnector>, transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            media: Arc::new(StaticMediaSource::new()),
            relay,
            transports,
            prompt: Arc::new(NoPrompt),
            sinks: MediaSinks::default(),
        }
    }

    /// Use `media` for capture
    pub fn with_media(mut self, media: Arc<dyn MediaSource>) -> Self {
        self.media = media;
        self
    }

    /// Use `prompt` for the room name
    pub fn with_prompt(mut self, prompt: Arc<dyn RoomPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Render into `sinks`
    pub fn with_sinks(mut self, sinks: MediaSinks) -> Self {
        self.sinks = sinks;
        self
    }
}

enum Command {
    Chat(String, oneshot::Sender<Result<()>>),
    HangUp(Option<oneshot::Sender<TeardownReport>>),
}

/// Entry point for starting calls
pub struct Call;

impl Call {
    /// Start a call
    ///
    /// Setup errors are returned here: `InvalidConfig`, `MediaAccess` (before
    /// any relay activity), `SignalingTransport`, `InvalidRoomName`,
    /// `RoomFull` (no transport is created). Anything that fails after the
    /// setup is reported through notifications and the state watch.
    #[instrument(skip_all, fields(room = ?config.room))]
    pub async fn start(config: CallConfig, deps: CallDeps) -> Result<CallHandle> {
        config.validate()?;

        let local_stream = acquire_local_stream(deps.media.as_ref()).await?;

        let mut relay = match deps.relay.connect().await {
            Ok(relay) => relay,
            Err(e) => {
                local_stream.stop_all();
                return Err(e);
            }
        };

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let negotiator = Negotiator::new(&config, notify_tx);
        let mut session = PeerSession::new(Arc::clone(&relay.client), local_stream, deps.sinks.clone());
        negotiator.transition(&mut session, NegotiationState::Joining)?;

        let coordinator = RoomCoordinator::new().with_reply_timeout(config.negotiation_timeout());
        let assignment = match coordinator
            .join(&mut relay, config.room.clone(), deps.prompt.as_ref())
            .await
        {
            Ok(assignment) => assignment,
            Err(e) => {
                session.hang_up().await;
                return Err(e);
            }
        };

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        if let Err(e) = Self::negotiate(&config, &deps, &negotiator, &mut session, assignment.clone(), transport_tx).await {
            negotiator.fail(&mut session, &e);
            session.hang_up().await;
            return Err(e);
        }

        let (state_tx, state_rx) = watch::channel(session.state());
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let event_loop = CallLoop {
            session,
            negotiator,
            relay_events: relay.events,
            transport_events: transport_rx,
            commands: command_rx,
            state: state_tx,
            timeout: config.negotiation_timeout(),
        };
        let task = tokio::spawn(event_loop.run());

        Ok(CallHandle {
            assignment,
            commands: command_tx,
            state: state_rx,
            notifications: Some(notify_rx),
            task: Some(task),
        })
    }

    async fn negotiate(
        config: &CallConfig,
        deps: &CallDeps,
        negotiator: &Negotiator,
        session: &mut PeerSession,
        assignment: RoleAssignment,
        transport_events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Flow> {
        let transport = deps.transports.create(config, transport_events).await?;
        session.attach_transport(transport).await?;
        negotiator.on_role_assigned(session, assignment).await
    }
}

/// Handle to a running call
///
/// Dropping the handle hangs up.
pub struct CallHandle {
    assignment: RoleAssignment,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<NegotiationState>,
    notifications: Option<mpsc::UnboundedReceiver<Notification>>,
    task: Option<JoinHandle<()>>,
}

impl CallHandle {
    /// Assigned role
    pub fn role(&self) -> Role {
        self.assignment.role()
    }

    /// Room name
    pub fn room(&self) -> &str {
        self.assignment.room()
    }

    /// Current session state
    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> watch::Receiver<NegotiationState> {
        self.state.clone()
    }

    /// Wait until the state satisfies `predicate`
    ///
    /// # Errors
    ///
    /// `Timeout` if `limit` passes first, `SessionClosed` if the session ends
    /// in a state that does not satisfy it.
    pub async fn wait_for_state<F>(&self, limit: Duration, predicate: F) -> Result<NegotiationState>
    where
        F: Fn(NegotiationState) -> bool,
    {
        let mut state = self.state.clone();
        let wait = async {
            loop {
                let current = *state.borrow_and_update();
                if predicate(current) {
                    return Ok(current);
                }
                if current.is_terminal() || state.changed().await.is_err() {
                    let last = *state.borrow();
                    return if predicate(last) { Ok(last) } else { Err(Error::SessionClosed) };
                }
            }
        };
        tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| Error::Timeout(format!("state still {}", self.state())))?
    }

    /// Take the notification stream; only the first call gets it
    pub fn take_notifications(&mut self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        self.notifications.take()
    }

    /// Send text over the data channel
    ///
    /// # Errors
    ///
    /// `DataChannel` when no open channel exists, `SessionClosed` after hang-up.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Chat(text.into(), reply_tx))
            .map_err(|_| Error::SessionClosed)?;
        reply_rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Hang up and wait for teardown
    ///
    /// Safe to call any number of times; only the first call releases anything.
    pub async fn hang_up(&mut self) -> TeardownReport {
        let (reply_tx, reply_rx) = oneshot::channel();
        let report = match self.commands.send(Command::HangUp(Some(reply_tx))) {
            Ok(()) => reply_rx.await.unwrap_or_default(),
            Err(_) => TeardownReport::default(),
        };
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Call task ended abnormally");
            }
        }
        report
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!(room = %self.assignment.room(), "Call handle dropped, hanging up");
            let _ = self.commands.send(Command::HangUp(None));
        }
    }
}

struct CallLoop {
    session: PeerSession,
    negotiator: Negotiator,
    relay_events: mpsc::UnboundedReceiver<RelayEvent>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<NegotiationState>,
    timeout: Option<Duration>,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl CallLoop {
    fn negotiation_deadline(&self) -> Option<Instant> {
        let limit = self.timeout?;
        self.session
            .state()
            .is_negotiating()
            .then(|| self.session.state_entered() + limit)
    }

    async fn run(mut self) {
        let mut relay_open = true;
        let mut hang_up_reply = None;

        let cause = loop {
            let deadline = self.negotiation_deadline();

            let step = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::HangUp(reply)) => {
                        hang_up_reply = reply;
                        Ok(Flow::Teardown(TeardownCause::LocalHangUp))
                    }
                    Some(Command::Chat(text, reply)) => {
                        let _ = reply.send(self.negotiator.send_chat(&self.session, &text).await);
                        Ok(Flow::Continue)
                    }
                    None => Ok(Flow::Teardown(TeardownCause::LocalHangUp)),
                },
                event = self.relay_events.recv(), if relay_open => match event {
                    Some(RelayEvent::Message(message)) => {
                        self.negotiator.on_signal(&mut self.session, message).await
                    }
                    Some(RelayEvent::Disconnected(reason)) => {
                        relay_open = false;
                        self.negotiator.on_relay_disconnected(&mut self.session, reason)
                    }
                    None => {
                        relay_open = false;
                        self.negotiator
                            .on_relay_disconnected(&mut self.session, "relay stream ended".to_string())
                    }
                },
                Some(event) = self.transport_events.recv() => {
                    self.negotiator.on_transport_event(&mut self.session, event).await
                }
                _ = sleep_until(deadline), if deadline.is_some() => {
                    Err(Error::Timeout(format!("{} did not complete", self.session.state())))
                }
            };

            let flow = match step {
                Ok(flow) => flow,
                Err(e) if e.is_fatal_to_session() => self.negotiator.fail(&mut self.session, &e),
                Err(e) => {
                    warn!(session = %self.session.id(), error = %e, "Input not applied");
                    Flow::Continue
                }
            };
            self.state.send_replace(self.session.state());

            if let Flow::Teardown(cause) = flow {
                break cause;
            }
        };

        info!(session = %self.session.id(), ?cause, "Ending call");
        let before = self.session.state();
        let report = self.session.hang_up().await;
        let final_state = self.session.state();
        if final_state != before {
            self.negotiator.report_state(final_state);
        }
        self.state.send_replace(final_state);

        if let Some(reply) = hang_up_reply {
            let _ = reply.send(report);
        }

        // Commands that raced the teardown
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Chat(_, reply) => {
                    let _ = reply.send(Err(Error::SessionClosed));
                }
                Command::HangUp(Some(reply)) => {
                    let _ = reply.send(TeardownReport::default());
                }
                Command::HangUp(None) => {}
            }
        }
    }
}
