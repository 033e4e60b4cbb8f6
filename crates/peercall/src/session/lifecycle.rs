//! Session teardown
//!
//! Hang-up releases every handle in a fixed order: `bye` to the peer, stop
//! local and remote tracks, detach sinks, close the transport, close the data
//! channel, close the relay. Each handle is taken out of the session, so a
//! second hang-up finds nothing left to release. Failures are logged and
//! swallowed.

use super::PeerSession;
use crate::negotiation::NegotiationState;
use crate::signaling::SignalingMessage;
use tracing::{debug, info, warn};

/// What a hang-up released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// `bye` was delivered to the relay
    pub bye_sent: bool,
    /// Tracks stopped by this hang-up
    pub tracks_stopped: usize,
    /// Sinks detached by this hang-up
    pub sinks_detached: usize,
    /// Transport closed by this hang-up
    pub transport_closed: bool,
    /// Data channel closed by this hang-up
    pub data_channel_closed: bool,
    /// Relay connection closed by this hang-up
    pub relay_closed: bool,
}

impl TeardownReport {
    /// Check if nothing was left to release
    pub fn is_noop(&self) -> bool {
        *self == TeardownReport::default()
    }
}

impl PeerSession {
    /// Tear the session down
    ///
    /// Idempotent: calls after the first release nothing and return an empty
    /// report. The final state is `Closed`, or stays `Failed` when teardown
    /// follows a failure.
    pub async fn hang_up(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        if let (Some(relay), Some(room)) = (&self.relay, self.room()) {
            match relay.send(SignalingMessage::Bye(room.to_string())).await {
                Ok(()) => report.bye_sent = true,
                Err(e) => warn!(session = %self.id, error = %e, "Failed to send bye"),
            }
        }

        if let Some(stream) = self.local_stream.take() {
            report.tracks_stopped += stream.stop_all();
        }
        if let Some(stream) = self.remote_stream.take() {
            report.tracks_stopped += stream.stop_all();
        }

        for sink in [self.sinks.local.take(), self.sinks.remote.take()]
            .into_iter()
            .flatten()
        {
            sink.detach();
            report.sinks_detached += 1;
        }

        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!(session = %self.id, error = %e, "Transport close failed");
            }
            report.transport_closed = true;
        }

        if let Some(channel) = self.data_channel.take() {
            if let Err(e) = channel.close().await {
                warn!(session = %self.id, error = %e, "Data channel close failed");
            }
            report.data_channel_closed = true;
        }

        if let Some(relay) = self.relay.take() {
            if let Err(e) = relay.close().await {
                warn!(session = %self.id, error = %e, "Relay close failed");
            }
            report.relay_closed = true;
        }

        if self.state != NegotiationState::Failed {
            self.transition(NegotiationState::Closed);
        }

        if report.is_noop() {
            debug!(session = %self.id, "Hang-up found nothing to release");
        } else {
            info!(session = %self.id, ?report, "Session torn down");
        }
        report
    }
}
