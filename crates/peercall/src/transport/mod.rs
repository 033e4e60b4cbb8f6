//! Media transport contract
//!
//! The negotiation loop drives a [`MediaTransport`] and observes it through
//! [`TransportEvent`]s posted on an unbounded channel. All operations are
//! asynchronous and fail with `Error::Negotiation` (descriptions, candidates)
//! or `Error::DataChannel`.

pub mod webrtc;

use crate::config::CallConfig;
use crate::media::{MediaStream, MediaTrack};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use self::webrtc::{WebRtcDataChannel, WebRtcMediaTransport, WebRtcTransportFactory};

/// Connection state reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Not started
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity failed
    Failed,
    /// Closed locally or remotely
    Closed,
}

/// Observation posted by a transport
pub enum TransportEvent {
    /// Local candidate discovered; `None` means gathering completed
    IceCandidate(Option<IceCandidate>),
    /// Remote peer added a track
    RemoteTrack(MediaTrack),
    /// Remote peer announced a data channel
    RemoteDataChannel(Arc<dyn DataChannelHandle>),
    /// A data channel opened
    DataChannelOpen(String),
    /// Text received on a data channel
    DataChannelMessage {
        /// Channel label
        label: String,
        /// Message text
        text: String,
    },
    /// A data channel closed
    DataChannelClosed(String),
    /// Peer connection state changed
    StateChanged(TransportState),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::IceCandidate(c) => f.debug_tuple("IceCandidate").field(c).finish(),
            TransportEvent::RemoteTrack(t) => f.debug_tuple("RemoteTrack").field(t).finish(),
            TransportEvent::RemoteDataChannel(dc) => {
                f.debug_tuple("RemoteDataChannel").field(&dc.label()).finish()
            }
            TransportEvent::DataChannelOpen(l) => f.debug_tuple("DataChannelOpen").field(l).finish(),
            TransportEvent::DataChannelMessage { label, text } => f
                .debug_struct("DataChannelMessage")
                .field("label", label)
                .field("text", text)
                .finish(),
            TransportEvent::DataChannelClosed(l) => {
                f.debug_tuple("DataChannelClosed").field(l).finish()
            }
            TransportEvent::StateChanged(s) => f.debug_tuple("StateChanged").field(s).finish(),
        }
    }
}

/// Sender half used by transports to post events
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Application data channel
#[async_trait]
pub trait DataChannelHandle: Send + Sync {
    /// Channel label
    fn label(&self) -> String;

    /// Check if the channel is open
    fn is_open(&self) -> bool;

    /// Send a text message
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Close the channel
    async fn close(&self) -> Result<()>;
}

/// Peer-to-peer media and data transport
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Generate an offer from the current tracks and channels
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Generate an answer to the remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply the local description
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply the remote description
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Current local description, including gathered candidates
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Add a remote candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Create an application data channel
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelHandle>>;

    /// Send the tracks of a local stream
    async fn add_local_stream(&self, stream: &MediaStream) -> Result<()>;

    /// Close the transport
    async fn close(&self) -> Result<()>;
}

/// Creates transports for new sessions
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a transport that posts its events to `events`
    async fn create(
        &self,
        config: &CallConfig,
        events: TransportEventSender,
    ) -> Result<Box<dyn MediaTransport>>;
}
