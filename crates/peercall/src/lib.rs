//! Two-party WebRTC calls negotiated over a room relay
//!
//! Two participants join the same named room on a relay. The second arrival
//! becomes the Caller: it creates the data channel, sends an offer (`invite`)
//! and waits for the answer (`ok`). The first arrival is the Callee and
//! answers. Connectivity candidates are exchanged through the relay, and
//! either side ends the call with `bye`.
//!
//! # Features
//!
//! - **Room coordinator**: join-by-name, at most two participants, role by arrival order
//! - **Negotiation state machine**: Idle → Joining → Negotiating → Connected → Closed, or Failed
//! - **ICE policies**: full-description re-send on gathering completion, or trickle
//! - **Media transport**: webrtc-rs peer connections with a text data channel
//! - **Relay**: WebSocket client and server, plus an in-process relay
//! - **Idempotent hang-up**: ordered best-effort release of every handle
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  CallHandle (chat, hang-up, state, notifications)      │
//! │  ↓ commands                                            │
//! │  Call loop (one task, one event at a time)             │
//! │  ├─ RelayEvent     ← RelayClient (WebSocket/memory)    │
//! │  ├─ TransportEvent ← MediaTransport (webrtc-rs)        │
//! │  └─ Negotiator → PeerSession                           │
//! │       ├─ CandidateBuffer (remote candidates)           │
//! │       └─ hang_up (bye, tracks, sinks, pc, dc, relay)   │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use peercall::{CallConfig, IcePolicy};
//!
//! let config = CallConfig {
//!     relay_url: "ws://localhost:8080".to_string(),
//!     room: Some("r1".to_string()),
//!     ..Default::default()
//! };
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.ice_policy, IcePolicy::FullDescriptionOnComplete);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use peercall::{Call, CallConfig, CallDeps};
//!
//! # async fn example() -> peercall::Result<()> {
//! let config = CallConfig {
//!     room: Some("r1".to_string()),
//!     ..Default::default()
//! };
//! let mut call = Call::start(config.clone(), CallDeps::webrtc(&config)).await?;
//!
//! call.send_chat("hello").await?;
//! call.hang_up().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod call;
pub mod config;
pub mod error;
pub mod media;
pub mod negotiation;
pub mod room;
pub mod session;
pub mod signaling;
pub mod transport;

pub use call::{Call, CallDeps, CallHandle};
pub use config::{CallConfig, DataChannelMode, IcePolicy};
pub use error::{Error, Result};
pub use media::{MediaSample, MediaSink, MediaSource, MediaStream, MediaTrack, TrackKind};
pub use negotiation::NegotiationState;
pub use room::{Role, RoleAssignment, RoomCoordinator, RoomPrompt};
pub use session::{MediaSinks, Notification, PeerSession, TeardownReport};
pub use signaling::{RelayServer, SessionDescription, SignalingMessage};
pub use transport::{DataChannelHandle, MediaTransport, TransportEvent, TransportFactory};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
