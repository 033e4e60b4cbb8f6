//! Signaling through a room-scoped relay
//!
//! - [`protocol`] - relay event vocabulary and payloads
//! - [`relay`] - client contract used by the room coordinator and the call loop
//! - [`rooms`] - room membership rules applied by relay implementations
//! - [`memory`] - in-process relay
//! - [`websocket`] - WebSocket relay client and server

pub mod memory;
pub mod protocol;
pub mod relay;
pub mod rooms;
pub mod websocket;

pub use memory::InMemoryRelay;
pub use protocol::{IceCandidate, SdpType, SessionDescription, SignalingMessage};
pub use relay::{RelayClient, RelayConnection, RelayConnector, RelayEvent};
pub use rooms::{JoinOutcome, RoomRegistry};
pub use websocket::{RelayServer, RelayServerHandle, WebSocketRelayClient, WebSocketRelayConnector};
