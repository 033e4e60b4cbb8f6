//! Error types for call setup, negotiation and teardown

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up or running a call
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Neither camera/microphone nor screen share could be acquired
    #[error("Media access denied: {0}")]
    MediaAccess(String),

    /// The room already holds two participants
    #[error("Room is full: {0}")]
    RoomFull(String),

    /// Empty or otherwise unusable room name
    #[error("Invalid room name: {0:?}")]
    InvalidRoomName(String),

    /// Relay connection could not be opened or dropped
    #[error("Signaling transport error: {0}")]
    SignalingTransport(String),

    /// Malformed or incompatible session description or candidate
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// A teardown step failed (logged, never surfaced by hang-up)
    #[error("Resource release error: {0}")]
    ResourceRelease(String),

    /// Data channel missing, not open or failed to send
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A negotiation step did not complete in time
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// The call has already ended
    #[error("Session closed")]
    SessionClosed,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors raised while starting a call; returned to the initiating action
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Error::MediaAccess(_)
                | Error::RoomFull(_)
                | Error::InvalidRoomName(_)
                | Error::InvalidConfig(_)
        )
    }

    /// Errors that move an established session to `Failed`
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Error::Negotiation(_) | Error::SignalingTransport(_) | Error::Timeout(_)
        )
    }

    /// Check if the user may retry (with a different room)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RoomFull(_) | Error::InvalidRoomName(_))
    }
}
