//! Configuration types for a call

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default STUN server used as the single ICE hint
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Message each side sends once its data channel opens
pub const DEFAULT_READY_MESSAGE: &str = "*** Channel is ready ***";

/// Main configuration for a call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Relay server URL (ws:// or wss://)
    pub relay_url: String,

    /// Room to join (prompted for when None)
    pub room: Option<String>,

    /// STUN server URL (None disables server reflexive candidates)
    pub stun_server: Option<String>,

    /// Label of the application data channel created by the caller
    pub data_channel_label: String,

    /// Data channel mode (default: Reliable)
    pub data_channel_mode: DataChannelMode,

    /// How local ICE candidates reach the peer
    pub ice_policy: IcePolicy,

    /// Upper bound for each negotiation state in seconds (None: unbounded)
    ///
    /// Config files write `0` for unbounded.
    pub negotiation_timeout_secs: Option<u64>,

    /// Text sent over the data channel as soon as it opens
    pub ready_message: String,
}

/// Data channel mode
///
/// Determines the reliability of message delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataChannelMode {
    /// Reliable, ordered delivery (default)
    Reliable,
    /// Unreliable, unordered delivery
    Unreliable,
}

impl DataChannelMode {
    /// Get the ordered setting for webrtc-rs
    pub fn ordered(&self) -> bool {
        match self {
            DataChannelMode::Reliable => true,
            DataChannelMode::Unreliable => false,
        }
    }

    /// Get the max retransmits setting for webrtc-rs
    pub fn max_retransmits(&self) -> Option<u16> {
        match self {
            DataChannelMode::Reliable => None,
            DataChannelMode::Unreliable => Some(0),
        }
    }
}

/// Local ICE candidate delivery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IcePolicy {
    /// Hold candidates until gathering completes, then re-send the whole
    /// local description as an `invite` update
    FullDescriptionOnComplete,
    /// Send each candidate as an `ice_candidate` message once the local
    /// description has been sent
    Trickle,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8080".to_string(),
            room: None,
            stun_server: Some(DEFAULT_STUN_SERVER.to_string()),
            data_channel_label: "sendDataChannel".to_string(),
            data_channel_mode: DataChannelMode::Reliable,
            ice_policy: IcePolicy::FullDescriptionOnComplete,
            negotiation_timeout_secs: Some(30),
            ready_message: DEFAULT_READY_MESSAGE.to_string(),
        }
    }
}

impl CallConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `relay_url` is not a WebSocket URL
    /// - `stun_server` does not use the `stun:` or `stuns:` scheme
    /// - `data_channel_label` is empty
    /// - `negotiation_timeout_secs` is zero
    pub fn validate(&self) -> Result<()> {
        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay_url must start with ws:// or wss://, got {}",
                self.relay_url
            )));
        }

        if let Some(ref stun) = self.stun_server {
            if !stun.starts_with("stun:") && !stun.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "stun_server must start with stun: or stuns:, got {}",
                    stun
                )));
            }
        }

        if self.data_channel_label.is_empty() {
            return Err(Error::InvalidConfig(
                "data_channel_label must not be empty".to_string(),
            ));
        }

        if self.negotiation_timeout_secs == Some(0) {
            return Err(Error::InvalidConfig(
                "negotiation_timeout_secs must be positive (omit it to disable)".to_string(),
            ));
        }

        Ok(())
    }

    /// Per-state negotiation timeout
    pub fn negotiation_timeout(&self) -> Option<Duration> {
        self.negotiation_timeout_secs.map(Duration::from_secs)
    }

    /// Preset for peers on the same host or LAN: host candidates only
    pub fn local_only() -> Self {
        Self {
            stun_server: None,
            negotiation_timeout_secs: Some(10),
            ..Default::default()
        }
    }

    /// Parse and validate a TOML document
    ///
    /// `negotiation_timeout_secs = 0` disables the negotiation timeout.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: CallConfig =
            toml::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if config.negotiation_timeout_secs == Some(0) {
            config.negotiation_timeout_secs = None;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
