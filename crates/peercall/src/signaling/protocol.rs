//! Relay wire protocol
//!
//! Every relay frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Session descriptions and candidates use the browser field names so that
//! peers built on `RTCPeerConnection` can share the same relay.

use serde::{Deserialize, Serialize};

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer from the caller
    Offer,
    /// Answer from the callee
    Answer,
}

/// Session description (type + opaque SDP body)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,

    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Check if this is an offer
    pub fn is_offer(&self) -> bool {
        self.sdp_type == SdpType::Offer
    }

    /// Extract every `a=candidate:` line carried by this description
    ///
    /// Each candidate is tagged with the `a=mid` and index of the media
    /// section it appears in.
    pub fn candidates(&self) -> Vec<IceCandidate> {
        let mut candidates: Vec<IceCandidate> = Vec::new();
        let mut m_line_index: Option<u16> = None;
        let mut mid: Option<String> = None;
        let mut section_start = 0;

        for line in self.sdp.lines().map(str::trim_end) {
            if line.starts_with("m=") {
                m_line_index = Some(m_line_index.map_or(0, |i| i + 1));
                mid = None;
                section_start = candidates.len();
            } else if let Some(value) = line.strip_prefix("a=mid:") {
                mid = Some(value.to_string());
                // a=mid may follow the candidates of its section
                for candidate in &mut candidates[section_start..] {
                    candidate.sdp_mid = mid.clone();
                }
            } else if let Some(value) = line.strip_prefix("a=") {
                if value.starts_with("candidate:") {
                    candidates.push(IceCandidate {
                        candidate: value.to_string(),
                        sdp_mid: mid.clone(),
                        sdp_m_line_index: m_line_index,
                    });
                }
            }
        }

        candidates
    }
}

/// ICE candidate as exchanged with browsers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute value (`candidate:...`)
    pub candidate: String,

    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the media section
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

/// Relay event (event name → payload)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Request to join or create a room
    Join(String),

    /// Room newly created; sender is the first participant
    Created(String),

    /// Joined an existing room; sender is the second participant
    Joined(String),

    /// Room already has two participants
    Full(String),

    /// A second participant joined the recipient's room
    NewPeer(String),

    /// Offer (initial or candidate-bearing update)
    Invite(SessionDescription),

    /// Answer
    #[serde(rename = "ok")]
    Accept(SessionDescription),

    /// A discovered connectivity candidate
    IceCandidate(IceCandidate),

    /// Peer is leaving
    Bye(String),
}

impl SignalingMessage {
    /// Event name as it appears on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalingMessage::Join(_) => "join",
            SignalingMessage::Created(_) => "created",
            SignalingMessage::Joined(_) => "joined",
            SignalingMessage::Full(_) => "full",
            SignalingMessage::NewPeer(_) => "new_peer",
            SignalingMessage::Invite(_) => "invite",
            SignalingMessage::Accept(_) => "ok",
            SignalingMessage::IceCandidate(_) => "ice_candidate",
            SignalingMessage::Bye(_) => "bye",
        }
    }

    /// Check if the relay forwards this message to the other room member
    pub fn is_peer_message(&self) -> bool {
        matches!(
            self,
            SignalingMessage::Invite(_)
                | SignalingMessage::Accept(_)
                | SignalingMessage::IceCandidate(_)
                | SignalingMessage::Bye(_)
        )
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON text frame
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
