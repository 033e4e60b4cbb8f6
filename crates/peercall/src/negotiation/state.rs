//! Negotiation states and their legal transitions

use crate::room::Role;
use std::fmt;

/// Connection state of a peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Session created, relay not yet joined
    Idle,
    /// Relay open, waiting for the room verdict or for the peer
    Joining,
    /// Offer/answer exchange in progress
    Negotiating(Role),
    /// Offer/answer complete and the peer reachable
    Connected,
    /// Unrecoverable negotiation or signaling error
    Failed,
    /// Hung up locally or remotely
    Closed,
}

impl NegotiationState {
    /// Failed and Closed accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Failed | NegotiationState::Closed)
    }

    /// Check if an offer/answer exchange is in progress
    pub fn is_negotiating(&self) -> bool {
        matches!(self, NegotiationState::Negotiating(_))
    }

    /// Check if `next` is reachable from this state
    pub fn can_transition_to(&self, next: NegotiationState) -> bool {
        use NegotiationState::*;

        match (*self, next) {
            (Failed, _) | (Closed, _) => false,
            (_, Failed) | (_, Closed) => true,
            (Idle, Joining) => true,
            (Joining, Negotiating(_)) => true,
            (Negotiating(_), Connected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationState::Idle => write!(f, "idle"),
            NegotiationState::Joining => write!(f, "joining"),
            NegotiationState::Negotiating(role) => write!(f, "negotiating({})", role),
            NegotiationState::Connected => write!(f, "connected"),
            NegotiationState::Failed => write!(f, "failed"),
            NegotiationState::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use NegotiationState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Idle.can_transition_to(Joining));
        assert!(Joining.can_transition_to(Negotiating(Role::Caller)));
        assert!(Joining.can_transition_to(Negotiating(Role::Callee)));
        assert!(Negotiating(Role::Caller).can_transition_to(Connected));
        assert!(Connected.can_transition_to(Closed));
    }

    #[test]
    fn test_skipping_states_is_refused() {
        assert!(!Idle.can_transition_to(Connected));
        assert!(!Joining.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Negotiating(Role::Caller)));
        assert!(!Negotiating(Role::Callee).can_transition_to(Negotiating(Role::Caller)));
    }

    #[test]
    fn test_failed_and_closed_reachable_from_anywhere() {
        for state in [Idle, Joining, Negotiating(Role::Callee), Connected] {
            assert!(state.can_transition_to(Failed), "{} -> failed", state);
            assert!(state.can_transition_to(Closed), "{} -> closed", state);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(Failed.is_terminal());
        assert!(Closed.is_terminal());
        assert!(!Closed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Closed));
        assert!(!Connected.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(Negotiating(Role::Caller).to_string(), "negotiating(caller)");
        assert_eq!(Closed.to_string(), "closed");
    }
}
