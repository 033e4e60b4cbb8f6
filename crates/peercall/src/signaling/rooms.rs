//! Room membership for the relay side
//!
//! A room holds at most two members. It is created by its first join and
//! destroyed when its last member leaves.

use super::protocol::SignalingMessage;
use std::collections::HashMap;
use tracing::{debug, info};

/// Maximum members per room
pub const MAX_ROOM_MEMBERS: usize = 2;

/// Identifier of one relay connection
pub type MemberId = u64;

/// Outcome of a join request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// First member; room created
    Created,
    /// Second member; `occupant` must be told with `new_peer`
    Joined {
        /// The member already waiting in the room
        occupant: MemberId,
    },
    /// Room already has two members
    Full,
}

/// A message the relay must deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Recipient connection
    pub to: MemberId,
    /// Message to deliver
    pub message: SignalingMessage,
}

/// Room registry shared by the in-memory and WebSocket relays
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Vec<MemberId>>,
    membership: HashMap<MemberId, String>,
}

impl RoomRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a join request from `member`
    pub fn join(&mut self, member: MemberId, room: &str) -> JoinOutcome {
        if self.room_of(member) == Some(room) {
            return match self.other_member(member) {
                Some(occupant) => JoinOutcome::Joined { occupant },
                None => JoinOutcome::Created,
            };
        }

        // A member switching rooms keeps its current seat until admitted
        if self.member_count(room) >= MAX_ROOM_MEMBERS {
            debug!(room = %room, member, "Join refused, room full");
            return JoinOutcome::Full;
        }
        self.leave(member);

        let members = self.rooms.entry(room.to_string()).or_default();
        let outcome = match members.first() {
            None => JoinOutcome::Created,
            Some(&occupant) => JoinOutcome::Joined { occupant },
        };

        members.push(member);
        self.membership.insert(member, room.to_string());
        info!(room = %room, member, members = members.len(), "Member joined room");
        outcome
    }

    /// Remove `member` from its room; returns the room name if it had one
    pub fn leave(&mut self, member: MemberId) -> Option<String> {
        let room = self.membership.remove(&member)?;
        if let Some(members) = self.rooms.get_mut(&room) {
            members.retain(|m| *m != member);
            if members.is_empty() {
                self.rooms.remove(&room);
                info!(room = %room, "Room destroyed");
            }
        }
        Some(room)
    }

    /// The other member of `member`'s room, if any
    pub fn other_member(&self, member: MemberId) -> Option<MemberId> {
        let room = self.membership.get(&member)?;
        self.rooms
            .get(room)?
            .iter()
            .copied()
            .find(|m| *m != member)
    }

    /// Room `member` belongs to
    pub fn room_of(&self, member: MemberId) -> Option<&str> {
        self.membership.get(&member).map(String::as_str)
    }

    /// Number of members in `room`
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, Vec::len)
    }

    /// Route one inbound message from `from`
    ///
    /// Returns the deliveries the relay must perform, in order.
    pub fn route(&mut self, from: MemberId, message: SignalingMessage) -> Vec<Delivery> {
        match message {
            SignalingMessage::Join(room) => match self.join(from, &room) {
                JoinOutcome::Created => vec![Delivery {
                    to: from,
                    message: SignalingMessage::Created(room),
                }],
                JoinOutcome::Joined { occupant } => vec![
                    Delivery {
                        to: occupant,
                        message: SignalingMessage::NewPeer(room.clone()),
                    },
                    Delivery {
                        to: from,
                        message: SignalingMessage::Joined(room),
                    },
                ],
                JoinOutcome::Full => vec![Delivery {
                    to: from,
                    message: SignalingMessage::Full(room),
                }],
            },
            message if message.is_peer_message() => {
                let is_bye = matches!(message, SignalingMessage::Bye(_));
                let deliveries = match self.other_member(from) {
                    Some(to) => vec![Delivery { to, message }],
                    None => {
                        debug!(member = from, event = message.event_name(), "No peer to relay to");
                        Vec::new()
                    }
                };
                if is_bye {
                    self.leave(from);
                }
                deliveries
            }
            other => {
                debug!(member = from, event = other.event_name(), "Ignoring server-only event from client");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::protocol::SessionDescription;

    #[test]
    fn test_first_join_creates_room() {
        let mut rooms = RoomRegistry::new();
        assert_eq!(rooms.join(1, "r1"), JoinOutcome::Created);
        assert_eq!(rooms.member_count("r1"), 1);
        assert_eq!(rooms.room_of(1), Some("r1"));
    }

    #[test]
    fn test_second_join_reports_occupant() {
        let mut rooms = RoomRegistry::new();
        rooms.join(1, "r1");
        assert_eq!(rooms.join(2, "r1"), JoinOutcome::Joined { occupant: 1 });
        assert_eq!(rooms.other_member(1), Some(2));
        assert_eq!(rooms.other_member(2), Some(1));
    }

    #[test]
    fn test_third_join_is_full() {
        let mut rooms = RoomRegistry::new();
        rooms.join(1, "r1");
        rooms.join(2, "r1");
        assert_eq!(rooms.join(3, "r1"), JoinOutcome::Full);
        assert_eq!(rooms.member_count("r1"), 2);
        assert_eq!(rooms.room_of(3), None);
    }

    #[test]
    fn test_room_destroyed_when_empty() {
        let mut rooms = RoomRegistry::new();
        rooms.join(1, "r1");
        rooms.join(2, "r1");
        assert_eq!(rooms.leave(1), Some("r1".to_string()));
        assert_eq!(rooms.member_count("r1"), 1);
        rooms.leave(2);
        assert_eq!(rooms.member_count("r1"), 0);

        // A new first arrival recreates it
        assert_eq!(rooms.join(3, "r1"), JoinOutcome::Created);
    }

    #[test]
    fn test_route_join_sequence() {
        let mut rooms = RoomRegistry::new();
        let first = rooms.route(1, SignalingMessage::Join("r1".to_string()));
        assert_eq!(
            first,
            vec![Delivery {
                to: 1,
                message: SignalingMessage::Created("r1".to_string())
            }]
        );

        let second = rooms.route(2, SignalingMessage::Join("r1".to_string()));
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].to, 1);
        assert_eq!(second[0].message, SignalingMessage::NewPeer("r1".to_string()));
        assert_eq!(second[1].to, 2);
        assert_eq!(second[1].message, SignalingMessage::Joined("r1".to_string()));
    }

    #[test]
    fn test_route_forwards_to_other_member() {
        let mut rooms = RoomRegistry::new();
        rooms.join(1, "r1");
        rooms.join(2, "r1");

        let invite = SignalingMessage::Invite(SessionDescription::offer("v=0"));
        let deliveries = rooms.route(2, invite.clone());
        assert_eq!(deliveries, vec![Delivery { to: 1, message: invite }]);
    }

    #[test]
    fn test_route_bye_leaves_room() {
        let mut rooms = RoomRegistry::new();
        rooms.join(1, "r1");
        rooms.join(2, "r1");

        let deliveries = rooms.route(1, SignalingMessage::Bye("r1".to_string()));
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].to, 2);
        assert_eq!(rooms.member_count("r1"), 1);
    }

    #[test]
    fn test_route_ignores_server_events_from_clients() {
        let mut rooms = RoomRegistry::new();
        rooms.join(1, "r1");
        assert!(rooms
            .route(1, SignalingMessage::Full("r1".to_string()))
            .is_empty());
    }

    #[test]
    fn test_rejoin_same_room_is_stable() {
        let mut rooms = RoomRegistry::new();
        rooms.join(1, "r1");
        assert_eq!(rooms.join(1, "r1"), JoinOutcome::Created);
        assert_eq!(rooms.member_count("r1"), 1);
    }

    #[test]
    fn test_refused_switch_keeps_current_seat() {
        let mut rooms = RoomRegistry::new();
        rooms.join(1, "r1");
        rooms.join(2, "r1");
        rooms.join(3, "r2");
        rooms.join(4, "r2");

        assert_eq!(rooms.join(1, "r2"), JoinOutcome::Full);
        assert_eq!(rooms.room_of(1), Some("r1"));
        assert_eq!(rooms.member_count("r1"), 2);
        assert_eq!(rooms.other_member(2), Some(1));
        assert_eq!(rooms.member_count("r2"), 2);
    }

    #[test]
    fn test_admitted_switch_leaves_previous_room() {
        let mut rooms = RoomRegistry::new();
        rooms.join(1, "r1");
        rooms.join(2, "r1");
        rooms.join(3, "r2");

        assert_eq!(rooms.join(1, "r2"), JoinOutcome::Joined { occupant: 3 });
        assert_eq!(rooms.room_of(1), Some("r2"));
        assert_eq!(rooms.other_member(2), None);
        assert_eq!(rooms.member_count("r1"), 1);
    }
}
