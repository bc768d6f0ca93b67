//! Room fan-out, decoupled from the socket layer
//!
//! A connection is just an unbounded sender of [`ServerEvent`]; the ws
//! session drains the other end. Tests register plain channels.

use std::collections::HashSet;

use dashmap::DashMap;
use shared::ServerEvent;
use tokio::sync::mpsc;

pub type ConnectionId = u64;
pub type ConnectionSender = mpsc::UnboundedSender<ServerEvent>;

pub trait RoomRegistry: Send + Sync {
    fn register(&self, connection_id: ConnectionId, sender: ConnectionSender);

    /// Drop the connection and every room membership; returns the rooms it was in
    fn unregister(&self, connection_id: ConnectionId) -> Vec<i64>;

    fn join(&self, connection_id: ConnectionId, room: i64);

    fn leave(&self, connection_id: ConnectionId, room: i64);

    fn rooms_of(&self, connection_id: ConnectionId) -> Vec<i64>;

    fn is_member(&self, connection_id: ConnectionId, room: i64) -> bool;

    /// Fire-and-forget fan-out; returns how many connections accepted the event
    fn broadcast(&self, room: i64, event: &ServerEvent, exclude: Option<ConnectionId>) -> usize;

    /// Every registered connection
    fn broadcast_all(&self, event: &ServerEvent, exclude: Option<ConnectionId>) -> usize;

    fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool;

    fn connection_count(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct LocalRooms {
    connections: DashMap<ConnectionId, ConnectionSender>,
    rooms: DashMap<i64, HashSet<ConnectionId>>,
    memberships: DashMap<ConnectionId, HashSet<i64>>,
}

impl LocalRooms {
    pub fn new() -> Self {
        Self::default()
    }

    fn members(&self, room: i64) -> Vec<ConnectionId> {
        self.rooms
            .get(&room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl RoomRegistry for LocalRooms {
    fn register(&self, connection_id: ConnectionId, sender: ConnectionSender) {
        self.connections.insert(connection_id, sender);
        self.memberships.entry(connection_id).or_default();
    }

    fn unregister(&self, connection_id: ConnectionId) -> Vec<i64> {
        self.connections.remove(&connection_id);
        let rooms: Vec<i64> = self
            .memberships
            .remove(&connection_id)
            .map(|(_, rooms)| rooms.into_iter().collect())
            .unwrap_or_default();
        for room in &rooms {
            if let Some(mut members) = self.rooms.get_mut(room) {
                members.remove(&connection_id);
            }
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
        rooms
    }

    fn join(&self, connection_id: ConnectionId, room: i64) {
        if !self.connections.contains_key(&connection_id) {
            return;
        }
        self.rooms.entry(room).or_default().insert(connection_id);
        self.memberships.entry(connection_id).or_default().insert(room);
    }

    fn leave(&self, connection_id: ConnectionId, room: i64) {
        if let Some(mut members) = self.rooms.get_mut(&room) {
            members.remove(&connection_id);
        }
        self.rooms.remove_if(&room, |_, members| members.is_empty());
        if let Some(mut rooms) = self.memberships.get_mut(&connection_id) {
            rooms.remove(&room);
        }
    }

    fn rooms_of(&self, connection_id: ConnectionId) -> Vec<i64> {
        let mut rooms: Vec<i64> = self
            .memberships
            .get(&connection_id)
            .map(|r| r.iter().copied().collect())
            .unwrap_or_default();
        rooms.sort_unstable();
        rooms
    }

    fn is_member(&self, connection_id: ConnectionId, room: i64) -> bool {
        self.memberships
            .get(&connection_id)
            .is_some_and(|r| r.contains(&room))
    }

    fn broadcast(&self, room: i64, event: &ServerEvent, exclude: Option<ConnectionId>) -> usize {
        self.members(room)
            .into_iter()
            .filter(|id| Some(*id) != exclude)
            .filter(|id| self.send_to(*id, event.clone()))
            .count()
    }

    fn broadcast_all(&self, event: &ServerEvent, exclude: Option<ConnectionId>) -> usize {
        let targets: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| Some(*id) != exclude)
            .collect();
        targets
            .into_iter()
            .filter(|id| self.send_to(*id, event.clone()))
            .count()
    }

    fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let Some(sender) = self.connections.get(&connection_id).map(|s| s.clone()) else {
            return false;
        };
        if sender.send(event).is_err() {
            tracing::debug!(connection_id, "Connection channel closed, event dropped");
            return false;
        }
        true
    }

    fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online(id: i64) -> ServerEvent {
        ServerEvent::UserOnline { user_id: id }
    }

    #[test]
    fn test_room_fan_out_with_exclusion() {
        let rooms = LocalRooms::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        rooms.register(1, tx1);
        rooms.register(2, tx2);
        rooms.register(3, tx3);
        rooms.join(1, 100);
        rooms.join(2, 100);

        assert_eq!(rooms.broadcast(100, &online(9), Some(1)), 1);
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), online(9));
        assert!(rx3.try_recv().is_err());

        assert_eq!(rooms.broadcast_all(&online(10), None), 3);
    }

    #[test]
    fn test_unregister_clears_memberships() {
        let rooms = LocalRooms::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        rooms.register(1, tx);
        rooms.join(1, 100);
        rooms.join(1, 200);
        assert!(rooms.is_member(1, 200));

        let mut left = rooms.unregister(1);
        left.sort_unstable();
        assert_eq!(left, vec![100, 200]);
        assert!(!rooms.is_member(1, 100));
        assert_eq!(rooms.broadcast(100, &online(1), None), 0);
        assert_eq!(rooms.connection_count(), 0);

        // joining after unregister is ignored
        rooms.join(1, 100);
        assert!(rooms.rooms_of(1).is_empty());
    }

    #[test]
    fn test_closed_receiver_is_skipped() {
        let rooms = LocalRooms::new();
        let (tx, rx) = mpsc::unbounded_channel();
        rooms.register(1, tx);
        rooms.join(1, 5);
        drop(rx);
        assert_eq!(rooms.broadcast(5, &online(1), None), 0);
    }
}
