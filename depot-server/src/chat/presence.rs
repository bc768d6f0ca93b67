//! Presence: which users have a live connection
//!
//! Process-local and never persisted. A restart starts from nobody online
//! and clients rebuild it by reconnecting. A horizontally scaled hub would
//! swap [`LocalPresence`] for a shared store with TTL expiry.

use std::collections::HashSet;

use dashmap::DashMap;

use super::rooms::ConnectionId;

pub trait PresenceTracker: Send + Sync {
    /// Returns true when this is the user's first live connection
    fn connect(&self, user_id: i64, connection_id: ConnectionId) -> bool;

    /// Returns true when the user has no connection left
    fn disconnect(&self, user_id: i64, connection_id: ConnectionId) -> bool;

    fn is_online(&self, user_id: i64) -> bool;

    fn connections_of(&self, user_id: i64) -> Vec<ConnectionId>;

    fn online_users(&self) -> Vec<i64>;
}

/// In-process presence map: user → live connections
#[derive(Debug, Default)]
pub struct LocalPresence {
    users: DashMap<i64, HashSet<ConnectionId>>,
}

impl LocalPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresenceTracker for LocalPresence {
    fn connect(&self, user_id: i64, connection_id: ConnectionId) -> bool {
        let mut entry = self.users.entry(user_id).or_default();
        let first = entry.is_empty();
        entry.insert(connection_id);
        first
    }

    fn disconnect(&self, user_id: i64, connection_id: ConnectionId) -> bool {
        let went_offline = match self.users.get_mut(&user_id) {
            Some(mut connections) => {
                connections.remove(&connection_id);
                connections.is_empty()
            }
            None => return false,
        };
        if went_offline {
            self.users.remove_if(&user_id, |_, connections| connections.is_empty());
        }
        went_offline
    }

    fn is_online(&self, user_id: i64) -> bool {
        self.users.get(&user_id).is_some_and(|c| !c.is_empty())
    }

    fn connections_of(&self, user_id: i64) -> Vec<ConnectionId> {
        self.users
            .get(&user_id)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }

    fn online_users(&self) -> Vec<i64> {
        let mut users: Vec<i64> = self
            .users
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect();
        users.sort_unstable();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_until_last_connection_closes() {
        let presence = LocalPresence::new();
        assert!(presence.connect(7, 1));
        assert!(!presence.connect(7, 2));
        assert_eq!(presence.online_users(), vec![7]);

        assert!(!presence.disconnect(7, 1));
        assert!(presence.is_online(7));
        assert!(presence.disconnect(7, 2));
        assert!(!presence.is_online(7));
        assert!(presence.online_users().is_empty());

        // unknown user
        assert!(!presence.disconnect(8, 3));
    }
}
