//! Typing indicators: conversation → user → connections currently typing
//!
//! Ephemeral like presence. A user counts as typing while at least one of
//! their connections is; the indicator is owned by the connection that
//! started it, so closing one tab never stops another tab's indicator.
//! Cleared on explicit stop, on send and on disconnect.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

use super::rooms::ConnectionId;

#[derive(Debug, Default)]
pub struct TypingTracker {
    conversations: DashMap<i64, HashMap<i64, HashSet<ConnectionId>>>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the user was not typing before
    pub fn start(&self, conversation_id: i64, user_id: i64, connection_id: ConnectionId) -> bool {
        let mut users = self.conversations.entry(conversation_id).or_default();
        let connections = users.entry(user_id).or_default();
        let was_typing = !connections.is_empty();
        connections.insert(connection_id);
        !was_typing
    }

    /// Returns true if the user stopped typing altogether
    pub fn stop(&self, conversation_id: i64, user_id: i64, connection_id: ConnectionId) -> bool {
        let Some(mut users) = self.conversations.get_mut(&conversation_id) else {
            return false;
        };
        let stopped = match users.get_mut(&user_id) {
            Some(connections) => connections.remove(&connection_id) && connections.is_empty(),
            None => false,
        };
        if stopped {
            users.remove(&user_id);
        }
        drop(users);

        self.conversations
            .remove_if(&conversation_id, |_, users| users.is_empty());
        stopped
    }

    /// Stop every connection of the user in one conversation (membership ended)
    pub fn stop_user(&self, conversation_id: i64, user_id: i64) -> bool {
        let stopped = match self.conversations.get_mut(&conversation_id) {
            Some(mut users) => users.remove(&user_id).is_some(),
            None => false,
        };
        self.conversations
            .remove_if(&conversation_id, |_, users| users.is_empty());
        stopped
    }

    /// Drop a closed connection everywhere; returns the conversations where
    /// the user is no longer typing
    pub fn clear_connection(&self, user_id: i64, connection_id: ConnectionId) -> Vec<i64> {
        let mut cleared: Vec<i64> = self
            .conversations
            .iter_mut()
            .filter_map(|mut entry| {
                let users = entry.value_mut();
                let connections = users.get_mut(&user_id)?;
                if !connections.remove(&connection_id) || !connections.is_empty() {
                    return None;
                }
                users.remove(&user_id);
                Some(*entry.key())
            })
            .collect();
        self.conversations.retain(|_, users| !users.is_empty());
        cleared.sort_unstable();
        cleared
    }

    pub fn typing_in(&self, conversation_id: i64) -> Vec<i64> {
        let mut users: Vec<i64> = self
            .conversations
            .get(&conversation_id)
            .map(|u| u.keys().copied().collect())
            .unwrap_or_default();
        users.sort_unstable();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop() {
        let typing = TypingTracker::new();
        assert!(typing.start(1, 10, 100));
        assert!(!typing.start(1, 10, 100));
        assert_eq!(typing.typing_in(1), vec![10]);

        assert!(typing.stop(1, 10, 100));
        assert!(!typing.stop(1, 10, 100));
        assert!(typing.typing_in(1).is_empty());
    }

    #[test]
    fn test_second_connection_keeps_user_typing() {
        let typing = TypingTracker::new();
        assert!(typing.start(1, 10, 100));
        assert!(!typing.start(1, 10, 101));

        assert!(!typing.stop(1, 10, 100));
        assert_eq!(typing.typing_in(1), vec![10]);
        assert!(typing.stop(1, 10, 101));
    }

    #[test]
    fn test_clear_connection() {
        let typing = TypingTracker::new();
        typing.start(1, 10, 100);
        typing.start(2, 10, 100);
        typing.start(2, 10, 101);
        typing.start(2, 11, 200);

        // conversation 2 still has connection 101 typing
        assert_eq!(typing.clear_connection(10, 100), vec![1]);
        assert!(typing.typing_in(1).is_empty());
        assert_eq!(typing.typing_in(2), vec![10, 11]);

        // idle connection: nothing to clear
        assert!(typing.clear_connection(10, 999).is_empty());
        assert_eq!(typing.clear_connection(10, 101), vec![2]);
    }

    #[test]
    fn test_stop_user_drops_all_connections() {
        let typing = TypingTracker::new();
        typing.start(1, 10, 100);
        typing.start(1, 10, 101);

        assert!(typing.stop_user(1, 10));
        assert!(typing.typing_in(1).is_empty());
        assert!(!typing.stop_user(1, 10));
    }
}
