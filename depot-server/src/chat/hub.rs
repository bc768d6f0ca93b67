//! ChatHub - realtime session hub
//!
//! Connection lifecycle:
//!
//! ```text
//! connect(token)
//!     ├─ resolve credential          (reject: nothing registered)
//!     ├─ load conversation ids
//!     ├─ register connection + join one room per conversation
//!     ├─ presence: user:online on first connection
//!     └─ session:ready to the new connection
//! handle(event)   per client event, errors go back to that connection only
//! disconnect()    typing stops, rooms left, user:offline on last connection
//! ```
//!
//! Registry calls are blocking redb work and run on `spawn_blocking`. A
//! per-conversation async lock spans persist → broadcast so every member
//! sees messages in persistence order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use shared::models::MessageDraft;
use shared::{ClientEvent, ServerEvent};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};

use super::error::HubError;
use super::presence::PresenceTracker;
use super::registry::ConversationRegistry;
use super::rooms::{ConnectionId, RoomRegistry};
use super::typing::TypingTracker;
use crate::auth::{CredentialResolver, CurrentUser};
use crate::security_log;

/// An authenticated connection
#[derive(Debug)]
pub struct HubSession {
    pub connection_id: ConnectionId,
    pub user: CurrentUser,
    /// Events for this connection (drained by the transport)
    pub receiver: mpsc::UnboundedReceiver<ServerEvent>,
}

pub struct ChatHub {
    registry: ConversationRegistry,
    credentials: Arc<dyn CredentialResolver>,
    presence: Arc<dyn PresenceTracker>,
    rooms: Arc<dyn RoomRegistry>,
    typing: TypingTracker,
    /// Only conversations with a send/edit/delete in flight have an entry
    conversation_locks: DashMap<i64, Arc<Mutex<()>>>,
    next_connection_id: AtomicU64,
}

/// Exclusive persist → broadcast turn on one conversation
///
/// Dropping the turn releases the lock and removes the map entry once no
/// other task holds or waits for it.
struct ConversationTurn<'a> {
    locks: &'a DashMap<i64, Arc<Mutex<()>>>,
    conversation_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationTurn<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl std::fmt::Debug for ChatHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHub")
            .field("connections", &self.rooms.connection_count())
            .finish_non_exhaustive()
    }
}

impl ChatHub {
    pub fn new(
        registry: ConversationRegistry,
        credentials: Arc<dyn CredentialResolver>,
        presence: Arc<dyn PresenceTracker>,
        rooms: Arc<dyn RoomRegistry>,
    ) -> Self {
        Self {
            registry,
            credentials,
            presence,
            rooms,
            typing: TypingTracker::new(),
            conversation_locks: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    pub fn online_users(&self) -> Vec<i64> {
        self.presence.online_users()
    }

    pub fn connection_count(&self) -> usize {
        self.rooms.connection_count()
    }

    async fn lock_conversation(&self, conversation_id: i64) -> ConversationTurn<'_> {
        // clone 在 shard 锁内完成, remove_if 不会删掉别人正在用的锁
        let lock = self
            .conversation_locks
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        ConversationTurn {
            locks: &self.conversation_locks,
            conversation_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Run a registry call on the blocking pool
    async fn blocking<T, F>(&self, f: F) -> Result<T, HubError>
    where
        T: Send + 'static,
        F: FnOnce(ConversationRegistry) -> Result<T, super::ChatError> + Send + 'static,
    {
        let registry = self.registry.clone();
        let result = tokio::task::spawn_blocking(move || f(registry)).await??;
        Ok(result)
    }

    // ========== Lifecycle ==========

    /// Authenticate and register a connection
    ///
    /// On any failure nothing is registered: no presence, no rooms.
    pub async fn connect(&self, token: Option<&str>) -> Result<HubSession, HubError> {
        let user = self.authenticate(token).await?;
        self.attach(user).await
    }

    /// Resolve the handshake credential without touching any hub state
    pub async fn authenticate(&self, token: Option<&str>) -> Result<CurrentUser, HubError> {
        let token = token.map(str::trim).unwrap_or_default();
        match self.credentials.resolve(token).await {
            Ok(user) => Ok(user),
            Err(e) => {
                security_log!("WARN", "ws_auth_failed", reason = e.to_string());
                Err(e.into())
            }
        }
    }

    /// Register an authenticated user's connection and join its rooms
    pub async fn attach(&self, user: CurrentUser) -> Result<HubSession, HubError> {
        let user_id = user.id;
        let conversation_ids = self
            .blocking(move |registry| registry.conversation_ids_for_user(user_id))
            .await?;

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.rooms.register(connection_id, tx);
        for conversation_id in &conversation_ids {
            self.rooms.join(connection_id, *conversation_id);
        }

        if self.presence.connect(user_id, connection_id) {
            self.rooms
                .broadcast_all(&ServerEvent::UserOnline { user_id }, Some(connection_id));
        }

        self.rooms.send_to(
            connection_id,
            ServerEvent::SessionReady {
                user_id,
                connection_id,
                conversation_ids,
                online_user_ids: self.presence.online_users(),
            },
        );

        tracing::info!(connection_id, user_id, "Chat connection joined");
        Ok(HubSession {
            connection_id,
            user,
            receiver: rx,
        })
    }

    /// Clean up ephemeral state of a closed connection
    ///
    /// Already committed messages stay; only presence and typing are undone.
    /// Typing started by the user's other connections is left alone.
    pub fn disconnect(&self, connection_id: ConnectionId, user_id: i64) {
        for conversation_id in self.typing.clear_connection(user_id, connection_id) {
            self.rooms.broadcast(
                conversation_id,
                &ServerEvent::TypingUpdate {
                    conversation_id,
                    user_id,
                    is_typing: false,
                },
                Some(connection_id),
            );
        }

        self.rooms.unregister(connection_id);

        if self.presence.disconnect(user_id, connection_id) {
            self.rooms
                .broadcast_all(&ServerEvent::UserOffline { user_id }, None);
        }
        tracing::info!(connection_id, user_id, "Chat connection closed");
    }

    // ========== Client events ==========

    /// Dispatch one client event; a failure is reported to this connection
    /// only and the connection stays open.
    pub async fn handle(&self, connection_id: ConnectionId, user: &CurrentUser, event: ClientEvent) {
        let name = event.name();
        if let Err(e) = self.dispatch(connection_id, user, event).await {
            tracing::debug!(connection_id, user_id = user.id, event = name, error = %e, "Chat event rejected");
            self.rooms.send_to(connection_id, e.to_event(name));
        }
    }

    async fn dispatch(
        &self,
        connection_id: ConnectionId,
        user: &CurrentUser,
        event: ClientEvent,
    ) -> Result<(), HubError> {
        match event {
            ClientEvent::MessageSend {
                conversation_id,
                content,
                kind,
                attachment_url,
                reply_to_id,
            } => {
                let draft = MessageDraft {
                    content,
                    kind,
                    attachment_url,
                    reply_to_id,
                };
                self.send_message(connection_id, user, conversation_id, draft)
                    .await
            }
            ClientEvent::MessageEdit {
                message_id,
                content,
            } => {
                let user_id = user.id;
                let conversation_id = self.message_conversation(message_id).await?;
                let _turn = self.lock_conversation(conversation_id).await;
                let message = self
                    .blocking(move |registry| registry.edit_message(message_id, user_id, &content))
                    .await?;
                self.rooms.broadcast(
                    message.conversation_id,
                    &ServerEvent::MessageEdited { message },
                    None,
                );
                Ok(())
            }
            ClientEvent::MessageDelete { message_id } => {
                let actor = user.clone();
                let conversation_id = self.message_conversation(message_id).await?;
                let _turn = self.lock_conversation(conversation_id).await;
                let message = self
                    .blocking(move |registry| registry.delete_message(message_id, &actor))
                    .await?;
                self.rooms.broadcast(
                    message.conversation_id,
                    &ServerEvent::MessageDeleted { message },
                    None,
                );
                Ok(())
            }
            ClientEvent::ReactionAdd { message_id, emoji } => {
                let user_id = user.id;
                let moved = emoji.clone();
                let change = self
                    .blocking(move |registry| registry.add_reaction(message_id, user_id, &moved))
                    .await?;
                if change.changed {
                    self.rooms.broadcast(
                        change.conversation_id,
                        &ServerEvent::ReactionAdded {
                            conversation_id: change.conversation_id,
                            message_id,
                            user_id,
                            emoji,
                        },
                        None,
                    );
                }
                Ok(())
            }
            ClientEvent::ReactionRemove { message_id, emoji } => {
                let user_id = user.id;
                let moved = emoji.clone();
                let change = self
                    .blocking(move |registry| registry.remove_reaction(message_id, user_id, &moved))
                    .await?;
                if change.changed {
                    self.rooms.broadcast(
                        change.conversation_id,
                        &ServerEvent::ReactionRemoved {
                            conversation_id: change.conversation_id,
                            message_id,
                            user_id,
                            emoji,
                        },
                        None,
                    );
                }
                Ok(())
            }
            ClientEvent::TypingStart { conversation_id } => {
                if !self.rooms.is_member(connection_id, conversation_id) {
                    return Err(not_participant(conversation_id, user.id));
                }
                if self.typing.start(conversation_id, user.id, connection_id) {
                    self.broadcast_typing(connection_id, conversation_id, user.id, true);
                }
                Ok(())
            }
            ClientEvent::TypingStop { conversation_id } => {
                self.stop_typing(connection_id, conversation_id, user.id);
                Ok(())
            }
            ClientEvent::ConversationRead { conversation_id } => {
                let user_id = user.id;
                let receipt = self
                    .blocking(move |registry| registry.mark_read(conversation_id, user_id))
                    .await?;
                self.rooms.broadcast(
                    conversation_id,
                    &ServerEvent::ConversationRead {
                        conversation_id,
                        user_id,
                        last_read_at: receipt.last_read_at,
                        last_read_seq: receipt.last_read_seq,
                    },
                    None,
                );
                Ok(())
            }
            ClientEvent::ConversationJoin { conversation_id } => {
                let user_id = user.id;
                self.blocking(move |registry| registry.require_participant(conversation_id, user_id))
                    .await?;
                self.rooms.join(connection_id, conversation_id);
                self.rooms.broadcast(
                    conversation_id,
                    &ServerEvent::ConversationJoined {
                        conversation_id,
                        user_id,
                    },
                    None,
                );
                Ok(())
            }
            ClientEvent::ConversationLeave { conversation_id } => {
                if !self.rooms.is_member(connection_id, conversation_id) {
                    return Err(not_participant(conversation_id, user.id));
                }
                self.stop_typing(connection_id, conversation_id, user.id);
                self.rooms.leave(connection_id, conversation_id);
                self.rooms.broadcast(
                    conversation_id,
                    &ServerEvent::ConversationLeft {
                        conversation_id,
                        user_id: user.id,
                    },
                    None,
                );
                Ok(())
            }
        }
    }

    /// Persist then fan out, under the conversation lock
    ///
    /// Sending implicitly stops the sender's typing indicator.
    async fn send_message(
        &self,
        connection_id: ConnectionId,
        user: &CurrentUser,
        conversation_id: i64,
        draft: MessageDraft,
    ) -> Result<(), HubError> {
        let sender = user.clone();
        let _turn = self.lock_conversation(conversation_id).await;

        let message = self
            .blocking(move |registry| registry.send_message(conversation_id, &sender, draft))
            .await?;

        self.stop_typing(connection_id, conversation_id, user.id);
        let delivered = self.rooms.broadcast(
            conversation_id,
            &ServerEvent::MessageNew { message },
            None,
        );
        tracing::debug!(conversation_id, connection_id, delivered, "Message fanned out");
        Ok(())
    }

    async fn message_conversation(&self, message_id: i64) -> Result<i64, HubError> {
        let message = self
            .blocking(move |registry| registry.get_message(message_id))
            .await?;
        Ok(message.conversation_id)
    }

    fn stop_typing(&self, connection_id: ConnectionId, conversation_id: i64, user_id: i64) {
        if self.typing.stop(conversation_id, user_id, connection_id) {
            self.broadcast_typing(connection_id, conversation_id, user_id, false);
        }
    }

    fn broadcast_typing(
        &self,
        connection_id: ConnectionId,
        conversation_id: i64,
        user_id: i64,
        is_typing: bool,
    ) {
        self.rooms.broadcast(
            conversation_id,
            &ServerEvent::TypingUpdate {
                conversation_id,
                user_id,
                is_typing,
            },
            Some(connection_id),
        );
    }

    // ========== Hooks for the HTTP surface ==========

    /// Put live connections of newly added participants into the room
    pub fn join_users(&self, conversation_id: i64, user_ids: &[i64]) {
        for user_id in user_ids {
            for connection_id in self.presence.connections_of(*user_id) {
                self.rooms.join(connection_id, conversation_id);
            }
            self.rooms.broadcast(
                conversation_id,
                &ServerEvent::ConversationJoined {
                    conversation_id,
                    user_id: *user_id,
                },
                None,
            );
        }
    }

    /// Take a removed participant's connections out of the room
    pub fn remove_user(&self, conversation_id: i64, user_id: i64) {
        if self.typing.stop_user(conversation_id, user_id) {
            self.rooms.broadcast(
                conversation_id,
                &ServerEvent::TypingUpdate {
                    conversation_id,
                    user_id,
                    is_typing: false,
                },
                None,
            );
        }
        for connection_id in self.presence.connections_of(user_id) {
            self.rooms.leave(connection_id, conversation_id);
        }
        self.rooms.broadcast(
            conversation_id,
            &ServerEvent::ConversationLeft {
                conversation_id,
                user_id,
            },
            None,
        );
    }

    /// Fan out a read receipt recorded through HTTP
    pub fn publish(&self, conversation_id: i64, event: ServerEvent) {
        self.rooms.broadcast(conversation_id, &event, None);
    }
}

fn not_participant(conversation_id: i64, user_id: i64) -> HubError {
    HubError::Chat(super::ChatError::NotParticipant {
        conversation_id,
        user_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccountDirectory, CredentialError, JwtConfig, JwtCredentialResolver, JwtService};
    use crate::chat::presence::LocalPresence;
    use crate::chat::rooms::LocalRooms;
    use crate::chat::storage::ChatStorage;
    use shared::models::{Account, ConversationCreate, ConversationKind, MessageKind, Role};

    const X: i64 = 1;
    const Y: i64 = 2;
    const Z: i64 = 3;

    struct Fixture {
        hub: ChatHub,
        jwt: Arc<JwtService>,
        accounts: AccountDirectory,
    }

    impl Fixture {
        fn token(&self, id: i64) -> String {
            self.jwt
                .generate_token(id, &format!("user{id}"), Role::Caller)
                .unwrap()
        }

        async fn connect(&self, id: i64) -> HubSession {
            let token = self.token(id);
            let mut session = self.hub.connect(Some(&token)).await.unwrap();
            // session:ready is always first
            assert!(matches!(
                session.receiver.try_recv().unwrap(),
                ServerEvent::SessionReady { .. }
            ));
            session
        }

        fn private(&self) -> i64 {
            self.hub
                .registry()
                .create_conversation(
                    X,
                    ConversationCreate {
                        kind: ConversationKind::Private,
                        name: None,
                        participant_ids: vec![Y],
                    },
                )
                .unwrap()
                .id
        }
    }

    fn fixture() -> Fixture {
        let jwt = Arc::new(JwtService::with_config(JwtConfig {
            secret: "hub-test-secret-with-at-least-32-chars".to_string(),
            expiration_minutes: 5,
            issuer: "depot-auth".to_string(),
            audience: "depot-clients".to_string(),
        }));
        let accounts = AccountDirectory::open_in_memory().unwrap();
        for (id, active) in [(X, true), (Y, true), (Z, true), (4, false)] {
            accounts
                .upsert(&Account {
                    id,
                    username: format!("user{id}"),
                    display_name: format!("User {id}"),
                    role: Role::Caller,
                    is_active: active,
                    created_at: 0,
                })
                .unwrap();
        }
        let registry = ConversationRegistry::new(
            ChatStorage::open_in_memory().unwrap(),
            accounts.clone(),
            "[deleted]",
        );
        let credentials: Arc<dyn CredentialResolver> =
            Arc::new(JwtCredentialResolver::new(jwt.clone(), accounts.clone()));
        let hub = ChatHub::new(
            registry,
            credentials,
            Arc::new(LocalPresence::new()),
            Arc::new(LocalRooms::new()),
        );
        Fixture { hub, jwt, accounts }
    }

    fn drain(session: &mut HubSession) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = session.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    fn send(conversation_id: i64, content: &str) -> ClientEvent {
        ClientEvent::MessageSend {
            conversation_id,
            content: content.to_string(),
            kind: MessageKind::Text,
            attachment_url: None,
            reply_to_id: None,
        }
    }

    #[tokio::test]
    async fn test_rejected_credentials_leave_no_session() {
        let f = fixture();

        assert!(matches!(
            f.hub.connect(None).await,
            Err(HubError::Authentication(CredentialError::Missing))
        ));
        assert!(f.hub.connect(Some("not-a-token")).await.is_err());

        let expired = f
            .jwt
            .generate_token_with_ttl(X, "user1", Role::Caller, chrono::Duration::seconds(-60))
            .unwrap();
        assert!(f.hub.connect(Some(&expired)).await.is_err());

        let inactive = f.token(4);
        assert!(matches!(
            f.hub.connect(Some(&inactive)).await,
            Err(HubError::Authentication(CredentialError::Disabled(4)))
        ));

        assert_eq!(f.hub.connection_count(), 0);
        assert!(f.hub.online_users().is_empty());
    }

    #[tokio::test]
    async fn test_connect_joins_conversation_rooms() {
        let f = fixture();
        let conversation_id = f.private();

        let token = f.token(Y);
        let mut session = f.hub.connect(Some(&token)).await.unwrap();
        match session.receiver.try_recv().unwrap() {
            ServerEvent::SessionReady {
                user_id,
                conversation_ids,
                online_user_ids,
                ..
            } => {
                assert_eq!(user_id, Y);
                assert_eq!(conversation_ids, vec![conversation_id]);
                assert_eq!(online_user_ids, vec![Y]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_presence_broadcasts() {
        let f = fixture();
        let mut x = f.connect(X).await;
        let y = f.connect(Y).await;

        assert_eq!(drain(&mut x), vec![ServerEvent::UserOnline { user_id: Y }]);

        f.hub.disconnect(y.connection_id, Y);
        assert_eq!(drain(&mut x), vec![ServerEvent::UserOffline { user_id: Y }]);
        assert_eq!(f.hub.online_users(), vec![X]);
    }

    #[tokio::test]
    async fn test_message_reaches_room_in_order() {
        let f = fixture();
        let conversation_id = f.private();
        let mut x = f.connect(X).await;
        let mut y = f.connect(Y).await;
        drain(&mut x);

        for text in ["one", "two", "three"] {
            f.hub.handle(x.connection_id, &x.user, send(conversation_id, text)).await;
        }

        let seqs: Vec<u64> = drain(&mut y)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::MessageNew { message } => Some(message.seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        // sender gets its own echo too
        assert_eq!(drain(&mut x).len(), 3);
    }

    #[tokio::test]
    async fn test_not_participant_keeps_connection_open() {
        let f = fixture();
        let conversation_id = f.private();
        let mut z = f.connect(Z).await;

        f.hub.handle(z.connection_id, &z.user, send(conversation_id, "intrude")).await;
        match z.receiver.try_recv().unwrap() {
            ServerEvent::Error { kind, event, .. } => {
                assert_eq!(kind, "not_participant");
                assert_eq!(event.as_deref(), Some("message:send"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(f.hub.registry().all_messages(10).unwrap().is_empty());

        // still usable afterwards
        f.hub
            .handle(z.connection_id, &z.user, ClientEvent::TypingStart { conversation_id })
            .await;
        assert!(matches!(z.receiver.try_recv().unwrap(), ServerEvent::Error { .. }));
        assert_eq!(f.hub.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_typing_cleared_on_send() {
        let f = fixture();
        let conversation_id = f.private();
        let x = f.connect(X).await;
        let mut y = f.connect(Y).await;

        f.hub
            .handle(x.connection_id, &x.user, ClientEvent::TypingStart { conversation_id })
            .await;
        assert_eq!(
            drain(&mut y),
            vec![ServerEvent::TypingUpdate {
                conversation_id,
                user_id: X,
                is_typing: true
            }]
        );

        f.hub.handle(x.connection_id, &x.user, send(conversation_id, "done")).await;
        let events = drain(&mut y);
        assert_eq!(
            events[0],
            ServerEvent::TypingUpdate {
                conversation_id,
                user_id: X,
                is_typing: false
            }
        );
        assert!(matches!(events[1], ServerEvent::MessageNew { .. }));
    }

    #[tokio::test]
    async fn test_typing_cleared_on_disconnect() {
        let f = fixture();
        let conversation_id = f.private();
        let x = f.connect(X).await;
        let mut y = f.connect(Y).await;

        f.hub
            .handle(x.connection_id, &x.user, ClientEvent::TypingStart { conversation_id })
            .await;
        drain(&mut y);

        f.hub.disconnect(x.connection_id, X);
        assert_eq!(
            drain(&mut y),
            vec![
                ServerEvent::TypingUpdate {
                    conversation_id,
                    user_id: X,
                    is_typing: false
                },
                ServerEvent::UserOffline { user_id: X },
            ]
        );
    }

    #[tokio::test]
    async fn test_offline_recipient_catches_up() {
        let f = fixture();
        let conversation_id = f.private();
        let x = f.connect(X).await;

        f.hub.handle(x.connection_id, &x.user, send(conversation_id, "hello")).await;

        // Y reconnects later
        let y = f.connect(Y).await;
        let listed = f.hub.registry().list_for_user(Y).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].unread_count, 1);

        f.hub
            .handle(y.connection_id, &y.user, ClientEvent::ConversationRead { conversation_id })
            .await;
        assert_eq!(f.hub.registry().list_for_user(Y).unwrap()[0].unread_count, 0);
    }

    #[tokio::test]
    async fn test_reaction_toggle_broadcasts_once() {
        let f = fixture();
        let conversation_id = f.private();
        let mut x = f.connect(X).await;
        let y = f.connect(Y).await;
        f.hub.handle(x.connection_id, &x.user, send(conversation_id, "ok")).await;
        let message_id = f.hub.registry().all_messages(1).unwrap()[0].id;
        drain(&mut x);

        let add = ClientEvent::ReactionAdd {
            message_id,
            emoji: "👍".to_string(),
        };
        f.hub.handle(y.connection_id, &y.user, add.clone()).await;
        f.hub.handle(y.connection_id, &y.user, add).await;

        let added = drain(&mut x)
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::ReactionAdded { .. }))
            .count();
        assert_eq!(added, 1);
    }

    #[tokio::test]
    async fn test_disabled_after_connect_keeps_history_rules() {
        let f = fixture();
        let conversation_id = f.private();
        let x = f.connect(X).await;

        // account disabled mid-session: the next connect is refused
        f.accounts.set_active(X, false).unwrap();
        let token = f.token(X);
        assert!(f.hub.connect(Some(&token)).await.is_err());
        assert_eq!(f.hub.connection_count(), 1);

        f.hub.disconnect(x.connection_id, X);
        assert_eq!(f.hub.connection_count(), 0);
        assert!(f.hub.registry().get_conversation(conversation_id).is_ok());
    }

    fn message_news(session: &mut HubSession) -> usize {
        drain(session)
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::MessageNew { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_leave_requires_room_membership() {
        let f = fixture();
        let conversation_id = f.private();
        let mut y = f.connect(Y).await;
        let mut z = f.connect(Z).await;
        drain(&mut y);

        f.hub
            .handle(z.connection_id, &z.user, ClientEvent::ConversationLeave { conversation_id })
            .await;

        match z.receiver.try_recv().unwrap() {
            ServerEvent::Error { kind, event, .. } => {
                assert_eq!(kind, "not_participant");
                assert_eq!(event.as_deref(), Some("conversation:leave"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(drain(&mut y).is_empty());
        assert_eq!(f.hub.connection_count(), 2);
    }

    #[tokio::test]
    async fn test_closing_one_tab_keeps_typing_of_the_other() {
        let f = fixture();
        let conversation_id = f.private();
        let idle_tab = f.connect(X).await;
        let typing_tab = f.connect(X).await;
        let mut y = f.connect(Y).await;

        f.hub
            .handle(
                typing_tab.connection_id,
                &typing_tab.user,
                ClientEvent::TypingStart { conversation_id },
            )
            .await;
        assert_eq!(
            drain(&mut y),
            vec![ServerEvent::TypingUpdate {
                conversation_id,
                user_id: X,
                is_typing: true
            }]
        );

        f.hub.disconnect(idle_tab.connection_id, X);
        assert!(drain(&mut y).is_empty());
        assert_eq!(f.hub.typing.typing_in(conversation_id), vec![X]);

        f.hub.disconnect(typing_tab.connection_id, X);
        assert_eq!(
            drain(&mut y),
            vec![
                ServerEvent::TypingUpdate {
                    conversation_id,
                    user_id: X,
                    is_typing: false
                },
                ServerEvent::UserOffline { user_id: X },
            ]
        );
    }

    #[tokio::test]
    async fn test_conversation_locks_released_after_send() {
        let f = fixture();
        let conversation_id = f.private();
        let x = f.connect(X).await;

        f.hub.handle(x.connection_id, &x.user, send(conversation_id, "one")).await;
        f.hub.handle(x.connection_id, &x.user, send(conversation_id, "two")).await;

        assert!(f.hub.conversation_locks.is_empty());
    }

    #[tokio::test]
    async fn test_membership_changes_reroute_room_traffic() {
        let f = fixture();
        let conversation_id = f
            .hub
            .registry()
            .create_conversation(
                X,
                ConversationCreate {
                    kind: ConversationKind::Group,
                    name: Some("Dispatch".to_string()),
                    participant_ids: vec![Y],
                },
            )
            .unwrap()
            .id;
        let x = f.connect(X).await;
        let mut z = f.connect(Z).await;

        f.hub.handle(x.connection_id, &x.user, send(conversation_id, "before")).await;
        assert_eq!(message_news(&mut z), 0);

        // 通过 HTTP 加入
        let added = f
            .hub
            .registry()
            .add_participants(conversation_id, X, &[Z])
            .unwrap();
        f.hub.join_users(conversation_id, &added);
        f.hub.handle(x.connection_id, &x.user, send(conversation_id, "welcome")).await;
        assert_eq!(message_news(&mut z), 1);

        // 通过 HTTP 移除
        f.hub
            .registry()
            .remove_participant(conversation_id, X, Z)
            .unwrap();
        f.hub.remove_user(conversation_id, Z);
        f.hub.handle(x.connection_id, &x.user, send(conversation_id, "after")).await;
        assert_eq!(message_news(&mut z), 0);
    }
}
