//! Conversation Registry
//!
//! Durable side of chat: conversations, membership, read cursors, messages
//! and reactions. Every method is synchronous; the hub calls it through
//! `spawn_blocking`.

use std::collections::{BTreeMap, BTreeSet};

use shared::models::{
    ChatStats, Conversation, ConversationCreate, ConversationKind, ConversationSummary, Message,
    MessageDraft, MessageKind, Participant, Reaction, ReadReceipt,
};
use shared::util::now_millis;

use super::error::{ChatError, ChatResult};
use super::storage::{CONVERSATION_ID_KEY, ChatStorage, MESSAGE_ID_KEY};
use crate::auth::{AccountDirectory, CurrentUser};

/// History page size
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

const MAX_CONTENT_LEN: usize = 4000;
const MAX_EMOJI_LEN: usize = 32;

/// Result of a reaction toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionChange {
    pub conversation_id: i64,
    /// false: the set already had (add) / did not have (remove) the row
    pub changed: bool,
}

#[derive(Clone)]
pub struct ConversationRegistry {
    storage: ChatStorage,
    accounts: AccountDirectory,
    tombstone: String,
}

impl ConversationRegistry {
    pub fn new(storage: ChatStorage, accounts: AccountDirectory, tombstone: impl Into<String>) -> Self {
        Self {
            storage,
            accounts,
            tombstone: tombstone.into(),
        }
    }

    fn commit(txn: redb::WriteTransaction) -> ChatResult<()> {
        txn.commit().map_err(crate::inventory::StorageError::from)?;
        Ok(())
    }

    fn user_label(&self, user_id: i64) -> String {
        match self.accounts.display_name(user_id) {
            Ok(Some(name)) => name,
            Ok(None) => format!("User {}", user_id),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Display name lookup failed");
                format!("User {}", user_id)
            }
        }
    }

    // ========== Conversations ==========

    /// PRIVATE: exactly two people, name ignored, one conversation per pair.
    /// GROUP / BROADCAST: name required.
    pub fn create_conversation(
        &self,
        creator_id: i64,
        create: ConversationCreate,
    ) -> ChatResult<Conversation> {
        let mut members: BTreeSet<i64> = create.participant_ids.iter().copied().collect();
        members.insert(creator_id);
        if let Some(bad) = members.iter().find(|id| **id <= 0) {
            return Err(ChatError::Validation(format!("invalid participant id {}", bad)));
        }

        let name = match create.kind {
            ConversationKind::Private => {
                if members.len() != 2 {
                    return Err(ChatError::Validation(
                        "a private conversation has exactly two participants".to_string(),
                    ));
                }
                None
            }
            ConversationKind::Group | ConversationKind::Broadcast => {
                let name = create
                    .name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| {
                        ChatError::Validation(format!("{} conversations need a name", create.kind.as_str()))
                    })?;
                Some(name.to_string())
            }
        };

        let txn = self.storage.begin_write()?;

        if create.kind == ConversationKind::Private {
            let mut pair = members.iter().copied();
            let (a, b) = (pair.next().unwrap_or_default(), pair.next().unwrap_or_default());
            if let Some(existing) = self.storage.private_pair_txn(&txn, a, b)? {
                if let Some(conversation) = self.storage.get_conversation_txn(&txn, existing)? {
                    return Ok(conversation);
                }
            }
            let id = self.storage.next_id(&txn, CONVERSATION_ID_KEY)?;
            self.storage.put_private_pair(&txn, a, b, id)?;
            return self.finish_create(txn, id, create.kind, None, creator_id, &members);
        }

        let id = self.storage.next_id(&txn, CONVERSATION_ID_KEY)?;
        self.finish_create(txn, id, create.kind, name, creator_id, &members)
    }

    fn finish_create(
        &self,
        txn: redb::WriteTransaction,
        id: i64,
        kind: ConversationKind,
        name: Option<String>,
        creator_id: i64,
        members: &BTreeSet<i64>,
    ) -> ChatResult<Conversation> {
        let now = now_millis();
        let conversation = Conversation {
            id,
            kind,
            name,
            created_by: creator_id,
            created_at: now,
            last_message_at: None,
            last_seq: 0,
        };
        self.storage.put_conversation(&txn, &conversation)?;
        for user_id in members {
            self.storage.put_participant(
                &txn,
                &Participant {
                    conversation_id: id,
                    user_id: *user_id,
                    joined_at: now,
                    left_at: None,
                    last_read_at: None,
                    last_read_seq: 0,
                },
            )?;
        }
        Self::commit(txn)?;

        tracing::info!(conversation_id = id, kind = kind.as_str(), participants = members.len(), "Conversation created");
        Ok(conversation)
    }

    pub fn get_conversation(&self, conversation_id: i64) -> ChatResult<Conversation> {
        self.storage
            .get_conversation(conversation_id)?
            .ok_or(ChatError::ConversationNotFound(conversation_id))
    }

    /// Active participant row, or NotParticipant
    pub fn require_participant(&self, conversation_id: i64, user_id: i64) -> ChatResult<Participant> {
        if self.storage.get_conversation(conversation_id)?.is_none() {
            return Err(ChatError::ConversationNotFound(conversation_id));
        }
        self.storage
            .get_participant(conversation_id, user_id)?
            .filter(Participant::is_active)
            .ok_or(ChatError::NotParticipant {
                conversation_id,
                user_id,
            })
    }

    pub fn participant_ids(&self, conversation_id: i64) -> ChatResult<Vec<i64>> {
        Ok(self
            .storage
            .participants(conversation_id)?
            .into_iter()
            .filter(Participant::is_active)
            .map(|p| p.user_id)
            .collect())
    }

    pub fn conversation_ids_for_user(&self, user_id: i64) -> ChatResult<Vec<i64>> {
        Ok(self.storage.conversation_ids_for_user(user_id)?)
    }

    /// Returns the users that actually joined (already active ones are skipped)
    pub fn add_participants(
        &self,
        conversation_id: i64,
        actor_id: i64,
        user_ids: &[i64],
    ) -> ChatResult<Vec<i64>> {
        let txn = self.storage.begin_write()?;
        let conversation = self
            .storage
            .get_conversation_txn(&txn, conversation_id)?
            .ok_or(ChatError::ConversationNotFound(conversation_id))?;
        self.active_participant_txn(&txn, conversation_id, actor_id)?;
        if conversation.kind == ConversationKind::Private {
            return Err(ChatError::Validation(
                "participants of a private conversation are fixed".to_string(),
            ));
        }

        let now = now_millis();
        let mut added = Vec::new();
        for user_id in user_ids.iter().copied().collect::<BTreeSet<_>>() {
            if user_id <= 0 {
                return Err(ChatError::Validation(format!("invalid participant id {}", user_id)));
            }
            let participant = match self.storage.get_participant_txn(&txn, conversation_id, user_id)? {
                Some(p) if p.is_active() => continue,
                // 重新加入保留原来的已读游标
                Some(p) => Participant {
                    joined_at: now,
                    left_at: None,
                    ..p
                },
                None => Participant {
                    conversation_id,
                    user_id,
                    joined_at: now,
                    left_at: None,
                    last_read_at: None,
                    last_read_seq: 0,
                },
            };
            self.storage.put_participant(&txn, &participant)?;
            added.push(user_id);
        }
        Self::commit(txn)?;

        tracing::info!(conversation_id, actor_id, added = ?added, "Participants added");
        Ok(added)
    }

    /// Membership ends; the conversation and its history stay
    pub fn remove_participant(
        &self,
        conversation_id: i64,
        actor_id: i64,
        user_id: i64,
    ) -> ChatResult<()> {
        let txn = self.storage.begin_write()?;
        let conversation = self
            .storage
            .get_conversation_txn(&txn, conversation_id)?
            .ok_or(ChatError::ConversationNotFound(conversation_id))?;
        self.active_participant_txn(&txn, conversation_id, actor_id)?;
        if conversation.kind == ConversationKind::Private {
            return Err(ChatError::Validation(
                "participants of a private conversation are fixed".to_string(),
            ));
        }

        let mut participant = self.active_participant_txn(&txn, conversation_id, user_id)?;
        participant.left_at = Some(now_millis());
        self.storage.put_participant(&txn, &participant)?;
        Self::commit(txn)?;

        tracing::info!(conversation_id, actor_id, user_id, "Participant removed");
        Ok(())
    }

    fn active_participant_txn(
        &self,
        txn: &redb::WriteTransaction,
        conversation_id: i64,
        user_id: i64,
    ) -> ChatResult<Participant> {
        self.storage
            .get_participant_txn(txn, conversation_id, user_id)?
            .filter(Participant::is_active)
            .ok_or(ChatError::NotParticipant {
                conversation_id,
                user_id,
            })
    }

    /// Conversations of a user, most recent activity first, with unread counts
    pub fn list_for_user(&self, user_id: i64) -> ChatResult<Vec<ConversationSummary>> {
        let mut summaries = Vec::new();
        for conversation_id in self.storage.conversation_ids_for_user(user_id)? {
            let Some(conversation) = self.storage.get_conversation(conversation_id)? else {
                continue;
            };
            let participants = self.storage.participants(conversation_id)?;
            let cursor = participants
                .iter()
                .find(|p| p.user_id == user_id)
                .map(|p| p.last_read_seq)
                .unwrap_or(0);
            let participant_ids: Vec<i64> = participants
                .iter()
                .filter(|p| p.is_active())
                .map(|p| p.user_id)
                .collect();

            let unread_count = self
                .storage
                .messages_after(conversation_id, cursor)?
                .iter()
                .filter(|m| m.sender_id != user_id && !m.is_deleted())
                .count() as u64;

            let display_name = match conversation.kind {
                ConversationKind::Private => {
                    let other = participants
                        .iter()
                        .map(|p| p.user_id)
                        .find(|id| *id != user_id)
                        .unwrap_or(user_id);
                    self.user_label(other)
                }
                _ => conversation.name.clone().unwrap_or_default(),
            };

            summaries.push(ConversationSummary {
                last_message: self.storage.last_message(conversation_id)?,
                conversation,
                display_name,
                participant_ids,
                unread_count,
            });
        }

        summaries.sort_by(|a, b| {
            let key = |s: &ConversationSummary| {
                s.conversation
                    .last_message_at
                    .unwrap_or(s.conversation.created_at)
            };
            key(b).cmp(&key(a)).then(b.conversation.id.cmp(&a.conversation.id))
        });
        Ok(summaries)
    }

    /// Move the read cursor to the latest persisted message
    ///
    /// The cursor only moves forward.
    pub fn mark_read(&self, conversation_id: i64, user_id: i64) -> ChatResult<ReadReceipt> {
        let txn = self.storage.begin_write()?;
        let conversation = self
            .storage
            .get_conversation_txn(&txn, conversation_id)?
            .ok_or(ChatError::ConversationNotFound(conversation_id))?;
        let mut participant = self.active_participant_txn(&txn, conversation_id, user_id)?;

        let now = now_millis();
        participant.last_read_seq = participant.last_read_seq.max(conversation.last_seq);
        participant.last_read_at = Some(participant.last_read_at.map_or(now, |at| at.max(now)));
        self.storage.put_participant(&txn, &participant)?;
        Self::commit(txn)?;

        Ok(ReadReceipt {
            conversation_id,
            user_id,
            last_read_at: participant.last_read_at.unwrap_or(now),
            last_read_seq: participant.last_read_seq,
        })
    }

    // ========== Messages ==========

    pub fn send_message(
        &self,
        conversation_id: i64,
        sender: &CurrentUser,
        draft: MessageDraft,
    ) -> ChatResult<Message> {
        let content = draft.content.trim().to_string();
        if content.len() > MAX_CONTENT_LEN {
            return Err(ChatError::Validation("message too long".to_string()));
        }
        let attachment_url = draft
            .attachment_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        if draft.kind.has_attachment() {
            if attachment_url.is_none() {
                return Err(ChatError::Validation(
                    "file and image messages need an attachment url".to_string(),
                ));
            }
        } else if content.is_empty() {
            return Err(ChatError::Validation("message content is empty".to_string()));
        }
        if draft.kind == MessageKind::System && !sender.is_chat_moderator() {
            return Err(ChatError::Forbidden("system messages are reserved".to_string()));
        }

        let txn = self.storage.begin_write()?;
        let mut conversation = self
            .storage
            .get_conversation_txn(&txn, conversation_id)?
            .ok_or(ChatError::ConversationNotFound(conversation_id))?;
        self.active_participant_txn(&txn, conversation_id, sender.id)?;

        if conversation.kind == ConversationKind::Broadcast
            && conversation.created_by != sender.id
            && !sender.is_chat_moderator()
        {
            return Err(ChatError::Forbidden(
                "only the creator or a moderator posts in a broadcast".to_string(),
            ));
        }

        if let Some(reply_to) = draft.reply_to_id {
            let parent = self
                .storage
                .get_message_txn(&txn, reply_to)?
                .ok_or(ChatError::MessageNotFound(reply_to))?;
            if parent.conversation_id != conversation_id {
                return Err(ChatError::Validation(
                    "reply target belongs to another conversation".to_string(),
                ));
            }
        }

        let now = now_millis();
        let message = Message {
            id: self.storage.next_id(&txn, MESSAGE_ID_KEY)?,
            conversation_id,
            seq: conversation.last_seq + 1,
            sender_id: sender.id,
            content,
            kind: draft.kind,
            attachment_url,
            reply_to_id: draft.reply_to_id,
            is_edited: false,
            edited_at: None,
            deleted_at: None,
            created_at: now,
        };
        self.storage.put_message(&txn, &message)?;

        conversation.last_seq = message.seq;
        conversation.last_message_at = Some(now);
        self.storage.put_conversation(&txn, &conversation)?;
        Self::commit(txn)?;

        tracing::debug!(conversation_id, message_id = message.id, seq = message.seq, "Message persisted");
        Ok(message)
    }

    /// Sender only; sets `is_edited`
    pub fn edit_message(&self, message_id: i64, editor_id: i64, content: &str) -> ChatResult<Message> {
        let content = content.trim();
        if content.is_empty() || content.len() > MAX_CONTENT_LEN {
            return Err(ChatError::Validation("invalid message content".to_string()));
        }

        let txn = self.storage.begin_write()?;
        let mut message = self
            .storage
            .get_message_txn(&txn, message_id)?
            .ok_or(ChatError::MessageNotFound(message_id))?;
        if message.sender_id != editor_id {
            return Err(ChatError::Forbidden("only the sender edits a message".to_string()));
        }
        if message.is_deleted() {
            return Err(ChatError::Validation("deleted messages cannot be edited".to_string()));
        }

        message.content = content.to_string();
        message.is_edited = true;
        message.edited_at = Some(now_millis());
        self.storage.put_message(&txn, &message)?;
        Self::commit(txn)?;
        Ok(message)
    }

    /// Soft delete by the sender or a moderator: tombstone + `deleted_at`
    pub fn delete_message(&self, message_id: i64, actor: &CurrentUser) -> ChatResult<Message> {
        let txn = self.storage.begin_write()?;
        let mut message = self
            .storage
            .get_message_txn(&txn, message_id)?
            .ok_or(ChatError::MessageNotFound(message_id))?;
        if message.sender_id != actor.id && !actor.is_chat_moderator() {
            return Err(ChatError::Forbidden(
                "only the sender or a moderator deletes a message".to_string(),
            ));
        }
        if message.is_deleted() {
            return Ok(message);
        }

        message.content = self.tombstone.clone();
        message.attachment_url = None;
        message.deleted_at = Some(now_millis());
        self.storage.put_message(&txn, &message)?;
        Self::commit(txn)?;

        if message.sender_id != actor.id {
            tracing::info!(message_id, actor_id = actor.id, conversation_id = message.conversation_id, "Message deleted by moderator");
        }
        Ok(message)
    }

    pub fn get_message(&self, message_id: i64) -> ChatResult<Message> {
        self.storage
            .get_message(message_id)?
            .ok_or(ChatError::MessageNotFound(message_id))
    }

    /// History page in persistence order
    pub fn messages(
        &self,
        conversation_id: i64,
        user_id: i64,
        before_seq: Option<u64>,
        limit: Option<usize>,
    ) -> ChatResult<Vec<Message>> {
        self.require_participant(conversation_id, user_id)?;
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        Ok(self.storage.messages(conversation_id, before_seq, limit)?)
    }

    // ========== Reactions ==========

    /// Idempotent upsert keyed by (message, user, emoji)
    pub fn add_reaction(&self, message_id: i64, user_id: i64, emoji: &str) -> ChatResult<ReactionChange> {
        let emoji = Self::check_emoji(emoji)?;
        let txn = self.storage.begin_write()?;
        let message = self
            .storage
            .get_message_txn(&txn, message_id)?
            .ok_or(ChatError::MessageNotFound(message_id))?;
        self.active_participant_txn(&txn, message.conversation_id, user_id)?;

        let changed = self.storage.add_reaction(
            &txn,
            &Reaction {
                message_id,
                user_id,
                emoji: emoji.to_string(),
                created_at: now_millis(),
            },
        )?;
        Self::commit(txn)?;
        Ok(ReactionChange {
            conversation_id: message.conversation_id,
            changed,
        })
    }

    /// Removing an absent reaction is a no-op
    pub fn remove_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> ChatResult<ReactionChange> {
        let emoji = Self::check_emoji(emoji)?;
        let txn = self.storage.begin_write()?;
        let message = self
            .storage
            .get_message_txn(&txn, message_id)?
            .ok_or(ChatError::MessageNotFound(message_id))?;
        self.active_participant_txn(&txn, message.conversation_id, user_id)?;

        let changed = self.storage.remove_reaction(&txn, message_id, user_id, emoji)?;
        Self::commit(txn)?;
        Ok(ReactionChange {
            conversation_id: message.conversation_id,
            changed,
        })
    }

    pub fn reactions(&self, message_id: i64, user_id: i64) -> ChatResult<Vec<Reaction>> {
        let message = self.get_message(message_id)?;
        self.require_participant(message.conversation_id, user_id)?;
        Ok(self.storage.reactions(message_id)?)
    }

    fn check_emoji(emoji: &str) -> ChatResult<&str> {
        let emoji = emoji.trim();
        if emoji.is_empty() || emoji.len() > MAX_EMOJI_LEN {
            return Err(ChatError::Validation("invalid emoji".to_string()));
        }
        Ok(emoji)
    }

    // ========== Search ==========

    /// Case-insensitive substring over non-deleted messages the user can see
    pub fn search_messages(
        &self,
        user_id: i64,
        query: &str,
        conversation_id: Option<i64>,
    ) -> ChatResult<Vec<Message>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(ChatError::Validation("search query is empty".to_string()));
        }

        let scope: Vec<i64> = match conversation_id {
            Some(id) => {
                self.require_participant(id, user_id)?;
                vec![id]
            }
            None => self.storage.conversation_ids_for_user(user_id)?,
        };

        let mut matches = Vec::new();
        for id in scope {
            matches.extend(
                self.storage
                    .messages_after(id, 0)?
                    .into_iter()
                    .filter(|m| !m.is_deleted() && m.content.to_lowercase().contains(&needle)),
            );
        }
        matches.sort_by_key(|m| std::cmp::Reverse((m.created_at, m.id)));
        Ok(matches)
    }

    // ========== Admin views ==========

    pub fn stats(&self) -> ChatResult<ChatStats> {
        let conversations = self.storage.list_conversations()?;
        let mut by_kind: BTreeMap<String, u64> = BTreeMap::new();
        for conversation in &conversations {
            *by_kind.entry(conversation.kind.as_str().to_string()).or_default() += 1;
        }
        let messages = self.storage.all_messages()?;
        Ok(ChatStats {
            conversations_by_kind: by_kind,
            conversation_count: conversations.len() as u64,
            message_count: messages.len() as u64,
            deleted_message_count: messages.iter().filter(|m| m.is_deleted()).count() as u64,
            reaction_count: self.storage.reaction_count()?,
        })
    }

    pub fn all_conversations(&self) -> ChatResult<Vec<Conversation>> {
        Ok(self.storage.list_conversations()?)
    }

    /// Newest first
    pub fn all_messages(&self, limit: usize) -> ChatResult<Vec<Message>> {
        let mut messages = self.storage.all_messages()?;
        messages.sort_by_key(|m| std::cmp::Reverse((m.created_at, m.id)));
        messages.truncate(limit.clamp(1, MAX_PAGE_SIZE));
        Ok(messages)
    }
}
