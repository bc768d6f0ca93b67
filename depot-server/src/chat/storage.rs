//! redb-based storage for conversations, participants, messages and reactions
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `conversations` | `conversation_id` | `Conversation` | Conversation rows |
//! | `participants` | `(conversation_id, user_id)` | `Participant` | Membership + read cursor |
//! | `user_conversations` | `(user_id, conversation_id)` | `()` | Active memberships per user |
//! | `private_pairs` | `(low_user, high_user)` | `conversation_id` | One PRIVATE per pair |
//! | `messages` | `(conversation_id, seq)` | `Message` | History in persistence order |
//! | `message_index` | `message_id` | `(conversation_id, seq)` | Lookup by id |
//! | `reactions` | `(message_id, user_id, emoji)` | `created_at` | Set membership |
//! | `sequence_counter` | name | `u64` | Id sequences |

use std::path::Path;
use std::sync::Arc;

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use shared::models::{Conversation, Message, Participant, Reaction};

use crate::inventory::StorageResult;

const CONVERSATIONS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("conversations");
const PARTICIPANTS_TABLE: TableDefinition<(i64, i64), &[u8]> =
    TableDefinition::new("participants");
const USER_CONVERSATIONS_TABLE: TableDefinition<(i64, i64), ()> =
    TableDefinition::new("user_conversations");
const PRIVATE_PAIRS_TABLE: TableDefinition<(i64, i64), i64> =
    TableDefinition::new("private_pairs");
const MESSAGES_TABLE: TableDefinition<(i64, u64), &[u8]> = TableDefinition::new("messages");
const MESSAGE_INDEX_TABLE: TableDefinition<i64, (i64, u64)> =
    TableDefinition::new("message_index");
const REACTIONS_TABLE: TableDefinition<(i64, i64, &str), i64> = TableDefinition::new("reactions");
const SEQUENCE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sequence_counter");

pub const CONVERSATION_ID_KEY: &str = "conversation_id";
pub const MESSAGE_ID_KEY: &str = "message_id";

/// Ordered key for a user pair
fn pair_key(a: i64, b: i64) -> (i64, i64) {
    if a <= b { (a, b) } else { (b, a) }
}

#[derive(Clone)]
pub struct ChatStorage {
    db: Arc<Database>,
}

impl ChatStorage {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CONVERSATIONS_TABLE)?;
            let _ = write_txn.open_table(PARTICIPANTS_TABLE)?;
            let _ = write_txn.open_table(USER_CONVERSATIONS_TABLE)?;
            let _ = write_txn.open_table(PRIVATE_PAIRS_TABLE)?;
            let _ = write_txn.open_table(MESSAGES_TABLE)?;
            let _ = write_txn.open_table(MESSAGE_INDEX_TABLE)?;
            let _ = write_txn.open_table(REACTIONS_TABLE)?;
            let _ = write_txn.open_table(SEQUENCE_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    pub fn next_id(&self, txn: &WriteTransaction, key: &str) -> StorageResult<i64> {
        let mut table = txn.open_table(SEQUENCE_TABLE)?;
        let current = table.get(key)?.map(|guard| guard.value()).unwrap_or(0);
        let next = current + 1;
        table.insert(key, next)?;
        Ok(next as i64)
    }

    // ========== Conversations ==========

    pub fn put_conversation(
        &self,
        txn: &WriteTransaction,
        conversation: &Conversation,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(CONVERSATIONS_TABLE)?;
        let value = serde_json::to_vec(conversation)?;
        table.insert(conversation.id, value.as_slice())?;
        Ok(())
    }

    pub fn get_conversation_txn(
        &self,
        txn: &WriteTransaction,
        conversation_id: i64,
    ) -> StorageResult<Option<Conversation>> {
        let table = txn.open_table(CONVERSATIONS_TABLE)?;
        match table.get(conversation_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_conversation(&self, conversation_id: i64) -> StorageResult<Option<Conversation>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONVERSATIONS_TABLE)?;
        match table.get(conversation_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_conversations(&self) -> StorageResult<Vec<Conversation>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONVERSATIONS_TABLE)?;
        let mut conversations = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            conversations.push(serde_json::from_slice(value.value())?);
        }
        Ok(conversations)
    }

    pub fn private_pair_txn(
        &self,
        txn: &WriteTransaction,
        a: i64,
        b: i64,
    ) -> StorageResult<Option<i64>> {
        let table = txn.open_table(PRIVATE_PAIRS_TABLE)?;
        Ok(table.get(pair_key(a, b))?.map(|guard| guard.value()))
    }

    pub fn put_private_pair(
        &self,
        txn: &WriteTransaction,
        a: i64,
        b: i64,
        conversation_id: i64,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(PRIVATE_PAIRS_TABLE)?;
        table.insert(pair_key(a, b), conversation_id)?;
        Ok(())
    }

    // ========== Participants ==========

    /// Write a participant row and keep the per-user index in step
    pub fn put_participant(
        &self,
        txn: &WriteTransaction,
        participant: &Participant,
    ) -> StorageResult<()> {
        {
            let mut table = txn.open_table(PARTICIPANTS_TABLE)?;
            let value = serde_json::to_vec(participant)?;
            table.insert(
                (participant.conversation_id, participant.user_id),
                value.as_slice(),
            )?;
        }
        let mut index = txn.open_table(USER_CONVERSATIONS_TABLE)?;
        let key = (participant.user_id, participant.conversation_id);
        if participant.is_active() {
            index.insert(key, ())?;
        } else {
            index.remove(key)?;
        }
        Ok(())
    }

    pub fn get_participant_txn(
        &self,
        txn: &WriteTransaction,
        conversation_id: i64,
        user_id: i64,
    ) -> StorageResult<Option<Participant>> {
        let table = txn.open_table(PARTICIPANTS_TABLE)?;
        match table.get((conversation_id, user_id))? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> StorageResult<Option<Participant>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PARTICIPANTS_TABLE)?;
        match table.get((conversation_id, user_id))? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// All participant rows, including those who left
    pub fn participants(&self, conversation_id: i64) -> StorageResult<Vec<Participant>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PARTICIPANTS_TABLE)?;
        let mut participants = Vec::new();
        for result in table.range((conversation_id, i64::MIN)..=(conversation_id, i64::MAX))? {
            let (_, value) = result?;
            participants.push(serde_json::from_slice(value.value())?);
        }
        Ok(participants)
    }

    /// Conversations the user currently participates in
    pub fn conversation_ids_for_user(&self, user_id: i64) -> StorageResult<Vec<i64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USER_CONVERSATIONS_TABLE)?;
        let mut ids = Vec::new();
        for result in table.range((user_id, i64::MIN)..=(user_id, i64::MAX))? {
            let (key, _) = result?;
            let (_, conversation_id) = key.value();
            ids.push(conversation_id);
        }
        Ok(ids)
    }

    // ========== Messages ==========

    pub fn put_message(&self, txn: &WriteTransaction, message: &Message) -> StorageResult<()> {
        {
            let mut table = txn.open_table(MESSAGES_TABLE)?;
            let value = serde_json::to_vec(message)?;
            table.insert((message.conversation_id, message.seq), value.as_slice())?;
        }
        let mut index = txn.open_table(MESSAGE_INDEX_TABLE)?;
        index.insert(message.id, (message.conversation_id, message.seq))?;
        Ok(())
    }

    pub fn get_message_txn(
        &self,
        txn: &WriteTransaction,
        message_id: i64,
    ) -> StorageResult<Option<Message>> {
        let key = {
            let index = txn.open_table(MESSAGE_INDEX_TABLE)?;
            match index.get(message_id)? {
                Some(guard) => guard.value(),
                None => return Ok(None),
            }
        };
        let table = txn.open_table(MESSAGES_TABLE)?;
        match table.get(key)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_message(&self, message_id: i64) -> StorageResult<Option<Message>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(MESSAGE_INDEX_TABLE)?;
        let Some(key) = index.get(message_id)?.map(|guard| guard.value()) else {
            return Ok(None);
        };
        let table = read_txn.open_table(MESSAGES_TABLE)?;
        match table.get(key)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Up to `limit` messages before `before_seq`, oldest first
    pub fn messages(
        &self,
        conversation_id: i64,
        before_seq: Option<u64>,
        limit: usize,
    ) -> StorageResult<Vec<Message>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;
        let upper = before_seq.unwrap_or(u64::MAX);

        let mut messages = Vec::with_capacity(limit);
        for result in table
            .range((conversation_id, 0u64)..(conversation_id, upper))?
            .rev()
            .take(limit)
        {
            let (_, value) = result?;
            messages.push(serde_json::from_slice(value.value())?);
        }
        messages.reverse();
        Ok(messages)
    }

    /// Messages persisted after `after_seq`, oldest first
    pub fn messages_after(
        &self,
        conversation_id: i64,
        after_seq: u64,
    ) -> StorageResult<Vec<Message>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;
        let mut messages = Vec::new();
        let Some(start) = after_seq.checked_add(1) else {
            return Ok(messages);
        };
        for result in table.range((conversation_id, start)..=(conversation_id, u64::MAX))? {
            let (_, value) = result?;
            messages.push(serde_json::from_slice(value.value())?);
        }
        Ok(messages)
    }

    pub fn last_message(&self, conversation_id: i64) -> StorageResult<Option<Message>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;
        let mut range = table.range((conversation_id, 0u64)..=(conversation_id, u64::MAX))?;
        match range.next_back() {
            Some(result) => {
                let (_, value) = result?;
                Ok(Some(serde_json::from_slice(value.value())?))
            }
            None => Ok(None),
        }
    }

    /// Every message in the store (admin views, search)
    pub fn all_messages(&self) -> StorageResult<Vec<Message>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;
        let mut messages = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            messages.push(serde_json::from_slice(value.value())?);
        }
        Ok(messages)
    }

    // ========== Reactions ==========

    /// Upsert; `false` when the row already existed
    pub fn add_reaction(&self, txn: &WriteTransaction, reaction: &Reaction) -> StorageResult<bool> {
        let mut table = txn.open_table(REACTIONS_TABLE)?;
        let key = (reaction.message_id, reaction.user_id, reaction.emoji.as_str());
        if table.get(key)?.is_some() {
            return Ok(false);
        }
        table.insert(key, reaction.created_at)?;
        Ok(true)
    }

    /// `false` when there was nothing to remove
    pub fn remove_reaction(
        &self,
        txn: &WriteTransaction,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> StorageResult<bool> {
        let mut table = txn.open_table(REACTIONS_TABLE)?;
        let removed = table.remove((message_id, user_id, emoji))?.is_some();
        Ok(removed)
    }

    pub fn reactions(&self, message_id: i64) -> StorageResult<Vec<Reaction>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REACTIONS_TABLE)?;
        let mut reactions = Vec::new();
        let Some(next) = message_id.checked_add(1) else {
            return Ok(reactions);
        };
        for result in table.range((message_id, i64::MIN, "")..(next, i64::MIN, ""))? {
            let (key, value) = result?;
            let (_, user_id, emoji) = key.value();
            reactions.push(Reaction {
                message_id,
                user_id,
                emoji: emoji.to_string(),
                created_at: value.value(),
            });
        }
        Ok(reactions)
    }

    pub fn reaction_count(&self) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REACTIONS_TABLE)?;
        Ok(table.len()?)
    }
}

impl std::fmt::Debug for ChatStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStorage").finish_non_exhaustive()
    }
}
