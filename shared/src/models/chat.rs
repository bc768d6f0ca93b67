//! Conversation / message models

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationKind {
    Private,
    Group,
    Broadcast,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Private => "PRIVATE",
            ConversationKind::Group => "GROUP",
            ConversationKind::Broadcast => "BROADCAST",
        }
    }
}

/// Conversation entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub kind: ConversationKind,
    /// Absent for PRIVATE (display name derived at read time)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_by: i64,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<i64>,
    /// Persistence sequence of the latest message
    pub last_seq: u64,
}

/// Participant row with read cursor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: i64,
    pub user_id: i64,
    pub joined_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_at: Option<i64>,
    /// Sequence of the last message seen (0 = none)
    pub last_read_seq: u64,
}

impl Participant {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    #[default]
    Text,
    File,
    Image,
    System,
}

impl MessageKind {
    pub fn has_attachment(&self) -> bool {
        matches!(self, MessageKind::File | MessageKind::Image)
    }
}

/// Message entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    /// Per-conversation persistence sequence
    pub seq: u64,
    pub sender_id: i64,
    pub content: String,
    pub kind: MessageKind,
    /// External blob store URL (FILE / IMAGE)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<i64>,
    pub is_edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    pub created_at: i64,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Reaction row, unique per (message, user, emoji)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: i64,
    pub user_id: i64,
    pub emoji: String,
    pub created_at: i64,
}

/// Conversation as listed for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub display_name: String,
    pub participant_ids: Vec<i64>,
    pub unread_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
}

/// Create conversation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationCreate {
    pub kind: ConversationKind,
    #[serde(default)]
    pub name: Option<String>,
    /// Other participants (the creator is always added)
    pub participant_ids: Vec<i64>,
}

/// New message payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDraft {
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub reply_to_id: Option<i64>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Read cursor after `markRead`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub conversation_id: i64,
    pub user_id: i64,
    pub last_read_at: i64,
    pub last_read_seq: u64,
}

/// Admin statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatStats {
    pub conversations_by_kind: BTreeMap<String, u64>,
    pub conversation_count: u64,
    pub message_count: u64,
    pub deleted_message_count: u64,
    pub reaction_count: u64,
}
