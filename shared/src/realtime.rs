//! Realtime chat protocol
//!
//! Client → Server: [`ClientEvent`]
//! Server → Client: [`ServerEvent`]
//!
//! Wire format: `{"event": "message:send", "data": {...}}`

use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageKind};

/// Client → Server 命令
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "message:send")]
    MessageSend {
        conversation_id: i64,
        content: String,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default)]
        attachment_url: Option<String>,
        #[serde(default)]
        reply_to_id: Option<i64>,
    },
    #[serde(rename = "message:edit")]
    MessageEdit { message_id: i64, content: String },
    #[serde(rename = "message:delete")]
    MessageDelete { message_id: i64 },
    #[serde(rename = "reaction:add")]
    ReactionAdd { message_id: i64, emoji: String },
    #[serde(rename = "reaction:remove")]
    ReactionRemove { message_id: i64, emoji: String },
    #[serde(rename = "typing:start")]
    TypingStart { conversation_id: i64 },
    #[serde(rename = "typing:stop")]
    TypingStop { conversation_id: i64 },
    #[serde(rename = "conversation:read")]
    ConversationRead { conversation_id: i64 },
    #[serde(rename = "conversation:join")]
    ConversationJoin { conversation_id: i64 },
    #[serde(rename = "conversation:leave")]
    ConversationLeave { conversation_id: i64 },
}

impl ClientEvent {
    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::MessageSend { .. } => "message:send",
            ClientEvent::MessageEdit { .. } => "message:edit",
            ClientEvent::MessageDelete { .. } => "message:delete",
            ClientEvent::ReactionAdd { .. } => "reaction:add",
            ClientEvent::ReactionRemove { .. } => "reaction:remove",
            ClientEvent::TypingStart { .. } => "typing:start",
            ClientEvent::TypingStop { .. } => "typing:stop",
            ClientEvent::ConversationRead { .. } => "conversation:read",
            ClientEvent::ConversationJoin { .. } => "conversation:join",
            ClientEvent::ConversationLeave { .. } => "conversation:leave",
        }
    }
}

/// Server → Client 推送
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// 认证完成，携带已加入的会话与在线用户
    #[serde(rename = "session:ready")]
    SessionReady {
        user_id: i64,
        connection_id: u64,
        conversation_ids: Vec<i64>,
        online_user_ids: Vec<i64>,
    },
    #[serde(rename = "message:new")]
    MessageNew { message: Message },
    #[serde(rename = "message:edited")]
    MessageEdited { message: Message },
    /// Soft delete: `message` carries the tombstone
    #[serde(rename = "message:deleted")]
    MessageDeleted { message: Message },
    #[serde(rename = "reaction:added")]
    ReactionAdded {
        conversation_id: i64,
        message_id: i64,
        user_id: i64,
        emoji: String,
    },
    #[serde(rename = "reaction:removed")]
    ReactionRemoved {
        conversation_id: i64,
        message_id: i64,
        user_id: i64,
        emoji: String,
    },
    #[serde(rename = "typing:update")]
    TypingUpdate {
        conversation_id: i64,
        user_id: i64,
        is_typing: bool,
    },
    /// Read receipt
    #[serde(rename = "conversation:read")]
    ConversationRead {
        conversation_id: i64,
        user_id: i64,
        last_read_at: i64,
        last_read_seq: u64,
    },
    #[serde(rename = "conversation:join")]
    ConversationJoined { conversation_id: i64, user_id: i64 },
    #[serde(rename = "conversation:leave")]
    ConversationLeft { conversation_id: i64, user_id: i64 },
    #[serde(rename = "user:online")]
    UserOnline { user_id: i64 },
    #[serde(rename = "user:offline")]
    UserOffline { user_id: i64 },
    /// 单个事件失败，连接保持
    #[serde(rename = "error")]
    Error {
        kind: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_wire_format() {
        let raw = r#"{"event":"message:send","data":{"conversation_id":5,"content":"hello"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match &event {
            ClientEvent::MessageSend {
                conversation_id,
                content,
                kind,
                ..
            } => {
                assert_eq!(*conversation_id, 5);
                assert_eq!(content, "hello");
                assert_eq!(*kind, MessageKind::Text);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(event.name(), "message:send");
    }

    #[test]
    fn test_server_event_wire_format() {
        let event = ServerEvent::TypingUpdate {
            conversation_id: 3,
            user_id: 9,
            is_typing: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "typing:update");
        assert_eq!(json["data"]["user_id"], 9);

        let error = ServerEvent::Error {
            kind: "not_participant".to_string(),
            message: "nope".to_string(),
            event: None,
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["event"], "error");
        assert!(json["data"].get("event").is_none());
    }

    #[test]
    fn test_unknown_event_rejected() {
        let raw = r#"{"event":"message:explode","data":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }
}
