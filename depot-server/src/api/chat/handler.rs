//! Chat API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use shared::ServerEvent;
use shared::models::{
    ChatStats, Conversation, ConversationCreate, ConversationSummary, Message, Reaction,
    ReadReceipt,
};

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::security_log;
use crate::utils::AppResult;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// 只返回 seq 小于该值的消息 (向前翻页)
    #[serde(default)]
    pub before_seq: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default)]
    pub conversation_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AdminMessagesQuery {
    #[serde(default = "default_admin_limit")]
    pub limit: usize,
}

fn default_admin_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct ParticipantsAdd {
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub participant_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct ParticipantsAdded {
    pub added: Vec<i64>,
}

/// GET /api/chat/conversations - 当前用户的会话 (含未读数)
pub async fn list_conversations(
    State(state): State<ServerState>,
    current_user: CurrentUser,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    Ok(Json(state.chat.list_for_user(current_user.id)?))
}

/// POST /api/chat/conversations
///
/// 私聊已存在时返回原会话
pub async fn create_conversation(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Json(payload): Json<ConversationCreate>,
) -> AppResult<Json<Conversation>> {
    let conversation = state.chat.create_conversation(current_user.id, payload)?;
    let members = state.chat.participant_ids(conversation.id)?;
    state.chat_hub.join_users(conversation.id, &members);
    Ok(Json(conversation))
}

/// GET /api/chat/conversations/{id}
pub async fn get_conversation(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ConversationDetail>> {
    state.chat.require_participant(id, current_user.id)?;
    Ok(Json(ConversationDetail {
        conversation: state.chat.get_conversation(id)?,
        participant_ids: state.chat.participant_ids(id)?,
    }))
}

/// GET /api/chat/conversations/{id}/messages?before_seq=&limit=
pub async fn messages(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<Message>>> {
    Ok(Json(state.chat.messages(
        id,
        current_user.id,
        query.before_seq,
        query.limit,
    )?))
}

/// POST /api/chat/conversations/{id}/participants
pub async fn add_participants(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<ParticipantsAdd>,
) -> AppResult<Json<ParticipantsAdded>> {
    let added = state
        .chat
        .add_participants(id, current_user.id, &payload.user_ids)?;
    state.chat_hub.join_users(id, &added);
    Ok(Json(ParticipantsAdded { added }))
}

/// DELETE /api/chat/conversations/{id}/participants/{user_id}
pub async fn remove_participant(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path((id, user_id)): Path<(i64, i64)>,
) -> AppResult<Json<bool>> {
    state.chat.remove_participant(id, current_user.id, user_id)?;
    state.chat_hub.remove_user(id, user_id);
    Ok(Json(true))
}

/// POST /api/chat/conversations/{id}/read
pub async fn mark_read(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ReadReceipt>> {
    let receipt = state.chat.mark_read(id, current_user.id)?;
    state.chat_hub.publish(
        id,
        ServerEvent::ConversationRead {
            conversation_id: id,
            user_id: receipt.user_id,
            last_read_at: receipt.last_read_at,
            last_read_seq: receipt.last_read_seq,
        },
    );
    Ok(Json(receipt))
}

/// GET /api/chat/messages/{id}/reactions
pub async fn reactions(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<Reaction>>> {
    Ok(Json(state.chat.reactions(id, current_user.id)?))
}

/// GET /api/chat/search?q=&conversation_id=
pub async fn search(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<Message>>> {
    Ok(Json(state.chat.search_messages(
        current_user.id,
        &query.q,
        query.conversation_id,
    )?))
}

/// GET /api/chat/admin/stats
pub async fn admin_stats(
    State(state): State<ServerState>,
    current_user: CurrentUser,
) -> AppResult<Json<ChatStats>> {
    security_log!("INFO", "admin_chat_query", user_id = current_user.id, view = "stats");
    Ok(Json(state.chat.stats()?))
}

/// GET /api/chat/admin/conversations
pub async fn admin_conversations(
    State(state): State<ServerState>,
    current_user: CurrentUser,
) -> AppResult<Json<Vec<Conversation>>> {
    security_log!("INFO", "admin_chat_query", user_id = current_user.id, view = "conversations");
    Ok(Json(state.chat.all_conversations()?))
}

/// GET /api/chat/admin/messages?limit=
pub async fn admin_messages(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Query(query): Query<AdminMessagesQuery>,
) -> AppResult<Json<Vec<Message>>> {
    security_log!(
        "INFO",
        "admin_chat_query",
        user_id = current_user.id,
        view = "messages",
        limit = query.limit
    );
    Ok(Json(state.chat.all_messages(query.limit)?))
}
