use shared::{AppError, ErrorCode, ServerEvent};
use thiserror::Error;

use crate::auth::CredentialError;
use crate::inventory::StorageError;

/// Conversation registry errors
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(i64),

    #[error("Message not found: {0}")]
    MessageNotFound(i64),

    #[error("User {user_id} is not a participant of conversation {conversation_id}")]
    NotParticipant { conversation_id: i64, user_id: i64 },

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Storage(e) => {
                tracing::error!(error = %e, "Chat storage failure");
                AppError::database(e.to_string())
            }
            ChatError::Validation(msg) => AppError::validation(msg),
            ChatError::ConversationNotFound(id) => AppError::with_message(
                ErrorCode::ConversationNotFound,
                format!("Conversation {} not found", id),
            )
            .with_detail("conversation_id", id),
            ChatError::MessageNotFound(id) => {
                AppError::with_message(ErrorCode::MessageNotFound, format!("Message {} not found", id))
                    .with_detail("message_id", id)
            }
            ChatError::NotParticipant {
                conversation_id, ..
            } => AppError::not_participant(conversation_id),
            ChatError::Forbidden(msg) => AppError::forbidden(msg),
        }
    }
}

/// Realtime hub errors
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Authentication failed: {0}")]
    Authentication(#[from] CredentialError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<HubError> for AppError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Authentication(e) => e.into(),
            HubError::Chat(e) => e.into(),
            HubError::Task(e) => {
                tracing::error!(error = %e, "Hub task failed");
                AppError::internal(e.to_string())
            }
        }
    }
}

impl HubError {
    /// Error frame for the initiating connection; the connection stays open
    pub fn to_event(self, event: &str) -> ServerEvent {
        self.to_event_redacted(event, shared::error::system_errors_redacted())
    }

    fn to_event_redacted(self, event: &str, redact: bool) -> ServerEvent {
        error_frame(&AppError::from(self), Some(event), redact)
    }
}

/// Socket error frame; system error detail stays in the server log when `redact` is set
pub fn error_frame(err: &AppError, event: Option<&str>, redact: bool) -> ServerEvent {
    ServerEvent::Error {
        kind: err.kind().to_string(),
        message: err.message_for(redact),
        event: event.map(str::to_string),
    }
}
