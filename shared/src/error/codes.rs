//! Unified error codes for the depot back-office
//!
//! This module defines all error codes used across depot-server and its clients.
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 4xxx: Order errors
//! - 6xxx: Stock errors
//! - 7xxx: Chat errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values for efficient serialization
/// and cross-language compatibility (Rust, TypeScript, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,
    /// Required field missing
    RequiredField = 7,
    /// Value out of range
    ValueOutOfRange = 8,

    // ==================== 1xxx: Auth ====================
    /// User is not authenticated
    NotAuthenticated = 1001,
    /// Token has expired
    TokenExpired = 1003,
    /// Token is invalid
    TokenInvalid = 1004,
    /// Account is disabled
    AccountDisabled = 1007,

    // ==================== 2xxx: Permission ====================
    /// Permission denied
    PermissionDenied = 2001,
    /// Admin role required
    AdminRequired = 2003,

    // ==================== 4xxx: Order ====================
    /// Order not found
    OrderNotFound = 4001,
    /// Status edge not permitted by the order state machine
    InvalidTransition = 4002,
    /// Order reference already used
    OrderReferenceExists = 4003,
    /// Courier run not found
    RunNotFound = 4010,

    // ==================== 6xxx: Stock ====================
    /// Product not found
    ProductNotFound = 6001,
    /// Reservation exceeds the available bucket
    InsufficientStock = 6002,
    /// Product code already used
    ProductCodeExists = 6003,

    // ==================== 7xxx: Chat ====================
    /// Conversation not found
    ConversationNotFound = 7001,
    /// Message not found
    MessageNotFound = 7002,
    /// Caller is not a participant of the conversation
    NotParticipant = 7003,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Configuration error
    ConfigError = 9005,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Get the default message for this error code
    pub fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Success",
            ErrorCode::Unknown => "Unknown error",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::AlreadyExists => "Resource already exists",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::RequiredField => "Required field is missing",
            ErrorCode::ValueOutOfRange => "Value is out of range",

            // Auth
            ErrorCode::NotAuthenticated => "Authentication required",
            ErrorCode::TokenExpired => "Token has expired",
            ErrorCode::TokenInvalid => "Invalid token",
            ErrorCode::AccountDisabled => "Account is disabled",

            // Permission
            ErrorCode::PermissionDenied => "Permission denied",
            ErrorCode::AdminRequired => "Admin role required",

            // Order
            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::InvalidTransition => "Order status transition not permitted",
            ErrorCode::OrderReferenceExists => "Order reference already exists",
            ErrorCode::RunNotFound => "Courier run not found",

            // Stock
            ErrorCode::ProductNotFound => "Product not found",
            ErrorCode::InsufficientStock => "Insufficient stock",
            ErrorCode::ProductCodeExists => "Product code already exists",

            // Chat
            ErrorCode::ConversationNotFound => "Conversation not found",
            ErrorCode::MessageNotFound => "Message not found",
            ErrorCode::NotParticipant => "Not a participant of this conversation",

            // System
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::ConfigError => "Configuration error",
        }
    }

    /// Stable taxonomy name exposed to callers as `kind`
    pub fn kind(&self) -> &'static str {
        match self {
            ErrorCode::Success => "ok",
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidRequest
            | ErrorCode::RequiredField
            | ErrorCode::ValueOutOfRange => "validation_error",
            ErrorCode::NotAuthenticated
            | ErrorCode::TokenExpired
            | ErrorCode::TokenInvalid
            | ErrorCode::AccountDisabled => "authentication_error",
            ErrorCode::PermissionDenied | ErrorCode::AdminRequired => "authorization_error",
            ErrorCode::NotFound
            | ErrorCode::OrderNotFound
            | ErrorCode::RunNotFound
            | ErrorCode::ProductNotFound
            | ErrorCode::ConversationNotFound
            | ErrorCode::MessageNotFound => "not_found",
            ErrorCode::AlreadyExists
            | ErrorCode::OrderReferenceExists
            | ErrorCode::ProductCodeExists => "conflict",
            ErrorCode::InvalidTransition => "invalid_transition",
            ErrorCode::InsufficientStock => "insufficient_stock",
            ErrorCode::NotParticipant => "not_participant",
            ErrorCode::Unknown
            | ErrorCode::InternalError
            | ErrorCode::DatabaseError
            | ErrorCode::ConfigError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:04}", self.code())
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            4 => Ok(ErrorCode::AlreadyExists),
            5 => Ok(ErrorCode::InvalidRequest),
            7 => Ok(ErrorCode::RequiredField),
            8 => Ok(ErrorCode::ValueOutOfRange),

            // Auth
            1001 => Ok(ErrorCode::NotAuthenticated),
            1003 => Ok(ErrorCode::TokenExpired),
            1004 => Ok(ErrorCode::TokenInvalid),
            1007 => Ok(ErrorCode::AccountDisabled),

            // Permission
            2001 => Ok(ErrorCode::PermissionDenied),
            2003 => Ok(ErrorCode::AdminRequired),

            // Order
            4001 => Ok(ErrorCode::OrderNotFound),
            4002 => Ok(ErrorCode::InvalidTransition),
            4003 => Ok(ErrorCode::OrderReferenceExists),
            4010 => Ok(ErrorCode::RunNotFound),

            // Stock
            6001 => Ok(ErrorCode::ProductNotFound),
            6002 => Ok(ErrorCode::InsufficientStock),
            6003 => Ok(ErrorCode::ProductCodeExists),

            // Chat
            7001 => Ok(ErrorCode::ConversationNotFound),
            7002 => Ok(ErrorCode::MessageNotFound),
            7003 => Ok(ErrorCode::NotParticipant),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::DatabaseError),
            9005 => Ok(ErrorCode::ConfigError),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::NotFound.code(), 3);
        assert_eq!(ErrorCode::InvalidTransition.code(), 4002);
        assert_eq!(ErrorCode::InsufficientStock.code(), 6002);
        assert_eq!(ErrorCode::NotParticipant.code(), 7003);
        assert_eq!(ErrorCode::InternalError.code(), 9001);
    }

    #[test]
    fn test_try_from_roundtrip() {
        for code in [
            ErrorCode::ValidationFailed,
            ErrorCode::TokenExpired,
            ErrorCode::PermissionDenied,
            ErrorCode::RunNotFound,
            ErrorCode::ProductCodeExists,
            ErrorCode::MessageNotFound,
            ErrorCode::ConfigError,
        ] {
            assert_eq!(ErrorCode::try_from(code.code()), Ok(code));
        }
        assert_eq!(ErrorCode::try_from(4242), Err(InvalidErrorCode(4242)));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorCode::ValidationFailed.kind(), "validation_error");
        assert_eq!(ErrorCode::TokenInvalid.kind(), "authentication_error");
        assert_eq!(ErrorCode::PermissionDenied.kind(), "authorization_error");
        assert_eq!(ErrorCode::OrderNotFound.kind(), "not_found");
        assert_eq!(ErrorCode::InvalidTransition.kind(), "invalid_transition");
        assert_eq!(ErrorCode::InsufficientStock.kind(), "insufficient_stock");
        assert_eq!(ErrorCode::NotParticipant.kind(), "not_participant");
        assert_eq!(ErrorCode::DatabaseError.kind(), "internal_error");
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorCode::NotFound.to_string(), "E0003");
        assert_eq!(ErrorCode::InsufficientStock.to_string(), "E6002");
    }

    #[test]
    fn test_serde_as_number() {
        let json = serde_json::to_string(&ErrorCode::InvalidTransition).unwrap();
        assert_eq!(json, "4002");
        let code: ErrorCode = serde_json::from_str("7003").unwrap();
        assert_eq!(code, ErrorCode::NotParticipant);
    }
}
